//! Position-adjustment rules for concurrent text operations
//!
//! `transform_pair(a, b)` rebases `a` so it applies after `b`, where both
//! were created against the same document state. For any such pair:
//!
//! ```text
//! apply(apply(doc, a), transform_pair(b, a)) == apply(apply(doc, b), transform_pair(a, b))
//! ```

use super::operation::{char_len, char_slice, OpKind, Operation};

/// Rebase `incoming` over `concurrent`, applied in version order.
///
/// `concurrent` must be exactly the accepted operations the author of
/// `incoming` had not seen.
pub fn transform<'a>(
    incoming: &Operation,
    concurrent: impl IntoIterator<Item = &'a Operation>,
) -> Operation {
    concurrent
        .into_iter()
        .fold(incoming.clone(), |op, seen| transform_pair(&op, seen))
}

/// Rebase `a` so that it applies after `b`.
pub fn transform_pair(a: &Operation, b: &Operation) -> Operation {
    let (pa, la) = (a.position, a.span);
    let (pb, lb) = (b.position, b.span);
    let (end_a, end_b) = (a.end(), b.end());
    let inserted_b = b.inserted_text();
    let nb = char_len(inserted_b);

    let mut out = a.clone();

    if pb < pa && pa < end_b {
        // b removed the point where a inserts: a's text goes with it, and
        // only the part of a's range past b's range is left to remove.
        let kept = end_a.saturating_sub(end_b);
        out.position = pb + nb;
        out.span = kept;
        out.payload = match a.kind {
            OpKind::Delete => char_slice(&a.payload, la - kept, la).to_string(),
            OpKind::Insert | OpKind::Replace => String::new(),
        };
    } else if pa < pb && pb < end_a {
        // b inserts inside the range a removes: a swallows b's text.
        let overlap = end_a.min(end_b) - pb;
        let offset = pb - pa;
        out.span = la - overlap + nb;
        if a.kind == OpKind::Delete {
            out.payload = format!(
                "{}{}{}",
                char_slice(&a.payload, 0, offset),
                inserted_b,
                char_slice(&a.payload, offset + overlap, la)
            );
        }
    } else if pa == pb {
        if goes_first(a, b) {
            // a's range is no longer than b's, so b already removed all of it.
            out.span = 0;
            if a.kind == OpKind::Delete {
                out.payload.clear();
            }
        } else {
            let kept = la.saturating_sub(lb);
            out.position = pa + nb;
            out.span = kept;
            if a.kind == OpKind::Delete {
                out.payload = char_slice(&a.payload, la - kept, la).to_string();
            }
        }
    } else if end_b <= pa {
        out.position = pa - lb + nb;
    }

    out
}

/// Ordering for edits sharing an insertion point: shorter removal first,
/// then author id, then op id. Every replica computes the same answer.
fn goes_first(a: &Operation, b: &Operation) -> bool {
    (a.span, &a.author_id, a.op_id) < (b.span, &b.author_id, b.op_id)
}
