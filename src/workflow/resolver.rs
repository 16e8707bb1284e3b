use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::merge::{Conflict, MergeResult};
use super::step::{Step, StepId};

/// Decision for a single conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", content = "step", rename_all = "snake_case")]
pub enum ConflictResolution {
    TakeOurs,
    TakeTheirs,
    /// Replace both sides with a new step
    Use(Step),
    Remove,
    /// Leave it for a human; blocks the merge
    Unresolved,
}

pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> ConflictResolution;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Conflict) -> ConflictResolution + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict) -> ConflictResolution {
        self(conflict)
    }
}

pub struct PreferOurs;

impl ConflictResolver for PreferOurs {
    fn resolve(&self, _conflict: &Conflict) -> ConflictResolution {
        ConflictResolution::TakeOurs
    }
}

pub struct PreferTheirs;

impl ConflictResolver for PreferTheirs {
    fn resolve(&self, _conflict: &Conflict) -> ConflictResolution {
        ConflictResolution::TakeTheirs
    }
}

/// Pick whichever side scores higher. A missing side (a deletion) loses to
/// any edit; ties go to ours.
pub struct ScoreResolver<F> {
    score: F,
}

impl<F> ScoreResolver<F>
where
    F: Fn(&Step) -> f64 + Send + Sync,
{
    pub fn new(score: F) -> Self {
        Self { score }
    }
}

impl<F> ConflictResolver for ScoreResolver<F>
where
    F: Fn(&Step) -> f64 + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict) -> ConflictResolution {
        let score = |side: &Option<Step>| side.as_ref().map_or(f64::NEG_INFINITY, &self.score);
        if score(&conflict.theirs) > score(&conflict.ours) {
            ConflictResolution::TakeTheirs
        } else {
            ConflictResolution::TakeOurs
        }
    }
}

/// How a merge deals with conflicts.
#[derive(Clone)]
pub enum ResolutionStrategy {
    /// Ask a resolver about each conflict
    AutoMerge(Arc<dyn ConflictResolver>),
    /// Keep both versions side by side: ours under the original id, theirs
    /// under `<id>~theirs`
    KeepBoth,
    ManualRequired,
}

impl ResolutionStrategy {
    pub fn auto(resolver: impl ConflictResolver + 'static) -> Self {
        ResolutionStrategy::AutoMerge(Arc::new(resolver))
    }
}

impl fmt::Debug for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::AutoMerge(_) => f.write_str("AutoMerge"),
            ResolutionStrategy::KeepBoth => f.write_str("KeepBoth"),
            ResolutionStrategy::ManualRequired => f.write_str("ManualRequired"),
        }
    }
}

pub(crate) const SIBLING_SUFFIX: &str = "~theirs";

/// Settle every conflict in `result` under `strategy`.
///
/// Returns the final step list, or the conflicts nobody resolved.
pub(crate) fn settle(
    result: MergeResult,
    strategy: &ResolutionStrategy,
) -> Result<Vec<Step>, Vec<Conflict>> {
    let MergeResult {
        mut merged_steps,
        conflicts,
    } = result;
    if conflicts.is_empty() {
        return Ok(merged_steps);
    }

    // Ids a KeepBoth sibling must not take.
    let mut taken: HashSet<StepId> = merged_steps
        .iter()
        .map(|s| s.id.clone())
        .chain(conflicts.iter().map(|c| c.step_id.clone()))
        .collect();

    let mut placements: Vec<(usize, Vec<Step>)> = Vec::with_capacity(conflicts.len());
    let mut unresolved = Vec::new();
    for conflict in conflicts {
        let resolution = match strategy {
            ResolutionStrategy::ManualRequired => ConflictResolution::Unresolved,
            ResolutionStrategy::AutoMerge(resolver) => resolver.resolve(&conflict),
            ResolutionStrategy::KeepBoth => {
                let steps = keep_both(&conflict, &mut taken);
                placements.push((conflict.position, steps));
                continue;
            }
        };
        let steps = match resolution {
            ConflictResolution::TakeOurs => conflict.ours.clone().into_iter().collect(),
            ConflictResolution::TakeTheirs => conflict.theirs.clone().into_iter().collect(),
            ConflictResolution::Use(step) => vec![step],
            ConflictResolution::Remove => Vec::new(),
            ConflictResolution::Unresolved => {
                unresolved.push(conflict);
                continue;
            }
        };
        placements.push((conflict.position, steps));
    }
    if !unresolved.is_empty() {
        return Err(unresolved);
    }

    // Positions are non-decreasing; insert back to front so earlier indices
    // stay valid and ties keep their order.
    for (position, steps) in placements.into_iter().rev() {
        let at = position.min(merged_steps.len());
        merged_steps.splice(at..at, steps);
    }
    Ok(merged_steps)
}

fn keep_both(conflict: &Conflict, taken: &mut HashSet<StepId>) -> Vec<Step> {
    match (&conflict.ours, &conflict.theirs) {
        (Some(ours), Some(theirs)) => {
            let mut sibling_id: StepId = format!("{}{}", theirs.id, SIBLING_SUFFIX);
            while taken.contains(&sibling_id) {
                sibling_id.push_str(SIBLING_SUFFIX);
            }
            taken.insert(sibling_id.clone());
            vec![
                ours.clone(),
                Step {
                    id: sibling_id,
                    content: theirs.content.clone(),
                },
            ]
        }
        (Some(only), None) | (None, Some(only)) => vec![only.clone()],
        (None, None) => Vec::new(),
    }
}
