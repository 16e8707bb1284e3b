//! Three-Way Merge for step lists
//!
//! Steps are matched by id across base, ours and theirs. Changes on only one
//! side merge cleanly; differing changes on both sides become conflicts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::step::{Step, StepId};

/// A step both sides changed differently. `None` means that side (or the
/// base) does not have the step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub step_id: StepId,
    pub base: Option<Step>,
    pub ours: Option<Step>,
    pub theirs: Option<Step>,
    /// Index in `merged_steps` where the resolved step belongs
    pub position: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub merged_steps: Vec<Step>,
    pub conflicts: Vec<Conflict>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

enum Decision<'a> {
    Take(&'a Step),
    Drop,
    Conflict,
}

enum Slot {
    Step(Step),
    Conflict(Conflict),
}

impl Slot {
    fn id(&self) -> &str {
        match self {
            Slot::Step(step) => &step.id,
            Slot::Conflict(conflict) => &conflict.step_id,
        }
    }
}

pub struct ThreeWayMerge;

impl ThreeWayMerge {
    /// Merge `ours` and `theirs`, both descended from `base`.
    ///
    /// Output order follows `ours`. A step that only `theirs` has is placed
    /// after its nearest predecessor in `theirs` that made it into the
    /// output, or first if there is none.
    pub fn merge(base: &[Step], ours: &[Step], theirs: &[Step]) -> MergeResult {
        let base_map = by_id(base);
        let ours_map = by_id(ours);
        let theirs_map = by_id(theirs);

        let slot = |id: &str| {
            let b = base_map.get(id).copied();
            let o = ours_map.get(id).copied();
            let t = theirs_map.get(id).copied();
            match decide(b, o, t) {
                Decision::Take(step) => Some(Slot::Step(step.clone())),
                Decision::Drop => None,
                Decision::Conflict => Some(Slot::Conflict(Conflict {
                    step_id: id.to_string(),
                    base: b.cloned(),
                    ours: o.cloned(),
                    theirs: t.cloned(),
                    position: 0,
                })),
            }
        };

        let mut slots: Vec<Slot> = ours.iter().filter_map(|s| slot(&s.id)).collect();

        let mut anchor: Option<&str> = None;
        for step in theirs {
            if !ours_map.contains_key(step.id.as_str()) {
                if let Some(new_slot) = slot(&step.id) {
                    let at = anchor
                        .and_then(|a| slots.iter().position(|s| s.id() == a))
                        .map_or(0, |i| i + 1);
                    slots.insert(at, new_slot);
                }
            }
            if slots.iter().any(|s| s.id() == step.id) {
                anchor = Some(&step.id);
            }
        }

        let mut merged_steps = Vec::new();
        let mut conflicts = Vec::new();
        for slot in slots {
            match slot {
                Slot::Step(step) => merged_steps.push(step),
                Slot::Conflict(mut conflict) => {
                    conflict.position = merged_steps.len();
                    conflicts.push(conflict);
                }
            }
        }

        MergeResult {
            merged_steps,
            conflicts,
        }
    }
}

fn decide<'a>(b: Option<&'a Step>, o: Option<&'a Step>, t: Option<&'a Step>) -> Decision<'a> {
    let pick = |side: Option<&'a Step>| side.map_or(Decision::Drop, Decision::Take);
    if o == t {
        pick(o)
    } else if b == o {
        pick(t)
    } else if b == t {
        pick(o)
    } else {
        Decision::Conflict
    }
}

fn by_id(steps: &[Step]) -> HashMap<&str, &Step> {
    steps.iter().map(|s| (s.id.as_str(), s)).collect()
}
