use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Stable identifier of a step within a workflow
pub type StepId = String;

/// One entry in a workflow's ordered step list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub content: Value,
}

impl Step {
    pub fn new(id: impl Into<StepId>, content: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// A structural edit to a step list, keyed by step id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepDiff {
    /// Append a step, or insert it after `after` when given
    AddStep {
        step: Step,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<StepId>,
    },
    RemoveStep { step_id: StepId },
    UpdateStep { step_id: StepId, content: Value },
}

impl StepDiff {
    pub fn add(step: Step) -> Self {
        StepDiff::AddStep { step, after: None }
    }

    pub fn add_after(step: Step, after: impl Into<StepId>) -> Self {
        StepDiff::AddStep {
            step,
            after: Some(after.into()),
        }
    }

    pub fn remove(step_id: impl Into<StepId>) -> Self {
        StepDiff::RemoveStep {
            step_id: step_id.into(),
        }
    }

    pub fn update(step_id: impl Into<StepId>, content: impl Into<Value>) -> Self {
        StepDiff::UpdateStep {
            step_id: step_id.into(),
            content: content.into(),
        }
    }

    /// Apply this diff in place.
    pub fn apply(&self, steps: &mut Vec<Step>) -> Result<()> {
        match self {
            StepDiff::AddStep { step, after } => {
                if index_of(steps, &step.id).is_some() {
                    return Err(SyncError::InvalidModification(format!(
                        "step {} already exists",
                        step.id
                    )));
                }
                let at = match after {
                    Some(anchor) => index_of(steps, anchor).map(|i| i + 1).ok_or_else(|| {
                        SyncError::InvalidModification(format!("no step {} to add after", anchor))
                    })?,
                    None => steps.len(),
                };
                steps.insert(at, step.clone());
            }
            StepDiff::RemoveStep { step_id } => {
                let at = index_of(steps, step_id).ok_or_else(|| missing(step_id))?;
                steps.remove(at);
            }
            StepDiff::UpdateStep { step_id, content } => {
                let at = index_of(steps, step_id).ok_or_else(|| missing(step_id))?;
                steps[at].content = content.clone();
            }
        }
        Ok(())
    }
}

fn index_of(steps: &[Step], id: &str) -> Option<usize> {
    steps.iter().position(|s| s.id == id)
}

fn missing(step_id: &str) -> SyncError {
    SyncError::InvalidModification(format!("no step {}", step_id))
}

/// Replay `diffs` onto a copy of `base`. Either every diff applies or the
/// first failure is returned.
pub fn replay(base: &[Step], diffs: &[StepDiff]) -> Result<Vec<Step>> {
    let mut steps = base.to_vec();
    for diff in diffs {
        diff.apply(&mut steps)?;
    }
    Ok(steps)
}

/// Reject step lists with repeated ids.
pub(crate) fn check_unique(steps: &[Step]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.id.as_str()) {
            return Err(SyncError::InvalidModification(format!(
                "duplicate step id {}",
                step.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn steps() -> Vec<Step> {
        vec![Step::new("A", "load"), Step::new("B", "clean")]
    }

    #[test]
    fn test_replay_applies_in_order() {
        let diffs = vec![
            StepDiff::add(Step::new("C", "train")),
            StepDiff::update("A", json!({"source": "s3"})),
            StepDiff::remove("B"),
            StepDiff::add_after(Step::new("B2", "dedupe"), "A"),
        ];
        let out = replay(&steps(), &diffs).unwrap();
        let ids: Vec<_> = out.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B2", "C"]);
        assert_eq!(out[0].content, json!({"source": "s3"}));
    }

    #[test]
    fn test_bad_diff_rejected() {
        assert!(replay(&steps(), &[StepDiff::remove("Z")]).is_err());
        assert!(replay(&steps(), &[StepDiff::add(Step::new("A", "again"))]).is_err());
        assert!(replay(&steps(), &[StepDiff::add_after(Step::new("C", "x"), "Z")]).is_err());
    }

    #[test]
    fn test_diff_wire_format() {
        let diff = StepDiff::update("B", "v2");
        let value = serde_json::to_value(&diff).unwrap();
        assert_eq!(
            value,
            json!({"action": "update_step", "step_id": "B", "content": "v2"})
        );

        let parsed: StepDiff =
            serde_json::from_value(json!({"action": "add_step", "step": {"id": "C", "content": 1}}))
                .unwrap();
        assert_eq!(parsed, StepDiff::add(Step::new("C", 1)));
    }

    #[test]
    fn test_duplicate_ids() {
        assert!(check_unique(&steps()).is_ok());
        assert!(check_unique(&[Step::new("A", 1), Step::new("A", 2)]).is_err());
    }
}
