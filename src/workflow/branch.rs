//! Workflow Branch Manager
//!
//! Each workflow has a main line and any number of branches forked from it.
//! Branches are edited independently; merging folds a branch back into the
//! main line through a three-way merge against the fork point.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::merge::{Conflict, ThreeWayMerge};
use super::resolver::{settle, ResolutionStrategy};
use super::step::{check_unique, replay, Step, StepDiff};
use crate::collab::DocumentStorage;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::ot::{ParticipantId, Version};

pub type WorkflowId = Uuid;
pub type BranchId = Uuid;

/// The authoritative step list of a workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainLine {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub owner_id: ParticipantId,
    /// Starts at 1 and increments once per successful merge
    pub version: Version,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Open,
    Merged,
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: BranchId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub created_by: ParticipantId,
    pub created_at: DateTime<Utc>,
    /// Main-line version this branch forked from
    pub base_version: Version,
    /// Main-line steps at `base_version`
    pub base_steps: Vec<Step>,
    /// Always equal to `base_steps` with `modifications` replayed on top
    pub steps: Vec<Step>,
    pub modifications: Vec<StepDiff>,
    pub status: BranchStatus,
    /// Main-line version produced by merging this branch
    pub merged_version: Option<Version>,
}

impl Branch {
    fn ensure_open(&self) -> Result<()> {
        match self.status {
            BranchStatus::Open => Ok(()),
            BranchStatus::Merged | BranchStatus::Abandoned => {
                Err(SyncError::BranchClosed(self.branch_id))
            }
        }
    }
}

/// Result of `merge_branch`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MergeOutcome {
    Merged {
        new_version: Version,
        steps: Vec<Step>,
    },
    /// Nothing was committed; the branch stays open
    Conflict { conflicts: Vec<Conflict> },
}

pub struct BranchManager {
    storage: Arc<dyn DocumentStorage>,
    merge_retry_limit: u32,
    workflows: RwLock<HashMap<WorkflowId, Arc<Mutex<MainLine>>>>,
    branches: RwLock<HashMap<BranchId, Arc<Mutex<Branch>>>>,
}

impl BranchManager {
    pub fn new(config: &SyncConfig, storage: Arc<dyn DocumentStorage>) -> Self {
        Self {
            storage,
            merge_retry_limit: config.merge_retry_limit,
            workflows: RwLock::new(HashMap::new()),
            branches: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_workflow(
        &self,
        name: impl Into<String>,
        owner_id: impl Into<ParticipantId>,
        steps: Vec<Step>,
    ) -> Result<WorkflowId> {
        check_unique(&steps)?;
        let main = MainLine {
            workflow_id: Uuid::new_v4(),
            name: name.into(),
            owner_id: owner_id.into(),
            version: 1,
            steps,
            created_at: Utc::now(),
        };
        let workflow_id = main.workflow_id;
        info!(
            "Created workflow {} ({}) with {} steps",
            workflow_id,
            main.name,
            main.steps.len()
        );
        self.workflows
            .write()
            .await
            .insert(workflow_id, Arc::new(Mutex::new(main)));
        Ok(workflow_id)
    }

    async fn workflow_entry(&self, workflow_id: WorkflowId) -> Result<Arc<Mutex<MainLine>>> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(SyncError::WorkflowNotFound(workflow_id))
    }

    async fn branch_entry(&self, branch_id: BranchId) -> Result<Arc<Mutex<Branch>>> {
        self.branches
            .read()
            .await
            .get(&branch_id)
            .cloned()
            .ok_or(SyncError::BranchNotFound(branch_id))
    }

    pub async fn main_line(&self, workflow_id: WorkflowId) -> Result<MainLine> {
        let main = self.workflow_entry(workflow_id).await?;
        let snapshot = main.lock().await.clone();
        Ok(snapshot)
    }

    /// Fork the current main line.
    pub async fn create_branch(
        &self,
        workflow_id: WorkflowId,
        author_id: impl Into<ParticipantId>,
    ) -> Result<BranchId> {
        let author_id = author_id.into();
        let name = format!("{}-branch", author_id);
        self.create_named_branch(workflow_id, author_id, name).await
    }

    pub async fn create_named_branch(
        &self,
        workflow_id: WorkflowId,
        author_id: impl Into<ParticipantId>,
        name: impl Into<String>,
    ) -> Result<BranchId> {
        let (base_version, base_steps) = {
            let main = self.workflow_entry(workflow_id).await?;
            let main = main.lock().await;
            (main.version, main.steps.clone())
        };

        let branch = Branch {
            branch_id: Uuid::new_v4(),
            workflow_id,
            name: name.into(),
            created_by: author_id.into(),
            created_at: Utc::now(),
            base_version,
            steps: base_steps.clone(),
            base_steps,
            modifications: Vec::new(),
            status: BranchStatus::Open,
            merged_version: None,
        };
        let branch_id = branch.branch_id;
        info!(
            "{} created branch {} ({}) of workflow {} at v{}",
            branch.created_by, branch_id, branch.name, workflow_id, base_version
        );
        self.branches
            .write()
            .await
            .insert(branch_id, Arc::new(Mutex::new(branch)));
        Ok(branch_id)
    }

    /// Apply `diffs` to a branch. Either all of them apply or none do.
    pub async fn modify_branch(&self, branch_id: BranchId, diffs: Vec<StepDiff>) -> Result<Vec<Step>> {
        let entry = self.branch_entry(branch_id).await?;
        let mut branch = entry.lock().await;
        branch.ensure_open()?;

        let steps = replay(&branch.steps, &diffs)?;
        for diff in &diffs {
            self.storage.append_modification(branch_id, diff).await?;
        }

        debug!(
            "Branch {}: {} modifications, now {} steps",
            branch_id,
            diffs.len(),
            steps.len()
        );
        branch.modifications.extend(diffs);
        branch.steps = steps.clone();
        Ok(steps)
    }

    /// Merge a branch back into its main line.
    ///
    /// Merges of the same branch are serialized by the branch lock. The
    /// merge itself is computed against a snapshot of the main line and
    /// only committed if no other merge landed in the meantime.
    pub async fn merge_branch(
        &self,
        branch_id: BranchId,
        strategy: &ResolutionStrategy,
    ) -> Result<MergeOutcome> {
        let entry = self.branch_entry(branch_id).await?;
        let mut branch = entry.lock().await;
        branch.ensure_open()?;
        let workflow = self.workflow_entry(branch.workflow_id).await?;

        for attempt in 0..=self.merge_retry_limit {
            let (seen_version, ours) = {
                let main = workflow.lock().await;
                (main.version, main.steps.clone())
            };

            let result = ThreeWayMerge::merge(&branch.base_steps, &ours, &branch.steps);
            let steps = match settle(result, strategy) {
                Ok(steps) => steps,
                Err(conflicts) => {
                    info!(
                        "Merge of branch {} blocked by {} conflicts ({:?})",
                        branch_id,
                        conflicts.len(),
                        strategy
                    );
                    return Ok(MergeOutcome::Conflict { conflicts });
                }
            };
            if let Err(err) = check_unique(&steps) {
                warn!("Merge of branch {} rejected: {}", branch_id, err);
                return Err(err);
            }

            let mut main = workflow.lock().await;
            if main.version != seen_version {
                debug!(
                    "Main line of {} moved from v{} to v{} during merge of {} (attempt {})",
                    main.workflow_id, seen_version, main.version, branch_id, attempt
                );
                continue;
            }
            main.version += 1;
            main.steps = steps.clone();
            branch.status = BranchStatus::Merged;
            branch.merged_version = Some(main.version);
            info!(
                "Merged branch {} into workflow {} as v{}",
                branch_id, main.workflow_id, main.version
            );
            return Ok(MergeOutcome::Merged {
                new_version: main.version,
                steps,
            });
        }

        warn!(
            "Giving up on merge of branch {} after {} attempts",
            branch_id,
            self.merge_retry_limit + 1
        );
        Err(SyncError::MergeContention(branch_id))
    }

    pub async fn branch(&self, branch_id: BranchId) -> Result<Branch> {
        let entry = self.branch_entry(branch_id).await?;
        let branch = entry.lock().await.clone();
        Ok(branch)
    }

    /// Every branch of a workflow, oldest first.
    pub async fn branches(&self, workflow_id: WorkflowId) -> Result<Vec<Branch>> {
        self.workflow_entry(workflow_id).await?;
        let entries: Vec<Arc<Mutex<Branch>>> =
            self.branches.read().await.values().cloned().collect();

        let mut out = Vec::new();
        for entry in entries {
            let branch = entry.lock().await;
            if branch.workflow_id == workflow_id {
                out.push(branch.clone());
            }
        }
        out.sort_by_key(|b| b.created_at);
        Ok(out)
    }

    pub async fn abandon_branch(&self, branch_id: BranchId) -> Result<()> {
        let entry = self.branch_entry(branch_id).await?;
        let mut branch = entry.lock().await;
        branch.ensure_open()?;
        branch.status = BranchStatus::Abandoned;
        info!("Abandoned branch {}", branch_id);
        Ok(())
    }
}
