//! Branch, modify and merge workflows end to end

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use concord::collab::MemoryStorage;
use concord::protocol::MergeResponse;
use concord::workflow::{
    BranchId, BranchManager, BranchStatus, Conflict, ConflictResolution, MergeOutcome,
    PreferTheirs, ResolutionStrategy, ScoreResolver, Step, StepDiff, ThreeWayMerge, WorkflowId,
};
use concord::{SyncConfig, SyncError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn manager() -> (BranchManager, Arc<MemoryStorage>) {
    concord::logging::init_for_tests();
    let storage = Arc::new(MemoryStorage::new());
    (
        BranchManager::new(&SyncConfig::default(), storage.clone()),
        storage,
    )
}

async fn workflow(manager: &BranchManager) -> WorkflowId {
    manager
        .create_workflow(
            "release",
            "alice",
            vec![Step::new("A", "v1"), Step::new("B", "v1")],
        )
        .await
        .unwrap()
}

/// Fork, apply `diffs`, and return the branch id.
async fn branch_with(manager: &BranchManager, wf: WorkflowId, author: &str, diffs: Vec<StepDiff>) -> BranchId {
    let branch_id = manager.create_branch(wf, author).await.unwrap();
    manager.modify_branch(branch_id, diffs).await.unwrap();
    branch_id
}

fn ids(steps: &[Step]) -> Vec<&str> {
    steps.iter().map(|s| s.id.as_str()).collect()
}

fn assert_unique_ids(steps: &[Step]) {
    let unique: HashSet<&str> = ids(steps).into_iter().collect();
    assert_eq!(unique.len(), steps.len(), "duplicate step ids in {:?}", ids(steps));
}

// ---------------------------------------------------------------------------
// Merge scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_added_step_merges_cleanly() {
    let (manager, storage) = manager();
    let wf = workflow(&manager).await;
    let branch_id = branch_with(&manager, wf, "bob", vec![StepDiff::add(Step::new("C", "v1"))]).await;

    let outcome = manager
        .merge_branch(branch_id, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();
    match outcome {
        MergeOutcome::Merged { new_version, steps } => {
            assert_eq!(new_version, 2);
            assert_eq!(ids(&steps), vec!["A", "B", "C"]);
        }
        MergeOutcome::Conflict { conflicts } => panic!("unexpected conflicts: {:?}", conflicts),
    }

    let main = manager.main_line(wf).await.unwrap();
    assert_eq!(main.version, 2);
    assert_eq!(ids(&main.steps), vec!["A", "B", "C"]);
    assert_eq!(storage.modifications(branch_id).await.len(), 1);

    let branch = manager.branch(branch_id).await.unwrap();
    assert_eq!(branch.status, BranchStatus::Merged);
    assert_eq!(branch.merged_version, Some(2));
}

#[tokio::test]
async fn test_divergent_edits_conflict() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let first = branch_with(&manager, wf, "alice", vec![StepDiff::update("B", "v2")]).await;
    let second = branch_with(&manager, wf, "bob", vec![StepDiff::update("B", "v3")]).await;

    manager
        .merge_branch(first, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();
    let result = manager
        .merge_branch(second, &ResolutionStrategy::ManualRequired)
        .await;

    let response = serde_json::to_value(MergeResponse::from(result)).unwrap();
    assert_eq!(
        response,
        json!({
            "status": "conflict",
            "conflicts": [{
                "step_id": "B",
                "ours": "v2",
                "theirs": "v3",
                "base": "v1",
                "position": 1
            }]
        })
    );

    // Nothing was committed and the branch can still be resolved.
    assert_eq!(manager.main_line(wf).await.unwrap().version, 2);
    assert_eq!(
        manager.branch(second).await.unwrap().status,
        BranchStatus::Open
    );
    let resolved = manager
        .merge_branch(second, &ResolutionStrategy::auto(PreferTheirs))
        .await
        .unwrap();
    assert_eq!(
        resolved,
        MergeOutcome::Merged {
            new_version: 3,
            steps: vec![Step::new("A", "v1"), Step::new("B", "v3")],
        }
    );
}

#[test]
fn test_merging_base_with_itself() {
    let base = vec![Step::new("A", 1), Step::new("B", json!({"k": "v"}))];
    let result = ThreeWayMerge::merge(&base, &base, &base);
    assert_eq!(result.merged_steps, base);
    assert!(result.conflicts.is_empty());
}

#[tokio::test]
async fn test_unchanged_branch_still_bumps_version() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let branch_id = manager.create_branch(wf, "bob").await.unwrap();

    let outcome = manager
        .merge_branch(branch_id, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { new_version: 2, .. }));

    let main = manager.main_line(wf).await.unwrap();
    assert_eq!(ids(&main.steps), vec!["A", "B"]);
    assert_unique_ids(&main.steps);
}

#[tokio::test]
async fn test_keep_both_materializes_siblings() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let first = branch_with(&manager, wf, "alice", vec![StepDiff::update("A", "mine")]).await;
    let second = branch_with(&manager, wf, "bob", vec![StepDiff::update("A", "yours")]).await;

    manager
        .merge_branch(first, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();
    let outcome = manager
        .merge_branch(second, &ResolutionStrategy::KeepBoth)
        .await
        .unwrap();

    let MergeOutcome::Merged { steps, .. } = outcome else {
        panic!("keep-both merge should complete");
    };
    assert_eq!(
        steps,
        vec![
            Step::new("A", "mine"),
            Step::new("A~theirs", "yours"),
            Step::new("B", "v1"),
        ]
    );
}

#[tokio::test]
async fn test_keep_both_sibling_ids_never_collide() {
    let (manager, _) = manager();
    let wf = manager
        .create_workflow(
            "release",
            "alice",
            vec![Step::new("B", "v1"), Step::new("B~theirs", "v1")],
        )
        .await
        .unwrap();
    let both = |content: &str| vec![StepDiff::update("B", content), StepDiff::update("B~theirs", content)];
    let first = branch_with(&manager, wf, "alice", both("ours")).await;
    let second = branch_with(&manager, wf, "bob", both("theirs")).await;

    manager
        .merge_branch(first, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();
    let outcome = manager
        .merge_branch(second, &ResolutionStrategy::KeepBoth)
        .await
        .unwrap();

    let MergeOutcome::Merged { steps, .. } = outcome else {
        panic!("keep-both merge should complete");
    };
    assert_eq!(steps.len(), 4);
    assert_unique_ids(&steps);
    assert_unique_ids(&manager.main_line(wf).await.unwrap().steps);
}

#[tokio::test]
async fn test_keep_both_keeps_the_surviving_side_of_a_deletion() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let edited = branch_with(&manager, wf, "alice", vec![StepDiff::update("A", "mine")]).await;
    let deleted = branch_with(&manager, wf, "bob", vec![StepDiff::remove("A")]).await;

    manager
        .merge_branch(edited, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();
    let outcome = manager
        .merge_branch(deleted, &ResolutionStrategy::KeepBoth)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        MergeOutcome::Merged {
            new_version: 3,
            steps: vec![Step::new("A", "mine"), Step::new("B", "v1")],
        }
    );
}

#[tokio::test]
async fn test_resolver_cannot_duplicate_step_ids() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let first = branch_with(&manager, wf, "alice", vec![StepDiff::update("B", "v2")]).await;
    let second = branch_with(&manager, wf, "bob", vec![StepDiff::update("B", "v3")]).await;
    manager
        .merge_branch(first, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();

    let clobber = |_: &Conflict| ConflictResolution::Use(Step::new("A", "clobber"));
    let err = manager
        .merge_branch(second, &ResolutionStrategy::auto(clobber))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidModification(_)));

    // Nothing was committed and the branch can still be merged.
    let main = manager.main_line(wf).await.unwrap();
    assert_eq!(main.version, 2);
    assert_eq!(main.steps, vec![Step::new("A", "v1"), Step::new("B", "v2")]);
    assert_eq!(manager.branch(second).await.unwrap().status, BranchStatus::Open);

    let renamed = |c: &Conflict| ConflictResolution::Use(Step::new(c.step_id.clone(), "v2+v3"));
    let outcome = manager
        .merge_branch(second, &ResolutionStrategy::auto(renamed))
        .await
        .unwrap();
    let MergeOutcome::Merged { steps, .. } = outcome else {
        panic!("resolved merge should complete");
    };
    assert_eq!(steps, vec![Step::new("A", "v1"), Step::new("B", "v2+v3")]);
}

#[tokio::test]
async fn test_auto_merge_with_scoring_and_closures() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let first = branch_with(&manager, wf, "alice", vec![StepDiff::update("A", json!({"priority": 1}))]).await;
    let second = branch_with(&manager, wf, "bob", vec![StepDiff::update("A", json!({"priority": 5}))]).await;
    let third = branch_with(&manager, wf, "carol", vec![StepDiff::remove("A")]).await;

    manager
        .merge_branch(first, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();

    let by_priority = ScoreResolver::new(|step: &Step| {
        step.content["priority"].as_f64().unwrap_or_default()
    });
    let outcome = manager
        .merge_branch(second, &ResolutionStrategy::auto(by_priority))
        .await
        .unwrap();
    let MergeOutcome::Merged { steps, .. } = outcome else {
        panic!("scored merge should complete");
    };
    assert_eq!(steps[0].content, json!({"priority": 5}));

    // carol deleted A while it was being edited; a resolver may refuse.
    let cautious = |conflict: &Conflict| match (&conflict.ours, &conflict.theirs) {
        (Some(_), None) => ConflictResolution::Unresolved,
        _ => ConflictResolution::TakeTheirs,
    };
    let outcome = manager
        .merge_branch(third, &ResolutionStrategy::auto(cautious))
        .await
        .unwrap();
    let MergeOutcome::Conflict { conflicts } = outcome else {
        panic!("refused conflict should block the merge");
    };
    assert_eq!(conflicts[0].step_id, "A");
    assert_eq!(conflicts[0].theirs, None);
}

// ---------------------------------------------------------------------------
// Branch lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_merged_branch_is_closed() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let branch_id = branch_with(&manager, wf, "bob", vec![StepDiff::add(Step::new("C", 1))]).await;
    manager
        .merge_branch(branch_id, &ResolutionStrategy::ManualRequired)
        .await
        .unwrap();

    assert_eq!(
        manager
            .modify_branch(branch_id, vec![StepDiff::remove("C")])
            .await
            .unwrap_err(),
        SyncError::BranchClosed(branch_id)
    );
    assert_eq!(
        manager
            .merge_branch(branch_id, &ResolutionStrategy::ManualRequired)
            .await
            .unwrap_err(),
        SyncError::BranchClosed(branch_id)
    );
}

#[tokio::test]
async fn test_branches_do_not_block_each_other() {
    let (manager, _) = manager();
    let wf = workflow(&manager).await;
    let left = manager.create_branch(wf, "alice").await.unwrap();
    let right = manager.create_branch(wf, "bob").await.unwrap();

    let (l, r) = tokio::join!(
        manager.modify_branch(left, vec![StepDiff::remove("A")]),
        manager.modify_branch(right, vec![StepDiff::update("A", "edited")]),
    );
    assert_eq!(ids(&l.unwrap()), vec!["B"]);
    assert_eq!(r.unwrap()[0].content, json!("edited"));

    let branches = manager.branches(wf).await.unwrap();
    assert_eq!(branches.len(), 2);
    assert!(branches.iter().all(|b| b.base_version == 1));
}

#[tokio::test]
async fn test_concurrent_merges_both_land() {
    let (manager, _) = manager();
    let manager = Arc::new(manager);
    let wf = workflow(&manager).await;
    let left = branch_with(&manager, wf, "alice", vec![StepDiff::add(Step::new("L", 1))]).await;
    let right = branch_with(&manager, wf, "bob", vec![StepDiff::add(Step::new("R", 1))]).await;

    let tasks: Vec<_> = [left, right]
        .into_iter()
        .map(|branch_id| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .merge_branch(branch_id, &ResolutionStrategy::ManualRequired)
                    .await
            })
        })
        .collect();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    }

    let main = manager.main_line(wf).await.unwrap();
    assert_eq!(main.version, 3);
    let mut merged = ids(&main.steps);
    merged.sort();
    assert_eq!(merged, vec!["A", "B", "L", "R"]);
}
