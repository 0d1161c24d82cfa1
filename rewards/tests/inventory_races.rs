//! Stock contention, racing approvals and the decrement/status-write gap.
//!
//! Run with: `cargo test -p rewards --test inventory_races`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::Harness;
use rewardflow_core::RewardError;
use rewardflow_core::environment::Clock;
use rewardflow_core::types::{ApprovalMode, EventType, RequestStatus, UserId};
use rewardflow_testing::fixtures;
use rewards::processor::{ClaimRequest, ProcessorSettings};
use serde_json::json;

fn unconditional() -> Harness {
    Harness::with_settings(ProcessorSettings {
        evaluate_conditions: false,
        status_retry: common::fast_retry(1),
        ..ProcessorSettings::default()
    })
}

#[tokio::test]
async fn two_claims_on_the_last_unit() {
    let h = unconditional();
    let (event, reward) = h.seed(EventType::QuestComplete, ApprovalMode::Auto, 1);

    let (a, b) = futures::join!(
        h.processor
            .process_reward_request(UserId::new(), event.id, ClaimRequest::default()),
        h.processor
            .process_reward_request(UserId::new(), event.id, ClaimRequest::default()),
    );
    let mut statuses = vec![a.unwrap().status, b.unwrap().status];
    statuses.sort_by_key(|s| s.as_str());

    assert_eq!(statuses[0], RequestStatus::Completed);
    assert!(matches!(
        statuses[1],
        RequestStatus::Rejected | RequestStatus::Failed
    ));
    assert_eq!(h.store.quantity(reward.id), Some(0));
}

#[tokio::test]
async fn many_claims_never_oversell() {
    let h = unconditional();
    let (event, reward) = h.seed(EventType::QuestComplete, ApprovalMode::Auto, 3);

    let results = futures::future::join_all((0..10).map(|_| {
        h.processor
            .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
    }))
    .await;

    let completed = results
        .into_iter()
        .map(Result::unwrap)
        .filter(|r| r.status == RequestStatus::Completed)
        .count();
    assert_eq!(completed, 3);
    assert_eq!(h.store.quantity(reward.id), Some(0));
    assert_eq!(h.store.request_count(), 10);
}

#[tokio::test]
async fn concurrent_requests_with_one_key_share_a_row() {
    let h = unconditional();
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 5);
    let user = UserId::new();
    let claim = || ClaimRequest {
        reward_id: None,
        idempotency_key: Some("double-submit-key-01".to_string()),
    };

    let (a, b) = futures::join!(
        h.processor.process_reward_request(user, event.id, claim()),
        h.processor.process_reward_request(user, event.id, claim()),
    );
    assert_eq!(a.unwrap().id, b.unwrap().id);
    assert_eq!(h.store.request_count(), 1);
}

#[tokio::test]
async fn racing_approvals_take_stock_once() {
    let h = unconditional();
    let (event, reward) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 5);

    let pending = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();

    let (a, b) = futures::join!(
        h.processor.approve_reward_request(pending.id, UserId::new()),
        h.processor.approve_reward_request(pending.id, UserId::new()),
    );
    let outcomes = [a, b];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(RewardError::InvalidStateTransition { .. })
    )));
    assert_eq!(h.store.quantity(reward.id), Some(4));
}

#[tokio::test]
async fn inventory_outage_fails_the_request() {
    let h = unconditional();
    let (event, reward) = h.seed(EventType::QuestComplete, ApprovalMode::Auto, 5);
    h.store.set_inventory_unavailable(true);

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Failed);
    assert!(request.message.is_some());
    assert_eq!(h.store.quantity(reward.id), Some(5));
}

/// A manual request approved by an admin, ready to be claimed.
async fn approved_request(h: &Harness) -> (rewardflow_core::types::RewardRequest, i64) {
    let (event, reward) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 5);
    let user = UserId::new();
    h.store.seed_log([fixtures::log_entry(
        user,
        EventType::QuestComplete,
        json!({ "questId": "tutorial" }),
        h.clock.now(),
    )]);

    let pending = h
        .processor
        .process_reward_request(
            user,
            event.id,
            ClaimRequest {
                reward_id: Some(reward.id),
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    let approved = h
        .processor
        .admin_update_request_status(pending.id, RequestStatus::Approved, None, UserId::new())
        .await
        .unwrap();
    (approved, reward.quantity)
}

#[tokio::test]
async fn failed_completion_after_decrement_is_marked_for_reconciliation() {
    let h = Harness::new();
    let (approved, initial) = approved_request(&h).await;
    let reward_id = approved.reward_id.unwrap();

    // Both completion attempts fail; the FAILED write goes through.
    h.store.fail_next_transitions(2);
    let failed = h.processor.claim(approved.id, approved.user_id).await.unwrap();

    assert_eq!(failed.status, RequestStatus::Failed);
    let message = failed.message.unwrap();
    assert!(message.contains(&reward_id.to_string()));
    assert!(message.contains("reconciliation required"));
    assert_eq!(h.store.quantity(reward_id), Some(initial - 1));
}

#[tokio::test]
async fn unrecordable_outcome_surfaces_reconciliation_error() {
    let h = Harness::new();
    let (approved, initial) = approved_request(&h).await;
    let reward_id = approved.reward_id.unwrap();

    h.store.fail_next_transitions(3);
    let err = h
        .processor
        .claim(approved.id, approved.user_id)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "RECONCILIATION_REQUIRED");
    assert!(!err.is_retryable());
    assert_eq!(h.store.quantity(reward_id), Some(initial - 1));

    let stored = h.processor.find_request(approved.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Approved);
}

#[tokio::test]
async fn transient_completion_failure_is_retried() {
    let h = Harness::new();
    let (approved, initial) = approved_request(&h).await;

    h.store.fail_next_transitions(1);
    let completed = h.processor.claim(approved.id, approved.user_id).await.unwrap();

    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(
        h.store.quantity(approved.reward_id.unwrap()),
        Some(initial - 1)
    );
}
