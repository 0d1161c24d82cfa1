//! Request processor integration tests over the in-memory store.
//!
//! Run with: `cargo test -p rewards --test request_processing`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::Harness;
use rewardflow_core::RewardError;
use rewardflow_core::environment::Clock;
use rewardflow_core::types::{
    ActorId, ApprovalMode, EventStatus, EventType, RequestStatus, Reward, UserId,
};
use rewardflow_testing::fixtures;
use rewards::processor::{ClaimRequest, ProcessingMode, ProcessorSettings};
use serde_json::json;

fn keyed(key: &str) -> ClaimRequest {
    ClaimRequest {
        reward_id: None,
        idempotency_key: Some(key.to_string()),
    }
}

#[tokio::test]
async fn repeated_key_returns_the_same_request() {
    let h = Harness::new();
    let (event, reward) = h.seed(EventType::DailyLogin, ApprovalMode::Auto, 10);
    let user = UserId::new();
    h.store.seed_log(fixtures::logins(user, h.clock.now(), &[-2, -1, 0]));

    let first = h
        .processor
        .process_reward_request(user, event.id, keyed("claim-0001-abcdef"))
        .await
        .unwrap();
    let second = h
        .processor
        .process_reward_request(user, event.id, keyed("claim-0001-abcdef"))
        .await
        .unwrap();

    assert_eq!(first.status, RequestStatus::Completed);
    assert_eq!(second, first);
    assert_eq!(h.store.request_count(), 1);
    assert_eq!(h.store.quantity(reward.id), Some(9));
}

#[tokio::test]
async fn key_reused_by_another_user_conflicts() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 10);
    let (other_event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 10);
    let owner = UserId::new();

    let stored = h
        .processor
        .process_reward_request(owner, event.id, keyed("shared-claim-key-0001"))
        .await
        .unwrap();

    let err = h
        .processor
        .process_reward_request(UserId::new(), event.id, keyed("shared-claim-key-0001"))
        .await
        .unwrap_err();
    assert!(matches!(err, RewardError::Conflict(_)));
    assert!(!err.to_string().contains(&stored.id.to_string()));

    let err = h
        .processor
        .process_reward_request(owner, other_event.id, keyed("shared-claim-key-0001"))
        .await
        .unwrap_err();
    assert!(matches!(err, RewardError::Conflict(_)));
    assert_eq!(h.store.request_count(), 1);
}

#[tokio::test]
async fn derived_key_allows_one_request_per_user_and_event() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 10);
    let user = UserId::new();

    let first = h
        .processor
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();
    let again = h
        .processor
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(h.store.request_count(), 1);
}

#[tokio::test]
async fn active_request_under_another_key_conflicts() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 10);
    let user = UserId::new();
    h.store.seed_log([fixtures::log_entry(
        user,
        EventType::QuestComplete,
        json!({ "questId": "tutorial" }),
        h.clock.now(),
    )]);

    let pending = h
        .processor
        .process_reward_request(user, event.id, keyed("first-claim-key-0001"))
        .await
        .unwrap();
    assert_eq!(pending.status, RequestStatus::Pending);

    let err = h
        .processor
        .process_reward_request(user, event.id, keyed("second-claim-key-0002"))
        .await
        .unwrap_err();
    assert!(matches!(err, RewardError::Conflict(_)));
    assert_eq!(h.store.request_count(), 1);
}

#[tokio::test]
async fn inactive_event_is_rejected_without_touching_stock() {
    let h = Harness::new();
    let (mut event, reward) = h.seed(EventType::DailyLogin, ApprovalMode::Auto, 5);
    event.status = EventStatus::Inactive;
    h.store.seed_event(event.clone());

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Rejected);
    assert!(request.message.unwrap().contains("not active"));
    assert_eq!(h.store.quantity(reward.id), Some(5));
    assert_eq!(h.store.decrement_count(), 0);
}

#[tokio::test]
async fn ended_event_is_rejected() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::DailyLogin, ApprovalMode::Auto, 5);
    h.clock.advance(Duration::days(20));

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Rejected);
}

#[tokio::test]
async fn unknown_event_is_not_found_and_records_nothing() {
    let h = Harness::new();
    let err = h
        .processor
        .process_reward_request(
            UserId::new(),
            rewardflow_core::types::EventId::new(),
            ClaimRequest::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(h.store.request_count(), 0);
}

#[tokio::test]
async fn manual_event_holds_stock_until_approval() {
    let h = Harness::new();
    let (event, reward) = h.seed(EventType::LevelUp, ApprovalMode::Manual, 5);
    let user = UserId::new();
    let admin = UserId::new();
    h.store.seed_log([fixtures::log_entry(
        user,
        EventType::LevelUp,
        json!({ "newLevel": 12 }),
        h.clock.now(),
    )]);

    let pending = h
        .processor
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(pending.status, RequestStatus::Pending);
    assert_eq!(pending.reward_id, Some(reward.id));
    assert_eq!(h.store.quantity(reward.id), Some(5));

    let completed = h
        .processor
        .approve_reward_request(pending.id, admin)
        .await
        .unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(completed.processed_by, Some(ActorId::user(&admin)));
    assert_eq!(h.store.quantity(reward.id), Some(4));
}

#[tokio::test]
async fn admin_actions_require_a_pending_request() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::LevelUp, ApprovalMode::Manual, 5);
    let user = UserId::new();
    let admin = UserId::new();

    // No log entries: the condition fails and the request is rejected.
    let rejected = h
        .processor
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.message.as_deref(), Some("condition not met"));

    let err = h
        .processor
        .approve_reward_request(rejected.id, admin)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RewardError::InvalidStateTransition {
            current: RequestStatus::Rejected,
            attempted: RequestStatus::Approved,
        }
    );

    let err = h
        .processor
        .reject_reward_request(rejected.id, "again".to_string(), admin)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RewardError::InvalidStateTransition {
            current: RequestStatus::Rejected,
            ..
        }
    ));
}

#[tokio::test]
async fn admin_status_update_approves_for_a_later_claim() {
    let h = Harness::new();
    let (event, reward) = h.seed(EventType::InviteFriends, ApprovalMode::Manual, 3);
    let user = UserId::new();
    let admin = UserId::new();
    h.store.seed_log((0..2).map(|n| {
        fixtures::log_entry(
            user,
            EventType::InviteFriends,
            json!({ "invitedUserId": format!("friend-{n}") }),
            h.clock.now(),
        )
    }));

    let pending = h
        .processor
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();

    let approved = h
        .processor
        .admin_update_request_status(
            pending.id,
            RequestStatus::Approved,
            Some("looks good".to_string()),
            admin,
        )
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(h.store.quantity(reward.id), Some(3));

    let err = h
        .processor
        .claim(pending.id, UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RewardError::Forbidden(_)));

    let completed = h.processor.claim(pending.id, user).await.unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(h.store.quantity(reward.id), Some(2));

    let again = h.processor.claim(pending.id, user).await.unwrap();
    assert_eq!(again, completed);
    assert_eq!(h.store.quantity(reward.id), Some(2));
}

#[tokio::test]
async fn admin_may_only_set_approved_or_rejected() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 3);

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();

    let err = h
        .processor
        .admin_update_request_status(request.id, RequestStatus::Completed, None, UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RewardError::Validation(_)));
}

#[tokio::test]
async fn daily_login_streak_completes_the_request() {
    let h = Harness::new();
    let (event, reward) = h.seed(EventType::DailyLogin, ApprovalMode::Auto, 10);
    let user = UserId::new();
    let streaker = UserId::new();
    h.store.seed_log(fixtures::logins(user, h.clock.now(), &[-5, -1, 0]));
    h.store
        .seed_log(fixtures::logins(streaker, h.clock.now(), &[-2, -1, 0]));

    let broken = h
        .processor
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(broken.status, RequestStatus::Rejected);

    let completed = h
        .processor
        .process_reward_request(streaker, event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(completed.reward_id, Some(reward.id));
    assert_eq!(h.store.quantity(reward.id), Some(9));
}

#[tokio::test]
async fn unlimited_reward_stock_never_changes() {
    let h = Harness::with_settings(ProcessorSettings {
        evaluate_conditions: false,
        ..ProcessorSettings::default()
    });
    let (event, reward) = h.seed(EventType::DailyLogin, ApprovalMode::Auto, Reward::UNLIMITED);

    for _ in 0..3 {
        let request = h
            .processor
            .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
    }
    assert_eq!(h.store.quantity(reward.id), Some(Reward::UNLIMITED));
}

#[tokio::test]
async fn unsupported_event_type_is_rejected() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::from("WATCH_AD"), ApprovalMode::Auto, 10);

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Rejected);
    assert!(request.message.unwrap().contains("unsupported event type WATCH_AD"));
}

#[tokio::test]
async fn reward_from_another_event_is_rejected() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Auto, 10);
    let (_, foreign) = h.seed(EventType::LevelUp, ApprovalMode::Auto, 10);

    let request = h
        .processor
        .process_reward_request(
            UserId::new(),
            event.id,
            ClaimRequest {
                reward_id: Some(foreign.id),
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Rejected);
    assert_eq!(h.store.quantity(foreign.id), Some(10));
}

#[tokio::test]
async fn depleted_reward_is_rejected_up_front() {
    let h = Harness::new();
    let (event, reward) = h.seed(EventType::QuestComplete, ApprovalMode::Auto, 0);

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Rejected);
    assert_eq!(
        request.message,
        Some(format!("reward {} is depleted", reward.id))
    );
}

#[tokio::test]
async fn event_log_outage_fails_the_request_with_detail() {
    let h = Harness::new();
    let (event, reward) = h.seed(EventType::DailyLogin, ApprovalMode::Auto, 10);
    h.store.set_event_log_unavailable(true);

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Failed);
    assert!(request.message.unwrap().contains("event log unavailable"));
    assert_eq!(h.store.quantity(reward.id), Some(10));
}

#[tokio::test]
async fn slow_event_log_times_out_as_a_failure() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::DailyLogin, ApprovalMode::Auto, 10);
    h.store
        .set_event_log_delay(Some(std::time::Duration::from_secs(3)));

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert!(request.message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn owners_read_and_annotate_their_requests() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Manual, 10);
    let user = UserId::new();

    let request = h
        .processor
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();

    let err = h
        .processor
        .get_request_status(request.id, UserId::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let noted = h
        .processor
        .add_note(request.id, "escalated", ActorId::system())
        .await
        .unwrap();
    assert_eq!(noted.notes.len(), 1);

    let listed = h.processor.list_requests(user).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].notes[0].text, "escalated");
}

#[tokio::test]
async fn deferred_mode_without_dispatcher_runs_inline() {
    let h = Harness::with_settings(ProcessorSettings {
        mode: ProcessingMode::Deferred,
        evaluate_conditions: false,
        ..ProcessorSettings::default()
    });
    let (event, _) = h.seed(EventType::QuestComplete, ApprovalMode::Auto, 10);

    let request = h
        .processor
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Completed);
}

#[tokio::test]
async fn check_condition_reports_the_current_outcome() {
    let h = Harness::new();
    let (event, _) = h.seed(EventType::ProfileComplete, ApprovalMode::Auto, 10);
    let user = UserId::new();

    assert!(!h.processor.check_condition(user, event.id).await.unwrap());

    h.store.seed_log([fixtures::log_entry(
        user,
        EventType::ProfileComplete,
        json!({ "completedFields": ["avatar", "nickname"] }),
        h.clock.now(),
    )]);
    assert!(h.processor.check_condition(user, event.id).await.unwrap());
}
