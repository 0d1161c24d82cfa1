//! The action surface end to end: catalog administration, claims and reads.
//!
//! Run with: `cargo test -p rewards --test actions`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration as ChronoDuration;
use common::start_app;
use rewardflow_core::RewardError;
use rewardflow_core::environment::Clock;
use rewardflow_core::types::{EventLogEntry, EventType, RewardRequest, UserId};
use rewards::actions::names;
use rewards::processor::ProcessingMode;
use serde_json::{Value, json};
use std::time::Duration;

#[tokio::test]
async fn operator_creates_an_event_and_a_user_claims_it() {
    let (app, store, clock) = start_app(ProcessingMode::Inline);
    let router = app.router();
    let operator = UserId::new();
    let user = UserId::new();

    let event = router
        .handle(
            names::CREATE_EVENT,
            json!({
                "name": "Tutorial",
                "eventType": "QUEST_COMPLETE",
                "condition": { "questId": "tutorial" },
                "startDate": clock.now() - ChronoDuration::days(1),
                "endDate": clock.now() + ChronoDuration::days(7),
                "approvalMode": "AUTO",
                "creatorId": operator,
            }),
        )
        .await
        .unwrap();
    assert_eq!(event["status"], json!("ACTIVE"));

    let reward = router
        .handle(
            names::CREATE_REWARD,
            json!({
                "eventId": event["id"],
                "name": "Starter pack",
                "rewardType": "ITEM",
                "value": 1,
                "quantity": 2,
                "creatorId": operator,
            }),
        )
        .await
        .unwrap();

    let checked = router
        .handle(
            names::CHECK_CONDITION,
            json!({ "userId": user, "eventId": event["id"] }),
        )
        .await
        .unwrap();
    assert_eq!(checked, Value::Bool(false));

    store.seed_log([EventLogEntry::new(
        user,
        EventType::QuestComplete,
        json!({ "questId": "tutorial" }),
        clock.now(),
    )]);

    let request: RewardRequest = serde_json::from_value(
        router
            .handle(
                names::REQUEST,
                json!({ "userId": user, "eventId": event["id"], "idempotencyKey": "tutorial-claim-0001" }),
            )
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(request.status.as_str(), "COMPLETED");
    assert_eq!(json!(request.reward_id), reward["id"]);

    let status = router
        .handle(
            names::GET_REQUEST_STATUS,
            json!({ "requestId": request.id, "userId": user }),
        )
        .await
        .unwrap();
    assert_eq!(status["idempotencyKey"], json!("tutorial-claim-0001"));

    let listed = router
        .handle(names::LIST_REQUESTS, json!({ "userId": user }))
        .await
        .unwrap();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn admin_actions_update_stock_and_event_status() {
    let (app, store, clock) = start_app(ProcessingMode::Inline);
    let router = app.router();
    let event = rewardflow_testing::fixtures::event(
        EventType::LevelUp,
        rewardflow_core::types::ApprovalMode::Manual,
        clock.now(),
    );
    let reward = rewardflow_testing::fixtures::reward(event.id, 5, clock.now());
    store.seed_event(event.clone());
    store.seed_reward(reward.clone());

    let updated = router
        .handle(
            names::UPDATE_REWARD_QUANTITY,
            json!({ "rewardId": reward.id, "quantity": -1 }),
        )
        .await
        .unwrap();
    assert_eq!(updated["quantity"], json!(-1));
    assert_eq!(store.quantity(reward.id), Some(-1));

    let err = router
        .handle(
            names::UPDATE_REWARD_QUANTITY,
            json!({ "rewardId": reward.id, "quantity": -7 }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RewardError::Validation(_)));

    let deactivated = router
        .handle(
            names::UPDATE_EVENT_STATUS,
            json!({ "eventId": event.id, "status": "INACTIVE" }),
        )
        .await
        .unwrap();
    assert_eq!(deactivated["status"], json!("INACTIVE"));

    let rejected = router
        .handle(
            names::REQUEST,
            json!({ "userId": UserId::new(), "eventId": event.id }),
        )
        .await
        .unwrap();
    assert_eq!(rejected["status"], json!("REJECTED"));

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn admin_rejection_through_the_router() {
    let (app, store, clock) = start_app(ProcessingMode::Inline);
    let router = app.router();
    let event = rewardflow_testing::fixtures::event(
        EventType::LevelUp,
        rewardflow_core::types::ApprovalMode::Manual,
        clock.now(),
    );
    store.seed_event(event.clone());
    store.seed_reward(rewardflow_testing::fixtures::reward(event.id, 5, clock.now()));
    let user = UserId::new();
    store.seed_log([EventLogEntry::new(
        user,
        EventType::LevelUp,
        json!({ "newLevel": 11 }),
        clock.now(),
    )]);

    let pending = router
        .handle(names::REQUEST, json!({ "userId": user, "eventId": event.id }))
        .await
        .unwrap();
    assert_eq!(pending["status"], json!("PENDING"));

    let rejected = router
        .handle(
            names::ADMIN_UPDATE_REQUEST_STATUS,
            json!({
                "requestId": pending["id"],
                "status": "REJECTED",
                "message": "duplicate account",
                "adminId": UserId::new(),
            }),
        )
        .await
        .unwrap();
    assert_eq!(rejected["status"], json!("REJECTED"));
    assert_eq!(rejected["message"], json!("duplicate account"));

    let err = router
        .handle(
            names::CLAIM,
            json!({ "requestId": pending["id"], "userId": user }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn user_action_returns_a_run_id() {
    let (app, store, _) = start_app(ProcessingMode::Inline);

    let queued = app
        .router()
        .handle(
            names::USER_ACTION,
            json!({ "userId": UserId::new(), "eventType": "LEVEL_UP", "data": { "newLevel": 2 } }),
        )
        .await
        .unwrap();
    assert!(queued["runId"].is_string());

    app.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(store.log_len(), 1);
}

#[tokio::test]
async fn malformed_and_unknown_actions_are_validation_errors() {
    let (app, store, _) = start_app(ProcessingMode::Inline);
    let router = app.router();

    let err = router
        .handle("reward.teleport", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = router
        .handle(names::REQUEST, json!({ "userId": "nope", "eventId": 7 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = router
        .handle(
            names::REQUEST,
            json!({ "userId": UserId::new(), "eventId": UserId::new(), "idempotencyKey": "" }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(store.request_count(), 0);

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}
