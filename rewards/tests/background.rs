//! Workflows running on a live dispatcher over the in-memory store.
//!
//! Run with: `cargo test -p rewards --test background`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{eventually, start_app, start_app_with_pool};
use rewardflow_core::environment::Clock;
use rewardflow_core::types::{ApprovalMode, EventType, RequestStatus, UserId};
use rewardflow_testing::fixtures;
use rewards::processor::{ClaimRequest, ProcessingMode};
use rewards::workflows::{RewardProcessWorkflow, UserActionEvent};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn deferred_request_is_completed_in_the_background() {
    let (app, store, clock) = start_app(ProcessingMode::Deferred);
    let event = fixtures::event(EventType::QuestComplete, ApprovalMode::Auto, clock.now());
    let reward = fixtures::reward(event.id, 5, clock.now());
    store.seed_event(event.clone());
    store.seed_reward(reward.clone());
    let user = UserId::new();
    store.seed_log([fixtures::log_entry(
        user,
        EventType::QuestComplete,
        json!({ "questId": "tutorial" }),
        clock.now(),
    )]);

    let queued = app
        .processor()
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(queued.status, RequestStatus::Pending);
    assert_eq!(queued.reward_id, Some(reward.id));

    let processor = app.processor().clone();
    assert!(
        eventually(|| {
            let processor = processor.clone();
            async move {
                processor.find_request(queued.id).await.unwrap().status
                    == RequestStatus::Completed
            }
        })
        .await
    );
    assert_eq!(store.quantity(reward.id), Some(4));

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn deferred_manual_request_waits_for_an_admin() {
    let (app, store, clock) = start_app(ProcessingMode::Deferred);
    let event = fixtures::event(EventType::LevelUp, ApprovalMode::Manual, clock.now());
    let reward = fixtures::reward(event.id, 5, clock.now());
    store.seed_event(event.clone());
    store.seed_reward(reward.clone());
    let user = UserId::new();
    store.seed_log([fixtures::log_entry(
        user,
        EventType::LevelUp,
        json!({ "newLevel": 10 }),
        clock.now(),
    )]);

    let queued = app
        .processor()
        .process_reward_request(user, event.id, ClaimRequest::default())
        .await
        .unwrap();

    // Wait for the queued run to finish before inspecting the request.
    let run = app
        .handle()
        .dispatch(rewardflow_runtime::WorkflowEvent::with_id(
            *queued.id.as_uuid(),
            rewards::processor::REWARD_QUEUED,
            json!({ "requestId": queued.id }),
        ))
        .await
        .unwrap();
    let outcomes = run.wait().await;
    assert_eq!(outcomes[0].workflow_id, RewardProcessWorkflow::ID);
    assert!(outcomes[0].result.is_ok());

    let stored = app.processor().find_request(queued.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(store.quantity(reward.id), Some(5));

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn exhausted_background_run_fails_the_request() {
    let (app, store, clock) = start_app(ProcessingMode::Deferred);
    let event = fixtures::event(EventType::DailyLogin, ApprovalMode::Auto, clock.now());
    let reward = fixtures::reward(event.id, 5, clock.now());
    store.seed_event(event.clone());
    store.seed_reward(reward.clone());
    store.set_event_log_unavailable(true);

    let queued = app
        .processor()
        .process_reward_request(UserId::new(), event.id, ClaimRequest::default())
        .await
        .unwrap();
    assert_eq!(queued.status, RequestStatus::Pending);

    let processor = app.processor().clone();
    assert!(
        eventually(|| {
            let processor = processor.clone();
            async move {
                processor.find_request(queued.id).await.unwrap().status == RequestStatus::Failed
            }
        })
        .await
    );

    let failed = app.processor().find_request(queued.id).await.unwrap();
    assert!(failed.message.unwrap().contains("event log unavailable"));
    assert_eq!(app.dispatcher().dead_letters().len(), 1);
    assert_eq!(store.quantity(reward.id), Some(5));

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn user_action_unlocks_a_reward_once() {
    let (app, store, clock) = start_app(ProcessingMode::Inline);
    let event = fixtures::event(EventType::DailyLogin, ApprovalMode::Auto, clock.now());
    let reward = fixtures::reward(event.id, 5, clock.now());
    store.seed_event(event.clone());
    store.seed_reward(reward.clone());
    let user = UserId::new();
    store.seed_log(fixtures::logins(user, clock.now(), &[-2, -1]));

    let action = UserActionEvent {
        user_id: user,
        event_type: EventType::DailyLogin,
        data: json!({}),
        occurred_at: Some(clock.now()),
    }
    .into_workflow_event();

    let outcomes = app
        .handle()
        .dispatch(action.clone())
        .await
        .unwrap()
        .wait()
        .await;
    let output = outcomes[0].result.clone().unwrap();
    assert_eq!(output["evaluated"], json!(1));
    assert_eq!(output["requests"][0]["status"], json!("COMPLETED"));
    assert_eq!(store.log_len(), 3);

    // Redelivery replays the journal: no second log entry, no second grant.
    let replayed = app.handle().dispatch(action).await.unwrap().wait().await;
    assert!(replayed[0].result.is_ok());
    assert_eq!(store.log_len(), 3);
    assert_eq!(store.request_count(), 1);
    assert_eq!(store.quantity(reward.id), Some(4));

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn user_action_without_a_satisfied_event_only_logs() {
    let (app, store, clock) = start_app(ProcessingMode::Inline);
    let event = fixtures::event(EventType::DailyLogin, ApprovalMode::Auto, clock.now());
    store.seed_event(event);
    let user = UserId::new();

    let outcomes = app
        .handle()
        .dispatch(
            UserActionEvent {
                user_id: user,
                event_type: EventType::DailyLogin,
                data: json!({}),
                occurred_at: None,
            }
            .into_workflow_event(),
        )
        .await
        .unwrap()
        .wait()
        .await;

    let output = outcomes[0].result.clone().unwrap();
    assert_eq!(output["requests"], json!([]));
    assert_eq!(store.log_len(), 1);
    assert_eq!(store.request_count(), 0);
    assert!(app.health().status.is_healthy());

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

fn quest_action(user: UserId) -> rewardflow_runtime::WorkflowEvent {
    UserActionEvent {
        user_id: user,
        event_type: EventType::QuestComplete,
        data: json!({ "questId": "tutorial" }),
        occurred_at: None,
    }
    .into_workflow_event()
}

#[tokio::test]
async fn deferred_user_actions_finish_when_the_queue_is_full() {
    let (app, store, clock) = start_app_with_pool(ProcessingMode::Deferred, 1, 1);
    let event = fixtures::event(EventType::QuestComplete, ApprovalMode::Auto, clock.now());
    let reward = fixtures::reward(event.id, 5, clock.now());
    store.seed_event(event.clone());
    store.seed_reward(reward.clone());
    store.set_event_log_delay(Some(Duration::from_millis(200)));

    let first_user = UserId::new();
    let second_user = UserId::new();
    let first = app.handle().dispatch(quest_action(first_user)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Takes the only queue slot while the single worker is busy with the first run.
    let second = app.handle().dispatch(quest_action(second_user)).await.unwrap();

    let outcomes = tokio::time::timeout(Duration::from_secs(5), first.wait())
        .await
        .expect("first run finishes");
    assert!(outcomes[0].result.is_ok());
    let outcomes = tokio::time::timeout(Duration::from_secs(5), second.wait())
        .await
        .expect("second run finishes");
    assert!(outcomes[0].result.is_ok());

    let processor = app.processor().clone();
    assert!(
        eventually(|| {
            let processor = processor.clone();
            async move {
                let mut completed = 0;
                for user in [first_user, second_user] {
                    let requests = processor.list_requests(user).await.unwrap();
                    completed += requests
                        .iter()
                        .filter(|r| r.status == RequestStatus::Completed)
                        .count();
                }
                completed == 2
            }
        })
        .await
    );
    assert_eq!(store.request_count(), 2);
    assert_eq!(store.quantity(reward.id), Some(3));

    store.set_event_log_delay(None);
    app.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn concurrent_user_actions_request_a_reward_once() {
    let (app, store, clock) = start_app(ProcessingMode::Inline);
    let event = fixtures::event(EventType::QuestComplete, ApprovalMode::Auto, clock.now());
    let reward = fixtures::reward(event.id, 5, clock.now());
    store.seed_event(event.clone());
    store.seed_reward(reward.clone());
    let user = UserId::new();

    let handle = app.handle();
    let (a, b) = futures::join!(
        handle.dispatch(quest_action(user)),
        handle.dispatch(quest_action(user)),
    );
    let (a, b) = futures::join!(a.unwrap().wait(), b.unwrap().wait());
    assert!(a[0].result.is_ok());
    assert!(b[0].result.is_ok());

    assert_eq!(store.log_len(), 2);
    assert_eq!(store.request_count(), 1);
    assert_eq!(store.quantity(reward.id), Some(4));
    let requests = app.processor().list_requests(user).await.unwrap();
    assert_eq!(requests[0].status, RequestStatus::Completed);

    app.shutdown(Duration::from_secs(1)).await.unwrap();
}
