// Periodic jobs against a real Postgres (TEST_DATABASE_URL). Dispatch tests share the
// notification queue, so they run one at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serial_test::serial;
use sqlx::PgPool;
use uuid::Uuid;

use fitness_scheduler::api::AppState;
use fitness_scheduler::auth::UserRole;
use fitness_scheduler::models::{AppointmentStatus, DeliveryChannel, NewNotification, NotificationKind, NotificationStatus};
use fitness_scheduler::services::channels::{ChannelDispatcher, ChannelError, NotificationChannel, OutboundMessage, Recipient};
use fitness_scheduler::services::SchedulerJobs;

use crate::common::{app_with, insert_appointment, register_user, test_config, test_database};

/// Email stand-in that counts sends per message title and rejects listed users.
#[derive(Default)]
struct CountingEmail {
    rejected: Vec<Uuid>,
    sends: Mutex<HashMap<String, usize>>,
}

impl CountingEmail {
    fn sends_of(&self, title: &str) -> usize {
        self.sends.lock().unwrap().get(title).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NotificationChannel for CountingEmail {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Email
    }

    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<(), ChannelError> {
        if self.rejected.contains(&recipient.user_id) {
            return Err(ChannelError::Provider {
                status: 550,
                body: "mailbox unavailable".to_string(),
            });
        }
        *self.sends.lock().unwrap().entry(message.title.clone()).or_default() += 1;
        Ok(())
    }
}

fn jobs_with(state: &AppState, channel: Arc<CountingEmail>) -> SchedulerJobs {
    SchedulerJobs::new(
        state.notifications.clone(),
        state.bookings.clone(),
        state.auth.clone(),
        ChannelDispatcher::new().with_channel(channel),
    )
}

async fn enqueue(state: &AppState, user_id: Uuid, title: &str) -> Uuid {
    state
        .notifications
        .enqueue(NewNotification::now(
            user_id,
            NotificationKind::BookingConfirmed,
            title,
            "Your session is confirmed.",
        ))
        .await
        .unwrap()
        .expect("fresh notification")
        .id
}

async fn status_of(db: &PgPool, notification_id: Uuid) -> NotificationStatus {
    sqlx::query_scalar("SELECT status FROM notifications WHERE id = $1")
        .bind(notification_id)
        .fetch_one(db)
        .await
        .unwrap()
}

async fn undelivered_for(db: &PgPool, user_ids: &[Uuid]) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ANY($1) AND status IN ('PENDING', 'SENDING')",
    )
    .bind(user_ids)
    .fetch_one(db)
    .await
    .unwrap()
}

#[tokio::test]
#[serial(dispatch)]
async fn test_dispatch_records_sent_and_failed() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (reachable, _) = register_user(&state.auth, UserRole::Client).await;
    let (unreachable, _) = register_user(&state.auth, UserRole::Client).await;

    let channel = Arc::new(CountingEmail {
        rejected: vec![unreachable],
        ..Default::default()
    });
    let jobs = jobs_with(&state, channel.clone());

    let sent_title = format!("Confirmed {}", Uuid::new_v4());
    let sent_id = enqueue(&state, reachable, &sent_title).await;
    let failed_id = enqueue(&state, unreachable, "Confirmed elsewhere").await;

    for _ in 0..50 {
        if undelivered_for(&db, &[reachable, unreachable]).await == 0 {
            break;
        }
        jobs.run_dispatch().await.unwrap();
    }

    assert_eq!(status_of(&db, sent_id).await, NotificationStatus::Sent);
    assert_eq!(status_of(&db, failed_id).await, NotificationStatus::Failed);
    assert_eq!(channel.sends_of(&sent_title), 1);

    let sent_at: Option<chrono::DateTime<Utc>> = sqlx::query_scalar("SELECT sent_at FROM notifications WHERE id = $1")
        .bind(sent_id)
        .fetch_one(&db)
        .await
        .unwrap();
    assert!(sent_at.is_some());

    let log: Vec<(Uuid, String, bool, Option<String>)> = sqlx::query_as(
        "SELECT notification_id, channel, success, error FROM notification_log
         WHERE notification_id = ANY($1) ORDER BY success DESC",
    )
    .bind([sent_id, failed_id].as_slice())
    .fetch_all(&db)
    .await
    .unwrap();

    assert_eq!(log.len(), 2);
    assert_eq!(log[0], (sent_id, "email".to_string(), true, None));
    assert_eq!(log[1].0, failed_id);
    assert!(!log[1].2);
    assert!(log[1].3.as_deref().is_some_and(|e| e.contains("550")));
}

#[tokio::test]
#[serial(dispatch)]
async fn test_parallel_dispatchers_deliver_each_notification_once() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (user_id, _) = register_user(&state.auth, UserRole::Client).await;

    let channel = Arc::new(CountingEmail::default());
    // Separate instances, like two processes sharing one database.
    let first = jobs_with(&state, channel.clone());
    let second = jobs_with(&state, channel.clone());

    let batch = Uuid::new_v4();
    let titles: Vec<String> = (0..40).map(|i| format!("Batch {} #{}", batch, i)).collect();
    for title in &titles {
        enqueue(&state, user_id, title).await;
    }

    for _ in 0..50 {
        if undelivered_for(&db, &[user_id]).await == 0 {
            break;
        }
        let (a, b) = tokio::join!(first.run_dispatch(), second.run_dispatch());
        a.unwrap();
        b.unwrap();
    }

    for title in &titles {
        assert_eq!(channel.sends_of(title), 1, "{}", title);
    }
}

#[tokio::test]
#[serial(dispatch)]
async fn test_maintenance_releases_abandoned_claims() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (user_id, _) = register_user(&state.auth, UserRole::Client).await;

    let stuck = enqueue(&state, user_id, "Stuck in flight").await;
    let fresh = enqueue(&state, user_id, "Just claimed").await;
    sqlx::query(
        "UPDATE notifications SET status = 'SENDING',
             claimed_at = CASE WHEN id = $1 THEN NOW() - INTERVAL '1 hour' ELSE NOW() END
         WHERE id = ANY($2)",
    )
    .bind(stuck)
    .bind([stuck, fresh].as_slice())
    .execute(&db)
    .await
    .unwrap();

    let summary = state.jobs.run_maintenance().await.unwrap();
    assert!(summary.released_claims >= 1);
    assert_eq!(status_of(&db, stuck).await, NotificationStatus::Pending);
    assert_eq!(status_of(&db, fresh).await, NotificationStatus::Sending);
}

#[tokio::test]
async fn test_reminder_scan_enqueues_once_per_appointment() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (trainer_id, _) = register_user(&state.auth, UserRole::Trainer).await;
    let (client_id, _) = register_user(&state.auth, UserRole::Client).await;

    let appointment_id = insert_appointment(
        &db,
        trainer_id,
        client_id,
        Utc::now() + Duration::hours(3),
        AppointmentStatus::Confirmed,
        0,
    )
    .await;

    state.jobs.run_reminders().await.unwrap();
    state.jobs.run_reminders().await.unwrap();

    let reminders: Vec<NotificationKind> = sqlx::query_scalar(
        "SELECT kind FROM notifications WHERE appointment_id = $1 AND user_id = $2",
    )
    .bind(appointment_id)
    .bind(client_id)
    .fetch_all(&db)
    .await
    .unwrap();
    assert_eq!(reminders, vec![NotificationKind::Reminder24h]);
}

#[tokio::test]
async fn test_maintenance_completes_and_expires_appointments() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (trainer_id, _) = register_user(&state.auth, UserRole::Trainer).await;
    let (client_id, _) = register_user(&state.auth, UserRole::Client).await;
    let now = Utc::now();

    let finished =
        insert_appointment(&db, trainer_id, client_id, now - Duration::hours(3), AppointmentStatus::Confirmed, 0).await;
    let unpaid =
        insert_appointment(&db, trainer_id, client_id, now - Duration::minutes(10), AppointmentStatus::Pending, 4500)
            .await;
    let upcoming =
        insert_appointment(&db, trainer_id, client_id, now + Duration::days(2), AppointmentStatus::Pending, 4500).await;

    assert!(state.bookings.complete_elapsed().await.unwrap() >= 1);
    assert!(state.bookings.expire_unpaid().await.unwrap() >= 1);

    let status = |id: Uuid| {
        let db = db.clone();
        async move {
            sqlx::query_scalar::<_, AppointmentStatus>("SELECT status FROM appointments WHERE id = $1")
                .bind(id)
                .fetch_one(&db)
                .await
                .unwrap()
        }
    };
    assert_eq!(status(finished).await, AppointmentStatus::Completed);
    assert_eq!(status(unpaid).await, AppointmentStatus::Cancelled);
    assert_eq!(status(upcoming).await, AppointmentStatus::Pending);
}
