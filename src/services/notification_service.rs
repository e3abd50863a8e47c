use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::models::{
    DispatchSummary, NewNotification, Notification, NotificationPreferences, NotificationQuery,
    NotificationStatus, NotificationsListResponse, PushSubscription, RegisterPushSubscriptionRequest,
    UpdateNotificationPreferences, User,
};
use crate::services::channels::{delivery_succeeded, ChannelDispatcher, DeliveryAttempt, OutboundMessage, Recipient};

const NOTIFICATION_COLUMNS: &str = "id, user_id, appointment_id, kind, title, message, status, dedup_key, \
     scheduled_at, sent_at, read_at, created_at";

/// Insert a notification on any executor (pool or open transaction).
/// Returns `None` when a row with the same dedup key already exists.
pub async fn insert_notification<'e, E>(executor: E, notification: &NewNotification) -> sqlx::Result<Option<Notification>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Notification>(&format!(
        "INSERT INTO notifications (id, user_id, appointment_id, kind, title, message, dedup_key, scheduled_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (dedup_key) DO NOTHING
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(notification.user_id)
    .bind(notification.appointment_id)
    .bind(notification.kind)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(&notification.dedup_key)
    .bind(notification.scheduled_at)
    .fetch_optional(executor)
    .await
}

#[derive(Debug, Clone)]
pub struct NotificationService {
    db: PgPool,
}

impl NotificationService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn enqueue(&self, notification: NewNotification) -> sqlx::Result<Option<Notification>> {
        let inserted = insert_notification(&self.db, &notification).await?;
        if inserted.is_none() {
            tracing::debug!(
                "Skipped duplicate {} notification for user {}",
                notification.kind.as_str(),
                notification.user_id
            );
        }
        Ok(inserted)
    }

    pub async fn list_for_user(&self, user_id: Uuid, query: NotificationQuery) -> sqlx::Result<NotificationsListResponse> {
        let limit = query.limit.unwrap_or(50).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);
        let unread_only = query.unread_only.unwrap_or(false);

        let notifications = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = $1 AND scheduled_at <= NOW() AND (NOT $2 OR read_at IS NULL)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        let unread_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL AND scheduled_at <= NOW()",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(NotificationsListResponse {
            notifications,
            unread_count,
        })
    }

    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = COALESCE(read_at, NOW()) WHERE id = $1 AND user_id = $2",
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> sqlx::Result<u64> {
        let result = sqlx::query("UPDATE notifications SET read_at = NOW() WHERE user_id = $1 AND read_at IS NULL")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_preferences(&self, user_id: Uuid) -> sqlx::Result<Option<NotificationPreferences>> {
        let prefs = sqlx::query_as::<_, (bool, bool, bool, bool)>(
            "SELECT email_notifications, sms_notifications, whatsapp_notifications, push_notifications
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(prefs.map(|(email, sms, whatsapp, push)| NotificationPreferences { email, sms, whatsapp, push }))
    }

    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        update: UpdateNotificationPreferences,
    ) -> sqlx::Result<Option<NotificationPreferences>> {
        let Some(current) = self.get_preferences(user_id).await? else {
            return Ok(None);
        };
        let prefs = current.apply(&update);

        sqlx::query(
            "UPDATE users
             SET email_notifications = $2, sms_notifications = $3,
                 whatsapp_notifications = $4, push_notifications = $5, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(prefs.email)
        .bind(prefs.sms)
        .bind(prefs.whatsapp)
        .bind(prefs.push)
        .execute(&self.db)
        .await?;

        Ok(Some(prefs))
    }

    /// Register a browser push endpoint. Re-registering an endpoint moves it to this user.
    pub async fn register_push_subscription(
        &self,
        user_id: Uuid,
        request: RegisterPushSubscriptionRequest,
    ) -> sqlx::Result<PushSubscription> {
        sqlx::query_as::<_, PushSubscription>(
            "INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (endpoint) DO UPDATE
             SET user_id = EXCLUDED.user_id, p256dh = EXCLUDED.p256dh, auth = EXCLUDED.auth
             RETURNING id, user_id, endpoint, p256dh, auth, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&request.endpoint)
        .bind(&request.keys.p256dh)
        .bind(&request.keys.auth)
        .fetch_one(&self.db)
        .await
    }

    pub async fn remove_push_subscription(&self, user_id: Uuid, endpoint: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1 AND endpoint = $2")
            .bind(user_id)
            .bind(endpoint)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim up to `limit` due notifications, oldest first, by moving them to SENDING.
    /// Rows locked by a concurrent claimer are skipped, so each row goes to one dispatcher.
    pub async fn claim_due(&self, limit: i64) -> sqlx::Result<Vec<Notification>> {
        let mut claimed = sqlx::query_as::<_, Notification>(&format!(
            "UPDATE notifications SET status = 'SENDING', claimed_at = NOW()
             WHERE id IN (
                 SELECT id FROM notifications
                 WHERE status = 'PENDING' AND scheduled_at <= NOW()
                 ORDER BY scheduled_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        claimed.sort_by_key(|notification| notification.scheduled_at);
        Ok(claimed)
    }

    /// Return claims abandoned by a crashed dispatcher to PENDING.
    pub async fn release_stale_claims(&self, older_than: chrono::Duration) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET status = 'PENDING', claimed_at = NULL
             WHERE status = 'SENDING' AND claimed_at < NOW() - make_interval(secs => $1)",
        )
        .bind(older_than.num_seconds() as f64)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn recipient(&self, user_id: Uuid) -> sqlx::Result<Option<Recipient>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            crate::auth::service::USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(user) = user else {
            return Ok(None);
        };

        let push_subscriptions = sqlx::query_as::<_, PushSubscription>(
            "SELECT id, user_id, endpoint, p256dh, auth, created_at FROM push_subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(Some(Recipient {
            user_id: user.id,
            preferences: user.preferences(),
            email: user.email,
            full_name: user.full_name,
            phone: user.phone,
            push_subscriptions,
        }))
    }

    /// Deliver one batch of due notifications through the configured channels.
    pub async fn dispatch_pending(&self, dispatcher: &ChannelDispatcher, batch_size: i64) -> sqlx::Result<DispatchSummary> {
        let due = self.claim_due(batch_size).await?;
        let mut summary = DispatchSummary::default();

        for notification in due {
            summary.processed += 1;

            let attempts = match self.recipient(notification.user_id).await? {
                Some(recipient) => {
                    let message = OutboundMessage {
                        kind: notification.kind,
                        title: notification.title.clone(),
                        body: notification.message.clone(),
                    };
                    dispatcher.deliver(&recipient, &message).await
                }
                None => Vec::new(),
            };

            self.record_attempts(notification.id, &attempts).await?;

            let status = if delivery_succeeded(&attempts) {
                summary.sent += 1;
                NotificationStatus::Sent
            } else {
                summary.failed += 1;
                NotificationStatus::Failed
            };
            self.set_status(notification.id, status).await?;
        }

        Ok(summary)
    }

    async fn record_attempts(&self, notification_id: Uuid, attempts: &[DeliveryAttempt]) -> sqlx::Result<()> {
        for attempt in attempts {
            sqlx::query(
                "INSERT INTO notification_log (id, notification_id, channel, success, error)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(notification_id)
            .bind(attempt.channel.as_str())
            .bind(attempt.succeeded())
            .bind(&attempt.error)
            .execute(&self.db)
            .await?;
        }
        Ok(())
    }

    async fn set_status(&self, notification_id: Uuid, status: NotificationStatus) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE notifications
             SET status = $2, sent_at = CASE WHEN $2 = 'SENT'::notification_status THEN NOW() ELSE sent_at END
             WHERE id = $1",
        )
        .bind(notification_id)
        .bind(status)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
