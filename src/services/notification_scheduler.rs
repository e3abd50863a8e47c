use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::auth::AuthService;
use crate::models::{AppointmentDetails, DispatchSummary, NewNotification, NotificationKind};
use crate::services::channels::ChannelDispatcher;
use crate::services::{BookingService, NotificationService};

/// Pending notifications delivered per dispatch run.
pub const DISPATCH_BATCH_SIZE: i64 = 100;

// Six-field cron expressions (seconds first).
const DISPATCH_SCHEDULE: &str = "0 * * * * *";
const REMINDER_SCHEDULE: &str = "0 */5 * * * *";
const MAINTENANCE_SCHEDULE: &str = "0 0 * * * *";

/// Claims older than this are assumed abandoned and made PENDING again.
const STALE_CLAIM_MINUTES: i64 = 15;

/// Which reminder, if any, an appointment starting at `start` is due for.
pub fn reminder_due(now: DateTime<Utc>, start: DateTime<Utc>) -> Option<NotificationKind> {
    let delta = start - now;
    if delta <= Duration::zero() {
        None
    } else if delta <= Duration::hours(1) {
        Some(NotificationKind::Reminder1h)
    } else if delta <= Duration::hours(24) {
        Some(NotificationKind::Reminder24h)
    } else {
        None
    }
}

/// Unique per appointment and reminder kind, so overlapping scans enqueue once.
pub fn reminder_dedup_key(appointment_id: Uuid, kind: NotificationKind) -> String {
    format!("{}:{}", appointment_id, kind.as_str())
}

fn reminder_notification(appointment: &AppointmentDetails, kind: NotificationKind) -> NewNotification {
    let at = appointment.start_time.format("%Y-%m-%d %H:%M UTC");
    let (title, message) = match kind {
        NotificationKind::Reminder1h => (
            "Your session starts in one hour",
            format!("{} with {} starts at {}.", appointment.service_name, appointment.trainer_name, at),
        ),
        _ => (
            "Upcoming session tomorrow",
            format!("Reminder: {} with {} on {}.", appointment.service_name, appointment.trainer_name, at),
        ),
    };

    NewNotification::now(appointment.client_id, kind, title, message)
        .for_appointment(appointment.id)
        .with_dedup_key(reminder_dedup_key(appointment.id, kind))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceSummary {
    pub completed: u64,
    pub expired_unpaid: u64,
    pub purged_tokens: u64,
    pub released_claims: u64,
}

/// Bodies of the periodic jobs, shared by the in-process scheduler and the cron endpoints.
#[derive(Debug, Clone)]
pub struct SchedulerJobs {
    notifications: NotificationService,
    bookings: BookingService,
    auth: AuthService,
    dispatcher: ChannelDispatcher,
    dispatch_lock: Arc<Mutex<()>>,
}

impl SchedulerJobs {
    pub fn new(
        notifications: NotificationService,
        bookings: BookingService,
        auth: AuthService,
        dispatcher: ChannelDispatcher,
    ) -> Self {
        Self {
            notifications,
            bookings,
            auth,
            dispatcher,
            dispatch_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Deliver due notifications. A run that overlaps another one in this process is skipped;
    /// other processes are kept apart by the row claim in [`NotificationService::claim_due`].
    pub async fn run_dispatch(&self) -> Result<DispatchSummary> {
        let Ok(_guard) = self.dispatch_lock.try_lock() else {
            tracing::debug!("Dispatch already running, skipping");
            return Ok(DispatchSummary::default());
        };

        let summary = self
            .notifications
            .dispatch_pending(&self.dispatcher, DISPATCH_BATCH_SIZE)
            .await?;

        if summary.processed > 0 {
            tracing::info!(
                "Dispatched {} notifications ({} sent, {} failed)",
                summary.processed,
                summary.sent,
                summary.failed
            );
        }
        Ok(summary)
    }

    /// Enqueue reminders for confirmed appointments within the next 24 hours.
    pub async fn run_reminders(&self) -> Result<usize> {
        let now = Utc::now();
        let upcoming = self.bookings.upcoming_confirmed(Duration::hours(24)).await?;
        let mut enqueued = 0;

        for appointment in &upcoming {
            let Some(kind) = reminder_due(now, appointment.start_time) else {
                continue;
            };
            if self
                .notifications
                .enqueue(reminder_notification(appointment, kind))
                .await?
                .is_some()
            {
                enqueued += 1;
            }
        }

        if enqueued > 0 {
            tracing::info!("Enqueued {} appointment reminders", enqueued);
        }
        Ok(enqueued)
    }

    pub async fn run_maintenance(&self) -> Result<MaintenanceSummary> {
        let summary = MaintenanceSummary {
            completed: self.bookings.complete_elapsed().await?,
            expired_unpaid: self.bookings.expire_unpaid().await?,
            purged_tokens: self.auth.purge_expired_tokens().await?,
            released_claims: self
                .notifications
                .release_stale_claims(Duration::minutes(STALE_CLAIM_MINUTES))
                .await?,
        };

        tracing::info!(
            "Maintenance: {} completed, {} unpaid cancelled, {} tokens purged, {} stale claims released",
            summary.completed,
            summary.expired_unpaid,
            summary.purged_tokens,
            summary.released_claims
        );
        Ok(summary)
    }
}

/// In-process cron running dispatch (1 min), reminders (5 min) and maintenance (hourly).
pub struct NotificationScheduler {
    scheduler: Mutex<JobScheduler>,
}

impl NotificationScheduler {
    pub async fn start(jobs: SchedulerJobs) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        let dispatch = jobs.clone();
        scheduler
            .add(Job::new_async(DISPATCH_SCHEDULE, move |_id, _scheduler| {
                let jobs = dispatch.clone();
                Box::pin(async move {
                    if let Err(e) = jobs.run_dispatch().await {
                        tracing::error!("Notification dispatch failed: {:#}", e);
                    }
                })
            })?)
            .await?;

        let reminders = jobs.clone();
        scheduler
            .add(Job::new_async(REMINDER_SCHEDULE, move |_id, _scheduler| {
                let jobs = reminders.clone();
                Box::pin(async move {
                    if let Err(e) = jobs.run_reminders().await {
                        tracing::error!("Reminder scan failed: {:#}", e);
                    }
                })
            })?)
            .await?;

        let maintenance = jobs;
        scheduler
            .add(Job::new_async(MAINTENANCE_SCHEDULE, move |_id, _scheduler| {
                let jobs = maintenance.clone();
                Box::pin(async move {
                    if let Err(e) = jobs.run_maintenance().await {
                        tracing::error!("Maintenance run failed: {:#}", e);
                    }
                })
            })?)
            .await?;

        scheduler.start().await?;
        tracing::info!("Notification scheduler started");

        Ok(Self {
            scheduler: Mutex::new(scheduler),
        })
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.scheduler.lock().await.shutdown().await {
            tracing::warn!("Scheduler shutdown failed: {}", e);
        }
    }
}
