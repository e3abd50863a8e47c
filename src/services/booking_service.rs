use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{UserRole, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Appointment, AppointmentDetails, AppointmentQuery, AppointmentStatus, Availability, BookAppointmentRequest,
    NewNotification, NotificationKind, ServiceOffering, TimeSlot,
};
use crate::services::notification_service::insert_notification;
use crate::services::offering_service::SERVICE_COLUMNS;
use crate::services::{AvailabilityService, NotificationService, PaymentService};

/// Granularity of bookable start times inside an availability window.
pub const SLOT_STEP_MINUTES: i64 = 15;

pub(crate) const APPOINTMENT_COLUMNS: &str = "id, trainer_id, client_id, service_id, start_time, end_time, status, \
     notes, cancellation_reason, cancelled_by, price_cents, currency, created_at, updated_at";

const DETAILS_SELECT: &str = "SELECT a.id, a.trainer_id, t.full_name AS trainer_name, a.client_id, \
     c.full_name AS client_name, a.service_id, s.name AS service_name, a.start_time, a.end_time, a.status, \
     a.notes, a.cancellation_reason, a.price_cents, a.currency, a.created_at
     FROM appointments a
     JOIN users t ON t.id = a.trainer_id
     JOIN users c ON c.id = a.client_id
     JOIN services s ON s.id = a.service_id";

/// Free start times of a service on one date.
///
/// Steps through every active window for the date's weekday in
/// [`SLOT_STEP_MINUTES`] increments and keeps the slots that fit the window,
/// start after `now` and do not overlap any booked interval.
pub fn compute_available_slots(
    windows: &[Availability],
    date: NaiveDate,
    duration_minutes: i64,
    booked: &[TimeSlot],
    now: DateTime<Utc>,
) -> Vec<TimeSlot> {
    if duration_minutes <= 0 {
        return Vec::new();
    }
    let weekday = date.weekday().num_days_from_sunday() as i16;
    let duration = Duration::minutes(duration_minutes);
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    let mut slots = Vec::new();

    for window in windows.iter().filter(|w| w.is_active && w.day_of_week == weekday) {
        let window_start = date.and_time(window.start_time).and_utc();
        let window_end = date.and_time(window.end_time).and_utc();
        let mut start = window_start;

        while start + duration <= window_end {
            let end = start + duration;
            if start > now && !booked.iter().any(|b| b.overlaps(start, end)) {
                slots.push(TimeSlot {
                    start_time: start,
                    end_time: end,
                });
            }
            start += step;
        }
    }

    slots.sort_by_key(|slot| slot.start_time);
    slots.dedup();
    slots
}

/// Whether cancelling a paid appointment returns the money.
/// Trainers always refund; clients only outside the cancellation window.
pub fn refund_due(
    paid: bool,
    cancelled_by_trainer: bool,
    start_time: DateTime<Utc>,
    now: DateTime<Utc>,
    window_hours: i64,
) -> bool {
    paid && (cancelled_by_trainer || start_time - now >= Duration::hours(window_hours))
}

#[derive(Debug, Serialize)]
pub struct CancellationOutcome {
    pub appointment: Appointment,
    pub refund_issued: bool,
}

/// Booking flow and the appointment lifecycle.
#[derive(Debug, Clone)]
pub struct BookingService {
    db: PgPool,
    availability: AvailabilityService,
    notifications: NotificationService,
    payments: Option<PaymentService>,
    cancellation_window_hours: i64,
}

impl BookingService {
    pub fn new(db: PgPool, payments: Option<PaymentService>, cancellation_window_hours: i64) -> Self {
        Self {
            availability: AvailabilityService::new(db.clone()),
            notifications: NotificationService::new(db.clone()),
            db,
            payments,
            cancellation_window_hours,
        }
    }

    pub async fn list_available_slots(
        &self,
        trainer_id: Uuid,
        service_id: Uuid,
        date: NaiveDate,
    ) -> ApiResult<Vec<TimeSlot>> {
        let service = self.bookable_service(trainer_id, service_id).await?;
        self.slots_for(&service, date).await
    }

    async fn slots_for(&self, service: &ServiceOffering, date: NaiveDate) -> ApiResult<Vec<TimeSlot>> {
        let weekday = date.weekday().num_days_from_sunday() as i16;
        let windows = self.availability.windows_for_day(service.trainer_id, weekday).await?;

        let day_start = date
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .ok_or_else(|| ApiError::bad_request("Invalid date"))?;
        let booked = self
            .booked_intervals(service.trainer_id, day_start, day_start + Duration::days(1))
            .await?;

        Ok(compute_available_slots(
            &windows,
            date,
            service.duration_minutes as i64,
            &booked,
            Utc::now(),
        ))
    }

    async fn booked_intervals(
        &self,
        trainer_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ApiResult<Vec<TimeSlot>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
            "SELECT start_time, end_time FROM appointments
             WHERE trainer_id = $1 AND status <> 'CANCELLED' AND start_time < $3 AND end_time > $2",
        )
        .bind(trainer_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(start_time, end_time)| TimeSlot { start_time, end_time })
            .collect())
    }

    async fn bookable_service(&self, trainer_id: Uuid, service_id: Uuid) -> ApiResult<ServiceOffering> {
        let service = sqlx::query_as::<_, ServiceOffering>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1 AND trainer_id = $2"
        ))
        .bind(service_id)
        .bind(trainer_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ApiError::NotFound("Service"))?;

        if !service.is_active {
            return Err(ApiError::bad_request("Service is not currently offered"));
        }
        Ok(service)
    }

    /// Book a slot for the calling client.
    pub async fn book(&self, session: &UserSession, request: BookAppointmentRequest) -> ApiResult<AppointmentDetails> {
        request.validate()?;

        if request.trainer_id == session.user_id {
            return Err(ApiError::bad_request("You cannot book yourself"));
        }

        let service = self.bookable_service(request.trainer_id, request.service_id).await?;

        let accepting: bool = sqlx::query_scalar("SELECT is_accepting_clients FROM trainer_profiles WHERE user_id = $1")
            .bind(request.trainer_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ApiError::NotFound("Trainer"))?;
        if !accepting {
            return Err(ApiError::conflict("Trainer is not accepting new bookings"));
        }

        if request.start_time <= Utc::now() {
            return Err(ApiError::bad_request("Appointments must start in the future"));
        }

        let slots = self.slots_for(&service, request.start_time.date_naive()).await?;
        let slot = slots
            .into_iter()
            .find(|slot| slot.start_time == request.start_time)
            .ok_or_else(|| ApiError::conflict("Requested time is not available"))?;

        let status = if service.is_free() {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Pending
        };

        let mut tx = self.db.begin().await?;

        // Serialises bookings per trainer until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(request.trainer_id.to_string())
            .execute(&mut *tx)
            .await?;

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM appointments
                 WHERE trainer_id = $1 AND status <> 'CANCELLED' AND start_time < $3 AND end_time > $2
             )",
        )
        .bind(request.trainer_id)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .fetch_one(&mut *tx)
        .await?;
        if taken {
            return Err(ApiError::conflict("Requested time is not available"));
        }

        let appointment = sqlx::query_as::<_, Appointment>(&format!(
            "INSERT INTO appointments (id, trainer_id, client_id, service_id, start_time, end_time, status, notes, price_cents, currency)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(request.trainer_id)
        .bind(session.user_id)
        .bind(service.id)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(status)
        .bind(&request.notes)
        .bind(service.price_cents)
        .bind(&service.currency)
        .fetch_one(&mut *tx)
        .await?;

        let when = appointment.start_time.format("%Y-%m-%d %H:%M UTC");
        let client_message = if status == AppointmentStatus::Confirmed {
            format!("Your {} session on {} is confirmed.", service.name, when)
        } else {
            format!("Your {} session on {} is reserved. Complete payment to confirm it.", service.name, when)
        };

        for notification in [
            NewNotification::now(session.user_id, NotificationKind::BookingCreated, "Booking received", client_message),
            NewNotification::now(
                appointment.trainer_id,
                NotificationKind::BookingCreated,
                "New booking",
                format!("A client booked {} on {}.", service.name, when),
            ),
        ] {
            insert_notification(&mut *tx, &notification.for_appointment(appointment.id)).await?;
        }

        tx.commit().await?;

        tracing::info!(
            "Client {} booked appointment {} with trainer {} ({})",
            session.user_id,
            appointment.id,
            appointment.trainer_id,
            status.as_str()
        );

        self.get_details(appointment.id).await
    }

    pub async fn list_appointments(
        &self,
        session: &UserSession,
        query: AppointmentQuery,
    ) -> ApiResult<Vec<AppointmentDetails>> {
        let limit = query.limit.unwrap_or(50).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);

        let (trainer_filter, client_filter) = match session.role {
            UserRole::Trainer => (Some(session.user_id), None),
            UserRole::Client => (None, Some(session.user_id)),
            UserRole::Admin => (None, None),
        };

        let appointments = sqlx::query_as::<_, AppointmentDetails>(&format!(
            "{DETAILS_SELECT}
             WHERE ($1::uuid IS NULL OR a.trainer_id = $1)
               AND ($2::uuid IS NULL OR a.client_id = $2)
               AND ($3::appointment_status IS NULL OR a.status = $3)
               AND ($4::timestamptz IS NULL OR a.start_time >= $4)
               AND ($5::timestamptz IS NULL OR a.start_time < $5)
             ORDER BY a.start_time
             LIMIT $6 OFFSET $7"
        ))
        .bind(trainer_filter)
        .bind(client_filter)
        .bind(query.status)
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(appointments)
    }

    pub async fn get_details(&self, appointment_id: Uuid) -> ApiResult<AppointmentDetails> {
        sqlx::query_as::<_, AppointmentDetails>(&format!("{DETAILS_SELECT} WHERE a.id = $1"))
            .bind(appointment_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ApiError::NotFound("Appointment"))
    }

    /// An appointment the caller takes part in (admins see everything).
    pub async fn get_for_session(&self, session: &UserSession, appointment_id: Uuid) -> ApiResult<AppointmentDetails> {
        let details = self.get_details(appointment_id).await?;
        if !session.is_admin() && details.trainer_id != session.user_id && details.client_id != session.user_id {
            return Err(ApiError::NotFound("Appointment"));
        }
        Ok(details)
    }

    async fn load(&self, appointment_id: Uuid) -> ApiResult<Appointment> {
        sqlx::query_as::<_, Appointment>(&format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1"))
            .bind(appointment_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ApiError::NotFound("Appointment"))
    }

    async fn load_as_trainer(&self, session: &UserSession, appointment_id: Uuid) -> ApiResult<Appointment> {
        let appointment = self.load(appointment_id).await?;
        if appointment.trainer_id != session.user_id && !session.is_admin() {
            return Err(ApiError::NotFound("Appointment"));
        }
        Ok(appointment)
    }

    /// Move `appointment` to `next` if nobody changed it concurrently.
    async fn transition(&self, appointment: &Appointment, next: AppointmentStatus) -> ApiResult<Appointment> {
        if !appointment.status.can_transition_to(next) {
            return Err(ApiError::conflict(format!(
                "Cannot move appointment from {} to {}",
                appointment.status.as_str(),
                next.as_str()
            )));
        }

        sqlx::query_as::<_, Appointment>(&format!(
            "UPDATE appointments SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(appointment.id)
        .bind(appointment.status)
        .bind(next)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::conflict("Appointment was modified concurrently"))
    }

    pub async fn confirm(&self, session: &UserSession, appointment_id: Uuid) -> ApiResult<Appointment> {
        let appointment = self.load_as_trainer(session, appointment_id).await?;
        let updated = self.transition(&appointment, AppointmentStatus::Confirmed).await?;

        self.notifications
            .enqueue(
                NewNotification::now(
                    updated.client_id,
                    NotificationKind::BookingConfirmed,
                    "Booking confirmed",
                    format!(
                        "Your session on {} has been confirmed by your trainer.",
                        updated.start_time.format("%Y-%m-%d %H:%M UTC")
                    ),
                )
                .for_appointment(updated.id),
            )
            .await?;

        Ok(updated)
    }

    pub async fn complete(&self, session: &UserSession, appointment_id: Uuid) -> ApiResult<Appointment> {
        let appointment = self.load_as_trainer(session, appointment_id).await?;
        if appointment.start_time > Utc::now() {
            return Err(ApiError::conflict("Appointment has not started yet"));
        }
        self.transition(&appointment, AppointmentStatus::Completed).await
    }

    pub async fn mark_no_show(&self, session: &UserSession, appointment_id: Uuid) -> ApiResult<Appointment> {
        let appointment = self.load_as_trainer(session, appointment_id).await?;
        if appointment.start_time > Utc::now() {
            return Err(ApiError::conflict("Appointment has not started yet"));
        }
        self.transition(&appointment, AppointmentStatus::NoShow).await
    }

    /// Cancel as trainer, client or admin, refunding when the policy allows.
    pub async fn cancel(
        &self,
        session: &UserSession,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> ApiResult<CancellationOutcome> {
        let appointment = self.load(appointment_id).await?;
        if !appointment.involves(session.user_id) && !session.is_admin() {
            return Err(ApiError::NotFound("Appointment"));
        }
        if !appointment.status.can_transition_to(AppointmentStatus::Cancelled) {
            return Err(ApiError::conflict(format!(
                "Cannot cancel an appointment that is {}",
                appointment.status.as_str()
            )));
        }

        let cancelled = sqlx::query_as::<_, Appointment>(&format!(
            "UPDATE appointments
             SET status = 'CANCELLED', cancellation_reason = $3, cancelled_by = $4, updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(appointment.id)
        .bind(appointment.status)
        .bind(&reason)
        .bind(session.user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::conflict("Appointment was modified concurrently"))?;

        let by_trainer = session.user_id == cancelled.trainer_id || session.is_admin();
        let refund_issued = self.refund_after_cancel(&cancelled, by_trainer).await?;

        let when = cancelled.start_time.format("%Y-%m-%d %H:%M UTC");
        let mut message = format!("The session on {} was cancelled.", when);
        if let Some(reason) = reason.as_deref().filter(|r| !r.is_empty()) {
            message.push_str(&format!(" Reason: {}", reason));
        }
        if refund_issued {
            message.push_str(" A full refund has been issued.");
        }

        for user_id in [cancelled.client_id, cancelled.trainer_id] {
            self.notifications
                .enqueue(
                    NewNotification::now(user_id, NotificationKind::BookingCancelled, "Booking cancelled", message.clone())
                        .for_appointment(cancelled.id),
                )
                .await?;
        }

        tracing::info!(
            "Appointment {} cancelled by {} (refund: {})",
            cancelled.id,
            session.user_id,
            refund_issued
        );

        Ok(CancellationOutcome {
            appointment: cancelled,
            refund_issued,
        })
    }

    async fn refund_after_cancel(&self, appointment: &Appointment, by_trainer: bool) -> ApiResult<bool> {
        let Some(payments) = &self.payments else {
            return Ok(false);
        };

        let paid = payments.succeeded_payment(appointment.id).await?.is_some();
        if !refund_due(
            paid,
            by_trainer,
            appointment.start_time,
            Utc::now(),
            self.cancellation_window_hours,
        ) {
            return Ok(false);
        }

        match payments.refund_for_appointment(appointment.id).await {
            Ok(refund) => Ok(refund.is_some()),
            Err(e) => {
                // The cancellation itself stands; the refund can be retried from the payments API.
                tracing::error!("Refund for cancelled appointment {} failed: {}", appointment.id, e);
                Ok(false)
            }
        }
    }

    /// Confirmed appointments starting within `horizon`, for the reminder scan.
    pub async fn upcoming_confirmed(&self, horizon: Duration) -> ApiResult<Vec<AppointmentDetails>> {
        let now = Utc::now();
        let appointments = sqlx::query_as::<_, AppointmentDetails>(&format!(
            "{DETAILS_SELECT}
             WHERE a.status = 'CONFIRMED' AND a.start_time > $1 AND a.start_time <= $2
             ORDER BY a.start_time"
        ))
        .bind(now)
        .bind(now + horizon)
        .fetch_all(&self.db)
        .await?;

        Ok(appointments)
    }

    /// Mark confirmed appointments that have ended as completed.
    pub async fn complete_elapsed(&self) -> ApiResult<u64> {
        let result = sqlx::query(
            "UPDATE appointments SET status = 'COMPLETED', updated_at = NOW()
             WHERE status = 'CONFIRMED' AND end_time <= NOW()",
        )
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cancel unpaid appointments whose start time has passed.
    pub async fn expire_unpaid(&self) -> ApiResult<u64> {
        let result = sqlx::query(
            "UPDATE appointments
             SET status = 'CANCELLED', cancellation_reason = 'Payment not received before start', updated_at = NOW()
             WHERE status = 'PENDING' AND price_cents > 0 AND start_time <= NOW()
               AND NOT EXISTS (
                   SELECT 1 FROM payments p WHERE p.appointment_id = appointments.id AND p.status = 'SUCCEEDED'
               )",
        )
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}
