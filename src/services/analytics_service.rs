use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    AnalyticsRange, AppointmentStatus, ClientStats, MonthlyRevenue, OverviewStats, ReportRequest, ReportTable,
    ReportType, ServiceStats, StatusCounts,
};
use crate::services::payment_service::format_amount;

const DEFAULT_RANGE_DAYS: i64 = 30;

/// Resolve an optional range to concrete bounds, defaulting to the last 30 days.
pub fn resolve_range(range: &AnalyticsRange, now: DateTime<Utc>) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
    let to = range.to.unwrap_or(now);
    let from = range.from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
    if from >= to {
        return Err(ApiError::bad_request("`from` must be before `to`"));
    }
    Ok((from, to))
}

pub fn status_counts(rows: &[(AppointmentStatus, i64)]) -> StatusCounts {
    rows.iter().fold(StatusCounts::default(), |mut counts, (status, n)| {
        match status {
            AppointmentStatus::Pending => counts.pending += n,
            AppointmentStatus::Confirmed => counts.confirmed += n,
            AppointmentStatus::Completed => counts.completed += n,
            AppointmentStatus::Cancelled => counts.cancelled += n,
            AppointmentStatus::NoShow => counts.no_show += n,
        }
        counts
    })
}

/// Share of `part` in `total`, rounded to four decimals. Zero when there is nothing to divide.
pub fn rate(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 10_000.0).round() / 10_000.0
}

/// Aggregates for trainer dashboards and reports. `trainer_id = None` covers the whole platform.
#[derive(Debug, Clone)]
pub struct AnalyticsService {
    db: PgPool,
}

impl AnalyticsService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn overview(&self, trainer_id: Option<Uuid>, range: &AnalyticsRange) -> ApiResult<OverviewStats> {
        let (from, to) = resolve_range(range, Utc::now())?;

        let rows = sqlx::query_as::<_, (AppointmentStatus, i64)>(
            "SELECT status, COUNT(*) FROM appointments
             WHERE ($1::uuid IS NULL OR trainer_id = $1) AND start_time >= $2 AND start_time < $3
             GROUP BY status",
        )
        .bind(trainer_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;
        let appointments = status_counts(&rows);

        let (revenue_cents, refunded_cents) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT
                 COALESCE(SUM(p.amount_cents) FILTER (WHERE p.status = 'SUCCEEDED'), 0)::BIGINT,
                 COALESCE(SUM(p.amount_cents) FILTER (WHERE p.status = 'REFUNDED'), 0)::BIGINT
             FROM payments p
             LEFT JOIN appointments a ON a.id = p.appointment_id
             WHERE ($1::uuid IS NULL OR a.trainer_id = $1) AND p.created_at >= $2 AND p.created_at < $3",
        )
        .bind(trainer_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.db)
        .await?;

        let unique_clients: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT client_id) FROM appointments
             WHERE ($1::uuid IS NULL OR trainer_id = $1) AND start_time >= $2 AND start_time < $3
               AND status <> 'CANCELLED'",
        )
        .bind(trainer_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.db)
        .await?;

        let upcoming_appointments: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM appointments
             WHERE ($1::uuid IS NULL OR trainer_id = $1) AND start_time > NOW()
               AND status IN ('PENDING', 'CONFIRMED')",
        )
        .bind(trainer_id)
        .fetch_one(&self.db)
        .await?;

        let total = appointments.total();
        Ok(OverviewStats {
            from,
            to,
            completion_rate: rate(appointments.completed, total),
            cancellation_rate: rate(appointments.cancelled, total),
            appointments,
            revenue_cents,
            refunded_cents,
            unique_clients,
            upcoming_appointments,
        })
    }

    pub async fn monthly_revenue(&self, trainer_id: Option<Uuid>, range: &AnalyticsRange) -> ApiResult<Vec<MonthlyRevenue>> {
        let (from, to) = resolve_range(range, Utc::now())?;

        let months = sqlx::query_as::<_, MonthlyRevenue>(
            "SELECT to_char(date_trunc('month', p.created_at), 'YYYY-MM') AS month,
                    COALESCE(SUM(p.amount_cents), 0)::BIGINT AS revenue_cents,
                    COUNT(*) AS payments
             FROM payments p
             LEFT JOIN appointments a ON a.id = p.appointment_id
             WHERE p.status = 'SUCCEEDED' AND ($1::uuid IS NULL OR a.trainer_id = $1)
               AND p.created_at >= $2 AND p.created_at < $3
             GROUP BY 1
             ORDER BY 1",
        )
        .bind(trainer_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        Ok(months)
    }

    pub async fn service_stats(&self, trainer_id: Option<Uuid>, range: &AnalyticsRange) -> ApiResult<Vec<ServiceStats>> {
        let (from, to) = resolve_range(range, Utc::now())?;

        let services = sqlx::query_as::<_, ServiceStats>(
            "SELECT s.id AS service_id, s.name AS service_name,
                    COUNT(a.id) AS bookings,
                    COUNT(a.id) FILTER (WHERE a.status = 'COMPLETED') AS completed,
                    COALESCE((
                        SELECT SUM(p.amount_cents) FROM payments p
                        JOIN appointments pa ON pa.id = p.appointment_id
                        WHERE pa.service_id = s.id AND p.status = 'SUCCEEDED'
                          AND pa.start_time >= $2 AND pa.start_time < $3
                    ), 0)::BIGINT AS revenue_cents
             FROM services s
             LEFT JOIN appointments a ON a.service_id = s.id AND a.start_time >= $2 AND a.start_time < $3
             WHERE ($1::uuid IS NULL OR s.trainer_id = $1)
             GROUP BY s.id, s.name
             ORDER BY revenue_cents DESC, bookings DESC, s.name",
        )
        .bind(trainer_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        Ok(services)
    }

    pub async fn client_stats(&self, trainer_id: Option<Uuid>, range: &AnalyticsRange) -> ApiResult<Vec<ClientStats>> {
        let (from, to) = resolve_range(range, Utc::now())?;

        let clients = sqlx::query_as::<_, ClientStats>(
            "SELECT u.id AS client_id, u.full_name AS client_name, u.email AS client_email,
                    COUNT(a.id) AS appointments,
                    COUNT(a.id) FILTER (WHERE a.status = 'COMPLETED') AS completed,
                    COALESCE((
                        SELECT SUM(p.amount_cents) FROM payments p
                        JOIN appointments pa ON pa.id = p.appointment_id
                        WHERE p.user_id = u.id AND p.status = 'SUCCEEDED'
                          AND ($1::uuid IS NULL OR pa.trainer_id = $1)
                          AND pa.start_time >= $2 AND pa.start_time < $3
                    ), 0)::BIGINT AS total_spent_cents,
                    MAX(a.start_time) AS last_appointment
             FROM appointments a
             JOIN users u ON u.id = a.client_id
             WHERE ($1::uuid IS NULL OR a.trainer_id = $1) AND a.start_time >= $2 AND a.start_time < $3
             GROUP BY u.id, u.full_name, u.email
             ORDER BY total_spent_cents DESC, appointments DESC",
        )
        .bind(trainer_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        Ok(clients)
    }

    /// Collect the rows of a downloadable report.
    pub async fn build_report(&self, trainer_id: Option<Uuid>, request: &ReportRequest) -> ApiResult<ReportTable> {
        let range = AnalyticsRange {
            from: request.from,
            to: request.to,
        };
        let (from, to) = resolve_range(&range, Utc::now())?;
        let period = format!("{} to {}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"));

        let table = match request.report_type {
            ReportType::Appointments => {
                let rows = sqlx::query_as::<_, AppointmentReportRow>(
                    "SELECT a.start_time, c.full_name AS client_name, s.name AS service_name,
                            a.status, a.price_cents, a.currency
                     FROM appointments a
                     JOIN users c ON c.id = a.client_id
                     JOIN services s ON s.id = a.service_id
                     WHERE ($1::uuid IS NULL OR a.trainer_id = $1) AND a.start_time >= $2 AND a.start_time < $3
                     ORDER BY a.start_time",
                )
                .bind(trainer_id)
                .bind(from)
                .bind(to)
                .fetch_all(&self.db)
                .await?;
                appointments_table(&period, &rows)
            }
            ReportType::Revenue => {
                let months = self.monthly_revenue(trainer_id, &range).await?;
                let overview = self.overview(trainer_id, &range).await?;
                revenue_table(&period, &months, overview.refunded_cents)
            }
            ReportType::Clients => {
                let clients = self.client_stats(trainer_id, &range).await?;
                clients_table(&period, &clients)
            }
        };

        Ok(table)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentReportRow {
    pub start_time: DateTime<Utc>,
    pub client_name: String,
    pub service_name: String,
    pub status: AppointmentStatus,
    pub price_cents: i64,
    pub currency: String,
}

pub fn appointments_table(period: &str, rows: &[AppointmentReportRow]) -> ReportTable {
    let counts = status_counts(&rows.iter().map(|r| (r.status, 1)).collect::<Vec<_>>());

    ReportTable {
        title: "Appointments report".to_string(),
        summary: vec![
            ("Period".to_string(), period.to_string()),
            ("Appointments".to_string(), counts.total().to_string()),
            ("Completed".to_string(), counts.completed.to_string()),
            ("Cancelled".to_string(), counts.cancelled.to_string()),
            ("No-shows".to_string(), counts.no_show.to_string()),
        ],
        headers: ["Date", "Time (UTC)", "Client", "Service", "Status", "Price"]
            .map(String::from)
            .to_vec(),
        rows: rows
            .iter()
            .map(|r| {
                vec![
                    r.start_time.format("%Y-%m-%d").to_string(),
                    r.start_time.format("%H:%M").to_string(),
                    r.client_name.clone(),
                    r.service_name.clone(),
                    r.status.as_str().to_string(),
                    format_amount(r.price_cents, &r.currency),
                ]
            })
            .collect(),
    }
}

pub fn revenue_table(period: &str, months: &[MonthlyRevenue], refunded_cents: i64) -> ReportTable {
    let total: i64 = months.iter().map(|m| m.revenue_cents).sum();
    let payments: i64 = months.iter().map(|m| m.payments).sum();

    ReportTable {
        title: "Revenue report".to_string(),
        summary: vec![
            ("Period".to_string(), period.to_string()),
            ("Total revenue".to_string(), format_amount(total, "usd")),
            ("Refunded".to_string(), format_amount(refunded_cents, "usd")),
            ("Payments".to_string(), payments.to_string()),
        ],
        headers: ["Month", "Payments", "Revenue"].map(String::from).to_vec(),
        rows: months
            .iter()
            .map(|m| vec![m.month.clone(), m.payments.to_string(), format_amount(m.revenue_cents, "usd")])
            .collect(),
    }
}

pub fn clients_table(period: &str, clients: &[ClientStats]) -> ReportTable {
    ReportTable {
        title: "Clients report".to_string(),
        summary: vec![
            ("Period".to_string(), period.to_string()),
            ("Clients".to_string(), clients.len().to_string()),
        ],
        headers: ["Client", "Email", "Appointments", "Completed", "Total spent", "Last appointment"]
            .map(String::from)
            .to_vec(),
        rows: clients
            .iter()
            .map(|c| {
                vec![
                    c.client_name.clone(),
                    c.client_email.clone(),
                    c.appointments.to_string(),
                    c.completed.to_string(),
                    format_amount(c.total_spent_cents, "usd"),
                    c.last_appointment
                        .map(|t| t.format("%Y-%m-%d").to_string())
                        .unwrap_or_default(),
                ]
            })
            .collect(),
    }
}
