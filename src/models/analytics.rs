use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub confirmed: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub no_show: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.confirmed + self.completed + self.cancelled + self.no_show
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewStats {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub appointments: StatusCounts,
    pub revenue_cents: i64,
    pub refunded_cents: i64,
    pub unique_clients: i64,
    pub upcoming_appointments: i64,
    pub completion_rate: f64,
    pub cancellation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MonthlyRevenue {
    pub month: String,
    pub revenue_cents: i64,
    pub payments: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ServiceStats {
    pub service_id: Uuid,
    pub service_name: String,
    pub bookings: i64,
    pub completed: i64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClientStats {
    pub client_id: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub appointments: i64,
    pub completed: i64,
    pub total_spent_cents: i64,
    pub last_appointment: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Appointments,
    Revenue,
    Clients,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Appointments => "appointments",
            ReportType::Revenue => "revenue",
            ReportType::Clients => "clients",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Csv,
    Pdf,
    Json,
}

impl ReportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "text/csv; charset=utf-8",
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Pdf => "pdf",
            ReportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub report_type: ReportType,
    pub format: ReportFormat,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Report contents before rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub title: String,
    /// Key figures printed above the table.
    pub summary: Vec<(String, String)>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}
