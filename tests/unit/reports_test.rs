use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use fitness_scheduler::models::{AppointmentStatus, ClientStats, MonthlyRevenue, ReportFormat};
use fitness_scheduler::services::analytics_service::{
    appointments_table, clients_table, rate, revenue_table, AppointmentReportRow,
};
use fitness_scheduler::services::report_renderer::render;

fn appointment_rows() -> Vec<AppointmentReportRow> {
    vec![
        AppointmentReportRow {
            start_time: Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap(),
            client_name: "Alex Doe".to_string(),
            service_name: "Personal training".to_string(),
            status: AppointmentStatus::Completed,
            price_cents: 6000,
            currency: "usd".to_string(),
        },
        AppointmentReportRow {
            start_time: Utc.with_ymd_and_hms(2030, 1, 8, 10, 0, 0).unwrap(),
            client_name: "Blair Roe".to_string(),
            service_name: "Mobility check-in".to_string(),
            status: AppointmentStatus::Cancelled,
            price_cents: 2500,
            currency: "usd".to_string(),
        },
    ]
}

#[test]
fn test_appointments_report_as_csv() {
    let table = appointments_table("2030-01-01 to 2030-01-31", &appointment_rows());
    let csv = String::from_utf8(render(&table, ReportFormat::Csv).unwrap()).unwrap();

    let first_line = csv.lines().next().unwrap();
    assert_eq!(first_line, table.headers.join(","));
    assert!(csv.contains("Alex Doe"));
    assert!(csv.contains("60.00 USD"));
}

#[test]
fn test_revenue_report_as_json() {
    let months = vec![
        MonthlyRevenue {
            month: "2030-01".to_string(),
            revenue_cents: 12000,
            payments: 2,
        },
        MonthlyRevenue {
            month: "2030-02".to_string(),
            revenue_cents: 3000,
            payments: 1,
        },
    ];
    let table = revenue_table("2030-01-01 to 2030-03-01", &months, 0);
    let json: serde_json::Value = serde_json::from_slice(&render(&table, ReportFormat::Json).unwrap()).unwrap();

    assert_eq!(json["rows"].as_array().unwrap().len(), 2);
    assert_eq!(json["title"], table.title.as_str());
}

#[test]
fn test_clients_report_as_pdf() {
    let clients: Vec<ClientStats> = (0..150)
        .map(|i| ClientStats {
            client_id: Uuid::new_v4(),
            client_name: format!("Client {}", i),
            client_email: format!("client{}@example.com", i),
            appointments: 3,
            completed: 2,
            total_spent_cents: 12000,
            last_appointment: None,
        })
        .collect();
    let table = clients_table("2030-01-01 to 2030-01-31", &clients);
    let pdf = render(&table, ReportFormat::Pdf).unwrap();
    let text = String::from_utf8_lossy(&pdf);

    assert!(text.starts_with("%PDF-1.4"));
    assert!(text.contains("/BaseFont /Helvetica"));
    assert!(text.contains("Page 2 of"));
    assert!(text.trim_end().ends_with("%%EOF"));
}

#[test]
fn test_rate_rounding() {
    assert_eq!(rate(1, 3), 0.3333);
    assert_eq!(rate(0, 0), 0.0);
}
