use chrono::{Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use uuid::Uuid;

use fitness_scheduler::models::{AppointmentStatus, Availability, NotificationKind, TimeSlot};
use fitness_scheduler::services::booking_service::{compute_available_slots, refund_due};
use fitness_scheduler::services::notification_scheduler::{reminder_dedup_key, reminder_due};

fn window(date: NaiveDate, start: (u32, u32), end: (u32, u32)) -> Availability {
    Availability {
        id: Uuid::new_v4(),
        trainer_id: Uuid::new_v4(),
        day_of_week: date.weekday().num_days_from_sunday() as i16,
        start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 3).unwrap()
}

#[test]
fn test_one_hour_window_gives_single_slot_for_one_hour_service() {
    let date = monday();
    let now = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
    let slots = compute_available_slots(&[window(date, (9, 0), (10, 0))], date, 60, &[], now);

    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].start_time, Utc.with_ymd_and_hms(2030, 6, 3, 9, 0, 0).unwrap());
}

#[test]
fn test_booked_slot_is_excluded() {
    let date = monday();
    let now = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
    let booked = TimeSlot {
        start_time: Utc.with_ymd_and_hms(2030, 6, 3, 9, 30, 0).unwrap(),
        end_time: Utc.with_ymd_and_hms(2030, 6, 3, 10, 0, 0).unwrap(),
    };

    let slots = compute_available_slots(&[window(date, (9, 0), (11, 0))], date, 30, &[booked], now);
    assert!(slots.iter().all(|s| !booked.overlaps(s.start_time, s.end_time)));
    assert!(slots.iter().any(|s| s.start_time == booked.end_time));
}

#[test]
fn test_slots_in_the_past_are_dropped() {
    let date = monday();
    let now = Utc.with_ymd_and_hms(2030, 6, 3, 9, 40, 0).unwrap();
    let slots = compute_available_slots(&[window(date, (9, 0), (11, 0))], date, 30, &[], now);
    assert!(slots.iter().all(|s| s.start_time > now));
    assert_eq!(slots[0].start_time, Utc.with_ymd_and_hms(2030, 6, 3, 9, 45, 0).unwrap());
}

#[test]
fn test_other_weekday_has_no_slots() {
    let date = monday();
    let tuesday = date + Duration::days(1);
    let now = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
    assert!(compute_available_slots(&[window(date, (9, 0), (17, 0))], tuesday, 60, &[], now).is_empty());
}

#[test]
fn test_cancellation_refund_policy() {
    let now = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
    let far = now + Duration::hours(48);
    let near = now + Duration::hours(2);

    assert!(refund_due(true, false, far, now, 24));
    assert!(!refund_due(true, false, near, now, 24));
    assert!(refund_due(true, true, near, now, 24));
    assert!(!refund_due(false, true, far, now, 24));
}

#[test]
fn test_status_transitions() {
    use AppointmentStatus::*;
    assert!(Pending.can_transition_to(Confirmed));
    assert!(Pending.can_transition_to(Cancelled));
    assert!(Confirmed.can_transition_to(NoShow));
    assert!(!Completed.can_transition_to(Cancelled));
    assert!(!Cancelled.can_transition_to(Confirmed));
}

#[test]
fn test_reminder_windows() {
    let now = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
    assert_eq!(reminder_due(now, now + Duration::hours(20)), Some(NotificationKind::Reminder24h));
    assert_eq!(reminder_due(now, now + Duration::minutes(45)), Some(NotificationKind::Reminder1h));
    assert_eq!(reminder_due(now, now + Duration::hours(1)), Some(NotificationKind::Reminder1h));
    assert_eq!(reminder_due(now, now + Duration::hours(30)), None);
    assert_eq!(reminder_due(now, now - Duration::minutes(5)), None);

    let id = Uuid::new_v4();
    assert_eq!(
        reminder_dedup_key(id, NotificationKind::Reminder1h),
        format!("{}:REMINDER_1H", id)
    );
}

proptest! {
    #[test]
    fn prop_slots_fit_window_and_avoid_bookings(
        start_hour in 6u32..12,
        length_hours in 1u32..8,
        duration in prop::sample::select(vec![15i64, 30, 45, 60, 90]),
        booked_offsets in prop::collection::vec(0i64..480, 0..5),
    ) {
        let date = monday();
        let now = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let w = window(date, (start_hour, 0), (start_hour + length_hours, 0));
        let window_start = date.and_time(w.start_time).and_utc();
        let window_end = date.and_time(w.end_time).and_utc();

        let booked: Vec<TimeSlot> = booked_offsets
            .iter()
            .map(|m| TimeSlot {
                start_time: window_start + Duration::minutes(*m),
                end_time: window_start + Duration::minutes(*m + 30),
            })
            .collect();

        let slots = compute_available_slots(&[w], date, duration, &booked, now);
        for slot in &slots {
            prop_assert!(slot.start_time >= window_start);
            prop_assert!(slot.end_time <= window_end);
            prop_assert_eq!(slot.end_time - slot.start_time, Duration::minutes(duration));
            prop_assert!(booked.iter().all(|b| !b.overlaps(slot.start_time, slot.end_time)));
        }
    }
}
