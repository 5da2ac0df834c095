//! Time slots and provider working schedules

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What a slot is reserved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// The booked service itself
    #[default]
    Service,
    /// Equipment preparation right before the service
    Preparation,
    /// Provider-declared unavailability, not tied to a booking
    Blocked,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Service => write!(f, "service"),
            SlotKind::Preparation => write!(f, "preparation"),
            SlotKind::Blocked => write!(f, "blocked"),
        }
    }
}

impl SlotKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "service" => Some(SlotKind::Service),
            "preparation" => Some(SlotKind::Preparation),
            "blocked" => Some(SlotKind::Blocked),
            _ => None,
        }
    }
}

/// Exclusive reservation of a provider's calendar over `[start_time, end_time)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub kind: SlotKind,
    pub notes: Option<String>,
}

impl TimeSlot {
    pub fn new(
        provider_id: Uuid,
        booking_id: Option<Uuid>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        kind: SlotKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            booking_id,
            start_time,
            end_time,
            kind,
            notes: None,
        }
    }

    /// Half-open interval overlap
    #[inline]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.start_time, self.end_time, start, end)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// `[a_start, a_end)` and `[b_start, b_end)` share at least one instant
#[inline]
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// A slot that blocks a requested window, with the booking that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingBooking {
    pub slot_id: Uuid,
    pub booking_id: Option<Uuid>,
    /// `None` when the conflict is a provider block
    pub booking_number: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub kind: SlotKind,
}

/// Provider working hours for one weekday, in the scheduling timezone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSchedule {
    pub provider_id: Uuid,
    pub weekday: Weekday,
    pub is_working_day: bool,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub break_start: Option<NaiveTime>,
    pub break_end: Option<NaiveTime>,
}

impl WorkingSchedule {
    /// Break window, only when both ends are declared
    pub fn break_window(&self) -> Option<(NaiveTime, NaiveTime)> {
        match (self.break_start, self.break_end) {
            (Some(start), Some(end)) if start < end => Some((start, end)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn test_half_open_overlap() {
        let slot = TimeSlot::new(Uuid::new_v4(), None, at(10, 0), at(11, 0), SlotKind::Service);

        assert!(slot.overlaps(at(10, 30), at(11, 30)));
        assert!(slot.overlaps(at(9, 0), at(12, 0)));
        assert!(slot.overlaps(at(10, 15), at(10, 45)));
        // Touching edges do not overlap
        assert!(!slot.overlaps(at(11, 0), at(12, 0)));
        assert!(!slot.overlaps(at(9, 0), at(10, 0)));
    }

    #[test]
    fn test_break_window_requires_both_ends() {
        let mut schedule = WorkingSchedule {
            provider_id: Uuid::new_v4(),
            weekday: Weekday::Mon,
            is_working_day: true,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            break_start: NaiveTime::from_hms_opt(13, 0, 0),
            break_end: None,
        };
        assert!(schedule.break_window().is_none());

        schedule.break_end = NaiveTime::from_hms_opt(14, 0, 0);
        assert!(schedule.break_window().is_some());
    }
}
