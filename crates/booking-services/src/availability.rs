//! Free-slot search over a provider's published working hours
//!
//! Candidates start at the beginning of each working day and advance by the
//! booking type's slot interval. A candidate touching the break jumps to the
//! break end. Candidates before the minimum notice, or whose window (with the
//! preparation lead) intersects an active slot, are dropped. Days without a
//! schedule row offer nothing.

use booking_core::config::SchedulingConfig;
use booking_core::models::{
    intervals_overlap, BookingCapabilities, BookingType, ConflictingBooking, WorkingSchedule,
};
use booking_core::traits::{CatalogRepository, Clock, SlotRepository};
use booking_core::{BookingError, BookingResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::lifecycle::preparation_lead;

/// What to search free time for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub booking_type: BookingType,
    /// Requested length; the service default otherwise
    pub duration_minutes: Option<i32>,
}

/// A bookable window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
}

/// Free windows of one local day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub slots: Vec<AvailableSlot>,
}

/// Shape of the candidates generated for one query
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotShape {
    pub duration: Duration,
    pub interval: Duration,
    pub preparation: Option<Duration>,
}

pub struct AvailabilityFinder {
    clock: Arc<dyn Clock>,
    catalog: Arc<dyn CatalogRepository>,
    slots: Arc<dyn SlotRepository>,
    scheduling: SchedulingConfig,
}

impl AvailabilityFinder {
    pub fn new(
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn CatalogRepository>,
        slots: Arc<dyn SlotRepository>,
        scheduling: SchedulingConfig,
    ) -> Self {
        Self {
            clock,
            catalog,
            slots,
            scheduling,
        }
    }

    /// Free windows, grouped by day, from the earliest allowed start until
    /// `availability_days` from now
    #[instrument(skip(self, query), fields(provider_id = %query.provider_id))]
    pub async fn available_slots(
        &self,
        query: &AvailabilityQuery,
    ) -> BookingResult<Vec<DayAvailability>> {
        let now = self.clock.now();
        let earliest = now + Duration::hours(query.booking_type.min_advance_hours());
        let last = now + Duration::days(self.scheduling.availability_days);
        self.search(query, earliest, last).await
    }

    /// First free window at or after `from`, looking `availability_days` ahead
    #[instrument(skip(self, query), fields(provider_id = %query.provider_id))]
    pub async fn next_available_slot(
        &self,
        query: &AvailabilityQuery,
        from: Option<DateTime<Utc>>,
    ) -> BookingResult<Option<AvailableSlot>> {
        let now = self.clock.now();
        let notice = now + Duration::hours(query.booking_type.min_advance_hours());
        let earliest = from.map_or(notice, |from| from.max(notice));
        let last = earliest + Duration::days(self.scheduling.availability_days);

        let days = self.search(query, earliest, last).await?;
        Ok(days.into_iter().flat_map(|day| day.slots).next())
    }

    async fn shape(&self, query: &AvailabilityQuery) -> BookingResult<SlotShape> {
        if !self.catalog.user_exists(query.provider_id).await? {
            return Err(BookingError::ProviderNotFound(query.provider_id));
        }
        let service = self
            .catalog
            .find_service(query.service_id)
            .await?
            .ok_or(BookingError::ServiceNotFound(query.service_id))?;

        let booking_type = query.booking_type;
        let minutes = query
            .duration_minutes
            .or(service.duration_minutes)
            .unwrap_or(self.scheduling.default_item_minutes);
        if minutes <= 0 {
            return Err(BookingError::InvalidDuration(minutes));
        }
        if i64::from(minutes) > booking_type.max_duration_hours() * 60 {
            return Err(BookingError::DurationExceeded {
                booking_type,
                max_hours: booking_type.max_duration_hours(),
                requested_minutes: minutes,
            });
        }

        Ok(SlotShape {
            duration: Duration::minutes(i64::from(minutes)),
            interval: Duration::minutes(booking_type.slot_interval_minutes()),
            preparation: preparation_lead(&self.scheduling, booking_type),
        })
    }

    async fn search(
        &self,
        query: &AvailabilityQuery,
        earliest: DateTime<Utc>,
        last: DateTime<Utc>,
    ) -> BookingResult<Vec<DayAvailability>> {
        let shape = self.shape(query).await?;
        let timezone = self.scheduling.timezone;

        let lead = shape.preparation.unwrap_or_else(Duration::zero);
        let busy = self
            .slots
            .find_overlapping(query.provider_id, earliest - lead, last + Duration::days(1))
            .await?;

        let first_day = earliest.with_timezone(&timezone).date_naive();
        let last_day = last.with_timezone(&timezone).date_naive();

        let mut schedules: HashMap<Weekday, Option<WorkingSchedule>> = HashMap::new();
        let mut days = Vec::new();

        for date in first_day.iter_days().take_while(|d| *d <= last_day) {
            let weekday = date.weekday();
            let schedule = match schedules.get(&weekday) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = self
                        .slots
                        .get_working_hours(query.provider_id, weekday)
                        .await?;
                    schedules.insert(weekday, loaded.clone());
                    loaded
                }
            };
            let Some(schedule) = schedule else {
                continue;
            };

            let slots = day_slots(&schedule, date, timezone, &shape, earliest, &busy);
            if !slots.is_empty() {
                days.push(DayAvailability {
                    date,
                    weekday,
                    slots,
                });
            }
        }

        debug!(
            "Found free time on {} days for provider {}",
            days.len(),
            query.provider_id
        );
        Ok(days)
    }
}

/// Local wall-clock window to UTC; `None` inside a DST gap
fn to_utc(
    timezone: Tz,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = timezone.from_local_datetime(&start).earliest()?;
    let end = timezone.from_local_datetime(&end).earliest()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

/// Free windows of one working day
pub(crate) fn day_slots(
    schedule: &WorkingSchedule,
    date: NaiveDate,
    timezone: Tz,
    shape: &SlotShape,
    earliest: DateTime<Utc>,
    busy: &[ConflictingBooking],
) -> Vec<AvailableSlot> {
    if !schedule.is_working_day || shape.interval <= Duration::zero() {
        return Vec::new();
    }

    let work_end = date.and_time(schedule.end_time);
    let break_window = schedule
        .break_window()
        .map(|(start, end)| (date.and_time(start), date.and_time(end)));
    let lead = shape.preparation.unwrap_or_else(Duration::zero);
    let minutes = shape.duration.num_minutes() as i32;

    let mut found = Vec::new();
    let mut current = date.and_time(schedule.start_time);

    while current + shape.duration <= work_end {
        let end = current + shape.duration;

        if let Some((break_start, break_end)) = break_window {
            if intervals_overlap(current, end, break_start, break_end) {
                current = break_end;
                continue;
            }
        }

        if let Some((start_time, end_time)) = to_utc(timezone, current, end) {
            let taken = busy
                .iter()
                .any(|b| intervals_overlap(start_time - lead, end_time, b.start_time, b.end_time));
            if start_time >= earliest && !taken {
                found.push(AvailableSlot {
                    start_time,
                    end_time,
                    duration_minutes: minutes,
                });
            }
        }

        current += shape.interval;
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::models::SlotKind;
    use chrono::NaiveTime;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn schedule(break_window: Option<(NaiveTime, NaiveTime)>) -> WorkingSchedule {
        WorkingSchedule {
            provider_id: Uuid::new_v4(),
            weekday: Weekday::Mon,
            is_working_day: true,
            start_time: time(9, 0),
            end_time: time(13, 0),
            break_start: break_window.map(|(s, _)| s),
            break_end: break_window.map(|(_, e)| e),
        }
    }

    fn shape(minutes: i64, interval: i64) -> SlotShape {
        SlotShape {
            duration: Duration::minutes(minutes),
            interval: Duration::minutes(interval),
            preparation: None,
        }
    }

    fn starts(slots: &[AvailableSlot]) -> Vec<DateTime<Utc>> {
        slots.iter().map(|s| s.start_time).collect()
    }

    #[test]
    fn test_steps_until_work_end() {
        let slots = day_slots(
            &schedule(None),
            monday(),
            chrono_tz::UTC,
            &shape(60, 30),
            at(0, 0),
            &[],
        );

        assert_eq!(slots.len(), 7);
        assert_eq!(slots[0].start_time, at(9, 0));
        assert_eq!(slots.last().unwrap().end_time, at(13, 0));
        assert!(slots.iter().all(|s| s.duration_minutes == 60));
    }

    #[test]
    fn test_break_jumps_to_break_end() {
        let slots = day_slots(
            &schedule(Some((time(11, 0), time(12, 0)))),
            monday(),
            chrono_tz::UTC,
            &shape(60, 60),
            at(0, 0),
            &[],
        );

        assert_eq!(starts(&slots), vec![at(9, 0), at(10, 0), at(12, 0)]);
    }

    #[test]
    fn test_skips_busy_and_too_early_candidates() {
        let busy = ConflictingBooking {
            slot_id: Uuid::new_v4(),
            booking_id: None,
            booking_number: None,
            start_time: at(11, 0),
            end_time: at(12, 0),
            kind: SlotKind::Blocked,
        };

        let slots = day_slots(
            &schedule(None),
            monday(),
            chrono_tz::UTC,
            &shape(60, 60),
            at(9, 30),
            &[busy],
        );

        assert_eq!(starts(&slots), vec![at(10, 0), at(12, 0)]);
    }

    #[test]
    fn test_preparation_lead_must_be_free() {
        let busy = ConflictingBooking {
            slot_id: Uuid::new_v4(),
            booking_id: Some(Uuid::new_v4()),
            booking_number: Some("BK20260302-AAAAAA".to_string()),
            start_time: at(9, 0),
            end_time: at(10, 0),
            kind: SlotKind::Service,
        };
        let mut with_lead = shape(60, 30);
        with_lead.preparation = Some(Duration::minutes(15));

        let slots = day_slots(
            &schedule(None),
            monday(),
            chrono_tz::UTC,
            &with_lead,
            at(0, 0),
            &[busy],
        );

        // 10:00 needs 09:45 free
        assert_eq!(slots[0].start_time, at(10, 30));
    }

    #[test]
    fn test_day_off_has_no_slots() {
        let mut off = schedule(None);
        off.is_working_day = false;

        let slots = day_slots(&off, monday(), chrono_tz::UTC, &shape(60, 30), at(0, 0), &[]);
        assert!(slots.is_empty());
    }

    #[test]
    fn test_local_hours_follow_timezone() {
        let slots = day_slots(
            &schedule(None),
            monday(),
            chrono_tz::Europe::Moscow,
            &shape(60, 60),
            at(0, 0),
            &[],
        );

        // 09:00 in Moscow (UTC+3)
        assert_eq!(slots[0].start_time, at(6, 0));
    }
}
