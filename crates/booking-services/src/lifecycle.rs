//! Booking lifecycle service
//!
//! Owns the booking state machine:
//!
//! ```text
//! Pending -> Confirmed -> InProgress -> Completed
//!    |           |            |
//!    +-----------+------------+--> CancelledByClient / CancelledByProvider
//! ```
//!
//! Cancelling `InProgress` requires `force`. Terminal states never change.
//! Pending and confirmed bookings may also be moved to another window.
//! Every local state change is one guarded repository call; gateway and
//! notification calls happen after it and never undo it.

use booking_core::config::{
    AppConfig, CancellationConfig, CompletionConfig, PricingConfig, RefundConfig, SchedulingConfig,
};
use booking_core::models::{
    intervals_overlap, percent_of, round_money, Actor, Booking, BookingCapabilities,
    BookingDetails, BookingEvent, BookingServiceLine, BookingStatus, BookingType,
    CancellationRecord, CancellationSide, ClientStatistics, CompletionBonuses, CompletionRecord,
    NewBooking, ProviderStatistics, RefundOutcome, RequiredField, RescheduleRecord,
    SettlementOutcome, SlotKind, StatusChange, TimeSlot, WorkingSchedule,
};
use booking_core::traits::{
    BookingRepository, CatalogRepository, Clock, NotificationPort, PaymentGateway,
    PaymentRepository, SlotRepository, StatisticsRepository,
};
use booking_core::{BookingError, BookingResult};
use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::availability::{AvailabilityFinder, AvailabilityQuery, AvailableSlot, DayAvailability};
use crate::cancellation_policy::{CancellationPolicy, FeeResult};
use crate::numbering::BookingNumberGenerator;
use crate::pricing::{PricingCalculator, PricingContext};
use crate::refund::{RefundOrchestrator, RefundReceipt, RefundRequest};

/// One service of a bundle request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BundleItem {
    pub service_id: Uuid,
    #[validate(range(min = 1, max = 100, message = "Quantity must be 1-100"))]
    pub quantity: i32,
    /// Length of this item; the service default otherwise
    #[validate(range(min = 1, max = 720, message = "Item duration must be 1-720 minutes"))]
    pub duration_minutes: Option<i32>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// Request to book a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct BookingRequest {
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub booking_type: BookingType,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,

    #[validate(length(max = 500, message = "Address must be at most 500 characters"))]
    pub client_address: Option<String>,
    #[validate(length(min = 5, max = 20, message = "Phone must be 5-20 characters"))]
    pub client_phone: Option<String>,
    #[validate(length(max = 500, message = "Address must be at most 500 characters"))]
    pub provider_address: Option<String>,
    #[validate(length(max = 50))]
    pub platform: Option<String>,
    #[validate(url(message = "Meeting link must be a valid URL"))]
    pub meeting_link: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,

    /// Quoted travel fee for on-site bookings
    pub delivery_fee: Option<Decimal>,

    #[serde(default)]
    #[validate(nested)]
    pub bundle_items: Vec<BundleItem>,
}

impl BookingRequest {
    fn details(&self) -> BookingDetails {
        BookingDetails {
            client_address: self.client_address.clone(),
            client_phone: self.client_phone.clone(),
            provider_address: self.provider_address.clone(),
            platform: self.platform.clone(),
            meeting_link: self.meeting_link.clone(),
            notes: self.notes.clone(),
        }
    }

    fn has_field(&self, field: RequiredField) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        match field {
            RequiredField::ClientAddress => present(&self.client_address),
            RequiredField::ClientPhone => present(&self.client_phone),
            RequiredField::ProviderAddress => present(&self.provider_address),
            RequiredField::Platform => present(&self.platform),
            RequiredField::BundleItems => !self.bundle_items.is_empty(),
        }
    }
}

/// Ports the lifecycle works through
#[derive(Clone)]
pub struct LifecyclePorts {
    pub clock: Arc<dyn Clock>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub slots: Arc<dyn SlotRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub statistics: Arc<dyn StatisticsRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationPort>,
}

impl LifecyclePorts {
    /// Wire every repository port to one store
    pub fn from_store<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self
    where
        S: CatalogRepository
            + SlotRepository
            + BookingRepository
            + StatisticsRepository
            + PaymentRepository
            + 'static,
    {
        Self {
            clock,
            catalog: store.clone(),
            slots: store.clone(),
            bookings: store.clone(),
            statistics: store.clone(),
            payments: store,
            gateway,
            notifier,
        }
    }
}

/// Rule constants used by the lifecycle
#[derive(Debug, Clone, Default)]
pub struct LifecycleSettings {
    pub scheduling: SchedulingConfig,
    pub pricing: PricingConfig,
    pub cancellation: CancellationConfig,
    pub refund: RefundConfig,
    pub completion: CompletionConfig,
}

impl From<&AppConfig> for LifecycleSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            scheduling: config.scheduling.clone(),
            pricing: config.pricing.clone(),
            cancellation: config.cancellation.clone(),
            refund: config.refund.clone(),
            completion: config.completion.clone(),
        }
    }
}

/// Result of a successful cancellation
#[derive(Debug, Clone, Serialize)]
pub struct CancellationResult {
    pub booking: Booking,
    pub side: CancellationSide,
    pub fee: FeeResult,
    pub refund: RefundOutcome,
}

/// Per-booking outcome of a bulk cancellation
#[derive(Debug)]
pub struct BulkCancelItem {
    pub booking_id: Uuid,
    pub result: BookingResult<CancellationResult>,
}

#[derive(Debug, Default)]
pub struct BulkCancelReport {
    pub items: Vec<BulkCancelItem>,
    /// Fees of the successful cancellations only
    pub total_fees: Decimal,
}

impl BulkCancelReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

/// Money derived from a completed booking
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionAmounts {
    pub bonuses: CompletionBonuses,
    /// Provider share after commission
    pub net_earnings: Decimal,
}

/// Bonuses and provider net for a booking total and optional quality score
pub fn completion_amounts(
    config: &CompletionConfig,
    total: Decimal,
    quality: Option<i16>,
) -> CompletionAmounts {
    let net_earnings = round_money(total - percent_of(total, config.commission_percent));

    let loyalty_points = (total * config.loyalty_points_rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0);

    let bonus_percent = match quality {
        Some(5) => config.excellent_quality_bonus_percent,
        Some(4) => config.good_quality_bonus_percent,
        _ => Decimal::ZERO,
    };

    CompletionAmounts {
        bonuses: CompletionBonuses {
            client_cashback: percent_of(total, config.client_cashback_percent),
            loyalty_points,
            provider_quality_bonus: percent_of(net_earnings, bonus_percent),
        },
        net_earnings,
    }
}

/// Check a window against a provider's working hours in `timezone`
pub fn check_working_hours(
    schedule: &WorkingSchedule,
    timezone: Tz,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BookingResult<()> {
    if !schedule.is_working_day {
        return Err(BookingError::NonWorkingDay(schedule.weekday));
    }

    let local_start = start.with_timezone(&timezone);
    let local_end = end.with_timezone(&timezone);
    let (from, to) = (local_start.time(), local_end.time());

    let same_day = local_start.date_naive() == local_end.date_naive();
    if !same_day || from < schedule.start_time || to > schedule.end_time {
        return Err(BookingError::OutsideWorkingHours {
            work_start: schedule.start_time,
            work_end: schedule.end_time,
        });
    }

    if let Some((break_start, break_end)) = schedule.break_window() {
        if intervals_overlap(from, to, break_start, break_end) {
            return Err(BookingError::DuringBreak {
                break_start,
                break_end,
            });
        }
    }

    Ok(())
}

/// Preparation lead time for equipment-bound types
pub(crate) fn preparation_lead(
    scheduling: &SchedulingConfig,
    booking_type: BookingType,
) -> Option<Duration> {
    booking_type
        .requires_equipment_confirmation()
        .then(|| Duration::minutes(scheduling.preparation_minutes))
        .filter(|p| *p > Duration::zero())
}

/// Calendar entries of a booking: optional preparation, then the service
fn booking_slots(
    provider_id: Uuid,
    booking_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    preparation: Option<Duration>,
) -> Vec<TimeSlot> {
    let mut slots = Vec::with_capacity(2);
    if let Some(preparation) = preparation {
        slots.push(TimeSlot::new(
            provider_id,
            Some(booking_id),
            start - preparation,
            start,
            SlotKind::Preparation,
        ));
    }
    slots.push(TimeSlot::new(
        provider_id,
        Some(booking_id),
        start,
        end,
        SlotKind::Service,
    ));
    slots
}

/// Booking lifecycle service
pub struct BookingLifecycle {
    ports: LifecyclePorts,
    settings: LifecycleSettings,
    pricing: PricingCalculator,
    policy: CancellationPolicy,
    refunds: RefundOrchestrator,
    numbers: BookingNumberGenerator,
    availability: AvailabilityFinder,
}

impl BookingLifecycle {
    pub fn new(ports: LifecyclePorts, settings: LifecycleSettings) -> Self {
        let pricing =
            PricingCalculator::new(settings.pricing.clone(), settings.scheduling.timezone);
        let policy = CancellationPolicy::new(settings.cancellation.clone());
        let refunds = RefundOrchestrator::new(
            ports.gateway.clone(),
            ports.payments.clone(),
            ports.bookings.clone(),
            settings.refund.clone(),
        );
        let numbers = BookingNumberGenerator::new(
            ports.bookings.clone(),
            settings.scheduling.booking_number_attempts,
        );
        let availability = AvailabilityFinder::new(
            ports.clock.clone(),
            ports.catalog.clone(),
            ports.slots.clone(),
            settings.scheduling.clone(),
        );

        Self {
            ports,
            settings,
            pricing,
            policy,
            refunds,
            numbers,
            availability,
        }
    }

    // ==================== Queries ====================

    pub async fn get_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.ports
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| BookingError::BookingNotFound(booking_id.to_string()))
    }

    pub async fn provider_statistics(&self, provider_id: Uuid) -> BookingResult<ProviderStatistics> {
        self.ports.statistics.provider_statistics(provider_id).await
    }

    pub async fn client_statistics(&self, client_id: Uuid) -> BookingResult<ClientStatistics> {
        self.ports.statistics.client_statistics(client_id).await
    }

    /// Free windows of a provider over the search horizon
    pub async fn available_slots(
        &self,
        query: &AvailabilityQuery,
    ) -> BookingResult<Vec<DayAvailability>> {
        self.availability.available_slots(query).await
    }

    /// Earliest free window at or after `from`
    pub async fn next_available_slot(
        &self,
        query: &AvailabilityQuery,
        from: Option<DateTime<Utc>>,
    ) -> BookingResult<Option<AvailableSlot>> {
        self.availability.next_available_slot(query, from).await
    }

    // ==================== Request ====================

    /// Validate, price and persist a new booking
    ///
    /// Checks run in a fixed order and stop at the first failure:
    /// parties and service exist, start in the future, minimum notice,
    /// duration, type-specific fields, calendar overlap, working hours.
    #[instrument(
        skip(self, request),
        fields(
            client_id = %request.client_id,
            provider_id = %request.provider_id,
            booking_type = %request.booking_type
        )
    )]
    pub async fn request_booking(&self, request: BookingRequest) -> BookingResult<Booking> {
        let now = self.ports.clock.now();
        let booking_type = request.booking_type;

        if !self.ports.catalog.user_exists(request.client_id).await? {
            return Err(BookingError::ClientNotFound(request.client_id));
        }
        if !self.ports.catalog.user_exists(request.provider_id).await? {
            return Err(BookingError::ProviderNotFound(request.provider_id));
        }
        let service = self
            .ports
            .catalog
            .find_service(request.service_id)
            .await?
            .ok_or(BookingError::ServiceNotFound(request.service_id))?;

        if request.start_time <= now {
            return Err(BookingError::StartInPast {
                start: request.start_time,
            });
        }

        let earliest_start = now + Duration::hours(booking_type.min_advance_hours());
        if request.start_time < earliest_start {
            return Err(BookingError::InsufficientNotice {
                booking_type,
                minimum_hours: booking_type.min_advance_hours(),
                earliest_start,
            });
        }

        if request.duration_minutes <= 0 {
            return Err(BookingError::InvalidDuration(request.duration_minutes));
        }
        if i64::from(request.duration_minutes) > booking_type.max_duration_hours() * 60 {
            return Err(BookingError::DurationExceeded {
                booking_type,
                max_hours: booking_type.max_duration_hours(),
                requested_minutes: request.duration_minutes,
            });
        }

        if let Some(field) = booking_type
            .required_fields()
            .iter()
            .copied()
            .find(|f| !request.has_field(*f))
        {
            return Err(BookingError::MissingField {
                booking_type,
                field,
            });
        }
        request.validate()?;
        if request.delivery_fee.is_some_and(|fee| fee < Decimal::ZERO) {
            return Err(BookingError::Validation(
                "Delivery fee cannot be negative".to_string(),
            ));
        }

        let start = request.start_time;
        let end = start + Duration::minutes(i64::from(request.duration_minutes));
        let preparation = preparation_lead(&self.settings.scheduling, booking_type);
        let window_start = preparation.map_or(start, |p| start - p);

        let conflicts = self
            .ports
            .slots
            .find_overlapping(request.provider_id, window_start, end)
            .await?;
        if let Some(conflict) = conflicts.into_iter().next() {
            warn!(
                "Requested window {} - {} for provider {} conflicts with {:?}",
                window_start, end, request.provider_id, conflict.booking_number
            );
            return Err(conflict.into());
        }

        self.check_schedule(request.provider_id, start, end).await?;

        let is_first_booking = !self
            .ports
            .bookings
            .client_has_bookings(request.client_id)
            .await?;
        let price = self.pricing.calculate(
            &service,
            booking_type,
            &PricingContext {
                is_first_booking,
                start_time: start,
                delivery_fee: request.delivery_fee,
            },
        );

        let booking_id = Uuid::new_v4();
        let service_lines = self.bundle_lines(booking_id, &request).await?;
        let booking_number = self.numbers.generate(now).await?;

        let slots = booking_slots(request.provider_id, booking_id, start, end, preparation);

        let booking = Booking {
            id: booking_id,
            booking_number,
            client_id: request.client_id,
            provider_id: request.provider_id,
            service_id: request.service_id,
            booking_type,
            status: BookingStatus::Pending,
            start_time: start,
            end_time: end,
            duration_minutes: request.duration_minutes,
            base_price: service.price,
            service_price: price.service_price,
            delivery_fee: price.delivery_fee,
            discount_amount: price.discount_amount,
            deposit_amount: price.deposit_amount,
            total_price: price.total_price,
            paid_amount: Decimal::ZERO,
            payment_reference: None,
            details: request.details(),
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            cancellation_fee_amount: None,
            cancellation_fee_percent: None,
            refund_outcome: None,
            completed_at: None,
            service_quality: None,
            completion_notes: None,
            bonuses: None,
            review_available_until: None,
            settlement: None,
            reschedule_count: 0,
            service_lines: Vec::new(),
            slots: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let booking = self
            .ports
            .bookings
            .create_with_slots(&NewBooking {
                booking,
                slots,
                service_lines,
            })
            .await?;

        info!(
            "Booking {} requested: {} {} - {}, total {}",
            booking.booking_number, booking_type, booking.start_time, booking.end_time,
            booking.total_price
        );

        self.publish(BookingEvent::BookingRequested, &booking).await;
        Ok(booking)
    }

    /// Service lines of a bundle; unknown services are skipped, but at least
    /// one must remain
    async fn bundle_lines(
        &self,
        booking_id: Uuid,
        request: &BookingRequest,
    ) -> BookingResult<Vec<BookingServiceLine>> {
        if request.booking_type != BookingType::Bundle {
            return Ok(Vec::new());
        }

        let mut lines = Vec::with_capacity(request.bundle_items.len());
        let mut offset = 0;

        for item in &request.bundle_items {
            let Some(service) = self.ports.catalog.find_service(item.service_id).await? else {
                warn!(
                    "Skipping unknown service {} in bundle request",
                    item.service_id
                );
                continue;
            };

            let duration = item
                .duration_minutes
                .or(service.duration_minutes)
                .unwrap_or(self.settings.scheduling.default_item_minutes);

            lines.push(BookingServiceLine {
                id: Uuid::new_v4(),
                booking_id,
                service_id: service.id,
                quantity: item.quantity,
                unit_price: round_money(service.price),
                total_price: round_money(service.price * Decimal::from(item.quantity)),
                duration_minutes: duration,
                start_offset_minutes: offset,
                sort_order: lines.len() as i32 + 1,
                notes: item.notes.clone(),
            });
            offset += duration;
        }

        if lines.is_empty() {
            warn!("Bundle request names no known service");
            return Err(BookingError::Validation(
                "Bundle must contain at least one known service".to_string(),
            ));
        }

        Ok(lines)
    }

    /// Enforce the provider's published hours; no row means no restriction
    async fn check_schedule(
        &self,
        provider_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BookingResult<()> {
        let timezone = self.settings.scheduling.timezone;
        let weekday = start.with_timezone(&timezone).weekday();
        if let Some(schedule) = self
            .ports
            .slots
            .get_working_hours(provider_id, weekday)
            .await?
        {
            if let Err(e) = check_working_hours(&schedule, timezone, start, end) {
                warn!("Booking outside schedule of {}: {}", provider_id, e);
                return Err(e);
            }
        }
        Ok(())
    }

    // ==================== Reschedule ====================

    /// Move a pending or confirmed booking to a new window
    ///
    /// Price and status are kept. The booking's own slots do not count as
    /// conflicts; they are swapped for the new ones in one repository call.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn reschedule_booking(
        &self,
        booking_id: Uuid,
        new_start: DateTime<Utc>,
        new_duration_minutes: Option<i32>,
        actor: Actor,
    ) -> BookingResult<Booking> {
        let now = self.ports.clock.now();
        let booking = self.get_booking(booking_id).await?;

        let is_client = booking.is_client(actor.user_id);
        if !is_client && !booking.is_provider(actor.user_id) && !actor.role.is_privileged() {
            warn!(
                "User {} tried to reschedule booking {}",
                actor.user_id, booking.booking_number
            );
            return Err(BookingError::Forbidden {
                actor_id: actor.user_id,
                booking_number: booking.booking_number,
                operation: "reschedule",
            });
        }

        if !booking.status.can_be_rescheduled() {
            return Err(BookingError::InvalidTransition {
                status: booking.status,
                operation: "reschedule",
            });
        }

        let booking_type = booking.booking_type;
        if new_start <= now {
            return Err(BookingError::StartInPast { start: new_start });
        }
        let earliest_start = now + Duration::hours(booking_type.min_advance_hours());
        if new_start < earliest_start {
            return Err(BookingError::InsufficientNotice {
                booking_type,
                minimum_hours: booking_type.min_advance_hours(),
                earliest_start,
            });
        }

        let duration_minutes = new_duration_minutes.unwrap_or(booking.duration_minutes);
        if duration_minutes <= 0 {
            return Err(BookingError::InvalidDuration(duration_minutes));
        }
        if i64::from(duration_minutes) > booking_type.max_duration_hours() * 60 {
            return Err(BookingError::DurationExceeded {
                booking_type,
                max_hours: booking_type.max_duration_hours(),
                requested_minutes: duration_minutes,
            });
        }

        let scheduling = &self.settings.scheduling;
        if new_start > now + Duration::days(scheduling.max_reschedule_days) {
            return Err(BookingError::RescheduleTooFarAhead {
                max_days: scheduling.max_reschedule_days,
            });
        }

        let notice = Duration::hours(booking_type.min_advance_hours());
        if is_client && booking.time_until_start(now) < notice {
            warn!("Reschedule of {} by client is too late", booking.booking_number);
            return Err(BookingError::RescheduleWindowClosed {
                minimum_hours: booking_type.min_advance_hours(),
            });
        }

        let limit = if is_client {
            scheduling.client_reschedule_limit
        } else {
            scheduling.staff_reschedule_limit
        };
        if booking.reschedule_count >= limit {
            return Err(BookingError::RescheduleLimitReached { limit });
        }

        let end = new_start + Duration::minutes(i64::from(duration_minutes));
        let preparation = preparation_lead(&self.settings.scheduling, booking_type);
        let window_start = preparation.map_or(new_start, |p| new_start - p);

        if let Some(conflict) = self
            .ports
            .slots
            .find_overlapping(booking.provider_id, window_start, end)
            .await?
            .into_iter()
            .find(|c| c.booking_id != Some(booking.id))
        {
            warn!(
                "New window {} - {} of {} conflicts with {:?}",
                window_start, end, booking.booking_number, conflict.booking_number
            );
            return Err(conflict.into());
        }

        self.check_schedule(booking.provider_id, new_start, end).await?;

        let (previous_start, previous_end) = (booking.start_time, booking.end_time);
        let moved = self
            .ports
            .bookings
            .apply_reschedule(&RescheduleRecord {
                booking_id,
                provider_id: booking.provider_id,
                expected_status: booking.status,
                expected_count: booking.reschedule_count,
                start_time: new_start,
                end_time: end,
                duration_minutes,
                slots: booking_slots(booking.provider_id, booking_id, new_start, end, preparation),
                rescheduled_at: now,
            })
            .await?;

        info!(
            "Booking {} moved from {} to {} (move {})",
            moved.booking_number, previous_start, moved.start_time, moved.reschedule_count
        );

        self.publish(
            BookingEvent::BookingRescheduled {
                previous_start,
                previous_end,
            },
            &moved,
        )
        .await;
        Ok(moved)
    }

    // ==================== Plain transitions ====================

    /// Provider accepts a pending booking
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn confirm_booking(&self, booking_id: Uuid, actor: Actor) -> BookingResult<Booking> {
        let now = self.ports.clock.now();
        let booking = self.get_booking(booking_id).await?;
        Self::authorize_provider_side(&booking, actor, "confirm")?;

        if booking.status != BookingStatus::Pending {
            return Err(BookingError::InvalidTransition {
                status: booking.status,
                operation: "confirm",
            });
        }
        if booking.start_time <= now {
            return Err(BookingError::StartInPast {
                start: booking.start_time,
            });
        }

        let booking = self
            .ports
            .bookings
            .transition_status(&StatusChange {
                booking_id,
                expected_status: BookingStatus::Pending,
                new_status: BookingStatus::Confirmed,
                at: now,
            })
            .await?;

        info!("Booking {} confirmed", booking.booking_number);
        self.publish(BookingEvent::BookingConfirmed, &booking).await;
        Ok(booking)
    }

    /// Provider begins delivering a confirmed booking
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn start_booking(&self, booking_id: Uuid, actor: Actor) -> BookingResult<Booking> {
        let now = self.ports.clock.now();
        let booking = self.get_booking(booking_id).await?;
        Self::authorize_provider_side(&booking, actor, "start")?;

        if booking.status != BookingStatus::Confirmed {
            return Err(BookingError::InvalidTransition {
                status: booking.status,
                operation: "start",
            });
        }

        let booking = self
            .ports
            .bookings
            .transition_status(&StatusChange {
                booking_id,
                expected_status: BookingStatus::Confirmed,
                new_status: BookingStatus::InProgress,
                at: now,
            })
            .await?;

        info!("Booking {} started", booking.booking_number);
        self.publish(BookingEvent::BookingStarted, &booking).await;
        Ok(booking)
    }

    // ==================== Cancellation ====================

    /// Cancel a booking, charge the fee and refund the rest
    ///
    /// `force` skips the status and notice checks (used by staff and bulk
    /// cancellation) but never reopens a terminal booking.
    #[instrument(skip(self, actor, reason), fields(actor_id = %actor.user_id))]
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        actor: Actor,
        reason: &str,
        force: bool,
    ) -> BookingResult<CancellationResult> {
        let now = self.ports.clock.now();
        let booking = self.get_booking(booking_id).await?;

        let is_client = booking.is_client(actor.user_id);
        if !is_client && !booking.is_provider(actor.user_id) && !actor.role.is_privileged() {
            warn!(
                "User {} tried to cancel booking {}",
                actor.user_id, booking.booking_number
            );
            return Err(BookingError::Forbidden {
                actor_id: actor.user_id,
                booking_number: booking.booking_number,
                operation: "cancel",
            });
        }

        if booking.status.is_terminal() {
            return Err(BookingError::InvalidTransition {
                status: booking.status,
                operation: "cancel",
            });
        }

        let side = if is_client {
            CancellationSide::Client
        } else {
            CancellationSide::Provider
        };

        if !force {
            if !booking.status.can_be_cancelled() {
                return Err(BookingError::InvalidTransition {
                    status: booking.status,
                    operation: "cancel",
                });
            }

            let minimum_hours = match side {
                CancellationSide::Client => booking.booking_type.min_advance_hours(),
                CancellationSide::Provider => self.settings.cancellation.provider_min_notice_hours,
            };
            if booking.time_until_start(now) < Duration::hours(minimum_hours) {
                warn!(
                    "Cancellation of {} by {} side is too late",
                    booking.booking_number, side
                );
                return Err(BookingError::CancellationWindowClosed { minimum_hours });
            }
        }

        let fee = self.policy.compute_fee(&booking, side, now);
        let new_status = match side {
            CancellationSide::Client => BookingStatus::CancelledByClient,
            CancellationSide::Provider => BookingStatus::CancelledByProvider,
        };

        let mut cancelled = self
            .ports
            .bookings
            .apply_cancellation(&CancellationRecord {
                booking_id,
                expected_status: booking.status,
                new_status,
                cancelled_at: now,
                cancelled_by: actor.user_id,
                reason: reason.to_string(),
                fee_amount: fee.amount,
                fee_percent: fee.percent_applied,
            })
            .await?;

        info!(
            "Booking {} cancelled by {} side, fee {} ({}%)",
            cancelled.booking_number, side, fee.amount, fee.percent_applied
        );

        let refund = self.refunds.execute(&cancelled, fee.amount).await;
        if let Err(e) = self
            .ports
            .bookings
            .record_refund_outcome(booking_id, &refund)
            .await
        {
            error!(
                "Failed to record refund outcome {} for booking {}: {}",
                refund.kind(),
                cancelled.booking_number,
                e
            );
        }
        cancelled.refund_outcome = Some(refund.clone());

        self.publish(
            BookingEvent::BookingCancelled {
                actor_id: actor.user_id,
                side,
                fee: fee.amount,
                refund_outcome: refund.clone(),
            },
            &cancelled,
        )
        .await;

        if fee.amount > self.settings.cancellation.high_fee_alert_threshold {
            self.publish(
                BookingEvent::HighFeeCancellation {
                    actor_id: actor.user_id,
                    fee: fee.amount,
                },
                &cancelled,
            )
            .await;
        }

        Ok(CancellationResult {
            booking: cancelled,
            side,
            fee,
            refund,
        })
    }

    /// Force-cancel several bookings independently
    #[instrument(skip(self, booking_ids, actor, reason), fields(count = booking_ids.len()))]
    pub async fn bulk_cancel(
        &self,
        booking_ids: &[Uuid],
        actor: Actor,
        reason: &str,
    ) -> BulkCancelReport {
        let results = join_all(
            booking_ids
                .iter()
                .map(|id| self.cancel_booking(*id, actor, reason, true)),
        )
        .await;

        let mut report = BulkCancelReport::default();
        for (booking_id, result) in booking_ids.iter().copied().zip(results) {
            match &result {
                Ok(done) => report.total_fees += done.fee.amount,
                Err(e) => warn!("Bulk cancel of {} failed: {}", booking_id, e),
            }
            report.items.push(BulkCancelItem { booking_id, result });
        }

        info!(
            "Bulk cancel: {} succeeded, {} failed, fees {}",
            report.succeeded(),
            report.failed(),
            report.total_fees
        );
        report
    }

    // ==================== Completion ====================

    /// Close a delivered booking, update statistics and settle payment
    #[instrument(skip(self, actor, notes), fields(actor_id = %actor.user_id))]
    pub async fn complete_booking(
        &self,
        booking_id: Uuid,
        actor: Actor,
        quality: Option<i16>,
        notes: Option<String>,
    ) -> BookingResult<Booking> {
        let now = self.ports.clock.now();
        let booking = self.get_booking(booking_id).await?;
        Self::authorize_provider_side(&booking, actor, "complete")?;

        if !booking.status.can_complete() {
            return Err(BookingError::InvalidTransition {
                status: booking.status,
                operation: "complete",
            });
        }

        let early = self.settings.completion.early_completion_minutes;
        if now < booking.start_time - Duration::minutes(early) {
            return Err(BookingError::CompletionTooEarly { minutes: early });
        }

        if let Some(q) = quality {
            if !(1..=5).contains(&q) {
                return Err(BookingError::InvalidQuality(q));
            }
        }

        let amounts = completion_amounts(&self.settings.completion, booking.total_price, quality);

        let mut completed = self
            .ports
            .bookings
            .apply_completion(&CompletionRecord {
                booking_id,
                expected_status: booking.status,
                client_id: booking.client_id,
                provider_id: booking.provider_id,
                completed_at: now,
                quality,
                notes,
                bonuses: amounts.bonuses.clone(),
                client_spent: booking.total_price,
                provider_net_earnings: amounts.net_earnings,
                review_available_until: now
                    + Duration::days(self.settings.completion.review_window_days),
            })
            .await?;

        info!(
            "Booking {} completed, quality {:?}, provider net {}",
            completed.booking_number, quality, amounts.net_earnings
        );

        let settlement = self.settle(&completed, amounts.net_earnings).await;
        if let Err(e) = self
            .ports
            .bookings
            .record_settlement(booking_id, &settlement)
            .await
        {
            error!(
                "Failed to record settlement for booking {}: {}",
                completed.booking_number, e
            );
        }
        completed.settlement = Some(settlement);

        self.publish(
            BookingEvent::BookingCompleted {
                quality,
                bonuses: amounts.bonuses,
            },
            &completed,
        )
        .await;

        Ok(completed)
    }

    /// Capture the client's payment, then pay the provider
    async fn settle(&self, booking: &Booking, net: Decimal) -> SettlementOutcome {
        let reference = booking.booking_number.as_str();
        let mut errors = Vec::new();

        let captured = match self.ports.gateway.capture_payment(reference).await {
            Ok(()) => true,
            Err(e) => {
                error!("Payment capture failed for booking {}: {}", reference, e);
                errors.push(format!("capture: {}", e));
                false
            }
        };

        let transferred = captured
            && match self.ports.gateway.transfer_to_provider(reference, net).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        "Provider transfer of {} failed for booking {}: {}",
                        net, reference, e
                    );
                    errors.push(format!("transfer: {}", e));
                    false
                }
            };

        SettlementOutcome {
            captured,
            transferred,
            provider_net_amount: net,
            errors,
        }
    }

    // ==================== Calendar blocks ====================

    /// Reserve provider time that cannot be booked
    #[instrument(skip(self, actor, notes), fields(actor_id = %actor.user_id))]
    pub async fn block_time(
        &self,
        provider_id: Uuid,
        actor: Actor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notes: Option<String>,
    ) -> BookingResult<TimeSlot> {
        Self::authorize_calendar(provider_id, actor)?;

        if end <= start {
            return Err(BookingError::Validation(
                "Block end must be after its start".to_string(),
            ));
        }
        if start < self.ports.clock.now() {
            return Err(BookingError::StartInPast { start });
        }
        if !self.ports.catalog.user_exists(provider_id).await? {
            return Err(BookingError::ProviderNotFound(provider_id));
        }

        let mut slot = TimeSlot::new(provider_id, None, start, end, SlotKind::Blocked);
        slot.notes = notes;

        let slot = self.ports.slots.reserve_slot(&slot).await?;
        info!("Provider {} blocked {} - {}", provider_id, start, end);
        Ok(slot)
    }

    /// Remove a provider block
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn unblock_time(&self, slot_id: Uuid, actor: Actor) -> BookingResult<()> {
        let slot = self
            .ports
            .slots
            .find_slot(slot_id)
            .await?
            .filter(|s| s.kind == SlotKind::Blocked)
            .ok_or(BookingError::SlotNotFound(slot_id))?;

        Self::authorize_calendar(slot.provider_id, actor)?;

        if !self.ports.slots.release_slot(slot_id).await? {
            return Err(BookingError::SlotNotFound(slot_id));
        }

        info!("Provider {} unblocked slot {}", slot.provider_id, slot_id);
        Ok(())
    }

    // ==================== Refunds ====================

    /// Standalone refund of a payment
    pub async fn refund_payment(&self, request: &RefundRequest) -> BookingResult<RefundReceipt> {
        self.refunds
            .refund_payment(request, self.ports.clock.now())
            .await
    }

    // ==================== Helpers ====================

    fn authorize_provider_side(
        booking: &Booking,
        actor: Actor,
        operation: &'static str,
    ) -> BookingResult<()> {
        if booking.is_provider(actor.user_id) || actor.role.is_privileged() {
            return Ok(());
        }

        warn!(
            "User {} may not {} booking {}",
            actor.user_id, operation, booking.booking_number
        );
        Err(BookingError::Forbidden {
            actor_id: actor.user_id,
            booking_number: booking.booking_number.clone(),
            operation,
        })
    }

    fn authorize_calendar(provider_id: Uuid, actor: Actor) -> BookingResult<()> {
        if actor.user_id == provider_id || actor.role.is_privileged() {
            Ok(())
        } else {
            Err(BookingError::CalendarForbidden {
                actor_id: actor.user_id,
                provider_id,
            })
        }
    }

    /// Fire-and-forget notification
    async fn publish(&self, event: BookingEvent, booking: &Booking) {
        if let Err(e) = self.ports.notifier.notify(&event, booking).await {
            warn!(
                "Failed to publish {} for booking {}: {}",
                event.name(),
                booking.booking_number,
                e
            );
        }
    }
}
