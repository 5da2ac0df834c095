//! Default notification adapter
//!
//! Writes one structured log line per booking event. Delivery to users (push,
//! e-mail) belongs to the embedding application, which supplies its own
//! [`NotificationPort`].

use async_trait::async_trait;
use booking_core::models::{Booking, BookingEvent};
use booking_core::traits::NotificationPort;
use booking_core::BookingResult;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn notify(&self, event: &BookingEvent, booking: &Booking) -> BookingResult<()> {
        match event {
            BookingEvent::BookingCancelled {
                actor_id,
                side,
                fee,
                refund_outcome,
            } => info!(
                event = event.name(),
                booking_number = %booking.booking_number,
                client_id = %booking.client_id,
                provider_id = %booking.provider_id,
                actor_id = %actor_id,
                side = %side,
                fee = %fee,
                refund = refund_outcome.kind(),
                "Booking cancelled"
            ),
            BookingEvent::BookingRescheduled {
                previous_start,
                previous_end,
            } => info!(
                event = event.name(),
                booking_number = %booking.booking_number,
                provider_id = %booking.provider_id,
                from_start = %previous_start,
                from_end = %previous_end,
                start_time = %booking.start_time,
                end_time = %booking.end_time,
                "Booking rescheduled"
            ),
            BookingEvent::HighFeeCancellation { actor_id, fee } => warn!(
                event = event.name(),
                booking_number = %booking.booking_number,
                actor_id = %actor_id,
                fee = %fee,
                "High cancellation fee"
            ),
            BookingEvent::BookingCompleted { quality, bonuses } => info!(
                event = event.name(),
                booking_number = %booking.booking_number,
                provider_id = %booking.provider_id,
                quality = ?quality,
                cashback = %bonuses.client_cashback,
                loyalty_points = bonuses.loyalty_points,
                "Booking completed"
            ),
            _ => info!(
                event = event.name(),
                booking_number = %booking.booking_number,
                client_id = %booking.client_id,
                provider_id = %booking.provider_id,
                status = %booking.status,
                start_time = %booking.start_time,
                "Booking event"
            ),
        }

        Ok(())
    }
}
