//! Booking price calculation
//!
//! Price = service price + delivery fee - discounts. Discounts are summed
//! first and then capped at `max_discount_percent` of the service price; the
//! total never goes below zero.

use booking_core::config::PricingConfig;
use booking_core::models::{percent_of, round_money, BookingCapabilities, BookingType, ServiceOffering};
use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// Request-dependent pricing inputs
#[derive(Debug, Clone)]
pub struct PricingContext {
    /// The client has never booked before
    pub is_first_booking: bool,
    pub start_time: DateTime<Utc>,
    /// Delivery fee quoted by the caller; the configured default otherwise
    pub delivery_fee: Option<Decimal>,
}

/// Priced booking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingResult {
    pub service_price: Decimal,
    pub delivery_fee: Decimal,
    pub discount_amount: Decimal,
    pub deposit_amount: Decimal,
    pub total_price: Decimal,
}

/// Stateless price calculator
#[derive(Debug, Clone)]
pub struct PricingCalculator {
    config: PricingConfig,
    timezone: Tz,
}

impl PricingCalculator {
    pub fn new(config: PricingConfig, timezone: Tz) -> Self {
        Self { config, timezone }
    }

    pub fn calculate(
        &self,
        service: &ServiceOffering,
        booking_type: BookingType,
        context: &PricingContext,
    ) -> PricingResult {
        let service_price = round_money(service.price);

        let delivery_fee = if booking_type.has_delivery_fee() {
            round_money(context.delivery_fee.unwrap_or(self.config.default_delivery_fee))
        } else {
            Decimal::ZERO
        };

        let deposit_amount = if booking_type.supports_prepayment() {
            percent_of(service_price, self.config.deposit_percent)
        } else {
            Decimal::ZERO
        };

        let discount_amount = self.discount(service_price, booking_type, context);

        let total_price = (service_price + delivery_fee - discount_amount).max(Decimal::ZERO);

        debug!(
            "Priced {} booking: service {}, delivery {}, discount {}, total {}",
            booking_type, service_price, delivery_fee, discount_amount, total_price
        );

        PricingResult {
            service_price,
            delivery_fee,
            discount_amount,
            deposit_amount,
            total_price: round_money(total_price),
        }
    }

    fn discount(
        &self,
        service_price: Decimal,
        booking_type: BookingType,
        context: &PricingContext,
    ) -> Decimal {
        let mut total = Decimal::ZERO;

        if context.is_first_booking {
            total += percent_of(service_price, self.config.first_booking_discount_percent);
        }

        total += match booking_type {
            BookingType::AtProviderLocation => self.config.at_provider_location_discount,
            BookingType::Remote => percent_of(service_price, self.config.remote_discount_percent),
            BookingType::Bundle => percent_of(service_price, self.config.bundle_discount_percent),
            BookingType::OnSite => Decimal::ZERO,
        };

        if self.is_weekday(context.start_time) {
            total += percent_of(service_price, self.config.weekday_discount_percent);
        }

        let ceiling = percent_of(service_price, self.config.max_discount_percent);
        round_money(total.min(ceiling).max(Decimal::ZERO))
    }

    fn is_weekday(&self, at: DateTime<Utc>) -> bool {
        !matches!(
            at.with_timezone(&self.timezone).weekday(),
            Weekday::Sat | Weekday::Sun
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn service(price: Decimal) -> ServiceOffering {
        ServiceOffering {
            id: Uuid::new_v4(),
            name: "Massage".to_string(),
            price,
            duration_minutes: Some(60),
        }
    }

    fn calculator() -> PricingCalculator {
        PricingCalculator::new(PricingConfig::default(), chrono_tz::UTC)
    }

    // 2026-03-07 is a Saturday, 2026-03-09 a Monday
    fn saturday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap()
    }

    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap()
    }

    fn context(first: bool, start: DateTime<Utc>) -> PricingContext {
        PricingContext {
            is_first_booking: first,
            start_time: start,
            delivery_fee: None,
        }
    }

    #[test]
    fn test_on_site_weekend_no_discount() {
        let result = calculator().calculate(
            &service(dec!(2000)),
            BookingType::OnSite,
            &context(false, saturday()),
        );

        assert_eq!(result.delivery_fee, dec!(500));
        assert_eq!(result.deposit_amount, dec!(600));
        assert_eq!(result.discount_amount, dec!(0));
        assert_eq!(result.total_price, dec!(2500));
    }

    #[test]
    fn test_caller_delivery_fee_wins() {
        let mut ctx = context(false, saturday());
        ctx.delivery_fee = Some(dec!(750));
        let result = calculator().calculate(&service(dec!(1000)), BookingType::OnSite, &ctx);

        assert_eq!(result.delivery_fee, dec!(750));
        assert_eq!(result.total_price, dec!(1750));
    }

    #[test]
    fn test_remote_has_no_delivery_or_deposit() {
        let result = calculator().calculate(
            &service(dec!(1000)),
            BookingType::Remote,
            &context(false, saturday()),
        );

        assert_eq!(result.delivery_fee, dec!(0));
        assert_eq!(result.deposit_amount, dec!(0));
        assert_eq!(result.discount_amount, dec!(50));
        assert_eq!(result.total_price, dec!(950));
    }

    #[test]
    fn test_discounts_sum_below_ceiling() {
        // 10% first + 15% bundle + 5% weekday = 30%
        let result = calculator().calculate(
            &service(dec!(1000)),
            BookingType::Bundle,
            &context(true, monday()),
        );

        assert_eq!(result.discount_amount, dec!(300));
        assert_eq!(result.deposit_amount, dec!(300));
        assert_eq!(result.total_price, dec!(700));
    }

    #[test]
    fn test_discount_ceiling_applies_after_sum() {
        // 200 flat + 30 (10%) + 15 (5%) = 245, capped at 40% of 300 = 120
        let result = calculator().calculate(
            &service(dec!(300)),
            BookingType::AtProviderLocation,
            &context(true, monday()),
        );

        assert_eq!(result.discount_amount, dec!(120));
        assert_eq!(result.total_price, dec!(180));
    }

    #[test]
    fn test_discount_never_exceeds_ceiling() {
        for price in [dec!(0), dec!(1), dec!(99.99), dec!(250), dec!(501), dec!(10000)] {
            for booking_type in [
                BookingType::OnSite,
                BookingType::AtProviderLocation,
                BookingType::Remote,
                BookingType::Bundle,
            ] {
                for start in [saturday(), monday()] {
                    let result =
                        calculator().calculate(&service(price), booking_type, &context(true, start));
                    assert!(result.discount_amount <= percent_of(price, dec!(40)));
                    assert!(result.total_price >= Decimal::ZERO);
                }
            }
        }
    }

    #[test]
    fn test_weekday_uses_scheduling_timezone() {
        // Sunday 23:00 UTC is already Monday in Moscow
        let start = Utc.with_ymd_and_hms(2026, 3, 8, 23, 0, 0).unwrap();
        let utc = calculator().calculate(&service(dec!(1000)), BookingType::OnSite, &context(false, start));
        let moscow = PricingCalculator::new(PricingConfig::default(), chrono_tz::Europe::Moscow)
            .calculate(&service(dec!(1000)), BookingType::OnSite, &context(false, start));

        assert_eq!(utc.discount_amount, dec!(0));
        assert_eq!(moscow.discount_amount, dec!(50));
    }
}
