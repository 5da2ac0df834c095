//! Booking number generation
//!
//! Numbers look like `BK20261019-7Q2XKA`: a fixed prefix, the creation date
//! and a random upper-case suffix. Candidates are checked against the
//! repository; the unique index on `bookings.booking_number` catches the
//! remaining race.

use booking_core::traits::BookingRepository;
use booking_core::{BookingError, BookingResult};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, error};

use crate::constants::{BOOKING_NUMBER_ALPHABET, BOOKING_NUMBER_PREFIX, BOOKING_NUMBER_SUFFIX_LEN};

pub struct BookingNumberGenerator {
    bookings: Arc<dyn BookingRepository>,
    max_attempts: u32,
}

impl BookingNumberGenerator {
    pub fn new(bookings: Arc<dyn BookingRepository>, max_attempts: u32) -> Self {
        Self {
            bookings,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Random candidate for the given creation instant
    pub fn candidate(now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..BOOKING_NUMBER_SUFFIX_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..BOOKING_NUMBER_ALPHABET.len());
                BOOKING_NUMBER_ALPHABET[idx] as char
            })
            .collect();

        format!("{}{}-{}", BOOKING_NUMBER_PREFIX, now.format("%Y%m%d"), suffix)
    }

    /// Whether `number` has the `BK<yyyymmdd>-<suffix>` shape
    pub fn is_well_formed(number: &str) -> bool {
        let Some(rest) = number.strip_prefix(BOOKING_NUMBER_PREFIX) else {
            return false;
        };
        let Some((date, suffix)) = rest.split_once('-') else {
            return false;
        };

        date.len() == 8
            && date.bytes().all(|b| b.is_ascii_digit())
            && suffix.len() == BOOKING_NUMBER_SUFFIX_LEN
            && suffix.bytes().all(|b| BOOKING_NUMBER_ALPHABET.contains(&b))
    }

    /// Produce a number not yet used by any booking
    pub async fn generate(&self, now: DateTime<Utc>) -> BookingResult<String> {
        for attempt in 1..=self.max_attempts {
            let candidate = Self::candidate(now);
            if self.bookings.find_by_number(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            debug!("Booking number {} taken (attempt {})", candidate, attempt);
        }

        error!("No free booking number after {} attempts", self.max_attempts);
        Err(BookingError::BookingNumberExhausted(self.max_attempts))
    }
}
