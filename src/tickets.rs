//! Ticket mint.
//!
//! Produces the unique, printable, scannable references attached to each
//! rentable item on an entry:
//!
//! ```text
//! <PREFIX>-<driver8>-<event8>-<ms>-<rand6>
//! ```
//!
//! `PREFIX` identifies the item type (ENG, TYR, TRS, FUEL); `driver8` and
//! `event8` are sanitised 8-character prefixes of the owning identifiers;
//! `ms` is a per-mint monotonic millisecond timestamp; `rand6` carries just
//! over 30 bits of entropy. The whole string is uppercase alphanumeric with
//! hyphens, safe for Code 39. The coordinator persists references as minted
//! and never regenerates them; uniqueness is this module's responsibility.

use crate::types::{DriverId, EventId, RentalItem};
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};

/// Alphabet for the random component: uppercase alphanumerics, 36 symbols.
const RAND_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random component. 36^6 is a little over 2^31.
const RAND_LEN: usize = 6;

/// Ticket reference mint.
///
/// The millisecond component is bumped monotonically within the process, so
/// two mints in the same clock millisecond still differ even before the
/// random component is considered.
#[derive(Debug, Default)]
pub struct TicketMint {
    last_ms: AtomicI64,
}

impl TicketMint {
    /// Create a mint.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_ms: AtomicI64::new(0),
        }
    }

    /// Mint a reference for one item on one entry.
    #[must_use]
    pub fn mint(&self, item: RentalItem, driver_id: &DriverId, event_id: &EventId) -> String {
        let ms = self.next_timestamp_ms();
        let mut rng = rand::thread_rng();
        let rand: String = (0..RAND_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..RAND_ALPHABET.len());
                RAND_ALPHABET[idx] as char
            })
            .collect();
        format!(
            "{}-{}-{}-{ms}-{rand}",
            item.ticket_prefix(),
            id_prefix(driver_id.as_str()),
            id_prefix(event_id.as_str()),
        )
    }

    /// Strictly increasing millisecond timestamp.
    ///
    /// Also used for the timestamp component of payment references, so two
    /// initiations in the same clock millisecond still get distinct
    /// references.
    pub fn next_timestamp_ms(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_ms.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self.last_ms.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Uppercase alphanumeric prefix of an identifier, at most 8 characters.
fn id_prefix(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(8)
        .collect();
    if cleaned.is_empty() {
        "X".to_string()
    } else {
        cleaned
    }
}
