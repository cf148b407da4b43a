//! Payment reference grammar and classifier.
//!
//! A payment reference is the opaque correlator embedded in the gateway
//! handoff so the webhook can find the pre-existing pending row. Two
//! namespaces exist:
//!
//! ```text
//! RACE-<event_id>-<driver_id>-<timestamp_ms>
//! POOL-<class_tag>-<rental_type>-<driver_id>-<timestamp_ms>
//! ```
//!
//! Identifiers may themselves contain hyphens (e.g. `E-RED`, `D-001`); a
//! hyphenated driver identifier starts with a single-letter prefix segment,
//! which is what the parser anchors on when the interior is ambiguous.

use crate::types::{DriverId, EventId};
use std::fmt;

/// Classified payment reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentReference {
    /// Race-entry payment.
    Race {
        /// Event the entry targets.
        event_id: EventId,
        /// Paying driver.
        driver_id: DriverId,
        /// Initiation timestamp (millisecond epoch).
        timestamp_ms: i64,
    },
    /// Season-level pool engine rental payment.
    Pool {
        /// Championship class tag.
        class_tag: String,
        /// Rental type tag.
        rental_type: String,
        /// Paying driver.
        driver_id: DriverId,
        /// Initiation timestamp (millisecond epoch).
        timestamp_ms: i64,
    },
    /// Anything this back office did not issue.
    Unknown {
        /// The reference verbatim.
        raw: String,
    },
}

impl PaymentReference {
    /// Build a race reference string.
    #[must_use]
    pub fn race(event_id: &EventId, driver_id: &DriverId, timestamp_ms: i64) -> String {
        format!("RACE-{event_id}-{driver_id}-{timestamp_ms}")
    }

    /// Build a pool rental reference string.
    #[must_use]
    pub fn pool(
        class_tag: &str,
        rental_type: &str,
        driver_id: &DriverId,
        timestamp_ms: i64,
    ) -> String {
        format!("POOL-{class_tag}-{rental_type}-{driver_id}-{timestamp_ms}")
    }

    /// Classify a reference string.
    ///
    /// References the grammar cannot account for come back as
    /// [`PaymentReference::Unknown`]; the webhook path logs those as failed
    /// notifications rather than rejecting the delivery.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let unknown = || Self::Unknown {
            raw: raw.to_string(),
        };

        let parts: Vec<&str> = raw.split('-').collect();
        if parts.len() < 4 {
            return unknown();
        }

        let Some(timestamp_ms) = parse_timestamp(parts[parts.len() - 1]) else {
            return unknown();
        };
        let interior = &parts[1..parts.len() - 1];

        match parts[0] {
            "RACE" => {
                let Some((event, driver)) = split_event_driver(interior) else {
                    return unknown();
                };
                Self::Race {
                    event_id: EventId::from(event.as_str()),
                    driver_id: DriverId::from(driver.as_str()),
                    timestamp_ms,
                }
            }
            "POOL" => {
                if interior.len() < 3 {
                    return unknown();
                }
                Self::Pool {
                    class_tag: interior[0].to_string(),
                    rental_type: interior[1].to_string(),
                    driver_id: DriverId::from(interior[2..].join("-").as_str()),
                    timestamp_ms,
                }
            }
            _ => unknown(),
        }
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Race {
                event_id,
                driver_id,
                timestamp_ms,
            } => write!(f, "RACE-{event_id}-{driver_id}-{timestamp_ms}"),
            Self::Pool {
                class_tag,
                rental_type,
                driver_id,
                timestamp_ms,
            } => write!(f, "POOL-{class_tag}-{rental_type}-{driver_id}-{timestamp_ms}"),
            Self::Unknown { raw } => write!(f, "{raw}"),
        }
    }
}

/// Millisecond epoch: all digits, sane length.
fn parse_timestamp(segment: &str) -> Option<i64> {
    if segment.len() < 10 || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Split the interior segments of a race reference into `(event, driver)`.
///
/// Two segments split directly. Otherwise the driver identifier starts at
/// the leftmost interior single-letter segment; with no such marker the last
/// segment alone is the driver.
fn split_event_driver(interior: &[&str]) -> Option<(String, String)> {
    match interior.len() {
        0 | 1 => None,
        2 => Some((interior[0].to_string(), interior[1].to_string())),
        n => {
            let marker = (1..n).find(|&i| {
                interior[i].len() == 1 && interior[i].bytes().all(|b| b.is_ascii_alphabetic())
            });
            let split = marker.unwrap_or(n - 1);
            Some((interior[..split].join("-"), interior[split..].join("-")))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn classifies_plain_race_reference() {
        let reference = PaymentReference::race(
            &EventId::from("EVT2026R1"),
            &DriverId::from("DRV88"),
            1_700_000_000_000,
        );
        assert_eq!(
            PaymentReference::classify(&reference),
            PaymentReference::Race {
                event_id: EventId::from("EVT2026R1"),
                driver_id: DriverId::from("DRV88"),
                timestamp_ms: 1_700_000_000_000,
            }
        );
    }

    #[test]
    fn classifies_hyphenated_race_reference() {
        // Identifiers in the style of the admin exports: E-RED / D-001.
        let classified = PaymentReference::classify("RACE-E-RED-D-001-1700000000000");
        assert_eq!(
            classified,
            PaymentReference::Race {
                event_id: EventId::from("E-RED"),
                driver_id: DriverId::from("D-001"),
                timestamp_ms: 1_700_000_000_000,
            }
        );
    }

    #[test]
    fn classifies_hyphenated_event_plain_driver() {
        let classified = PaymentReference::classify("RACE-E-RED-DRV88-1700000000000");
        assert_eq!(
            classified,
            PaymentReference::Race {
                event_id: EventId::from("E-RED"),
                driver_id: DriverId::from("DRV88"),
                timestamp_ms: 1_700_000_000_000,
            }
        );
    }

    #[test]
    fn classifies_pool_reference() {
        let reference = PaymentReference::pool(
            "OKJ",
            "season",
            &DriverId::from("D-001"),
            1_700_000_000_000,
        );
        assert_eq!(
            PaymentReference::classify(&reference),
            PaymentReference::Pool {
                class_tag: "OKJ".to_string(),
                rental_type: "season".to_string(),
                driver_id: DriverId::from("D-001"),
                timestamp_ms: 1_700_000_000_000,
            }
        );
    }

    #[test]
    fn unknown_prefix_falls_back() {
        let classified = PaymentReference::classify("SHOP-E-RED-D-001-1700000000000");
        assert!(matches!(classified, PaymentReference::Unknown { .. }));
    }

    #[test]
    fn garbage_falls_back() {
        for raw in ["", "RACE", "RACE-E1-D1-notatimestamp", "RACE-E1-17000000000"] {
            assert!(
                matches!(
                    PaymentReference::classify(raw),
                    PaymentReference::Unknown { .. }
                ),
                "expected Unknown for {raw:?}"
            );
        }
    }

    #[test]
    fn display_round_trips() {
        let raw = "RACE-EVT1-DRV9-1700000000000";
        assert_eq!(PaymentReference::classify(raw).to_string(), raw);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any flat (hyphen-free) identifier pair survives the classifier.
        #[test]
        fn classifier_round_trips_flat_identifiers(
            event in "[A-Za-z0-9_]{1,12}",
            driver in "[A-Za-z0-9_]{1,12}",
            ts in 1_000_000_000_000_i64..9_999_999_999_999_i64,
        ) {
            let event_id = EventId::from(event.as_str());
            let driver_id = DriverId::from(driver.as_str());
            let reference = PaymentReference::race(&event_id, &driver_id, ts);
            prop_assert_eq!(
                PaymentReference::classify(&reference),
                PaymentReference::Race {
                    event_id,
                    driver_id,
                    timestamp_ms: ts,
                }
            );
        }

        /// Pool references round-trip for flat identifiers too.
        #[test]
        fn pool_classifier_round_trips(
            class in "[A-Za-z0-9_]{1,8}",
            rental in "[A-Za-z0-9_]{1,8}",
            driver in "[A-Za-z0-9_]{1,12}",
            ts in 1_000_000_000_000_i64..9_999_999_999_999_i64,
        ) {
            let driver_id = DriverId::from(driver.as_str());
            let reference = PaymentReference::pool(&class, &rental, &driver_id, ts);
            prop_assert_eq!(
                PaymentReference::classify(&reference),
                PaymentReference::Pool {
                    class_tag: class,
                    rental_type: rental,
                    driver_id,
                    timestamp_ms: ts,
                }
            );
        }
    }
}
