//! Domain types for the race-entry back office.
//!
//! This module contains the value objects and entities shared by the store,
//! the entry coordinator, and the HTTP surface: identifiers, money, rental
//! items, race entries, drivers, events, the payment ledger, and the
//! append-only audit/failed-notification records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string.
            #[must_use]
            pub const fn new(id: String) -> Self {
                Self(id)
            }

            /// View the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the identifier, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id! {
    /// Unique identifier for a driver.
    ///
    /// Opaque, server-generated. Embedded verbatim in payment references.
    DriverId
}

opaque_id! {
    /// Unique identifier for a race event.
    EventId
}

opaque_id! {
    /// Unique identifier for a race entry.
    EntryId
}

impl EntryId {
    /// Generate a fresh random entry identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("ENT-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl DriverId {
    /// Generate a fresh random driver identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("DRV{}", uuid::Uuid::new_v4().simple()))
    }
}

impl EventId {
    /// Generate a fresh random event identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("EVT{}", uuid::Uuid::new_v4().simple()))
    }
}

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in integer cents.
///
/// All arithmetic happens in cents; the decimal rand representation exists
/// only at the gateway boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Create from integer cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Amount in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Saturating addition.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction, floored at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        let v = self.0.saturating_sub(other.0);
        Self(if v < 0 { 0 } else { v })
    }

    /// Decimal string with two fraction digits, e.g. `"149.00"`.
    ///
    /// This is the format the payment gateway expects in form fields.
    #[must_use]
    pub fn to_decimal_string(self) -> String {
        format!("{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }

    /// Parse a gateway decimal amount (`"149.00"`, `"149.5"`, `"149"`).
    ///
    /// # Errors
    ///
    /// Returns `None` when the string is not a non-negative decimal with at
    /// most two fraction digits.
    #[must_use]
    pub fn parse_decimal(s: &str) -> Option<Self> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let whole: i64 = whole.parse().ok()?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        Some(Self(whole.checked_mul(100)?.checked_add(frac_cents)?))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

// ============================================================================
// Rental items and ticket references
// ============================================================================

/// Optional rentable item on a race entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalItem {
    /// Pool engine for the race weekend.
    Engine,
    /// Tyre set.
    Tyres,
    /// Timing transponder.
    Transponder,
    /// Fuel allocation.
    Fuel,
}

impl RentalItem {
    /// All items, in canonical order.
    pub const ALL: [Self; 4] = [Self::Engine, Self::Tyres, Self::Transponder, Self::Fuel];

    /// Stable string tag used in `entry_items` and the store.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::Tyres => "tyres",
            Self::Transponder => "transponder",
            Self::Fuel => "fuel",
        }
    }

    /// Ticket reference prefix for this item.
    #[must_use]
    pub const fn ticket_prefix(self) -> &'static str {
        match self {
            Self::Engine => "ENG",
            Self::Tyres => "TYR",
            Self::Transponder => "TRS",
            Self::Fuel => "FUEL",
        }
    }

    /// Parse a stable string tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "engine" => Some(Self::Engine),
            "tyres" => Some(Self::Tyres),
            "transponder" => Some(Self::Transponder),
            "fuel" => Some(Self::Fuel),
            _ => None,
        }
    }

    /// Human-readable display name, as printed on tickets and exports.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Engine => "Pool Engine",
            Self::Tyres => "Tyre Set",
            Self::Transponder => "Transponder",
            Self::Fuel => "Fuel",
        }
    }
}

impl fmt::Display for RentalItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// The four per-item ticket reference slots of a race entry.
///
/// A slot is populated iff the corresponding item appears in `entry_items`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRefs {
    /// Engine ticket reference.
    pub engine: Option<String>,
    /// Tyre ticket reference.
    pub tyres: Option<String>,
    /// Transponder ticket reference.
    pub transponder: Option<String>,
    /// Fuel ticket reference.
    pub fuel: Option<String>,
}

impl TicketRefs {
    /// Empty slots (no items selected).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            engine: None,
            tyres: None,
            transponder: None,
            fuel: None,
        }
    }

    /// Reference for one item, if present.
    #[must_use]
    pub fn get(&self, item: RentalItem) -> Option<&str> {
        match item {
            RentalItem::Engine => self.engine.as_deref(),
            RentalItem::Tyres => self.tyres.as_deref(),
            RentalItem::Transponder => self.transponder.as_deref(),
            RentalItem::Fuel => self.fuel.as_deref(),
        }
    }

    /// Set the reference for one item.
    pub fn set(&mut self, item: RentalItem, reference: Option<String>) {
        match item {
            RentalItem::Engine => self.engine = reference,
            RentalItem::Tyres => self.tyres = reference,
            RentalItem::Transponder => self.transponder = reference,
            RentalItem::Fuel => self.fuel = reference,
        }
    }

    /// Iterate the populated `(item, reference)` pairs in canonical order.
    pub fn present(&self) -> impl Iterator<Item = (RentalItem, &str)> {
        RentalItem::ALL
            .into_iter()
            .filter_map(|item| self.get(item).map(|r| (item, r)))
    }
}

// ============================================================================
// Entry and payment state
// ============================================================================

/// Payment state of a race entry or pool rental.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Awaiting gateway notification.
    Pending,
    /// Payment confirmed by the gateway or an operator.
    Completed,
    /// Zero-amount entry via a free-type discount code.
    Free,
    /// Gateway reported a failure.
    Failed,
}

impl PaymentStatus {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Completed => "Completed",
            Self::Free => "Free",
            Self::Failed => "Failed",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Completed" => Some(Self::Completed),
            "Free" => Some(Self::Free),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Created at initiation, awaiting payment.
    PendingPayment,
    /// Payment completed or entry was free; the driver is on the list.
    Confirmed,
    /// Cancelled by an operator.
    Cancelled,
}

impl EntryStatus {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(Self::PendingPayment),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A driver's intent or confirmed participation in one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceEntry {
    /// Entry identifier.
    pub entry_id: EntryId,
    /// Owning driver.
    pub driver_id: DriverId,
    /// Target event.
    pub event_id: EventId,
    /// Championship class entered.
    pub race_class: String,
    /// Ordered list of selected rental items.
    pub entry_items: Vec<RentalItem>,
    /// Computed total, after discount.
    pub amount_paid: Money,
    /// Payment reference handed to the gateway (the webhook correlator).
    pub payment_reference: String,
    /// Gateway-assigned payment id, once known.
    pub pf_payment_id: Option<String>,
    /// Payment state.
    pub payment_status: PaymentStatus,
    /// Entry lifecycle state.
    pub entry_status: EntryStatus,
    /// Per-item ticket references.
    pub tickets: TicketRefs,
    /// Discount / promo code applied, if any.
    pub team_code: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Completion timestamp, once the payment completed.
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Drivers and events
// ============================================================================

/// Admin approval state of a driver registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Registered, awaiting admin review.
    Pending,
    /// Approved; the driver may log in and enter races.
    Approved,
    /// Rejected by an admin.
    Rejected,
}

impl ApprovalStatus {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A registered driver.
///
/// The entry coordinator reads identity fields and writes only
/// `season_engine_rental`, `next_race_entry_status` and
/// `next_race_engine_rental_status`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Driver {
    /// Driver identifier.
    pub driver_id: DriverId,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Login email (unique).
    pub email: String,
    /// Date of birth.
    pub date_of_birth: NaiveDate,
    /// Nationality.
    pub nationality: String,
    /// Gender as captured at registration.
    pub gender: String,
    /// Championship entered for the season.
    pub championship: String,
    /// Championship class.
    pub race_class: String,
    /// Race number.
    pub race_number: String,
    /// Team name.
    pub team_name: String,
    /// Coach name.
    pub coach_name: String,
    /// Kart brand.
    pub kart_brand: String,
    /// Transponder number.
    pub transponder_number: String,
    /// Emergency contact name.
    pub contact_name: String,
    /// Emergency contact phone.
    pub contact_phone: String,
    /// Emergency contact relationship.
    pub contact_relationship: String,
    /// Media release consent captured at registration.
    pub media_release_consent: bool,
    /// Admin approval state.
    pub approval_status: ApprovalStatus,
    /// Bcrypt password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Hash of the outstanding password reset token, if any.
    #[serde(skip_serializing)]
    pub reset_token_hash: Option<String>,
    /// Expiry of the outstanding password reset token.
    #[serde(skip_serializing)]
    pub reset_token_expires: Option<DateTime<Utc>>,
    /// Season-level pool engine rental purchased.
    pub season_engine_rental: bool,
    /// Entry status for the next race, denormalised for the dashboard.
    pub next_race_entry_status: Option<String>,
    /// Engine rental status for the next race, denormalised for the dashboard.
    pub next_race_engine_rental_status: Option<String>,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

/// A championship race event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceEvent {
    /// Event identifier.
    pub event_id: EventId,
    /// Display name.
    pub name: String,
    /// Race date.
    pub date: NaiveDate,
    /// Venue.
    pub venue: String,
    /// Last moment at which drivers may initiate entries.
    pub registration_deadline: DateTime<Utc>,
    /// Base entry fee.
    pub entry_fee: Money,
    /// Per-class overrides of the base fee.
    #[serde(default)]
    pub class_fees: HashMap<String, Money>,
    /// Whether drivers may initiate new paid entries.
    pub registration_open: bool,
}

impl RaceEvent {
    /// Base fee for a class: the per-class override when present, else the
    /// event fee.
    #[must_use]
    pub fn fee_for_class(&self, race_class: &str) -> Money {
        self.class_fees
            .get(race_class)
            .copied()
            .unwrap_or(self.entry_fee)
    }
}

// ============================================================================
// Pool engine rentals
// ============================================================================

/// A season-level pool engine rental purchase.
///
/// Keyed by `(driver_id, championship_class, rental_type, season_year)`;
/// disjoint from race entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolEngineRental {
    /// Owning driver.
    pub driver_id: DriverId,
    /// Championship class the rental applies to.
    pub championship_class: String,
    /// Rental type tag (e.g. `"season"`, `"half"`).
    pub rental_type: String,
    /// Season year.
    pub season_year: i32,
    /// Payment reference in the `POOL-` namespace.
    pub payment_reference: String,
    /// Gateway-assigned payment id, once known.
    pub pf_payment_id: Option<String>,
    /// Payment state.
    pub payment_status: PaymentStatus,
    /// Amount paid.
    pub amount_paid: Money,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Ledger, failure log, audit
// ============================================================================

/// Raw record of what the gateway said in one verified notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentLedgerRow {
    /// Gateway-assigned payment id (unique).
    pub pf_payment_id: String,
    /// Our payment reference, echoed back.
    pub payment_reference: String,
    /// Gross amount reported by the gateway.
    pub amount_gross: Money,
    /// Gateway payment status, verbatim.
    pub payment_status: String,
    /// Payer email.
    pub payer_email: String,
    /// Payer first name.
    pub payer_first_name: String,
    /// Payer last name.
    pub payer_last_name: String,
    /// Item name echoed by the gateway.
    pub item_name: String,
    /// Full verbatim payload snapshot.
    pub raw_payload: String,
    /// First-seen timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp reported or observed.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only record of a webhook whose processing raised an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedNotification {
    /// When processing failed.
    pub failed_at: DateTime<Utc>,
    /// Error summary.
    pub error: String,
    /// Full verbatim inbound payload.
    pub payload: String,
    /// Full inbound headers, one `name: value` per line.
    pub headers: String,
}

/// Append-only audit log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the action happened.
    pub at: DateTime<Utc>,
    /// Action tag, e.g. `"entry_initiated"`.
    pub action: String,
    /// Acting principal (driver id, `"admin"`, `"gateway"`, `"system"`).
    pub actor: String,
    /// Target identifier (entry id, payment reference, driver id).
    pub target: String,
    /// Free-form detail.
    pub detail: serde_json::Value,
}

// ============================================================================
// Discount codes
// ============================================================================

/// Kind of discount a code applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Percentage off the computed total.
    Percent,
    /// Fixed amount off the computed total.
    Fixed,
    /// Reduces the total to zero; routes to the free-entry path.
    Free,
}

impl DiscountType {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Percent => "percent",
            Self::Fixed => "fixed",
            Self::Free => "free",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percent" => Some(Self::Percent),
            "fixed" => Some(Self::Fixed),
            "free" => Some(Self::Free),
            _ => None,
        }
    }
}

/// A discount / promo code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscountCode {
    /// The code as typed by the driver.
    pub code: String,
    /// Kind of discount.
    pub discount_type: DiscountType,
    /// Percent (0–100) for `Percent`, cents for `Fixed`, ignored for `Free`.
    pub discount_value: i64,
    /// Whether the code is currently redeemable.
    pub is_active: bool,
}

impl DiscountCode {
    /// Apply the discount to a computed total.
    #[must_use]
    pub fn apply(&self, total: Money) -> Money {
        match self.discount_type {
            DiscountType::Free => Money::ZERO,
            DiscountType::Fixed => total.saturating_sub(Money::from_cents(self.discount_value)),
            DiscountType::Percent => {
                let pct = self.discount_value.clamp(0, 100);
                Money::from_cents(total.cents() - total.cents() * pct / 100)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn money_decimal_round_trip() {
        assert_eq!(Money::from_cents(14_900).to_decimal_string(), "149.00");
        assert_eq!(Money::from_cents(5).to_decimal_string(), "0.05");
        assert_eq!(Money::parse_decimal("149.00"), Some(Money::from_cents(14_900)));
        assert_eq!(Money::parse_decimal("149.5"), Some(Money::from_cents(14_950)));
        assert_eq!(Money::parse_decimal("149"), Some(Money::from_cents(14_900)));
        assert_eq!(Money::parse_decimal("-1.00"), None);
        assert_eq!(Money::parse_decimal("1.005"), None);
        assert_eq!(Money::parse_decimal(""), None);
    }

    #[test]
    fn rental_item_tags_round_trip() {
        for item in RentalItem::ALL {
            assert_eq!(RentalItem::from_tag(item.tag()), Some(item));
        }
        assert_eq!(RentalItem::from_tag("spoiler"), None);
    }

    #[test]
    fn ticket_refs_present_follows_items() {
        let mut refs = TicketRefs::none();
        refs.set(RentalItem::Engine, Some("ENG-X".to_string()));
        refs.set(RentalItem::Fuel, Some("FUEL-X".to_string()));
        let present: Vec<_> = refs.present().map(|(i, _)| i).collect();
        assert_eq!(present, vec![RentalItem::Engine, RentalItem::Fuel]);
    }

    #[test]
    fn discount_application() {
        let total = Money::from_cents(14_900);
        let free = DiscountCode {
            code: "k0k0r0".to_string(),
            discount_type: DiscountType::Free,
            discount_value: 0,
            is_active: true,
        };
        assert_eq!(free.apply(total), Money::ZERO);

        let fixed = DiscountCode {
            code: "less50".to_string(),
            discount_type: DiscountType::Fixed,
            discount_value: 5_000,
            is_active: true,
        };
        assert_eq!(fixed.apply(total), Money::from_cents(9_900));

        let percent = DiscountCode {
            code: "ten".to_string(),
            discount_type: DiscountType::Percent,
            discount_value: 10,
            is_active: true,
        };
        assert_eq!(percent.apply(total), Money::from_cents(13_410));
    }

    #[test]
    fn class_fee_override() {
        let mut event = RaceEvent {
            event_id: EventId::from("E_RED"),
            name: "Red Star Raceway".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            venue: "Red Star".to_string(),
            registration_deadline: Utc::now(),
            entry_fee: Money::from_cents(12_500),
            class_fees: HashMap::new(),
            registration_open: true,
        };
        assert_eq!(event.fee_for_class("OK-J"), Money::from_cents(12_500));
        event
            .class_fees
            .insert("Bambino".to_string(), Money::from_cents(9_000));
        assert_eq!(event.fee_for_class("Bambino"), Money::from_cents(9_000));
    }
}
