//! Durable relational state.
//!
//! The store owns the uniqueness and referential invariants of the data
//! model: one entry per `(driver_id, event_id, payment_reference)`, one
//! ledger row per gateway payment id, append-only failure and audit logs.
//! All multi-row writes for a single business event happen in one
//! transaction; partial writes are never observable.
//!
//! [`EntryStore`] is the seam: [`postgres::PgEntryStore`] is the production
//! implementation, and `memory::InMemoryEntryStore` (feature `test-utils`)
//! mirrors the same uniqueness semantics for tests.

pub mod postgres;

#[cfg(feature = "test-utils")]
pub mod memory;

use crate::types::{
    AuditRecord, DiscountCode, Driver, EntryId, EventId, DriverId, FailedNotification,
    PaymentLedgerRow, PaymentStatus, PoolEngineRental, RaceEntry, RaceEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint would be violated.
    #[error("duplicate row: {constraint}")]
    Duplicate {
        /// The violated constraint, for operators.
        constraint: String,
    },

    /// A referenced row is absent.
    #[error("not found: {what}")]
    NotFound {
        /// What was being looked up.
        what: String,
    },

    /// Database communication failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether a single immediate retry is worth attempting.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Outcome of the atomic race-payment reconciliation write.
#[derive(Clone, Debug, PartialEq)]
pub enum RaceReconcileOutcome {
    /// The gateway payment id was already in the ledger; nothing changed.
    AlreadyRecorded,
    /// A pending row matched the reference and transitioned to completed.
    CompletedPending {
        /// The row as it was before the transition.
        prior: Box<RaceEntry>,
    },
    /// No row matched; the fallback entry was inserted as completed.
    Synthesised,
    /// A row existed but was already terminal; the write was a no-op.
    AlreadyTerminal,
}

/// Outcome of the atomic pool-rental reconciliation write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolReconcileOutcome {
    /// The gateway payment id was already in the ledger; nothing changed.
    AlreadyRecorded,
    /// The rental row was inserted or completed and the driver flagged.
    Applied,
}

/// Durable state operations.
///
/// Every method that mutates more than one row does so in a single
/// transaction.
#[async_trait]
pub trait EntryStore: Send + Sync {
    // ------------------------------------------------------------------
    // Race entries
    // ------------------------------------------------------------------

    /// Insert a pending entry together with its audit record.
    ///
    /// Idempotent under the `(driver, event, payment_reference)` constraint:
    /// on collision the existing row is returned unchanged and no audit is
    /// written.
    async fn create_pending_entry(
        &self,
        entry: &RaceEntry,
        audit: &AuditRecord,
    ) -> Result<RaceEntry>;

    /// Insert an entry directly in a completed or free state, optionally
    /// updating the driver's next-race status, with its audit record.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] when the uniqueness constraint is violated.
    async fn insert_completed_entry(
        &self,
        entry: &RaceEntry,
        next_race_entry_status: Option<&str>,
        audit: &AuditRecord,
    ) -> Result<()>;

    /// Atomically reconcile a completed race payment.
    ///
    /// In one transaction: record the ledger row (no-op when the gateway
    /// payment id was seen before, in which case nothing else happens),
    /// compare-and-set the pending row with this reference to completed, or
    /// insert `fallback` when no row matches, and append the audit record.
    async fn reconcile_race_payment(
        &self,
        ledger: &PaymentLedgerRow,
        fallback: &RaceEntry,
        audit: &AuditRecord,
    ) -> Result<RaceReconcileOutcome>;

    /// Atomically reconcile a completed pool-rental payment.
    ///
    /// In one transaction: record the ledger row (idempotent no-op as
    /// above), upsert the rental to completed, set the driver's
    /// `season_engine_rental` flag, and append the audit record.
    async fn reconcile_pool_payment(
        &self,
        ledger: &PaymentLedgerRow,
        rental: &PoolEngineRental,
        audit: &AuditRecord,
    ) -> Result<PoolReconcileOutcome>;

    /// Record a ledger row outside reconciliation (non-complete statuses).
    ///
    /// Returns `false` when the gateway payment id was already recorded.
    async fn record_payment_ledger(&self, row: &PaymentLedgerRow) -> Result<bool>;

    /// Overwrite a mutable entry row (admin edit) with its audit record.
    async fn update_entry(&self, entry: &RaceEntry, audit: &AuditRecord) -> Result<()>;

    /// Cancel an entry iff its payment status still matches `expected`.
    ///
    /// Returns the updated row, or `None` when no row was in the expected
    /// state (a concurrent writer won the race).
    async fn cancel_entry(
        &self,
        entry_id: &EntryId,
        expected: PaymentStatus,
        audit: &AuditRecord,
    ) -> Result<Option<RaceEntry>>;

    /// Look up an entry by id.
    async fn entry_by_id(&self, entry_id: &EntryId) -> Result<Option<RaceEntry>>;

    /// Look up an entry by payment reference.
    async fn entry_by_reference(&self, payment_reference: &str) -> Result<Option<RaceEntry>>;

    /// All entries of one driver, newest first.
    async fn entries_for_driver(&self, driver_id: &DriverId) -> Result<Vec<RaceEntry>>;

    /// All entries, optionally restricted to one event, newest first.
    async fn entries_for_event(&self, event_id: Option<&EventId>) -> Result<Vec<RaceEntry>>;

    /// Pending entries created before `older_than` (stale-entry sweep).
    async fn stale_pending_entries(&self, older_than: DateTime<Utc>) -> Result<Vec<RaceEntry>>;

    // ------------------------------------------------------------------
    // Drivers
    // ------------------------------------------------------------------

    /// Insert a new driver.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] when the email is already registered.
    async fn insert_driver(&self, driver: &Driver) -> Result<()>;

    /// Look up a driver by id.
    async fn driver_by_id(&self, driver_id: &DriverId) -> Result<Option<Driver>>;

    /// Look up a driver by login email.
    async fn driver_by_email(&self, email: &str) -> Result<Option<Driver>>;

    /// Replace a driver's password hash and clear any reset token.
    async fn update_driver_password(
        &self,
        driver_id: &DriverId,
        password_hash: &str,
    ) -> Result<()>;

    /// Set or clear the outstanding password-reset token.
    async fn set_reset_token(
        &self,
        driver_id: &DriverId,
        token_hash: Option<&str>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Update the denormalised next-race status fields.
    async fn set_driver_race_flags(
        &self,
        driver_id: &DriverId,
        next_race_entry_status: Option<&str>,
        next_race_engine_rental_status: Option<&str>,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Insert a new event.
    async fn insert_event(&self, event: &RaceEvent) -> Result<()>;

    /// Overwrite an event row.
    async fn update_event(&self, event: &RaceEvent) -> Result<()>;

    /// Look up an event by id.
    async fn event_by_id(&self, event_id: &EventId) -> Result<Option<RaceEvent>>;

    /// All events, by date.
    async fn list_events(&self) -> Result<Vec<RaceEvent>>;

    // ------------------------------------------------------------------
    // Pool rentals
    // ------------------------------------------------------------------

    /// Look up a pool rental by payment reference.
    async fn pool_rental_by_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<PoolEngineRental>>;

    // ------------------------------------------------------------------
    // Ledger, failure log, audit
    // ------------------------------------------------------------------

    /// Look up a ledger row by gateway payment id.
    async fn ledger_by_pf_id(&self, pf_payment_id: &str) -> Result<Option<PaymentLedgerRow>>;

    /// Append a failed-notification record. Never deleted.
    async fn append_failed_notification(&self, record: &FailedNotification) -> Result<()>;

    /// Append an audit record.
    async fn append_audit(&self, record: &AuditRecord) -> Result<()>;

    // ------------------------------------------------------------------
    // Discount codes
    // ------------------------------------------------------------------

    /// Look up a discount code.
    async fn discount_by_code(&self, code: &str) -> Result<Option<DiscountCode>>;

    /// Insert or replace a discount code (admin seeding).
    async fn upsert_discount(&self, code: &DiscountCode) -> Result<()>;
}
