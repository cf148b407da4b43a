//! In-memory store for tests.
//!
//! Mirrors the uniqueness and compare-and-set semantics of the `PostgreSQL`
//! implementation so the coordinator's reconciliation rules can be exercised
//! without a database. Not intended for production use.

use super::{EntryStore, PoolReconcileOutcome, RaceReconcileOutcome, Result, StoreError};
use crate::types::{
    AuditRecord, DiscountCode, Driver, DriverId, EntryId, EntryStatus, EventId,
    FailedNotification, PaymentLedgerRow, PaymentStatus, PoolEngineRental, RaceEntry, RaceEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    entries: Vec<RaceEntry>,
    drivers: HashMap<String, Driver>,
    events: HashMap<String, RaceEvent>,
    rentals: HashMap<(String, String, String, i32), PoolEngineRental>,
    ledger: HashMap<String, PaymentLedgerRow>,
    failed: Vec<FailedNotification>,
    audits: Vec<AuditRecord>,
    discounts: HashMap<String, DiscountCode>,
}

/// In-memory [`EntryStore`].
#[derive(Default)]
pub struct InMemoryEntryStore {
    inner: Mutex<Inner>,
}

impl InMemoryEntryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All audit records written so far (test assertions).
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.lock().audits.clone()
    }

    /// All failed notifications written so far (test assertions).
    #[must_use]
    pub fn failed_notifications(&self) -> Vec<FailedNotification> {
        self.lock().failed.clone()
    }

    /// All ledger rows written so far (test assertions).
    #[must_use]
    pub fn ledger_rows(&self) -> Vec<PaymentLedgerRow> {
        let mut rows: Vec<_> = self.lock().ledger.values().cloned().collect();
        rows.sort_by(|a, b| a.pf_payment_id.cmp(&b.pf_payment_id));
        rows
    }

    /// All entries, in insertion order (test assertions).
    #[must_use]
    pub fn all_entries(&self) -> Vec<RaceEntry> {
        self.lock().entries.clone()
    }

    /// All pool rentals (test assertions).
    #[must_use]
    pub fn all_rentals(&self) -> Vec<PoolEngineRental> {
        self.lock().rentals.values().cloned().collect()
    }

    fn unique_key(entry: &RaceEntry) -> (String, String, String) {
        (
            entry.driver_id.as_str().to_string(),
            entry.event_id.as_str().to_string(),
            entry.payment_reference.clone(),
        )
    }

    fn insert_entry_checked(inner: &mut Inner, entry: &RaceEntry) -> Result<()> {
        let key = Self::unique_key(entry);
        if inner.entries.iter().any(|e| Self::unique_key(e) == key) {
            return Err(StoreError::Duplicate {
                constraint: "race_entries_driver_event_reference_key".to_string(),
            });
        }
        inner.entries.push(entry.clone());
        Ok(())
    }

    fn record_ledger_checked(inner: &mut Inner, row: &PaymentLedgerRow) -> bool {
        if inner.ledger.contains_key(&row.pf_payment_id) {
            return false;
        }
        inner.ledger.insert(row.pf_payment_id.clone(), row.clone());
        true
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn create_pending_entry(
        &self,
        entry: &RaceEntry,
        audit: &AuditRecord,
    ) -> Result<RaceEntry> {
        let mut inner = self.lock();
        let key = Self::unique_key(entry);
        if let Some(existing) = inner.entries.iter().find(|e| Self::unique_key(e) == key) {
            return Ok(existing.clone());
        }
        inner.entries.push(entry.clone());
        inner.audits.push(audit.clone());
        Ok(entry.clone())
    }

    async fn insert_completed_entry(
        &self,
        entry: &RaceEntry,
        next_race_entry_status: Option<&str>,
        audit: &AuditRecord,
    ) -> Result<()> {
        let mut inner = self.lock();
        Self::insert_entry_checked(&mut inner, entry)?;
        if let Some(status) = next_race_entry_status {
            if let Some(driver) = inner.drivers.get_mut(entry.driver_id.as_str()) {
                driver.next_race_entry_status = Some(status.to_string());
            }
        }
        inner.audits.push(audit.clone());
        Ok(())
    }

    async fn reconcile_race_payment(
        &self,
        ledger: &PaymentLedgerRow,
        fallback: &RaceEntry,
        audit: &AuditRecord,
    ) -> Result<RaceReconcileOutcome> {
        let mut inner = self.lock();
        if !Self::record_ledger_checked(&mut inner, ledger) {
            return Ok(RaceReconcileOutcome::AlreadyRecorded);
        }

        let position = inner
            .entries
            .iter()
            .position(|e| e.payment_reference == ledger.payment_reference);
        let outcome = match position {
            Some(index) => {
                let existing = &mut inner.entries[index];
                if existing.payment_status == PaymentStatus::Pending {
                    let prior = existing.clone();
                    existing.payment_status = PaymentStatus::Completed;
                    existing.entry_status = EntryStatus::Confirmed;
                    existing.pf_payment_id = Some(ledger.pf_payment_id.clone());
                    existing.completed_at = Some(Utc::now());
                    existing.updated_at = Utc::now();
                    RaceReconcileOutcome::CompletedPending {
                        prior: Box::new(prior),
                    }
                } else {
                    RaceReconcileOutcome::AlreadyTerminal
                }
            }
            None => {
                if Self::insert_entry_checked(&mut inner, fallback).is_ok() {
                    RaceReconcileOutcome::Synthesised
                } else {
                    RaceReconcileOutcome::AlreadyTerminal
                }
            }
        };

        inner.audits.push(audit.clone());
        Ok(outcome)
    }

    async fn reconcile_pool_payment(
        &self,
        ledger: &PaymentLedgerRow,
        rental: &PoolEngineRental,
        audit: &AuditRecord,
    ) -> Result<PoolReconcileOutcome> {
        let mut inner = self.lock();
        if !Self::record_ledger_checked(&mut inner, ledger) {
            return Ok(PoolReconcileOutcome::AlreadyRecorded);
        }
        let key = (
            rental.driver_id.as_str().to_string(),
            rental.championship_class.clone(),
            rental.rental_type.clone(),
            rental.season_year,
        );
        inner
            .rentals
            .entry(key)
            .and_modify(|existing| {
                existing.payment_status = rental.payment_status;
                if existing.pf_payment_id.is_none() {
                    existing.pf_payment_id = rental.pf_payment_id.clone();
                }
                if existing.completed_at.is_none() {
                    existing.completed_at = rental.completed_at;
                }
            })
            .or_insert_with(|| rental.clone());
        if let Some(driver) = inner.drivers.get_mut(rental.driver_id.as_str()) {
            driver.season_engine_rental = true;
        }
        inner.audits.push(audit.clone());
        Ok(PoolReconcileOutcome::Applied)
    }

    async fn record_payment_ledger(&self, row: &PaymentLedgerRow) -> Result<bool> {
        let mut inner = self.lock();
        Ok(Self::record_ledger_checked(&mut inner, row))
    }

    async fn update_entry(&self, entry: &RaceEntry, audit: &AuditRecord) -> Result<()> {
        let mut inner = self.lock();
        let Some(existing) = inner
            .entries
            .iter_mut()
            .find(|e| e.entry_id == entry.entry_id)
        else {
            return Err(StoreError::NotFound {
                what: format!("race entry {}", entry.entry_id),
            });
        };
        *existing = entry.clone();
        existing.updated_at = Utc::now();
        inner.audits.push(audit.clone());
        Ok(())
    }

    async fn cancel_entry(
        &self,
        entry_id: &EntryId,
        expected: PaymentStatus,
        audit: &AuditRecord,
    ) -> Result<Option<RaceEntry>> {
        let mut inner = self.lock();
        let Some(existing) = inner
            .entries
            .iter_mut()
            .find(|e| &e.entry_id == entry_id && e.payment_status == expected)
        else {
            return Ok(None);
        };
        existing.entry_status = EntryStatus::Cancelled;
        existing.updated_at = Utc::now();
        let cancelled = existing.clone();
        inner.audits.push(audit.clone());
        Ok(Some(cancelled))
    }

    async fn entry_by_id(&self, entry_id: &EntryId) -> Result<Option<RaceEntry>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .find(|e| &e.entry_id == entry_id)
            .cloned())
    }

    async fn entry_by_reference(&self, payment_reference: &str) -> Result<Option<RaceEntry>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .find(|e| e.payment_reference == payment_reference)
            .cloned())
    }

    async fn entries_for_driver(&self, driver_id: &DriverId) -> Result<Vec<RaceEntry>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| &e.driver_id == driver_id)
            .cloned()
            .collect())
    }

    async fn entries_for_event(&self, event_id: Option<&EventId>) -> Result<Vec<RaceEntry>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| event_id.is_none_or(|id| &e.event_id == id))
            .cloned()
            .collect())
    }

    async fn stale_pending_entries(&self, older_than: DateTime<Utc>) -> Result<Vec<RaceEntry>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.payment_status == PaymentStatus::Pending && e.created_at < older_than)
            .cloned()
            .collect())
    }

    async fn insert_driver(&self, driver: &Driver) -> Result<()> {
        let mut inner = self.lock();
        if inner
            .drivers
            .values()
            .any(|d| d.email.eq_ignore_ascii_case(&driver.email))
        {
            return Err(StoreError::Duplicate {
                constraint: "drivers_email_key".to_string(),
            });
        }
        inner
            .drivers
            .insert(driver.driver_id.as_str().to_string(), driver.clone());
        Ok(())
    }

    async fn driver_by_id(&self, driver_id: &DriverId) -> Result<Option<Driver>> {
        Ok(self.lock().drivers.get(driver_id.as_str()).cloned())
    }

    async fn driver_by_email(&self, email: &str) -> Result<Option<Driver>> {
        Ok(self
            .lock()
            .drivers
            .values()
            .find(|d| d.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_driver_password(
        &self,
        driver_id: &DriverId,
        password_hash: &str,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(driver) = inner.drivers.get_mut(driver_id.as_str()) {
            driver.password_hash = password_hash.to_string();
            driver.reset_token_hash = None;
            driver.reset_token_expires = None;
        }
        Ok(())
    }

    async fn set_reset_token(
        &self,
        driver_id: &DriverId,
        token_hash: Option<&str>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(driver) = inner.drivers.get_mut(driver_id.as_str()) {
            driver.reset_token_hash = token_hash.map(ToString::to_string);
            driver.reset_token_expires = expires;
        }
        Ok(())
    }

    async fn set_driver_race_flags(
        &self,
        driver_id: &DriverId,
        next_race_entry_status: Option<&str>,
        next_race_engine_rental_status: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(driver) = inner.drivers.get_mut(driver_id.as_str()) {
            if let Some(status) = next_race_entry_status {
                driver.next_race_entry_status = Some(status.to_string());
            }
            if let Some(status) = next_race_engine_rental_status {
                driver.next_race_engine_rental_status = Some(status.to_string());
            }
        }
        Ok(())
    }

    async fn insert_event(&self, event: &RaceEvent) -> Result<()> {
        self.lock()
            .events
            .insert(event.event_id.as_str().to_string(), event.clone());
        Ok(())
    }

    async fn update_event(&self, event: &RaceEvent) -> Result<()> {
        let mut inner = self.lock();
        if !inner.events.contains_key(event.event_id.as_str()) {
            return Err(StoreError::NotFound {
                what: format!("event {}", event.event_id),
            });
        }
        inner
            .events
            .insert(event.event_id.as_str().to_string(), event.clone());
        Ok(())
    }

    async fn event_by_id(&self, event_id: &EventId) -> Result<Option<RaceEvent>> {
        Ok(self.lock().events.get(event_id.as_str()).cloned())
    }

    async fn list_events(&self) -> Result<Vec<RaceEvent>> {
        let mut events: Vec<_> = self.lock().events.values().cloned().collect();
        events.sort_by_key(|e| e.date);
        Ok(events)
    }

    async fn pool_rental_by_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<PoolEngineRental>> {
        Ok(self
            .lock()
            .rentals
            .values()
            .find(|r| r.payment_reference == payment_reference)
            .cloned())
    }

    async fn ledger_by_pf_id(&self, pf_payment_id: &str) -> Result<Option<PaymentLedgerRow>> {
        Ok(self.lock().ledger.get(pf_payment_id).cloned())
    }

    async fn append_failed_notification(&self, record: &FailedNotification) -> Result<()> {
        self.lock().failed.push(record.clone());
        Ok(())
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        self.lock().audits.push(record.clone());
        Ok(())
    }

    async fn discount_by_code(&self, code: &str) -> Result<Option<DiscountCode>> {
        Ok(self.lock().discounts.get(code).cloned())
    }

    async fn upsert_discount(&self, code: &DiscountCode) -> Result<()> {
        self.lock().discounts.insert(code.code.clone(), code.clone());
        Ok(())
    }
}
