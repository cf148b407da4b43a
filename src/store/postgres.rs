//! `PostgreSQL`-backed store.
//!
//! All correctness-bearing writes go through single transactions; the
//! uniqueness constraints of the schema carry the idempotency guarantees
//! (`ON CONFLICT DO NOTHING` for retried inserts, conditional `UPDATE` for
//! the pending-to-completed transition).

use super::{EntryStore, PoolReconcileOutcome, RaceReconcileOutcome, Result, StoreError};
use crate::types::{
    ApprovalStatus, AuditRecord, DiscountCode, DiscountType, Driver, DriverId, EntryId,
    EntryStatus, EventId, FailedNotification, Money, PaymentLedgerRow, PaymentStatus,
    PoolEngineRental, RaceEntry, RaceEvent, RentalItem, TicketRefs,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;

/// Connection-pool settings for the store.
#[derive(Clone, Debug)]
pub struct PgStoreConfig {
    /// Connection URL.
    pub url: String,
    /// Maximum pool size.
    pub max_connections: u32,
    /// Minimum idle connections.
    pub min_connections: u32,
    /// Connect timeout in seconds.
    pub connect_timeout: u64,
}

/// `PostgreSQL` store.
#[derive(Clone)]
pub struct PgEntryStore {
    pool: PgPool,
}

impl PgEntryStore {
    /// Connect and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the database cannot be
    /// reached or a migration fails.
    pub async fn connect(config: &PgStoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(map_sqlx)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, tooling).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        self.pool.begin().await.map_err(map_sqlx)
    }

    /// Insert the ledger row inside a transaction; `false` on conflict.
    async fn tx_record_ledger(
        tx: &mut Transaction<'_, Postgres>,
        row: &PaymentLedgerRow,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO payment_ledger
               (pf_payment_id, payment_reference, amount_gross_cents, payment_status,
                payer_email, payer_first_name, payer_last_name, item_name, raw_payload,
                created_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (pf_payment_id) DO NOTHING",
        )
        .bind(&row.pf_payment_id)
        .bind(&row.payment_reference)
        .bind(row.amount_gross.cents())
        .bind(&row.payment_status)
        .bind(&row.payer_email)
        .bind(&row.payer_first_name)
        .bind(&row.payer_last_name)
        .bind(&row.item_name)
        .bind(&row.raw_payload)
        .bind(row.created_at)
        .bind(row.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn tx_append_audit(
        tx: &mut Transaction<'_, Postgres>,
        record: &AuditRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (at, action, actor, target, detail)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.at)
        .bind(&record.action)
        .bind(&record.actor)
        .bind(&record.target)
        .bind(&record.detail)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn tx_insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &RaceEntry,
        on_conflict_ignore: bool,
    ) -> Result<bool> {
        let clause = if on_conflict_ignore {
            "ON CONFLICT ON CONSTRAINT race_entries_driver_event_reference_key DO NOTHING"
        } else {
            ""
        };
        let sql = format!(
            "INSERT INTO race_entries
               (entry_id, driver_id, event_id, race_class, entry_items,
                amount_paid_cents, payment_reference, pf_payment_id, payment_status,
                entry_status, ticket_engine_ref, ticket_tyres_ref,
                ticket_transponder_ref, ticket_fuel_ref, team_code,
                created_at, updated_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                     $11, $12, $13, $14, $15, $16, $17, $18)
             {clause}"
        );
        let result = sqlx::query(&sql)
            .bind(entry.entry_id.as_str())
            .bind(entry.driver_id.as_str())
            .bind(entry.event_id.as_str())
            .bind(&entry.race_class)
            .bind(items_to_json(&entry.entry_items))
            .bind(entry.amount_paid.cents())
            .bind(&entry.payment_reference)
            .bind(entry.pf_payment_id.as_deref())
            .bind(entry.payment_status.as_str())
            .bind(entry.entry_status.as_str())
            .bind(entry.tickets.engine.as_deref())
            .bind(entry.tickets.tyres.as_deref())
            .bind(entry.tickets.transponder.as_deref())
            .bind(entry.tickets.fuel.as_deref())
            .bind(entry.team_code.as_deref())
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .bind(entry.completed_at)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EntryStore for PgEntryStore {
    async fn create_pending_entry(
        &self,
        entry: &RaceEntry,
        audit: &AuditRecord,
    ) -> Result<RaceEntry> {
        let mut tx = self.begin().await?;
        let inserted = Self::tx_insert_entry(&mut tx, entry, true).await?;
        if inserted {
            Self::tx_append_audit(&mut tx, audit).await?;
        }
        let row: EntryRow = sqlx::query_as(
            "SELECT * FROM race_entries
             WHERE driver_id = $1 AND event_id = $2 AND payment_reference = $3",
        )
        .bind(entry.driver_id.as_str())
        .bind(entry.event_id.as_str())
        .bind(&entry.payment_reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        row.try_into()
    }

    async fn insert_completed_entry(
        &self,
        entry: &RaceEntry,
        next_race_entry_status: Option<&str>,
        audit: &AuditRecord,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        Self::tx_insert_entry(&mut tx, entry, false).await?;
        if let Some(status) = next_race_entry_status {
            sqlx::query("UPDATE drivers SET next_race_entry_status = $2 WHERE driver_id = $1")
                .bind(entry.driver_id.as_str())
                .bind(status)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        Self::tx_append_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn reconcile_race_payment(
        &self,
        ledger: &PaymentLedgerRow,
        fallback: &RaceEntry,
        audit: &AuditRecord,
    ) -> Result<RaceReconcileOutcome> {
        let mut tx = self.begin().await?;

        if !Self::tx_record_ledger(&mut tx, ledger).await? {
            tx.commit().await.map_err(map_sqlx)?;
            return Ok(RaceReconcileOutcome::AlreadyRecorded);
        }

        let prior: Option<EntryRow> = sqlx::query_as(
            "SELECT * FROM race_entries WHERE payment_reference = $1 FOR UPDATE",
        )
        .bind(&ledger.payment_reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let outcome = match prior {
            Some(row) => {
                let prior: RaceEntry = row.try_into()?;
                if prior.payment_status == PaymentStatus::Pending {
                    sqlx::query(
                        "UPDATE race_entries
                         SET payment_status = $2, entry_status = $3, pf_payment_id = $4,
                             completed_at = $5, updated_at = $5
                         WHERE entry_id = $1",
                    )
                    .bind(prior.entry_id.as_str())
                    .bind(PaymentStatus::Completed.as_str())
                    .bind(EntryStatus::Confirmed.as_str())
                    .bind(&ledger.pf_payment_id)
                    .bind(Utc::now())
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                    RaceReconcileOutcome::CompletedPending {
                        prior: Box::new(prior),
                    }
                } else {
                    RaceReconcileOutcome::AlreadyTerminal
                }
            }
            None => match Self::tx_insert_entry(&mut tx, fallback, true).await? {
                true => RaceReconcileOutcome::Synthesised,
                false => RaceReconcileOutcome::AlreadyTerminal,
            },
        };

        Self::tx_append_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(outcome)
    }

    async fn reconcile_pool_payment(
        &self,
        ledger: &PaymentLedgerRow,
        rental: &PoolEngineRental,
        audit: &AuditRecord,
    ) -> Result<PoolReconcileOutcome> {
        let mut tx = self.begin().await?;

        if !Self::tx_record_ledger(&mut tx, ledger).await? {
            tx.commit().await.map_err(map_sqlx)?;
            return Ok(PoolReconcileOutcome::AlreadyRecorded);
        }

        sqlx::query(
            "INSERT INTO pool_engine_rentals
               (driver_id, championship_class, rental_type, season_year,
                payment_reference, pf_payment_id, payment_status, amount_paid_cents,
                created_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (driver_id, championship_class, rental_type, season_year)
             DO UPDATE SET
                 payment_status = EXCLUDED.payment_status,
                 pf_payment_id = COALESCE(pool_engine_rentals.pf_payment_id, EXCLUDED.pf_payment_id),
                 completed_at = COALESCE(pool_engine_rentals.completed_at, EXCLUDED.completed_at)",
        )
        .bind(rental.driver_id.as_str())
        .bind(&rental.championship_class)
        .bind(&rental.rental_type)
        .bind(rental.season_year)
        .bind(&rental.payment_reference)
        .bind(rental.pf_payment_id.as_deref())
        .bind(rental.payment_status.as_str())
        .bind(rental.amount_paid.cents())
        .bind(rental.created_at)
        .bind(rental.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("UPDATE drivers SET season_engine_rental = TRUE WHERE driver_id = $1")
            .bind(rental.driver_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        Self::tx_append_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(PoolReconcileOutcome::Applied)
    }

    async fn record_payment_ledger(&self, row: &PaymentLedgerRow) -> Result<bool> {
        let mut tx = self.begin().await?;
        let inserted = Self::tx_record_ledger(&mut tx, row).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(inserted)
    }

    async fn update_entry(&self, entry: &RaceEntry, audit: &AuditRecord) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "UPDATE race_entries
             SET race_class = $2, entry_items = $3, amount_paid_cents = $4,
                 payment_status = $5, entry_status = $6,
                 ticket_engine_ref = $7, ticket_tyres_ref = $8,
                 ticket_transponder_ref = $9, ticket_fuel_ref = $10,
                 team_code = $11, updated_at = $12, completed_at = $13
             WHERE entry_id = $1",
        )
        .bind(entry.entry_id.as_str())
        .bind(&entry.race_class)
        .bind(items_to_json(&entry.entry_items))
        .bind(entry.amount_paid.cents())
        .bind(entry.payment_status.as_str())
        .bind(entry.entry_status.as_str())
        .bind(entry.tickets.engine.as_deref())
        .bind(entry.tickets.tyres.as_deref())
        .bind(entry.tickets.transponder.as_deref())
        .bind(entry.tickets.fuel.as_deref())
        .bind(entry.team_code.as_deref())
        .bind(Utc::now())
        .bind(entry.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("race entry {}", entry.entry_id),
            });
        }
        Self::tx_append_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn cancel_entry(
        &self,
        entry_id: &EntryId,
        expected: PaymentStatus,
        audit: &AuditRecord,
    ) -> Result<Option<RaceEntry>> {
        let mut tx = self.begin().await?;
        let row: Option<EntryRow> = sqlx::query_as(
            "UPDATE race_entries
             SET entry_status = $3, updated_at = $4
             WHERE entry_id = $1 AND payment_status = $2
             RETURNING *",
        )
        .bind(entry_id.as_str())
        .bind(expected.as_str())
        .bind(EntryStatus::Cancelled.as_str())
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let cancelled = match row {
            Some(row) => {
                Self::tx_append_audit(&mut tx, audit).await?;
                Some(row.try_into()?)
            }
            None => None,
        };
        tx.commit().await.map_err(map_sqlx)?;
        Ok(cancelled)
    }

    async fn entry_by_id(&self, entry_id: &EntryId) -> Result<Option<RaceEntry>> {
        let row: Option<EntryRow> =
            sqlx::query_as("SELECT * FROM race_entries WHERE entry_id = $1")
                .bind(entry_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn entry_by_reference(&self, payment_reference: &str) -> Result<Option<RaceEntry>> {
        let row: Option<EntryRow> =
            sqlx::query_as("SELECT * FROM race_entries WHERE payment_reference = $1")
                .bind(payment_reference)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn entries_for_driver(&self, driver_id: &DriverId) -> Result<Vec<RaceEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT * FROM race_entries WHERE driver_id = $1 ORDER BY created_at DESC",
        )
        .bind(driver_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn entries_for_event(&self, event_id: Option<&EventId>) -> Result<Vec<RaceEntry>> {
        let rows: Vec<EntryRow> = match event_id {
            Some(event_id) => {
                sqlx::query_as(
                    "SELECT * FROM race_entries WHERE event_id = $1 ORDER BY created_at DESC",
                )
                .bind(event_id.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as("SELECT * FROM race_entries ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn stale_pending_entries(&self, older_than: DateTime<Utc>) -> Result<Vec<RaceEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT * FROM race_entries
             WHERE payment_status = $1 AND created_at < $2
             ORDER BY created_at",
        )
        .bind(PaymentStatus::Pending.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_driver(&self, driver: &Driver) -> Result<()> {
        sqlx::query(
            "INSERT INTO drivers
               (driver_id, first_name, last_name, email, date_of_birth, nationality,
                gender, championship, race_class, race_number, team_name, coach_name,
                kart_brand, transponder_number, contact_name, contact_phone,
                contact_relationship, media_release_consent, approval_status,
                password_hash, reset_token_hash, reset_token_expires,
                season_engine_rental, next_race_entry_status,
                next_race_engine_rental_status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                     $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)",
        )
        .bind(driver.driver_id.as_str())
        .bind(&driver.first_name)
        .bind(&driver.last_name)
        .bind(&driver.email)
        .bind(driver.date_of_birth)
        .bind(&driver.nationality)
        .bind(&driver.gender)
        .bind(&driver.championship)
        .bind(&driver.race_class)
        .bind(&driver.race_number)
        .bind(&driver.team_name)
        .bind(&driver.coach_name)
        .bind(&driver.kart_brand)
        .bind(&driver.transponder_number)
        .bind(&driver.contact_name)
        .bind(&driver.contact_phone)
        .bind(&driver.contact_relationship)
        .bind(driver.media_release_consent)
        .bind(driver.approval_status.as_str())
        .bind(&driver.password_hash)
        .bind(driver.reset_token_hash.as_deref())
        .bind(driver.reset_token_expires)
        .bind(driver.season_engine_rental)
        .bind(driver.next_race_entry_status.as_deref())
        .bind(driver.next_race_engine_rental_status.as_deref())
        .bind(driver.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn driver_by_id(&self, driver_id: &DriverId) -> Result<Option<Driver>> {
        let row: Option<DriverRow> =
            sqlx::query_as("SELECT * FROM drivers WHERE driver_id = $1")
                .bind(driver_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn driver_by_email(&self, email: &str) -> Result<Option<Driver>> {
        let row: Option<DriverRow> =
            sqlx::query_as("SELECT * FROM drivers WHERE lower(email) = lower($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_driver_password(
        &self,
        driver_id: &DriverId,
        password_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE drivers
             SET password_hash = $2, reset_token_hash = NULL, reset_token_expires = NULL
             WHERE driver_id = $1",
        )
        .bind(driver_id.as_str())
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        driver_id: &DriverId,
        token_hash: Option<&str>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE drivers SET reset_token_hash = $2, reset_token_expires = $3
             WHERE driver_id = $1",
        )
        .bind(driver_id.as_str())
        .bind(token_hash)
        .bind(expires)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn set_driver_race_flags(
        &self,
        driver_id: &DriverId,
        next_race_entry_status: Option<&str>,
        next_race_engine_rental_status: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE drivers
             SET next_race_entry_status = COALESCE($2, next_race_entry_status),
                 next_race_engine_rental_status = COALESCE($3, next_race_engine_rental_status)
             WHERE driver_id = $1",
        )
        .bind(driver_id.as_str())
        .bind(next_race_entry_status)
        .bind(next_race_engine_rental_status)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_event(&self, event: &RaceEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO events
               (event_id, name, date, venue, registration_deadline, entry_fee_cents,
                class_fees, registration_open)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.event_id.as_str())
        .bind(&event.name)
        .bind(event.date)
        .bind(&event.venue)
        .bind(event.registration_deadline)
        .bind(event.entry_fee.cents())
        .bind(class_fees_to_json(&event.class_fees))
        .bind(event.registration_open)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_event(&self, event: &RaceEvent) -> Result<()> {
        let result = sqlx::query(
            "UPDATE events
             SET name = $2, date = $3, venue = $4, registration_deadline = $5,
                 entry_fee_cents = $6, class_fees = $7, registration_open = $8
             WHERE event_id = $1",
        )
        .bind(event.event_id.as_str())
        .bind(&event.name)
        .bind(event.date)
        .bind(&event.venue)
        .bind(event.registration_deadline)
        .bind(event.entry_fee.cents())
        .bind(class_fees_to_json(&event.class_fees))
        .bind(event.registration_open)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("event {}", event.event_id),
            });
        }
        Ok(())
    }

    async fn event_by_id(&self, event_id: &EventId) -> Result<Option<RaceEvent>> {
        let row: Option<EventRow> = sqlx::query_as("SELECT * FROM events WHERE event_id = $1")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_events(&self) -> Result<Vec<RaceEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as("SELECT * FROM events ORDER BY date")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn pool_rental_by_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<PoolEngineRental>> {
        let row: Option<RentalRow> =
            sqlx::query_as("SELECT * FROM pool_engine_rentals WHERE payment_reference = $1")
                .bind(payment_reference)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn ledger_by_pf_id(&self, pf_payment_id: &str) -> Result<Option<PaymentLedgerRow>> {
        let row: Option<LedgerRow> =
            sqlx::query_as("SELECT * FROM payment_ledger WHERE pf_payment_id = $1")
                .bind(pf_payment_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(row.map(Into::into))
    }

    async fn append_failed_notification(&self, record: &FailedNotification) -> Result<()> {
        sqlx::query(
            "INSERT INTO failed_notifications (failed_at, error, payload, headers)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(record.failed_at)
        .bind(&record.error)
        .bind(&record.payload)
        .bind(&record.headers)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        let mut tx = self.begin().await?;
        Self::tx_append_audit(&mut tx, record).await?;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn discount_by_code(&self, code: &str) -> Result<Option<DiscountCode>> {
        let row: Option<DiscountRow> =
            sqlx::query_as("SELECT * FROM discount_codes WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert_discount(&self, code: &DiscountCode) -> Result<()> {
        sqlx::query(
            "INSERT INTO discount_codes (code, discount_type, discount_value, is_active)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (code) DO UPDATE SET
                 discount_type = EXCLUDED.discount_type,
                 discount_value = EXCLUDED.discount_value,
                 is_active = EXCLUDED.is_active",
        )
        .bind(&code.code)
        .bind(code.discount_type.as_str())
        .bind(code.discount_value)
        .bind(code.is_active)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }
}

// ============================================================================
// Row types and conversions
// ============================================================================

#[derive(FromRow)]
struct EntryRow {
    entry_id: String,
    driver_id: String,
    event_id: String,
    race_class: String,
    entry_items: serde_json::Value,
    amount_paid_cents: i64,
    payment_reference: String,
    pf_payment_id: Option<String>,
    payment_status: String,
    entry_status: String,
    ticket_engine_ref: Option<String>,
    ticket_tyres_ref: Option<String>,
    ticket_transponder_ref: Option<String>,
    ticket_fuel_ref: Option<String>,
    team_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<EntryRow> for RaceEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Self {
            entry_id: EntryId::from(row.entry_id),
            driver_id: DriverId::from(row.driver_id),
            event_id: EventId::from(row.event_id),
            race_class: row.race_class,
            entry_items: items_from_json(&row.entry_items),
            amount_paid: Money::from_cents(row.amount_paid_cents),
            payment_reference: row.payment_reference,
            pf_payment_id: row.pf_payment_id,
            payment_status: PaymentStatus::parse(&row.payment_status).ok_or_else(|| {
                corrupt("race_entries.payment_status", &row.payment_status)
            })?,
            entry_status: EntryStatus::parse(&row.entry_status)
                .ok_or_else(|| corrupt("race_entries.entry_status", &row.entry_status))?,
            tickets: TicketRefs {
                engine: row.ticket_engine_ref,
                tyres: row.ticket_tyres_ref,
                transponder: row.ticket_transponder_ref,
                fuel: row.ticket_fuel_ref,
            },
            team_code: row.team_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct DriverRow {
    driver_id: String,
    first_name: String,
    last_name: String,
    email: String,
    date_of_birth: NaiveDate,
    nationality: String,
    gender: String,
    championship: String,
    race_class: String,
    race_number: String,
    team_name: String,
    coach_name: String,
    kart_brand: String,
    transponder_number: String,
    contact_name: String,
    contact_phone: String,
    contact_relationship: String,
    media_release_consent: bool,
    approval_status: String,
    password_hash: String,
    reset_token_hash: Option<String>,
    reset_token_expires: Option<DateTime<Utc>>,
    season_engine_rental: bool,
    next_race_entry_status: Option<String>,
    next_race_engine_rental_status: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DriverRow> for Driver {
    type Error = StoreError;

    fn try_from(row: DriverRow) -> Result<Self> {
        Ok(Self {
            driver_id: DriverId::from(row.driver_id),
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            date_of_birth: row.date_of_birth,
            nationality: row.nationality,
            gender: row.gender,
            championship: row.championship,
            race_class: row.race_class,
            race_number: row.race_number,
            team_name: row.team_name,
            coach_name: row.coach_name,
            kart_brand: row.kart_brand,
            transponder_number: row.transponder_number,
            contact_name: row.contact_name,
            contact_phone: row.contact_phone,
            contact_relationship: row.contact_relationship,
            media_release_consent: row.media_release_consent,
            approval_status: ApprovalStatus::parse(&row.approval_status)
                .ok_or_else(|| corrupt("drivers.approval_status", &row.approval_status))?,
            password_hash: row.password_hash,
            reset_token_hash: row.reset_token_hash,
            reset_token_expires: row.reset_token_expires,
            season_engine_rental: row.season_engine_rental,
            next_race_entry_status: row.next_race_entry_status,
            next_race_engine_rental_status: row.next_race_engine_rental_status,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct EventRow {
    event_id: String,
    name: String,
    date: NaiveDate,
    venue: String,
    registration_deadline: DateTime<Utc>,
    entry_fee_cents: i64,
    class_fees: serde_json::Value,
    registration_open: bool,
}

impl TryFrom<EventRow> for RaceEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            event_id: EventId::from(row.event_id),
            name: row.name,
            date: row.date,
            venue: row.venue,
            registration_deadline: row.registration_deadline,
            entry_fee: Money::from_cents(row.entry_fee_cents),
            class_fees: class_fees_from_json(&row.class_fees),
            registration_open: row.registration_open,
        })
    }
}

#[derive(FromRow)]
struct RentalRow {
    driver_id: String,
    championship_class: String,
    rental_type: String,
    season_year: i32,
    payment_reference: String,
    pf_payment_id: Option<String>,
    payment_status: String,
    amount_paid_cents: i64,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RentalRow> for PoolEngineRental {
    type Error = StoreError;

    fn try_from(row: RentalRow) -> Result<Self> {
        Ok(Self {
            driver_id: DriverId::from(row.driver_id),
            championship_class: row.championship_class,
            rental_type: row.rental_type,
            season_year: row.season_year,
            payment_reference: row.payment_reference,
            pf_payment_id: row.pf_payment_id,
            payment_status: PaymentStatus::parse(&row.payment_status).ok_or_else(|| {
                corrupt("pool_engine_rentals.payment_status", &row.payment_status)
            })?,
            amount_paid: Money::from_cents(row.amount_paid_cents),
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct LedgerRow {
    pf_payment_id: String,
    payment_reference: String,
    amount_gross_cents: i64,
    payment_status: String,
    payer_email: String,
    payer_first_name: String,
    payer_last_name: String,
    item_name: String,
    raw_payload: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<LedgerRow> for PaymentLedgerRow {
    fn from(row: LedgerRow) -> Self {
        Self {
            pf_payment_id: row.pf_payment_id,
            payment_reference: row.payment_reference,
            amount_gross: Money::from_cents(row.amount_gross_cents),
            payment_status: row.payment_status,
            payer_email: row.payer_email,
            payer_first_name: row.payer_first_name,
            payer_last_name: row.payer_last_name,
            item_name: row.item_name,
            raw_payload: row.raw_payload,
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(FromRow)]
struct DiscountRow {
    code: String,
    discount_type: String,
    discount_value: i64,
    is_active: bool,
}

impl TryFrom<DiscountRow> for DiscountCode {
    type Error = StoreError;

    fn try_from(row: DiscountRow) -> Result<Self> {
        Ok(Self {
            code: row.code,
            discount_type: DiscountType::parse(&row.discount_type)
                .ok_or_else(|| corrupt("discount_codes.discount_type", &row.discount_type))?,
            discount_value: row.discount_value,
            is_active: row.is_active,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Duplicate {
                constraint: db.constraint().unwrap_or("unique").to_string(),
            };
        }
    }
    StoreError::Unavailable(err.to_string())
}

fn corrupt(column: &str, value: &str) -> StoreError {
    StoreError::Unavailable(format!("corrupt {column}: {value:?}"))
}

fn items_to_json(items: &[RentalItem]) -> serde_json::Value {
    serde_json::Value::Array(
        items
            .iter()
            .map(|item| serde_json::Value::String(item.tag().to_string()))
            .collect(),
    )
}

/// Canonicalise `entry_items` on read.
///
/// Legacy rows stored the list either as a JSON array or as a JSON string
/// containing an array; both decode to the same `Vec<RentalItem>`. Unknown
/// tags are dropped.
fn items_from_json(value: &serde_json::Value) -> Vec<RentalItem> {
    let array = match value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::String(nested) => serde_json::from_str::<serde_json::Value>(nested)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    array
        .iter()
        .filter_map(|v| v.as_str().and_then(RentalItem::from_tag))
        .collect()
}

fn class_fees_to_json(fees: &HashMap<String, Money>) -> serde_json::Value {
    serde_json::Value::Object(
        fees.iter()
            .map(|(class, fee)| (class.clone(), serde_json::Value::from(fee.cents())))
            .collect(),
    )
}

fn class_fees_from_json(value: &serde_json::Value) -> HashMap<String, Money> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(class, fee)| {
                    fee.as_i64()
                        .map(|cents| (class.clone(), Money::from_cents(cents)))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn items_json_round_trip() {
        let items = vec![RentalItem::Engine, RentalItem::Tyres];
        assert_eq!(items_from_json(&items_to_json(&items)), items);
    }

    #[test]
    fn items_from_legacy_string_encoding() {
        let legacy = serde_json::Value::String("[\"engine\",\"fuel\"]".to_string());
        assert_eq!(
            items_from_json(&legacy),
            vec![RentalItem::Engine, RentalItem::Fuel]
        );
    }

    #[test]
    fn unknown_item_tags_are_dropped() {
        let value = serde_json::json!(["engine", "spoiler"]);
        assert_eq!(items_from_json(&value), vec![RentalItem::Engine]);
    }

    #[test]
    fn class_fees_round_trip() {
        let mut fees = HashMap::new();
        fees.insert("OK-J".to_string(), Money::from_cents(12_500));
        assert_eq!(class_fees_from_json(&class_fees_to_json(&fees)), fees);
    }
}
