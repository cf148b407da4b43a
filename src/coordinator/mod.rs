//! Entry coordinator.
//!
//! Owns the entry state machine and the reconciliation rules between
//! initiation, gateway notification, manual admin action, and the free-entry
//! shortcut. Correctness rests on the store's transactions and uniqueness
//! constraints; the coordinator keeps no in-process state beyond its
//! collaborators.
//!
//! The browser-redirect payment pattern is two-phase by nature: initiation
//! persists a pending row and returns the gateway form; completion happens
//! later, driven by the webhook or an operator. Nothing here ever awaits a
//! payment outcome inside the initiating request.

use crate::gateway::{GatewayAdapter, GatewayError, PaymentNotification, PaymentReference,
    RedirectForm, RedirectRequest};
use crate::mailer::Mailer;
use crate::store::{EntryStore, PoolReconcileOutcome, RaceReconcileOutcome, StoreError};
use crate::tickets::TicketMint;
use crate::types::{
    AuditRecord, DiscountCode, DiscountType, Driver, DriverId, EntryId, EntryStatus, EventId,
    Money, PaymentLedgerRow, PaymentStatus, PoolEngineRental, RaceEntry, RaceEvent, RentalItem,
    TicketRefs,
};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// The error taxonomy the core raises.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Malformed request; `field` names the offending input.
    #[error("validation failed on {field}: {message}")]
    ValidationFailed {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Referenced driver / event / entry absent.
    #[error("{what} not found")]
    NotFound {
        /// What was being looked up.
        what: String,
    },

    /// The event is not accepting driver-initiated entries.
    #[error("registration is closed for this event")]
    RegistrationClosed,

    /// A new insert would violate entry uniqueness.
    #[error("an entry for this driver, event and payment reference already exists")]
    DuplicateEntry,

    /// Webhook rejected before any state change.
    #[error("webhook signature invalid")]
    SignatureInvalid,

    /// An admin action attempted an illegal transition.
    #[error("payment state mismatch: {detail}")]
    PaymentStateMismatch {
        /// What was attempted.
        detail: String,
    },

    /// Discount code absent or inactive.
    #[error("discount code {code:?} is not valid")]
    DiscountInvalid {
        /// The code as submitted.
        code: String,
    },

    /// Outbound redirect could not be assembled.
    #[error("gateway redirect construction failed: {reason}")]
    GatewayConstructionFailed {
        /// What went wrong.
        reason: String,
    },

    /// Database communication failure after one retry.
    #[error("store unavailable: {reason}")]
    StoreUnavailable {
        /// Underlying failure.
        reason: String,
    },
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { .. } => Self::DuplicateEntry,
            StoreError::NotFound { what } => Self::NotFound { what },
            StoreError::Unavailable(reason) => Self::StoreUnavailable { reason },
        }
    }
}

impl From<GatewayError> for CoordinatorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::SignatureInvalid => Self::SignatureInvalid,
            GatewayError::ConstructionFailed { reason } => {
                Self::GatewayConstructionFailed { reason }
            }
            GatewayError::MalformedPayload { reason } => Self::ValidationFailed {
                field: "payload",
                message: reason,
            },
            GatewayError::MissingField { field } => Self::ValidationFailed {
                field: "payload",
                message: format!("missing field {field}"),
            },
        }
    }
}

/// Per-item rental fees.
#[derive(Clone, Copy, Debug)]
pub struct PricingConfig {
    /// Pool engine rental fee per event.
    pub engine_fee: Money,
    /// Tyre set fee.
    pub tyres_fee: Money,
    /// Transponder rental fee.
    pub transponder_fee: Money,
    /// Fuel allocation fee.
    pub fuel_fee: Money,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            engine_fee: Money::from_cents(1_500),
            tyres_fee: Money::from_cents(900),
            transponder_fee: Money::from_cents(600),
            fuel_fee: Money::from_cents(750),
        }
    }
}

impl PricingConfig {
    /// Fee for one rental item.
    #[must_use]
    pub const fn item_fee(&self, item: RentalItem) -> Money {
        match item {
            RentalItem::Engine => self.engine_fee,
            RentalItem::Tyres => self.tyres_fee,
            RentalItem::Transponder => self.transponder_fee,
            RentalItem::Fuel => self.fuel_fee,
        }
    }
}

/// A driver's entry request, as validated by the HTTP surface.
#[derive(Clone, Debug)]
pub struct EntryRequest {
    /// Requesting driver.
    pub driver_id: DriverId,
    /// Target event.
    pub event_id: EventId,
    /// Chosen class.
    pub race_class: String,
    /// Ordered selection of rental items.
    pub items: Vec<RentalItem>,
    /// Optional discount code.
    pub discount_code: Option<String>,
}

/// What initiation produced.
#[derive(Clone, Debug)]
pub enum InitiationOutcome {
    /// A pending entry and the gateway form the browser must POST.
    Redirect {
        /// The pending entry row.
        entry: RaceEntry,
        /// Signed gateway form.
        form: RedirectForm,
    },
    /// The discount routed the request to the free-entry path.
    Free {
        /// The confirmed free entry row.
        entry: RaceEntry,
    },
}

/// Admin reconciliation input (§ payment never notified).
#[derive(Clone, Debug)]
pub struct AdminReconcileRequest {
    /// Payment reference supplied by the operator.
    pub payment_reference: String,
    /// Payer email, if known.
    pub payer_email: String,
    /// Payer first name, if known.
    pub payer_first_name: String,
    /// Payer last name, if known.
    pub payer_last_name: String,
    /// Amount the operator reconciles.
    pub amount: Money,
    /// Gateway payment id, when the operator has it.
    pub pf_payment_id: Option<String>,
}

/// Retry a store call once when the failure looks transient.
macro_rules! retry_once {
    ($call:expr) => {{
        match $call {
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "transient store failure, retrying once");
                $call
            }
            other => other,
        }
    }};
}

/// The entry coordinator.
pub struct EntryCoordinator {
    store: Arc<dyn EntryStore>,
    mailer: Arc<dyn Mailer>,
    gateway: GatewayAdapter,
    mint: TicketMint,
    pricing: PricingConfig,
}

impl EntryCoordinator {
    /// Wire up the coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntryStore>,
        mailer: Arc<dyn Mailer>,
        gateway: GatewayAdapter,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            gateway,
            mint: TicketMint::new(),
            pricing,
        }
    }

    /// Read access to the store for the HTTP surface's query endpoints.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    /// Gateway adapter, used by the webhook handler for verification.
    #[must_use]
    pub const fn gateway(&self) -> &GatewayAdapter {
        &self.gateway
    }

    // ------------------------------------------------------------------
    // Initiation
    // ------------------------------------------------------------------

    /// Initiate a paid race entry.
    ///
    /// Persists a `(Pending, pending_payment)` row, dispatches the
    /// confirmation email (the primary receipt; it must survive webhook
    /// loss), and returns the signed gateway form. A zero total under a
    /// `free`-type discount routes to the free-entry path instead and
    /// produces no gateway redirect.
    ///
    /// Idempotent on the synthesised payment reference: re-running with the
    /// same reference returns the existing row and sends no second email.
    ///
    /// # Errors
    ///
    /// `NotFound`, `RegistrationClosed`, `ValidationFailed`,
    /// `DiscountInvalid`, `GatewayConstructionFailed`, `StoreUnavailable`.
    pub async fn initiate_paid_entry(&self, request: &EntryRequest) -> Result<InitiationOutcome> {
        let (driver, event) = self.load_driver_and_event(request).await?;
        if !event.registration_open || Utc::now() > event.registration_deadline {
            return Err(CoordinatorError::RegistrationClosed);
        }

        let discount = self.load_discount(request.discount_code.as_deref()).await?;
        let amount = self.compute_total(&event, &request.race_class, &request.items, discount.as_ref());

        if amount.is_zero() {
            if let Some(code) = discount.as_ref().filter(|c| c.discount_type == DiscountType::Free) {
                let entry = self
                    .complete_free_entry(&driver, &event, request, code)
                    .await?;
                return Ok(InitiationOutcome::Free { entry });
            }
        }

        let now = Utc::now();
        let reference =
            PaymentReference::race(&event.event_id, &driver.driver_id, self.mint.next_timestamp_ms());
        let entry = self.build_entry(
            request,
            reference.clone(),
            amount,
            PaymentStatus::Pending,
            EntryStatus::PendingPayment,
            now,
        );

        let audit = audit(
            "entry_initiated",
            driver.driver_id.as_str(),
            &reference,
            serde_json::json!({
                "event_id": event.event_id.as_str(),
                "race_class": request.race_class,
                "items": request.items.iter().map(|i| i.tag()).collect::<Vec<_>>(),
                "amount_cents": amount.cents(),
            }),
        );
        let stored = retry_once!(self.store.create_pending_entry(&entry, &audit).await)?;
        let fresh = stored.entry_id == entry.entry_id;

        let form = self.gateway.build_redirect(&RedirectRequest {
            payment_reference: stored.payment_reference.clone(),
            amount: stored.amount_paid,
            item_name: format!("Race entry: {}", event.name),
            item_description: format!(
                "{} entry for {} {}",
                stored.race_class, driver.first_name, driver.last_name
            ),
            payer_email: driver.email.clone(),
            payer_first_name: driver.first_name.clone(),
        })?;

        if fresh {
            metrics::counter!("raceday_entries_initiated_total").increment(1);
            self.send_entry_confirmation(&driver, &event, &stored).await;
        }

        tracing::info!(
            driver_id = %driver.driver_id,
            event_id = %event.event_id,
            payment_reference = %stored.payment_reference,
            amount = %stored.amount_paid,
            fresh,
            "race entry initiated"
        );
        Ok(InitiationOutcome::Redirect {
            entry: stored,
            form,
        })
    }

    /// Register a free race entry. The discount code must be active, of the
    /// `free` type, and reduce the total to zero.
    ///
    /// # Errors
    ///
    /// As [`Self::initiate_paid_entry`], plus `DiscountInvalid` when the code
    /// does not grant a free entry.
    pub async fn register_free_entry(&self, request: &EntryRequest) -> Result<RaceEntry> {
        let (driver, event) = self.load_driver_and_event(request).await?;
        if !event.registration_open || Utc::now() > event.registration_deadline {
            return Err(CoordinatorError::RegistrationClosed);
        }

        let Some(code) = self.load_discount(request.discount_code.as_deref()).await? else {
            return Err(CoordinatorError::ValidationFailed {
                field: "discount",
                message: "a free entry requires a discount code".to_string(),
            });
        };
        let amount = self.compute_total(&event, &request.race_class, &request.items, Some(&code));
        if code.discount_type != DiscountType::Free || !amount.is_zero() {
            return Err(CoordinatorError::DiscountInvalid { code: code.code });
        }

        self.complete_free_entry(&driver, &event, request, &code).await
    }

    async fn complete_free_entry(
        &self,
        driver: &Driver,
        event: &RaceEvent,
        request: &EntryRequest,
        code: &DiscountCode,
    ) -> Result<RaceEntry> {
        let now = Utc::now();
        let reference =
            PaymentReference::race(&event.event_id, &driver.driver_id, self.mint.next_timestamp_ms());
        let mut entry = self.build_entry(
            request,
            reference.clone(),
            Money::ZERO,
            PaymentStatus::Free,
            EntryStatus::Confirmed,
            now,
        );
        entry.team_code = Some(code.code.clone());
        entry.completed_at = Some(now);

        let audit = audit(
            "free_entry_completed",
            driver.driver_id.as_str(),
            &reference,
            serde_json::json!({
                "event_id": event.event_id.as_str(),
                "race_class": request.race_class,
                "team_code": code.code,
            }),
        );
        retry_once!(
            self.store
                .insert_completed_entry(&entry, Some(EntryStatus::Confirmed.as_str()), &audit)
                .await
        )?;

        metrics::counter!("raceday_free_entries_total").increment(1);
        self.send_entry_confirmation(driver, event, &entry).await;
        if let Err(error) = self
            .mailer
            .notify_admin(&format!(
                "Free entry: {} {} ({}) at {} via code {}",
                driver.first_name, driver.last_name, driver.driver_id, event.name, code.code
            ))
            .await
        {
            tracing::warn!(%error, "admin notification failed");
        }

        tracing::info!(
            driver_id = %driver.driver_id,
            event_id = %event.event_id,
            payment_reference = %entry.payment_reference,
            "free race entry completed"
        );
        Ok(entry)
    }

    // ------------------------------------------------------------------
    // Webhook reconciliation
    // ------------------------------------------------------------------

    /// Reconcile a signature-verified gateway notification.
    ///
    /// The caller has already passed the raw payload through the gateway
    /// adapter; unverified payloads never reach this method. Errors returned
    /// here are persisted by the webhook handler as failed notifications;
    /// the gateway still receives success, and operators reconcile from the
    /// log.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the store fails after one retry.
    pub async fn reconcile_webhook(&self, notification: &PaymentNotification) -> Result<()> {
        if !notification.is_complete() {
            let row = ledger_row(notification, None);
            let recorded = retry_once!(self.store.record_payment_ledger(&row).await)?;
            tracing::info!(
                payment_reference = %notification.payment_reference,
                payment_status = %notification.payment_status,
                recorded,
                "non-complete notification recorded"
            );
            return Ok(());
        }

        match notification.reference() {
            PaymentReference::Race {
                event_id,
                driver_id,
                ..
            } => {
                self.reconcile_race(notification, &event_id, &driver_id, "gateway")
                    .await
            }
            PaymentReference::Pool {
                class_tag,
                rental_type,
                driver_id,
                timestamp_ms,
            } => {
                self.reconcile_pool(
                    notification,
                    &class_tag,
                    &rental_type,
                    &driver_id,
                    timestamp_ms,
                    "gateway",
                )
                .await
            }
            PaymentReference::Unknown { raw } => {
                tracing::warn!(payment_reference = %raw, "unknown payment reference prefix");
                let record = crate::types::FailedNotification {
                    failed_at: Utc::now(),
                    error: format!("unknown payment reference prefix: {raw}"),
                    payload: notification.raw_payload.clone(),
                    headers: String::new(),
                };
                retry_once!(self.store.append_failed_notification(&record).await)?;
                Ok(())
            }
        }
    }

    async fn reconcile_race(
        &self,
        notification: &PaymentNotification,
        event_id: &EventId,
        driver_id: &DriverId,
        actor: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let ledger = ledger_row(notification, Some(now));

        let fallback = RaceEntry {
            entry_id: EntryId::generate(),
            driver_id: driver_id.clone(),
            event_id: event_id.clone(),
            race_class: String::new(),
            entry_items: Vec::new(),
            amount_paid: notification.amount_gross,
            payment_reference: notification.payment_reference.clone(),
            pf_payment_id: Some(notification.pf_payment_id.clone()),
            payment_status: PaymentStatus::Completed,
            entry_status: EntryStatus::Confirmed,
            tickets: TicketRefs::none(),
            team_code: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };

        let reconcile_audit = audit(
            "payment_reconciled",
            actor,
            &notification.payment_reference,
            serde_json::json!({
                "pf_payment_id": notification.pf_payment_id,
                "amount_cents": notification.amount_gross.cents(),
            }),
        );

        let outcome = retry_once!(
            self.store
                .reconcile_race_payment(&ledger, &fallback, &reconcile_audit)
                .await
        )?;

        match &outcome {
            RaceReconcileOutcome::AlreadyRecorded => {
                tracing::info!(
                    pf_payment_id = %notification.pf_payment_id,
                    "duplicate notification, ledger already has this payment"
                );
            }
            RaceReconcileOutcome::CompletedPending { prior } => {
                metrics::counter!("raceday_payments_completed_total").increment(1);
                self.store
                    .set_driver_race_flags(driver_id, Some(EntryStatus::Confirmed.as_str()), None)
                    .await
                    .unwrap_or_else(|error| {
                        tracing::warn!(%error, "driver flag update failed");
                    });
                tracing::info!(
                    entry_id = %prior.entry_id,
                    payment_reference = %notification.payment_reference,
                    "pending entry completed"
                );
            }
            RaceReconcileOutcome::Synthesised => {
                metrics::counter!("raceday_late_webhooks_total").increment(1);
                let late = audit(
                    "late_webhook",
                    actor,
                    &notification.payment_reference,
                    serde_json::json!({
                        "pf_payment_id": notification.pf_payment_id,
                        "payer_email": notification.payer_email,
                        "note": "entry synthesised from reference; items unknown",
                    }),
                );
                self.store.append_audit(&late).await.unwrap_or_else(|error| {
                    tracing::warn!(%error, "late-webhook audit failed");
                });
                self.store
                    .set_driver_race_flags(driver_id, Some(EntryStatus::Confirmed.as_str()), None)
                    .await
                    .unwrap_or_else(|error| {
                        tracing::warn!(%error, "driver flag update failed");
                    });
                tracing::warn!(
                    payment_reference = %notification.payment_reference,
                    "webhook arrived before initiation row; entry synthesised"
                );
            }
            RaceReconcileOutcome::AlreadyTerminal => {
                tracing::info!(
                    payment_reference = %notification.payment_reference,
                    "entry already terminal, reconciliation is a no-op"
                );
            }
        }
        // Race confirmations were sent at initiation; no email here.
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile_pool(
        &self,
        notification: &PaymentNotification,
        class_tag: &str,
        rental_type: &str,
        driver_id: &DriverId,
        timestamp_ms: i64,
        actor: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let season_year = Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .map_or_else(|| now.year(), |t| t.year());

        let rental = PoolEngineRental {
            driver_id: driver_id.clone(),
            championship_class: class_tag.to_string(),
            rental_type: rental_type.to_string(),
            season_year,
            payment_reference: notification.payment_reference.clone(),
            pf_payment_id: Some(notification.pf_payment_id.clone()),
            payment_status: PaymentStatus::Completed,
            amount_paid: notification.amount_gross,
            created_at: now,
            completed_at: Some(now),
        };

        let ledger = ledger_row(notification, Some(now));
        let pool_audit = audit(
            "pool_rental_reconciled",
            actor,
            &notification.payment_reference,
            serde_json::json!({
                "pf_payment_id": notification.pf_payment_id,
                "class": class_tag,
                "rental_type": rental_type,
                "season_year": season_year,
            }),
        );

        let outcome = retry_once!(
            self.store
                .reconcile_pool_payment(&ledger, &rental, &pool_audit)
                .await
        )?;

        if outcome == PoolReconcileOutcome::Applied {
            metrics::counter!("raceday_pool_rentals_total").increment(1);
            let driver = self.store.driver_by_id(driver_id).await?;
            let (to, name) = driver.as_ref().map_or_else(
                || (notification.payer_email.clone(), notification.payer_first_name.clone()),
                |d| (d.email.clone(), d.first_name.clone()),
            );
            if !to.is_empty() {
                if let Err(error) = self
                    .mailer
                    .send_pool_rental_confirmation(&to, &name, class_tag, rental_type)
                    .await
                {
                    tracing::warn!(%error, "pool rental confirmation failed");
                }
            }
            if let Err(error) = self
                .mailer
                .notify_admin(&format!(
                    "Pool engine rental completed: driver {driver_id}, class {class_tag}, type {rental_type}"
                ))
                .await
            {
                tracing::warn!(%error, "admin notification failed");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Admin operations
    // ------------------------------------------------------------------

    /// Reconcile a payment the gateway never notified us about.
    ///
    /// Behaves exactly as if a webhook with these fields had arrived, gated
    /// on operator authentication at the HTTP surface. Idempotent: without a
    /// gateway payment id a deterministic `ADMIN-<reference>` id is used, so
    /// repeating the action is a ledger no-op.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an unusable reference, `StoreUnavailable` on
    /// store failure.
    pub async fn admin_reconcile(&self, request: &AdminReconcileRequest) -> Result<()> {
        let pf_payment_id = request
            .pf_payment_id
            .clone()
            .unwrap_or_else(|| format!("ADMIN-{}", request.payment_reference));

        let notification = PaymentNotification {
            payment_reference: request.payment_reference.clone(),
            pf_payment_id,
            amount_gross: request.amount,
            payment_status: "COMPLETE".to_string(),
            payer_email: request.payer_email.clone(),
            payer_first_name: request.payer_first_name.clone(),
            payer_last_name: request.payer_last_name.clone(),
            item_name: String::new(),
            raw_payload: serde_json::json!({
                "source": "admin_reconcile",
                "payment_reference": request.payment_reference,
                "amount_cents": request.amount.cents(),
            })
            .to_string(),
        };

        match notification.reference() {
            PaymentReference::Race {
                event_id,
                driver_id,
                ..
            } => {
                self.reconcile_race(&notification, &event_id, &driver_id, "admin")
                    .await
            }
            PaymentReference::Pool {
                class_tag,
                rental_type,
                driver_id,
                timestamp_ms,
            } => {
                self.reconcile_pool(
                    &notification,
                    &class_tag,
                    &rental_type,
                    &driver_id,
                    timestamp_ms,
                    "admin",
                )
                .await
            }
            PaymentReference::Unknown { raw } => Err(CoordinatorError::ValidationFailed {
                field: "payment_reference",
                message: format!("not a recognised reference: {raw}"),
            }),
        }
    }

    /// Add an entry manually at the requested payment status.
    ///
    /// Ignores `registration_open`; uses the same pricing, reference and
    /// ticket construction as driver initiation.
    ///
    /// # Errors
    ///
    /// `NotFound`, `ValidationFailed`, `DuplicateEntry`, `StoreUnavailable`.
    pub async fn admin_manual_entry(
        &self,
        request: &EntryRequest,
        payment_status: PaymentStatus,
        send_email: bool,
    ) -> Result<RaceEntry> {
        let (driver, event) = self.load_driver_and_event(request).await?;
        let discount = self.load_discount(request.discount_code.as_deref()).await?;
        let amount = match payment_status {
            PaymentStatus::Free => Money::ZERO,
            _ => self.compute_total(&event, &request.race_class, &request.items, discount.as_ref()),
        };

        let entry_status = match payment_status {
            PaymentStatus::Pending => EntryStatus::PendingPayment,
            PaymentStatus::Completed | PaymentStatus::Free => EntryStatus::Confirmed,
            PaymentStatus::Failed => {
                return Err(CoordinatorError::ValidationFailed {
                    field: "payment_status",
                    message: "manual entries cannot be created as Failed".to_string(),
                });
            }
        };

        let now = Utc::now();
        let reference =
            PaymentReference::race(&event.event_id, &driver.driver_id, self.mint.next_timestamp_ms());
        let mut entry = self.build_entry(
            request,
            reference.clone(),
            amount,
            payment_status,
            entry_status,
            now,
        );
        if entry_status == EntryStatus::Confirmed {
            entry.completed_at = Some(now);
        }

        let record = audit(
            "manual_entry_added",
            "admin",
            &reference,
            serde_json::json!({
                "driver_id": driver.driver_id.as_str(),
                "event_id": event.event_id.as_str(),
                "payment_status": payment_status.as_str(),
            }),
        );

        match payment_status {
            PaymentStatus::Pending => {
                retry_once!(self.store.create_pending_entry(&entry, &record).await)?;
            }
            _ => {
                retry_once!(
                    self.store
                        .insert_completed_entry(
                            &entry,
                            Some(EntryStatus::Confirmed.as_str()),
                            &record,
                        )
                        .await
                )?;
            }
        }

        if send_email {
            self.send_entry_confirmation(&driver, &event, &entry).await;
        }
        tracing::info!(
            driver_id = %driver.driver_id,
            event_id = %event.event_id,
            payment_status = %payment_status,
            "manual entry added"
        );
        Ok(entry)
    }

    /// Cancel an entry, guarded by the payment state the operator saw.
    ///
    /// # Errors
    ///
    /// `NotFound` when the entry does not exist;
    /// [`CoordinatorError::PaymentStateMismatch`] when the entry is no longer
    /// in the expected payment state (e.g. a webhook completed it first).
    pub async fn cancel_entry(
        &self,
        entry_id: &EntryId,
        expected: PaymentStatus,
        actor: &str,
    ) -> Result<RaceEntry> {
        let record = audit(
            "entry_cancelled",
            actor,
            entry_id.as_str(),
            serde_json::json!({ "expected_payment_status": expected.as_str() }),
        );
        let cancelled =
            retry_once!(self.store.cancel_entry(entry_id, expected, &record).await)?;
        match cancelled {
            Some(entry) => Ok(entry),
            None => match self.store.entry_by_id(entry_id).await? {
                Some(actual) => Err(CoordinatorError::PaymentStateMismatch {
                    detail: format!(
                        "expected {} but entry is {}",
                        expected, actual.payment_status
                    ),
                }),
                None => Err(CoordinatorError::NotFound {
                    what: format!("entry {entry_id}"),
                }),
            },
        }
    }

    /// Amend the class and item selection of a non-cancelled entry.
    ///
    /// Newly added items get freshly minted ticket references; removed items
    /// lose theirs. The amount is recomputed only while the entry is still
    /// pending payment.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PaymentStateMismatch` for cancelled entries,
    /// `ValidationFailed`, `StoreUnavailable`.
    pub async fn edit_entry(
        &self,
        entry_id: &EntryId,
        race_class: String,
        items: Vec<RentalItem>,
    ) -> Result<RaceEntry> {
        validate_items(&items)?;
        let mut entry = self
            .store
            .entry_by_id(entry_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                what: format!("entry {entry_id}"),
            })?;
        if entry.entry_status == EntryStatus::Cancelled {
            return Err(CoordinatorError::PaymentStateMismatch {
                detail: "cannot edit a cancelled entry".to_string(),
            });
        }

        let mut tickets = TicketRefs::none();
        for item in RentalItem::ALL {
            if items.contains(&item) {
                let existing = entry.tickets.get(item).map(ToString::to_string);
                tickets.set(
                    item,
                    Some(existing.unwrap_or_else(|| {
                        self.mint.mint(item, &entry.driver_id, &entry.event_id)
                    })),
                );
            }
        }

        if entry.payment_status == PaymentStatus::Pending {
            let event = self
                .store
                .event_by_id(&entry.event_id)
                .await?
                .ok_or_else(|| CoordinatorError::NotFound {
                    what: format!("event {}", entry.event_id),
                })?;
            entry.amount_paid = self.compute_total(&event, &race_class, &items, None);
        }

        entry.race_class = race_class;
        entry.entry_items = items;
        entry.tickets = tickets;

        let record = audit(
            "entry_edited",
            "admin",
            entry_id.as_str(),
            serde_json::json!({
                "race_class": entry.race_class,
                "items": entry.entry_items.iter().map(|i| i.tag()).collect::<Vec<_>>(),
            }),
        );
        retry_once!(self.store.update_entry(&entry, &record).await)?;
        Ok(entry)
    }

    /// Cancel pending entries older than the cutoff (operator policy sweep).
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the scan fails; per-entry races are skipped.
    pub async fn cancel_stale_pending(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let stale = retry_once!(self.store.stale_pending_entries(older_than).await)?;
        let mut cancelled = 0;
        for entry in stale {
            let record = audit(
                "entry_cancelled",
                "system",
                entry.entry_id.as_str(),
                serde_json::json!({ "reason": "stale pending entry sweep" }),
            );
            match self
                .store
                .cancel_entry(&entry.entry_id, PaymentStatus::Pending, &record)
                .await?
            {
                Some(_) => cancelled += 1,
                // A webhook won the race; the entry is no longer pending.
                None => continue,
            }
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "stale pending entries cancelled");
        }
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Shared pieces
    // ------------------------------------------------------------------

    async fn load_driver_and_event(
        &self,
        request: &EntryRequest,
    ) -> Result<(Driver, RaceEvent)> {
        validate_items(&request.items)?;
        if request.race_class.trim().is_empty() {
            return Err(CoordinatorError::ValidationFailed {
                field: "race_class",
                message: "race class is required".to_string(),
            });
        }
        let driver = retry_once!(self.store.driver_by_id(&request.driver_id).await)?
            .ok_or_else(|| CoordinatorError::NotFound {
                what: format!("driver {}", request.driver_id),
            })?;
        let event = retry_once!(self.store.event_by_id(&request.event_id).await)?
            .ok_or_else(|| CoordinatorError::NotFound {
                what: format!("event {}", request.event_id),
            })?;
        Ok((driver, event))
    }

    async fn load_discount(&self, code: Option<&str>) -> Result<Option<DiscountCode>> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        let discount = retry_once!(self.store.discount_by_code(code).await)?;
        match discount {
            Some(d) if d.is_active => Ok(Some(d)),
            _ => Err(CoordinatorError::DiscountInvalid {
                code: code.to_string(),
            }),
        }
    }

    fn compute_total(
        &self,
        event: &RaceEvent,
        race_class: &str,
        items: &[RentalItem],
        discount: Option<&DiscountCode>,
    ) -> Money {
        let mut total = event.fee_for_class(race_class);
        for item in items {
            total = total.saturating_add(self.pricing.item_fee(*item));
        }
        match discount {
            Some(code) => code.apply(total),
            None => total,
        }
    }

    fn build_entry(
        &self,
        request: &EntryRequest,
        payment_reference: String,
        amount: Money,
        payment_status: PaymentStatus,
        entry_status: EntryStatus,
        now: DateTime<Utc>,
    ) -> RaceEntry {
        let mut tickets = TicketRefs::none();
        for item in &request.items {
            tickets.set(
                *item,
                Some(self.mint.mint(*item, &request.driver_id, &request.event_id)),
            );
        }
        RaceEntry {
            entry_id: EntryId::generate(),
            driver_id: request.driver_id.clone(),
            event_id: request.event_id.clone(),
            race_class: request.race_class.clone(),
            entry_items: request.items.clone(),
            amount_paid: amount,
            payment_reference,
            pf_payment_id: None,
            payment_status,
            entry_status,
            tickets,
            team_code: request.discount_code.clone(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    async fn send_entry_confirmation(&self, driver: &Driver, event: &RaceEvent, entry: &RaceEntry) {
        let name = format!("{} {}", driver.first_name, driver.last_name);
        if let Err(error) = self
            .mailer
            .send_race_entry_confirmation(&driver.email, &name, &event.name, entry)
            .await
        {
            // Mail failures never fail the business transaction.
            tracing::warn!(
                entry_id = %entry.entry_id,
                %error,
                "entry confirmation email failed"
            );
        }
    }
}

fn validate_items(items: &[RentalItem]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        if items[..i].contains(item) {
            return Err(CoordinatorError::ValidationFailed {
                field: "items",
                message: format!("item {item} selected more than once"),
            });
        }
    }
    Ok(())
}

fn audit(action: &str, actor: &str, target: &str, detail: serde_json::Value) -> AuditRecord {
    AuditRecord {
        at: Utc::now(),
        action: action.to_string(),
        actor: actor.to_string(),
        target: target.to_string(),
        detail,
    }
}

fn ledger_row(
    notification: &PaymentNotification,
    completed_at: Option<DateTime<Utc>>,
) -> PaymentLedgerRow {
    PaymentLedgerRow {
        pf_payment_id: notification.pf_payment_id.clone(),
        payment_reference: notification.payment_reference.clone(),
        amount_gross: notification.amount_gross,
        payment_status: notification.payment_status.clone(),
        payer_email: notification.payer_email.clone(),
        payer_first_name: notification.payer_first_name.clone(),
        payer_last_name: notification.payer_last_name.clone(),
        item_name: notification.item_name.clone(),
        raw_payload: notification.raw_payload.clone(),
        created_at: Utc::now(),
        completed_at,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_items_rejected() {
        let err = validate_items(&[RentalItem::Engine, RentalItem::Engine]).unwrap_err();
        assert!(matches!(err, CoordinatorError::ValidationFailed { field: "items", .. }));
    }

    #[test]
    fn pricing_adds_item_fees() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.item_fee(RentalItem::Engine), Money::from_cents(1_500));
        assert_eq!(pricing.item_fee(RentalItem::Tyres), Money::from_cents(900));
    }

    #[test]
    fn store_error_mapping() {
        assert!(matches!(
            CoordinatorError::from(StoreError::Duplicate {
                constraint: "x".to_string()
            }),
            CoordinatorError::DuplicateEntry
        ));
        assert!(matches!(
            CoordinatorError::from(StoreError::Unavailable("down".to_string())),
            CoordinatorError::StoreUnavailable { .. }
        ));
    }
}
