//! Webhook and admin reconciliation: late webhooks, duplicates, unknown
//! references, commutativity with admin action, pool rentals, and the
//! stale-entry sweep.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use common::{complete_notification, fixture, seed, Fixture};
use chrono::{Duration, Utc};
use raceday::coordinator::{
    AdminReconcileRequest, CoordinatorError, EntryRequest, InitiationOutcome,
};
use raceday::mailer::mock::SentKind;
use raceday::store::EntryStore;
use raceday::types::{
    DriverId, EntryStatus, EventId, Money, PaymentStatus, RentalItem,
};
use std::sync::Arc;

async fn initiate(fx: &Fixture, items: Vec<RentalItem>) -> raceday::types::RaceEntry {
    let outcome = fx
        .coordinator
        .initiate_paid_entry(&EntryRequest {
            driver_id: DriverId::from("D-001"),
            event_id: EventId::from("E-RED"),
            race_class: "OK-J".to_string(),
            items,
            discount_code: None,
        })
        .await
        .unwrap();
    match outcome {
        InitiationOutcome::Redirect { entry, .. } => entry,
        InitiationOutcome::Free { .. } => panic!("expected redirect"),
    }
}

/// The webhook arrives but the initiation row never persisted; a
/// completed entry is synthesised and audited as a late webhook.
#[tokio::test]
async fn late_webhook_synthesises_entry() {
    let fx = fixture();
    seed(&fx).await;

    let reference = "RACE-E-RED-D-001-1700000000000";
    let notification = complete_notification(reference, "1089250", 14_900);
    fx.coordinator.reconcile_webhook(&notification).await.unwrap();

    let entry = fx
        .store
        .entry_by_reference(reference)
        .await
        .unwrap()
        .expect("entry synthesised");
    assert_eq!(entry.driver_id, DriverId::from("D-001"));
    assert_eq!(entry.event_id, EventId::from("E-RED"));
    assert_eq!(entry.payment_status, PaymentStatus::Completed);
    assert_eq!(entry.entry_status, EntryStatus::Confirmed);
    assert!(entry.entry_items.is_empty());
    assert!(entry.tickets.engine.is_none());
    assert!(entry.tickets.tyres.is_none());
    assert!(entry.tickets.transponder.is_none());
    assert!(entry.tickets.fuel.is_none());
    assert_eq!(entry.amount_paid, Money::from_cents(14_900));

    assert!(
        fx.store
            .audit_log()
            .iter()
            .any(|a| a.action == "late_webhook"),
        "late webhook must be audit-marked for operators"
    );
}

/// The same webhook delivered twice produces one ledger row,
/// one entry, one transition.
#[tokio::test]
async fn duplicate_webhook_is_noop() {
    let fx = fixture();
    seed(&fx).await;
    let entry = initiate(&fx, vec![RentalItem::Engine, RentalItem::Tyres]).await;

    let notification = complete_notification(&entry.payment_reference, "1089250", 14_900);
    fx.coordinator.reconcile_webhook(&notification).await.unwrap();
    fx.coordinator.reconcile_webhook(&notification).await.unwrap();

    assert_eq!(fx.store.ledger_rows().len(), 1);
    assert_eq!(fx.store.all_entries().len(), 1);
    let stored = fx
        .store
        .entry_by_reference(&entry.payment_reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
}

/// A tampered payload never reaches the coordinator and changes nothing.
#[tokio::test]
async fn bad_signature_changes_nothing() {
    let fx = fixture();
    seed(&fx).await;

    let adapter = raceday::gateway::GatewayAdapter::new(common::gateway_config());
    let body = "m_payment_id=RACE-E-RED-D-001-1700000000000&pf_payment_id=1&\
                payment_status=COMPLETE&amount_gross=149.00&signature=deadbeefdeadbeefdeadbeefdeadbeef";
    let err = adapter.verify_notification(body).unwrap_err();
    assert_eq!(err, raceday::gateway::GatewayError::SignatureInvalid);

    assert!(fx.store.all_entries().is_empty());
    assert!(fx.store.ledger_rows().is_empty());
    // Rejection is not a failure of ours: nothing is logged.
    assert!(fx.store.failed_notifications().is_empty());
}

/// Admin reconciliation of a never-notified payment, then the real
/// webhook arrives late and is a no-op.
#[tokio::test]
async fn admin_reconcile_then_late_real_webhook() {
    let fx = fixture();
    seed(&fx).await;
    fx.store
        .insert_driver(&common::driver("D-002", "second@example.com"))
        .await
        .unwrap();

    let reference = "RACE-E-RED-D-002-1700000000001";
    fx.coordinator
        .admin_reconcile(&AdminReconcileRequest {
            payment_reference: reference.to_string(),
            payer_email: "second@example.com".to_string(),
            payer_first_name: "Sipho".to_string(),
            payer_last_name: "Dlamini".to_string(),
            amount: Money::from_cents(14_900),
            pf_payment_id: Some("PF-777".to_string()),
        })
        .await
        .unwrap();

    let entry = fx
        .store
        .entry_by_reference(reference)
        .await
        .unwrap()
        .expect("entry reconciled");
    assert_eq!(entry.payment_status, PaymentStatus::Completed);
    assert_eq!(entry.entry_status, EntryStatus::Confirmed);

    // The gateway finally notifies with the same payment id: no-op.
    let notification = complete_notification(reference, "PF-777", 14_900);
    fx.coordinator.reconcile_webhook(&notification).await.unwrap();
    assert_eq!(fx.store.ledger_rows().len(), 1);
    assert_eq!(fx.store.all_entries().len(), 1);
}

/// Webhook and admin reconcile commute on the same reference.
#[tokio::test]
async fn webhook_and_admin_reconcile_commute() {
    let terminal = |entries: Vec<raceday::types::RaceEntry>| {
        let entry = &entries[0];
        (
            entries.len(),
            entry.payment_status,
            entry.entry_status,
        )
    };

    // Order A: webhook first, admin second.
    let fx_a = fixture();
    seed(&fx_a).await;
    let entry = initiate(&fx_a, vec![RentalItem::Engine]).await;
    let reference = entry.payment_reference.clone();
    fx_a.coordinator
        .reconcile_webhook(&complete_notification(&reference, "PF-1", 14_000))
        .await
        .unwrap();
    fx_a.coordinator
        .admin_reconcile(&AdminReconcileRequest {
            payment_reference: reference.clone(),
            payer_email: String::new(),
            payer_first_name: String::new(),
            payer_last_name: String::new(),
            amount: Money::from_cents(14_000),
            pf_payment_id: Some("PF-1".to_string()),
        })
        .await
        .unwrap();

    // Order B: admin first, webhook second. The reference differs (new
    // initiation) but the shape of the terminal state must match.
    let fx_b = fixture();
    seed(&fx_b).await;
    let entry = initiate(&fx_b, vec![RentalItem::Engine]).await;
    let reference_b = entry.payment_reference.clone();
    fx_b.coordinator
        .admin_reconcile(&AdminReconcileRequest {
            payment_reference: reference_b.clone(),
            payer_email: String::new(),
            payer_first_name: String::new(),
            payer_last_name: String::new(),
            amount: Money::from_cents(14_000),
            pf_payment_id: Some("PF-1".to_string()),
        })
        .await
        .unwrap();
    fx_b.coordinator
        .reconcile_webhook(&complete_notification(&reference_b, "PF-1", 14_000))
        .await
        .unwrap();

    assert_eq!(
        terminal(fx_a.store.all_entries()),
        terminal(fx_b.store.all_entries())
    );
    assert_eq!(fx_a.store.ledger_rows().len(), 1);
    assert_eq!(fx_b.store.ledger_rows().len(), 1);
}

/// Admin reconcile applied N times equals applied once, even without a
/// gateway payment id.
#[tokio::test]
async fn admin_reconcile_is_idempotent() {
    let fx = fixture();
    seed(&fx).await;

    let request = AdminReconcileRequest {
        payment_reference: "RACE-E-RED-D-001-1700000000002".to_string(),
        payer_email: String::new(),
        payer_first_name: String::new(),
        payer_last_name: String::new(),
        amount: Money::from_cents(12_500),
        pf_payment_id: None,
    };
    for _ in 0..3 {
        fx.coordinator.admin_reconcile(&request).await.unwrap();
    }
    assert_eq!(fx.store.all_entries().len(), 1);
    assert_eq!(fx.store.ledger_rows().len(), 1);
}

/// Unknown reference prefixes are accepted but logged for operators.
#[tokio::test]
async fn unknown_prefix_logged_as_failed_notification() {
    let fx = fixture();
    seed(&fx).await;

    let notification = complete_notification("SHOP-E-RED-D-001-1700000000000", "PF-9", 5_000);
    fx.coordinator.reconcile_webhook(&notification).await.unwrap();

    assert!(fx.store.all_entries().is_empty());
    assert_eq!(fx.store.failed_notifications().len(), 1);
    assert!(
        fx.store.failed_notifications()[0]
            .error
            .contains("unknown payment reference prefix")
    );
}

/// Cancelling with a stale expectation fails once the webhook has
/// committed.
#[tokio::test]
async fn cancel_after_completion_is_state_mismatch() {
    let fx = fixture();
    seed(&fx).await;
    let entry = initiate(&fx, vec![]).await;
    fx.coordinator
        .reconcile_webhook(&complete_notification(&entry.payment_reference, "PF-5", 12_500))
        .await
        .unwrap();

    let err = fx
        .coordinator
        .cancel_entry(&entry.entry_id, PaymentStatus::Pending, "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::PaymentStateMismatch { .. }));

    // With the current state acknowledged, the cancel goes through.
    let cancelled = fx
        .coordinator
        .cancel_entry(&entry.entry_id, PaymentStatus::Completed, "admin")
        .await
        .unwrap();
    assert_eq!(cancelled.entry_status, EntryStatus::Cancelled);
}

/// A completed entry never regresses, whatever else arrives.
#[tokio::test]
async fn completed_entry_never_regresses() {
    let fx = fixture();
    seed(&fx).await;
    let entry = initiate(&fx, vec![]).await;
    fx.coordinator
        .reconcile_webhook(&complete_notification(&entry.payment_reference, "PF-5", 12_500))
        .await
        .unwrap();

    // A different payment id against the same reference: terminal no-op.
    fx.coordinator
        .reconcile_webhook(&complete_notification(&entry.payment_reference, "PF-6", 12_500))
        .await
        .unwrap();

    let stored = fx.store.entry_by_id(&entry.entry_id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.pf_payment_id.as_deref(), Some("PF-5"));
    assert_eq!(fx.store.all_entries().len(), 1);
}

/// Concurrent deliveries of the same webhook cause
/// exactly one transition.
#[tokio::test]
async fn concurrent_duplicate_webhooks_single_transition() {
    let fx = fixture();
    seed(&fx).await;
    let entry = initiate(&fx, vec![RentalItem::Engine]).await;
    let notification = Arc::new(complete_notification(&entry.payment_reference, "PF-77", 14_000));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coordinator = fx.coordinator.clone();
        let notification = notification.clone();
        handles.push(tokio::spawn(async move {
            coordinator.reconcile_webhook(&notification).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(fx.store.ledger_rows().len(), 1);
    assert_eq!(fx.store.all_entries().len(), 1);
}

/// Non-complete statuses are recorded in the ledger and otherwise ignored.
#[tokio::test]
async fn non_complete_status_only_recorded() {
    let fx = fixture();
    seed(&fx).await;
    let entry = initiate(&fx, vec![]).await;

    let mut notification = complete_notification(&entry.payment_reference, "PF-77", 12_500);
    notification.payment_status = "CANCELLED".to_string();
    fx.coordinator.reconcile_webhook(&notification).await.unwrap();

    assert_eq!(fx.store.ledger_rows().len(), 1);
    let stored = fx.store.entry_by_id(&entry.entry_id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

/// Pool references complete the season rental, flag the driver, and send
/// the pool confirmation (the only webhook-triggered email).
#[tokio::test]
async fn pool_reference_completes_rental() {
    let fx = fixture();
    seed(&fx).await;

    let reference = "POOL-OKJ-season-D-001-1700000000000";
    fx.coordinator
        .reconcile_webhook(&complete_notification(reference, "PF-88", 250_000))
        .await
        .unwrap();

    let rentals = fx.store.all_rentals();
    assert_eq!(rentals.len(), 1);
    assert_eq!(rentals[0].championship_class, "OKJ");
    assert_eq!(rentals[0].rental_type, "season");
    assert_eq!(rentals[0].payment_status, PaymentStatus::Completed);

    let driver = fx
        .store
        .driver_by_id(&DriverId::from("D-001"))
        .await
        .unwrap()
        .unwrap();
    assert!(driver.season_engine_rental);

    assert_eq!(fx.mailer.count(SentKind::PoolRental), 1);
    assert_eq!(fx.mailer.count(SentKind::AdminNote), 1);
    assert!(fx.store.all_entries().is_empty(), "pool is disjoint from race entries");

    // Duplicate delivery: still one rental, one email.
    fx.coordinator
        .reconcile_webhook(&complete_notification(reference, "PF-88", 250_000))
        .await
        .unwrap();
    assert_eq!(fx.store.all_rentals().len(), 1);
    assert_eq!(fx.mailer.count(SentKind::PoolRental), 1);
}

/// Admin manual entries insert directly at the requested status.
#[tokio::test]
async fn admin_manual_entry_statuses() {
    let fx = fixture();
    seed(&fx).await;

    let request = EntryRequest {
        driver_id: DriverId::from("D-001"),
        event_id: EventId::from("E-RED"),
        race_class: "OK-J".to_string(),
        items: vec![RentalItem::Transponder],
        discount_code: None,
    };

    let completed = fx
        .coordinator
        .admin_manual_entry(&request, PaymentStatus::Completed, false)
        .await
        .unwrap();
    assert_eq!(completed.entry_status, EntryStatus::Confirmed);
    assert_eq!(completed.amount_paid, Money::from_cents(13_100));
    assert!(completed.tickets.transponder.is_some());

    let pending = fx
        .coordinator
        .admin_manual_entry(&request, PaymentStatus::Pending, false)
        .await
        .unwrap();
    assert_eq!(pending.entry_status, EntryStatus::PendingPayment);

    let err = fx
        .coordinator
        .admin_manual_entry(&request, PaymentStatus::Failed, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::ValidationFailed { .. }));
}

/// Manual entries ignore the registration_open flag.
#[tokio::test]
async fn admin_manual_entry_ignores_closed_registration() {
    let fx = fixture();
    seed(&fx).await;
    let mut closed = common::event("E-RED");
    closed.registration_open = false;
    fx.store.update_event(&closed).await.unwrap();

    let entry = fx
        .coordinator
        .admin_manual_entry(
            &EntryRequest {
                driver_id: DriverId::from("D-001"),
                event_id: EventId::from("E-RED"),
                race_class: "OK-J".to_string(),
                items: vec![],
                discount_code: None,
            },
            PaymentStatus::Completed,
            false,
        )
        .await
        .unwrap();
    assert_eq!(entry.entry_status, EntryStatus::Confirmed);
}

/// Editing swaps ticket references in step with the item selection.
#[tokio::test]
async fn edit_entry_reworks_tickets() {
    let fx = fixture();
    seed(&fx).await;
    let entry = initiate(&fx, vec![RentalItem::Engine]).await;
    let original_engine_ref = entry.tickets.engine.clone().unwrap();

    let edited = fx
        .coordinator
        .edit_entry(
            &entry.entry_id,
            "OK-J".to_string(),
            vec![RentalItem::Engine, RentalItem::Fuel],
        )
        .await
        .unwrap();

    assert_eq!(
        edited.tickets.engine.as_deref(),
        Some(original_engine_ref.as_str()),
        "kept items keep their minted reference"
    );
    assert!(edited.tickets.fuel.is_some(), "added items get a fresh reference");
    assert!(edited.tickets.tyres.is_none());
    assert_eq!(edited.amount_paid, Money::from_cents(14_750));
}

/// The stale-entry sweep cancels only old pending rows.
#[tokio::test]
async fn stale_pending_sweep() {
    let fx = fixture();
    seed(&fx).await;

    let fresh = initiate(&fx, vec![]).await;
    let completed = initiate(&fx, vec![]).await;
    fx.coordinator
        .reconcile_webhook(&complete_notification(
            &completed.payment_reference,
            "PF-10",
            12_500,
        ))
        .await
        .unwrap();

    // Plant an old pending row directly.
    let mut stale = fresh.clone();
    stale.entry_id = raceday::types::EntryId::generate();
    stale.payment_reference = "RACE-E-RED-D-001-1600000000000".to_string();
    stale.created_at = Utc::now() - Duration::hours(48);
    fx.store
        .create_pending_entry(
            &stale,
            &raceday::types::AuditRecord {
                at: Utc::now(),
                action: "entry_initiated".to_string(),
                actor: "D-001".to_string(),
                target: stale.payment_reference.clone(),
                detail: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

    let cancelled = fx
        .coordinator
        .cancel_stale_pending(Utc::now() - Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(cancelled, 1);

    let fresh_row = fx.store.entry_by_id(&fresh.entry_id).await.unwrap().unwrap();
    assert_eq!(fresh_row.entry_status, EntryStatus::PendingPayment);
}
