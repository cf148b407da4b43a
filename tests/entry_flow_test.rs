//! Driver-initiated entry flows: paid initiation, the free-entry shortcut,
//! pricing, initiation idempotency, and mail-failure isolation.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use common::{complete_notification, fixture, fixture_with_failing_mailer, free_code, seed};
use raceday::coordinator::{CoordinatorError, EntryRequest, InitiationOutcome};
use raceday::mailer::mock::SentKind;
use raceday::store::EntryStore;
use raceday::types::{
    DriverId, EntryStatus, EventId, Money, PaymentStatus, RentalItem,
};

fn entry_request(items: Vec<RentalItem>, discount: Option<&str>) -> EntryRequest {
    EntryRequest {
        driver_id: DriverId::from("D-001"),
        event_id: EventId::from("E-RED"),
        race_class: "OK-J".to_string(),
        items,
        discount_code: discount.map(ToString::to_string),
    }
}

/// Paid entry happy path, then the completing webhook.
#[tokio::test]
async fn paid_entry_happy_path() {
    let fx = fixture();
    seed(&fx).await;

    let outcome = fx
        .coordinator
        .initiate_paid_entry(&entry_request(
            vec![RentalItem::Engine, RentalItem::Tyres],
            None,
        ))
        .await
        .unwrap();

    let (entry, form) = match outcome {
        InitiationOutcome::Redirect { entry, form } => (entry, form),
        InitiationOutcome::Free { .. } => panic!("expected a gateway redirect"),
    };

    assert_eq!(entry.payment_status, PaymentStatus::Pending);
    assert_eq!(entry.entry_status, EntryStatus::PendingPayment);
    assert_eq!(entry.amount_paid, Money::from_cents(14_900));
    assert!(entry.tickets.engine.is_some());
    assert!(entry.tickets.tyres.is_some());
    assert!(entry.tickets.transponder.is_none());
    assert!(entry.tickets.fuel.is_none());
    assert!(form.fields.iter().any(|(k, v)| k == "amount" && v == "149.00"));
    assert_eq!(fx.mailer.count(SentKind::RaceEntry), 1);

    // The webhook completes the pending row.
    let notification = complete_notification(&entry.payment_reference, "1089250", 14_900);
    fx.coordinator.reconcile_webhook(&notification).await.unwrap();

    let stored = fx
        .store
        .entry_by_reference(&entry.payment_reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.entry_status, EntryStatus::Confirmed);
    assert_eq!(stored.pf_payment_id.as_deref(), Some("1089250"));
    assert_eq!(fx.store.ledger_rows().len(), 1);
    // Race confirmations were sent at initiation; the webhook sends nothing.
    assert_eq!(fx.mailer.count(SentKind::RaceEntry), 1);
}

/// The free code routes initiation to the free path, with no
/// gateway redirect.
#[tokio::test]
async fn free_entry_via_code() {
    let fx = fixture();
    seed(&fx).await;
    fx.store.upsert_discount(&free_code()).await.unwrap();

    let outcome = fx
        .coordinator
        .initiate_paid_entry(&entry_request(
            vec![RentalItem::Engine, RentalItem::Tyres],
            Some("k0k0r0"),
        ))
        .await
        .unwrap();

    let entry = match outcome {
        InitiationOutcome::Free { entry } => entry,
        InitiationOutcome::Redirect { .. } => panic!("free code must not redirect"),
    };
    assert_eq!(entry.payment_status, PaymentStatus::Free);
    assert_eq!(entry.entry_status, EntryStatus::Confirmed);
    assert_eq!(entry.amount_paid, Money::ZERO);
    assert_eq!(entry.team_code.as_deref(), Some("k0k0r0"));
    assert_eq!(fx.mailer.count(SentKind::RaceEntry), 1);
}

/// The dedicated free-entry endpoint rejects codes that do not zero the
/// total.
#[tokio::test]
async fn free_entry_requires_free_code() {
    let fx = fixture();
    seed(&fx).await;
    fx.store
        .upsert_discount(&raceday::types::DiscountCode {
            code: "ten".to_string(),
            discount_type: raceday::types::DiscountType::Percent,
            discount_value: 10,
            is_active: true,
        })
        .await
        .unwrap();

    let err = fx
        .coordinator
        .register_free_entry(&entry_request(vec![], Some("ten")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DiscountInvalid { .. }));
}

/// Inactive codes are rejected outright.
#[tokio::test]
async fn inactive_discount_rejected() {
    let fx = fixture();
    seed(&fx).await;
    let mut code = free_code();
    code.is_active = false;
    fx.store.upsert_discount(&code).await.unwrap();

    let err = fx
        .coordinator
        .initiate_paid_entry(&entry_request(vec![], Some("k0k0r0")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DiscountInvalid { .. }));
}

/// Closed events refuse driver initiation.
#[tokio::test]
async fn closed_registration_rejected() {
    let fx = fixture();
    seed(&fx).await;
    let mut closed = common::event("E-RED");
    closed.registration_open = false;
    fx.store.update_event(&closed).await.unwrap();

    let err = fx
        .coordinator
        .initiate_paid_entry(&entry_request(vec![], None))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::RegistrationClosed));
}

/// Unknown events surface `NotFound`.
#[tokio::test]
async fn unknown_event_rejected() {
    let fx = fixture();
    seed(&fx).await;
    let mut request = entry_request(vec![], None);
    request.event_id = EventId::from("E-GONE");
    let err = fx.coordinator.initiate_paid_entry(&request).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound { .. }));
}

/// Re-creating the pending row with the same reference is a no-op; the
/// first row wins and no second audit is written.
#[tokio::test]
async fn repeated_initiation_with_same_reference_is_noop() {
    let fx = fixture();
    seed(&fx).await;

    let outcome = fx
        .coordinator
        .initiate_paid_entry(&entry_request(vec![RentalItem::Engine], None))
        .await
        .unwrap();
    let entry = match outcome {
        InitiationOutcome::Redirect { entry, .. } => entry,
        InitiationOutcome::Free { .. } => panic!("expected redirect"),
    };

    let audits_before = fx.store.audit_log().len();
    let mut retry = entry.clone();
    retry.entry_id = raceday::types::EntryId::generate();
    let stored = fx
        .store
        .create_pending_entry(
            &retry,
            &raceday::types::AuditRecord {
                at: chrono::Utc::now(),
                action: "entry_initiated".to_string(),
                actor: "D-001".to_string(),
                target: entry.payment_reference.clone(),
                detail: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

    assert_eq!(stored.entry_id, entry.entry_id, "existing row returned unchanged");
    assert_eq!(fx.store.all_entries().len(), 1);
    assert_eq!(fx.store.audit_log().len(), audits_before);
}

/// A failing mail provider never fails the business transaction.
#[tokio::test]
async fn email_failure_does_not_fail_entry() {
    let fx = fixture_with_failing_mailer();
    seed(&fx).await;

    let outcome = fx
        .coordinator
        .initiate_paid_entry(&entry_request(vec![RentalItem::Engine], None))
        .await
        .unwrap();
    assert!(matches!(outcome, InitiationOutcome::Redirect { .. }));
    assert_eq!(fx.store.all_entries().len(), 1);
}

/// Ticket slots are populated exactly for the selected items.
#[tokio::test]
async fn ticket_refs_match_items() {
    let fx = fixture();
    seed(&fx).await;

    for items in [
        vec![],
        vec![RentalItem::Fuel],
        vec![RentalItem::Engine, RentalItem::Transponder],
        RentalItem::ALL.to_vec(),
    ] {
        let outcome = fx
            .coordinator
            .initiate_paid_entry(&entry_request(items.clone(), None))
            .await
            .unwrap();
        let entry = match outcome {
            InitiationOutcome::Redirect { entry, .. } => entry,
            InitiationOutcome::Free { .. } => panic!("expected redirect"),
        };
        for item in RentalItem::ALL {
            assert_eq!(
                entry.tickets.get(item).is_some(),
                items.contains(&item),
                "slot for {item} must follow selection {items:?}"
            );
        }
    }
}

/// Duplicate item selections are malformed requests.
#[tokio::test]
async fn duplicate_items_rejected() {
    let fx = fixture();
    seed(&fx).await;
    let err = fx
        .coordinator
        .initiate_paid_entry(&entry_request(
            vec![RentalItem::Tyres, RentalItem::Tyres],
            None,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::ValidationFailed { .. }));
}
