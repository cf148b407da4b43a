//! Shared fixtures: an in-memory store, a recording mailer, and a
//! coordinator wired to a sandbox gateway adapter.

#![allow(dead_code)]
#![allow(clippy::expect_used)]

use chrono::{Duration, NaiveDate, Utc};
use raceday::coordinator::{EntryCoordinator, PricingConfig};
use raceday::gateway::{GatewayAdapter, GatewayConfig, PaymentNotification};
use raceday::mailer::mock::RecordingMailer;
use raceday::store::memory::InMemoryEntryStore;
use raceday::store::EntryStore;
use raceday::types::{
    ApprovalStatus, DiscountCode, DiscountType, Driver, DriverId, EventId, Money, RaceEvent,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a scenario needs.
pub struct Fixture {
    pub store: Arc<InMemoryEntryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub coordinator: Arc<EntryCoordinator>,
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        process_url: "https://sandbox.gateway.example/eng/process".to_string(),
        merchant_id: "10000100".to_string(),
        merchant_key: "46f0cd694581a".to_string(),
        passphrase: "jt7NOE43FZPn".to_string(),
        return_url: "https://entries.example/payment/return".to_string(),
        cancel_url: "https://entries.example/payment/cancel".to_string(),
        notify_url: "https://entries.example/api/notifyPayment".to_string(),
    }
}

pub fn fixture() -> Fixture {
    build_fixture(Arc::new(RecordingMailer::new()))
}

pub fn fixture_with_failing_mailer() -> Fixture {
    build_fixture(Arc::new(RecordingMailer::failing()))
}

fn build_fixture(mailer: Arc<RecordingMailer>) -> Fixture {
    let store = Arc::new(InMemoryEntryStore::new());
    let coordinator = Arc::new(EntryCoordinator::new(
        store.clone(),
        mailer.clone(),
        GatewayAdapter::new(gateway_config()),
        PricingConfig::default(),
    ));
    Fixture {
        store,
        mailer,
        coordinator,
    }
}

pub fn driver(id: &str, email: &str) -> Driver {
    Driver {
        driver_id: DriverId::from(id),
        first_name: "Thandi".to_string(),
        last_name: "Mokoena".to_string(),
        email: email.to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(2010, 6, 1).expect("valid date"),
        nationality: "South African".to_string(),
        gender: "Female".to_string(),
        championship: "Karting (Trophies)".to_string(),
        race_class: "OK-J".to_string(),
        race_number: "42".to_string(),
        team_name: "Test Team".to_string(),
        coach_name: "Coach".to_string(),
        kart_brand: "Tony".to_string(),
        transponder_number: "123456".to_string(),
        contact_name: "Parent".to_string(),
        contact_phone: "0712345678".to_string(),
        contact_relationship: "Parent".to_string(),
        media_release_consent: true,
        approval_status: ApprovalStatus::Approved,
        password_hash: "$2b$12$C6UzMDM.H6dfI/f/IKcEeO7ZBlLSrnDuiGm3dJWzoY3rYDU4NwrUe".to_string(),
        reset_token_hash: None,
        reset_token_expires: None,
        season_engine_rental: false,
        next_race_entry_status: None,
        next_race_engine_rental_status: None,
        created_at: Utc::now(),
    }
}

pub fn event(id: &str) -> RaceEvent {
    RaceEvent {
        event_id: EventId::from(id),
        name: "Red Star Raceway".to_string(),
        date: NaiveDate::from_ymd_opt(2026, 9, 12).expect("valid date"),
        venue: "Red Star".to_string(),
        registration_deadline: Utc::now() + Duration::days(30),
        entry_fee: Money::from_cents(12_500),
        class_fees: HashMap::new(),
        registration_open: true,
    }
}

pub fn free_code() -> DiscountCode {
    DiscountCode {
        code: "k0k0r0".to_string(),
        discount_type: DiscountType::Free,
        discount_value: 0,
        is_active: true,
    }
}

/// Seed the standard driver `D-001` and event `E-RED`.
pub async fn seed(fixture: &Fixture) {
    fixture
        .store
        .insert_driver(&driver("D-001", "driver@example.com"))
        .await
        .expect("seed driver");
    fixture
        .store
        .insert_event(&event("E-RED"))
        .await
        .expect("seed event");
}

/// A completed-payment notification as the adapter would normalise it.
pub fn complete_notification(reference: &str, pf_payment_id: &str, cents: i64) -> PaymentNotification {
    PaymentNotification {
        payment_reference: reference.to_string(),
        pf_payment_id: pf_payment_id.to_string(),
        amount_gross: Money::from_cents(cents),
        payment_status: "COMPLETE".to_string(),
        payer_email: "driver@example.com".to_string(),
        payer_first_name: "Thandi".to_string(),
        payer_last_name: "Mokoena".to_string(),
        item_name: "Race entry: Red Star Raceway".to_string(),
        raw_payload: format!("m_payment_id={reference}&pf_payment_id={pf_payment_id}"),
    }
}
