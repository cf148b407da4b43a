//! Admin endpoints: manual entries, reconciliation, entry management,
//! event management, discount codes, and the barcode PDF export.
//!
//! All handlers require the shared admin token ([`super::AdminAuth`]);
//! admin-manual and admin-reconcile ignore `events.registration_open`.

use super::{parse_items, AdminAuth, AppError, EntryView};
use crate::coordinator::{AdminReconcileRequest, CoordinatorError, EntryRequest};
use crate::export;
use crate::server::state::AppState;
use crate::types::{
    DiscountCode, DiscountType, EntryId, EventId, DriverId, Money, PaymentStatus, RaceEvent,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Manual entry payload.
#[derive(Debug, Deserialize)]
pub struct AddRaceEntryManualRequest {
    /// Target driver.
    pub driver_id: String,
    /// Target event.
    pub event_id: String,
    /// Class entered.
    #[serde(rename = "class")]
    pub race_class: String,
    /// Ordered rental item tags.
    #[serde(default)]
    pub items: Vec<String>,
    /// `Pending`, `Completed` or `Free`.
    pub payment_status: String,
    /// Optional discount code to apply.
    #[serde(default)]
    pub discount_code: Option<String>,
    /// Dispatch the confirmation email.
    #[serde(default)]
    pub send_email: bool,
}

/// Add an entry on a driver's behalf at the requested payment status.
///
/// # Errors
///
/// Validation errors, not-found for driver/event, conflict on duplicates.
pub async fn add_race_entry_manual(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<AddRaceEntryManualRequest>,
) -> Result<(StatusCode, Json<EntryView>), AppError> {
    let payment_status = PaymentStatus::parse(&request.payment_status).ok_or_else(|| {
        AppError::validation(format!(
            "payment_status must be Pending, Completed or Free, got {:?}",
            request.payment_status
        ))
    })?;
    let entry_request = EntryRequest {
        driver_id: DriverId::from(request.driver_id),
        event_id: EventId::from(request.event_id),
        race_class: request.race_class,
        items: parse_items(&request.items)?,
        discount_code: request.discount_code,
    };
    let entry = state
        .coordinator
        .admin_manual_entry(&entry_request, payment_status, request.send_email)
        .await?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

/// Manual reconciliation payload.
#[derive(Debug, Deserialize)]
pub struct ReconcilePaymentRequest {
    /// The payment reference to reconcile.
    pub payment_reference: String,
    /// Payer email, if known.
    #[serde(default)]
    pub payer_email: String,
    /// Payer first name, if known.
    #[serde(default)]
    pub payer_first_name: String,
    /// Payer last name, if known.
    #[serde(default)]
    pub payer_last_name: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Gateway payment id, when the operator has it.
    #[serde(default)]
    pub pf_payment_id: Option<String>,
}

/// Reconcile a payment the gateway never notified. Idempotent.
///
/// # Errors
///
/// Validation errors for unusable references.
pub async fn reconcile_payment(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<ReconcilePaymentRequest>,
) -> Result<StatusCode, AppError> {
    if request.amount_cents <= 0 {
        return Err(AppError::validation("amount_cents must be positive"));
    }
    state
        .coordinator
        .admin_reconcile(&AdminReconcileRequest {
            payment_reference: request.payment_reference,
            payer_email: request.payer_email,
            payer_first_name: request.payer_first_name,
            payer_last_name: request.payer_last_name,
            amount: Money::from_cents(request.amount_cents),
            pf_payment_id: request.pf_payment_id,
        })
        .await?;
    Ok(StatusCode::OK)
}

/// Entry edit payload.
#[derive(Debug, Deserialize)]
pub struct EditEntryRequest {
    /// Entry to amend.
    pub entry_id: String,
    /// New class.
    #[serde(rename = "class")]
    pub race_class: String,
    /// New ordered item selection.
    pub items: Vec<String>,
}

/// Amend the class and items of a non-cancelled entry.
///
/// # Errors
///
/// Not-found, conflict for cancelled entries.
pub async fn edit_entry(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<EditEntryRequest>,
) -> Result<Json<EntryView>, AppError> {
    let entry = state
        .coordinator
        .edit_entry(
            &EntryId::from(request.entry_id),
            request.race_class,
            parse_items(&request.items)?,
        )
        .await?;
    Ok(Json(entry.into()))
}

/// Entry cancellation payload.
#[derive(Debug, Deserialize)]
pub struct CancelEntryRequest {
    /// Entry to cancel.
    pub entry_id: String,
    /// The payment status the operator saw; the cancel fails with a state
    /// mismatch when the entry has moved on (e.g. a webhook completed it).
    pub expected_payment_status: String,
}

/// Cancel an entry, guarded by its expected payment state.
///
/// # Errors
///
/// Not-found, conflict on state mismatch.
pub async fn cancel_entry(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<CancelEntryRequest>,
) -> Result<Json<EntryView>, AppError> {
    let expected = PaymentStatus::parse(&request.expected_payment_status).ok_or_else(|| {
        AppError::validation(format!(
            "unknown payment status {:?}",
            request.expected_payment_status
        ))
    })?;
    let entry = state
        .coordinator
        .cancel_entry(&EntryId::from(request.entry_id), expected, "admin")
        .await?;
    Ok(Json(entry.into()))
}

/// Query string for entry listings.
#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    /// Restrict to one event.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Entry listing response.
#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    /// Entries, newest first.
    pub entries: Vec<EntryView>,
    /// Total count.
    pub total: usize,
}

/// List entries, optionally for one event.
///
/// # Errors
///
/// Store failures only.
pub async fn get_race_entries(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>, AppError> {
    let event_id = query.event_id.map(EventId::from);
    let entries = state
        .store
        .entries_for_event(event_id.as_ref())
        .await
        .map_err(CoordinatorError::from)?;
    let total = entries.len();
    Ok(Json(EntriesResponse {
        entries: entries.into_iter().map(EntryView::from).collect(),
        total,
    }))
}

/// Render the entry list of one event as a PDF with per-item barcodes.
///
/// # Errors
///
/// Not-found for unknown events; internal error if rendering fails.
pub async fn export_race_entries_pdf(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let event_id = EventId::from(event_id);
    let event = state
        .store
        .event_by_id(&event_id)
        .await
        .map_err(CoordinatorError::from)?
        .ok_or_else(|| AppError::not_found(format!("event {event_id}")))?;
    let entries = state
        .store
        .entries_for_event(Some(&event_id))
        .await
        .map_err(CoordinatorError::from)?;

    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let driver = state
            .store
            .driver_by_id(&entry.driver_id)
            .await
            .map_err(CoordinatorError::from)?;
        rows.push((entry, driver));
    }

    let pdf = export::entries_pdf(&event, &rows).map_err(|error| {
        tracing::error!(%error, "entry list export failed");
        AppError::internal()
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"entries-{event_id}.pdf\""),
            ),
        ],
        pdf,
    ))
}

/// Event create/update payload.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    /// Event id; generated when omitted on create.
    #[serde(default)]
    pub event_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Race date, ISO `YYYY-MM-DD`.
    pub date: String,
    /// Venue.
    pub venue: String,
    /// Entry initiation deadline.
    pub registration_deadline: DateTime<Utc>,
    /// Base entry fee in cents.
    pub entry_fee_cents: i64,
    /// Per-class fee overrides, in cents.
    #[serde(default)]
    pub class_fees_cents: HashMap<String, i64>,
    /// Whether drivers may initiate entries.
    pub registration_open: bool,
}

impl EventRequest {
    fn into_event(self, event_id: EventId) -> Result<RaceEvent, AppError> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|_| AppError::validation("date must be YYYY-MM-DD"))?;
        if self.entry_fee_cents < 0 {
            return Err(AppError::validation("entry_fee_cents must not be negative"));
        }
        Ok(RaceEvent {
            event_id,
            name: self.name,
            date,
            venue: self.venue,
            registration_deadline: self.registration_deadline,
            entry_fee: Money::from_cents(self.entry_fee_cents),
            class_fees: self
                .class_fees_cents
                .into_iter()
                .map(|(class, cents)| (class, Money::from_cents(cents)))
                .collect(),
            registration_open: self.registration_open,
        })
    }
}

/// Event view returned to admin clients.
#[derive(Debug, Serialize)]
pub struct EventView {
    /// Event id.
    pub event_id: String,
    /// Display name.
    pub name: String,
    /// Race date.
    pub date: NaiveDate,
    /// Venue.
    pub venue: String,
    /// Entry initiation deadline.
    pub registration_deadline: DateTime<Utc>,
    /// Base entry fee in cents.
    pub entry_fee_cents: i64,
    /// Whether drivers may initiate entries.
    pub registration_open: bool,
}

impl From<RaceEvent> for EventView {
    fn from(event: RaceEvent) -> Self {
        Self {
            event_id: event.event_id.into_inner(),
            name: event.name,
            date: event.date,
            venue: event.venue,
            registration_deadline: event.registration_deadline,
            entry_fee_cents: event.entry_fee.cents(),
            registration_open: event.registration_open,
        }
    }
}

/// Create an event.
///
/// # Errors
///
/// Validation errors for malformed fields.
pub async fn create_event(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> Result<(StatusCode, Json<EventView>), AppError> {
    let event_id = request
        .event_id
        .clone()
        .map_or_else(EventId::generate, EventId::from);
    let event = request.into_event(event_id)?;
    state
        .store
        .insert_event(&event)
        .await
        .map_err(CoordinatorError::from)?;
    tracing::info!(event_id = %event.event_id, "event created");
    Ok((StatusCode::CREATED, Json(event.into())))
}

/// Update an event.
///
/// # Errors
///
/// Not-found for unknown events; validation errors otherwise.
pub async fn update_event(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> Result<Json<EventView>, AppError> {
    let Some(event_id) = request.event_id.clone() else {
        return Err(AppError::validation("event_id is required for updates"));
    };
    let event = request.into_event(EventId::from(event_id))?;
    state
        .store
        .update_event(&event)
        .await
        .map_err(CoordinatorError::from)?;
    Ok(Json(event.into()))
}

/// Event listing response.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// Events, by date.
    pub events: Vec<EventView>,
}

/// List all events.
///
/// # Errors
///
/// Store failures only.
pub async fn get_events(
    _auth: AdminAuth,
    State(state): State<AppState>,
) -> Result<Json<EventsResponse>, AppError> {
    let events = state
        .store
        .list_events()
        .await
        .map_err(CoordinatorError::from)?;
    Ok(Json(EventsResponse {
        events: events.into_iter().map(EventView::from).collect(),
    }))
}

/// Discount code payload.
#[derive(Debug, Deserialize)]
pub struct DiscountCodeRequest {
    /// The code drivers will type.
    pub code: String,
    /// `percent`, `fixed` or `free`.
    pub discount_type: String,
    /// Percent (0–100) or cents; ignored for `free`.
    #[serde(default)]
    pub discount_value: i64,
    /// Whether the code is redeemable.
    pub is_active: bool,
}

/// Create or replace a discount code.
///
/// # Errors
///
/// Validation errors for malformed codes.
pub async fn upsert_discount_code(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<DiscountCodeRequest>,
) -> Result<StatusCode, AppError> {
    if request.code.trim().is_empty() {
        return Err(AppError::validation("code is required"));
    }
    let discount_type = DiscountType::parse(&request.discount_type).ok_or_else(|| {
        AppError::validation(format!(
            "discount_type must be percent, fixed or free, got {:?}",
            request.discount_type
        ))
    })?;
    if discount_type == DiscountType::Percent && !(0..=100).contains(&request.discount_value) {
        return Err(AppError::validation("percent discounts must be 0-100"));
    }
    state
        .store
        .upsert_discount(&DiscountCode {
            code: request.code.trim().to_string(),
            discount_type,
            discount_value: request.discount_value,
            is_active: request.is_active,
        })
        .await
        .map_err(CoordinatorError::from)?;
    Ok(StatusCode::OK)
}
