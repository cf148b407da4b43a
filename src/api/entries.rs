//! Race-entry endpoints: paid initiation and the free-entry shortcut.

use super::{parse_items, require_driver, AppError, Credentials, EntryView};
use crate::coordinator::{EntryRequest, InitiationOutcome};
use crate::server::state::AppState;
use crate::types::EventId;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

/// Entry initiation payload.
#[derive(Debug, Deserialize)]
pub struct InitiateRacePaymentRequest {
    /// Driver credentials (per-request auth).
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Target event.
    pub event_id: String,
    /// Chosen class.
    #[serde(rename = "class")]
    pub race_class: String,
    /// Ordered rental item tags.
    #[serde(default)]
    pub items: Vec<String>,
    /// Optional discount code.
    #[serde(default)]
    pub discount_code: Option<String>,
}

/// Initiation response. `gateway_url` and `gateway_form_fields` are absent
/// when the discount routed the request to the free-entry path.
#[derive(Debug, Serialize)]
pub struct InitiateRacePaymentResponse {
    /// `redirect` or `free`.
    pub status: &'static str,
    /// The entry row.
    pub entry: EntryView,
    /// Our payment reference (the webhook correlator).
    pub payment_reference: String,
    /// Gateway process URL to POST the form to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    /// Ordered form fields, signature last.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_form_fields: Option<Vec<(String, String)>>,
}

/// Initiate a paid race entry: persists the pending row, dispatches the
/// confirmation email, and returns the signed gateway form.
///
/// # Errors
///
/// Unauthorized for bad credentials; conflict when registration is closed;
/// validation errors otherwise.
pub async fn initiate_race_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiateRacePaymentRequest>,
) -> Result<(StatusCode, Json<InitiateRacePaymentResponse>), AppError> {
    let driver = require_driver(&state, &request.credentials).await?;
    let entry_request = EntryRequest {
        driver_id: driver.driver_id,
        event_id: EventId::from(request.event_id),
        race_class: request.race_class,
        items: parse_items(&request.items)?,
        discount_code: request.discount_code,
    };

    let outcome = state.coordinator.initiate_paid_entry(&entry_request).await?;
    let response = match outcome {
        InitiationOutcome::Redirect { entry, form } => {
            let payment_reference = entry.payment_reference.clone();
            InitiateRacePaymentResponse {
                status: "redirect",
                entry: entry.into(),
                payment_reference,
                gateway_url: Some(form.process_url),
                gateway_form_fields: Some(form.fields),
            }
        }
        InitiationOutcome::Free { entry } => {
            let payment_reference = entry.payment_reference.clone();
            InitiateRacePaymentResponse {
                status: "free",
                entry: entry.into(),
                payment_reference,
                gateway_url: None,
                gateway_form_fields: None,
            }
        }
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Free-entry payload: as initiation, but the discount code is mandatory.
#[derive(Debug, Deserialize)]
pub struct RegisterFreeRaceEntryRequest {
    /// Driver credentials (per-request auth).
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Target event.
    pub event_id: String,
    /// Chosen class.
    #[serde(rename = "class")]
    pub race_class: String,
    /// Ordered rental item tags.
    #[serde(default)]
    pub items: Vec<String>,
    /// Discount code; must be active and of the `free` type.
    pub discount_code: String,
}

/// Register a free race entry directly.
///
/// # Errors
///
/// As initiation, plus a validation error when the code does not grant a
/// free entry.
pub async fn register_free_race_entry(
    State(state): State<AppState>,
    Json(request): Json<RegisterFreeRaceEntryRequest>,
) -> Result<(StatusCode, Json<EntryView>), AppError> {
    let driver = require_driver(&state, &request.credentials).await?;
    let entry_request = EntryRequest {
        driver_id: driver.driver_id,
        event_id: EventId::from(request.event_id),
        race_class: request.race_class,
        items: parse_items(&request.items)?,
        discount_code: Some(request.discount_code),
    };
    let entry = state.coordinator.register_free_entry(&entry_request).await?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}
