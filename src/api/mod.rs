//! HTTP API handlers.
//!
//! The handler layer marshals requests, enforces authentication, and
//! serialises results; business logic stays in the coordinator. Driver
//! endpoints authenticate per request with email and password; admin
//! endpoints require the shared token in `X-Admin-Token`.

pub mod admin;
pub mod drivers;
pub mod entries;
pub mod error;
pub mod webhook;

pub use error::AppError;

use crate::auth;
use crate::server::state::AppState;
use crate::types::{Driver, RaceEntry, RentalItem};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the shared admin token.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Extractor that enforces the shared admin token.
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth::admin_token_matches(provided, &state.admin_token) {
            Ok(Self)
        } else {
            Err(AppError::unauthorized("Admin token required"))
        }
    }
}

/// Driver credentials carried by every driver endpoint.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    /// Login email.
    pub email: String,
    /// Password, checked against the stored hash.
    pub password: String,
}

/// Authenticate the driver carried in a request body.
///
/// # Errors
///
/// Maps auth failures to the standard envelope.
pub async fn require_driver(
    state: &AppState,
    credentials: &Credentials,
) -> Result<Driver, AppError> {
    Ok(state
        .auth
        .authenticate(&credentials.email, &credentials.password)
        .await?)
}

/// Parse item tags from a request into the typed selection.
///
/// # Errors
///
/// Rejects unknown tags with a validation error naming the tag.
pub fn parse_items(tags: &[String]) -> Result<Vec<RentalItem>, AppError> {
    tags.iter()
        .map(|tag| {
            RentalItem::from_tag(tag)
                .ok_or_else(|| AppError::validation(format!("unknown entry item: {tag:?}")))
        })
        .collect()
}

/// Entry representation returned to clients.
#[derive(Debug, Serialize)]
pub struct EntryView {
    /// Entry identifier.
    pub entry_id: String,
    /// Owning driver.
    pub driver_id: String,
    /// Target event.
    pub event_id: String,
    /// Class entered.
    pub race_class: String,
    /// Selected item tags, in order.
    pub entry_items: Vec<&'static str>,
    /// Total in cents.
    pub amount_cents: i64,
    /// Payment reference.
    pub payment_reference: String,
    /// Payment state.
    pub payment_status: String,
    /// Entry lifecycle state.
    pub entry_status: String,
    /// Engine ticket reference.
    pub ticket_engine_ref: Option<String>,
    /// Tyre ticket reference.
    pub ticket_tyres_ref: Option<String>,
    /// Transponder ticket reference.
    pub ticket_transponder_ref: Option<String>,
    /// Fuel ticket reference.
    pub ticket_fuel_ref: Option<String>,
    /// Discount code used, if any.
    pub team_code: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<RaceEntry> for EntryView {
    fn from(entry: RaceEntry) -> Self {
        Self {
            entry_id: entry.entry_id.into_inner(),
            driver_id: entry.driver_id.into_inner(),
            event_id: entry.event_id.into_inner(),
            race_class: entry.race_class,
            entry_items: entry.entry_items.iter().map(|i| i.tag()).collect(),
            amount_cents: entry.amount_paid.cents(),
            payment_reference: entry.payment_reference,
            payment_status: entry.payment_status.as_str().to_string(),
            entry_status: entry.entry_status.as_str().to_string(),
            ticket_engine_ref: entry.tickets.engine,
            ticket_tyres_ref: entry.tickets.tyres,
            ticket_transponder_ref: entry.tickets.transponder,
            ticket_fuel_ref: entry.tickets.fuel,
            team_code: entry.team_code,
            created_at: entry.created_at,
            completed_at: entry.completed_at,
        }
    }
}
