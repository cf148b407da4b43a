//! Driver-facing endpoints: registration, login, password reset, entries.

use super::{require_driver, AppError, Credentials, EntryView};
use crate::auth;
use crate::server::state::AppState;
use crate::types::{ApprovalStatus, AuditRecord, Driver, DriverId};
use axum::{extract::State, http::StatusCode, Json};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Driver registration payload, matching the public registration form.
#[derive(Debug, Deserialize)]
pub struct RegisterDriverRequest {
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Login email; unique.
    pub email: String,
    /// Date of birth, ISO `YYYY-MM-DD`.
    pub date_of_birth: String,
    /// Nationality.
    pub nationality: String,
    /// Gender.
    pub gender: String,
    /// Championship entered.
    pub championship: String,
    /// Championship class.
    #[serde(rename = "class")]
    pub race_class: String,
    /// Race number.
    pub race_number: String,
    /// Team name.
    #[serde(default)]
    pub team_name: String,
    /// Coach name.
    #[serde(default)]
    pub coach_name: String,
    /// Kart brand.
    #[serde(default)]
    pub kart_brand: String,
    /// Transponder number.
    #[serde(default)]
    pub transponder_number: String,
    /// Emergency contact name.
    pub contact_name: String,
    /// Emergency contact phone.
    pub contact_phone: String,
    /// Emergency contact relationship.
    pub contact_relationship: String,
    /// Media release consent; persisted with the profile.
    #[serde(default)]
    pub media_release_consent: bool,
    /// Initial password.
    pub password: String,
}

/// Registration response.
#[derive(Debug, Serialize)]
pub struct RegisterDriverResponse {
    /// Assigned driver id.
    pub driver_id: String,
    /// Approval status (`pending` until reviewed).
    pub status: String,
    /// Human-readable next step.
    pub message: String,
}

/// Register a new driver. The account stays `pending` until an admin
/// approves it; a confirmation email is dispatched either way.
///
/// # Errors
///
/// Validation errors for malformed fields; conflict when the email is
/// already registered.
pub async fn register_driver(
    State(state): State<AppState>,
    Json(request): Json<RegisterDriverRequest>,
) -> Result<(StatusCode, Json<RegisterDriverResponse>), AppError> {
    if !request.email.contains('@') {
        return Err(AppError::validation("A valid email address is required"));
    }
    if request.password.len() < 8 {
        return Err(AppError::validation(
            "Password must be at least 8 characters",
        ));
    }
    for (field, value) in [
        ("first_name", &request.first_name),
        ("last_name", &request.last_name),
        ("class", &request.race_class),
        ("contact_name", &request.contact_name),
        ("contact_phone", &request.contact_phone),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::validation(format!("{field} is required")));
        }
    }
    let date_of_birth = NaiveDate::parse_from_str(&request.date_of_birth, "%Y-%m-%d")
        .map_err(|_| AppError::validation("date_of_birth must be YYYY-MM-DD"))?;

    let password_hash = auth::hash_password(&request.password).map_err(AppError::from)?;
    let driver = Driver {
        driver_id: DriverId::generate(),
        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email.trim().to_string(),
        date_of_birth,
        nationality: request.nationality,
        gender: request.gender,
        championship: request.championship,
        race_class: request.race_class,
        race_number: request.race_number,
        team_name: request.team_name,
        coach_name: request.coach_name,
        kart_brand: request.kart_brand,
        transponder_number: request.transponder_number,
        contact_name: request.contact_name,
        contact_phone: request.contact_phone,
        contact_relationship: request.contact_relationship,
        media_release_consent: request.media_release_consent,
        approval_status: ApprovalStatus::Pending,
        password_hash,
        reset_token_hash: None,
        reset_token_expires: None,
        season_engine_rental: false,
        next_race_entry_status: None,
        next_race_engine_rental_status: None,
        created_at: Utc::now(),
    };

    state.store.insert_driver(&driver).await.map_err(|e| match e {
        crate::store::StoreError::Duplicate { .. } => {
            AppError::conflict("This email address is already registered")
        }
        other => AppError::from(crate::coordinator::CoordinatorError::from(other)),
    })?;

    let audit = AuditRecord {
        at: Utc::now(),
        action: "driver_registered".to_string(),
        actor: driver.driver_id.as_str().to_string(),
        target: driver.driver_id.as_str().to_string(),
        detail: serde_json::json!({ "championship": driver.championship }),
    };
    if let Err(error) = state.store.append_audit(&audit).await {
        tracing::warn!(%error, "registration audit failed");
    }
    if let Err(error) = state
        .mailer
        .send_registration_confirmation(&driver.email, &driver.first_name)
        .await
    {
        tracing::warn!(driver_id = %driver.driver_id, %error, "registration email failed");
    }

    tracing::info!(driver_id = %driver.driver_id, "driver registered");
    Ok((
        StatusCode::OK,
        Json(RegisterDriverResponse {
            driver_id: driver.driver_id.into_inner(),
            status: ApprovalStatus::Pending.as_str().to_string(),
            message: "Registration received; you can sign in once it has been approved"
                .to_string(),
        }),
    ))
}

/// Driver profile returned by login.
#[derive(Debug, Serialize)]
pub struct DriverProfile {
    /// Driver id.
    pub driver_id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Email.
    pub email: String,
    /// Championship.
    pub championship: String,
    /// Class.
    pub race_class: String,
    /// Race number.
    pub race_number: String,
    /// Season pool engine rental purchased.
    pub season_engine_rental: bool,
    /// Next-race entry status.
    pub next_race_entry_status: Option<String>,
    /// Next-race engine rental status.
    pub next_race_engine_rental_status: Option<String>,
}

impl From<Driver> for DriverProfile {
    fn from(driver: Driver) -> Self {
        Self {
            driver_id: driver.driver_id.into_inner(),
            first_name: driver.first_name,
            last_name: driver.last_name,
            email: driver.email,
            championship: driver.championship,
            race_class: driver.race_class,
            race_number: driver.race_number,
            season_engine_rental: driver.season_engine_rental,
            next_race_entry_status: driver.next_race_entry_status,
            next_race_engine_rental_status: driver.next_race_engine_rental_status,
        }
    }
}

/// Authenticate with email and password.
///
/// # Errors
///
/// Unauthorized for bad credentials; forbidden while approval is pending.
pub async fn login_with_password(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<DriverProfile>, AppError> {
    let driver = require_driver(&state, &credentials).await?;
    Ok(Json(driver.into()))
}

/// Password reset request body.
#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    /// Account email; unknown addresses succeed silently.
    pub email: String,
}

/// Request a password reset email.
///
/// # Errors
///
/// Store failures only; unknown emails are not revealed.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<StatusCode, AppError> {
    state.auth.request_password_reset(&request.email).await?;
    Ok(StatusCode::OK)
}

/// Password reset completion body.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    /// Account email.
    pub email: String,
    /// Token from the reset email.
    pub token: String,
    /// New password.
    pub new_password: String,
}

/// Complete a password reset.
///
/// # Errors
///
/// Bad request for invalid or expired tokens.
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<StatusCode, AppError> {
    if request.new_password.len() < 8 {
        return Err(AppError::validation(
            "Password must be at least 8 characters",
        ));
    }
    state
        .auth
        .reset_password(&request.email, &request.token, &request.new_password)
        .await?;
    Ok(StatusCode::OK)
}

/// Response listing a driver's entries.
#[derive(Debug, Serialize)]
pub struct DriverEntriesResponse {
    /// Entries, newest first.
    pub entries: Vec<EntryView>,
}

/// List the authenticated driver's race entries with ticket references.
///
/// # Errors
///
/// Unauthorized for bad credentials.
pub async fn get_driver_race_entries(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<DriverEntriesResponse>, AppError> {
    let driver = require_driver(&state, &credentials).await?;
    let entries = state
        .store
        .entries_for_driver(&driver.driver_id)
        .await
        .map_err(crate::coordinator::CoordinatorError::from)?;
    Ok(Json(DriverEntriesResponse {
        entries: entries.into_iter().map(EntryView::from).collect(),
    }))
}
