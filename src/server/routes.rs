//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::{admin, drivers, entries, webhook};
use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the complete router: health checks, driver endpoints, the gateway
/// webhook, and the token-guarded admin surface.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let driver_routes = Router::new()
        .route("/registerDriver", post(drivers::register_driver))
        .route("/loginWithPassword", post(drivers::login_with_password))
        .route(
            "/requestPasswordReset",
            post(drivers::request_password_reset),
        )
        .route("/resetPassword", post(drivers::reset_password))
        .route(
            "/getDriverRaceEntries",
            post(drivers::get_driver_race_entries),
        )
        .route("/initiateRacePayment", post(entries::initiate_race_payment))
        .route(
            "/registerFreeRaceEntry",
            post(entries::register_free_race_entry),
        )
        .route("/notifyPayment", post(webhook::notify_payment));

    let admin_routes: Router<AppState> = Router::new()
        .route("/addRaceEntryManual", post(admin::add_race_entry_manual))
        .route("/reconcilePayment", post(admin::reconcile_payment))
        .route("/editEntry", post(admin::edit_entry))
        .route("/cancelEntry", post(admin::cancel_entry))
        .route("/getRaceEntries", get(admin::get_race_entries))
        .route(
            "/exportRaceEntriesPdf/:event_id",
            get(admin::export_race_entries_pdf),
        )
        .route("/createEvent", post(admin::create_event))
        .route("/updateEvent", post(admin::update_event))
        .route("/getEvents", get(admin::get_events))
        .route("/upsertDiscountCode", post(admin::upsert_discount_code));

    let api_routes = driver_routes.nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
