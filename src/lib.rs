//! Race-entry and payment-reconciliation back office for a karting
//! championship.
//!
//! The core coordinates the driver's browser, the payment gateway and the
//! email provider under one invariant: no completed payment may ever produce
//! zero or more than one confirmed entry.
//!
//! # Architecture
//!
//! - [`store`]: durable relational state; uniqueness constraints carry the
//!   idempotency guarantees.
//! - [`tickets`]: the mint for unique, barcode-safe rental-item references.
//! - [`barcode`]: Code 39 encoding, shared by email PNGs and PDF export.
//! - [`mailer`]: templated outbound email on a single-consumer queue;
//!   failures are logged, never fatal.
//! - [`gateway`]: the trust boundary to the hosted-redirect payment
//!   gateway, covering signed form construction and webhook verification.
//! - [`coordinator`]: the entry state machine and reconciliation rules.
//! - [`api`] / [`server`]: request validation, authentication, dispatch.

pub mod api;
pub mod auth;
pub mod barcode;
pub mod config;
pub mod coordinator;
pub mod export;
pub mod gateway;
pub mod mailer;
pub mod server;
pub mod store;
pub mod tickets;
pub mod types;

pub use config::Config;
