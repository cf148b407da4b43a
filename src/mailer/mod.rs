//! Templated outbound email with inline barcode images.
//!
//! The mailer renders a named template, substitutes placeholders, attaches a
//! Code 39 PNG for each present ticket reference, and delivers through an
//! external transactional email provider. Delivery failures are returned to
//! the caller for logging but must never fail the containing business
//! transaction.
//!
//! Sending is fire-and-forget through a single-consumer queue
//! ([`queue::MailQueue`]) that honours the provider's per-recipient rate
//! limits and batches high-frequency admin notifications into one summary
//! email.

pub mod provider;
pub mod queue;
pub mod templates;

#[cfg(feature = "test-utils")]
pub mod mock;

use crate::types::{RaceEntry, RentalItem};
use async_trait::async_trait;
use thiserror::Error;

/// Result type alias for mailer operations.
pub type Result<T> = std::result::Result<T, MailerError>;

/// Mailer error. Logged by callers, never surfaced to business callers.
#[derive(Debug, Error, Clone)]
pub enum MailerError {
    /// The provider rejected or failed the send.
    #[error("email provider error: {0}")]
    Provider(String),

    /// The recipient address is not usable.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Template rendering failed (missing template, bad barcode text).
    #[error("template error: {0}")]
    Template(String),

    /// The outbound queue is gone (shutdown).
    #[error("mail queue closed")]
    QueueClosed,
}

/// An inline image attachment, referenced from the HTML by `cid:`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImage {
    /// Content id, without the `cid:` prefix.
    pub cid: String,
    /// PNG bytes.
    pub png: Vec<u8>,
}

/// A fully rendered outbound email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEmail {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Rendered HTML body.
    pub html: String,
    /// Inline images (ticket barcodes).
    pub images: Vec<InlineImage>,
}

/// High-level mailer used by the coordinator and the HTTP surface.
///
/// Every method enqueues and returns; delivery happens on the queue worker.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Driver registration received.
    async fn send_registration_confirmation(&self, to: &str, first_name: &str) -> Result<()>;

    /// Password reset link.
    async fn send_password_reset(&self, to: &str, reset_link: &str) -> Result<()>;

    /// Race entry confirmation with per-item ticket barcodes.
    ///
    /// Sent at initiation time: the email is the primary user-facing receipt
    /// and must survive webhook loss.
    async fn send_race_entry_confirmation(
        &self,
        to: &str,
        driver_name: &str,
        event_name: &str,
        entry: &RaceEntry,
    ) -> Result<()>;

    /// Pool engine rental confirmation.
    async fn send_pool_rental_confirmation(
        &self,
        to: &str,
        driver_name: &str,
        championship_class: &str,
        rental_type: &str,
    ) -> Result<()>;

    /// Admin activity note; batched into a summary email by the queue.
    async fn notify_admin(&self, note: &str) -> Result<()>;
}

/// Render the barcode attachments for an entry's present tickets.
///
/// # Errors
///
/// Returns [`MailerError::Template`] when a reference cannot be encoded.
pub fn ticket_barcodes(entry: &RaceEntry) -> Result<Vec<InlineImage>> {
    entry
        .tickets
        .present()
        .map(|(item, reference)| {
            let window = crate::barcode::scan_window(reference);
            let png = crate::barcode::render_png(window, 2, 48)
                .map_err(|e| MailerError::Template(e.to_string()))?;
            Ok(InlineImage {
                cid: barcode_cid(item),
                png,
            })
        })
        .collect()
}

/// Content id for one item's barcode image.
#[must_use]
pub fn barcode_cid(item: RentalItem) -> String {
    format!("barcode-{}", item.tag())
}
