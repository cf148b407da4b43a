//! Recording mailer for tests.

use super::{Mailer, MailerError, Result};
use crate::types::RaceEntry;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What kind of email a recorded send was.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentKind {
    /// Registration confirmation.
    Registration,
    /// Password reset.
    PasswordReset,
    /// Race entry confirmation.
    RaceEntry,
    /// Pool rental confirmation.
    PoolRental,
    /// Admin activity note.
    AdminNote,
}

/// One recorded send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMail {
    /// Kind of email.
    pub kind: SentKind,
    /// Recipient (empty for admin notes).
    pub to: String,
    /// Payment reference for race-entry confirmations, note text for admin
    /// notes, empty otherwise.
    pub detail: String,
}

/// Mailer that records sends instead of delivering.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    fail_all: bool,
}

impl RecordingMailer {
    /// Mailer where every send succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mailer where every send fails, for failure-isolation tests.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_all: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SentMail>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All recorded sends, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMail> {
        self.lock().clone()
    }

    /// Number of recorded sends of one kind.
    #[must_use]
    pub fn count(&self, kind: SentKind) -> usize {
        self.lock().iter().filter(|m| m.kind == kind).count()
    }

    fn record(&self, kind: SentKind, to: &str, detail: &str) -> Result<()> {
        if self.fail_all {
            return Err(MailerError::Provider("recording mailer set to fail".to_string()));
        }
        self.lock().push(SentMail {
            kind,
            to: to.to_string(),
            detail: detail.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_registration_confirmation(&self, to: &str, _first_name: &str) -> Result<()> {
        self.record(SentKind::Registration, to, "")
    }

    async fn send_password_reset(&self, to: &str, reset_link: &str) -> Result<()> {
        self.record(SentKind::PasswordReset, to, reset_link)
    }

    async fn send_race_entry_confirmation(
        &self,
        to: &str,
        _driver_name: &str,
        _event_name: &str,
        entry: &RaceEntry,
    ) -> Result<()> {
        self.record(SentKind::RaceEntry, to, &entry.payment_reference)
    }

    async fn send_pool_rental_confirmation(
        &self,
        to: &str,
        _driver_name: &str,
        _championship_class: &str,
        _rental_type: &str,
    ) -> Result<()> {
        self.record(SentKind::PoolRental, to, "")
    }

    async fn notify_admin(&self, note: &str) -> Result<()> {
        self.record(SentKind::AdminNote, "", note)
    }
}
