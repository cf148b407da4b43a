//! Single-consumer outbound mail queue.
//!
//! Callers enqueue and return immediately; one worker drains the queue,
//! spacing sends by a minimum inter-send delay and folding admin activity
//! notes into periodic summary emails. The queue is the only path to the
//! provider, which keeps per-recipient rate limits honoured under parallel
//! request handlers.

use super::provider::EmailSender;
use super::templates::{self, Template};
use super::{Mailer, MailerError, OutboundEmail, Result};
use crate::types::RaceEntry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// Queue sizing and pacing.
#[derive(Clone, Debug)]
pub struct MailQueueConfig {
    /// Bounded queue capacity; enqueueing into a full queue is an error.
    pub capacity: usize,
    /// Minimum milliseconds between two provider calls.
    pub min_send_interval_ms: u64,
    /// Seconds between admin summary flushes.
    pub admin_flush_interval_secs: u64,
    /// Recipient of admin summaries.
    pub admin_email: String,
}

impl Default for MailQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            min_send_interval_ms: 500,
            admin_flush_interval_secs: 60,
            admin_email: String::new(),
        }
    }
}

enum Item {
    Email(OutboundEmail),
    AdminNote(String),
}

/// Handle to the outbound mail queue.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<Item>,
}

impl MailQueue {
    /// Start the queue worker and return the enqueue handle.
    #[must_use]
    pub fn start(sender: Arc<dyn EmailSender>, config: MailQueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity);
        tokio::spawn(worker(sender, config, rx));
        Self { tx }
    }

    fn enqueue(&self, item: Item) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                MailerError::Provider("mail queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => MailerError::QueueClosed,
        })
    }

    fn enqueue_email(&self, email: OutboundEmail) -> Result<()> {
        if !email.to.contains('@') {
            return Err(MailerError::InvalidRecipient(email.to));
        }
        self.enqueue(Item::Email(email))
    }
}

async fn worker(
    sender: Arc<dyn EmailSender>,
    config: MailQueueConfig,
    mut rx: mpsc::Receiver<Item>,
) {
    let min_interval = Duration::from_millis(config.min_send_interval_ms);
    let mut last_send: Option<Instant> = None;
    let mut notes: Vec<String> = Vec::new();

    let mut flush = tokio::time::interval(Duration::from_secs(
        config.admin_flush_interval_secs.max(1),
    ));
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(Item::Email(email)) => {
                    deliver(&*sender, &email, &mut last_send, min_interval).await;
                }
                Some(Item::AdminNote(note)) => notes.push(note),
                None => {
                    flush_notes(&*sender, &config, &mut notes, &mut last_send, min_interval).await;
                    tracing::debug!("mail queue worker stopping");
                    return;
                }
            },
            _ = flush.tick() => {
                flush_notes(&*sender, &config, &mut notes, &mut last_send, min_interval).await;
            }
        }
    }
}

async fn deliver(
    sender: &dyn EmailSender,
    email: &OutboundEmail,
    last_send: &mut Option<Instant>,
    min_interval: Duration,
) {
    if let Some(last) = *last_send {
        let elapsed = last.elapsed();
        if elapsed < min_interval {
            tokio::time::sleep(min_interval - elapsed).await;
        }
    }
    *last_send = Some(Instant::now());
    if let Err(error) = sender.deliver(email).await {
        tracing::warn!(to = %email.to, subject = %email.subject, %error, "email send failed");
    }
}

async fn flush_notes(
    sender: &dyn EmailSender,
    config: &MailQueueConfig,
    notes: &mut Vec<String>,
    last_send: &mut Option<Instant>,
    min_interval: Duration,
) {
    if notes.is_empty() || config.admin_email.is_empty() {
        notes.clear();
        return;
    }
    let batch = std::mem::take(notes);
    let email = OutboundEmail {
        to: config.admin_email.clone(),
        subject: Template::AdminActivitySummary.subject().to_string(),
        html: templates::admin_summary(&batch),
        images: Vec::new(),
    };
    deliver(sender, &email, last_send, min_interval).await;
}

#[async_trait]
impl Mailer for MailQueue {
    async fn send_registration_confirmation(&self, to: &str, first_name: &str) -> Result<()> {
        let html = templates::render(
            Template::RegistrationConfirmation,
            &[("FIRST_NAME", &templates::escape_html(first_name))],
        )?;
        self.enqueue_email(OutboundEmail {
            to: to.to_string(),
            subject: Template::RegistrationConfirmation.subject().to_string(),
            html,
            images: Vec::new(),
        })
    }

    async fn send_password_reset(&self, to: &str, reset_link: &str) -> Result<()> {
        let html = templates::render(Template::PasswordReset, &[("RESET_LINK", reset_link)])?;
        self.enqueue_email(OutboundEmail {
            to: to.to_string(),
            subject: Template::PasswordReset.subject().to_string(),
            html,
            images: Vec::new(),
        })
    }

    async fn send_race_entry_confirmation(
        &self,
        to: &str,
        driver_name: &str,
        event_name: &str,
        entry: &RaceEntry,
    ) -> Result<()> {
        let sections = templates::ticket_sections(entry);
        let html = templates::render(
            Template::RaceEntryConfirmation,
            &[
                ("DRIVER_NAME", &templates::escape_html(driver_name)),
                ("EVENT_NAME", &templates::escape_html(event_name)),
                ("RACE_CLASS", &templates::escape_html(&entry.race_class)),
                ("AMOUNT", &entry.amount_paid.to_decimal_string()),
                ("PAYMENT_REFERENCE", &entry.payment_reference),
                ("TICKET_SECTIONS", &sections),
            ],
        )?;
        self.enqueue_email(OutboundEmail {
            to: to.to_string(),
            subject: Template::RaceEntryConfirmation.subject().to_string(),
            html,
            images: super::ticket_barcodes(entry)?,
        })
    }

    async fn send_pool_rental_confirmation(
        &self,
        to: &str,
        driver_name: &str,
        championship_class: &str,
        rental_type: &str,
    ) -> Result<()> {
        let html = templates::render(
            Template::PoolRentalConfirmation,
            &[
                ("DRIVER_NAME", &templates::escape_html(driver_name)),
                ("RACE_CLASS", &templates::escape_html(championship_class)),
                ("RENTAL_TYPE", &templates::escape_html(rental_type)),
            ],
        )?;
        self.enqueue_email(OutboundEmail {
            to: to.to_string(),
            subject: Template::PoolRentalConfirmation.subject().to_string(),
            html,
            images: Vec::new(),
        })
    }

    async fn notify_admin(&self, note: &str) -> Result<()> {
        self.enqueue(Item::AdminNote(note.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingSender {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    #[async_trait]
    impl EmailSender for CountingSender {
        async fn deliver(&self, email: &OutboundEmail) -> Result<()> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(email.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_enqueued_email() {
        let sender = Arc::new(CountingSender {
            sent: Mutex::new(Vec::new()),
        });
        let queue = MailQueue::start(
            sender.clone(),
            MailQueueConfig {
                min_send_interval_ms: 0,
                ..MailQueueConfig::default()
            },
        );
        queue
            .send_password_reset("driver@example.com", "https://example.com/reset")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = sender
            .sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "driver@example.com");
    }

    #[tokio::test]
    async fn rejects_invalid_recipient() {
        let sender = Arc::new(CountingSender {
            sent: Mutex::new(Vec::new()),
        });
        let queue = MailQueue::start(sender, MailQueueConfig::default());
        let err = queue
            .send_password_reset("not-an-address", "https://example.com/reset")
            .await
            .unwrap_err();
        assert!(matches!(err, MailerError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn admin_notes_are_batched() {
        let sender = Arc::new(CountingSender {
            sent: Mutex::new(Vec::new()),
        });
        let queue = MailQueue::start(
            sender.clone(),
            MailQueueConfig {
                min_send_interval_ms: 0,
                admin_flush_interval_secs: 1,
                admin_email: "race-office@example.com".to_string(),
                ..MailQueueConfig::default()
            },
        );
        queue.notify_admin("pool rental for D-001").await.unwrap();
        queue.notify_admin("late webhook for E-RED").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_300)).await;
        let sent = sender
            .sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(sent.len(), 1, "both notes fold into one summary");
        assert!(sent[0].html.contains("pool rental for D-001"));
        assert!(sent[0].html.contains("late webhook for E-RED"));
    }
}
