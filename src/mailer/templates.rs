//! Email templates and placeholder substitution.
//!
//! Templates are identified by name and carry `{{NAME}}` placeholders. The
//! race-entry confirmation additionally renders one ticket section per
//! present rental item, each with an inline barcode image.

use super::{MailerError, Result};
use crate::types::{RaceEntry, RentalItem};

/// Template names recognised by the mailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Template {
    /// Driver registration received.
    RegistrationConfirmation,
    /// Password reset link.
    PasswordReset,
    /// Race entry confirmation with ticket sections.
    RaceEntryConfirmation,
    /// Pool engine rental confirmation.
    PoolRentalConfirmation,
    /// Batched admin activity summary.
    AdminActivitySummary,
}

impl Template {
    /// Template name, as referenced by operators and the template files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RegistrationConfirmation => "registration-confirmation",
            Self::PasswordReset => "password-reset",
            Self::RaceEntryConfirmation => "race-entry-confirmation",
            Self::PoolRentalConfirmation => "pool-rental-confirmation",
            Self::AdminActivitySummary => "admin-activity-summary",
        }
    }

    /// Subject line for this template.
    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::RegistrationConfirmation => "Welcome to the championship driver registry",
            Self::PasswordReset => "Reset your driver registry password",
            Self::RaceEntryConfirmation => "Your race entry and tickets",
            Self::PoolRentalConfirmation => "Your pool engine rental",
            Self::AdminActivitySummary => "Registry activity summary",
        }
    }

    const fn html(self) -> &'static str {
        match self {
            Self::RegistrationConfirmation => REGISTRATION_CONFIRMATION,
            Self::PasswordReset => PASSWORD_RESET,
            Self::RaceEntryConfirmation => RACE_ENTRY_CONFIRMATION,
            Self::PoolRentalConfirmation => POOL_RENTAL_CONFIRMATION,
            Self::AdminActivitySummary => ADMIN_ACTIVITY_SUMMARY,
        }
    }
}

/// Substitute `{{NAME}}` placeholders in a template.
///
/// # Errors
///
/// Returns [`MailerError::Template`] when a placeholder remains unfilled
/// after substitution.
pub fn render(template: Template, vars: &[(&str, &str)]) -> Result<String> {
    let mut html = template.html().to_string();
    for (key, value) in vars {
        html = html.replace(&format!("{{{{{key}}}}}"), value);
    }
    if let Some(start) = html.find("{{") {
        let tail: String = html[start..].chars().take(32).collect();
        return Err(MailerError::Template(format!(
            "unfilled placeholder in {}: {tail}",
            template.name()
        )));
    }
    Ok(html)
}

/// Render the per-item ticket sections of a race entry confirmation.
///
/// One section per present ticket, in canonical item order; entries without
/// items (e.g. synthesised late-webhook rows) produce an empty string.
#[must_use]
pub fn ticket_sections(entry: &RaceEntry) -> String {
    entry
        .tickets
        .present()
        .map(|(item, reference)| ticket_section(item, reference))
        .collect()
}

fn ticket_section(item: RentalItem, reference: &str) -> String {
    format!(
        r#"<div style="border: 1px solid #d1d5db; border-radius: 6px; padding: 16px; margin: 12px 0;">
  <h3 style="margin: 0 0 8px 0;">{name}</h3>
  <p style="margin: 0 0 8px 0; font-family: monospace;">{reference}</p>
  <img src="cid:{cid}" alt="{reference}" style="display: block; max-width: 100%;">
</div>
"#,
        name = item.display_name(),
        cid = super::barcode_cid(item),
    )
}

const REGISTRATION_CONFIRMATION: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Welcome, {{FIRST_NAME}}!</h2>
    <p>Your driver registration has been received and is awaiting review by the
       race office. You will be able to sign in once it has been approved.</p>
    <p style="color: #666; font-size: 14px;">If you did not register, you can
       safely ignore this email.</p>
  </div>
</body>
</html>
"#;

const PASSWORD_RESET: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Reset your password</h2>
    <p>Click the link below to choose a new password. The link expires in one
       hour.</p>
    <p style="margin: 30px 0;">
      <a href="{{RESET_LINK}}"
         style="display: inline-block; background-color: #dc2626; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px;">
        Reset Password
      </a>
    </p>
    <p style="color: #666; font-size: 14px;">If you did not request this,
       please ignore this email. Your password will not be changed.</p>
  </div>
</body>
</html>
"#;

const RACE_ENTRY_CONFIRMATION: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Race entry received</h2>
    <p>Hi {{DRIVER_NAME}},</p>
    <p>Your entry for <strong>{{EVENT_NAME}}</strong> in class
       <strong>{{RACE_CLASS}}</strong> has been recorded.</p>
    <p>Amount: <strong>R {{AMOUNT}}</strong><br>
       Payment reference: <span style="font-family: monospace;">{{PAYMENT_REFERENCE}}</span></p>
    {{TICKET_SECTIONS}}
    <p style="color: #666; font-size: 14px;">Present the barcodes above at the
       race office to collect your rental items.</p>
  </div>
</body>
</html>
"#;

const POOL_RENTAL_CONFIRMATION: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Pool engine rental confirmed</h2>
    <p>Hi {{DRIVER_NAME}},</p>
    <p>Your <strong>{{RENTAL_TYPE}}</strong> pool engine rental for class
       <strong>{{RACE_CLASS}}</strong> is confirmed for the season.</p>
  </div>
</body>
</html>
"#;

const ADMIN_ACTIVITY_SUMMARY: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Registry activity</h2>
    <ul>
{{ITEMS}}
    </ul>
  </div>
</body>
</html>
"#;

/// Render the admin summary body from a batch of notes.
#[must_use]
pub fn admin_summary(notes: &[String]) -> String {
    let items: String = notes
        .iter()
        .map(|note| format!("      <li>{}</li>\n", escape_html(note)))
        .collect();
    ADMIN_ACTIVITY_SUMMARY.replace("{{ITEMS}}", &items)
}

/// Minimal HTML escaping for interpolated user data.
#[must_use]
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{
        DriverId, EntryId, EntryStatus, EventId, Money, PaymentStatus, RaceEntry, TicketRefs,
    };
    use chrono::Utc;

    fn entry_with_tickets() -> RaceEntry {
        let mut tickets = TicketRefs::none();
        tickets.set(RentalItem::Engine, Some("ENG-D001-ERED-1-ABCDEF".to_string()));
        tickets.set(RentalItem::Tyres, Some("TYR-D001-ERED-2-ABCDEF".to_string()));
        RaceEntry {
            entry_id: EntryId::from("ENT-1"),
            driver_id: DriverId::from("D-001"),
            event_id: EventId::from("E-RED"),
            race_class: "OK-J".to_string(),
            entry_items: vec![RentalItem::Engine, RentalItem::Tyres],
            amount_paid: Money::from_cents(14_900),
            payment_reference: "RACE-E-RED-D-001-1700000000000".to_string(),
            pf_payment_id: None,
            payment_status: PaymentStatus::Pending,
            entry_status: EntryStatus::PendingPayment,
            tickets,
            team_code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn renders_with_all_placeholders() {
        let html = render(
            Template::PasswordReset,
            &[("RESET_LINK", "https://example.com/reset?token=abc")],
        )
        .unwrap();
        assert!(html.contains("https://example.com/reset?token=abc"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn unfilled_placeholder_is_an_error() {
        let err = render(Template::PasswordReset, &[]).unwrap_err();
        assert!(matches!(err, MailerError::Template(_)));
    }

    #[test]
    fn ticket_sections_follow_selected_items() {
        let sections = ticket_sections(&entry_with_tickets());
        assert!(sections.contains("Pool Engine"));
        assert!(sections.contains("Tyre Set"));
        assert!(!sections.contains("Transponder"));
        assert!(sections.contains("cid:barcode-engine"));
    }

    #[test]
    fn no_items_renders_empty_sections() {
        let mut entry = entry_with_tickets();
        entry.entry_items.clear();
        entry.tickets = TicketRefs::none();
        assert_eq!(ticket_sections(&entry), "");
    }

    #[test]
    fn admin_summary_escapes_notes() {
        let html = admin_summary(&["a <b> note".to_string()]);
        assert!(html.contains("a &lt;b&gt; note"));
        assert!(!html.contains("{{ITEMS}}"));
    }
}
