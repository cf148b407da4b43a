//! Payment gateway adapter.
//!
//! Translates between the entry model and the external hosted-redirect
//! gateway. Outbound, it constructs the ordered form fields (with signature)
//! that the browser POSTs to the gateway; the coordinator never contacts the
//! gateway directly. Inbound, it verifies the webhook signature over the
//! form-encoded payload and normalises the known fields into a typed record.
//!
//! This module is the single boundary at which externally-formatted data
//! becomes trusted.

pub mod reference;

pub use reference::PaymentReference;

use crate::types::Money;
use md5::{Digest, Md5};
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway adapter error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The webhook signature did not verify; nothing may be trusted.
    #[error("webhook signature invalid")]
    SignatureInvalid,

    /// The payload could not be decoded as form data.
    #[error("malformed webhook payload: {reason}")]
    MalformedPayload {
        /// What failed to decode.
        reason: String,
    },

    /// A required webhook field is absent.
    #[error("webhook field missing: {field}")]
    MissingField {
        /// The absent field.
        field: &'static str,
    },

    /// The outbound redirect could not be assembled.
    #[error("gateway redirect construction failed: {reason}")]
    ConstructionFailed {
        /// What went wrong.
        reason: String,
    },
}

/// Gateway credentials and endpoints.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Hosted process URL the browser form POSTs to.
    pub process_url: String,
    /// Merchant id.
    pub merchant_id: String,
    /// Merchant key.
    pub merchant_key: String,
    /// Signature passphrase; empty string disables the passphrase suffix.
    pub passphrase: String,
    /// Browser return URL after successful payment.
    pub return_url: String,
    /// Browser return URL after cancelled payment.
    pub cancel_url: String,
    /// Server-to-server webhook URL.
    pub notify_url: String,
}

/// What an outbound payment needs from the coordinator.
#[derive(Clone, Debug)]
pub struct RedirectRequest {
    /// Our payment reference (the webhook correlator).
    pub payment_reference: String,
    /// Amount due.
    pub amount: Money,
    /// Item name shown on the gateway page.
    pub item_name: String,
    /// Item description shown on the gateway page.
    pub item_description: String,
    /// Payer email.
    pub payer_email: String,
    /// Payer first name.
    pub payer_first_name: String,
}

/// The signed form the browser must POST to the gateway.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct RedirectForm {
    /// Gateway process URL.
    pub process_url: String,
    /// Ordered form fields, signature last. Order is signature-significant.
    pub fields: Vec<(String, String)>,
}

/// Normalised, signature-verified webhook notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentNotification {
    /// Our payment reference, echoed back.
    pub payment_reference: String,
    /// Gateway-assigned payment id.
    pub pf_payment_id: String,
    /// Gross amount.
    pub amount_gross: Money,
    /// Gateway payment status, verbatim (e.g. `"COMPLETE"`).
    pub payment_status: String,
    /// Payer email.
    pub payer_email: String,
    /// Payer first name.
    pub payer_first_name: String,
    /// Payer last name.
    pub payer_last_name: String,
    /// Item name echoed by the gateway.
    pub item_name: String,
    /// The payload verbatim, for the ledger snapshot.
    pub raw_payload: String,
}

impl PaymentNotification {
    /// Whether the gateway reports the payment as completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.payment_status == "COMPLETE"
    }

    /// Classify the echoed payment reference.
    #[must_use]
    pub fn reference(&self) -> PaymentReference {
        PaymentReference::classify(&self.payment_reference)
    }
}

/// The gateway adapter.
#[derive(Clone, Debug)]
pub struct GatewayAdapter {
    config: GatewayConfig,
}

impl GatewayAdapter {
    /// Create an adapter over the given credentials.
    #[must_use]
    pub const fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Build the redirect form for an outbound payment.
    ///
    /// Field order is fixed and signature-significant; the signature field is
    /// appended last.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConstructionFailed`] when a required field is
    /// empty or the amount is not positive.
    pub fn build_redirect(&self, request: &RedirectRequest) -> Result<RedirectForm> {
        if request.payment_reference.is_empty() {
            return Err(GatewayError::ConstructionFailed {
                reason: "payment reference is empty".to_string(),
            });
        }
        if request.amount.cents() <= 0 {
            return Err(GatewayError::ConstructionFailed {
                reason: format!("amount must be positive, got {}", request.amount),
            });
        }
        if request.item_name.is_empty() {
            return Err(GatewayError::ConstructionFailed {
                reason: "item name is empty".to_string(),
            });
        }

        let mut fields: Vec<(String, String)> = vec![
            ("merchant_id".to_string(), self.config.merchant_id.clone()),
            ("merchant_key".to_string(), self.config.merchant_key.clone()),
            ("return_url".to_string(), self.config.return_url.clone()),
            ("cancel_url".to_string(), self.config.cancel_url.clone()),
            ("notify_url".to_string(), self.config.notify_url.clone()),
            ("name_first".to_string(), request.payer_first_name.clone()),
            ("email_address".to_string(), request.payer_email.clone()),
            (
                "m_payment_id".to_string(),
                request.payment_reference.clone(),
            ),
            ("amount".to_string(), request.amount.to_decimal_string()),
            ("item_name".to_string(), request.item_name.clone()),
            (
                "item_description".to_string(),
                request.item_description.clone(),
            ),
        ];

        let signature = self.sign(&fields);
        fields.push(("signature".to_string(), signature));

        Ok(RedirectForm {
            process_url: self.config.process_url.clone(),
            fields,
        })
    }

    /// Verify and normalise an inbound webhook payload.
    ///
    /// The signature is computed over the parameter string in *received*
    /// order, excluding the `signature` field itself, with the passphrase
    /// appended. Only after the signature verifies are the fields normalised.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::MalformedPayload`] when the body is not form data.
    /// - [`GatewayError::SignatureInvalid`] on signature mismatch.
    /// - [`GatewayError::MissingField`] when a known-required field is absent.
    pub fn verify_notification(&self, raw_body: &str) -> Result<PaymentNotification> {
        let pairs = decode_form_ordered(raw_body)?;

        let provided = pairs
            .iter()
            .find(|(k, _)| k == "signature")
            .map(|(_, v)| v.to_ascii_lowercase())
            .ok_or(GatewayError::MissingField { field: "signature" })?;

        let unsigned: Vec<(String, String)> = pairs
            .iter()
            .filter(|(k, _)| k != "signature")
            .cloned()
            .collect();
        let expected = self.sign(&unsigned);

        if !constant_time_eq::constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            return Err(GatewayError::SignatureInvalid);
        }

        let field = |name: &'static str| -> Result<String> {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .ok_or(GatewayError::MissingField { field: name })
        };
        let optional = |name: &str| -> String {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let amount_raw = field("amount_gross")?;
        let amount_gross =
            Money::parse_decimal(&amount_raw).ok_or(GatewayError::MalformedPayload {
                reason: format!("amount_gross is not a decimal amount: {amount_raw:?}"),
            })?;

        Ok(PaymentNotification {
            payment_reference: field("m_payment_id")?,
            pf_payment_id: field("pf_payment_id")?,
            amount_gross,
            payment_status: field("payment_status")?,
            payer_email: optional("email_address"),
            payer_first_name: optional("name_first"),
            payer_last_name: optional("name_last"),
            item_name: optional("item_name"),
            raw_payload: raw_body.to_string(),
        })
    }

    /// MD5 signature over the ordered parameter string plus passphrase.
    fn sign(&self, fields: &[(String, String)]) -> String {
        let mut param_string = fields
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}={}", form_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if !self.config.passphrase.is_empty() {
            param_string.push_str("&passphrase=");
            param_string.push_str(&form_encode(&self.config.passphrase));
        }

        let mut hasher = Md5::new();
        hasher.update(param_string.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Percent-encode a value the way the gateway does: spaces as `+`.
fn form_encode(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// Decode a form body into ordered key/value pairs.
///
/// Order must be preserved: the signature is computed over the parameter
/// string as received.
fn decode_form_ordered(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split('&')
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let (key, value) = chunk.split_once('=').unwrap_or((chunk, ""));
            let decode = |s: &str| {
                urlencoding::decode(&s.replace('+', " "))
                    .map(std::borrow::Cow::into_owned)
                    .map_err(|e| GatewayError::MalformedPayload {
                        reason: format!("invalid percent-encoding: {e}"),
                    })
            };
            Ok((decode(key)?, decode(value)?))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_adapter() -> GatewayAdapter {
        GatewayAdapter::new(GatewayConfig {
            process_url: "https://sandbox.gateway.example/eng/process".to_string(),
            merchant_id: "10000100".to_string(),
            merchant_key: "46f0cd694581a".to_string(),
            passphrase: "jt7NOE43FZPn".to_string(),
            return_url: "https://entries.example/payment/return".to_string(),
            cancel_url: "https://entries.example/payment/cancel".to_string(),
            notify_url: "https://entries.example/api/notifyPayment".to_string(),
        })
    }

    fn redirect_request() -> RedirectRequest {
        RedirectRequest {
            payment_reference: "RACE-E-RED-D-001-1700000000000".to_string(),
            amount: Money::from_cents(14_900),
            item_name: "Race entry: Red Star Raceway".to_string(),
            item_description: "OK-J entry with engine, tyres".to_string(),
            payer_email: "driver@example.com".to_string(),
            payer_first_name: "Thandi".to_string(),
        }
    }

    /// Build a signed webhook body the way the gateway would.
    fn signed_body(adapter: &GatewayAdapter, fields: &[(&str, &str)]) -> String {
        let owned: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let signature = adapter.sign(&owned);
        let mut body = owned
            .iter()
            .map(|(k, v)| format!("{k}={}", form_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        body.push_str("&signature=");
        body.push_str(&signature);
        body
    }

    fn complete_fields<'a>() -> Vec<(&'a str, &'a str)> {
        vec![
            ("m_payment_id", "RACE-E-RED-D-001-1700000000000"),
            ("pf_payment_id", "1089250"),
            ("payment_status", "COMPLETE"),
            ("item_name", "Race entry: Red Star Raceway"),
            ("amount_gross", "149.00"),
            ("name_first", "Thandi"),
            ("name_last", "Mokoena"),
            ("email_address", "driver@example.com"),
        ]
    }

    #[test]
    fn redirect_fields_are_ordered_and_signed() {
        let form = test_adapter().build_redirect(&redirect_request()).unwrap();
        let keys: Vec<&str> = form.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "merchant_id",
                "merchant_key",
                "return_url",
                "cancel_url",
                "notify_url",
                "name_first",
                "email_address",
                "m_payment_id",
                "amount",
                "item_name",
                "item_description",
                "signature",
            ]
        );
        let amount = form.fields.iter().find(|(k, _)| k == "amount").unwrap();
        assert_eq!(amount.1, "149.00");
        let signature = &form.fields.last().unwrap().1;
        assert_eq!(signature.len(), 32);
        assert!(signature.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn rejects_zero_amount_redirect() {
        let mut request = redirect_request();
        request.amount = Money::ZERO;
        let err = test_adapter().build_redirect(&request).unwrap_err();
        assert!(matches!(err, GatewayError::ConstructionFailed { .. }));
    }

    #[test]
    fn verifies_valid_notification() {
        let adapter = test_adapter();
        let body = signed_body(&adapter, &complete_fields());
        let notification = adapter.verify_notification(&body).unwrap();
        assert_eq!(
            notification.payment_reference,
            "RACE-E-RED-D-001-1700000000000"
        );
        assert_eq!(notification.pf_payment_id, "1089250");
        assert_eq!(notification.amount_gross, Money::from_cents(14_900));
        assert!(notification.is_complete());
        assert_eq!(notification.payer_last_name, "Mokoena");
    }

    #[test]
    fn rejects_tampered_notification() {
        let adapter = test_adapter();
        let body = signed_body(&adapter, &complete_fields());
        let tampered = body.replace("149.00", "1.00");
        assert_eq!(
            adapter.verify_notification(&tampered).unwrap_err(),
            GatewayError::SignatureInvalid
        );
    }

    #[test]
    fn rejects_wrong_passphrase() {
        let adapter = test_adapter();
        let mut other_config = adapter.config.clone();
        other_config.passphrase = "different".to_string();
        let other = GatewayAdapter::new(other_config);
        let body = signed_body(&other, &complete_fields());
        assert_eq!(
            adapter.verify_notification(&body).unwrap_err(),
            GatewayError::SignatureInvalid
        );
    }

    #[test]
    fn rejects_missing_signature() {
        let adapter = test_adapter();
        let body = "m_payment_id=RACE-E1-D1-1700000000000&payment_status=COMPLETE";
        assert_eq!(
            adapter.verify_notification(body).unwrap_err(),
            GatewayError::MissingField { field: "signature" }
        );
    }

    #[test]
    fn missing_required_field_after_valid_signature() {
        let adapter = test_adapter();
        let mut fields = complete_fields();
        fields.retain(|(k, _)| *k != "pf_payment_id");
        let body = signed_body(&adapter, &fields);
        assert_eq!(
            adapter.verify_notification(&body).unwrap_err(),
            GatewayError::MissingField {
                field: "pf_payment_id"
            }
        );
    }

    #[test]
    fn decodes_plus_and_percent_escapes() {
        let adapter = test_adapter();
        let fields = vec![
            ("m_payment_id", "RACE-E1-D1-1700000000000"),
            ("pf_payment_id", "77"),
            ("payment_status", "COMPLETE"),
            ("item_name", "Race entry: Red Star Raceway"),
            ("amount_gross", "149.00"),
        ];
        let body = signed_body(&adapter, &fields);
        assert!(body.contains("Race+entry"));
        let notification = adapter.verify_notification(&body).unwrap();
        assert_eq!(notification.item_name, "Race entry: Red Star Raceway");
    }
}
