//! SMS gateways for phone verification.
//!
//! The gateway both generates the code and delivers it, so the code is known
//! to the client. A server-side verification service would remove that
//! exposure; the trait keeps that swap local to this module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use lc_core::config::{SmsConfig, SmsProvider};
use lc_core::constants::{TWILIO_UNVERIFIED_NUMBER, VERIFICATION_CODE_DIGITS};
use lc_core::error::{LcError, LcResult};
use lc_core::phone;

/// Delivers a verification code to a phone and returns the code sent.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_verification_code(&self, phone: &str) -> LcResult<String>;
}

/// Build the gateway selected in configuration.
pub fn gateway_from_config(config: &SmsConfig) -> LcResult<Arc<dyn SmsGateway>> {
    match config.provider {
        SmsProvider::Twilio => Ok(Arc::new(TwilioGateway::new(config)?)),
        SmsProvider::Console => Ok(Arc::new(ConsoleGateway)),
    }
}

/// A uniformly random numeric code with no leading zero.
pub fn generate_code() -> String {
    let low = 10u32.pow(VERIFICATION_CODE_DIGITS - 1);
    let high = 10u32.pow(VERIFICATION_CODE_DIGITS) - 1;
    rand::thread_rng().gen_range(low..=high).to_string()
}

fn message_body(code: &str) -> String {
    format!("Tu código de verificación para LatamChat es: {code}")
}

/// Twilio Programmable Messaging gateway.
pub struct TwilioGateway {
    inner: Client,
    messages_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioGateway {
    pub fn new(config: &SmsConfig) -> LcResult<Self> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(LcError::MissingConfig("sms.account_sid and sms.auth_token".into()));
        }
        let inner = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LcError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            messages_url: format!(
                "{}/Accounts/{}/Messages.json",
                config.api_base.trim_end_matches('/'),
                config.account_sid
            ),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        })
    }

    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }
}

/// Turn a Twilio error body into an SMS error.
fn twilio_error(status: u16, body: &Value) -> LcError {
    let code = body.get("code").and_then(|v| v.as_i64());
    if code == Some(TWILIO_UNVERIFIED_NUMBER) {
        return LcError::Sms(
            "phone number is not verified; trial accounts can only send to verified numbers".into(),
        );
    }
    let message = body
        .get("message")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("twilio returned status {status}"));
    LcError::Sms(message)
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn send_verification_code(&self, to: &str) -> LcResult<String> {
        let code = generate_code();
        let body = message_body(&code);
        let form = [
            ("To", to),
            ("From", self.from_number.as_str()),
            ("Body", body.as_str()),
        ];

        let response = self
            .inner
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| LcError::Sms(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let err = twilio_error(status.as_u16(), &body);
            warn!(phone = %phone::redact(to), "sms delivery failed: {err}");
            return Err(err);
        }

        info!(phone = %phone::redact(to), "verification code sent");
        Ok(code)
    }
}

/// Development gateway that logs the code instead of sending it.
pub struct ConsoleGateway;

#[async_trait]
impl SmsGateway for ConsoleGateway {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send_verification_code(&self, to: &str) -> LcResult<String> {
        let code = generate_code();
        info!(phone = %phone::redact(to), code = %code, "verification code (not sent)");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_code_range() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn test_messages_url() {
        let config = SmsConfig {
            account_sid: "AC123".into(),
            auth_token: "tok".into(),
            ..Default::default()
        };
        let gateway = TwilioGateway::new(&config).unwrap();
        assert_eq!(
            gateway.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn test_twilio_requires_credentials() {
        assert!(matches!(
            TwilioGateway::new(&SmsConfig::default()),
            Err(LcError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_twilio_error_mapping() {
        let unverified = twilio_error(400, &json!({"code": 21211, "message": "Invalid 'To'"}));
        assert!(unverified.to_string().contains("not verified"));

        let other = twilio_error(401, &json!({"code": 20003, "message": "Authenticate"}));
        assert_eq!(other.to_string(), "sms error: Authenticate");

        let bare = twilio_error(500, &Value::Null);
        assert!(bare.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_console_gateway() {
        let gateway = gateway_from_config(&SmsConfig {
            provider: SmsProvider::Console,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(gateway.name(), "console");
        let code = gateway.send_verification_code("+573001234567").await.unwrap();
        assert_eq!(code.len(), 6);
    }
}
