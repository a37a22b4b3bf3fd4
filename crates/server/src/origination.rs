//! Outbound call placement through the Twilio REST API

use std::time::Duration;

use parley_config::TwilioConfig;
use serde::{Deserialize, Serialize};

use crate::ServerError;

const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Call resource returned by Twilio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedCall {
    pub sid: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub to: String,
}

#[derive(Debug, Deserialize)]
struct TwilioApiError {
    #[serde(default)]
    message: String,
}

pub struct TwilioClient {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    default_to: Option<String>,
    api_base: String,
}

impl TwilioClient {
    /// `None` unless account, token and caller id are all set
    pub fn from_config(config: &TwilioConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .ok()?;
        Some(Self {
            http,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            default_to: config.to_number.clone().filter(|n| !n.is_empty()),
            api_base: TWILIO_API_BASE.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }

    /// Dial `to` (or the configured default) and connect it with `twiml`
    pub async fn place_call(&self, to: Option<&str>, twiml: &str) -> Result<PlacedCall, ServerError> {
        let to = to
            .filter(|n| !n.trim().is_empty())
            .or(self.default_to.as_deref())
            .ok_or_else(|| ServerError::InvalidRequest("no destination number".to_string()))?;

        tracing::info!(to = %to, from = %self.from_number, "Placing outbound call");

        let response = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Twiml", twiml)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TwilioApiError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(ServerError::Upstream(format!("Twilio HTTP {}: {}", status, message)));
        }

        let call: PlacedCall = response
            .json()
            .await
            .map_err(|e| ServerError::Upstream(format!("Twilio response: {e}")))?;
        tracing::info!(call_sid = %call.sid, status = %call.status, "Call placed");
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from_number: "+15550001111".into(),
            to_number: None,
        }
    }

    #[test]
    fn test_requires_full_credentials() {
        assert!(TwilioClient::from_config(&TwilioConfig::default()).is_none());
        assert!(TwilioClient::from_config(&config()).is_some());
    }

    #[test]
    fn test_calls_url() {
        let client = TwilioClient::from_config(&config())
            .unwrap()
            .with_api_base("http://localhost:4010/");
        assert_eq!(
            client.calls_url(),
            "http://localhost:4010/2010-04-01/Accounts/AC123/Calls.json"
        );
    }

    #[tokio::test]
    async fn test_missing_destination_is_rejected() {
        let client = TwilioClient::from_config(&config()).unwrap();
        assert!(matches!(
            client.place_call(None, "<Response/>").await,
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.place_call(Some("  "), "<Response/>").await,
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
