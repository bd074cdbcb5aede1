//! OAuth 1.0 PLAINTEXT signing for the MAAS region API.
//!
//! MAAS API keys are three colon-separated parts: consumer key, token key
//! and token secret. The consumer secret is always empty, so the PLAINTEXT
//! signature is `&<token_secret>`.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::error::{MaasError, MaasResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub consumer_key: String,
    pub token_key: String,
    pub token_secret: String,
}

impl ApiCredentials {
    /// Parse a `consumer:token:secret` API key.
    pub fn parse(api_key: &str) -> MaasResult<Self> {
        let parts: Vec<&str> = api_key.split(':').collect();
        let [consumer_key, token_key, token_secret] = parts.as_slice() else {
            return Err(MaasError::InvalidApiKey);
        };
        if consumer_key.is_empty() || token_key.is_empty() || token_secret.is_empty() {
            return Err(MaasError::InvalidApiKey);
        }
        Ok(Self {
            consumer_key: (*consumer_key).to_string(),
            token_key: (*token_key).to_string(),
            token_secret: (*token_secret).to_string(),
        })
    }

    /// Build the `Authorization` header value for one request.
    ///
    /// A fresh nonce and timestamp are generated per call, as the upstream
    /// rejects replayed nonces.
    pub fn authorization_header(&self) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let nonce = Uuid::new_v4().simple().to_string();
        format!(
            "OAuth oauth_version=\"1.0\", oauth_signature_method=\"PLAINTEXT\", \
             oauth_consumer_key=\"{}\", oauth_token=\"{}\", oauth_signature=\"%26{}\", \
             oauth_nonce=\"{}\", oauth_timestamp=\"{}\"",
            self.consumer_key, self.token_key, self.token_secret, nonce, timestamp
        )
    }
}
