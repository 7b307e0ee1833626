use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SynclipError};

use super::{CodeInbox, Identity, IdentityProvider};

/// Verification codes are six digits in the service's mails.
const CODE_PATTERN: &str = r"\b(\d{6})\b";

/// Disposable-mail identity provider.
///
/// Addresses come from a throwaway mail service; registration and
/// verification go against the rendering service's auth endpoints. One
/// instance serves all units, but every acquired identity is single-use.
pub struct DisposableMailProvider {
    client: reqwest::Client,
    mail_url: String,
    service_url: String,
    sender_filter: String,
    code_re: Regex,
}

impl DisposableMailProvider {
    pub fn new(mail_url: String, service_url: String, sender_filter: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            mail_url: mail_url.trim_end_matches('/').to_string(),
            service_url: service_url.trim_end_matches('/').to_string(),
            sender_filter: sender_filter.to_lowercase(),
            code_re: Regex::new(CODE_PATTERN).expect("Invalid regex"),
        }
    }

    async fn current_address(&self) -> Result<String> {
        let url = format!("{}/api/address", self.mail_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Mail service: {e}")))?;

        if !response.status().is_success() {
            return Err(SynclipError::ProviderUnavailable(format!(
                "Mail service returned {}",
                response.status()
            )));
        }

        let parsed: AddressResponse = response
            .json()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Mail service: {e}")))?;
        Ok(parsed.address)
    }

    async fn rotate_address(&self) -> Result<String> {
        let url = format!("{}/api/address/reset", self.mail_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Mail service: {e}")))?;

        if !response.status().is_success() {
            return Err(SynclipError::ProviderUnavailable(format!(
                "Mail reset returned {}",
                response.status()
            )));
        }

        let parsed: AddressResponse = response
            .json()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Mail service: {e}")))?;
        Ok(parsed.address)
    }

    /// Register an address with the rendering service, triggering the
    /// verification mail.
    async fn signup(&self, address: &str) -> Result<()> {
        let url = format!("{}/v1/auth/signup", self.service_url);
        let response = self
            .client
            .post(&url)
            .json(&SignupRequest { email: address })
            .send()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Signup: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!("Signup accepted for {address}");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Err(SynclipError::InvalidIdentity {
                address: address.to_string(),
            });
        }

        Err(SynclipError::ProviderUnavailable(format!(
            "Signup returned {status}: {body}"
        )))
    }

    fn message_matches(&self, message: &InboxMessage) -> bool {
        message.sender.to_lowercase().contains(&self.sender_filter)
            || message.subject.to_lowercase().contains(&self.sender_filter)
    }
}

#[async_trait]
impl IdentityProvider for DisposableMailProvider {
    async fn acquire(&self) -> Result<Identity> {
        let address = self.current_address().await?;
        debug!("Acquired address {address}");
        self.signup(&address).await?;
        Ok(Identity::unverified(address))
    }

    async fn reset(&self, stale: Identity) -> Result<Identity> {
        warn!("Resetting rejected address {}", stale.address);
        let address = self.rotate_address().await?;
        self.signup(&address).await?;
        Ok(Identity::unverified(address))
    }

    async fn verify(&self, identity: Identity, code: &str) -> Result<Identity> {
        let url = format!("{}/v1/auth/verify", self.service_url);
        let response = self
            .client
            .post(&url)
            .json(&VerifyRequest {
                email: &identity.address,
                code,
            })
            .send()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Verify: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(SynclipError::InvalidIdentity {
                address: identity.address,
            });
        }
        if !status.is_success() {
            return Err(SynclipError::ProviderUnavailable(format!(
                "Verify returned {status}"
            )));
        }

        let parsed: VerifyResponse = response
            .json()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Verify: {e}")))?;

        Ok(Identity {
            address: identity.address,
            session_token: Some(parsed.session_token),
        })
    }
}

#[async_trait]
impl CodeInbox for DisposableMailProvider {
    async fn fetch_code(&self, _identity: &Identity) -> Result<Option<String>> {
        let url = format!("{}/api/messages", self.mail_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Inbox: {e}")))?;

        if !response.status().is_success() {
            return Err(SynclipError::ProviderUnavailable(format!(
                "Inbox returned {}",
                response.status()
            )));
        }

        let messages: Vec<InboxMessage> = response
            .json()
            .await
            .map_err(|e| SynclipError::ProviderUnavailable(format!("Inbox: {e}")))?;

        for message in messages.iter().filter(|m| self.message_matches(m)) {
            if let Some(cap) = self.code_re.captures(&message.body) {
                let code = cap[1].to_string();
                debug!("Found verification code in mail from {}", message.sender);
                return Ok(Some(code));
            }
        }

        Ok(None)
    }
}

// Request/Response types

#[derive(Serialize)]
struct SignupRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    email: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Deserialize)]
struct VerifyResponse {
    session_token: String,
}

#[derive(Deserialize)]
struct InboxMessage {
    #[serde(default)]
    sender: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> DisposableMailProvider {
        DisposableMailProvider::new(
            "https://mail.example/".to_string(),
            "https://api.example/".to_string(),
            "sync".to_string(),
        )
    }

    #[test]
    fn test_trailing_slashes_trimmed() {
        let p = provider();
        assert_eq!(p.mail_url, "https://mail.example");
        assert_eq!(p.service_url, "https://api.example");
    }

    #[test]
    fn test_message_matches_sender_or_subject() {
        let p = provider();

        let by_sender = InboxMessage {
            sender: "noreply@Sync.example".to_string(),
            subject: "Your code".to_string(),
            body: String::new(),
        };
        let by_subject = InboxMessage {
            sender: "noreply@other.example".to_string(),
            subject: "Sync verification".to_string(),
            body: String::new(),
        };
        let neither = InboxMessage {
            sender: "spam@other.example".to_string(),
            subject: "Hello".to_string(),
            body: String::new(),
        };

        assert!(p.message_matches(&by_sender));
        assert!(p.message_matches(&by_subject));
        assert!(!p.message_matches(&neither));
    }

    #[test]
    fn test_code_regex_extracts_six_digits() {
        let p = provider();
        let cap = p.code_re.captures("Your verification code is 482913.").unwrap();
        assert_eq!(&cap[1], "482913");

        assert!(p.code_re.captures("no digits here").is_none());
        assert!(p.code_re.captures("too short 1234").is_none());
    }
}
