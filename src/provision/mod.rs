pub mod mailbox;

pub use mailbox::DisposableMailProvider;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A disposable account credential, used by exactly one unit and discarded
/// when that unit terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub address: String,
    pub session_token: Option<String>,
}

impl Identity {
    pub fn unverified(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            session_token: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.session_token.is_some()
    }
}

/// Provisions disposable identities against the remote service.
///
/// `acquire` obtains a fresh address and registers it with the service,
/// which triggers a verification mail. `reset` rotates a rejected address,
/// and `verify` exchanges the mailed code for a session token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn acquire(&self) -> Result<Identity>;
    async fn reset(&self, stale: Identity) -> Result<Identity>;
    async fn verify(&self, identity: Identity, code: &str) -> Result<Identity>;
}

/// One sweep of the inbox for a verification code. The caller owns the
/// polling loop and its timeout.
#[async_trait]
pub trait CodeInbox: Send + Sync {
    async fn fetch_code(&self, identity: &Identity) -> Result<Option<String>>;
}

/// Synchronous operator escape hatch for stages that exhaust automation.
pub trait OperatorPrompt: Send + Sync {
    /// Ask the operator for the verification code. `None` means skip, which
    /// abandons the unit.
    fn request_code(&self, address: &str) -> Option<String>;

    /// Ask the operator to confirm that a result file landed on disk after a
    /// manual download.
    fn confirm_result_on_disk(&self, expected: &Path) -> bool;
}

/// Persisted credential record, one per successfully verified unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub index: usize,
    pub address: String,
    pub session_token: Option<String>,
}

impl ProfileRecord {
    pub fn new(index: usize, identity: &Identity) -> Self {
        Self {
            index,
            address: identity.address.clone(),
            session_token: identity.session_token.clone(),
        }
    }

    pub fn file_name(index: usize) -> String {
        format!("profile_{:02}.json", index)
    }

    pub fn save(&self, profiles_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(profiles_dir)?;
        let path = profiles_dir.join(Self::file_name(self.index));
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
