use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::stream::CLOUDFLARE_API_BASE;

pub const API_TOKEN_VAR: &str = "CLOUDFLARE_STREAM_API_TOKEN";
pub const ACCOUNT_ID_VAR: &str = "CLOUDFLARE_ACCOUNT_ID";
pub const API_BASE_VAR: &str = "CLOUDFLARE_API_BASE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {} or {} in the environment / .env.local", API_TOKEN_VAR, ACCOUNT_ID_VAR)]
    MissingCredentials,
}

/// Credentials for the Cloudflare Stream API
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: String,
    pub api_token: String,
    pub api_base: String,
}

// Keeps the token out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("api_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Credentials {
    /// # Errors
    /// [`ConfigError::MissingCredentials`] when either the token or the account ID is unset or blank
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// # Errors
    /// See [`Credentials::from_env`]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (Some(api_token), Some(account_id)) = (non_blank(API_TOKEN_VAR), non_blank(ACCOUNT_ID_VAR))
        else {
            return Err(ConfigError::MissingCredentials);
        };

        Ok(Self {
            account_id,
            api_token,
            api_base: non_blank(API_BASE_VAR).unwrap_or_else(|| CLOUDFLARE_API_BASE.to_string()),
        })
    }
}

/// Loads `env_file` then `.env`. Variables already set in the process win.
pub fn load_env_files(env_file: &Path) {
    match dotenvy::from_path(env_file) {
        Ok(()) => debug!("Loaded {}", env_file.display()),
        Err(e) => debug!("Not loading {}: {e}", env_file.display()),
    }
    dotenvy::dotenv().ok();
}
