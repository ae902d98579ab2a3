//! Configuration
//!
//! Credentials come from the environment, optionally seeded from a `.env`
//! file. Each platform is loaded on its own so a command touching one
//! platform does not require the other's variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AdsError, Result};

/// Environment prefix for Google Ads credentials
pub const GOOGLE_ENV_PREFIX: &str = "GOOGLE_ADS";
/// Environment prefix for Microsoft Advertising credentials
pub const MICROSOFT_ENV_PREFIX: &str = "BING_ADS";

/// Credentials and identity for one ad platform
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformCredentials {
    /// OAuth application id
    pub client_id: String,
    /// OAuth application secret
    pub client_secret: String,
    /// Long-lived refresh token
    pub refresh_token: String,
    /// Developer token sent with every API call
    pub developer_token: String,
    /// Manager (login) account id
    pub login_customer_id: String,
}

impl std::fmt::Debug for PlatformCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("developer_token", &"<redacted>")
            .field("login_customer_id", &self.login_customer_id)
            .finish()
    }
}

impl PlatformCredentials {
    /// Read `<PREFIX>_CLIENT_ID`, `<PREFIX>_CLIENT_SECRET`, ... from the process
    /// environment.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit lookup function.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| -> Result<String> {
            let key = format!("{}_{}", prefix, name);
            lookup(&key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AdsError::Config(format!("{} is not set", key)))
        };

        Ok(Self {
            client_id: var("CLIENT_ID")?,
            client_secret: var("CLIENT_SECRET")?,
            refresh_token: var("REFRESH_TOKEN")?,
            developer_token: var("DEVELOPER_TOKEN")?,
            login_customer_id: normalize_customer_id(&var("LOGIN_CUSTOMER_ID")?),
        })
    }
}

/// Both platforms' configuration, built once and passed to whoever needs it.
///
/// A platform whose variables are incomplete keeps the load error so it can
/// be reported when (and only when) that platform is used.
#[derive(Debug, Clone)]
pub struct AdsConfig {
    google: std::result::Result<PlatformCredentials, String>,
    microsoft: std::result::Result<PlatformCredentials, String>,
    env_file: Option<PathBuf>,
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            google: Err(format!("{}_* variables are not set", GOOGLE_ENV_PREFIX)),
            microsoft: Err(format!("{}_* variables are not set", MICROSOFT_ENV_PREFIX)),
            env_file: None,
        }
    }
}

impl AdsConfig {
    /// Load a `.env` file (when present) and read both platforms from the
    /// environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        let loaded = match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    AdsError::Config(format!("Failed to load {}: {}", path.display(), e))
                })?;
                Some(path.to_path_buf())
            }
            None => dotenvy::dotenv().ok(),
        };

        if let Some(path) = &loaded {
            debug!("Loaded environment from {}", path.display());
        }

        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        config.env_file = loaded;
        Ok(config)
    }

    /// Read both platforms through `lookup` without touching any file.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            google: PlatformCredentials::from_lookup(GOOGLE_ENV_PREFIX, &lookup)
                .map_err(config_message),
            microsoft: PlatformCredentials::from_lookup(MICROSOFT_ENV_PREFIX, &lookup)
                .map_err(config_message),
            env_file: None,
        }
    }

    pub fn google(&self) -> Result<&PlatformCredentials> {
        self.google.as_ref().map_err(|m| AdsError::Config(m.clone()))
    }

    pub fn microsoft(&self) -> Result<&PlatformCredentials> {
        self.microsoft.as_ref().map_err(|m| AdsError::Config(m.clone()))
    }

    /// The dotenv file the environment was seeded from, if any
    pub fn env_file(&self) -> Option<&Path> {
        self.env_file.as_deref()
    }
}

fn config_message(err: AdsError) -> String {
    match err {
        AdsError::Config(message) => message,
        other => other.to_string(),
    }
}

/// Google shows customer ids as `123-456-7890`; the API wants digits only.
pub fn normalize_customer_id(id: &str) -> String {
    id.trim().replace('-', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_lookup_reads_prefixed_vars() {
        let vars = env(&[
            ("GOOGLE_ADS_CLIENT_ID", "id"),
            ("GOOGLE_ADS_CLIENT_SECRET", "secret"),
            ("GOOGLE_ADS_REFRESH_TOKEN", "refresh"),
            ("GOOGLE_ADS_DEVELOPER_TOKEN", "dev"),
            ("GOOGLE_ADS_LOGIN_CUSTOMER_ID", "123-456-7890"),
        ]);

        let creds = PlatformCredentials::from_lookup("GOOGLE_ADS", |k| vars.get(k).cloned()).unwrap();
        assert_eq!(creds.client_id, "id");
        assert_eq!(creds.login_customer_id, "1234567890");
    }

    #[test]
    fn test_missing_var_is_config_error() {
        let vars = env(&[("BING_ADS_CLIENT_ID", "id")]);
        let err = PlatformCredentials::from_lookup("BING_ADS", |k| vars.get(k).cloned()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: BING_ADS_CLIENT_SECRET is not set"
        );
    }

    #[test]
    fn test_blank_var_counts_as_missing() {
        let vars = env(&[
            ("BING_ADS_CLIENT_ID", "id"),
            ("BING_ADS_CLIENT_SECRET", "  "),
        ]);
        let err = PlatformCredentials::from_lookup("BING_ADS", |k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("BING_ADS_CLIENT_SECRET"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = PlatformCredentials {
            client_id: "id".to_string(),
            client_secret: "s3cret".to_string(),
            refresh_token: "r3fresh".to_string(),
            developer_token: "d3v".to_string(),
            login_customer_id: "1".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("r3fresh"));
        assert!(!rendered.contains("d3v"));
    }

    #[test]
    fn test_missing_platform_var_reported_on_use() {
        let vars = env(&[
            ("GOOGLE_ADS_CLIENT_ID", "id"),
            ("GOOGLE_ADS_CLIENT_SECRET", "secret"),
            ("GOOGLE_ADS_REFRESH_TOKEN", "refresh"),
            ("GOOGLE_ADS_DEVELOPER_TOKEN", "dev"),
            ("GOOGLE_ADS_LOGIN_CUSTOMER_ID", "1"),
            ("BING_ADS_CLIENT_ID", "id"),
        ]);

        let config = AdsConfig::from_lookup(|k| vars.get(k).cloned());
        assert_eq!(config.google().unwrap().client_id, "id");
        assert_eq!(
            config.microsoft().unwrap_err().to_string(),
            "Configuration error: BING_ADS_CLIENT_SECRET is not set"
        );
        assert_eq!(config.env_file(), None);
    }

    #[test]
    fn test_load_records_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ads.env");
        std::fs::write(&path, "ADS_ACCESS_CONFIG_TEST=1\n").unwrap();

        let config = AdsConfig::load(Some(&path)).unwrap();
        assert_eq!(config.env_file(), Some(path.as_path()));
    }

    #[test]
    fn test_unconfigured_platform() {
        let config = AdsConfig::default();
        assert!(matches!(config.google(), Err(AdsError::Config(_))));
        assert!(matches!(config.microsoft(), Err(AdsError::Config(_))));
    }
}
