//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// How long to wait after signup before reading the profile the identity
/// provider's post-signup hook is expected to create.
pub const DEFAULT_PROFILE_GRACE: Duration = Duration::from_millis(1500);

/// Sessions expiring within this window are refreshed before use.
pub const DEFAULT_REFRESH_LEEWAY: Duration = Duration::from_secs(60);

/// Which identity provider backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityBackend {
    /// Hosted auth REST API (GoTrue-compatible).
    GoTrue,
    /// In-process provider for local development.
    Memory,
}

/// Where the OAuth callback sends the browser when the code exchange fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackErrorRedirect {
    Login,
    Onboarding,
}

/// Settings consumed by the account lifecycle controller.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Grace interval between signup and the first profile read.
    pub profile_grace: Duration,
    /// Public origin used to build OAuth `redirect_to` URLs.
    pub site_url: String,
    pub callback_error_redirect: CallbackErrorRedirect,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            profile_grace: DEFAULT_PROFILE_GRACE,
            site_url: "http://localhost:8080".to_string(),
            callback_error_redirect: CallbackErrorRedirect::Login,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub identity_backend: IdentityBackend,
    /// Base URL of the hosted auth API, e.g. `https://xyz.supabase.co`.
    pub auth_url: Option<String>,
    pub auth_anon_key: Option<SecretString>,
    pub refresh_leeway: Duration,
    pub secure_cookies: bool,
    /// When set, logs are also written to a daily rolling file here.
    pub log_dir: Option<PathBuf>,
    pub lifecycle: LifecycleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/tradelink.db"),
            identity_backend: IdentityBackend::GoTrue,
            auth_url: None,
            auth_anon_key: None,
            refresh_leeway: DEFAULT_REFRESH_LEEWAY,
            secure_cookies: false,
            log_dir: None,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `TRADELINK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse_or(&lookup, "TRADELINK_PORT", defaults.port)?;
        let db_path = lookup("TRADELINK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let identity_backend = match lookup("TRADELINK_IDENTITY").as_deref() {
            None | Some("gotrue") => IdentityBackend::GoTrue,
            Some("memory") => IdentityBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "TRADELINK_IDENTITY".into(),
                    message: format!("expected 'gotrue' or 'memory', got '{other}'"),
                });
            }
        };

        let auth_url = lookup("TRADELINK_AUTH_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());
        let auth_anon_key = lookup("TRADELINK_AUTH_ANON_KEY")
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        if identity_backend == IdentityBackend::GoTrue {
            if auth_url.is_none() {
                return Err(ConfigError::MissingRequired {
                    key: "TRADELINK_AUTH_URL".into(),
                    hint: "Set it to the auth provider base URL, or TRADELINK_IDENTITY=memory for local development.".into(),
                });
            }
            if auth_anon_key.is_none() {
                return Err(ConfigError::MissingRequired {
                    key: "TRADELINK_AUTH_ANON_KEY".into(),
                    hint: "Set it to the project's public anon key.".into(),
                });
            }
        }

        let grace_ms: u64 = parse_or(
            &lookup,
            "TRADELINK_PROFILE_GRACE_MS",
            defaults.lifecycle.profile_grace.as_millis() as u64,
        )?;
        if grace_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRADELINK_PROFILE_GRACE_MS".into(),
                message: "the signup grace interval must be at least 1ms".into(),
            });
        }
        let leeway_secs: u64 = parse_or(
            &lookup,
            "TRADELINK_REFRESH_LEEWAY_SECS",
            defaults.refresh_leeway.as_secs(),
        )?;
        let secure_cookies = parse_or(&lookup, "TRADELINK_SECURE_COOKIES", false)?;

        let callback_error_redirect = match lookup("TRADELINK_OAUTH_ERROR_REDIRECT").as_deref() {
            None | Some("login") => CallbackErrorRedirect::Login,
            Some("onboarding") => CallbackErrorRedirect::Onboarding,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "TRADELINK_OAUTH_ERROR_REDIRECT".into(),
                    message: format!("expected 'login' or 'onboarding', got '{other}'"),
                });
            }
        };

        let site_url = lookup("TRADELINK_SITE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        Ok(Self {
            port,
            db_path,
            identity_backend,
            auth_url,
            auth_anon_key,
            refresh_leeway: Duration::from_secs(leeway_secs),
            secure_cookies,
            log_dir: lookup("TRADELINK_LOG_DIR").map(PathBuf::from),
            lifecycle: LifecycleConfig {
                profile_grace: Duration::from_millis(grace_ms),
                site_url,
                callback_error_redirect,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn memory_backend_needs_no_auth_settings() {
        let config = AppConfig::from_lookup(lookup_from(&[("TRADELINK_IDENTITY", "memory")])).unwrap();
        assert_eq!(config.identity_backend, IdentityBackend::Memory);
        assert_eq!(config.port, 8080);
        assert_eq!(config.lifecycle.profile_grace, DEFAULT_PROFILE_GRACE);
        assert_eq!(config.lifecycle.site_url, "http://localhost:8080");
        assert_eq!(config.lifecycle.callback_error_redirect, CallbackErrorRedirect::Login);
    }

    #[test]
    fn gotrue_backend_requires_url_and_key() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "TRADELINK_AUTH_URL"));

        let err = AppConfig::from_lookup(lookup_from(&[("TRADELINK_AUTH_URL", "https://x.test")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "TRADELINK_AUTH_ANON_KEY"));
    }

    #[test]
    fn full_gotrue_config() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("TRADELINK_AUTH_URL", "https://x.test/"),
            ("TRADELINK_AUTH_ANON_KEY", "anon"),
            ("TRADELINK_PORT", "9000"),
            ("TRADELINK_PROFILE_GRACE_MS", "250"),
            ("TRADELINK_OAUTH_ERROR_REDIRECT", "onboarding"),
            ("TRADELINK_SECURE_COOKIES", "true"),
        ]))
        .unwrap();
        assert_eq!(config.auth_url.as_deref(), Some("https://x.test"));
        assert_eq!(config.auth_anon_key.unwrap().expose_secret(), "anon");
        assert_eq!(config.port, 9000);
        assert_eq!(config.lifecycle.profile_grace, Duration::from_millis(250));
        assert_eq!(config.lifecycle.site_url, "http://localhost:9000");
        assert_eq!(
            config.lifecycle.callback_error_redirect,
            CallbackErrorRedirect::Onboarding
        );
        assert!(config.secure_cookies);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("TRADELINK_IDENTITY", "memory"),
            ("TRADELINK_PROFILE_GRACE_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TRADELINK_PROFILE_GRACE_MS"));

        // A zero grace would read the profile before the signup hook can run.
        let err = AppConfig::from_lookup(lookup_from(&[
            ("TRADELINK_IDENTITY", "memory"),
            ("TRADELINK_PROFILE_GRACE_MS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TRADELINK_PROFILE_GRACE_MS"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("TRADELINK_IDENTITY", "ldap")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
