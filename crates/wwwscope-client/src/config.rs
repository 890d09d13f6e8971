use std::path::PathBuf;
use std::time::Duration;

use wwwscope_core::{ArchiveError, DispatchConfig};

/// Identifying User-Agent sent to services that accept automated clients.
pub const DEFAULT_USER_AGENT: &str = "WWWScope Archiver/2.0";

/// Process-wide settings shared by the session pool, adapters and CLI.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub max_concurrency: usize,
    pub service_timeout: Duration,
    /// How long an adapter waits for a rate-limit token.
    pub rate_limit_timeout: Duration,
    pub user_agent: String,
    pub warc_dir: PathBuf,
    pub ia_credentials: Option<IaCredentials>,
}

/// Internet Archive S3 key pair.
#[derive(Clone)]
pub struct IaCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for IaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IaCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            service_timeout: Duration::from_secs(90),
            rate_limit_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            warc_dir: PathBuf::from("warcs"),
            ia_credentials: None,
        }
    }
}

impl ArchiveConfig {
    /// Read configuration from environment variables.
    ///
    /// - `WWWSCOPE_MAX_CONCURRENCY` (optional, defaults to 3)
    /// - `WWWSCOPE_SERVICE_TIMEOUT_SECS` (optional, defaults to 90)
    /// - `WWWSCOPE_RATE_LIMIT_TIMEOUT_SECS` (optional, defaults to 30)
    /// - `WWWSCOPE_USER_AGENT` (optional)
    /// - `WWWSCOPE_WARC_DIR` (optional, defaults to `warcs`)
    /// - `IA_ACCESS_KEY` / `IA_SECRET_KEY` (optional, both or neither)
    pub fn from_env() -> Result<Self, ArchiveError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ArchiveError> {
        let defaults = Self::default();

        let max_concurrency = match lookup("WWWSCOPE_MAX_CONCURRENCY") {
            None => defaults.max_concurrency,
            Some(raw) => {
                let parsed: usize = raw.parse().map_err(|_| {
                    ArchiveError::Config(format!(
                        "Invalid WWWSCOPE_MAX_CONCURRENCY '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(ArchiveError::Config(
                        "WWWSCOPE_MAX_CONCURRENCY must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        let service_timeout = secs_var(&lookup, "WWWSCOPE_SERVICE_TIMEOUT_SECS")?
            .unwrap_or(defaults.service_timeout);
        let rate_limit_timeout = secs_var(&lookup, "WWWSCOPE_RATE_LIMIT_TIMEOUT_SECS")?
            .unwrap_or(defaults.rate_limit_timeout);

        let user_agent = lookup("WWWSCOPE_USER_AGENT")
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or(defaults.user_agent);
        let warc_dir = lookup("WWWSCOPE_WARC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.warc_dir);

        let ia_credentials = match (lookup("IA_ACCESS_KEY"), lookup("IA_SECRET_KEY")) {
            (Some(access_key), Some(secret_key)) => Some(IaCredentials {
                access_key,
                secret_key,
            }),
            (None, None) => None,
            _ => {
                return Err(ArchiveError::Config(
                    "IA_ACCESS_KEY and IA_SECRET_KEY must be set together".into(),
                ));
            }
        };

        Ok(Self {
            max_concurrency,
            service_timeout,
            rate_limit_timeout,
            user_agent,
            warc_dir,
            ia_credentials,
        })
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::default()
            .with_max_concurrency(self.max_concurrency)
            .with_service_timeout(self.service_timeout)
    }
}

fn secs_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ArchiveError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let secs: u64 = raw.parse().map_err(|_| {
        ArchiveError::Config(format!(
            "Invalid {key} '{raw}': must be a whole number of seconds"
        ))
    })?;
    if secs == 0 {
        return Err(ArchiveError::Config(format!("{key} must be at least 1")));
    }
    Ok(Some(Duration::from_secs(secs)))
}
