use std::sync::Arc;
use std::time::Duration;

use wwwscope_core::{AdapterRegistry, PageSubmitter, RateLimiter};

use crate::archive_today::{ArchiveTodayAdapter, ArchiveTodayConfig};
use crate::config::ArchiveConfig;
use crate::form_submitter::HttpFormSubmitter;
use crate::memento::{MementoAdapter, MementoConfig};
use crate::session::SessionPool;
use crate::wayback::{WaybackAdapter, WaybackConfig};

/// Time reserved between the end of Wayback polling and the dispatcher's
/// service timeout.
const WAYBACK_MARGIN: Duration = Duration::from_secs(10);

/// Pick the Archive.today submitter: headless Chromium when built with the
/// `browser` feature and a binary is found, the HTTP form otherwise.
pub async fn default_submitter(
    config: &ArchiveConfig,
    sessions: &SessionPool,
    limiter: &RateLimiter,
) -> Arc<dyn PageSubmitter> {
    #[cfg(feature = "browser")]
    if crate::browser_submitter::detect_chrome().is_some() {
        match crate::browser_submitter::BrowserSubmitter::launch(limiter.clone()).await {
            Ok(browser) => {
                tracing::info!("Using headless browser for Archive.today");
                return Arc::new(browser.with_rate_limit_timeout(config.rate_limit_timeout));
            }
            Err(e) => tracing::warn!(error = %e, "Browser unavailable, falling back to HTTP form"),
        }
    }
    Arc::new(
        HttpFormSubmitter::new(sessions.clone(), limiter.clone())
            .with_rate_limit_timeout(config.rate_limit_timeout),
    )
}

/// Wayback settings whose polling ends before the dispatcher gives up on
/// the service.
pub fn wayback_config(config: &ArchiveConfig) -> WaybackConfig {
    WaybackConfig::default()
        .with_rate_limit_timeout(config.rate_limit_timeout)
        .with_max_wait(config.service_timeout.saturating_sub(WAYBACK_MARGIN))
}

/// Every adapter, wired to shared sessions and rate limiter.
pub fn build_registry(
    config: &ArchiveConfig,
    sessions: &SessionPool,
    limiter: &RateLimiter,
    submitter: Arc<dyn PageSubmitter>,
) -> AdapterRegistry {
    let wayback = WaybackAdapter::new(
        sessions.clone(),
        limiter.clone(),
        wayback_config(config),
    );
    let archive_today = ArchiveTodayAdapter::new(
        submitter,
        limiter.clone(),
        ArchiveTodayConfig::default().with_rate_limit_timeout(config.rate_limit_timeout),
    );
    let memento = MementoAdapter::new(
        sessions.clone(),
        limiter.clone(),
        MementoConfig {
            rate_limit_timeout: config.rate_limit_timeout,
            ..MementoConfig::default()
        },
    );

    AdapterRegistry::with_link_only()
        .with_adapter(Arc::new(wayback))
        .with_adapter(Arc::new(archive_today))
        .with_adapter(Arc::new(memento))
}
