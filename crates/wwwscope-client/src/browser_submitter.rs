use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::time::Instant;
use wwwscope_core::{ArchiveError, PageOutcome, PageSubmitter, RateLimiter, ServiceName};

use crate::archive_today::looks_like_captcha;

/// Drives the Archive.today submit form in headless Chromium.
///
/// Real browsers get past some bot checks the plain HTTP form cannot. A
/// single Chromium process is shared across clones; every submission opens
/// and closes its own tab. Opening the mirror uses the caller's rate-limit
/// token, the form submission takes another.
#[derive(Clone)]
pub struct BrowserSubmitter {
    browser: Arc<Browser>,
    limiter: RateLimiter,
    timeout: Duration,
    rate_limit_timeout: Duration,
}

impl BrowserSubmitter {
    /// Launches headless Chromium with a **60 s** per-submission timeout.
    pub async fn launch(limiter: RateLimiter) -> Result<Self, ArchiveError> {
        Self::with_timeout(limiter, Duration::from_secs(60)).await
    }

    pub async fn with_timeout(limiter: RateLimiter, timeout: Duration) -> Result<Self, ArchiveError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = detect_chrome() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| ArchiveError::Browser(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ArchiveError::Browser(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            limiter,
            timeout,
            rate_limit_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_rate_limit_timeout(mut self, timeout: Duration) -> Self {
        self.rate_limit_timeout = timeout;
        self
    }

    async fn drive(&self, page: Page, mirror: &str, target: &str) -> Result<PageOutcome, ArchiveError> {
        let fail = |step: &str, e: chromiumoxide::error::CdpError| {
            ArchiveError::Browser(format!("{step} on {mirror}: {e}"))
        };

        let html = page.content().await.map_err(|e| fail("Reading page failed", e))?;
        if looks_like_captcha(&html) {
            return Ok(PageOutcome::Captcha);
        }

        let field = page
            .find_element("input#url")
            .await
            .map_err(|e| fail("Submit form not found", e))?;
        field
            .click()
            .await
            .map_err(|e| fail("Focusing URL field failed", e))?;
        field
            .type_str(target)
            .await
            .map_err(|e| fail("Typing URL failed", e))?;

        self.limiter
            .acquire_or_err(ServiceName::ArchiveToday.as_str(), self.rate_limit_timeout)
            .await?;
        field
            .press_key("Enter")
            .await
            .map_err(|e| fail("Submitting form failed", e))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| fail("Waiting for result failed", e))?;

        let landed = page
            .url()
            .await
            .map_err(|e| fail("Reading URL failed", e))?
            .unwrap_or_default();
        let html = page.content().await.map_err(|e| fail("Reading page failed", e))?;

        Ok(if landed.contains("/archive/") {
            PageOutcome::Archived(landed)
        } else if looks_like_captcha(&html) {
            PageOutcome::Captcha
        } else {
            PageOutcome::Unconfirmed
        })
    }
}

/// Run `steps` on an open tab until `deadline`, then `close` the tab no
/// matter how the steps ended. `None` means the deadline passed.
async fn run_in_tab<P, T, S, SFut, C, CFut>(
    tab: P,
    deadline: Instant,
    steps: S,
    close: C,
) -> Option<Result<T, ArchiveError>>
where
    P: Clone,
    S: FnOnce(P) -> SFut,
    SFut: Future<Output = Result<T, ArchiveError>>,
    C: FnOnce(P) -> CFut,
    CFut: Future<Output = ()>,
{
    let outcome = tokio::time::timeout_at(deadline, steps(tab.clone())).await.ok();
    close(tab).await;
    outcome
}

#[async_trait]
impl PageSubmitter for BrowserSubmitter {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn submit_form(&self, mirror: &str, target: &str) -> Result<PageOutcome, ArchiveError> {
        let deadline = Instant::now() + self.timeout;
        let timed_out = || ArchiveError::NetworkTimeout(self.timeout.as_secs());

        let page = match tokio::time::timeout_at(deadline, self.browser.new_page(mirror)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                return Err(ArchiveError::Browser(format!("Navigation failed on {mirror}: {e}")));
            }
            Err(_) => return Err(timed_out()),
        };

        run_in_tab(
            page,
            deadline,
            |page| self.drive(page, mirror, target),
            |page| async move {
                if let Err(e) = page.close().await {
                    tracing::debug!(%mirror, error = %e, "Closing tab failed");
                }
            },
        )
        .await
        .unwrap_or_else(|| Err(timed_out()))
    }
}

/// Locates a Chrome/Chromium binary, honouring `CHROME_BIN`.
///
/// Snap-packaged Chromium ships a wrapper that strips headless flags, so the
/// real binary inside the snap is preferred.
pub fn detect_chrome() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Tab = Arc<AtomicUsize>;

    async fn close(tab: Tab) {
        tab.fetch_add(1, Ordering::SeqCst);
    }

    #[tokio::test(start_paused = true)]
    async fn tab_closed_after_success() {
        let tab = Tab::default();
        let outcome = run_in_tab(
            tab.clone(),
            Instant::now() + Duration::from_secs(5),
            |_| async { Ok(PageOutcome::Unconfirmed) },
            close,
        )
        .await;

        assert!(matches!(outcome, Some(Ok(PageOutcome::Unconfirmed))));
        assert_eq!(tab.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tab_closed_after_failed_step() {
        let tab = Tab::default();
        let outcome: Option<Result<PageOutcome, _>> = run_in_tab(
            tab.clone(),
            Instant::now() + Duration::from_secs(5),
            |_| async { Err(ArchiveError::Browser("Submit form not found".into())) },
            close,
        )
        .await;

        assert!(matches!(outcome, Some(Err(ArchiveError::Browser(_)))));
        assert_eq!(tab.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tab_closed_after_deadline() {
        let tab = Tab::default();
        let start = Instant::now();
        let outcome = run_in_tab(
            tab.clone(),
            start + Duration::from_secs(5),
            |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(PageOutcome::Unconfirmed)
            },
            close,
        )
        .await;

        assert!(outcome.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(tab.load(Ordering::SeqCst), 1);
    }
}
