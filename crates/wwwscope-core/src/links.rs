use async_trait::async_trait;

use crate::error::ArchiveError;
use crate::models::{ArchiveResult, ServiceName};
use crate::traits::ServiceAdapter;

/// Listing/search link for `url` on `service`.
///
/// Pure string expansion; `None` for services whose retrieval needs an API
/// call (Memento).
pub fn retrieval_link(service: ServiceName, url: &str) -> Option<String> {
    let link = match service {
        ServiceName::WaybackMachine => format!("https://web.archive.org/web/*/{url}"),
        ServiceName::ArchiveToday => format!("https://archive.today/{url}"),
        ServiceName::ArchiveIs => format!("https://archive.is/{url}"),
        ServiceName::GoogleCache => {
            format!("https://webcache.googleusercontent.com/search?q=cache:{url}")
        }
        ServiceName::WebCite => format!("http://www.webcitation.org/query?url={url}"),
        ServiceName::Megalodon => format!("http://megalodon.jp/?url={url}"),
        ServiceName::TimeTravel => format!("https://timetravel.mementoweb.org/list/{url}"),
        ServiceName::PermaCc => format!("https://perma.cc/search?q={url}"),
        ServiceName::Memento => return None,
    };
    Some(link)
}

/// Result for a retrieval that is only a link, never a verification.
pub fn link_result(service: ServiceName, url: &str) -> Option<ArchiveResult> {
    let link = retrieval_link(service, url)?;
    Some(
        ArchiveResult::success(format!("{service} archive listing: {link}"))
            .with_url(link)
            .with_guidance("Open the link to browse snapshots; availability is not verified."),
    )
}

/// Adapter for services that can only be browsed (Google Cache, Perma.cc, …).
///
/// No network I/O: identical input always yields an identical result.
#[derive(Debug, Clone, Copy)]
pub struct LinkOnlyAdapter {
    service: ServiceName,
}

impl LinkOnlyAdapter {
    /// `None` if the service has no link template.
    pub fn new(service: ServiceName) -> Option<Self> {
        retrieval_link(service, "").map(|_| Self { service })
    }
}

#[async_trait]
impl ServiceAdapter for LinkOnlyAdapter {
    fn service(&self) -> ServiceName {
        self.service
    }

    async fn submit(&self, _url: &str) -> Result<ArchiveResult, ArchiveError> {
        Ok(ArchiveResult::failure(format!(
            "{} does not accept submissions; it is retrieval-only",
            self.service
        ))
        .with_guidance("Submit to the Wayback Machine or Archive.today instead."))
    }

    async fn retrieve(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        link_result(self.service, url).ok_or_else(|| {
            ArchiveError::Config(format!("no retrieval link template for {}", self.service))
        })
    }
}
