//! Fan-out of one [`ArchiveRequest`] across service adapters.
//!
//! Each selected service runs as its own task on a bounded pool. Results are
//! gathered in completion order and keyed by service; one adapter failing,
//! hanging, or panicking never affects its siblings.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ArchiveError;
use crate::links::LinkOnlyAdapter;
use crate::models::{ArchiveMode, ArchiveRequest, ArchiveResult, ArchiveStatus, ServiceName};
use crate::traits::ServiceAdapter;

/// Aggregated outcome, exactly one entry per requested service.
pub type DispatchReport = BTreeMap<ServiceName, ArchiveResult>;

/// Limits applied by the dispatcher on top of each adapter's own timeouts.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Adapters running at once. External services are fragile; keep it low.
    pub max_concurrency: usize,
    /// Hard ceiling on a single adapter call.
    pub service_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            service_timeout: Duration::from_secs(90),
        }
    }
}

impl DispatchConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_service_timeout(mut self, timeout: Duration) -> Self {
        self.service_timeout = timeout;
        self
    }
}

/// Lookup table from service to adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ServiceName, Arc<dyn ServiceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with every link-only service.
    pub fn with_link_only() -> Self {
        let mut registry = Self::new();
        for service in ServiceName::ALL {
            if let Some(adapter) = LinkOnlyAdapter::new(service).filter(|_| service.is_link_only()) {
                registry.register(Arc::new(adapter));
            }
        }
        registry
    }

    /// Add or replace the adapter for `adapter.service()`.
    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        self.adapters.insert(adapter.service(), adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, service: ServiceName) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(&service).cloned()
    }

    pub fn services(&self) -> Vec<ServiceName> {
        let mut services: Vec<_> = self.adapters.keys().copied().collect();
        services.sort();
        services
    }
}

/// Events emitted while a request is dispatched.
#[derive(Debug, Clone)]
pub enum DispatchEvent<'a> {
    Started {
        request_id: Uuid,
        url: &'a str,
        mode: ArchiveMode,
        services: usize,
    },
    ServiceCompleted {
        service: ServiceName,
        status: ArchiveStatus,
        elapsed: Duration,
    },
    ServiceFailed {
        service: ServiceName,
        error: &'a str,
    },
    Cancelled {
        request_id: Uuid,
    },
    Finished {
        request_id: Uuid,
        succeeded: usize,
        total: usize,
    },
}

/// Receives dispatch events (decoupled logging / progress display).
pub trait DispatchReporter: Send + Sync {
    fn report(&self, event: DispatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatchReporter;

impl DispatchReporter for TracingDispatchReporter {
    fn report(&self, event: DispatchEvent<'_>) {
        match event {
            DispatchEvent::Started {
                request_id,
                url,
                mode,
                services,
            } => {
                tracing::info!(%request_id, %url, %mode, %services, "Dispatching request");
            }
            DispatchEvent::ServiceCompleted {
                service,
                status,
                elapsed,
            } => {
                tracing::info!(%service, %status, elapsed_ms = %elapsed.as_millis(), "Service finished");
            }
            DispatchEvent::ServiceFailed { service, error } => {
                tracing::warn!(%service, %error, "Service failed");
            }
            DispatchEvent::Cancelled { request_id } => {
                tracing::warn!(%request_id, "Dispatch cancelled");
            }
            DispatchEvent::Finished {
                request_id,
                succeeded,
                total,
            } => {
                tracing::info!(%request_id, %succeeded, %total, "Request complete");
            }
        }
    }
}

type TaskOutput = (Result<Result<ArchiveResult, ArchiveError>, ()>, Duration);

/// Runs requests against the registered adapters.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<AdapterRegistry>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(registry: AdapterRegistry, config: DispatchConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Dispatch with tracing output and no cancellation.
    pub async fn dispatch(&self, request: &ArchiveRequest) -> DispatchReport {
        self.dispatch_with(request, &CancellationToken::new(), &TracingDispatchReporter)
            .await
    }

    /// Dispatch `request`, stopping early if `cancel` fires.
    ///
    /// Services still running on cancellation are reported as failures.
    pub async fn dispatch_with<R: DispatchReporter>(
        &self,
        request: &ArchiveRequest,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> DispatchReport {
        reporter.report(DispatchEvent::Started {
            request_id: request.id,
            url: &request.url,
            mode: request.mode,
            services: request.services.len(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut task_services = HashMap::new();
        let mut report = DispatchReport::new();

        for &service in &request.services {
            let Some(adapter) = self.registry.get(service) else {
                let result = ArchiveResult::failure(format!(
                    "{service} is not configured for {}",
                    request.mode
                ))
                .with_guidance("Pick another service.");
                report.insert(service, result);
                continue;
            };

            let url = request.url.clone();
            let mode = request.mode;
            let timeout = self.config.service_timeout;
            let semaphore = semaphore.clone();

            let handle = tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await;
                let started = Instant::now();
                let call = async {
                    match mode {
                        ArchiveMode::Archive => adapter.submit(&url).await,
                        ArchiveMode::Retrieve => adapter.retrieve(&url).await,
                    }
                };
                let outcome = tokio::time::timeout(timeout, call).await.map_err(|_| ());
                (outcome, started.elapsed())
            });
            task_services.insert(handle.id(), service);
        }

        let mut cancelled = false;
        loop {
            let joined = tokio::select! {
                joined = tasks.join_next_with_id() => joined,
                () = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    reporter.report(DispatchEvent::Cancelled { request_id: request.id });
                    tasks.abort_all();
                    continue;
                }
            };
            let Some(joined) = joined else { break };

            let (service, result) = match joined {
                Ok((id, (outcome, elapsed))) => {
                    let Some(&service) = task_services.get(&id) else {
                        continue;
                    };
                    let result = match outcome {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => ArchiveResult::from_error(&e),
                        Err(()) => ArchiveResult::from_error(&ArchiveError::NetworkTimeout(
                            self.config.service_timeout.as_secs(),
                        ))
                        .with_guidance(format!(
                            "{service} did not finish within {}s; it may still complete upstream, check back later.",
                            self.config.service_timeout.as_secs()
                        )),
                    };
                    reporter.report(DispatchEvent::ServiceCompleted {
                        service,
                        status: result.status,
                        elapsed,
                    });
                    (service, result)
                }
                Err(join_err) => {
                    let Some(&service) = task_services.get(&join_err.id()) else {
                        continue;
                    };
                    let result = if join_err.is_cancelled() {
                        ArchiveResult::failure(format!("{service} was cancelled before finishing"))
                            .with_guidance("Run the request again.")
                    } else {
                        let message = panic_message(join_err.into_panic());
                        ArchiveResult::failure(format!("Error processing {service}: {message}"))
                            .with_guidance("Unexpected adapter fault; try again or use an alternate service.")
                    };
                    reporter.report(DispatchEvent::ServiceFailed {
                        service,
                        error: &result.message,
                    });
                    (service, result)
                }
            };
            report.insert(service, result);
        }

        for &service in &request.services {
            report.entry(service).or_insert_with(|| {
                ArchiveResult::failure(format!("{service} produced no result"))
                    .with_guidance("Run the request again.")
            });
        }

        let succeeded = report.values().filter(|r| r.is_success()).count();
        reporter.report(DispatchEvent::Finished {
            request_id: request.id,
            succeeded,
            total: report.len(),
        });

        report
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "adapter panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockAdapter;

    fn request(mode: ArchiveMode, services: &[ServiceName]) -> ArchiveRequest {
        ArchiveRequest::new("https://example.com", mode, services.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn failing_adapter_does_not_affect_siblings() {
        let registry = AdapterRegistry::new()
            .with_adapter(Arc::new(MockAdapter::success(ServiceName::WaybackMachine, "ok")))
            .with_adapter(Arc::new(MockAdapter::with_error(
                ServiceName::ArchiveToday,
                ArchiveError::Generic("adapter exploded".into()),
            )))
            .with_adapter(Arc::new(MockAdapter::success(ServiceName::Memento, "found 2")));
        let dispatcher = Dispatcher::new(registry, DispatchConfig::default());

        let report = dispatcher
            .dispatch(&request(
                ArchiveMode::Archive,
                &[
                    ServiceName::WaybackMachine,
                    ServiceName::ArchiveToday,
                    ServiceName::Memento,
                ],
            ))
            .await;

        assert_eq!(report.len(), 3);
        assert_eq!(report[&ServiceName::WaybackMachine].status, ArchiveStatus::Success);
        assert_eq!(report[&ServiceName::Memento].status, ArchiveStatus::Success);
        let failed = &report[&ServiceName::ArchiveToday];
        assert_eq!(failed.status, ArchiveStatus::Failure);
        assert!(failed.message.contains("adapter exploded"));
    }

    #[tokio::test]
    async fn panicking_adapter_becomes_failure() {
        let registry = AdapterRegistry::new()
            .with_adapter(Arc::new(MockAdapter::panicking(ServiceName::WaybackMachine, "boom")))
            .with_adapter(Arc::new(MockAdapter::success(ServiceName::ArchiveToday, "ok")))
            .with_adapter(Arc::new(MockAdapter::success(ServiceName::Memento, "ok")));
        let dispatcher = Dispatcher::new(registry, DispatchConfig::default());

        let report = dispatcher
            .dispatch(&request(
                ArchiveMode::Retrieve,
                &[
                    ServiceName::WaybackMachine,
                    ServiceName::ArchiveToday,
                    ServiceName::Memento,
                ],
            ))
            .await;

        assert_eq!(report.len(), 3);
        let failed = &report[&ServiceName::WaybackMachine];
        assert_eq!(failed.status, ArchiveStatus::Failure);
        assert!(failed.message.contains("boom"));
        assert!(report[&ServiceName::ArchiveToday].is_success());
    }

    #[tokio::test]
    async fn mode_selects_submit_or_retrieve() {
        let adapter = MockAdapter::success(ServiceName::WaybackMachine, "ok");
        let registry = AdapterRegistry::new().with_adapter(Arc::new(adapter.clone()));
        let dispatcher = Dispatcher::new(registry, DispatchConfig::default());

        dispatcher
            .dispatch(&request(ArchiveMode::Archive, &[ServiceName::WaybackMachine]))
            .await;
        dispatcher
            .dispatch(&request(ArchiveMode::Retrieve, &[ServiceName::WaybackMachine]))
            .await;

        assert_eq!(adapter.submit_calls(), 1);
        assert_eq!(adapter.retrieve_calls(), 1);
    }

    #[tokio::test]
    async fn registry_is_reusable_across_dispatches() {
        let adapter = Arc::new(MockAdapter::with_responses(
            ServiceName::WaybackMachine,
            vec![
                Err(ArchiveError::NetworkTimeout(30)),
                Ok(ArchiveResult::success("Archived")),
            ],
        ));
        let registry = AdapterRegistry::new().with_adapter(adapter.clone());
        let dispatcher = Dispatcher::new(registry, DispatchConfig::default());
        let req = request(ArchiveMode::Archive, &[ServiceName::WaybackMachine]);

        let first = dispatcher.dispatch(&req).await;
        assert_eq!(first[&ServiceName::WaybackMachine].status, ArchiveStatus::Failure);

        let second = dispatcher.dispatch(&req).await;
        assert_eq!(second[&ServiceName::WaybackMachine].status, ArchiveStatus::Success);
        assert_eq!(adapter.submit_calls(), 2);
    }

    #[tokio::test]
    async fn unregistered_service_gets_failure_entry() {
        let dispatcher = Dispatcher::new(AdapterRegistry::new(), DispatchConfig::default());
        let report = dispatcher
            .dispatch(&request(ArchiveMode::Archive, &[ServiceName::Memento]))
            .await;
        assert_eq!(report.len(), 1);
        let result = &report[&ServiceName::Memento];
        assert_eq!(result.status, ArchiveStatus::Failure);
        assert!(result.message.contains("not configured"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_adapter_hits_service_timeout() {
        let registry = AdapterRegistry::new()
            .with_adapter(Arc::new(
                MockAdapter::success(ServiceName::WaybackMachine, "late")
                    .with_delay(Duration::from_secs(600)),
            ))
            .with_adapter(Arc::new(MockAdapter::success(ServiceName::Memento, "ok")));
        let config = DispatchConfig::default().with_service_timeout(Duration::from_secs(5));
        let dispatcher = Dispatcher::new(registry, config);

        let start = Instant::now();
        let report = dispatcher
            .dispatch(&request(
                ArchiveMode::Archive,
                &[ServiceName::WaybackMachine, ServiceName::Memento],
            ))
            .await;

        assert!(start.elapsed() < Duration::from_secs(10));
        let timed_out = &report[&ServiceName::WaybackMachine];
        assert_eq!(timed_out.status, ArchiveStatus::Failure);
        assert!(timed_out.message.contains("timed out"));
        assert!(report[&ServiceName::Memento].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let delay = Duration::from_secs(1);
        let services = [
            ServiceName::WaybackMachine,
            ServiceName::ArchiveToday,
            ServiceName::Memento,
            ServiceName::PermaCc,
        ];
        let mut registry = AdapterRegistry::new();
        for svc in services {
            registry.register(Arc::new(MockAdapter::success(svc, "ok").with_delay(delay)));
        }
        let dispatcher =
            Dispatcher::new(registry, DispatchConfig::default().with_max_concurrency(2));

        let start = Instant::now();
        let report = dispatcher
            .dispatch(&request(ArchiveMode::Retrieve, &services))
            .await;

        assert_eq!(report.len(), 4);
        // 4 tasks, 2 at a time, 1s each
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_fills_remaining_services() {
        let registry = AdapterRegistry::new()
            .with_adapter(Arc::new(MockAdapter::success(ServiceName::Memento, "fast")))
            .with_adapter(Arc::new(
                MockAdapter::success(ServiceName::WaybackMachine, "slow")
                    .with_delay(Duration::from_secs(60)),
            ));
        let dispatcher = Dispatcher::new(registry, DispatchConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = dispatcher
            .dispatch_with(
                &request(
                    ArchiveMode::Archive,
                    &[ServiceName::Memento, ServiceName::WaybackMachine],
                ),
                &cancel,
                &TracingDispatchReporter,
            )
            .await;

        assert!(report[&ServiceName::Memento].is_success());
        let cancelled = &report[&ServiceName::WaybackMachine];
        assert_eq!(cancelled.status, ArchiveStatus::Failure);
        assert!(cancelled.message.contains("cancelled"));
    }

    #[tokio::test]
    async fn link_only_registry_serves_retrievals() {
        let dispatcher = Dispatcher::new(AdapterRegistry::with_link_only(), DispatchConfig::default());
        let report = dispatcher
            .dispatch(&request(
                ArchiveMode::Retrieve,
                &[ServiceName::PermaCc, ServiceName::GoogleCache],
            ))
            .await;
        assert!(report.values().all(ArchiveResult::is_success));
        assert!(dispatcher.registry().get(ServiceName::Memento).is_none());
    }
}
