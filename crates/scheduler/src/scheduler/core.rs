use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use fleet_core::config::SchedulerConfig;
use fleet_eisenbahn::events::JobTerminated;
use fleet_eisenbahn::SiteRequester;

use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use crate::negotiator::ResourceNegotiator;
use crate::registry::{SchedulerRegistry, TerminalEventHandler};

/// Admits jobs onto the fleet, one candidate list at a time.
pub struct Scheduler {
    pub(super) negotiator: ResourceNegotiator,
    pub(super) registry: Arc<SchedulerRegistry>,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
    /// Held for the whole of `schedule_job`.
    pub(super) in_flight: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    /// Shared handle to the admitted-job registry.
    pub fn registry(&self) -> Arc<SchedulerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metrics_handle(&self) -> Arc<RwLock<SchedulerMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub(super) fn record(&self, update: impl FnOnce(&mut SchedulerMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut *metrics);
    }
}

impl TerminalEventHandler for Scheduler {
    /// Free the slot of a terminated job.
    fn handle_event(&self, event: &JobTerminated) -> bool {
        let removed = self.registry.handle_event(event);
        if removed {
            self.record(|m| m.jobs_released += 1);
        }
        removed
    }
}

/// Builds a [`Scheduler`]; the site requester is mandatory.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    requester: Option<Arc<dyn SiteRequester>>,
    registry: Option<Arc<SchedulerRegistry>>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            requester: None,
            registry: None,
        }
    }

    pub fn requester(mut self, requester: Arc<dyn SiteRequester>) -> Self {
        self.requester = Some(requester);
        self
    }

    /// Use an existing registry instead of creating one sized by `max_jobs`.
    pub fn registry(mut self, registry: Arc<SchedulerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        let requester = self
            .requester
            .ok_or_else(|| SchedulerError::Config("no site requester configured".into()))?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SchedulerRegistry::new(self.config.max_jobs)));

        info!(
            max_jobs = registry.max_jobs(),
            timeout_secs = self.config.client_req_timeout_secs,
            check_topic = %self.config.check_resource_topic,
            cancel_topic = %self.config.cancel_resource_topic,
            "scheduler ready"
        );

        Ok(Scheduler {
            negotiator: ResourceNegotiator::new(requester, &self.config),
            registry,
            metrics: Arc::new(RwLock::new(SchedulerMetrics::default())),
            in_flight: tokio::sync::Mutex::new(()),
        })
    }
}
