use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use fleet_core::config::SchedulerConfig;
use fleet_core::{Job, JobId, TerminalState};
use fleet_eisenbahn::events::JobTerminated;
use fleet_eisenbahn::messages::ResourceReply;
use fleet_eisenbahn::{topics, Message, SiteRequester, SiteResponses};

use crate::error::SchedulerError;
use crate::registry::{SchedulerRegistry, TerminalEventHandler};
use crate::scheduler::{ScheduleOutcome, Scheduler};

/// Grants every check; runs `on_check` first so tests can race the registry.
struct GrantAll {
    on_check: Option<Box<dyn Fn() + Send + Sync>>,
    topics_seen: Mutex<Vec<String>>,
}

impl GrantAll {
    fn new() -> Self {
        Self {
            on_check: None,
            topics_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SiteRequester for GrantAll {
    async fn send_to_sites(
        &self,
        targets: &[String],
        request: Message,
        _timeout: Duration,
    ) -> SiteResponses {
        self.topics_seen.lock().unwrap().push(request.topic.clone());
        if request.topic == topics::CHECK_RESOURCE {
            if let Some(hook) = &self.on_check {
                hook();
            }
        }
        targets
            .iter()
            .map(|site| {
                let body = ResourceReply::granted(format!("{site}-tok"));
                (site.clone(), Ok(request.reply(&body).unwrap()))
            })
            .collect()
    }
}

fn job(id: &str) -> Job {
    Job::new(id).with_site("s1", json!({"gpu": 1})).with_min_sites(1)
}

#[test]
fn build_without_requester_is_config_error() {
    let err = Scheduler::builder(SchedulerConfig::default())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::Config(msg) if msg.contains("requester")));
}

#[test]
fn build_with_invalid_config_is_config_error() {
    let config = SchedulerConfig {
        client_req_timeout_secs: 0.0,
        ..SchedulerConfig::default()
    };
    let err = Scheduler::builder(config)
        .requester(Arc::new(GrantAll::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::Config(_)));
}

#[test]
fn default_topics_match_wire_topics() {
    let config = SchedulerConfig::default();
    assert_eq!(config.check_resource_topic, topics::CHECK_RESOURCE);
    assert_eq!(config.cancel_resource_topic, topics::CANCEL_RESOURCE);
}

#[test]
fn registry_sized_from_config() {
    let config = SchedulerConfig {
        max_jobs: 3,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::builder(config)
        .requester(Arc::new(GrantAll::new()))
        .build()
        .unwrap();
    assert_eq!(scheduler.registry().max_jobs(), 3);
    assert_eq!(scheduler.metrics().scheduling_rounds, 0);
}

#[tokio::test]
async fn slot_taken_during_negotiation_rolls_back() {
    let registry = Arc::new(SchedulerRegistry::new(1));
    let racing = Arc::clone(&registry);

    let mut sites = GrantAll::new();
    sites.on_check = Some(Box::new(move || {
        racing.add(&Job::new("intruder"));
    }));
    let sites = Arc::new(sites);

    let scheduler = Scheduler::builder(SchedulerConfig::default())
        .requester(sites.clone())
        .registry(Arc::clone(&registry))
        .build()
        .unwrap();

    let outcome = scheduler.schedule_job(&[job("j1")]).await;

    assert_eq!(outcome, ScheduleOutcome::NoneAdmissible);
    assert!(!registry.contains(&JobId::new("j1")));
    assert_eq!(
        *sites.topics_seen.lock().unwrap(),
        vec![topics::CHECK_RESOURCE.to_string(), topics::CANCEL_RESOURCE.to_string()]
    );

    let metrics = scheduler.metrics();
    assert_eq!(metrics.rejections["capacity_exhausted"], 1);
    assert_eq!(metrics.rollbacks_sent, 1);
}

#[tokio::test]
async fn already_admitted_candidate_is_skipped() {
    let sites = Arc::new(GrantAll::new());
    let scheduler = Scheduler::builder(SchedulerConfig::default())
        .requester(sites.clone())
        .build()
        .unwrap();

    assert!(scheduler.schedule_job(&[job("j1")]).await.is_admitted());
    let second = scheduler.schedule_job(&[job("j1"), job("j2")]).await;

    match second {
        ScheduleOutcome::Admitted { job, .. } => assert_eq!(job.id().as_str(), "j2"),
        other => panic!("expected j2 admitted, got {other:?}"),
    }
    assert_eq!(sites.topics_seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn terminal_event_updates_metrics() {
    let scheduler = Scheduler::builder(SchedulerConfig::default())
        .requester(Arc::new(GrantAll::new()))
        .build()
        .unwrap();
    scheduler.schedule_job(&[job("j1")]).await;

    let event = JobTerminated {
        job_id: JobId::new("j1"),
        state: TerminalState::Aborted,
    };
    assert!(scheduler.handle_event(&event));
    assert!(!scheduler.handle_event(&event));

    let metrics = scheduler.metrics();
    assert_eq!(metrics.jobs_admitted, 1);
    assert_eq!(metrics.jobs_released, 1);
}
