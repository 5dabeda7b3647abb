//! In-memory site fleet for scheduler tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use fleet_core::config::SchedulerConfig;
use fleet_core::JobId;
use fleet_eisenbahn::messages::{
    CancelResourceRequest, CheckResourceRequest, ResourceReply, ReturnCode,
};
use fleet_eisenbahn::{topics, EisenbahnError, Message, SiteRequester, SiteResponses};

/// How a mock site answers check requests. Cancels are always acknowledged
/// by reachable sites.
#[derive(Debug, Clone)]
pub enum SiteBehavior {
    Grant(&'static str),
    Deny,
    Fail(ReturnCode),
    Unreachable,
    /// No entry at all in the response map.
    Silent,
}

/// One request as seen by a site.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub topic: String,
    pub site: String,
    pub job_id: JobId,
    pub resource_spec: Value,
    pub token: Option<String>,
}

pub struct MockSites {
    behaviors: HashMap<String, SiteBehavior>,
    delay: Duration,
    sent: Mutex<Vec<Sent>>,
}

impl MockSites {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn site(mut self, name: &str, behavior: SiteBehavior) -> Self {
        self.behaviors.insert(name.to_string(), behavior);
        self
    }

    /// Wait this long before answering any request. Requests are recorded
    /// before the wait.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn checks(&self) -> Vec<Sent> {
        self.by_topic(topics::CHECK_RESOURCE)
    }

    pub fn cancels(&self) -> Vec<Sent> {
        self.by_topic(topics::CANCEL_RESOURCE)
    }

    fn by_topic(&self, topic: &str) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.topic == topic).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn record(&self, site: &str, request: &Message) {
        let (job_id, resource_spec, token) = if request.topic == topics::CHECK_RESOURCE {
            let body: CheckResourceRequest = request.decode().unwrap();
            (body.job_id, body.resource_spec, None)
        } else {
            let body: CancelResourceRequest = request.decode().unwrap();
            (body.job_id, body.resource_spec, body.token)
        };
        self.sent.lock().unwrap().push(Sent {
            topic: request.topic.clone(),
            site: site.to_string(),
            job_id,
            resource_spec,
            token,
        });
    }
}

#[async_trait]
impl SiteRequester for MockSites {
    async fn send_to_sites(
        &self,
        targets: &[String],
        request: Message,
        _timeout: Duration,
    ) -> SiteResponses {
        for site in targets {
            self.record(site, &request);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let is_check = request.topic == topics::CHECK_RESOURCE;
        let mut responses = SiteResponses::new();
        for site in targets {
            let behavior = self
                .behaviors
                .get(site)
                .cloned()
                .unwrap_or(SiteBehavior::Unreachable);
            let body = match behavior {
                SiteBehavior::Unreachable => {
                    responses.insert(
                        site.clone(),
                        Err(EisenbahnError::Transport("unreachable".into())),
                    );
                    continue;
                }
                SiteBehavior::Silent => continue,
                _ if !is_check => ResourceReply::ok(),
                SiteBehavior::Grant(token) => ResourceReply::granted(token),
                SiteBehavior::Deny => ResourceReply::denied(),
                SiteBehavior::Fail(code) => ResourceReply::error(code),
            };
            responses.insert(site.clone(), Ok(request.reply(&body).unwrap()));
        }
        responses
    }
}

pub fn config(max_jobs: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_jobs,
        client_req_timeout_secs: 0.5,
        ..SchedulerConfig::default()
    }
}
