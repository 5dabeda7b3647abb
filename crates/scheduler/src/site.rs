//! Site-side reservation bookkeeping.
//!
//! A [`SiteResourceManager`] owns a fixed capacity per resource name (for
//! example `{"gpu": 4, "cpu": 32}`) and answers the scheduler's check and
//! cancel requests against it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_core::{JobId, ResourceRequirement};
use fleet_eisenbahn::messages::{
    CancelResourceRequest, CheckResourceRequest, ResourceReply, ReturnCode,
};
use fleet_eisenbahn::{topics, EisenbahnError, Message, RequestHandler};

use crate::error::SchedulerError;

#[derive(Debug, Clone)]
struct Reservation {
    job_id: JobId,
    amounts: HashMap<String, f64>,
}

#[derive(Debug, Default)]
struct SiteState {
    available: HashMap<String, f64>,
    reservations: HashMap<String, Reservation>,
}

pub struct SiteResourceManager {
    name: String,
    capacity: HashMap<String, f64>,
    check_topic: String,
    cancel_topic: String,
    state: Mutex<SiteState>,
}

impl SiteResourceManager {
    pub fn new(name: impl Into<String>, capacity: HashMap<String, f64>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(SiteState {
                available: capacity.clone(),
                reservations: HashMap::new(),
            }),
            capacity,
            check_topic: topics::CHECK_RESOURCE.to_string(),
            cancel_topic: topics::CANCEL_RESOURCE.to_string(),
        }
    }

    /// Answer on non-default topics.
    pub fn with_topics(mut self, check: impl Into<String>, cancel: impl Into<String>) -> Self {
        self.check_topic = check.into();
        self.cancel_topic = cancel.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> &HashMap<String, f64> {
        &self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently unreserved amount per resource.
    pub fn available(&self) -> HashMap<String, f64> {
        self.lock().available.clone()
    }

    pub fn reservation_count(&self) -> usize {
        self.lock().reservations.len()
    }

    /// Reserve `requirement` for `job_id` if it fits in what is left.
    pub fn check(&self, job_id: &JobId, requirement: &ResourceRequirement) -> ResourceReply {
        let amounts = match parse_requirement(requirement) {
            Ok(amounts) => amounts,
            Err(reason) => {
                warn!(site = %self.name, job_id = %job_id, reason = %reason, "invalid resource requirement");
                return ResourceReply::error(ReturnCode::InvalidRequest);
            }
        };

        let mut state = self.lock();
        let fits = amounts.iter().all(|(resource, amount)| {
            state
                .available
                .get(resource)
                .is_some_and(|left| *left >= *amount)
        });
        if !fits {
            debug!(site = %self.name, job_id = %job_id, "not enough resources");
            return ResourceReply::denied();
        }

        for (resource, amount) in &amounts {
            if let Some(left) = state.available.get_mut(resource) {
                *left -= amount;
            }
        }
        let token = Uuid::new_v4().to_string();
        state.reservations.insert(
            token.clone(),
            Reservation {
                job_id: job_id.clone(),
                amounts,
            },
        );
        info!(site = %self.name, job_id = %job_id, token = %token, "resources reserved");
        ResourceReply::granted(token)
    }

    /// Release the reservation behind `token`. Unknown tokens are ignored.
    pub fn cancel(&self, token: Option<&str>) -> ResourceReply {
        let Some(token) = token else {
            debug!(site = %self.name, "cancel without token");
            return ResourceReply::ok();
        };

        let mut state = self.lock();
        let released = state.reservations.remove(token);
        match released {
            Some(reservation) => {
                for (resource, amount) in &reservation.amounts {
                    *state.available.entry(resource.clone()).or_default() += amount;
                }
                info!(site = %self.name, job_id = %reservation.job_id, token = %token, "reservation released");
            }
            None => debug!(site = %self.name, token = %token, "unknown or released token"),
        }
        ResourceReply::ok()
    }

    /// Route one request to `check` or `cancel` by topic.
    pub fn handle(&self, request: &Message) -> ResourceReply {
        if request.topic == self.check_topic {
            match request.decode::<CheckResourceRequest>() {
                Ok(req) => self.check(&req.job_id, &req.resource_spec),
                Err(e) => {
                    warn!(site = %self.name, error = %e, "undecodable check request");
                    ResourceReply::error(ReturnCode::InvalidRequest)
                }
            }
        } else if request.topic == self.cancel_topic {
            match request.decode::<CancelResourceRequest>() {
                Ok(req) => self.cancel(req.token.as_deref()),
                Err(e) => {
                    warn!(site = %self.name, error = %e, "undecodable cancel request");
                    ResourceReply::error(ReturnCode::InvalidRequest)
                }
            }
        } else {
            warn!(site = %self.name, topic = %request.topic, "unknown request topic");
            ResourceReply::error(ReturnCode::InvalidRequest)
        }
    }

    /// Answer requests from `handler` until `shutdown` is notified.
    pub async fn serve<H: RequestHandler + ?Sized>(
        &self,
        handler: &H,
        shutdown: Arc<Notify>,
    ) -> Result<(), SchedulerError> {
        let stop = shutdown.notified();
        tokio::pin!(stop);
        info!(site = %self.name, "serving resource requests");

        loop {
            let (token, request) = tokio::select! {
                _ = &mut stop => {
                    info!(site = %self.name, "site agent stopping");
                    return Ok(());
                }
                received = handler.recv_request() => match received {
                    Ok(pair) => pair,
                    Err(e @ (EisenbahnError::Deserialization(_) | EisenbahnError::Transport(_))) => {
                        warn!(site = %self.name, error = %e, "dropping malformed request");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            let reply = self.handle(&request);
            let reply = request.reply(&reply).map_err(EisenbahnError::from)?;
            if let Err(e) = handler.send_reply(token, reply).await {
                warn!(site = %self.name, error = %e, "failed to send reply");
            }
        }
    }
}

/// A requirement is a JSON object of resource name to non-negative amount.
/// `null` requests nothing.
fn parse_requirement(requirement: &ResourceRequirement) -> Result<HashMap<String, f64>, String> {
    match requirement {
        ResourceRequirement::Null => Ok(HashMap::new()),
        ResourceRequirement::Object(fields) => fields
            .iter()
            .map(|(name, value)| match value.as_f64() {
                Some(amount) if amount.is_finite() && amount >= 0.0 => Ok((name.clone(), amount)),
                _ => Err(format!("resource '{name}' has invalid amount {value}")),
            })
            .collect(),
        other => Err(format!("expected an object of resource amounts, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn site() -> SiteResourceManager {
        SiteResourceManager::new("s1", HashMap::from([("gpu".to_string(), 4.0)]))
    }

    #[test]
    fn check_reserves_until_exhausted() {
        let site = site();
        let first = site.check(&JobId::new("a"), &json!({"gpu": 3}));
        assert!(first.is_granted());
        assert_eq!(site.available()["gpu"], 1.0);

        let second = site.check(&JobId::new("b"), &json!({"gpu": 2}));
        assert!(!second.is_granted());
        assert_eq!(second.return_code, ReturnCode::Ok);
        assert_eq!(site.reservation_count(), 1);
    }

    #[test]
    fn unknown_resource_is_denied() {
        let reply = site().check(&JobId::new("a"), &json!({"tpu": 1}));
        assert!(!reply.is_granted());
    }

    #[test]
    fn malformed_requirement_is_invalid() {
        let site = site();
        for bad in [json!([1, 2]), json!({"gpu": "lots"}), json!({"gpu": -1})] {
            let reply = site.check(&JobId::new("a"), &bad);
            assert_eq!(reply.return_code, ReturnCode::InvalidRequest);
        }
        assert_eq!(site.available()["gpu"], 4.0);
    }

    #[test]
    fn cancel_is_idempotent() {
        let site = site();
        let token = site.check(&JobId::new("a"), &json!({"gpu": 4})).token.unwrap();

        assert_eq!(site.cancel(Some(&token)).return_code, ReturnCode::Ok);
        assert_eq!(site.available()["gpu"], 4.0);

        assert_eq!(site.cancel(Some(&token)).return_code, ReturnCode::Ok);
        assert_eq!(site.cancel(None).return_code, ReturnCode::Ok);
        assert_eq!(site.available()["gpu"], 4.0);
        assert_eq!(site.reservation_count(), 0);
    }

    #[test]
    fn handle_routes_by_topic() {
        let site = site();
        let check = Message::new(
            topics::CHECK_RESOURCE,
            &CheckResourceRequest {
                job_id: JobId::new("a"),
                resource_spec: json!({"gpu": 1}),
            },
        )
        .unwrap();
        let granted = site.handle(&check);
        assert!(granted.is_granted());

        let cancel = Message::new(
            topics::CANCEL_RESOURCE,
            &CancelResourceRequest {
                job_id: JobId::new("a"),
                resource_spec: json!({"gpu": 1}),
                token: granted.token,
            },
        )
        .unwrap();
        assert_eq!(site.handle(&cancel).return_code, ReturnCode::Ok);
        assert_eq!(site.reservation_count(), 0);

        let other = Message::new("eisenbahn.site.unknown", &"x").unwrap();
        assert_eq!(site.handle(&other).return_code, ReturnCode::InvalidRequest);
    }

    #[test]
    fn custom_topics() {
        let site = site().with_topics("custom.check", "custom.cancel");
        let check = Message::new(
            "custom.check",
            &CheckResourceRequest {
                job_id: JobId::new("a"),
                resource_spec: json!({"gpu": 1}),
            },
        )
        .unwrap();
        assert!(site.handle(&check).is_granted());
    }
}
