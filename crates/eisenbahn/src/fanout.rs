//! Multi-site request fan-out over DEALER/ROUTER.
//!
//! [`ZmqSiteRequester`] keeps one [`ZmqRequestClient`] per site, connected
//! lazily on first use, and implements [`SiteRequester`] by sending the
//! request to every target concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::EisenbahnConfig;
use crate::error::EisenbahnError;
use crate::message::Message;
use crate::reqrep::ZmqRequestClient;
use crate::traits::{RequestSender, SiteRequester, SiteResponses};
use crate::transport::Transport;

pub struct ZmqSiteRequester {
    endpoints: HashMap<String, Transport>,
    clients: Mutex<HashMap<String, Arc<ZmqRequestClient>>>,
}

impl ZmqSiteRequester {
    pub fn new(endpoints: HashMap<String, Transport>) -> Self {
        Self {
            endpoints,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the `[sites.*]` section of the eisenbahn config.
    pub fn from_config(config: &EisenbahnConfig) -> Result<Self, EisenbahnError> {
        Ok(Self::new(config.site_transports()?))
    }

    /// Names of all sites with a configured endpoint.
    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    async fn client_for(
        &self,
        site: &str,
        timeout: Duration,
    ) -> Result<Arc<ZmqRequestClient>, EisenbahnError> {
        let transport = self
            .endpoints
            .get(site)
            .ok_or_else(|| EisenbahnError::UnknownSite(site.to_string()))?;

        if let Some(client) = self.clients.lock().await.get(site) {
            return Ok(Arc::clone(client));
        }

        // The map lock is not held across connect.
        let client = tokio::time::timeout(timeout, ZmqRequestClient::connect(transport))
            .await
            .map_err(|_| EisenbahnError::Timeout(timeout))??;

        let mut clients = self.clients.lock().await;
        let client = clients
            .entry(site.to_string())
            .or_insert_with(|| Arc::new(client));
        debug!(site = %site, endpoint = %transport, "connected site client");
        Ok(Arc::clone(client))
    }

    async fn request_site(
        &self,
        site: &str,
        msg: Message,
        timeout: Duration,
    ) -> Result<Message, EisenbahnError> {
        let client = self.client_for(site, timeout).await?;
        let result = client.request(msg, timeout).await;

        if let Err(EisenbahnError::Transport(reason)) = &result {
            // Broken connection; reconnect on the next round.
            warn!(site = %site, reason = %reason, "dropping site client");
            self.clients.lock().await.remove(site);
        }
        result
    }
}

#[async_trait]
impl SiteRequester for ZmqSiteRequester {
    async fn send_to_sites(
        &self,
        targets: &[String],
        request: Message,
        timeout: Duration,
    ) -> SiteResponses {
        let requests = targets.iter().enumerate().map(|(i, site)| {
            // Each site gets its own correlation id so replies never collide.
            let msg = if i == 0 { request.clone() } else { request.recorrelated() };
            async move {
                let result = self.request_site(site, msg, timeout).await;
                if let Err(e) = &result {
                    debug!(site = %site, error = %e, "site request failed");
                }
                (site.clone(), result)
            }
        });

        join_all(requests).await.into_iter().collect()
    }
}
