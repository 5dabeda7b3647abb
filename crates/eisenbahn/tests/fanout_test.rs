//! Integration tests for [`ZmqSiteRequester`] against real site sockets.

use std::collections::HashMap;
use std::time::Duration;

use fleet_core::JobId;
use fleet_eisenbahn::messages::{CheckResourceRequest, ResourceReply};
use fleet_eisenbahn::transport::Transport;
use fleet_eisenbahn::{
    topics, EisenbahnError, Message, RequestHandler, SiteRequester, ZmqRequestServer,
    ZmqSiteRequester,
};
use serde_json::json;

const SETTLE: Duration = Duration::from_millis(200);

/// Answer `count` check requests, granting with a site-specific token.
fn spawn_site(
    server: ZmqRequestServer,
    site: &'static str,
    count: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for _ in 0..count {
            let (token, msg) = server.recv_request().await.unwrap();
            let reply = msg.reply(&ResourceReply::granted(format!("{site}-tok"))).unwrap();
            server.send_reply(token, reply).await.unwrap();
        }
    })
}

fn request() -> Message {
    let body = CheckResourceRequest {
        job_id: JobId::new("job-fan"),
        resource_spec: json!({ "cpus": 1 }),
    };
    Message::new(topics::CHECK_RESOURCE, &body).unwrap()
}

#[tokio::test]
async fn fan_out_collects_one_entry_per_site() {
    let a = Transport::tcp("127.0.0.1", 16600);
    let b = Transport::tcp("127.0.0.1", 16601);

    let site_a = spawn_site(ZmqRequestServer::bind(&a).await.unwrap(), "a", 1);
    let site_b = spawn_site(ZmqRequestServer::bind(&b).await.unwrap(), "b", 1);
    tokio::time::sleep(SETTLE).await;

    let requester = ZmqSiteRequester::new(HashMap::from([
        ("a".to_string(), a),
        ("b".to_string(), b),
    ]));

    let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let responses = requester
        .send_to_sites(&targets, request(), Duration::from_secs(5))
        .await;

    assert_eq!(responses.len(), 3);
    for site in ["a", "b"] {
        let reply: ResourceReply = responses[site].as_ref().unwrap().decode().unwrap();
        assert_eq!(reply.token, Some(format!("{site}-tok")));
    }
    assert!(matches!(responses["c"], Err(EisenbahnError::UnknownSite(_))));

    site_a.await.unwrap();
    site_b.await.unwrap();
}

#[tokio::test]
async fn silent_site_times_out_without_blocking_others() {
    let fast = Transport::tcp("127.0.0.1", 16610);
    let silent = Transport::tcp("127.0.0.1", 16611);

    let fast_site = spawn_site(ZmqRequestServer::bind(&fast).await.unwrap(), "fast", 1);
    let _silent_site = ZmqRequestServer::bind(&silent).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let requester = ZmqSiteRequester::new(HashMap::from([
        ("fast".to_string(), fast),
        ("silent".to_string(), silent),
    ]));

    let targets = vec!["fast".to_string(), "silent".to_string()];
    let started = std::time::Instant::now();
    let responses = requester
        .send_to_sites(&targets, request(), Duration::from_millis(400))
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(responses["fast"].is_ok());
    assert!(matches!(responses["silent"], Err(EisenbahnError::Timeout(_))));

    fast_site.await.unwrap();
}

#[tokio::test]
async fn unreachable_site_does_not_stall_live_site() {
    // Nothing listens on the dead endpoint.
    let dead = Transport::tcp("127.0.0.1", 16620);
    let live = Transport::tcp("127.0.0.1", 16621);

    let rounds = 3;
    let live_site = spawn_site(ZmqRequestServer::bind(&live).await.unwrap(), "b", rounds);
    tokio::time::sleep(SETTLE).await;

    let requester = ZmqSiteRequester::new(HashMap::from([
        ("a_dead".to_string(), dead),
        ("b".to_string(), live),
    ]));

    let targets = vec!["a_dead".to_string(), "b".to_string()];
    let timeout = Duration::from_millis(500);
    for _ in 0..rounds {
        let responses = tokio::time::timeout(
            timeout * 4,
            requester.send_to_sites(&targets, request(), timeout),
        )
        .await
        .expect("fan-out round exceeded its bound");

        let reply: ResourceReply = responses["b"].as_ref().unwrap().decode().unwrap();
        assert_eq!(reply.token.as_deref(), Some("b-tok"));
        assert!(responses["a_dead"].is_err());
    }

    live_site.await.unwrap();
}
