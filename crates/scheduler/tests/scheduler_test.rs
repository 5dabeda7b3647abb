mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{config, MockSites, SiteBehavior};
use fleet_core::{Job, JobId, TerminalState};
use fleet_eisenbahn::events::JobTerminated;
use fleet_eisenbahn::messages::ReturnCode;
use fleet_eisenbahn::topics;
use fleet_scheduler::{ScheduleOutcome, Scheduler, TerminalEventHandler};

fn scheduler(sites: &Arc<MockSites>, max_jobs: usize) -> Scheduler {
    Scheduler::builder(config(max_jobs))
        .requester(sites.clone())
        .build()
        .unwrap()
}

fn three_site_job(id: &str) -> Job {
    Job::new(id)
        .with_site("s1", json!({"gpu": 1}))
        .with_site("s2", json!({"gpu": 2}))
        .with_site("s3", json!({"gpu": 3}))
        .with_min_sites(2)
        .with_required_site("s1")
}

fn terminated(id: &str) -> JobTerminated {
    JobTerminated {
        job_id: JobId::new(id),
        state: TerminalState::Completed,
    }
}

#[tokio::test]
async fn admits_and_blocks_until_terminal_event() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .site("s2", SiteBehavior::Grant("t2"))
        .site("s3", SiteBehavior::Unreachable)
        .build();
    let scheduler = scheduler(&sites, 1);

    let outcome = scheduler.schedule_job(&[three_site_job("j1")]).await;
    let ScheduleOutcome::Admitted { job, dispatch } = &outcome else {
        panic!("expected j1 admitted, got {outcome:?}");
    };
    assert_eq!(job.id().as_str(), "j1");
    assert_eq!(dispatch.keys().collect::<Vec<_>>(), vec!["s1", "s2"]);
    assert_eq!(dispatch["s1"].token.as_deref(), Some("t1"));
    assert_eq!(dispatch["s1"].resource_requirements, json!({"gpu": 1}));
    assert_eq!(dispatch["s2"].token.as_deref(), Some("t2"));
    assert!(sites.cancels().is_empty());

    sites.clear();
    let blocked = scheduler.schedule_job(&[three_site_job("j2")]).await;
    assert_eq!(blocked, ScheduleOutcome::NoneAdmissible);
    assert!(sites.sent().is_empty(), "no site contacted at capacity");

    assert!(scheduler.handle_event(&terminated("j1")));
    let after = scheduler.schedule_job(&[three_site_job("j2")]).await;
    assert!(after.is_admitted());
}

#[tokio::test]
async fn server_is_never_negotiated() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .build();
    let scheduler = scheduler(&sites, 2);

    let job = Job::new("j1")
        .with_site("server", json!({"cpu": 1}))
        .with_site("s1", json!({"gpu": 1}))
        .with_min_sites(1);
    let outcome = scheduler.schedule_job(&[job]).await;

    let ScheduleOutcome::Admitted { dispatch, .. } = &outcome else {
        panic!("expected admission, got {outcome:?}");
    };
    assert!(!dispatch.contains_key("server"));
    assert!(sites.sent().iter().all(|s| s.site != "server"));
    assert_eq!(sites.checks().len(), 1);
}

#[tokio::test]
async fn quorum_failure_cancels_every_grant_with_its_token() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .site("s2", SiteBehavior::Deny)
        .site("s3", SiteBehavior::Fail(ReturnCode::ServiceUnavailable))
        .build();
    let scheduler = scheduler(&sites, 1);

    let job = three_site_job("j1").with_min_sites(3);
    let outcome = scheduler.schedule_job(&[job]).await;

    assert_eq!(outcome, ScheduleOutcome::NoneAdmissible);
    let cancels = sites.cancels();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].site, "s1");
    assert_eq!(cancels[0].token.as_deref(), Some("t1"));
    assert_eq!(cancels[0].job_id, JobId::new("j1"));
    assert_eq!(cancels[0].resource_spec, json!({"gpu": 1}));
    assert_eq!(scheduler.registry().count(), 0);
}

#[tokio::test]
async fn missing_required_site_rolls_back() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Deny)
        .site("s2", SiteBehavior::Grant("t2"))
        .site("s3", SiteBehavior::Grant("t3"))
        .build();
    let scheduler = scheduler(&sites, 1);

    let outcome = scheduler.schedule_job(&[three_site_job("j1")]).await;

    assert_eq!(outcome, ScheduleOutcome::NoneAdmissible);
    let mut cancelled: Vec<(String, Option<String>)> = sites
        .cancels()
        .into_iter()
        .map(|s| (s.site, s.token))
        .collect();
    cancelled.sort();
    assert_eq!(
        cancelled,
        vec![
            ("s2".to_string(), Some("t2".to_string())),
            ("s3".to_string(), Some("t3".to_string())),
        ]
    );
    assert_eq!(scheduler.metrics().rejections["required_sites_missing"], 1);
}

#[tokio::test]
async fn required_server_site_is_never_satisfied() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .build();
    let scheduler = scheduler(&sites, 1);

    let job = Job::new("j1")
        .with_site("server", json!({}))
        .with_site("s1", json!({"gpu": 1}))
        .with_min_sites(1)
        .with_required_site("server");
    let outcome = scheduler.schedule_job(&[job]).await;

    assert_eq!(outcome, ScheduleOutcome::NoneAdmissible);
    assert_eq!(sites.cancels().len(), 1);
}

#[tokio::test]
async fn dispatch_plan_holds_only_granting_sites() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .site("s2", SiteBehavior::Silent)
        .site("s3", SiteBehavior::Grant("t3"))
        .build();
    let scheduler = scheduler(&sites, 1);

    let outcome = scheduler.schedule_job(&[three_site_job("j1")]).await;

    let ScheduleOutcome::Admitted { dispatch, .. } = &outcome else {
        panic!("expected admission, got {outcome:?}");
    };
    assert_eq!(dispatch.keys().collect::<Vec<_>>(), vec!["s1", "s3"]);
    assert_eq!(dispatch["s3"].resource_requirements, json!({"gpu": 3}));
}

#[tokio::test]
async fn rejected_candidate_released_before_next_is_checked() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .site("s2", SiteBehavior::Grant("t2"))
        .build();
    let scheduler = scheduler(&sites, 1);

    // Needs s9, which does not exist.
    let a = Job::new("a")
        .with_site("s1", json!({"gpu": 1}))
        .with_site("s9", json!({"gpu": 1}))
        .with_min_sites(2);
    let b = Job::new("b")
        .with_site("s2", json!({"gpu": 1}))
        .with_min_sites(1);

    let outcome = scheduler.schedule_job(&[a, b]).await;

    let ScheduleOutcome::Admitted { job, .. } = &outcome else {
        panic!("expected b admitted, got {outcome:?}");
    };
    assert_eq!(job.id().as_str(), "b");

    let log: Vec<(String, String, String)> = sites
        .sent()
        .into_iter()
        .map(|s| (s.topic, s.job_id.to_string(), s.site))
        .collect();
    let cancel_a = log
        .iter()
        .position(|(topic, job, site)| {
            topic == topics::CANCEL_RESOURCE && job == "a" && site == "s1"
        })
        .expect("a's grant at s1 is cancelled");
    let check_b = log
        .iter()
        .position(|(topic, job, _)| topic == topics::CHECK_RESOURCE && job == "b")
        .expect("b is checked");
    assert!(cancel_a < check_b, "log: {log:?}");
}

#[tokio::test]
async fn single_site_job() {
    let sites = MockSites::new()
        .site("only", SiteBehavior::Grant("t"))
        .build();
    let scheduler = scheduler(&sites, 1);

    let job = Job::new("solo").with_site("only", json!({"cpu": 8}));
    let outcome = scheduler.schedule_job(&[job]).await;

    let ScheduleOutcome::Admitted { dispatch, .. } = &outcome else {
        panic!("expected admission, got {outcome:?}");
    };
    assert_eq!(dispatch.len(), 1);
    let checks = sites.checks();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].resource_spec, json!({"cpu": 8}));
}

#[tokio::test]
async fn job_without_sites_is_rejected_without_traffic() {
    let sites = MockSites::new().build();
    let scheduler = scheduler(&sites, 1);

    let job = Job::new("local").with_site("server", json!({})).with_min_sites(0);
    let outcome = scheduler.schedule_job(&[job]).await;

    assert_eq!(outcome, ScheduleOutcome::NoneAdmissible);
    assert!(sites.sent().is_empty());
    assert_eq!(scheduler.metrics().rejections["no_results"], 1);
}

#[tokio::test]
async fn concurrent_calls_are_single_flight() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .delay(Duration::from_millis(50))
        .build();
    let scheduler = scheduler(&sites, 1);
    let j1 = [Job::new("j1").with_site("s1", json!({"gpu": 1}))];
    let j2 = [Job::new("j2").with_site("s1", json!({"gpu": 1}))];

    let (first, second) = tokio::join!(scheduler.schedule_job(&j1), scheduler.schedule_job(&j2));

    let admitted = [&first, &second]
        .iter()
        .filter(|outcome| outcome.is_admitted())
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(sites.checks().len(), 1, "second call saw a full registry");
    assert_eq!(scheduler.registry().count(), 1);
    assert_eq!(scheduler.metrics().capacity_skips, 1);
}

#[tokio::test]
async fn slow_site_counts_as_failed() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .delay(Duration::from_millis(300))
        .build();
    let mut cfg = config(1);
    cfg.client_req_timeout_secs = 0.05;
    let scheduler = Scheduler::builder(cfg)
        .requester(sites.clone())
        .build()
        .unwrap();

    let job = Job::new("j1")
        .with_site("s1", json!({"gpu": 1}))
        .with_min_sites(1);
    let outcome = scheduler.schedule_job(&[job]).await;

    assert_eq!(outcome, ScheduleOutcome::NoneAdmissible);
    assert_eq!(sites.checks().len(), 1);
    // Nothing was granted, so there is nothing to cancel.
    assert!(sites.cancels().is_empty());
    assert_eq!(scheduler.metrics().rejections["quorum_not_met"], 1);
}

#[tokio::test]
async fn metrics_follow_the_rounds() {
    let sites = MockSites::new()
        .site("s1", SiteBehavior::Grant("t1"))
        .site("s2", SiteBehavior::Deny)
        .build();
    let scheduler = scheduler(&sites, 1);

    let denied = Job::new("denied")
        .with_site("s1", json!({"gpu": 1}))
        .with_site("s2", json!({"gpu": 1}))
        .with_min_sites(2);
    let invalid = Job::new("invalid")
        .with_site("s1", json!({"gpu": 1}))
        .with_required_site("s7");
    let good = Job::new("good").with_site("s1", json!({"gpu": 1}));

    scheduler.schedule_job(&[denied, invalid, good]).await;
    scheduler.schedule_job(&[Job::new("late").with_site("s1", json!({}))]).await;
    scheduler.handle_event(&terminated("good"));

    let metrics = scheduler.metrics();
    assert_eq!(metrics.scheduling_rounds, 2);
    assert_eq!(metrics.capacity_skips, 1);
    assert_eq!(metrics.candidates_tried, 2);
    assert_eq!(metrics.jobs_admitted, 1);
    assert_eq!(metrics.rejections["quorum_not_met"], 1);
    assert_eq!(metrics.rejections["invalid_job"], 1);
    assert_eq!(metrics.rollbacks_sent, 1);
    assert_eq!(metrics.rollback_failures, 0);
    assert_eq!(metrics.jobs_released, 1);
    assert!(metrics.last_admission.is_some());
}
