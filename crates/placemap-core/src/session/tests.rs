use crate::{
    credential::{Credential, MemoryCredentialStore},
    error::Error,
    mock::{MockTransport, Reply},
    session::{SessionConfig, SessionCoordinator},
    transport::Request,
};
use core::time::Duration;
use futures::future::join_all;

const REFRESH: &str = "/web/reissue";
const DATA: &str = "/web/auth/me";

fn coordinator(transport: &MockTransport, token: Option<&str>) -> SessionCoordinator<MockTransport> {
    let store = match token {
        Some(token) => MemoryCredentialStore::with_credential(Credential::new(token)),
        None => MemoryCredentialStore::new(),
    };
    SessionCoordinator::new(transport.clone(), store, SessionConfig::default())
}

/// Data endpoint accepts only `fresh`; refresh hands out `fresh` after
/// `refresh_ms`.
fn expiring_session(refresh_ms: u64) -> MockTransport {
    MockTransport::new(move |request, credential| {
        if request.endpoint == REFRESH {
            return Reply::token("fresh").after(refresh_ms);
        }
        match credential.map(Credential::as_str) {
            Some("fresh") => Reply::data(serde_json::json!({ "name": "kim" })).after(1),
            _ => Reply::status(401).after(1),
        }
    })
}

#[tokio::test(start_paused = true)]
async fn success_passes_through_with_credential_attached() {
    let transport = expiring_session(10);
    let session = coordinator(&transport, Some("fresh"));

    let response = session.call(Request::get(DATA)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(transport.calls_to(REFRESH), 0);
    assert_eq!(transport.calls()[0].credential.as_deref(), Some("fresh"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    const REQUESTS: usize = 16;
    let transport = expiring_session(50);
    let session = coordinator(&transport, Some("stale"));

    let results = join_all((0..REQUESTS).map(|_| session.call(Request::get(DATA)))).await;

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(transport.calls_to(REFRESH), 1);
    // Every request went out twice: once stale, once replayed.
    assert_eq!(transport.calls_to(DATA), REQUESTS * 2);
    let replays = transport
        .calls()
        .into_iter()
        .filter(|call| call.endpoint == DATA && call.credential.as_deref() == Some("fresh"))
        .count();
    assert_eq!(replays, REQUESTS);
    assert!(!session.is_refreshing());
    assert_eq!(session.waiting(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_request_during_refresh_is_queued_and_replayed() {
    let transport = expiring_session(100);
    let session = coordinator(&transport, Some("stale"));

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.call(Request::get(DATA)).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.call(Request::get(DATA)).await }
    });

    // R1 has triggered the refresh, R2 has hit its own 401 and is parked.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(session.is_refreshing());
    assert_eq!(session.waiting(), 1);

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(transport.calls_to(REFRESH), 1);
    assert_eq!(session.credential(), Some(Credential::new("fresh")));
}

#[tokio::test(start_paused = true)]
async fn unauthorized_replay_is_not_retried_again() {
    let transport = MockTransport::new(|request, _| {
        if request.endpoint == REFRESH {
            Reply::token("fresh")
        } else {
            Reply::status(401)
        }
    });
    let session = coordinator(&transport, Some("stale"));

    let err = session.call(Request::get(DATA)).await.unwrap_err();

    assert_eq!(
        err,
        Error::Unauthorized {
            endpoint: DATA.into()
        }
    );
    assert_eq!(transport.calls_to(REFRESH), 1);
    assert_eq!(transport.calls_to(DATA), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_rejects_every_waiter_and_returns_to_idle() {
    let transport = MockTransport::new(|request, credential| {
        if request.endpoint == REFRESH {
            return Reply::status(500).after(30);
        }
        match credential {
            Some(_) => Reply::data(serde_json::json!([])),
            None => Reply::status(401).after(1),
        }
    });
    let session = coordinator(&transport, None);

    let results = join_all((0..4).map(|_| session.call(Request::get(DATA)))).await;

    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert!(err.is_refresh_failure(), "{err:?}");
    }
    assert_eq!(transport.calls_to(REFRESH), 1);
    assert!(!session.is_refreshing());
    assert_eq!(session.waiting(), 0);
    assert!(session.credential().is_none());

    // A later request gets to try a fresh refresh.
    let err = session.call(Request::get(DATA)).await.unwrap_err();
    assert!(err.is_refresh_failure());
    assert_eq!(transport.calls_to(REFRESH), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_clears_credential_and_a_later_one_recovers() {
    let attempts = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let transport = MockTransport::new({
        let attempts = attempts.clone();
        move |request, credential| {
            if request.endpoint == REFRESH {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                return if n == 0 {
                    Reply::status(401)
                } else {
                    Reply::token("fresh")
                };
            }
            match credential.map(Credential::as_str) {
                Some("fresh") => Reply::data(serde_json::json!({})),
                _ => Reply::status(401),
            }
        }
    });
    let session = coordinator(&transport, Some("stale"));

    assert!(session.call(Request::get(DATA)).await.unwrap_err().is_refresh_failure());
    assert!(session.credential().is_none());

    assert!(session.call(Request::get(DATA)).await.is_ok());
    assert_eq!(session.credential(), Some(Credential::new("fresh")));
}

#[tokio::test(start_paused = true)]
async fn refresh_endpoint_never_triggers_refresh() {
    let transport = MockTransport::new(|_, _| Reply::status(401));
    let session = coordinator(&transport, Some("stale"));

    let err = session.call(Request::post(REFRESH)).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(transport.calls().len(), 1);
    assert!(!session.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn refresh_timeout_counts_as_refresh_failure() {
    let transport = MockTransport::new(|request, _| {
        if request.endpoint == REFRESH {
            Reply::token("late").after(60_000)
        } else {
            Reply::status(401)
        }
    });
    let store = MemoryCredentialStore::with_credential(Credential::new("stale"));
    let config = SessionConfig {
        refresh_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    };
    let session = SessionCoordinator::new(transport.clone(), store, config);

    let err = session.call(Request::get(DATA)).await.unwrap_err();

    match err {
        Error::RefreshFailed { reason } => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!session.is_refreshing());
    assert!(session.credential().is_none());
}

#[tokio::test(start_paused = true)]
async fn malformed_refresh_body_is_refresh_failure() {
    let transport = MockTransport::new(|request, _| {
        if request.endpoint == REFRESH {
            Reply::data(serde_json::json!({ "token": "wrong-field" }))
        } else {
            Reply::status(401)
        }
    });
    let session = coordinator(&transport, Some("stale"));

    assert!(session.call(Request::get(DATA)).await.unwrap_err().is_refresh_failure());
}

#[tokio::test(start_paused = true)]
async fn other_statuses_propagate_without_refresh() {
    let transport = MockTransport::new(|_, _| Reply::status(503));
    let session = coordinator(&transport, Some("fresh"));

    let err = session.call(Request::get(DATA)).await.unwrap_err();

    assert_eq!(
        err,
        Error::Status {
            endpoint: DATA.into(),
            status: 503
        }
    );
    assert_eq!(transport.calls_to(REFRESH), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_propagate_unchanged() {
    let transport = MockTransport::new(|_, _| Reply::fail("connection refused"));
    let session = coordinator(&transport, Some("fresh"));

    let err = session.call(Request::get(DATA)).await.unwrap_err();

    assert_eq!(
        err,
        Error::Transport {
            context: "connection refused".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn explicit_refreshes_join_the_same_flight() {
    let transport = expiring_session(40);
    let session = coordinator(&transport, None);

    let (a, b, c) = tokio::join!(session.refresh(), session.refresh(), session.refresh());

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(transport.calls_to(REFRESH), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_trigger_does_not_strand_the_queue() {
    let transport = expiring_session(100);
    let session = coordinator(&transport, Some("stale"));

    // The triggering caller gives up long before the refresh finishes.
    let trigger = tokio::time::timeout(Duration::from_millis(20), session.call(Request::get(DATA)));
    let follower = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.call(Request::get(DATA)).await
    };
    let (trigger, follower) = tokio::join!(trigger, follower);

    assert!(trigger.is_err());
    assert!(follower.is_ok());
    assert_eq!(transport.calls_to(REFRESH), 1);
    assert!(!session.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn late_unauthorized_after_renewal_replays_without_refreshing() {
    const SLOW: &str = "/web/slow";
    let transport = MockTransport::new(|request, credential| {
        if request.endpoint == REFRESH {
            return Reply::token("fresh").after(10);
        }
        let delay = if request.endpoint == SLOW { 50 } else { 1 };
        match credential.map(Credential::as_str) {
            Some("fresh") => Reply::data(serde_json::json!({})).after(delay),
            _ => Reply::status(401).after(delay),
        }
    });
    let session = coordinator(&transport, Some("stale"));

    // The slow request's 401 lands well after the fast one's refresh settled.
    let (slow, fast) = tokio::join!(
        session.call(Request::get(SLOW)),
        session.call(Request::get(DATA)),
    );

    assert!(slow.is_ok(), "{slow:?}");
    assert!(fast.is_ok(), "{fast:?}");
    assert_eq!(transport.calls_to(REFRESH), 1);
    let slow_calls: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|call| call.endpoint == SLOW)
        .map(|call| call.credential)
        .collect();
    assert_eq!(
        slow_calls,
        vec![Some("stale".to_string()), Some("fresh".to_string())]
    );
}
