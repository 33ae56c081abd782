//! Integration tests for armature-csrf

use armature_csrf::*;
use chrono::{DateTime, TimeZone, Utc};
use http::header::ORIGIN;
use http::{HeaderValue, Method};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const SECRET: &[u8] = b"integration_secret_32_bytes_long";

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn at(ts: i64) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Utc.timestamp_opt(ts, 0).unwrap())))
    }

    fn set(&self, ts: i64) {
        *self.0.lock().unwrap() = Utc.timestamp_opt(ts, 0).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

fn stateless_policy(clock: Arc<ManualClock>) -> StatelessSignedPolicy {
    StatelessSignedPolicy::new(
        SigningKeys::new(SECRET.to_vec()).unwrap(),
        Duration::from_secs(600),
    )
    .unwrap()
    .with_clock(clock)
}

fn all_policies() -> Vec<Arc<dyn TokenPolicy>> {
    vec![
        Arc::new(SessionBackedPolicy::default()),
        Arc::new(stateless_policy(ManualClock::at(1_700_000_000))),
        Arc::new(LegacyDelegatingPolicy::default()),
    ]
}

#[test]
fn test_issued_token_validates_for_every_policy() {
    let store = MemorySessionStore::new();
    for policy in all_policies() {
        let session = store.create();
        let token = policy.issue(Some(&session)).unwrap();
        assert_ok!(policy.validate(Some(&session), token.as_str()));
    }
}

#[test]
fn test_retrieval_is_idempotent_for_every_policy() {
    let store = MemorySessionStore::new();
    for policy in all_policies() {
        let session = store.create();
        let first = policy.retrieve_or_issue(Some(&session)).unwrap();
        for _ in 0..5 {
            assert_eq!(policy.retrieve_or_issue(Some(&session)).unwrap(), first);
        }
        assert_ok!(policy.validate(Some(&session), first.as_str()));
    }
}

#[test]
fn test_no_cross_session_acceptance() {
    let store = MemorySessionStore::new();
    for policy in all_policies() {
        let s1 = store.create();
        let s2 = store.create();
        let t1 = policy.issue(Some(&s1)).unwrap();
        policy.issue(Some(&s2)).unwrap();

        let err = policy.validate(Some(&s2), t1.as_str()).unwrap_err();
        assert!(
            matches!(err, CsrfError::TokenMismatch),
            "{} accepted a foreign token: {:?}",
            policy.name(),
            err
        );
    }
}

#[test]
fn test_single_byte_mutation_rejected() {
    let store = MemorySessionStore::new();
    for policy in all_policies() {
        let session = store.create();
        let token = policy.issue(Some(&session)).unwrap();
        let bytes = token.as_str().as_bytes();

        for i in 0..bytes.len() {
            let mut mutated = bytes.to_vec();
            mutated[i] = if mutated[i] == b'a' { b'b' } else { b'a' };
            let mutated = String::from_utf8(mutated).unwrap();

            let err = policy.validate(Some(&session), &mutated).unwrap_err();
            assert!(
                matches!(err, CsrfError::TokenMismatch),
                "{}: mutation at byte {} gave {:?}",
                policy.name(),
                i,
                err
            );
        }
    }
}

#[test]
fn test_stateless_age_boundary() {
    let store = MemorySessionStore::new();
    let session = store.create();
    let clock = ManualClock::at(1_700_000_000);
    let policy = stateless_policy(clock.clone());
    let token = policy.issue(Some(&session)).unwrap();

    clock.set(1_700_000_000 + 600 - 1);
    assert_ok!(policy.validate(Some(&session), token.as_str()));

    clock.set(1_700_000_000 + 600 + 1);
    assert!(matches!(
        policy.validate(Some(&session), token.as_str()),
        Err(CsrfError::TokenMismatch)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_converges() {
    for _ in 0..32 {
        let store = MemorySessionStore::new();
        let session: Arc<dyn SessionAdapter> = Arc::new(store.create());
        let policy: Arc<dyn TokenPolicy> = Arc::new(SessionBackedPolicy::default());
        let barrier = Arc::new(Barrier::new(2));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let session = Arc::clone(&session);
                let policy = Arc::clone(&policy);
                let barrier = Arc::clone(&barrier);
                tokio::task::spawn_blocking(move || {
                    barrier.wait();
                    policy.retrieve_or_issue(Some(&*session)).unwrap()
                })
            })
            .collect();

        let mut tokens = Vec::new();
        for task in tasks {
            tokens.push(task.await.unwrap());
        }

        assert_eq!(tokens[0], tokens[1]);
        assert_ok!(policy.validate(Some(&*session), tokens[0].as_str()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tabs_share_one_token() {
    let store = MemorySessionStore::new();
    let id = store.create().id().to_string();
    let selector = PolicySelector::from_config(&CsrfConfig::default()).unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            let id = id.clone();
            let policy = selector.active_policy();
            tokio::task::spawn_blocking(move || {
                let tab = store.session(&id).unwrap();
                policy.retrieve_or_issue(Some(&tab)).unwrap()
            })
        })
        .collect();

    let mut tokens = Vec::new();
    for task in tasks {
        tokens.push(task.await.unwrap());
    }
    assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn test_end_to_end_scenario() {
    let store = MemorySessionStore::new();
    let sess1 = store.create_with_id("sess-1");
    let sess2 = store.create_with_id("sess-2");

    let policy = SessionBackedPolicy::default()
        .with_generator(Arc::new(|| -> Result<Token> { Ok(Token::new("abc123")) }));
    let token = policy.issue(Some(&sess1)).unwrap();
    assert_eq!(token.as_str(), "abc123");

    let other = SessionBackedPolicy::default()
        .with_generator(Arc::new(|| -> Result<Token> { Ok(Token::new("zzz999")) }));
    other.issue(Some(&sess2)).unwrap();

    assert_ok!(policy.validate(Some(&sess1), "abc123"));
    assert!(matches!(
        policy.validate(Some(&sess1), "abc124"),
        Err(CsrfError::TokenMismatch)
    ));
    assert!(matches!(
        policy.validate(Some(&sess2), "abc123"),
        Err(CsrfError::TokenMismatch)
    ));

    let sess3 = store.session("sess-3");
    assert!(sess3.is_none());
    let sess3 = sess3.as_ref().map(|s| s as &dyn SessionAdapter);
    assert!(matches!(
        policy.validate(sess3, "abc123"),
        Err(CsrfError::MissingSession)
    ));
}

#[test]
fn test_never_issued_is_missing_token() {
    let store = MemorySessionStore::new();
    let session = store.create();
    let policy = SessionBackedPolicy::default();

    assert!(matches!(
        policy.validate(Some(&session), "abc123"),
        Err(CsrfError::MissingToken)
    ));
}

#[test]
fn test_session_destruction_invalidates_token() {
    let store = MemorySessionStore::new();
    let session = store.create();
    let policy = SessionBackedPolicy::default();
    let token = policy.issue(Some(&session)).unwrap();

    store.destroy(session.id());
    let err = policy.validate(Some(&session), token.as_str()).unwrap_err();
    assert!(matches!(err, CsrfError::MissingSession));
    assert!(err.is_rejection());
}

#[test]
fn test_guard_rejects_forged_post() {
    let guard = CsrfGuard::new(CsrfConfig::default()).unwrap();
    let store = MemorySessionStore::new();
    let session: Arc<dyn SessionAdapter> = Arc::new(store.create());
    guard.binding(Some(session.clone())).get_csrf_token().unwrap();

    let forged = CsrfRequest::new(Method::POST, "/transfer")
        .with_body("amount=100&csrf_token=guessed")
        .with_session(session.clone());
    let err = assert_err!(guard.require_valid_csrf(&forged));
    assert_eq!(err.status_code(), 403);

    let tokenless = CsrfRequest::new(Method::POST, "/transfer")
        .with_body("amount=100")
        .with_session(session);
    assert_err!(guard.require_valid_csrf(&tokenless));
}

#[test]
fn test_guard_with_stateless_policy_and_header() {
    let config = CsrfConfig::stateless(SECRET.to_vec()).unwrap();
    let guard = CsrfGuard::new(config).unwrap();
    let store = MemorySessionStore::new();
    let session: Arc<dyn SessionAdapter> = Arc::new(store.create());

    let token = guard.binding(Some(session.clone())).get_csrf_token().unwrap();
    let request = CsrfRequest::new(Method::DELETE, "/api/items/7")
        .with_header(
            http::HeaderName::from_static("x-csrf-token"),
            HeaderValue::from_str(token.as_str()).unwrap(),
        )
        .with_session(session);
    assert_ok!(guard.require_valid_csrf(&request));
}

#[test]
fn test_guard_origin_check_precedes_token() {
    let guard = CsrfGuard::new(CsrfConfig::default()).unwrap();
    let store = MemorySessionStore::new();
    let session: Arc<dyn SessionAdapter> = Arc::new(store.create());
    let token = guard.binding(Some(session.clone())).get_csrf_token().unwrap();

    let request = CsrfRequest::new(Method::POST, "/form")
        .with_scheme("https")
        .with_host("shop.example.com")
        .with_header(ORIGIN, HeaderValue::from_static("https://attacker.test"))
        .with_body(format!("csrf_token={}", token))
        .with_session(session.clone());
    assert!(matches!(
        guard.require_valid_csrf(&request),
        Err(CsrfError::BadOrigin(_))
    ));

    let same_site = CsrfRequest::new(Method::POST, "/form")
        .with_scheme("https")
        .with_host("shop.example.com")
        .with_header(ORIGIN, HeaderValue::from_static("https://shop.example.com"))
        .with_body(format!("csrf_token={}", token))
        .with_session(session);
    assert_ok!(guard.require_valid_csrf(&same_site));
}

#[test]
fn test_legacy_migration_path() {
    let store = MemorySessionStore::new();
    let session: Arc<dyn SessionAdapter> = Arc::new(store.create());
    session.write("_csrft_", "02821185e4c94269bdc38e6eeae0a2f8").unwrap();

    let guard = CsrfGuard::new(CsrfConfig::legacy("_csrft_")).unwrap();
    let token = guard.binding(Some(session.clone())).get_csrf_token().unwrap();
    assert_eq!(token.as_str(), "02821185e4c94269bdc38e6eeae0a2f8");

    let request = CsrfRequest::new(Method::POST, "/form")
        .with_body("csrf_token=02821185e4c94269bdc38e6eeae0a2f8")
        .with_session(session);
    assert_ok!(guard.require_valid_csrf(&request));
}

#[test]
fn test_applications_with_different_policies_coexist() {
    let store = MemorySessionStore::new();
    let session: Arc<dyn SessionAdapter> = Arc::new(store.create());

    let session_app = CsrfGuard::new(CsrfConfig::default()).unwrap();
    let stateless_app = CsrfGuard::new(CsrfConfig::stateless(SECRET.to_vec()).unwrap()).unwrap();

    let session_token = session_app
        .binding(Some(session.clone()))
        .get_csrf_token()
        .unwrap();
    let signed_token = stateless_app
        .binding(Some(session.clone()))
        .get_csrf_token()
        .unwrap();
    assert_ne!(session_token, signed_token);

    let policy = session_app.selector().policy();
    assert_ok!(policy.validate(Some(&*session), session_token.as_str()));
    assert_err!(policy.validate(Some(&*session), signed_token.as_str()));

    let policy = stateless_app.selector().policy();
    assert_ok!(policy.validate(Some(&*session), signed_token.as_str()));
    assert_err!(policy.validate(Some(&*session), session_token.as_str()));
}

#[test]
fn test_rotation_on_login() {
    let store = MemorySessionStore::new();
    let session: Arc<dyn SessionAdapter> = Arc::new(store.create());
    let guard = CsrfGuard::new(CsrfConfig::default()).unwrap();

    let anonymous = guard.binding(Some(session.clone())).get_csrf_token().unwrap();
    let rotated = guard.selector().rotate(Some(&*session)).unwrap();
    assert_ne!(anonymous, rotated);

    let stale = CsrfRequest::new(Method::POST, "/form")
        .with_body(format!("csrf_token={}", anonymous))
        .with_session(session.clone());
    assert!(matches!(
        guard.require_valid_csrf(&stale),
        Err(CsrfError::TokenMismatch)
    ));

    let fresh = guard.binding(Some(session)).get_csrf_token().unwrap();
    assert_eq!(fresh, rotated);
}

#[test]
fn test_empty_legacy_value_recovers() {
    let store = MemorySessionStore::new();
    let session = store.create();
    session.write("_csrft_", "").unwrap();
    let policy = LegacyDelegatingPolicy::default();

    let token = policy.retrieve_or_issue(Some(&session)).unwrap();
    assert!(!token.is_empty());
    assert_ok!(policy.validate(Some(&session), token.as_str()));
}
