mod auth_support;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use langchef_auth::auth::{
    AddressBinding, AuthController, AuthError, AuthFailure, AuthStatus, TokenPoll,
};
use langchef_auth::config::AuthConfig;
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_stream::StreamExt;

use auth_support::{
    grant, harness, session, wait_for_status, FixedAddress, InMemorySessionStore,
    ScriptedIdentityProvider,
};

const HOME: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
const CAFE: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 20));

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

async fn signed_in() -> auth_support::Harness {
    let h = harness();
    h.store.seed_session(session("T1", minutes(60)));
    assert_eq!(h.controller.init().await, AuthStatus::Authenticated);
    h
}

fn bound_controller(
    address: Option<IpAddr>,
) -> (AuthController, Arc<ScriptedIdentityProvider>, Arc<InMemorySessionStore>) {
    let idp = Arc::new(ScriptedIdentityProvider::new());
    let store = Arc::new(InMemorySessionStore::new());
    let config = AuthConfig::default().with_address_binding(AddressBinding::Enforce);
    let controller = AuthController::builder(config, idp.clone(), store.clone())
        .with_address_source(Arc::new(FixedAddress(address)))
        .build();
    (controller, idp, store)
}

// ----------------------------------------------------------------------
// Refresh
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_issue_one_request() {
    let h = signed_in().await;
    h.idp.set_refresh_delay(Duration::from_secs(5));

    let (first, second) = tokio::join!(
        h.controller.refresh_session(false),
        h.controller.refresh_session(false)
    );

    assert!(first);
    assert!(!second);
    assert_eq!(h.idp.refresh_count(), 1);
    assert_eq!(h.controller.access_token(), Some("refreshed-1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn concurrent_unauthorized_recoveries_share_one_refresh() {
    let h = signed_in().await;
    h.idp.set_refresh_delay(Duration::from_secs(5));

    let results = futures::future::join_all(
        (0..5).map(|_| h.controller.recover_unauthorized("T1")),
    )
    .await;

    assert_eq!(h.idp.refresh_count(), 1);
    assert!(results
        .iter()
        .all(|token| token.as_deref() == Some("refreshed-1")));
}

#[tokio::test(start_paused = true)]
async fn recovery_returns_newer_token_without_refreshing() {
    let h = signed_in().await;

    let token = h.controller.recover_unauthorized("T0").await;

    assert_eq!(token, Some("T1".to_string()));
    assert_eq!(h.idp.refresh_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_keeps_refresh_token_when_not_rotated() {
    let h = signed_in().await;

    assert!(h.controller.refresh_session(false).await);

    let stored = h.store.session().unwrap();
    assert_eq!(stored.access_token, "refreshed-1");
    assert_eq!(stored.refresh_token.as_deref(), Some("T1-refresh"));
    assert!(stored.last_refresh.is_some());
    assert_eq!(
        h.idp.refresh_tokens_seen(),
        vec![Some("T1-refresh".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn silent_refresh_retries_with_fixed_delay() {
    let h = signed_in().await;
    h.idp
        .push_refresh(Err(AuthError::Network("connection reset".to_string())));
    h.idp
        .push_refresh(Err(AuthError::Network("connection reset".to_string())));

    let start = Instant::now();
    assert!(h.controller.refresh_session(true).await);

    assert_eq!(h.idp.refresh_count(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(120));
    assert_eq!(h.controller.access_token(), Some("refreshed-3".to_string()));
}

#[tokio::test(start_paused = true)]
async fn silent_refresh_waits_for_retry_after() {
    let h = signed_in().await;
    h.idp.push_refresh(Err(AuthError::RateLimited {
        retry_after_ms: Some(90_000),
    }));
    h.idp.push_refresh(Err(AuthError::RateLimited {
        retry_after_ms: Some(1_000),
    }));

    let start = Instant::now();
    assert!(h.controller.refresh_session(true).await);

    assert_eq!(h.idp.refresh_count(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(150));
}

#[tokio::test(start_paused = true)]
async fn exhausted_silent_refresh_keeps_session() {
    let h = signed_in().await;
    for _ in 0..3 {
        h.idp
            .push_refresh(Err(AuthError::Network("timeout".to_string())));
    }

    assert!(!h.controller.refresh_session(true).await);

    assert_eq!(h.idp.refresh_count(), 3);
    assert_eq!(h.controller.status(), AuthStatus::Authenticated);
    assert_eq!(h.controller.access_token(), Some("T1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn failed_explicit_refresh_signs_out() {
    let h = signed_in().await;
    h.idp
        .push_refresh(Err(AuthError::Network("timeout".to_string())));

    assert!(!h.controller.refresh_session(false).await);

    assert_eq!(h.idp.refresh_count(), 1);
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.status, AuthStatus::Idle);
    assert_eq!(snapshot.error, Some(AuthFailure::RefreshFailed));
    assert!(h.store.session().is_none());
    assert!(!h.controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn rejected_grant_is_terminal_even_when_silent() {
    let h = signed_in().await;
    h.idp.push_refresh(Err(AuthError::ExpiredOrInvalidGrant));

    assert!(!h.controller.refresh_session(true).await);

    assert_eq!(h.idp.refresh_count(), 1);
    assert_eq!(h.controller.snapshot().error, Some(AuthFailure::RefreshFailed));
    assert!(h.store.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_recovery_signs_out() {
    let h = signed_in().await;
    h.idp.push_refresh(Err(AuthError::ExpiredOrInvalidGrant));

    assert_eq!(h.controller.recover_unauthorized("T1").await, None);

    assert_eq!(h.controller.status(), AuthStatus::Idle);
    assert_eq!(h.controller.access_token(), None);
}

#[tokio::test(start_paused = true)]
async fn session_is_refreshed_ahead_of_expiry() {
    let h = signed_in().await;

    tokio::time::sleep(Duration::from_secs(29 * 60)).await;
    assert_eq!(h.idp.refresh_count(), 0);

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert_eq!(h.idp.refresh_count(), 1);
    assert_eq!(h.controller.access_token(), Some("refreshed-1".to_string()));
    assert_eq!(
        h.store.session().map(|s| s.access_token),
        Some("refreshed-1".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_without_session_does_nothing() {
    let h = harness();

    assert!(!h.controller.refresh_session(false).await);
    assert_eq!(h.controller.recover_unauthorized("T1").await, None);
    assert_eq!(h.idp.refresh_count(), 0);
}

// ----------------------------------------------------------------------
// Expiry, restore, binding
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn expired_session_is_never_authenticated() {
    let h = harness();
    h.store.seed_session(session("T1", minutes(-1)));

    assert_eq!(h.controller.init().await, AuthStatus::Idle);

    assert!(!h.controller.is_authenticated());
    assert_eq!(h.controller.access_token(), None);
    assert!(h.controller.session().is_none());
    assert!(h.store.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn zero_lifetime_grant_is_not_authenticated() {
    let h = harness();
    h.idp.set_credential_grant(grant("T-zero", Some(0)));

    let err = h.controller.login_with_server_credentials().await.unwrap_err();

    assert!(matches!(err, AuthError::ExpiredOrInvalidGrant));
    assert!(!h.controller.is_authenticated());
    assert_ne!(h.controller.status(), AuthStatus::Authenticated);
    assert_eq!(h.controller.snapshot().error, Some(AuthFailure::SessionLapsed));
    assert_eq!(h.controller.access_token(), None);
    assert!(h.store.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn refresh_returning_expired_token_signs_out() {
    let h = signed_in().await;
    h.idp.push_refresh(Ok(grant("T-stale", Some(0))));

    assert!(!h.controller.refresh_session(true).await);

    assert_eq!(h.controller.status(), AuthStatus::Idle);
    assert_eq!(h.controller.snapshot().error, Some(AuthFailure::SessionLapsed));
    assert!(h.store.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn bound_session_from_another_address_is_discarded() {
    let (controller, _idp, store) = bound_controller(Some(CAFE));
    let mut stored = session("T1", minutes(60));
    stored.bound_address = Some(HOME);
    store.seed_session(stored);

    assert_eq!(controller.init().await, AuthStatus::Idle);
    assert!(store.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn bound_session_is_discarded_when_address_is_unknown() {
    let (controller, _idp, store) = bound_controller(None);
    let mut stored = session("T1", minutes(60));
    stored.bound_address = Some(HOME);
    store.seed_session(stored);

    assert_eq!(controller.init().await, AuthStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn bound_session_from_same_address_is_restored() {
    let (controller, _idp, store) = bound_controller(Some(HOME));
    let mut stored = session("T1", minutes(60));
    stored.bound_address = Some(HOME);
    store.seed_session(stored);

    assert_eq!(controller.init().await, AuthStatus::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn new_sessions_record_the_current_address() {
    let (controller, idp, store) = bound_controller(Some(HOME));
    idp.push_poll(Ok(TokenPoll::Authorized(grant("T1", Some(3600)))));

    controller.login().await.unwrap();
    wait_for_status(&controller, AuthStatus::Authenticated).await;

    assert_eq!(store.session().unwrap().bound_address, Some(HOME));
}

// ----------------------------------------------------------------------
// Logout, shutdown, profile
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn logout_clears_state_when_revocation_fails() {
    let h = signed_in().await;
    h.idp.fail_revoke();

    h.controller.logout().await;

    assert_eq!(h.idp.revocations(), vec!["T1".to_string()]);
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.status, AuthStatus::Idle);
    assert_eq!(snapshot.error, None);
    assert!(h.store.session().is_none());
    assert!(!h.controller.is_authenticated());

    tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;
    assert_eq!(h.idp.refresh_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn logout_during_login_stops_polling() {
    let h = harness();
    h.controller.login().await.unwrap();

    h.controller.logout().await;

    assert_eq!(h.controller.status(), AuthStatus::Idle);
    assert!(h.store.device().is_none());
    assert!(h.idp.revocations().is_empty());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.idp.poll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_timers_and_keeps_store() {
    let h = signed_in().await;

    h.controller.shutdown();
    tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;

    assert_eq!(h.idp.refresh_count(), 0);
    assert_eq!(h.store.session().map(|s| s.access_token), Some("T1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn reload_profile_recovers_from_unauthorized() {
    let h = signed_in().await;
    h.idp.reject_token("T1");

    let profile = h.controller.reload_profile().await.unwrap();

    assert_eq!(profile.full_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(h.idp.refresh_count(), 1);
    assert_eq!(h.idp.profile_count(), 2);
    assert_eq!(
        h.store.session().unwrap().user.full_name.as_deref(),
        Some("Ada Lovelace")
    );
}

#[tokio::test(start_paused = true)]
async fn reload_profile_requires_a_session() {
    let h = harness();
    assert!(matches!(
        h.controller.reload_profile().await,
        Err(AuthError::NotLoggedIn)
    ));
}

#[tokio::test(start_paused = true)]
async fn server_credential_login_uses_default_lifetime() {
    let h = harness();
    h.idp.set_credential_grant(grant("T-aws", None));

    let user = h.controller.login_with_server_credentials().await.unwrap();

    assert_eq!(user.username, "ada");
    assert_eq!(h.controller.status(), AuthStatus::Authenticated);
    let session = h.controller.session().unwrap();
    let ttl = session.expires_at - session.issued_at;
    assert_eq!(ttl, chrono::Duration::hours(24));
}

#[tokio::test(start_paused = true)]
async fn rejected_server_credentials_report_access_denied() {
    let h = harness();

    let err = h.controller.login_with_server_credentials().await.unwrap_err();

    assert!(matches!(err, AuthError::AccessDenied));
    assert_eq!(h.controller.snapshot().error, Some(AuthFailure::AccessDenied));
}

#[tokio::test(start_paused = true)]
async fn events_stream_reports_transitions() {
    let h = harness();
    let mut events = h.controller.events();

    let first = events.next().await.unwrap();
    assert_eq!(first.status, AuthStatus::Idle);

    h.idp.set_credential_grant(grant("T1", Some(3600)));
    h.controller.login_with_server_credentials().await.unwrap();

    let next = events.next().await.unwrap();
    assert_eq!(next.status, AuthStatus::Authenticated);
}
