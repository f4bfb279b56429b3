#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use langchef_auth::auth::{
    AddressSource, AuthController, AuthError, AuthSnapshot, AuthStatus, ClientRegistration,
    DeviceAuthorization, DeviceAuthorizationState, IdentityProvider, Session, SessionStore,
    TokenGrant, TokenPoll, UserProfile, VerificationOpener,
};
use langchef_auth::config::AuthConfig;
use tokio::time::Instant;

// ----------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<Session>>,
    device: Mutex<Option<DeviceAuthorizationState>>,
    saved_intervals: Mutex<Vec<u64>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_session(&self, session: Session) {
        *self.session.lock().expect("store lock poisoned") = Some(session);
    }

    pub fn seed_device(&self, state: DeviceAuthorizationState) {
        *self.device.lock().expect("store lock poisoned") = Some(state);
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().expect("store lock poisoned").clone()
    }

    pub fn device(&self) -> Option<DeviceAuthorizationState> {
        self.device.lock().expect("store lock poisoned").clone()
    }

    /// Interval of every persisted device state, in save order.
    pub fn saved_intervals(&self) -> Vec<u64> {
        self.saved_intervals
            .lock()
            .expect("store lock poisoned")
            .clone()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.session())
    }

    fn save_session(&self, session: &Session) -> Result<(), AuthError> {
        self.seed_session(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> Result<(), AuthError> {
        self.session.lock().expect("store lock poisoned").take();
        Ok(())
    }

    fn load_device_authorization(&self) -> Result<Option<DeviceAuthorizationState>, AuthError> {
        Ok(self.device())
    }

    fn save_device_authorization(
        &self,
        state: &DeviceAuthorizationState,
    ) -> Result<(), AuthError> {
        self.saved_intervals
            .lock()
            .expect("store lock poisoned")
            .push(state.interval_ms);
        self.seed_device(state.clone());
        Ok(())
    }

    fn clear_device_authorization(&self) -> Result<(), AuthError> {
        self.device.lock().expect("store lock poisoned").take();
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Identity provider
// ----------------------------------------------------------------------

/// Identity provider that replays scripted responses.
///
/// Polls fall back to `Pending` once the poll script is exhausted; refreshes
/// fall back to minting `refreshed-N` tokens.
pub struct ScriptedIdentityProvider {
    pub interval_secs: u64,
    pub expires_in_secs: u64,
    polls: Mutex<VecDeque<Result<TokenPoll, AuthError>>>,
    poll_times: Mutex<Vec<Instant>>,
    refreshes: Mutex<VecDeque<Result<TokenGrant, AuthError>>>,
    refresh_delay: Mutex<Duration>,
    refresh_tokens_seen: Mutex<Vec<Option<String>>>,
    revoke_fails: Mutex<bool>,
    register_fails: Mutex<bool>,
    unauthorized_tokens: Mutex<Vec<String>>,
    credential_grant: Mutex<Option<TokenGrant>>,
    registers: AtomicUsize,
    authorizations: AtomicUsize,
    refresh_calls: AtomicUsize,
    revocations: Mutex<Vec<String>>,
    profile_calls: AtomicUsize,
}

impl ScriptedIdentityProvider {
    pub fn new() -> Self {
        Self::with_timing(5, 900)
    }

    pub fn with_timing(interval_secs: u64, expires_in_secs: u64) -> Self {
        Self {
            interval_secs,
            expires_in_secs,
            polls: Mutex::new(VecDeque::new()),
            poll_times: Mutex::new(Vec::new()),
            refreshes: Mutex::new(VecDeque::new()),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            revoke_fails: Mutex::new(false),
            register_fails: Mutex::new(false),
            unauthorized_tokens: Mutex::new(Vec::new()),
            credential_grant: Mutex::new(None),
            registers: AtomicUsize::new(0),
            authorizations: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            revocations: Mutex::new(Vec::new()),
            profile_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_poll(&self, poll: Result<TokenPoll, AuthError>) {
        self.polls.lock().expect("lock").push_back(poll);
    }

    pub fn push_polls(&self, polls: impl IntoIterator<Item = Result<TokenPoll, AuthError>>) {
        self.polls.lock().expect("lock").extend(polls);
    }

    pub fn push_refresh(&self, result: Result<TokenGrant, AuthError>) {
        self.refreshes.lock().expect("lock").push_back(result);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().expect("lock") = delay;
    }

    pub fn fail_revoke(&self) {
        *self.revoke_fails.lock().expect("lock") = true;
    }

    pub fn fail_register(&self) {
        *self.register_fails.lock().expect("lock") = true;
    }

    pub fn reject_token(&self, access_token: &str) {
        self.unauthorized_tokens
            .lock()
            .expect("lock")
            .push(access_token.to_string());
    }

    pub fn set_credential_grant(&self, grant: TokenGrant) {
        *self.credential_grant.lock().expect("lock") = Some(grant);
    }

    pub fn poll_times(&self) -> Vec<Instant> {
        self.poll_times.lock().expect("lock").clone()
    }

    pub fn poll_count(&self) -> usize {
        self.poll_times.lock().expect("lock").len()
    }

    /// Gaps between consecutive polls.
    pub fn poll_gaps(&self) -> Vec<Duration> {
        self.poll_times()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    pub fn register_count(&self) -> usize {
        self.registers.load(Ordering::SeqCst)
    }

    pub fn authorization_count(&self) -> usize {
        self.authorizations.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<Option<String>> {
        self.refresh_tokens_seen.lock().expect("lock").clone()
    }

    pub fn revocations(&self) -> Vec<String> {
        self.revocations.lock().expect("lock").clone()
    }

    pub fn profile_count(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for ScriptedIdentityProvider {
    async fn register_client(&self) -> Result<ClientRegistration, AuthError> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        if *self.register_fails.lock().expect("lock") {
            return Err(AuthError::Network("connection refused".to_string()));
        }
        Ok(ClientRegistration {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            expires_at: None,
        })
    }

    async fn start_device_authorization(
        &self,
        _client: &ClientRegistration,
    ) -> Result<DeviceAuthorization, AuthError> {
        let n = self.authorizations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DeviceAuthorization {
            device_code: format!("device-{n}"),
            user_code: format!("CODE-{n:04}"),
            verification_uri: "https://sso.example.com/device".to_string(),
            verification_uri_complete: Some(format!(
                "https://sso.example.com/device?user_code=CODE-{n:04}"
            )),
            expires_in: self.expires_in_secs,
            interval: self.interval_secs,
        })
    }

    async fn create_token(&self, _state: &DeviceAuthorizationState) -> Result<TokenPoll, AuthError> {
        self.poll_times.lock().expect("lock").push(Instant::now());
        self.polls
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Ok(TokenPoll::Pending))
    }

    async fn refresh(
        &self,
        _access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens_seen
            .lock()
            .expect("lock")
            .push(refresh_token.map(str::to_string));
        let delay = *self.refresh_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refreshes
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(grant(&format!("refreshed-{n}"), Some(3600))))
    }

    async fn revoke(&self, access_token: &str) -> Result<(), AuthError> {
        self.revocations
            .lock()
            .expect("lock")
            .push(access_token.to_string());
        if *self.revoke_fails.lock().expect("lock") {
            return Err(AuthError::Network("revoke endpoint unavailable".to_string()));
        }
        Ok(())
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .unauthorized_tokens
            .lock()
            .expect("lock")
            .iter()
            .any(|t| t == access_token)
        {
            return Err(AuthError::Unauthorized);
        }
        Ok(UserProfile {
            full_name: Some("Ada Lovelace".to_string()),
            ..user("ada")
        })
    }

    async fn credential_login(&self) -> Result<TokenGrant, AuthError> {
        self.credential_grant
            .lock()
            .expect("lock")
            .clone()
            .ok_or(AuthError::AccessDenied)
    }
}

// ----------------------------------------------------------------------
// Opener and address source
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("lock").clone()
    }
}

impl VerificationOpener for RecordingOpener {
    fn open(&self, uri: &str) -> Result<(), AuthError> {
        self.opened.lock().expect("lock").push(uri.to_string());
        if self.fail {
            return Err(AuthError::Browser("no display".to_string()));
        }
        Ok(())
    }
}

pub struct FixedAddress(pub Option<IpAddr>);

#[async_trait]
impl AddressSource for FixedAddress {
    async fn current_address(&self) -> Option<IpAddr> {
        self.0
    }
}

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

pub struct Harness {
    pub controller: AuthController,
    pub idp: Arc<ScriptedIdentityProvider>,
    pub store: Arc<InMemorySessionStore>,
    pub opener: Arc<RecordingOpener>,
}

pub fn harness() -> Harness {
    harness_with(AuthConfig::default(), ScriptedIdentityProvider::new())
}

pub fn harness_with(config: AuthConfig, idp: ScriptedIdentityProvider) -> Harness {
    let idp = Arc::new(idp);
    let store = Arc::new(InMemorySessionStore::new());
    let opener = Arc::new(RecordingOpener::new());
    let controller = AuthController::builder(config, idp.clone(), store.clone())
        .with_opener(opener.clone())
        .build();
    Harness {
        controller,
        idp,
        store,
        opener,
    }
}

pub fn user(username: &str) -> UserProfile {
    UserProfile {
        id: Some("1".to_string()),
        username: username.to_string(),
        email: Some(format!("{username}@example.com")),
        ..UserProfile::default()
    }
}

pub fn grant(access_token: &str, expires_in: Option<u64>) -> TokenGrant {
    TokenGrant {
        access_token: access_token.to_string(),
        token_type: "bearer".to_string(),
        refresh_token: None,
        expires_in,
        user: Some(user("ada")),
    }
}

pub fn session(access_token: &str, ttl: chrono::Duration) -> Session {
    let now = Utc::now();
    Session {
        access_token: access_token.to_string(),
        refresh_token: Some(format!("{access_token}-refresh")),
        token_type: "bearer".to_string(),
        expires_at: now + ttl,
        user: user("ada"),
        issued_at: now,
        last_refresh: None,
        bound_address: None,
    }
}

pub fn device_state(started: chrono::Duration, expires_in: chrono::Duration) -> DeviceAuthorizationState {
    let now = Utc::now();
    DeviceAuthorizationState {
        attempt_id: uuid::Uuid::new_v4(),
        client_id: "client-0".to_string(),
        client_secret: "secret-0".to_string(),
        client_secret_expires_at: None,
        device_code: "device-0".to_string(),
        user_code: "CODE-0000".to_string(),
        verification_uri: "https://sso.example.com/device".to_string(),
        verification_uri_complete: "https://sso.example.com/device?user_code=CODE-0000"
            .to_string(),
        interval_ms: 5000,
        consecutive_pending: 0,
        consecutive_errors: 0,
        started_at: now - started,
        expires_at: now - started + expires_in,
    }
}

/// Wait (in virtual time) until the controller publishes `status`.
pub async fn wait_for_status(controller: &AuthController, status: AuthStatus) -> AuthSnapshot {
    let mut rx = controller.watch_snapshot();
    tokio::time::timeout(Duration::from_secs(24 * 60 * 60), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.status == status {
                return snapshot;
            }
            rx.changed().await.expect("controller dropped");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {status}"))
}

/// Let spawned tasks run without advancing virtual time meaningfully.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
