//! Authentication lifecycle controller.
//!
//! [`AuthController`] drives the device-code handshake, owns the current
//! [`Session`], keeps it fresh ahead of expiry, and publishes an
//! [`AuthSnapshot`] for the UI layer:
//! - [`AuthController::init`] restores persisted state at startup
//! - [`AuthController::login`] starts or resumes a device-code handshake
//! - [`AuthController::refresh_session`] renews the access token
//! - [`AuthController::recover_unauthorized`] handles a downstream 401
//! - [`AuthController::logout`] tears everything down

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use super::backend::{IdentityProvider, TokenPoll};
use super::backoff::PollSignal;
use super::binding::{AddressBinding, AddressSource};
use super::device_code::DeviceAuthorizationState;
use super::error::{AuthError, AuthFailure};
use super::opener::{ManualEntry, VerificationOpener};
use super::providers::http::HttpIdentityProvider;
use super::store::{FileSessionStore, SessionStore};
use super::timer::{sleep_or_cancel, TimerSlot};
use super::token::{Session, TokenGrant, UserProfile};
use crate::config::AuthConfig;
use crate::error::ClientError;

/// Observable authentication status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Idle,
    Authorizing,
    Authenticated,
    /// The device code expired before the user approved it.
    Expired,
    Denied,
    /// The handshake ran past the client-side ceiling.
    Abandoned,
}

/// What the user needs to finish an in-flight handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingVerification {
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_at: DateTime<Utc>,
    /// The verification page was opened automatically. When `false`, show
    /// `user_code` and `verification_uri` for manual entry.
    pub opened: bool,
    /// The handshake was resumed from a persisted snapshot.
    pub resumed: bool,
}

/// Point-in-time view of the controller, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthSnapshot {
    pub status: AuthStatus,
    pub user: Option<UserProfile>,
    pub pending: Option<PendingVerification>,
    pub error: Option<AuthFailure>,
}

impl AuthSnapshot {
    fn idle(error: Option<AuthFailure>) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }

    fn authorizing(pending: PendingVerification) -> Self {
        Self {
            status: AuthStatus::Authorizing,
            pending: Some(pending),
            ..Self::default()
        }
    }

    fn authenticated(user: UserProfile) -> Self {
        Self {
            status: AuthStatus::Authenticated,
            user: Some(user),
            ..Self::default()
        }
    }

    fn failed(status: AuthStatus, failure: AuthFailure) -> Self {
        Self {
            status,
            error: Some(failure),
            ..Self::default()
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, bool>>;

enum RefreshTicket {
    Started(SharedRefresh),
    Joined(SharedRefresh),
    NoSession,
}

struct Inner {
    config: AuthConfig,
    idp: Arc<dyn IdentityProvider>,
    store: Arc<dyn SessionStore>,
    opener: Arc<dyn VerificationOpener>,
    address_source: Option<Arc<dyn AddressSource>>,
    session: Mutex<Option<Session>>,
    snapshot_tx: watch::Sender<AuthSnapshot>,
    poll_timer: TimerSlot,
    refresh_timer: TimerSlot,
    liveness_timer: TimerSlot,
    refresh_task: TimerSlot,
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
}

/// Builder for [`AuthController`].
pub struct AuthControllerBuilder {
    config: AuthConfig,
    idp: Arc<dyn IdentityProvider>,
    store: Arc<dyn SessionStore>,
    opener: Arc<dyn VerificationOpener>,
    address_source: Option<Arc<dyn AddressSource>>,
}

impl AuthControllerBuilder {
    /// Where to send the user for approval. Defaults to [`ManualEntry`].
    pub fn with_opener(mut self, opener: Arc<dyn VerificationOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Address lookup used when binding sessions to the client's address.
    pub fn with_address_source(mut self, source: Arc<dyn AddressSource>) -> Self {
        self.address_source = Some(source);
        self
    }

    pub fn build(self) -> AuthController {
        let (snapshot_tx, _) = watch::channel(AuthSnapshot::default());
        AuthController {
            inner: Arc::new(Inner {
                config: self.config,
                idp: self.idp,
                store: self.store,
                opener: self.opener,
                address_source: self.address_source,
                session: Mutex::new(None),
                snapshot_tx,
                poll_timer: TimerSlot::default(),
                refresh_timer: TimerSlot::default(),
                liveness_timer: TimerSlot::default(),
                refresh_task: TimerSlot::default(),
                refresh_in_flight: Mutex::new(None),
            }),
        }
    }
}

/// Owns the authentication lifecycle for one profile.
///
/// Cheap to clone; every clone drives the same state. All public methods take
/// `&self`, and background work (polling, proactive refresh, liveness checks)
/// runs on spawned tasks, so a Tokio runtime must be active.
///
/// # Example
///
/// ```ignore
/// let controller = AuthController::from_config(AuthConfig::from_env())?.build();
/// controller.init().await;
/// if controller.login().await? {
///     let mut snapshots = controller.watch_snapshot();
///     while snapshots.changed().await.is_ok() {
///         if snapshots.borrow().status != AuthStatus::Authorizing {
///             break;
///         }
///     }
/// }
/// ```
#[derive(Clone)]
pub struct AuthController {
    inner: Arc<Inner>,
}

impl AuthController {
    pub fn builder(
        config: AuthConfig,
        idp: Arc<dyn IdentityProvider>,
        store: Arc<dyn SessionStore>,
    ) -> AuthControllerBuilder {
        AuthControllerBuilder {
            config,
            idp,
            store,
            opener: Arc::new(ManualEntry),
            address_source: None,
        }
    }

    /// Builder for a controller backed by the LangChef HTTP API and the file
    /// store described by `config`.
    pub fn from_config(config: AuthConfig) -> Result<AuthControllerBuilder, ClientError> {
        let idp = HttpIdentityProvider::new(&config.api_base_url).with_client(config.http_client()?);
        let store = FileSessionStore::new(config.store_config());
        Ok(Self::builder(config, Arc::new(idp), Arc::new(store)))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn status(&self) -> AuthStatus {
        self.inner.snapshot_tx.borrow().status
    }

    /// Subscribe to snapshot changes via a [`watch::Receiver`].
    pub fn watch_snapshot(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Snapshot changes as a stream, starting with the current value.
    pub fn events(&self) -> WatchStream<AuthSnapshot> {
        WatchStream::new(self.watch_snapshot())
    }

    /// Whether a session exists and has not expired.
    pub fn is_authenticated(&self) -> bool {
        let now = Utc::now();
        self.lock_session()
            .as_ref()
            .is_some_and(|session| session.is_valid_at(now))
    }

    /// The current session, if it is still valid.
    pub fn session(&self) -> Option<Session> {
        let now = Utc::now();
        self.lock_session()
            .as_ref()
            .filter(|session| session.is_valid_at(now))
            .cloned()
    }

    /// Bearer token for downstream requests, if the session is still valid.
    pub fn access_token(&self) -> Option<String> {
        self.session().map(|session| session.access_token)
    }

    /// Whether a device-code poll loop is running.
    pub fn is_polling(&self) -> bool {
        self.inner.poll_timer.is_armed()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Restore persisted state at startup.
    ///
    /// A valid stored session (accepted by the address-binding policy) is
    /// adopted and scheduled for refresh. A stale one is cleared. Otherwise a
    /// persisted handshake that can still complete is resumed.
    pub async fn init(&self) -> AuthStatus {
        let now = Utc::now();
        match self.inner.store.load_session() {
            Ok(Some(session)) if session.is_valid_at(now) => {
                if self.binding_allows(&session).await {
                    tracing::info!(
                        username = %session.user.username,
                        expires_at = %session.expires_at,
                        "Restored session"
                    );
                    if self.establish_session(session) {
                        return AuthStatus::Authenticated;
                    }
                    return AuthStatus::Idle;
                }
                tracing::warn!("Discarding stored session bound to a different address");
                self.clear_stored_session();
            }
            Ok(Some(session)) => {
                tracing::info!(expires_at = %session.expires_at, "Clearing expired session");
                self.clear_stored_session();
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to load stored session"),
        }

        if let Some(state) = self.load_resumable(now) {
            self.resume_handshake(state);
            return AuthStatus::Authorizing;
        }

        self.publish(AuthSnapshot::idle(None));
        AuthStatus::Idle
    }

    /// Stop every background task. Persisted state is left untouched.
    pub fn shutdown(&self) {
        self.cancel_timers();
        tracing::debug!("Auth controller shut down");
    }

    // ------------------------------------------------------------------
    // Device-code login
    // ------------------------------------------------------------------

    /// Start, or resume, a device-code handshake.
    ///
    /// Returns `Ok(false)` without side effects when a valid session already
    /// exists, and `Ok(true)` once polling has started. Completion is
    /// observed through [`Self::watch_snapshot`].
    pub async fn login(&self) -> Result<bool, AuthError> {
        if self.is_authenticated() {
            tracing::debug!("Login requested with a valid session; ignoring");
            return Ok(false);
        }
        self.inner.poll_timer.cancel();

        if let Some(state) = self.load_resumable(Utc::now()) {
            self.resume_handshake(state);
            return Ok(true);
        }

        let state = match self.begin_handshake().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start device authorization");
                self.publish(AuthSnapshot::idle(Some(AuthFailure::Unavailable)));
                return Err(e);
            }
        };

        let opened = match self.inner.opener.open(&state.verification_uri_complete) {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(error = %e, "Could not open verification page; showing code for manual entry");
                false
            }
        };
        self.publish(AuthSnapshot::authorizing(pending_verification(
            &state, opened, false,
        )));
        self.spawn_poll(state);
        Ok(true)
    }

    /// Abandon the in-flight handshake, if any.
    ///
    /// Returns `true` when a handshake was cancelled.
    pub fn cancel_login(&self) -> bool {
        let was_polling = self.inner.poll_timer.is_armed();
        self.inner.poll_timer.cancel();
        if let Err(e) = self.inner.store.clear_device_authorization() {
            tracing::warn!(error = %e, "Failed to clear device authorization");
        }
        if self.status() == AuthStatus::Authorizing {
            self.publish(AuthSnapshot::idle(None));
        }
        if was_polling {
            tracing::info!("Device authorization cancelled");
        }
        was_polling
    }

    async fn begin_handshake(&self) -> Result<DeviceAuthorizationState, AuthError> {
        let registration = self.inner.idp.register_client().await?;
        let authorization = self
            .inner
            .idp
            .start_device_authorization(&registration)
            .await?;
        let state = DeviceAuthorizationState::new(registration, authorization, Utc::now());
        self.persist_device(&state);
        tracing::info!(
            attempt_id = %state.attempt_id,
            user_code = %state.user_code,
            expires_at = %state.expires_at,
            interval_ms = state.interval_ms,
            "Started device authorization"
        );
        Ok(state)
    }

    fn resume_handshake(&self, state: DeviceAuthorizationState) {
        tracing::info!(
            attempt_id = %state.attempt_id,
            interval_ms = state.interval_ms,
            "Resuming device authorization"
        );
        self.publish(AuthSnapshot::authorizing(pending_verification(
            &state, false, true,
        )));
        self.spawn_poll(state);
    }

    /// Load a persisted handshake that can still complete, clearing one that
    /// cannot.
    fn load_resumable(&self, now: DateTime<Utc>) -> Option<DeviceAuthorizationState> {
        let state = match self.inner.store.load_device_authorization() {
            Ok(state) => state?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load device authorization");
                return None;
            }
        };
        if state.is_resumable_at(now, self.inner.config.handshake_timeout) {
            return Some(state);
        }
        tracing::debug!(attempt_id = %state.attempt_id, "Clearing stale device authorization");
        if let Err(e) = self.inner.store.clear_device_authorization() {
            tracing::warn!(error = %e, "Failed to clear device authorization");
        }
        None
    }

    fn spawn_poll(&self, state: DeviceAuthorizationState) {
        let token = self.inner.poll_timer.arm();
        let this = self.clone();
        tokio::spawn(async move { this.poll_loop(state, token).await });
    }

    async fn poll_loop(&self, mut state: DeviceAuthorizationState, token: CancellationToken) {
        let backoff = &self.inner.config.backoff;
        let deadlines = HandshakeDeadlines::new(&state, self.inner.config.handshake_timeout);
        loop {
            if !sleep_or_cancel(&token, state.interval()).await {
                tracing::debug!(attempt_id = %state.attempt_id, "Poll loop cancelled");
                return;
            }
            if self.adopt_stored_session(&state) {
                return;
            }

            let now = Instant::now();
            if now > deadlines.ceiling {
                self.finish_handshake(&state, AuthStatus::Abandoned, AuthFailure::TimedOut);
                return;
            }
            if now > deadlines.expiry {
                self.finish_handshake(&state, AuthStatus::Expired, AuthFailure::SessionExpired);
                return;
            }

            let result = self.inner.idp.create_token(&state).await;
            if token.is_cancelled() {
                tracing::debug!(attempt_id = %state.attempt_id, "Discarding poll response after cancellation");
                return;
            }

            let signal = match result {
                Ok(TokenPoll::Authorized(grant)) => {
                    self.complete_handshake(&state, grant, &token).await;
                    return;
                }
                Ok(TokenPoll::Expired) => {
                    self.finish_handshake(&state, AuthStatus::Expired, AuthFailure::SessionExpired);
                    return;
                }
                Ok(TokenPoll::Denied) => {
                    self.finish_handshake(&state, AuthStatus::Denied, AuthFailure::AccessDenied);
                    return;
                }
                Ok(TokenPoll::Pending) => PollSignal::Pending,
                Ok(TokenPoll::SlowDown) | Err(AuthError::RateLimited { .. }) => PollSignal::SlowDown,
                Err(e) => {
                    tracing::warn!(
                        attempt_id = %state.attempt_id,
                        consecutive_errors = state.consecutive_errors + 1,
                        error = %e,
                        "Token poll failed"
                    );
                    PollSignal::TransportError
                }
            };

            if backoff.apply(&mut state, signal) {
                tracing::debug!(
                    attempt_id = %state.attempt_id,
                    signal = ?signal,
                    interval_ms = state.interval_ms,
                    "Poll interval increased"
                );
            }
            self.persist_device(&state);
        }
    }

    /// Another process may have finished the same handshake and stored a
    /// session; adopt it instead of polling again.
    fn adopt_stored_session(&self, state: &DeviceAuthorizationState) -> bool {
        let session = match self.inner.store.load_session() {
            Ok(Some(session)) if session.is_valid_at(Utc::now()) => session,
            _ => return false,
        };
        tracing::info!(attempt_id = %state.attempt_id, "Adopting session stored by another client");
        self.establish_session(session);
        true
    }

    async fn complete_handshake(
        &self,
        state: &DeviceAuthorizationState,
        grant: TokenGrant,
        token: &CancellationToken,
    ) {
        let bound_address = self.current_address().await;
        if token.is_cancelled() {
            return;
        }
        let session = Session::from_grant(
            grant,
            Utc::now(),
            self.inner.config.default_session_ttl,
            bound_address,
        );
        tracing::info!(
            attempt_id = %state.attempt_id,
            username = %session.user.username,
            expires_at = %session.expires_at,
            "Device authorization complete"
        );
        self.establish_session(session);
    }

    fn finish_handshake(
        &self,
        state: &DeviceAuthorizationState,
        status: AuthStatus,
        failure: AuthFailure,
    ) {
        tracing::info!(attempt_id = %state.attempt_id, %status, "Device authorization ended");
        self.inner.poll_timer.cancel();
        if let Err(e) = self.inner.store.clear_device_authorization() {
            tracing::warn!(error = %e, "Failed to clear device authorization");
        }
        self.publish(AuthSnapshot::failed(status, failure));
    }

    // ------------------------------------------------------------------
    // Server-side credential login and profile
    // ------------------------------------------------------------------

    /// Sign in with the AWS credentials configured on the backend.
    pub async fn login_with_server_credentials(&self) -> Result<UserProfile, AuthError> {
        let grant = match self.inner.idp.credential_login().await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!(error = %e, "Credential login failed");
                if !self.is_authenticated() {
                    self.publish(AuthSnapshot::idle(Some(AuthFailure::from(&e))));
                }
                return Err(e);
            }
        };
        let bound_address = self.current_address().await;
        let session = Session::from_grant(
            grant,
            Utc::now(),
            self.inner.config.default_session_ttl,
            bound_address,
        );
        let user = session.user.clone();
        if !self.establish_session(session) {
            return Err(AuthError::ExpiredOrInvalidGrant);
        }
        tracing::info!(username = %user.username, "Signed in with server credentials");
        Ok(user)
    }

    /// Fetch the user's profile and store it on the session.
    pub async fn reload_profile(&self) -> Result<UserProfile, AuthError> {
        let token = self.access_token().ok_or(AuthError::NotLoggedIn)?;
        let (profile, used_token) = match self.inner.idp.fetch_profile(&token).await {
            Err(AuthError::Unauthorized) => {
                let fresh = self
                    .recover_unauthorized(&token)
                    .await
                    .ok_or(AuthError::NotLoggedIn)?;
                (self.inner.idp.fetch_profile(&fresh).await?, fresh)
            }
            other => (other?, token),
        };

        let updated = {
            let mut guard = self.lock_session();
            match guard.as_mut() {
                Some(session) if session.access_token == used_token => {
                    session.user = profile.clone();
                    Some(session.clone())
                }
                _ => None,
            }
        };
        if let Some(session) = updated {
            self.save_session(&session);
            self.publish(AuthSnapshot::authenticated(session.user));
        }
        Ok(profile)
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Renew the access token.
    ///
    /// At most one refresh runs at a time; a call made while one is in flight
    /// returns `false` immediately. A silent refresh retries with a fixed
    /// delay and keeps the session when every attempt fails. A non-silent
    /// refresh makes one attempt and logs out on failure. A rejected grant
    /// always logs out.
    pub async fn refresh_session(&self, silent: bool) -> bool {
        match self.acquire_refresh(silent) {
            RefreshTicket::Started(task) => task.await,
            RefreshTicket::Joined(_) => {
                tracing::debug!("Refresh already in flight");
                false
            }
            RefreshTicket::NoSession => false,
        }
    }

    /// Obtain a usable token after a downstream request was rejected with
    /// `stale_token`.
    ///
    /// Returns the current token without refreshing when it has already
    /// changed, otherwise joins or starts a refresh. Returns `None`, and ends
    /// the session, when the token cannot be renewed.
    pub async fn recover_unauthorized(&self, stale_token: &str) -> Option<String> {
        let current = self.lock_session().as_ref()?.access_token.clone();
        if current != stale_token {
            return Some(current);
        }

        let task = match self.acquire_refresh(false) {
            RefreshTicket::Started(task) | RefreshTicket::Joined(task) => task,
            RefreshTicket::NoSession => return None,
        };
        if task.await {
            return self.access_token();
        }

        let still_stale = self
            .lock_session()
            .as_ref()
            .is_some_and(|session| session.access_token == stale_token);
        if still_stale {
            self.end_session(Some(AuthFailure::RefreshFailed));
        }
        None
    }

    fn acquire_refresh(&self, silent: bool) -> RefreshTicket {
        let mut in_flight = self
            .inner
            .refresh_in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = in_flight.as_ref() {
            return RefreshTicket::Joined(task.clone());
        }
        let Some(session) = self.lock_session().clone() else {
            return RefreshTicket::NoSession;
        };

        let token = self.inner.refresh_task.arm();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let refreshed = this.run_refresh(session, silent, &token).await;
            this.inner
                .refresh_in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            refreshed
        });
        let task = async move { handle.await.unwrap_or(false) }.boxed().shared();
        *in_flight = Some(task.clone());
        RefreshTicket::Started(task)
    }

    async fn run_refresh(&self, session: Session, silent: bool, token: &CancellationToken) -> bool {
        let policy = &self.inner.config.refresh;
        let max_attempts = if silent { policy.max_attempts.max(1) } else { 1 };

        for attempt in 1..=max_attempts {
            let result = self
                .inner
                .idp
                .refresh(&session.access_token, session.refresh_token.as_deref())
                .await;
            if token.is_cancelled() {
                tracing::debug!("Discarding refresh response after cancellation");
                return false;
            }
            match result {
                Ok(grant) => return self.apply_refresh(&session.access_token, grant),
                Err(AuthError::ExpiredOrInvalidGrant) => {
                    tracing::warn!("Refresh grant rejected; ending session");
                    self.end_session(Some(AuthFailure::RefreshFailed));
                    return false;
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, silent, error = %e, "Session refresh failed");
                    let delay = match e {
                        AuthError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => policy.retry_delay.max(Duration::from_millis(ms)),
                        _ => policy.retry_delay,
                    };
                    if attempt < max_attempts && !sleep_or_cancel(token, delay).await {
                        return false;
                    }
                }
            }
        }

        if !silent {
            self.end_session(Some(AuthFailure::RefreshFailed));
        }
        false
    }

    fn apply_refresh(&self, stale_token: &str, grant: TokenGrant) -> bool {
        let now = Utc::now();
        let refreshed = {
            let mut guard = self.lock_session();
            match guard.as_mut() {
                Some(session) if session.access_token == stale_token => {
                    session.apply_refresh(grant, now, self.inner.config.default_session_ttl);
                    session.clone()
                }
                _ => {
                    tracing::debug!("Session changed during refresh; dropping result");
                    return false;
                }
            }
        };
        if !refreshed.is_valid_at(now) {
            tracing::warn!(expires_at = %refreshed.expires_at, "Refresh returned an expired token; ending session");
            self.end_session(Some(AuthFailure::SessionLapsed));
            return false;
        }
        self.save_session(&refreshed);
        tracing::info!(expires_at = %refreshed.expires_at, "Session refreshed");
        let ttl = refreshed.time_until_expiry(now);
        self.publish(AuthSnapshot::authenticated(refreshed.user));
        self.schedule_refresh(ttl);
        true
    }

    fn schedule_refresh(&self, ttl: Duration) {
        let delay = self.inner.config.refresh.refresh_delay(ttl);
        let token = self.inner.refresh_timer.arm();
        let this = self.clone();
        tracing::debug!(delay_secs = delay.as_secs(), "Scheduled session refresh");
        tokio::spawn(async move {
            if sleep_or_cancel(&token, delay).await {
                this.refresh_session(true).await;
            }
        });
    }

    fn schedule_liveness(&self) {
        let interval = self.inner.config.refresh.liveness_interval;
        let token = self.inner.liveness_timer.arm();
        let this = self.clone();
        tokio::spawn(async move {
            while sleep_or_cancel(&token, interval).await {
                if !this.check_liveness() {
                    break;
                }
            }
        });
    }

    /// Returns `false` once there is no live session left to watch.
    fn check_liveness(&self) -> bool {
        let now = Utc::now();
        let expired = match self.lock_session().as_ref() {
            Some(session) => !session.is_valid_at(now),
            None => return false,
        };
        if expired {
            tracing::warn!("Session expired; signing out");
            self.end_session(Some(AuthFailure::SessionLapsed));
            return false;
        }
        true
    }

    // ------------------------------------------------------------------
    // Logout
    // ------------------------------------------------------------------

    /// Sign out.
    ///
    /// Local state is cleared and timers are cancelled before the token is
    /// revoked; a revocation failure is logged and otherwise ignored.
    pub async fn logout(&self) {
        let Some(session) = self.end_session(None) else {
            tracing::debug!("Logout without an active session");
            return;
        };
        match self.inner.idp.revoke(&session.access_token).await {
            Ok(()) => tracing::info!("Signed out"),
            Err(e) => tracing::warn!(error = %e, "Token revocation failed"),
        }
    }

    /// Tear down local state and publish the signed-out snapshot.
    fn end_session(&self, failure: Option<AuthFailure>) -> Option<Session> {
        let session = self.lock_session().take();
        self.cancel_timers();
        self.clear_stored_session();
        if let Err(e) = self.inner.store.clear_device_authorization() {
            tracing::warn!(error = %e, "Failed to clear device authorization");
        }
        self.publish(AuthSnapshot::idle(failure));
        session
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Adopt `session` as the signed-in state.
    ///
    /// A session that is already past its expiry is never persisted or
    /// published as authenticated; the controller signs out instead and
    /// returns `false`.
    fn establish_session(&self, session: Session) -> bool {
        let now = Utc::now();
        if !session.is_valid_at(now) {
            tracing::warn!(expires_at = %session.expires_at, "Rejecting session that has already expired");
            self.end_session(Some(AuthFailure::SessionLapsed));
            return false;
        }
        self.inner.poll_timer.cancel();
        self.save_session(&session);
        if let Err(e) = self.inner.store.clear_device_authorization() {
            tracing::warn!(error = %e, "Failed to clear device authorization");
        }
        let ttl = session.time_until_expiry(now);
        let user = session.user.clone();
        *self.lock_session() = Some(session);
        self.publish(AuthSnapshot::authenticated(user));
        self.schedule_refresh(ttl);
        self.schedule_liveness();
        true
    }

    async fn binding_allows(&self, session: &Session) -> bool {
        let policy = self.inner.config.address_binding;
        if policy == AddressBinding::Disabled || session.bound_address.is_none() {
            return true;
        }
        policy.allows(session.bound_address, self.current_address().await)
    }

    async fn current_address(&self) -> Option<std::net::IpAddr> {
        match &self.inner.address_source {
            Some(source) => source.current_address().await,
            None => None,
        }
    }

    fn cancel_timers(&self) {
        self.inner.poll_timer.cancel();
        self.inner.refresh_timer.cancel();
        self.inner.liveness_timer.cancel();
        self.inner.refresh_task.cancel();
    }

    fn persist_device(&self, state: &DeviceAuthorizationState) {
        if let Err(e) = self.inner.store.save_device_authorization(state) {
            tracing::warn!(attempt_id = %state.attempt_id, error = %e, "Failed to persist device authorization");
        }
    }

    fn save_session(&self, session: &Session) {
        if let Err(e) = self.inner.store.save_session(session) {
            tracing::warn!(error = %e, "Failed to persist session");
        }
    }

    fn clear_stored_session(&self) {
        if let Err(e) = self.inner.store.clear_session() {
            tracing::warn!(error = %e, "Failed to clear stored session");
        }
    }

    fn publish(&self, snapshot: AuthSnapshot) {
        self.inner.snapshot_tx.send_replace(snapshot);
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handshake limits projected onto the monotonic clock when polling starts,
/// so a resumed handshake keeps the time it has already used.
struct HandshakeDeadlines {
    ceiling: Instant,
    expiry: Instant,
}

impl HandshakeDeadlines {
    fn new(state: &DeviceAuthorizationState, ceiling: Duration) -> Self {
        let now = Utc::now();
        let start = Instant::now();
        let elapsed = (now - state.started_at).to_std().unwrap_or(Duration::ZERO);
        let until_expiry = (state.expires_at - now).to_std().unwrap_or(Duration::ZERO);
        Self {
            ceiling: project(start, ceiling.saturating_sub(elapsed)),
            expiry: project(start, until_expiry),
        }
    }
}

/// Roughly thirty years, the horizon used for deadlines too far out to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn project(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

fn pending_verification(
    state: &DeviceAuthorizationState,
    opened: bool,
    resumed: bool,
) -> PendingVerification {
    PendingVerification {
        user_code: state.user_code.clone(),
        verification_uri: state.verification_uri.clone(),
        verification_uri_complete: state.verification_uri_complete.clone(),
        expires_at: state.expires_at,
        opened,
        resumed,
    }
}
