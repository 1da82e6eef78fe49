//! Session types: the server's record of one client's stateful channel.
//!
//! A session ties together:
//! - WHO the client is (an opaque, server-minted [`SessionId`])
//! - WHAT state the channel is in (initializing, active, closed)
//! - WHICH engine serves it (an [`EngineHandle`], never shared)
//! - WHEN it was created and last used

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use toolgate_engine::{EngineConfig, EngineHandle};
use toolgate_protocol::SessionId;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session admission and expiry.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Acceptable `Host` header values for initialization requests.
    ///
    /// An entry matches the full header (`localhost:8080`) or the header
    /// with its port stripped (`localhost`). Empty disables the check.
    pub allowed_hosts: Vec<String>,

    /// Seconds without a request (and without an open push stream) after
    /// which a session is closed. 0 disables idle expiry.
    pub idle_timeout_secs: u64,

    /// How often, in seconds, the idle sweep runs.
    pub reap_interval_secs: u64,

    /// Settings for each session's engine.
    pub engine: EngineConfig,
}

impl SessionConfig {
    /// The idle timeout, or `None` when expiry is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "[::1]".to_string(),
            ],
            idle_timeout_secs: 30 * 60,
            reap_interval_secs: 60,
            engine: EngineConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// ```text
///   Initializing ──(handshake ok)──→ Active ──(remove)──→ Closed
///        │                                                  ↑
///        └───────────────(handshake failed / drain)─────────┘
/// ```
///
/// Only the registry changes this, and only while holding its lock, so a
/// session is resolvable exactly while it is `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, handshake still running. Not resolvable yet.
    Initializing,
    /// Handshake done; requests are routed to the engine.
    Active,
    /// Removed from the registry. Terminal.
    Closed,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single client's session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
    engine: EngineHandle,
    created_at: SystemTime,
    last_activity: Mutex<Instant>,
    open_streams: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Session {
    /// Creates a session in the `Initializing` state bound to `engine`.
    pub fn new(id: SessionId, engine: EngineHandle) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::Initializing),
            engine,
            created_at: SystemTime::now(),
            last_activity: Mutex::new(Instant::now()),
            open_streams: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// The engine exclusively bound to this session.
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Wall-clock creation time. Informational only.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Records activity now, postponing idle expiry.
    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Counts a newly opened push stream.
    pub fn stream_opened(&self) {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts a closed push stream. Returns how many are still open.
    pub fn stream_closed(&self) -> usize {
        let previous = self
            .open_streams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        self.touch();
        previous.saturating_sub(1)
    }

    /// Number of push streams currently attached.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Marks a request as in flight until the returned guard drops.
    ///
    /// Dropping the guard records activity, so a long call restarts the
    /// idle clock when it finishes rather than when it started.
    pub fn begin_request(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight { session: self }
    }

    /// Number of requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `true` if nothing is using the session (no push stream, no request
    /// in flight) and the last activity is older than `timeout`.
    pub fn is_idle_for(&self, timeout: Duration) -> bool {
        self.open_streams() == 0 && self.in_flight() == 0 && self.idle_for() > timeout
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }
}

/// Guard returned by [`Session::begin_request`].
#[derive(Debug)]
pub struct InFlight<'a> {
    session: &'a Session,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.session.touch();
        let _ = self
            .session
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// The guarded values are plain data (a state tag, an instant); a panic
/// elsewhere cannot leave them half-written.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
