//! Admission rules: decide, from headers and the message alone, whether a
//! request opens a session, reuses one, or is turned away.

use toolgate_protocol::{ClientMessage, SessionId};

use crate::SessionError;

/// What to do with an incoming request before any engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// No session id and an initialization message: open a new session.
    Create,
    /// A session id was presented: route to that session.
    Reuse(SessionId),
    /// No session id and a message that needs one.
    Reject,
}

impl Admission {
    /// Classifies a request by its session header and message.
    ///
    /// | session id | message        | outcome     |
    /// |------------|----------------|-------------|
    /// | absent     | initialize     | `Create`    |
    /// | absent     | anything else  | `Reject`    |
    /// | present    | anything       | `Reuse(id)` |
    ///
    /// An initialize message sent with a session id is routed to that
    /// session, whose engine answers it with an `already_initialized`
    /// error. An empty header value counts as absent.
    pub fn classify(session_id: Option<&str>, message: &ClientMessage) -> Self {
        match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => Self::Reuse(SessionId::new(id)),
            None if message.is_initialize() => Self::Create,
            None => Self::Reject,
        }
    }
}

/// The set of `Host` header values allowed to open a session.
///
/// Guards against DNS rebinding: a browser tricked into talking to a
/// local server still sends the attacker's hostname.
#[derive(Debug, Clone, Default)]
pub struct HostAllowlist {
    hosts: Vec<String>,
}

impl HostAllowlist {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// `true` when no hosts are configured and every request passes.
    pub fn is_disabled(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Checks a `Host` header value.
    ///
    /// Matches case-insensitively against the full value or the value
    /// with its port removed. A missing header fails unless the list is
    /// empty.
    pub fn check(&self, host: Option<&str>) -> Result<(), SessionError> {
        if self.is_disabled() {
            return Ok(());
        }
        let Some(host) = host else {
            return Err(SessionError::HostNotAllowed(String::new()));
        };
        let host_lower = host.trim().to_ascii_lowercase();
        let name = strip_port(&host_lower);
        if self.hosts.iter().any(|h| *h == host_lower || *h == name) {
            Ok(())
        } else {
            Err(SessionError::HostNotAllowed(host.to_string()))
        }
    }
}

/// `localhost:8080` → `localhost`, `[::1]:8080` → `[::1]`.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal: the port, if any, follows the closing bracket.
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
