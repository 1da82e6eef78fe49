//! Authentication gate for incoming requests.
//!
//! Every request except the health check passes through an
//! [`Authenticator`] before the session layer looks at it. The built-in
//! implementation is [`SharedSecret`]: one bearer token configured at
//! startup. Deployments with their own identity provider implement the
//! trait instead.

use std::future::Future;

use crate::SessionError;

/// Decides whether a request may proceed.
///
/// `credential` is whatever the client presented (see
/// [`presented_credential`]), or `None` if it presented nothing.
///
/// # Example
///
/// ```rust
/// use toolgate_session::{Authenticator, SessionError};
///
/// /// Accepts any non-empty credential. Development only.
/// struct AnyToken;
///
/// impl Authenticator for AnyToken {
///     async fn authenticate(&self, credential: Option<&str>) -> Result<(), SessionError> {
///         match credential {
///             Some(c) if !c.is_empty() => Ok(()),
///             _ => Err(SessionError::Unauthorized("credential required".into())),
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `Ok(())` to admit the request.
    ///
    /// # Errors
    /// [`SessionError::Unauthorized`] to reject it.
    fn authenticate(
        &self,
        credential: Option<&str>,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// A single shared secret, compared in constant time.
///
/// With no secret configured, every request is admitted.
#[derive(Clone, Default)]
pub struct SharedSecret {
    secret: Option<String>,
}

impl SharedSecret {
    /// An empty or missing secret disables authentication.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// A gate that admits everything.
    pub fn disabled() -> Self {
        Self { secret: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Authenticator for SharedSecret {
    async fn authenticate(&self, credential: Option<&str>) -> Result<(), SessionError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        match credential {
            None => Err(SessionError::Unauthorized("missing credential".into())),
            Some(c) if constant_time_eq(c.as_bytes(), secret.as_bytes()) => Ok(()),
            Some(_) => Err(SessionError::Unauthorized("invalid credential".into())),
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
///
/// The scheme is matched case-insensitively. Returns `None` for other
/// schemes or an empty token.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Picks the credential a request presented.
///
/// A bearer token in the `Authorization` header wins over a `token`
/// query parameter; the query form exists for clients (such as browser
/// `EventSource`) that cannot set headers.
pub fn presented_credential<'a>(
    authorization: Option<&'a str>,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    authorization
        .and_then(bearer_token)
        .or_else(|| query_token.filter(|t| !t.is_empty()))
}

/// Compares two byte strings without returning early, on either a
/// length mismatch or the first differing byte.
///
/// The loop always runs over the longer input; the shorter one is padded
/// with zeros and the length difference is folded into the result.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = u8::from(a.len() != b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}
