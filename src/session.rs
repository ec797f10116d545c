//! Explicit auth session context.
//!
//! One [`SessionContext`] owns the current session: it is filled on login,
//! emptied on logout, and reports nothing once the session outlives its
//! maximum age. Callers ask it for the token instead of reading ambient state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{system_clock, Clock};

/// Roles known to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  #[default]
  User,
  Dev,
  Srdev,
  Bdm,
}

impl Role {
  /// Backend role name; anything unrecognised is a plain user.
  pub fn from_name(name: &str) -> Self {
    match name.trim().to_ascii_lowercase().as_str() {
      "admin" => Role::Admin,
      "dev" => Role::Dev,
      "srdev" => Role::Srdev,
      "bdm" => Role::Bdm,
      _ => Role::User,
    }
  }
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Role, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(
    Option::<String>::deserialize(deserializer)?
      .map(|name| Role::from_name(&name))
      .unwrap_or_default(),
  )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
  #[serde(rename = "_id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: String,
  #[serde(rename = "user_role", default, deserialize_with = "lenient_role")]
  pub role: Role,
}

/// The one accepted login response shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
  pub token: String,
  #[serde(default)]
  pub refresh_token: Option<String>,
  pub user: SessionUser,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
  #[error("unrecognized login response: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("login response carried an empty token")]
  EmptyToken,
}

/// Parse a login response body, rejecting anything but [`LoginResponse`].
pub fn parse_login_response(body: &str) -> Result<LoginResponse, SessionError> {
  let response: LoginResponse = serde_json::from_str(body).map_err(|e| {
    warn!(error = %e, "rejected login response");
    SessionError::from(e)
  })?;

  if response.token.trim().is_empty() {
    warn!("rejected login response without token");
    return Err(SessionError::EmptyToken);
  }

  Ok(response)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  pub token: String,
  pub refresh_token: Option<String>,
  /// Absent when the session was opened from a bare token
  pub user: Option<SessionUser>,
  pub started_at: DateTime<Utc>,
}

impl Session {
  pub fn role(&self) -> Role {
    self.user.as_ref().map(|u| u.role).unwrap_or_default()
  }
}

/// Single owner of the current session.
pub struct SessionContext {
  current: RwLock<Option<Session>>,
  max_age: Duration,
  clock: Clock,
}

impl SessionContext {
  pub fn new(max_age: Duration) -> Self {
    Self {
      current: RwLock::new(None),
      max_age,
      clock: system_clock(),
    }
  }

  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  /// Start a session from a login response, replacing any previous one.
  pub fn login(&self, response: LoginResponse) -> Session {
    let session = Session {
      token: response.token,
      refresh_token: response.refresh_token,
      user: Some(response.user),
      started_at: (self.clock)(),
    };
    info!(role = ?session.role(), "session started");
    self.replace(Some(session.clone()));
    session
  }

  /// Start a session from a bare token (e.g. supplied through the environment).
  pub fn login_with_token(&self, token: impl Into<String>) -> Session {
    let session = Session {
      token: token.into(),
      refresh_token: None,
      user: None,
      started_at: (self.clock)(),
    };
    debug!("session started from token");
    self.replace(Some(session.clone()));
    session
  }

  pub fn logout(&self) {
    if self.replace(None).is_some() {
      info!("session ended");
    }
  }

  /// The live session, if any. An expired session is cleared on the way.
  pub fn current(&self) -> Option<Session> {
    let mut current = self
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner);

    let started_at = current.as_ref()?.started_at;
    if (self.clock)() - started_at > self.max_age {
      info!("session expired");
      *current = None;
      return None;
    }

    current.clone()
  }

  pub fn token(&self) -> Option<String> {
    self.current().map(|session| session.token)
  }

  pub fn is_authenticated(&self) -> bool {
    self.current().is_some()
  }

  fn replace(&self, session: Option<Session>) -> Option<Session> {
    let mut current = self
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *current, session)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use std::sync::atomic::{AtomicI64, Ordering};
  use std::sync::Arc;

  const LOGIN: &str = r#"{
    "token": "abc",
    "refreshToken": "def",
    "user": {"_id": "u1", "name": "Asha", "email": "asha@example.com", "user_role": "admin"}
  }"#;

  /// Clock that tests can move forward.
  fn manual_clock() -> (Clock, Arc<AtomicI64>) {
    let millis = Arc::new(AtomicI64::new(1_700_000_000_000));
    let handle = Arc::clone(&millis);
    let clock: Clock = Arc::new(move || {
      Utc
        .timestamp_millis_opt(handle.load(Ordering::SeqCst))
        .unwrap()
    });
    (clock, millis)
  }

  #[test]
  fn test_parse_login_response() {
    let response = parse_login_response(LOGIN).unwrap();

    assert_eq!(response.token, "abc");
    assert_eq!(response.refresh_token.as_deref(), Some("def"));
    assert_eq!(response.user.role, Role::Admin);
  }

  #[test]
  fn test_nested_shapes_are_rejected() {
    let nested = r#"{"success": true, "data": {"token": "abc", "user": {"_id": "u1"}}}"#;
    assert!(matches!(
      parse_login_response(nested),
      Err(SessionError::Malformed(_))
    ));
  }

  #[test]
  fn test_empty_token_is_rejected() {
    let body = r#"{"token": " ", "user": {"_id": "u1"}}"#;
    assert!(matches!(
      parse_login_response(body),
      Err(SessionError::EmptyToken)
    ));
  }

  #[test]
  fn test_missing_role_defaults_to_user() {
    let body = r#"{"token": "t", "user": {"_id": "u1"}}"#;
    assert_eq!(parse_login_response(body).unwrap().user.role, Role::User);
  }

  #[test]
  fn test_unknown_role_falls_back_to_user() {
    let body = r#"{"token": "t", "user": {"_id": "u1", "user_role": "intern"}}"#;
    assert_eq!(parse_login_response(body).unwrap().user.role, Role::User);

    let body = r#"{"token": "t", "user": {"_id": "u1", "user_role": null}}"#;
    assert_eq!(parse_login_response(body).unwrap().user.role, Role::User);

    let body = r#"{"token": "t", "user": {"_id": "u1", "user_role": "SrDev"}}"#;
    assert_eq!(parse_login_response(body).unwrap().user.role, Role::Srdev);
  }

  #[test]
  fn test_login_logout_lifecycle() {
    let context = SessionContext::new(Duration::hours(24));
    assert!(!context.is_authenticated());

    context.login(parse_login_response(LOGIN).unwrap());
    assert_eq!(context.token().as_deref(), Some("abc"));
    assert_eq!(context.current().unwrap().role(), Role::Admin);

    context.logout();
    assert!(!context.is_authenticated());
    assert_eq!(context.token(), None);
  }

  #[test]
  fn test_session_expires_after_max_age() {
    let (clock, millis) = manual_clock();
    let context = SessionContext::new(Duration::hours(1)).with_clock(clock);
    context.login_with_token("tok");

    millis.fetch_add(Duration::hours(1).num_milliseconds(), Ordering::SeqCst);
    assert_eq!(context.token().as_deref(), Some("tok"));

    millis.fetch_add(1, Ordering::SeqCst);
    assert_eq!(context.token(), None);
    assert!(context.current().is_none());
  }

  #[test]
  fn test_login_after_expiry_survives_concurrent_reads() {
    let (clock, millis) = manual_clock();
    let context = Arc::new(SessionContext::new(Duration::hours(1)).with_clock(clock));
    context.login_with_token("old");
    millis.fetch_add(Duration::hours(2).num_milliseconds(), Ordering::SeqCst);

    let readers: Vec<_> = (0..8)
      .map(|_| {
        let context = Arc::clone(&context);
        std::thread::spawn(move || {
          for _ in 0..100 {
            context.current();
          }
        })
      })
      .collect();
    context.login_with_token("new");
    for reader in readers {
      reader.join().unwrap();
    }

    assert_eq!(context.token().as_deref(), Some("new"));
  }
}
