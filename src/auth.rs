//! Email/password accounts for operator businesses.
//!
//! Passwords are hashed with bcrypt. Sessions live in the `sessions` table
//! and expire after the configured lifetime or two hours of inactivity.
//! Failed logins are counted per user; five in a row lock the account for
//! fifteen minutes.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{AppError, AppResult};
use crate::mapping::status::parse_timestamp;
use crate::state::AppState;
use crate::storage::mask;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: i64 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SESSION_INACTIVITY_MINUTES: i64 = 120;
const MIN_PASSWORD_LEN: usize = 8;
pub const SESSION_COOKIE: &str = "vendsync_session";

const BCRYPT_COST: u32 = if cfg!(test) { 4 } else { bcrypt::DEFAULT_COST };

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub business_id: String,
    pub business_name: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub token: String,
    pub session: Session,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub business_id: String,
    pub business_name: String,
    pub user_id: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::BadRequest("A valid email address is required".into())),
    }
}

/// 32 random bytes from two v4 UUIDs, URL-safe base64.
fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Remaining lockout, if the account is currently locked.
fn lockout_remaining(
    failed_attempts: i64,
    last_failed_at: Option<&str>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    if failed_attempts < MAX_FAILED_ATTEMPTS {
        return None;
    }
    let last = last_failed_at.and_then(parse_timestamp)?;
    let elapsed = now - last;
    let window = Duration::minutes(LOCKOUT_MINUTES);
    (elapsed < window).then(|| window - elapsed)
}

/// Result of checking a password against the stored account state.
enum Attempt {
    Opened,
    WrongPassword,
    Locked(Duration),
}

fn locked_out(remaining: Duration) -> AppError {
    let minutes = (remaining.num_seconds() + 59) / 60;
    AppError::Forbidden(format!(
        "Too many failed attempts. Try again in {minutes} minute(s)."
    ))
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create a business and its owner account.
pub fn register_business(
    db: &DbState,
    name: &str,
    email: &str,
    password: &str,
) -> AppResult<Registered> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Business name is required".into()));
    }
    let email = normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let hash = bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))?;

    let business_id = Uuid::new_v4().to_string();
    let user_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| -> AppResult<()> {
        let taken: bool = tx
            .query_row("SELECT 1 FROM users WHERE email = ?1", params![email], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if taken {
            return Err(AppError::Conflict("An account with this email already exists".into()));
        }
        tx.execute(
            "INSERT INTO businesses (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![business_id, name, now],
        )?;
        tx.execute(
            "INSERT INTO users (id, business_id, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, business_id, email, hash, now],
        )?;
        Ok(())
    })?;

    info!(business_id = %business_id, "business registered");
    Ok(Registered {
        business_id,
        business_name: name.to_string(),
        user_id,
        email,
    })
}

/// Verify the password and open a session.
pub fn login(
    db: &DbState,
    email: &str,
    password: &str,
    session_hours: i64,
) -> AppResult<LoginResult> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest("Email and password are required".into()));
    }
    let now = Utc::now();

    let user: Option<(String, String, String, String, i64, Option<String>)> = {
        let conn = db.conn.lock()?;
        conn.query_row(
            "SELECT u.id, u.business_id, b.name, u.password_hash, u.failed_attempts, u.last_failed_at
             FROM users u JOIN businesses b ON b.id = u.business_id
             WHERE u.email = ?1",
            params![email],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?
    };
    let Some((user_id, business_id, business_name, hash, failed_attempts, last_failed_at)) = user
    else {
        warn!("login for unknown account");
        return Err(AppError::InvalidCredentials);
    };

    if let Some(remaining) = lockout_remaining(failed_attempts, last_failed_at.as_deref(), now) {
        return Err(locked_out(remaining));
    }

    // bcrypt runs without the connection lock held
    let valid = bcrypt::verify(password, &hash).unwrap_or(false);

    // other attempts may have landed while bcrypt ran, so the counter is
    // re-read and written under the same lock
    let conn = db.conn.lock()?;
    let token = new_session_token();
    let expires_at = (now + Duration::hours(session_hours)).to_rfc3339();
    let now_str = now.to_rfc3339();
    let outcome = db::with_transaction(&conn, |tx| -> AppResult<Attempt> {
        let (attempts, last_failed): (i64, Option<String>) = tx.query_row(
            "SELECT failed_attempts, last_failed_at FROM users WHERE id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let remaining = lockout_remaining(attempts, last_failed.as_deref(), now);

        if !valid {
            // an elapsed lockout starts a fresh count
            let attempts = if attempts >= MAX_FAILED_ATTEMPTS && remaining.is_none() {
                1
            } else {
                attempts + 1
            };
            tx.execute(
                "UPDATE users SET failed_attempts = ?1, last_failed_at = ?2 WHERE id = ?3",
                params![attempts, now_str, user_id],
            )?;
            warn!(user_id = %user_id, attempts, "failed login attempt");
            return Ok(Attempt::WrongPassword);
        }
        if let Some(remaining) = remaining {
            return Ok(Attempt::Locked(remaining));
        }

        tx.execute(
            "UPDATE users SET failed_attempts = 0, last_failed_at = NULL WHERE id = ?1",
            params![user_id],
        )?;
        tx.execute(
            "DELETE FROM sessions WHERE user_id = ?1 AND expires_at <= ?2",
            params![user_id, now_str],
        )?;
        tx.execute(
            "INSERT INTO sessions (token, user_id, business_id, created_at, last_activity, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
            params![token, user_id, business_id, now_str, expires_at],
        )?;
        Ok(Attempt::Opened)
    })?;
    drop(conn);
    match outcome {
        Attempt::Opened => {}
        Attempt::WrongPassword => return Err(AppError::InvalidCredentials),
        Attempt::Locked(remaining) => return Err(locked_out(remaining)),
    }

    info!(business_id = %business_id, session = %mask(&token), "login successful");
    Ok(LoginResult {
        token,
        session: Session {
            business_id,
            business_name,
            user_id,
            email,
            expires_at,
        },
    })
}

/// Resolve a session token, refreshing its inactivity timer.
pub fn validate_session(db: &DbState, token: &str, now: DateTime<Utc>) -> AppResult<Session> {
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    let conn = db.conn.lock()?;
    let row: Option<(String, String, String, String, String, String)> = conn
        .query_row(
            "SELECT s.business_id, b.name, s.user_id, u.email, s.last_activity, s.expires_at
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             JOIN businesses b ON b.id = s.business_id
             WHERE s.token = ?1",
            params![token],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;
    let Some((business_id, business_name, user_id, email, last_activity, expires_at)) = row else {
        return Err(AppError::Unauthorized);
    };

    let expired = match (parse_timestamp(&expires_at), parse_timestamp(&last_activity)) {
        (Some(expires), Some(active)) => {
            now >= expires || now - active > Duration::minutes(SESSION_INACTIVITY_MINUTES)
        }
        _ => true,
    };
    if expired {
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        info!(user_id = %user_id, "session expired");
        return Err(AppError::Unauthorized);
    }

    conn.execute(
        "UPDATE sessions SET last_activity = ?1 WHERE token = ?2",
        params![now.to_rfc3339(), token],
    )?;
    Ok(Session {
        business_id,
        business_name,
        user_id,
        email,
        expires_at,
    })
}

pub fn logout(db: &DbState, token: &str) -> AppResult<bool> {
    let conn = db.conn.lock()?;
    let removed = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    if removed > 0 {
        info!(session = %mask(token), "session logged out");
    }
    Ok(removed > 0)
}

// ---------------------------------------------------------------------------
// Request extractor
// ---------------------------------------------------------------------------

/// Session token from `Authorization: Bearer` or the session cookie.
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(value) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The signed-in business. Handlers taking this extractor answer 401
/// without a valid session.
#[derive(Debug, Clone)]
pub struct BusinessSession {
    pub token: String,
    pub session: Session,
}

impl BusinessSession {
    pub fn business_id(&self) -> &str {
        &self.session.business_id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for BusinessSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = token_from_parts(parts).ok_or(AppError::Unauthorized)?;
        let session = validate_session(&state.db, &token, Utc::now())?;
        Ok(Self { token, session })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use axum::http::Request;

    fn registered(db: &DbState) -> Registered {
        register_business(db, "Snack Co", "Owner@Example.com", "correct-horse").unwrap()
    }

    fn failed_attempts(db: &DbState) -> i64 {
        db.conn
            .lock()
            .unwrap()
            .query_row("SELECT failed_attempts FROM users", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn register_validates_and_rejects_duplicates() {
        let db = test_db();
        let reg = registered(&db);
        assert_eq!(reg.email, "owner@example.com");

        let dup = register_business(&db, "Other", "owner@example.com", "another-pass")
            .expect_err("duplicate email");
        assert!(matches!(dup, AppError::Conflict(_)));
        assert!(matches!(
            register_business(&db, "Other", "x@example.com", "short"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            register_business(&db, "Other", "not-an-email", "long-enough"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn login_then_validate_then_logout() {
        let db = test_db();
        let reg = registered(&db);
        let result = login(&db, " owner@example.com ", "correct-horse", 12).unwrap();
        assert_eq!(result.session.business_id, reg.business_id);

        let session = validate_session(&db, &result.token, Utc::now()).unwrap();
        assert_eq!(session.user_id, reg.user_id);
        assert_eq!(session.business_name, "Snack Co");

        assert!(logout(&db, &result.token).unwrap());
        assert!(matches!(
            validate_session(&db, &result.token, Utc::now()),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn five_failures_lock_the_account() {
        let db = test_db();
        registered(&db);
        for _ in 0..MAX_FAILED_ATTEMPTS {
            assert!(matches!(
                login(&db, "owner@example.com", "wrong-password", 12),
                Err(AppError::InvalidCredentials)
            ));
        }
        assert_eq!(failed_attempts(&db), MAX_FAILED_ATTEMPTS);

        let err = login(&db, "owner@example.com", "correct-horse", 12).expect_err("locked");
        assert!(err.to_string().contains("Too many failed attempts"));
        assert_eq!(failed_attempts(&db), MAX_FAILED_ATTEMPTS);
    }

    #[test]
    fn parallel_failures_all_count_toward_lockout() {
        let db = test_db();
        registered(&db);
        std::thread::scope(|scope| {
            for _ in 0..20 {
                scope.spawn(|| {
                    let err = login(&db, "owner@example.com", "wrong-password", 12)
                        .expect_err("wrong password");
                    assert!(matches!(
                        err,
                        AppError::InvalidCredentials | AppError::Forbidden(_)
                    ));
                });
            }
        });
        assert!(failed_attempts(&db) >= MAX_FAILED_ATTEMPTS);

        let err = login(&db, "owner@example.com", "correct-horse", 12).expect_err("locked");
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn elapsed_lockout_allows_login_and_resets() {
        let db = test_db();
        registered(&db);
        let long_ago = (Utc::now() - Duration::minutes(LOCKOUT_MINUTES + 1)).to_rfc3339();
        db.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE users SET failed_attempts = 5, last_failed_at = ?1",
                params![long_ago],
            )
            .unwrap();

        login(&db, "owner@example.com", "correct-horse", 12).expect("lockout elapsed");
        assert_eq!(failed_attempts(&db), 0);
    }

    #[test]
    fn sessions_expire_by_lifetime_and_inactivity() {
        let db = test_db();
        registered(&db);
        let result = login(&db, "owner@example.com", "correct-horse", 12).unwrap();

        let idle = Utc::now() + Duration::minutes(SESSION_INACTIVITY_MINUTES + 5);
        assert!(validate_session(&db, &result.token, idle).is_err());

        let result = login(&db, "owner@example.com", "correct-horse", 1).unwrap();
        let mut now = Utc::now();
        for _ in 0..2 {
            now += Duration::minutes(25);
            validate_session(&db, &result.token, now).expect("activity keeps it alive");
        }
        now += Duration::minutes(25);
        assert!(validate_session(&db, &result.token, now).is_err(), "past max lifetime");
    }

    #[test]
    fn sessions_are_bound_to_their_business() {
        let db = test_db();
        let first = registered(&db);
        let second = register_business(&db, "Vend Inc", "ops@vend.io", "password-2").unwrap();
        let a = login(&db, "owner@example.com", "correct-horse", 12).unwrap();
        let b = login(&db, "ops@vend.io", "password-2", 12).unwrap();

        assert_eq!(
            validate_session(&db, &a.token, Utc::now()).unwrap().business_id,
            first.business_id
        );
        assert_eq!(
            validate_session(&db, &b.token, Utc::now()).unwrap().business_id,
            second.business_id
        );
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn token_is_read_from_header_or_cookie() {
        let (parts, _) = Request::builder()
            .header("Authorization", "Bearer abc123")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(token_from_parts(&parts).as_deref(), Some("abc123"));

        let (parts, _) = Request::builder()
            .header("Cookie", "theme=dark; vendsync_session=tok-9; other=1")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(token_from_parts(&parts).as_deref(), Some("tok-9"));

        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert!(token_from_parts(&parts).is_none());
    }
}
