//! PIN-gated parent mode.
//!
//! The PIN is stored only as an argon2 PHC string in a [`SecretStore`].
//! Five wrong PINs in a row lock authentication for 15 minutes; a correct
//! PIN opens a parent session that lasts 30 minutes.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

use super::secrets::SecretStore;

/// Secret store key for the PIN hash
const PIN_HASH_KEY: &str = "parent_pin_hash";

/// Consecutive failures before lockout
const MAX_AUTH_ATTEMPTS: u32 = 5;

const LOCKOUT_MINUTES: i64 = 15;

/// Parent sessions expire after this long
const SESSION_MINUTES: i64 = 30;

/// Random salt length in bytes
const SALT_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("PIN must be 4-6 digits")]
    InvalidPinFormat,

    #[error("Incorrect PIN. {attempts_remaining} attempt(s) remaining")]
    IncorrectPin { attempts_remaining: u32 },

    #[error("Too many failed attempts. Try again in {} minute(s)", minutes_until(.until, .now))]
    LockedOut {
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("PIN hashing failed: {0}")]
    Hash(String),

    #[error("Secret storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

fn minutes_until(until: &DateTime<Utc>, now: &DateTime<Utc>) -> i64 {
    let secs = (*until - *now).num_seconds().max(0);
    (secs + 59) / 60
}

/// Accepts exactly 4 to 6 ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    (4..=6).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Default)]
struct AuthState {
    failed_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    session_started: Option<DateTime<Utc>>,
}

/// Parent-mode gate. Lockout and session state live in memory only.
pub struct ParentAuth {
    secrets: Arc<dyn SecretStore>,
    state: Mutex<AuthState>,
}

impl ParentAuth {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets,
            state: Mutex::new(AuthState::default()),
        }
    }

    pub fn has_pin(&self) -> Result<bool, AuthError> {
        Ok(self.secrets.get(PIN_HASH_KEY)?.is_some())
    }

    /// Hash and store a new PIN, clearing any lockout.
    pub fn set_pin(&self, pin: &str) -> Result<(), AuthError> {
        if !is_valid_pin(pin) {
            return Err(AuthError::InvalidPinFormat);
        }

        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hash(e.to_string()))?;
        let hash = Argon2::default()
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();

        self.secrets.set(PIN_HASH_KEY, &hash)?;
        let mut state = self.state.lock();
        state.failed_attempts = 0;
        state.locked_until = None;
        info!("Parent PIN updated");
        Ok(())
    }

    pub fn clear_pin(&self) -> Result<(), AuthError> {
        self.secrets.delete(PIN_HASH_KEY)?;
        Ok(())
    }

    pub fn authenticate(&self, pin: &str, require_pin: bool) -> Result<(), AuthError> {
        self.authenticate_at(pin, require_pin, Utc::now())
    }

    /// Check `pin` as of `now` and open a parent session on success.
    ///
    /// With `require_pin` off, or no PIN configured yet, any input succeeds.
    pub fn authenticate_at(
        &self,
        pin: &str,
        require_pin: bool,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut state = self.state.lock();

        if let Some(until) = state.locked_until {
            if now < until {
                return Err(AuthError::LockedOut { until, now });
            }
            state.locked_until = None;
            state.failed_attempts = 0;
        }

        if !require_pin {
            state.session_started = Some(now);
            return Ok(());
        }

        let Some(stored) = self.secrets.get(PIN_HASH_KEY)? else {
            warn!("No parent PIN configured, allowing access");
            state.session_started = Some(now);
            return Ok(());
        };

        let parsed = PasswordHash::new(&stored).map_err(|e| AuthError::Hash(e.to_string()))?;
        if Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok()
        {
            state.failed_attempts = 0;
            state.session_started = Some(now);
            info!("Parent mode unlocked");
            return Ok(());
        }

        state.failed_attempts += 1;
        if state.failed_attempts >= MAX_AUTH_ATTEMPTS {
            let until = now + Duration::minutes(LOCKOUT_MINUTES);
            state.locked_until = Some(until);
            warn!(attempts = state.failed_attempts, "Parent PIN locked out");
            return Err(AuthError::LockedOut { until, now });
        }

        let attempts_remaining = MAX_AUTH_ATTEMPTS - state.failed_attempts;
        warn!(attempts_remaining, "Parent PIN rejected");
        Err(AuthError::IncorrectPin { attempts_remaining })
    }

    pub fn is_parent_mode(&self) -> bool {
        self.is_parent_mode_at(Utc::now())
    }

    pub fn is_parent_mode_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        match state.session_started {
            Some(started) if now - started < Duration::minutes(SESSION_MINUTES) => true,
            Some(_) => {
                state.session_started = None;
                false
            }
            None => false,
        }
    }

    pub fn exit_parent_mode(&self) {
        self.state.lock().session_started = None;
    }

    pub fn failed_attempts(&self) -> u32 {
        self.state.lock().failed_attempts
    }
}
