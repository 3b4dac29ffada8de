//! One-time links for account activation and password reset.
//!
//! A token is `{timestamp in base36}-{truncated HMAC}`. The HMAC covers the
//! account id, the timestamp and a piece of account state that changes once the
//! token has been used (activation flag, or password hash plus last login), so
//! a used token stops verifying without being stored anywhere.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use clockwork_types::models::Account;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Activation,
    PasswordReset,
}

impl TokenKind {
    fn key_salt(self) -> &'static str {
        match self {
            Self::Activation => "clockwork.tokens.AccountActivationTokenGenerator",
            Self::PasswordReset => "clockwork.tokens.PasswordResetTokenGenerator",
        }
    }
}

pub struct TokenGenerator {
    kind: TokenKind,
    secret: String,
    timeout: Duration,
}

impl TokenGenerator {
    pub fn activation(secret: &str, timeout: Duration) -> Self {
        Self {
            kind: TokenKind::Activation,
            secret: secret.to_string(),
            timeout,
        }
    }

    pub fn password_reset(secret: &str, timeout: Duration) -> Self {
        Self {
            kind: TokenKind::PasswordReset,
            secret: secret.to_string(),
            timeout,
        }
    }

    pub fn make_token(&self, account: &Account) -> String {
        self.make_token_at(account, Utc::now())
    }

    pub fn check_token(&self, account: &Account, token: &str) -> bool {
        self.check_token_at(account, token, Utc::now())
    }

    fn make_token_at(&self, account: &Account, now: DateTime<Utc>) -> String {
        let ts = now.timestamp().max(0) as u64;
        format!("{}-{}", to_base36(ts), self.digest(account, ts))
    }

    fn check_token_at(&self, account: &Account, token: &str, now: DateTime<Utc>) -> bool {
        let Some((ts_b36, hash)) = token.split_once('-') else {
            return false;
        };
        let Some(ts) = from_base36(ts_b36) else {
            return false;
        };

        let expected = self.digest(account, ts);
        if !bool::from(expected.as_bytes().ct_eq(hash.as_bytes())) {
            return false;
        }

        let age = (now.timestamp().max(0) as u64).saturating_sub(ts);
        age <= self.timeout.as_secs()
    }

    fn state(&self, account: &Account) -> String {
        match self.kind {
            TokenKind::Activation => account.is_active.to_string(),
            TokenKind::PasswordReset => {
                let login = account.last_login.map(|t| t.timestamp().to_string()).unwrap_or_default();
                format!("{}{}", account.password, login)
            }
        }
    }

    fn digest(&self, account: &Account, ts: u64) -> String {
        let key = Sha256::digest(format!("{}{}", self.kind.key_salt(), self.secret));
        // Any key length is valid for HMAC
        let mut mac = match HmacSha256::new_from_slice(&key) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(account.id.to_string().as_bytes());
        mac.update(self.state(account).as_bytes());
        mac.update(ts.to_string().as_bytes());

        // Shorter tokens; every other hex digit is plenty
        hex::encode(mac.finalize().into_bytes()).chars().step_by(2).collect()
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(s: &str) -> Option<u64> {
    // Anything longer overflows u64 and no real timestamp needs it
    if s.is_empty() || s.len() > 12 {
        return None;
    }
    u64::from_str_radix(s, 36).ok()
}

/// Account id as it appears in activation and reset links.
pub fn encode_uid(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.to_string())
}

pub fn decode_uid(uidb64: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(uidb64).ok()?;
    std::str::from_utf8(&bytes).ok()?.parse().ok()
}
