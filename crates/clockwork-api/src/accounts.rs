use anyhow::{Result, bail};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use uuid::Uuid;

use clockwork_db::Database;
use clockwork_db::queries::NewAccount;
use clockwork_types::models::Account;

use crate::error::FieldErrors;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Lower-case the domain part, keep the local part as typed.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
}

/// Problems with a new password, empty if it is acceptable.
pub fn password_problems(password: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!(
            "This password is too short. It must contain at least {} characters.",
            MIN_PASSWORD_LEN
        ));
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }
    problems
}

/// Check a pair of new-password fields. Errors are keyed by `field`.
pub fn validate_new_password(password1: &str, password2: &str, field: &str, errors: &mut FieldErrors) {
    if password1 != password2 {
        errors
            .entry(field.to_string())
            .or_default()
            .push("The two password fields didn't match.".to_string());
        return;
    }
    let problems = password_problems(password1);
    if !problems.is_empty() {
        errors.entry(field.to_string()).or_default().extend(problems);
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password_hash: &str, password: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Create an inactive account. Blocking; call through `spawn_blocking`.
pub fn create_user(db: &Database, email: &str, username: &str, password: &str) -> Result<Account> {
    insert(db, email, username, password, false)
}

/// Create an active account holding every permission.
pub fn create_superuser(db: &Database, email: &str, username: &str, password: &str) -> Result<Account> {
    insert(db, email, username, password, true)
}

fn insert(db: &Database, email: &str, username: &str, password: &str, superuser: bool) -> Result<Account> {
    if email.trim().is_empty() {
        bail!("Users must have an email address");
    }
    if username.trim().is_empty() {
        bail!("Users must have a username");
    }
    if password.is_empty() {
        bail!("Users must have a password");
    }

    let email = normalize_email(email);
    let password_hash = hash_password(password)?;
    db.insert_account(&NewAccount {
        id: Uuid::new_v4(),
        email: &email,
        username: username.trim(),
        password_hash: &password_hash,
        is_active: superuser,
        is_admin: superuser,
    })
}
