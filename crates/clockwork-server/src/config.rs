use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use clockwork_worker::mail::{HttpMailer, Mailer, Outbox};

const DEV_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub secret: String,
    pub base_url: String,
    pub workers: usize,
    pub beat_interval: Duration,
    pub password_reset_timeout: Duration,
    /// Pause between steps of the demo counting tasks
    pub demo_step_delay: Duration,
    pub email: EmailConfig,
    pub admin: Option<AdminSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailBackend {
    Console,
    Memory,
    Http,
}

impl FromStr for EmailBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "memory" | "locmem" => Ok(Self::Memory),
            "http" | "smtp" => Ok(Self::Http),
            other => bail!("unknown EMAIL_BACKEND '{}' (expected console, memory or http)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub backend: EmailBackend,
    pub from: String,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

/// Superuser created at startup if no account has this email yet.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let secret = match get("CLOCKWORK_SECRET") {
            Some(s) if !s.is_empty() && s != DEV_SECRET => s,
            _ if cfg!(debug_assertions) => DEV_SECRET.to_string(),
            _ => bail!("CLOCKWORK_SECRET must be set to a real secret in release builds"),
        };

        let email = EmailConfig {
            backend: var("EMAIL_BACKEND", "console").parse()?,
            from: var("EMAIL_HOST_USER", "noreply@clockwork.local"),
            api_url: get("EMAIL_API_URL"),
            api_token: get("EMAIL_API_TOKEN"),
            timeout: Duration::from_millis(parse(&get, "EMAIL_TIMEOUT_MS", 10_000)?),
        };

        let admin = match (get("CLOCKWORK_ADMIN_EMAIL"), get("CLOCKWORK_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                email,
                username: var("CLOCKWORK_ADMIN_USERNAME", "admin"),
                password,
            }),
            _ => None,
        };

        Ok(Self {
            host: var("CLOCKWORK_HOST", "0.0.0.0"),
            port: parse(&get, "CLOCKWORK_PORT", 8000)?,
            db_path: var("CLOCKWORK_DB_PATH", "clockwork.db"),
            secret,
            base_url: var("CLOCKWORK_BASE_URL", "http://localhost:8000"),
            workers: parse(&get, "CLOCKWORK_WORKERS", 4)?,
            beat_interval: Duration::from_secs(parse(&get, "CLOCKWORK_BEAT_INTERVAL_SECS", 5)?),
            password_reset_timeout: Duration::from_secs(parse(
                &get,
                "CLOCKWORK_PASSWORD_RESET_TIMEOUT_SECS",
                259_200,
            )?),
            demo_step_delay: Duration::from_millis(parse(&get, "CLOCKWORK_DEMO_STEP_MS", 100)?),
            email,
            admin,
        })
    }

    pub fn mailer(&self) -> Result<Mailer> {
        Ok(match self.email.backend {
            EmailBackend::Console => Mailer::Console,
            EmailBackend::Memory => Mailer::Memory(Outbox::new()),
            EmailBackend::Http => {
                let url = self.email.api_url.clone().context("EMAIL_API_URL is required for the http backend")?;
                let token = self
                    .email
                    .api_token
                    .clone()
                    .context("EMAIL_API_TOKEN is required for the http backend")?;
                Mailer::Http(HttpMailer::new(url, token, self.email.timeout)?)
            }
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("CLOCKWORK_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.beat_interval, Duration::from_secs(5));
        assert_eq!(cfg.password_reset_timeout, Duration::from_secs(259_200));
        assert_eq!(cfg.email.backend, EmailBackend::Console);
        assert!(cfg.admin.is_none());
    }

    #[test]
    fn test_bad_values_are_errors() {
        assert!(config(&[("CLOCKWORK_PORT", "eighty")]).is_err());
        assert!(config(&[("EMAIL_BACKEND", "pigeon")]).is_err());
    }

    #[test]
    fn test_http_backend_needs_url_and_token() {
        let cfg = config(&[("EMAIL_BACKEND", "http")]).unwrap();
        assert!(cfg.mailer().is_err());

        let cfg = config(&[
            ("EMAIL_BACKEND", "http"),
            ("EMAIL_API_URL", "http://localhost:9999"),
            ("EMAIL_API_TOKEN", "token"),
        ])
        .unwrap();
        assert!(matches!(cfg.mailer().unwrap(), Mailer::Http(_)));
    }

    #[test]
    fn test_admin_seed() {
        let cfg = config(&[("CLOCKWORK_ADMIN_EMAIL", "root@x.io"), ("CLOCKWORK_ADMIN_PASSWORD", "pw123456")]).unwrap();
        let admin = cfg.admin.unwrap();
        assert_eq!(admin.username, "admin");
        assert_eq!(admin.email, "root@x.io");
    }
}
