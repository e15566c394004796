//! Runtime configuration.
//!
//! Loaded from YAML, with secrets overridable from the environment:
//!
//! ```yaml
//! frontend:
//!   base_url: https://app.kinetoflow.ro
//! invitation:
//!   token:
//!     ttl_minutes: 1440
//! jwt:
//!   ttl_ms: 86400000
//!   issuer: kinetoflow
//! mail:
//!   from: no-reply@kinetoflow.ro
//!   smtp:
//!     host: smtp.internal
//!     port: 587
//! reconciliation:
//!   cron: "0 0 * * * *"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use cron::Schedule;
use kinetoflow_mail::{LogMailer, Mailer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub const ENV_JWT_SECRET: &str = "KINETOFLOW_JWT_SECRET";
pub const ENV_SMTP_PASSWORD: &str = "KINETOFLOW_SMTP_PASSWORD";
pub const ENV_DATABASE_PATH: &str = "KINETOFLOW_DATABASE_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub frontend: FrontendSettings,
    pub invitation: InvitationSettings,
    pub jwt: JwtSettings,
    pub mail: MailSettings,
    pub reconciliation: ReconciliationSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendSettings {
    /// Prefix of the links embedded in emails
    pub base_url: String,
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvitationSettings {
    pub token: InvitationTokenSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvitationTokenSettings {
    pub ttl_minutes: u64,
}

impl Default for InvitationTokenSettings {
    fn default() -> Self {
        Self { ttl_minutes: 1440 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// HMAC key; usually supplied through `KINETOFLOW_JWT_SECRET`
    #[serde(skip_serializing)]
    pub secret: String,
    pub ttl_ms: u64,
    pub issuer: String,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_ms: 86_400_000,
            issuer: "kinetoflow".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub from: String,
    /// Absent means emails are only logged
    pub smtp: Option<SmtpSettings>,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            from: "no-reply@kinetoflow.local".to_string(),
            smtp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    /// Six-field cron expression (sec min hour dom month dow)
    pub cron: String,
    pub enabled: bool,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            cron: "0 0 * * * *".to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file; in-memory when absent
    pub path: Option<PathBuf>,
}

impl Settings {
    /// Parse YAML. Missing sections take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a YAML file, apply environment overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut settings = Self::from_yaml_str(&raw)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `KINETOFLOW_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_JWT_SECRET) {
            self.jwt.secret = secret;
        }
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(password) = lookup(ENV_SMTP_PASSWORD) {
            match self.mail.smtp.as_mut() {
                Some(smtp) => smtp.password = Some(password),
                None => warn!("{} set but no SMTP transport is configured", ENV_SMTP_PASSWORD),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "jwt.secret is empty (set {})",
                ENV_JWT_SECRET
            )));
        }
        if self.jwt.secret.len() < 32 {
            warn!("jwt.secret is shorter than 32 bytes");
        }
        if self.jwt.ttl_ms == 0 {
            return Err(ConfigError::Invalid("jwt.ttl_ms must be positive".into()));
        }
        if self.invitation.token.ttl_minutes == 0 {
            return Err(ConfigError::Invalid(
                "invitation.token.ttl_minutes must be positive".into(),
            ));
        }
        self.reconciliation_schedule()?;
        Ok(())
    }

    /// Parsed reconciliation schedule.
    pub fn reconciliation_schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::from_str(&self.reconciliation.cron).map_err(|e| {
            ConfigError::Invalid(format!(
                "reconciliation.cron '{}': {}",
                self.reconciliation.cron, e
            ))
        })
    }

    pub fn invitation_ttl(&self) -> Duration {
        Duration::minutes(self.invitation.token.ttl_minutes as i64)
    }

    pub fn jwt_ttl(&self) -> Duration {
        Duration::milliseconds(self.jwt.ttl_ms as i64)
    }

    /// Link embedded in invitation emails.
    pub fn acceptance_url(&self, token: &str) -> String {
        format!(
            "{}/accept-invitation/{}",
            self.frontend.base_url.trim_end_matches('/'),
            token
        )
    }

    /// Link embedded in welcome emails.
    pub fn login_url(&self) -> String {
        format!("{}/login", self.frontend.base_url.trim_end_matches('/'))
    }

    /// Mail transport for these settings: SMTP when configured (and built with
    /// the `smtp` feature), otherwise emails are only logged.
    pub fn mailer(&self) -> Result<Arc<dyn Mailer>, ConfigError> {
        match self.mail.smtp.as_ref() {
            #[cfg(feature = "smtp")]
            Some(smtp) => {
                let config = kinetoflow_mail::smtp::SmtpConfig {
                    host: smtp.host.clone(),
                    port: smtp.port,
                    username: smtp.username.clone(),
                    password: smtp.password.clone(),
                };
                let mailer = kinetoflow_mail::smtp::SmtpMailer::new(&self.mail.from, &config)
                    .map_err(|e| ConfigError::Invalid(format!("mail.smtp: {}", e)))?;
                Ok(Arc::new(mailer))
            }
            #[cfg(not(feature = "smtp"))]
            Some(smtp) => {
                warn!(host = %smtp.host, "SMTP configured but the smtp feature is off; emails will only be logged");
                Ok(Arc::new(LogMailer))
            }
            None => Ok(Arc::new(LogMailer)),
        }
    }
}
