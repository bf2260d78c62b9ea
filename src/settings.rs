use std::fmt;
use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::models::InvoiceStatus;

pub const PRODUCTION_PORTAL: &str = "https://portal.ubot.vn";
pub const DEV_PORTAL: &str = "https://portal-dev.ubot.vn";
pub const MAX_PAGE_SIZE: u32 = 100;

/// Settings for one run: defaults, then `invoice_export.{toml,json,yaml}`, then `UBOT_*` env vars.
#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub production: bool,
    pub portal_base: Option<String>,
    pub remember_me: bool,
    pub page_size: u32,
    pub days: u32,
    #[serde(deserialize_with = "comma_list")]
    pub invoice_types: Vec<String>,
    pub status: Option<InvoiceStatus>,
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
}

/// What the portal client needs; built from [`AppConfig::portal`].
#[derive(Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub remember_me: bool,
}

impl AppConfig {
    /// Page size is checked by [`AppConfig::validate`] only where a pull needs it.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Environment::with_prefix("UBOT"))
    }

    /// Env values are read as plain strings; "007007" stays "007007".
    fn load_from(env: Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("production", false)?
            .set_default("remember_me", false)?
            .set_default("page_size", i64::from(MAX_PAGE_SIZE))?
            .set_default("days", 3_i64)?
            .set_default("invoice_types", vec!["INPUT_ELECTRONIC_INVOICE"])?
            .set_default("status", "VALID")?
            .set_default("db_path", "data/invoices.sqlite")?
            .set_default("output_dir", ".")?
            .add_source(File::with_name("invoice_export").required(false))
            .add_source(env)
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::PageSize {
                got: self.page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        Ok(())
    }

    /// Explicit `portal_base` wins over the production toggle.
    pub fn portal_base(&self) -> String {
        match &self.portal_base {
            Some(base) if !base.trim().is_empty() => base.trim_end_matches('/').to_string(),
            _ if self.production => PRODUCTION_PORTAL.to_string(),
            _ => DEV_PORTAL.to_string(),
        }
    }

    pub fn portal(&self) -> Result<PortalConfig, ConfigError> {
        let username = non_empty(&self.username).ok_or(ConfigError::Missing("username", "USERNAME"))?;
        let password = non_empty(&self.password).ok_or(ConfigError::Missing("password", "PASSWORD"))?;
        Ok(PortalConfig {
            base_url: self.portal_base(),
            username,
            password,
            remember_me: self.remember_me,
        })
    }
}

/// `invoice_types` arrives as a list from files/defaults, or "A,B" from the env.
fn comma_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<String>),
        One(String),
    }

    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::Many(v) => v,
        OneOrMany::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("portal_base", &self.portal_base())
            .field("remember_me", &self.remember_me)
            .field("page_size", &self.page_size)
            .field("days", &self.days)
            .field("invoice_types", &self.invoice_types)
            .field("status", &self.status)
            .field("db_path", &self.db_path)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}
