use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_SYSTEM_USER: &str = "system";
pub const DEFAULT_POLL_FREQUENCY: u64 = 60; // heartbeat ticks between polls
pub const DEFAULT_CLAIM_TTL_SECS: u64 = 300;
pub const DEFAULT_THROTTLE_SECS: u64 = 1;

/// Top-level config (kona.toml + KONA_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KonaConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Identity the engine uses when it acts on its own behalf
/// (job records, audit entries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_system_user")]
    pub user_id: String,
    #[serde(default = "default_system_user")]
    pub account: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            user_id: default_system_user(),
            account: default_system_user(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// `[scheduler]` section.
///
/// ```toml
/// [scheduler]
/// frequency = 30
///
/// [scheduler.groups.mail.throttle]
/// second = 5
///
/// [scheduler.job_types.cleanup]
/// name = "Nightly cleanup"
/// handler = "cleanup"
///
/// [scheduler.jobs.nightly]
/// version = 2
/// type = "cleanup"
/// name = "Nightly cleanup"
/// run = { model = "daily", at = "02:00" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Heartbeat ticks between two polls for ready jobs.
    #[serde(default = "default_frequency")]
    pub frequency: u64,
    /// Lifetime written into `claim_expire` when a job is claimed.
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: u64,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
    /// Job types keyed by code; `handler` names an entry of the host's handler catalog.
    #[serde(default)]
    pub job_types: BTreeMap<String, JobTypeConfig>,
    /// Static job definitions keyed by job code. Kept as raw JSON here and
    /// validated by the scheduler when it loads them.
    #[serde(default)]
    pub jobs: BTreeMap<String, serde_json::Value>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_POLL_FREQUENCY,
            claim_ttl_secs: DEFAULT_CLAIM_TTL_SECS,
            groups: BTreeMap::new(),
            job_types: BTreeMap::new(),
            jobs: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Minimum spacing between two job starts within `group`, in seconds.
    pub fn throttle_secs(&self, group: &str) -> u64 {
        self.groups
            .get(group)
            .and_then(|g| g.throttle.as_ref())
            .map(|t| t.second)
            .unwrap_or(DEFAULT_THROTTLE_SECS)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    pub throttle: Option<ThrottleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_throttle")]
    pub second: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTypeConfig {
    pub name: String,
    pub handler: String,
}

fn default_system_user() -> String {
    DEFAULT_SYSTEM_USER.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_frequency() -> u64 {
    DEFAULT_POLL_FREQUENCY
}
fn default_claim_ttl() -> u64 {
    DEFAULT_CLAIM_TTL_SECS
}
fn default_throttle() -> u64 {
    DEFAULT_THROTTLE_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.kona/kona.db", home)
}

impl KonaConfig {
    /// Load config from a TOML file with KONA_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `KONA_SCHEDULER__FREQUENCY=10`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("KONA_").split("__")),
        )
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> crate::error::Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::KonaError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.kona/kona.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = KonaConfig::from_toml_str("").expect("parse");
        assert_eq!(cfg.scheduler.frequency, DEFAULT_POLL_FREQUENCY);
        assert_eq!(cfg.http.port, DEFAULT_PORT);
        assert_eq!(cfg.system.user_id, "system");
        assert_eq!(cfg.scheduler.throttle_secs("anything"), 1);
    }

    #[test]
    fn scheduler_section_parses_groups_types_and_jobs() {
        let cfg = KonaConfig::from_toml_str(
            r#"
            [scheduler]
            frequency = 5

            [scheduler.groups.mail.throttle]
            second = 10

            [scheduler.job_types.cleanup]
            name = "Cleanup"
            handler = "cleanup"

            [scheduler.jobs.nightly]
            version = 2
            type = "cleanup"
            name = "Nightly"
            run = { model = "daily", at = "02:00" }
            "#,
        )
        .expect("parse");

        assert_eq!(cfg.scheduler.frequency, 5);
        assert_eq!(cfg.scheduler.throttle_secs("mail"), 10);
        assert_eq!(cfg.scheduler.throttle_secs("default"), 1);
        assert_eq!(cfg.scheduler.job_types["cleanup"].handler, "cleanup");
        let nightly = &cfg.scheduler.jobs["nightly"];
        assert_eq!(nightly["run"]["at"], "02:00");
        assert_eq!(nightly["version"], 2);
    }
}
