use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default per-instance retention string, applied when neither the instance
/// nor the top-level config set one.
pub const DEFAULT_RETENTION: &str = "7d:4w:6m";

/// Default number of instances allowed to run concurrently.
pub const DEFAULT_MAX_PARALLEL_INSTANCES: usize = 4;

#[inline]
fn default_db_path() -> String {
    "/var/lib/marina/marina.db".to_string()
}

#[inline]
fn default_api_port() -> u16 {
    8080
}

#[inline]
fn default_retention() -> String {
    DEFAULT_RETENTION.to_string()
}

#[inline]
fn default_restic_timeout() -> String {
    "1h".to_string()
}

#[inline]
fn default_staging_root() -> String {
    "/backup".to_string()
}

#[inline]
fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL_INSTANCES
}

#[inline]
fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level configuration, frozen at boot. Parsed from YAML after `${VAR}` /
/// `$VAR` environment expansion (see [`super::loader`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarinaConfig {
    /// Reported to peers and propagated to custom-image backends as
    /// `MARINA_HOSTNAME`; defaults to the OS hostname.
    #[serde(default)]
    pub node_name: Option<String>,

    /// External-collaborator field: bearer/basic auth secret for the HTTP surface.
    #[serde(default)]
    pub auth_password: Option<String>,

    /// External-collaborator field: durable status/log store path.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// External-collaborator field: HTTP API bind port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// External-collaborator field: allowed CORS origins for the HTTP surface.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// External-collaborator field: peer federation endpoints.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Default retention policy string (`"Nd:Nw:Nm"`), overridable per instance.
    #[serde(default = "default_retention")]
    pub retention: String,

    /// Default "stop attached containers before copying" behavior for volume
    /// targets, overridable per instance/target.
    #[serde(default)]
    pub stop_attached: bool,

    /// Default per-backend-call timeout, as a duration string (e.g. `"1h"`, `"90m"`).
    #[serde(default = "default_restic_timeout")]
    pub restic_timeout: String,

    /// Root directory staging runs are created under.
    #[serde(default = "default_staging_root")]
    pub staging_root: String,

    /// Upper bound on instances run concurrently.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_instances: usize,

    /// Log verbosity passed to the tracing env-filter.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional directory for rolling file logs (console logging always on).
    #[serde(default)]
    pub log_directory: Option<String>,

    pub instances: Vec<InstanceConfig>,
}

impl MarinaConfig {
    pub fn restic_timeout_duration(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.restic_timeout)
    }

    pub fn resolved_node_name(&self) -> String {
        self.node_name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "marina".to_string())
        })
    }
}

/// One backup instance: a destination repository, a cron schedule, and a set
/// of targets. Exactly one of `repository` / `custom_image` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub id: String,

    /// 5-field cron expression.
    pub schedule: String,

    #[serde(default)]
    pub repository: Option<String>,

    #[serde(default)]
    pub custom_image: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub retention: Option<String>,

    #[serde(default)]
    pub restic_timeout: Option<String>,

    #[serde(default)]
    pub stop_attached: Option<bool>,

    pub targets: Vec<TargetConfig>,
}

impl InstanceConfig {
    pub fn effective_retention<'a>(&'a self, global: &'a str) -> &'a str {
        self.retention.as_deref().unwrap_or(global)
    }

    pub fn effective_stop_attached(&self, global: bool) -> bool {
        self.stop_attached.unwrap_or(global)
    }

    pub fn effective_restic_timeout(&self, global: &str) -> anyhow::Result<Duration> {
        parse_duration(self.restic_timeout.as_deref().unwrap_or(global))
    }
}

/// A target is exactly one of a volume or a database container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub stop_attached: Option<bool>,

    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub db_kind: Option<String>,
    #[serde(default)]
    pub dump_args: Vec<String>,

    #[serde(default)]
    pub pre_hook: Option<String>,
    #[serde(default)]
    pub post_hook: Option<String>,
}

impl TargetConfig {
    pub fn is_volume(&self) -> bool {
        self.volume.is_some()
    }

    pub fn is_db(&self) -> bool {
        self.db.is_some()
    }
}

/// Parse a simple duration string of the form `"<number><unit>"` where unit is
/// one of `s`, `m`, `h`. Defaults the unit to seconds if omitted.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration string");
    }

    let (num_part, unit) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - 1], c),
        _ => (s, 's'),
    };

    let value: u64 = num_part
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration value: {}", s))?;

    let seconds = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        other => anyhow::bail!("unsupported duration unit '{}' in '{}'", other, s),
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hours_minutes_seconds() {
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("90m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn target_kind_detection() {
        let vol = TargetConfig {
            volume: Some("data".into()),
            paths: vec![],
            stop_attached: None,
            db: None,
            db_kind: None,
            dump_args: vec![],
            pre_hook: None,
            post_hook: None,
        };
        assert!(vol.is_volume());
        assert!(!vol.is_db());
    }

    #[test]
    fn instance_overrides_fall_back_to_global() {
        let inst = InstanceConfig {
            id: "local".into(),
            schedule: "* * * * *".into(),
            repository: Some("/repo".into()),
            custom_image: None,
            env: HashMap::new(),
            retention: None,
            restic_timeout: None,
            stop_attached: None,
            targets: vec![],
        };
        assert_eq!(inst.effective_retention("7d:4w:6m"), "7d:4w:6m");
        assert!(!inst.effective_stop_attached(false));
    }
}
