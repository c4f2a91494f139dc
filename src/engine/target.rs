use crate::config::TargetConfig;

/// Database kinds whose dump command is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Postgres,
    Mysql,
    Mariadb,
    Mongo,
    Redis,
}

impl DbKind {
    /// Auto-detects a kind from an image reference prefix, e.g. `postgres:16-alpine`.
    pub fn detect(image: &str) -> Option<Self> {
        let image = image.to_ascii_lowercase();
        if image.starts_with("postgres") {
            Some(DbKind::Postgres)
        } else if image.starts_with("mariadb") {
            Some(DbKind::Mariadb)
        } else if image.starts_with("mysql") {
            Some(DbKind::Mysql)
        } else if image.starts_with("mongo") {
            Some(DbKind::Mongo)
        } else if image.starts_with("redis") {
            Some(DbKind::Redis)
        } else {
            None
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(DbKind::Postgres),
            "mysql" => Some(DbKind::Mysql),
            "mariadb" => Some(DbKind::Mariadb),
            "mongo" | "mongodb" => Some(DbKind::Mongo),
            "redis" => Some(DbKind::Redis),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Postgres => "postgres",
            DbKind::Mysql => "mysql",
            DbKind::Mariadb => "mariadb",
            DbKind::Mongo => "mongo",
            DbKind::Redis => "redis",
        }
    }

    /// Builds the dump argv, executed inside the container via `/bin/sh -lc`.
    pub fn dump_command(&self, dump_args: &[String]) -> String {
        let extra = dump_args.join(" ");
        match self {
            DbKind::Postgres => format!("pg_dumpall -U \"$POSTGRES_USER\" {extra}"),
            DbKind::Mysql | DbKind::Mariadb => {
                format!("mysqldump -u root -p\"$MYSQL_ROOT_PASSWORD\" --all-databases {extra}")
            }
            DbKind::Mongo => format!("mongodump --archive {extra}"),
            DbKind::Redis => format!("redis-cli --rdb /dev/stdout {extra}"),
        }
        .trim_end()
        .to_string()
    }
}

/// A target is the atomic unit of backup work: one volume (with paths) or one
/// database container. Stable `id()` used for logging/tagging.
#[derive(Debug, Clone)]
pub enum BackupTarget {
    Volume {
        volume_name: String,
        paths: Vec<String>,
        stop_attached: bool,
        pre_hook: Option<String>,
        post_hook: Option<String>,
    },
    Db {
        container_name: String,
        db_kind: Option<DbKind>,
        dump_args: Vec<String>,
        pre_hook: Option<String>,
        post_hook: Option<String>,
    },
}

impl BackupTarget {
    pub fn id(&self) -> String {
        match self {
            BackupTarget::Volume { volume_name, .. } => format!("volume:{volume_name}"),
            BackupTarget::Db { container_name, .. } => format!("db:{container_name}"),
        }
    }

    pub fn pre_hook(&self) -> Option<&str> {
        match self {
            BackupTarget::Volume { pre_hook, .. } => pre_hook.as_deref(),
            BackupTarget::Db { pre_hook, .. } => pre_hook.as_deref(),
        }
    }

    pub fn post_hook(&self) -> Option<&str> {
        match self {
            BackupTarget::Volume { post_hook, .. } => post_hook.as_deref(),
            BackupTarget::Db { post_hook, .. } => post_hook.as_deref(),
        }
    }

    pub fn from_config(config: &TargetConfig, global_stop_attached: bool) -> Self {
        if let Some(volume_name) = &config.volume {
            let paths = if config.paths.is_empty() {
                vec!["/".to_string()]
            } else {
                config.paths.clone()
            };
            BackupTarget::Volume {
                volume_name: volume_name.clone(),
                paths,
                stop_attached: config.stop_attached.unwrap_or(global_stop_attached),
                pre_hook: config.pre_hook.clone(),
                post_hook: config.post_hook.clone(),
            }
        } else {
            BackupTarget::Db {
                container_name: config.db.clone().expect("validated: db or volume set"),
                db_kind: config.db_kind.as_deref().and_then(DbKind::from_str_loose),
                dump_args: config.dump_args.clone(),
                pre_hook: config.pre_hook.clone(),
                post_hook: config.post_hook.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_image_prefixes() {
        assert_eq!(DbKind::detect("postgres:16-alpine"), Some(DbKind::Postgres));
        assert_eq!(DbKind::detect("mariadb:11"), Some(DbKind::Mariadb));
        assert_eq!(DbKind::detect("mysql:8"), Some(DbKind::Mysql));
        assert_eq!(DbKind::detect("mongo:7"), Some(DbKind::Mongo));
        assert_eq!(DbKind::detect("redis:7-alpine"), Some(DbKind::Redis));
        assert_eq!(DbKind::detect("alpine:latest"), None);
    }

    #[test]
    fn mariadb_checked_before_mysql_prefix_overlap() {
        // "mariadb" does not start with "mysql", this just guards against
        // future reordering breaking the more specific check.
        assert_eq!(DbKind::detect("mariadb:10"), Some(DbKind::Mariadb));
    }

    #[test]
    fn builds_expected_dump_commands() {
        assert_eq!(
            DbKind::Postgres.dump_command(&[]),
            "pg_dumpall -U \"$POSTGRES_USER\""
        );
        assert_eq!(
            DbKind::Redis.dump_command(&["--no-auth-warning".to_string()]),
            "redis-cli --rdb /dev/stdout --no-auth-warning"
        );
    }

    #[test]
    fn target_id_is_stable() {
        let t = BackupTarget::Volume {
            volume_name: "data".into(),
            paths: vec!["/".into()],
            stop_attached: false,
            pre_hook: None,
            post_hook: None,
        };
        assert_eq!(t.id(), "volume:data");
    }
}
