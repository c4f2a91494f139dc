use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::models::MarinaConfig;

/// Environment variable consulted for the config file path, overriding the
/// `/config.yml` default.
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

pub const DEFAULT_CONFIG_PATH: &str = "/config.yml";

/// Load, expand, parse and validate the config file at `path`.
pub async fn load(path: &Path) -> Result<MarinaConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

    let expanded = expand_env(&raw);
    let config: MarinaConfig = serde_yaml::from_str(&expanded)?;
    validate(&config)?;
    Ok(config)
}

/// Resolve the config path: CLI arg > `CONFIG_FILE` env > default.
pub fn resolve_path(cli_arg: Option<&str>) -> std::path::PathBuf {
    if let Some(arg) = cli_arg {
        return std::path::PathBuf::from(arg);
    }
    if let Ok(env_path) = std::env::var(CONFIG_FILE_ENV) {
        return std::path::PathBuf::from(env_path);
    }
    std::path::PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Expand `${VAR}` and bare `$VAR` references against the process environment.
/// Unset variables expand to the empty string. Runs before YAML parsing so any
/// string scalar in the file may reference the environment.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c != '$' {
            out.push(c);
            i += 1;
            continue;
        }

        if i + 1 < bytes.len() && bytes[i + 1] == '{' {
            if let Some(end) = bytes[i + 2..].iter().position(|&c| c == '}') {
                let name: String = bytes[i + 2..i + 2 + end].iter().collect();
                out.push_str(&std::env::var(&name).unwrap_or_default());
                i += 2 + end + 1;
                continue;
            }
        } else if i + 1 < bytes.len() && (bytes[i + 1].is_alphabetic() || bytes[i + 1] == '_') {
            let mut end = i + 1;
            while end < bytes.len() && (bytes[end].is_alphanumeric() || bytes[end] == '_') {
                end += 1;
            }
            let name: String = bytes[i + 1..end].iter().collect();
            out.push_str(&std::env::var(&name).unwrap_or_default());
            i = end;
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Validate cross-field invariants that serde's shape alone can't express.
pub fn validate(config: &MarinaConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for (idx, instance) in config.instances.iter().enumerate() {
        if instance.id.trim().is_empty() {
            return Err(ConfigError::EmptyInstanceId(idx));
        }
        if !seen.insert(instance.id.clone()) {
            return Err(ConfigError::DuplicateInstanceId(instance.id.clone()));
        }

        match (&instance.repository, &instance.custom_image) {
            (Some(_), None) | (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                return Err(ConfigError::AmbiguousBackend {
                    id: instance.id.clone(),
                    got: "both",
                });
            }
            (None, None) => {
                return Err(ConfigError::AmbiguousBackend {
                    id: instance.id.clone(),
                    got: "neither",
                });
            }
        }

        if instance.targets.is_empty() {
            return Err(ConfigError::NoTargets(instance.id.clone()));
        }

        for (t_idx, target) in instance.targets.iter().enumerate() {
            match (target.is_volume(), target.is_db()) {
                (true, false) | (false, true) => {}
                (true, true) => {
                    return Err(ConfigError::AmbiguousTarget {
                        id: instance.id.clone(),
                        index: t_idx,
                        got: "both",
                    });
                }
                (false, false) => {
                    return Err(ConfigError::AmbiguousTarget {
                        id: instance.id.clone(),
                        index: t_idx,
                        got: "neither",
                    });
                }
            }
        }

        crate::scheduler::parse_cron(&instance.schedule).map_err(|_| ConfigError::InvalidCron {
            id: instance.id.clone(),
            expr: instance.schedule.clone(),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_braced_and_bare_vars() {
        unsafe {
            std::env::set_var("MARINA_TEST_VAR", "secret");
        }
        assert_eq!(expand_env("pw: ${MARINA_TEST_VAR}"), "pw: secret");
        assert_eq!(expand_env("pw: $MARINA_TEST_VAR!"), "pw: secret!");
        assert_eq!(expand_env("literal $$ dollars"), "literal $$ dollars");
        unsafe {
            std::env::remove_var("MARINA_TEST_VAR");
        }
    }

    #[test]
    fn unset_var_expands_empty() {
        unsafe {
            std::env::remove_var("MARINA_TEST_UNSET");
        }
        assert_eq!(expand_env("x: ${MARINA_TEST_UNSET}y"), "x: y");
    }

    fn minimal_yaml(id: &str, repo: Option<&str>, image: Option<&str>, targets: &str) -> String {
        format!(
            "instances:\n  - id: {id}\n    schedule: \"* * * * *\"\n{repo_line}{image_line}    targets:\n{targets}\n",
            id = id,
            repo_line = repo.map(|r| format!("    repository: {r}\n")).unwrap_or_default(),
            image_line = image.map(|i| format!("    customImage: {i}\n")).unwrap_or_default(),
            targets = targets,
        )
    }

    #[test]
    fn rejects_ambiguous_backend() {
        let yaml = minimal_yaml("local", Some("/repo"), Some("img"), "      - volume: data\n");
        let cfg: MarinaConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::AmbiguousBackend { .. })
        ));
    }

    #[test]
    fn rejects_missing_backend() {
        let yaml = minimal_yaml("local", None, None, "      - volume: data\n");
        let cfg: MarinaConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::AmbiguousBackend { .. })
        ));
    }

    #[test]
    fn accepts_valid_instance() {
        let yaml = minimal_yaml("local", Some("/repo"), None, "      - volume: data\n");
        let cfg: MarinaConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let yaml = "instances:\n  - id: local\n    schedule: \"* * * * *\"\n    repository: /repo\n    targets:\n      - volume: data\n  - id: local\n    schedule: \"* * * * *\"\n    repository: /repo2\n    targets:\n      - volume: data2\n";
        let cfg: MarinaConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::DuplicateInstanceId(_))
        ));
    }

    #[test]
    fn rejects_bad_cron() {
        let yaml = "instances:\n  - id: local\n    schedule: \"not a cron\"\n    repository: /repo\n    targets:\n      - volume: data\n";
        let cfg: MarinaConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(validate(&cfg), Err(ConfigError::InvalidCron { .. })));
    }
}
