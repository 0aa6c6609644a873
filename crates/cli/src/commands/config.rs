use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = match config_file_path.as_deref().map(load_config_file_doc) {
        Some(Ok(doc)) => Some(doc),
        Some(Err(error)) => return format!("config inspection failed: {error:#}"),
        None => None,
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in effective_values(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

type EffectiveValue = (&'static str, String, &'static [&'static str]);

fn entry(
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
) -> EffectiveValue {
    (key_path, value, env_keys)
}

fn effective_values(config: &AppConfig) -> Vec<EffectiveValue> {
    let database = &config.database;
    let approvals = &config.approvals;
    vec![
        entry("database.url", database.url.clone(), &["SIGNOFF_DATABASE_URL"]),
        entry(
            "database.max_connections",
            database.max_connections.to_string(),
            &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            database.timeout_secs.to_string(),
            &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "approvals.name_max_len",
            approvals.name_max_len.to_string(),
            &["SIGNOFF_APPROVALS_NAME_MAX_LEN"],
        ),
        entry(
            "approvals.description_max_len",
            approvals.description_max_len.to_string(),
            &["SIGNOFF_APPROVALS_DESCRIPTION_MAX_LEN"],
        ),
        entry(
            "approvals.remarks_max_len",
            approvals.remarks_max_len.to_string(),
            &["SIGNOFF_APPROVALS_REMARKS_MAX_LEN"],
        ),
        entry(
            "approvals.dashboard_recent_limit",
            approvals.dashboard_recent_limit.to_string(),
            &["SIGNOFF_APPROVALS_DASHBOARD_RECENT_LIMIT"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("signoff.toml"), PathBuf::from("config/signoff.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;
    raw.parse::<Value>().with_context(|| format!("could not parse `{}`", path.display()))
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
