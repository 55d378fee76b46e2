use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use instaquote_core::config::AppConfig;
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// One rendered setting: dotted key, display value and the environment
/// variables that can set it, primary name first.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn setting(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Setting {
    Setting { key, value: value.to_string(), env_keys }
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    CommandResult::text(0, render(&config))
}

pub fn render(config: &AppConfig) -> String {
    let file_path = detect_config_path();
    let file_doc = file_path.as_deref().and_then(load_config_file_doc);

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in settings(config) {
        let source = field_source(&entry, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", entry.key, entry.value));
    }

    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let api_key = match &config.llm.api_key {
        Some(key) => redact_key(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        setting("database.url", &config.database.url, &["INSTAQUOTE_DATABASE_URL"]),
        setting(
            "database.max_connections",
            config.database.max_connections,
            &["INSTAQUOTE_DATABASE_MAX_CONNECTIONS"],
        ),
        setting(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["INSTAQUOTE_DATABASE_TIMEOUT_SECS"],
        ),
        setting(
            "llm.provider",
            format!("{:?}", config.llm.provider).to_lowercase(),
            &["INSTAQUOTE_LLM_PROVIDER"],
        ),
        setting("llm.api_key", api_key, &["INSTAQUOTE_LLM_API_KEY"]),
        setting(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["INSTAQUOTE_LLM_BASE_URL"],
        ),
        setting("llm.model", &config.llm.model, &["INSTAQUOTE_LLM_MODEL"]),
        setting("llm.timeout_secs", config.llm.timeout_secs, &["INSTAQUOTE_LLM_TIMEOUT_SECS"]),
        setting("llm.max_retries", config.llm.max_retries, &["INSTAQUOTE_LLM_MAX_RETRIES"]),
        setting(
            "server.bind_address",
            &config.server.bind_address,
            &["INSTAQUOTE_SERVER_BIND_ADDRESS"],
        ),
        setting("server.port", config.server.port, &["INSTAQUOTE_SERVER_PORT"]),
        setting(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["INSTAQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        setting(
            "server.cors_allowed_origins",
            config.server.cors_allowed_origins.as_deref().unwrap_or("*"),
            &["INSTAQUOTE_SERVER_CORS_ALLOWED_ORIGINS"],
        ),
        setting("session.window", config.session.window, &["INSTAQUOTE_SESSION_WINDOW"]),
        setting(
            "session.idle_ttl_secs",
            config.session.idle_ttl_secs,
            &["INSTAQUOTE_SESSION_IDLE_TTL_SECS"],
        ),
        setting(
            "session.sweep_interval_secs",
            config.session.sweep_interval_secs,
            &["INSTAQUOTE_SESSION_SWEEP_INTERVAL_SECS"],
        ),
        setting(
            "session.scope",
            format!("{:?}", config.session.scope).to_lowercase(),
            &["INSTAQUOTE_SESSION_SCOPE"],
        ),
        setting(
            "logging.level",
            &config.logging.level,
            &["INSTAQUOTE_LOGGING_LEVEL", "INSTAQUOTE_LOG_LEVEL"],
        ),
        setting(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["INSTAQUOTE_LOGGING_FORMAT", "INSTAQUOTE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("instaquote.toml"), PathBuf::from("config/instaquote.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(entry: &Setting, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = entry.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let (Some(doc), Some(path)) = (file_doc, file_path) {
        if contains_path(doc, entry.key) {
            return format!("file ({})", path.display());
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

/// Keeps a recognizable prefix such as `sk-` and hides the rest.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use instaquote_core::config::AppConfig;
    use toml::Value;

    use super::{contains_path, redact_key, render};

    #[test]
    fn api_keys_are_redacted() {
        assert_eq!(redact_key("sk-live-123456"), "sk-***");
        assert_eq!(redact_key("plainsecretvalue"), "<redacted>");
        assert_eq!(redact_key("  "), "<empty>");
    }

    #[test]
    fn rendered_config_never_contains_the_raw_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-do-not-print".to_string().into());

        let output = render(&config);

        assert!(output.contains("- llm.api_key = sk-***"));
        assert!(!output.contains("do-not-print"));
        assert!(output.contains("- session.scope = business"));
    }

    #[test]
    fn dotted_paths_resolve_into_nested_tables() {
        let doc: Value = "[session]\nwindow = 4\n".parse().expect("toml");

        assert!(contains_path(&doc, "session.window"));
        assert!(!contains_path(&doc, "session.scope"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
