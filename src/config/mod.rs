//! Configuration loading
//!
//! JSON5 configuration file with `${VAR}` environment substitution, typed
//! sections with defaults, environment overrides and validation.
//!
//! Lookup order for the file:
//! 1. `PAGEFLOW_CONFIG_PATH`
//! 2. `~/.pageflow/pageflow.json5`
//!
//! A missing file yields the defaults.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

use crate::logging::{self, targets, LogConfig, LogFormat, LogOutput};
use crate::page::{Header, HeaderLogo, Link, Page, PagePrototype};
use crate::page::menu::Menu;
use crate::sessions::{SessionCap, SessionGrouping};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {var}: {message}")]
    InvalidEnvOverride { var: String, message: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// Deployment environment. Only affects log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "dev")]
    Development,
    #[default]
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_sessions() -> i64 {
    -1
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_delete_path() -> String {
    "/sessions/delete".to_string()
}

fn default_asset_prefix() -> String {
    "/assets/".to_string()
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSection {
    /// Concurrent sessions per group; `-1` = unlimited
    #[serde(default = "default_max_sessions")]
    pub max_sessions: i64,
    pub grouping: SessionGrouping,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    pub secure_cookie: bool,
    #[serde(default = "default_delete_path")]
    pub delete_path: String,
    /// Directory for the file store (defaults to `~/.pageflow/sessions`)
    pub store_path: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            grouping: SessionGrouping::default(),
            cookie_name: default_cookie_name(),
            secure_cookie: false,
            delete_path: default_delete_path(),
            store_path: None,
        }
    }
}

/// Static asset settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetsSection {
    #[serde(default = "default_asset_prefix")]
    pub prefix: String,
}

impl Default for AssetsSection {
    fn default() -> Self {
        Self {
            prefix: default_asset_prefix(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSection {
    /// Defaults to plaintext in development and JSON in production
    pub format: Option<LogFormat>,
    pub level: Option<String>,
    /// Log file; stdout when unset
    pub file: Option<PathBuf>,
}

/// Header logo settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogoSection {
    pub img: String,
    pub height: String,
    pub width: String,
}

/// Page defaults shared by every request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSection {
    pub title: String,
    pub links: Vec<String>,
    pub scripts: Vec<String>,
    pub logo: LogoSection,
}

/// Navigation link as written in the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MenuLink {
    pub name: String,
    pub href: String,
    pub title: String,
    pub links: Vec<MenuLink>,
}

impl From<&MenuLink> for Link {
    fn from(link: &MenuLink) -> Self {
        let mut out = Link::new(link.name.clone(), link.href.clone());
        out.title = link.title.clone();
        out.links = link.links.iter().map(Link::from).collect();
        out
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub env: Environment,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub session: SessionSection,
    pub assets: AssetsSection,
    pub logging: LoggingSection,
    pub page: PageSection,
    /// Menu type -> links
    pub menus: std::collections::BTreeMap<String, Vec<MenuLink>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: Environment::default(),
            bind: default_bind(),
            session: SessionSection::default(),
            assets: AssetsSection::default(),
            logging: LoggingSection::default(),
            page: PageSection::default(),
            menus: Default::default(),
        }
    }
}

impl AppConfig {
    pub fn session_cap(&self) -> SessionCap {
        SessionCap::from_config(self.session.max_sessions)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|e: std::net::AddrParseError| ConfigError::ValidationError {
            path: "bind".to_string(),
            message: e.to_string(),
        })
    }

    /// Session store directory
    pub fn store_path(&self) -> PathBuf {
        self.session
            .store_path
            .clone()
            .unwrap_or_else(|| state_dir().join("sessions"))
    }

    /// Logging configuration for this environment
    pub fn log_config(&self) -> LogConfig {
        let mut config = if self.env.is_development() {
            LogConfig::development()
        } else {
            LogConfig::production()
        };
        if let Some(format) = self.logging.format {
            config.format = format;
        }
        if let Some(level) = self.logging.level.as_deref().and_then(logging::parse_level) {
            config.default_level = level;
        }
        if let Some(file) = &self.logging.file {
            config.output = LogOutput::File(file.clone());
        }
        config
    }

    /// Page defaults built from the `page` section
    pub fn page_prototype(&self) -> PagePrototype {
        let mut page = Page::new();
        page.title = self.page.title.clone();
        page.header = Some(Header {
            logo: HeaderLogo {
                img: self.page.logo.img.clone(),
                height: self.page.logo.height.clone(),
                width: self.page.logo.width.clone(),
            },
            title: self.page.title.clone(),
            nav: Vec::new(),
        });
        let links: Vec<&str> = self.page.links.iter().map(String::as_str).collect();
        page.add_link(&links);
        let scripts: Vec<&str> = self.page.scripts.iter().map(String::as_str).collect();
        page.add_script(&scripts);
        PagePrototype::new(page)
    }

    /// Navigation menus built from the `menus` section
    pub fn menu(&self) -> Menu {
        let mut menu = Menu::new();
        for (typ, links) in &self.menus {
            menu.add_link(typ.clone(), links.iter().map(Link::from));
        }
        menu
    }

    /// Apply `PAGEFLOW_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var("PAGEFLOW_ENV") {
            self.env = Environment::parse(&value).ok_or_else(|| ConfigError::InvalidEnvOverride {
                var: "PAGEFLOW_ENV".to_string(),
                message: format!("unknown environment '{}'", value),
            })?;
        }
        if let Ok(value) = env::var("PAGEFLOW_MAX_SESSIONS") {
            self.session.max_sessions =
                value
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnvOverride {
                        var: "PAGEFLOW_MAX_SESSIONS".to_string(),
                        message: e.to_string(),
                    })?;
        }
        if let Ok(value) = env::var("PAGEFLOW_ASSET_PREFIX") {
            self.assets.prefix = value;
        }
        if let Ok(value) = env::var("PAGEFLOW_BIND") {
            self.bind = value;
        }
        Ok(())
    }

    /// Check value constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_sessions < -1 {
            return Err(validation_error(
                "session.maxSessions",
                "must be -1 (unlimited) or a non-negative count",
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(validation_error("session.cookieName", "must not be empty"));
        }
        if !self.session.delete_path.starts_with('/') {
            return Err(validation_error("session.deletePath", "must start with '/'"));
        }
        if !self.assets.prefix.starts_with('/') {
            return Err(validation_error("assets.prefix", "must start with '/'"));
        }
        if let Some(level) = &self.logging.level {
            if logging::parse_level(level).is_none() {
                return Err(validation_error("logging.level", "unknown log level"));
            }
        }
        self.bind_addr()?;
        Ok(())
    }
}

fn validation_error(path: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pageflow")
}

/// Resolve the configuration file path.
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("PAGEFLOW_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    state_dir().join("pageflow.json5")
}

/// Load, override and validate the configuration from the default path.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load, override and validate the configuration from `path`.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = load_config_uncached(path)?;
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Parse the file at `path` without overrides or validation.
pub fn load_config_uncached(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        debug!(target: targets::CONFIG, path = %path.display(), "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut value = parse_json5(&content, path)?;
    substitute_env_vars(&mut value)?;

    serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Parse JSON5 content
fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Substitute environment variables in string values.
/// Pattern: ${VAR} where VAR matches [A-Z_][A-Z0-9_]*
/// Escape with $${VAR} to get literal ${VAR}
fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_env_in_string(s)?;
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

static ENV_VAR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\$?\{([A-Z_][A-Z0-9_]*)\}").ok());

/// Substitute environment variables in a single string
fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    let Some(pattern) = ENV_VAR_PATTERN.as_ref() else {
        return Ok(s.to_string());
    };

    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;

    for caps in pattern.captures_iter(s) {
        let (Some(full_match), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let var_name = var.as_str();

        result.push_str(&s[last_end..full_match.start()]);

        if full_match.as_str().starts_with("$$") {
            result.push_str(&format!("${{{}}}", var_name));
        } else {
            let value = env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
                var: var_name.to_string(),
            })?;
            result.push_str(&value);
        }

        last_end = full_match.end();
    }

    result.push_str(&s[last_end..]);
    Ok(result)
}

/// Serializes tests that read or modify `PAGEFLOW_*` environment variables
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    const OVERRIDE_VARS: [&str; 4] = [
        "PAGEFLOW_ENV",
        "PAGEFLOW_MAX_SESSIONS",
        "PAGEFLOW_ASSET_PREFIX",
        "PAGEFLOW_BIND",
    ];

    fn clear_overrides() {
        for var in OVERRIDE_VARS {
            env::remove_var(var);
        }
    }

    /// Helper to create a temp config file
    fn create_temp_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.env, Environment::Production);
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.session.max_sessions, -1);
        assert_eq!(config.session_cap(), SessionCap::Unlimited);
        assert_eq!(config.session.cookie_name, "session");
        assert_eq!(config.session.delete_path, "/sessions/delete");
        assert_eq!(config.assets.prefix, "/assets/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_not_exists_returns_defaults() {
        let path = PathBuf::from("/nonexistent/path/pageflow.json5");
        let config = load_config_uncached(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_parse_json5_file() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(
            &dir,
            "pageflow.json5",
            r#"{
                // development settings
                env: "dev",
                session: { maxSessions: 2, grouping: "fingerprint", secureCookie: true },
                assets: { prefix: "/static/" },
                page: { title: "Portal", scripts: ["/static/app.js"] },
                menus: { admin: [{ name: "Users", href: "/admin/users" }] },
            }"#,
        );

        let config = load_config_uncached(&path).unwrap();
        assert_eq!(config.env, Environment::Development);
        assert_eq!(config.session_cap(), SessionCap::Limited(2));
        assert_eq!(config.session.grouping, SessionGrouping::Fingerprint);
        assert!(config.session.secure_cookie);
        assert_eq!(config.session.cookie_name, "session");
        assert_eq!(config.assets.prefix, "/static/");

        let page = config.page_prototype().instantiate();
        assert_eq!(page.title, "Portal");
        assert_eq!(page.scripts, vec!["/static/app.js"]);
        assert!(page.header.is_some());

        let nav = config.menu().get("admin", "/admin/users").unwrap();
        assert!(nav[0].is_active);
    }

    #[test]
    fn test_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(&dir, "bad.json5", "{ not valid");
        let result = load_config_uncached(&path);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(&dir, "typed.json5", r#"{ session: { maxSessions: "two" } }"#);
        let result = load_config_uncached(&path);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_validation_rules() {
        let mut config = AppConfig::default();
        config.session.max_sessions = -2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref path, .. }) if path == "session.maxSessions"
        ));

        let mut config = AppConfig::default();
        config.assets.prefix = "assets/".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.delete_path = "delete".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.cookie_name = " ".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.bind = "not-an-address".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = Some("chatty".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_overrides();
        env::set_var("PAGEFLOW_ENV", "development");
        env::set_var("PAGEFLOW_MAX_SESSIONS", "3");
        env::set_var("PAGEFLOW_ASSET_PREFIX", "/public/");
        env::set_var("PAGEFLOW_BIND", "0.0.0.0:9000");

        let mut config = AppConfig::default();
        config.apply_env_overrides().unwrap();
        clear_overrides();

        assert!(config.env.is_development());
        assert_eq!(config.session_cap(), SessionCap::Limited(3));
        assert_eq!(config.assets.prefix, "/public/");
        assert_eq!(config.bind_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_invalid_env_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_overrides();
        env::set_var("PAGEFLOW_MAX_SESSIONS", "lots");

        let mut config = AppConfig::default();
        let result = config.apply_env_overrides();
        clear_overrides();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvOverride { ref var, .. }) if var == "PAGEFLOW_MAX_SESSIONS"
        ));
    }

    #[test]
    fn test_load_config_from_validates() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_overrides();
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(&dir, "pageflow.json5", r#"{ assets: { prefix: "nope" } }"#);
        let result = load_config_from(&path);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_env_var_substitution() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("PAGEFLOW_TEST_STORE", "/tmp/pageflow-sessions");

        let dir = TempDir::new().unwrap();
        let path = create_temp_config(
            &dir,
            "pageflow.json5",
            r#"{ session: { storePath: "${PAGEFLOW_TEST_STORE}" } }"#,
        );
        let config = load_config_uncached(&path).unwrap();
        env::remove_var("PAGEFLOW_TEST_STORE");

        assert_eq!(config.store_path(), PathBuf::from("/tmp/pageflow-sessions"));
    }

    #[test]
    fn test_env_var_escaped() {
        let result = substitute_env_in_string("$${ESCAPED_VAR}").unwrap();
        assert_eq!(result, "${ESCAPED_VAR}");
    }

    #[test]
    fn test_env_var_missing() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("NONEXISTENT_VAR_12345");
        let result = substitute_env_in_string("${NONEXISTENT_VAR_12345}");

        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar { var }) if var == "NONEXISTENT_VAR_12345")
        );
    }

    #[test]
    fn test_get_config_path_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("PAGEFLOW_CONFIG_PATH", "/custom/path/pageflow.json5");
        let path = get_config_path();
        env::remove_var("PAGEFLOW_CONFIG_PATH");
        assert_eq!(path, PathBuf::from("/custom/path/pageflow.json5"));
    }

    #[test]
    fn test_get_config_path_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("PAGEFLOW_CONFIG_PATH");
        assert!(get_config_path().ends_with(".pageflow/pageflow.json5"));
    }

    #[test]
    fn test_log_config_follows_environment() {
        let mut config = AppConfig::default();
        assert_eq!(config.log_config().format, LogFormat::Json);

        config.env = Environment::Development;
        config.logging.level = Some("warn".into());
        let log = config.log_config();
        assert_eq!(log.format, LogFormat::Plaintext);
        assert_eq!(log.default_level, tracing::Level::WARN);
    }
}
