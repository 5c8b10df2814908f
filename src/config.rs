//! Server configuration.
//!
//! The builder only consumes a resolved [`ServerConfig`]. [`ConfigLoader`]
//! produces one from layered sources, later layers winning:
//!
//! 1. defaults
//! 2. `config.toml`
//! 3. `config.{environment}.toml`
//! 4. environment variables: `APP_ENV`, `APP_HOST`, `APP_PORT`,
//!    `READ_TIMEOUT`, `WRITE_TIMEOUT`, `IDLE_TIMEOUT`
//!
//! Missing files are skipped. A file that exists but does not parse, or a
//! variable that does not parse, is an error. [`ConfigLoader::file`] swaps
//! the two file layers for one explicit file, which then must exist.
//!
//! Free-form `[app]` and `[custom]` tables are carried through untouched;
//! later layers add to them key by key.
//!
//! ```toml
//! environment = "production"
//! host = "0.0.0.0"
//! port = 9000
//! read_timeout = 10
//!
//! [app]
//! name = "inventory"
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const ENV_ENVIRONMENT: &str = "APP_ENV";
pub const ENV_HOST: &str = "APP_HOST";
pub const ENV_PORT: &str = "APP_PORT";
pub const ENV_READ_TIMEOUT: &str = "READ_TIMEOUT";
pub const ENV_WRITE_TIMEOUT: &str = "WRITE_TIMEOUT";
pub const ENV_IDLE_TIMEOUT: &str = "IDLE_TIMEOUT";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value `{value}` for {key}")]
    InvalidVar { key: &'static str, value: String },

    #[error("unknown environment `{0}` (expected development, staging, production or testing)")]
    UnknownEnvironment(String),
}

// ── Environment ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
    Testing,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging     => "staging",
            Self::Production  => "production",
            Self::Testing     => "testing",
        }
    }

    pub fn is_development(self) -> bool { self == Self::Development }
    pub fn is_staging(self) -> bool { self == Self::Staging }
    pub fn is_production(self) -> bool { self == Self::Production }
    pub fn is_testing(self) -> bool { self == Self::Testing }
}

/// Case-insensitive.
impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging"     => Ok(Self::Staging),
            "production"  => Ok(Self::Production),
            "testing"     => Ok(Self::Testing),
            _             => Err(ConfigError::UnknownEnvironment(s.to_owned())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ServerConfig ──────────────────────────────────────────────────────────────

/// Resolved server settings. Timeouts are in seconds.
///
/// Zero and empty values mean "keep the builder default" when handed to
/// [`ServerBuilder::with_configuration`](crate::ServerBuilder::with_configuration).
/// `app` and `custom` are application-owned; servekit never reads them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub idle_timeout: u64,
    pub app: toml::Table,
    pub custom: toml::Table,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            host: String::new(),
            port: 8080,
            read_timeout: 15,
            write_timeout: 15,
            idle_timeout: 60,
            app: toml::Table::new(),
            custom: toml::Table::new(),
        }
    }
}

impl ServerConfig {
    pub fn log(&self) {
        info!(
            environment = %self.environment,
            host = %self.host,
            port = self.port,
            read_timeout = self.read_timeout,
            write_timeout = self.write_timeout,
            idle_timeout = self.idle_timeout,
            "configuration loaded",
        );
    }

    fn merge(&mut self, layer: ConfigLayer) {
        if let Some(v) = layer.environment { self.environment = v; }
        if let Some(v) = layer.host { self.host = v; }
        if let Some(v) = layer.port { self.port = v; }
        if let Some(v) = layer.read_timeout { self.read_timeout = v; }
        if let Some(v) = layer.write_timeout { self.write_timeout = v; }
        if let Some(v) = layer.idle_timeout { self.idle_timeout = v; }
        self.app.extend(layer.app);
        self.custom.extend(layer.custom);
    }
}

/// One source's contribution. Absent keys leave earlier layers untouched.
#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    environment: Option<Environment>,
    host: Option<String>,
    port: Option<u16>,
    read_timeout: Option<u64>,
    write_timeout: Option<u64>,
    idle_timeout: Option<u64>,
    #[serde(default)]
    app: toml::Table,
    #[serde(default)]
    custom: toml::Table,
}

impl ConfigLayer {
    fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ConfigError::Io { path: path.to_owned(), source }),
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
    }

    fn from_vars(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            environment: lookup(ENV_ENVIRONMENT).map(|v| v.parse()).transpose()?,
            host: lookup(ENV_HOST),
            port: parse_var(lookup, ENV_PORT)?,
            read_timeout: parse_var(lookup, ENV_READ_TIMEOUT)?,
            write_timeout: parse_var(lookup, ENV_WRITE_TIMEOUT)?,
            idle_timeout: parse_var(lookup, ENV_IDLE_TIMEOUT)?,
            ..Self::default()
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar { key, value })
        })
        .transpose()
}

// ── ConfigLoader ──────────────────────────────────────────────────────────────

/// Resolves a [`ServerConfig`] from defaults, TOML files, and the environment.
#[derive(Clone, Debug)]
pub struct ConfigLoader {
    dir: PathBuf,
    base_name: String,
    file: Option<PathBuf>,
    use_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self { dir: PathBuf::from("."), base_name: "config".to_owned(), file: None, use_env: true }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory the configuration files are looked up in. Defaults to `.`.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// File stem; `"config"` reads `config.toml` and `config.{env}.toml`.
    pub fn base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = name.into();
        self
    }

    /// Read exactly this file instead of `config.toml` and
    /// `config.{env}.toml`. Unlike those, a missing file is an error.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Skip the environment-variable layer.
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn load(&self) -> Result<ServerConfig, ConfigError> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load), reading variables through `lookup`.
    pub fn load_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ServerConfig, ConfigError> {
        let mut config = ServerConfig::default();

        let vars =
            if self.use_env { ConfigLayer::from_vars(&lookup)? } else { ConfigLayer::default() };

        if let Some(path) = &self.file {
            let layer = ConfigLayer::from_file(path)?.ok_or_else(|| ConfigError::Io {
                path: path.clone(),
                source: std::io::ErrorKind::NotFound.into(),
            })?;
            debug!(path = %path.display(), "applying configuration file");
            config.merge(layer);
        } else {
            let base = self.dir.join(format!("{}.toml", self.base_name));
            self.apply_file(&mut config, &base)?;

            // The environment-specific file is chosen by the most specific
            // environment known so far: the variable if set, else the base file.
            let environment = vars.environment.unwrap_or(config.environment);
            let specific = self.dir.join(format!("{}.{}.toml", self.base_name, environment));
            self.apply_file(&mut config, &specific)?;
        }

        config.merge(vars);
        config.log();
        Ok(config)
    }

    fn apply_file(&self, config: &mut ServerConfig, path: &Path) -> Result<(), ConfigError> {
        match ConfigLayer::from_file(path)? {
            Some(layer) => {
                debug!(path = %path.display(), "applying configuration file");
                config.merge(layer);
            }
            None => debug!(path = %path.display(), "configuration file not found, skipping"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_any_source() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::new().dir(dir.path()).load_with(vars(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn layers_apply_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "environment = \"staging\"\nport = 9000\nread_timeout = 5\n",
        )
        .unwrap();
        fs::write(dir.path().join("config.staging.toml"), "port = 9100\nhost = \"127.0.0.1\"\n")
            .unwrap();

        let config = ConfigLoader::new()
            .dir(dir.path())
            .load_with(vars(&[("IDLE_TIMEOUT", "90")]))
            .unwrap();

        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.read_timeout, 5);
        assert_eq!(config.write_timeout, 15);
        assert_eq!(config.idle_timeout, 90);
    }

    #[test]
    fn environment_variable_selects_the_specific_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.production.toml"), "port = 443\n").unwrap();

        let config = ConfigLoader::new()
            .dir(dir.path())
            .load_with(vars(&[("APP_ENV", "Production"), ("APP_HOST", "0.0.0.0")]))
            .unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.port, 443);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn bad_inputs_are_errors() {
        let dir = TempDir::new().unwrap();
        let err = ConfigLoader::new().dir(dir.path()).load_with(vars(&[("APP_PORT", "eighty")]));
        assert!(matches!(err, Err(ConfigError::InvalidVar { key: "APP_PORT", .. })));

        let err = ConfigLoader::new().dir(dir.path()).load_with(vars(&[("APP_ENV", "qa")]));
        assert!(matches!(err, Err(ConfigError::UnknownEnvironment(_))));

        fs::write(dir.path().join("config.toml"), "port = \"not a number\"\n").unwrap();
        let err = ConfigLoader::new().dir(dir.path()).without_env().load();
        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn explicit_file_replaces_the_file_layers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "port = 9000\n").unwrap();
        let explicit = dir.path().join("service.toml");
        fs::write(&explicit, "port = 7000\n[app]\nname = \"inventory\"\n").unwrap();

        let config = ConfigLoader::new()
            .dir(dir.path())
            .file(&explicit)
            .load_with(vars(&[("APP_HOST", "10.0.0.1")]))
            .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.app["name"].as_str(), Some("inventory"));

        let missing = ConfigLoader::new().file(dir.path().join("nope.toml")).without_env().load();
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn free_form_tables_merge_key_by_key() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[app]\nname = \"inventory\"\nreplicas = 2\n[custom]\nflag = true\n",
        )
        .unwrap();
        fs::write(dir.path().join("config.development.toml"), "[app]\nreplicas = 1\n").unwrap();

        let config = ConfigLoader::new().dir(dir.path()).load_with(vars(&[])).unwrap();
        assert_eq!(config.app["name"].as_str(), Some("inventory"));
        assert_eq!(config.app["replicas"].as_integer(), Some(1));
        assert_eq!(config.custom["flag"].as_bool(), Some(true));
    }
}
