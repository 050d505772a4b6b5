//! Locating, reading and writing `serial-stream.toml`.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use crate::port::Parity;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Prefix shared by every variable the loader reads.
const ENV_PREFIX: &str = "SERIAL_STREAM";

/// File looked for in the working directory.
const LOCAL_FILE: &str = "serial-stream.toml";

/// Per-user location, relative to the platform config directory.
const USER_FILE: [&str; 2] = ["serial-stream", "config.toml"];

/// A configuration and the file it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    config: Config,
}

impl ConfigLoader {
    /// Load the first file on the search path, or defaults if there is none,
    /// then apply environment overrides.
    pub fn load() -> ConfigResult<Self> {
        match search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::read(path),
            None => Self::with_defaults(),
        }
    }

    /// Load `path`, which must exist, then apply environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        Self::read(path.to_path_buf())
    }

    /// Built-in defaults plus environment overrides.
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env(&mut config)?;
        Ok(Self { path: None, config })
    }

    fn read(path: PathBuf) -> ConfigResult<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.check_aliases()?;
        apply_env(&mut config)?;
        Ok(Self {
            path: Some(path),
            config,
        })
    }

    /// The file the configuration was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Write the configuration to `path` as TOML, creating parent
    /// directories as needed.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_error = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let text = toml::to_string_pretty(&self.config)?;
        fs::write(path, text).map_err(write_error)
    }
}

/// Candidate files, highest priority first. `SERIAL_STREAM_CONFIG` is
/// included only when set.
fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(3);
    if let Some(explicit) = env::var_os(format!("{ENV_PREFIX}_CONFIG")) {
        paths.push(PathBuf::from(explicit));
    }
    paths.push(PathBuf::from(LOCAL_FILE));
    if let Some(dir) = user_config_dir() {
        paths.push(USER_FILE.iter().fold(dir, |dir, part| dir.join(part)));
    }
    paths
}

#[cfg(windows)]
fn user_config_dir() -> Option<PathBuf> {
    env::var_os("APPDATA").map(PathBuf::from)
}

#[cfg(not(windows))]
fn user_config_dir() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

/// Raw value of `SERIAL_STREAM_<key>`.
fn env_value(key: &str) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}_{key}");
    env::var(&var).ok().map(|value| (var, value))
}

/// `SERIAL_STREAM_<key>` parsed as `T`.
fn env_parsed<T: FromStr>(key: &str) -> ConfigResult<Option<T>> {
    let Some((var, value)) = env_value(key) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::Env { var, value }),
    }
}

/// Fold `SERIAL_STREAM_PORT_*` and `SERIAL_STREAM_LOG_LEVEL` into `config`.
fn apply_env(config: &mut Config) -> ConfigResult<()> {
    let port = &mut config.port;
    if let Some((_, name)) = env_value("PORT_NAME") {
        port.name = name;
    }
    if let Some(baud) = env_parsed::<u32>("PORT_BAUD")? {
        port.baud = baud;
    }
    if let Some(parity) = env_parsed::<Parity>("PORT_PARITY")? {
        port.parity = parity;
    }
    if let Some(timeout_ms) = env_parsed::<u32>("PORT_TIMEOUT_MS")? {
        port.timeout_ms = timeout_ms;
    }
    if let Some((_, level)) = env_value("LOG_LEVEL") {
        config.logging.level = level;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config(), &Config::default());
        assert!(loader.path().is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides_port() {
        env::set_var("SERIAL_STREAM_PORT_BAUD", " 57600 ");
        env::set_var("SERIAL_STREAM_PORT_NAME", "COM99");
        env::set_var("SERIAL_STREAM_PORT_PARITY", "even");

        let config = ConfigLoader::with_defaults().map(ConfigLoader::into_config);

        env::remove_var("SERIAL_STREAM_PORT_BAUD");
        env::remove_var("SERIAL_STREAM_PORT_NAME");
        env::remove_var("SERIAL_STREAM_PORT_PARITY");

        let config = config.unwrap();
        assert_eq!(config.port.baud, 57600);
        assert_eq!(config.port.name, "COM99");
        assert_eq!(config.port.parity, Parity::Even);
    }

    #[test]
    #[serial]
    fn test_bad_env_value_names_variable() {
        env::set_var("SERIAL_STREAM_PORT_TIMEOUT_MS", "soon");
        let result = ConfigLoader::with_defaults();
        env::remove_var("SERIAL_STREAM_PORT_TIMEOUT_MS");

        match result {
            Err(ConfigError::Env { var, value }) => {
                assert_eq!(var, "SERIAL_STREAM_PORT_TIMEOUT_MS");
                assert_eq!(value, "soon");
            }
            other => panic!("Expected env error, got: {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_explicit_path_searched_first() {
        env::set_var("SERIAL_STREAM_CONFIG", "/tmp/elsewhere.toml");
        let paths = search_paths();
        env::remove_var("SERIAL_STREAM_CONFIG");

        assert_eq!(paths[0], PathBuf::from("/tmp/elsewhere.toml"));
        assert_eq!(paths[1], PathBuf::from(LOCAL_FILE));
        assert!(paths.len() <= 3);
    }

    #[test]
    #[serial]
    fn test_user_file_under_config_home() {
        env::set_var("XDG_CONFIG_HOME", "/home/someone/.cfg");
        let paths = search_paths();
        env::remove_var("XDG_CONFIG_HOME");

        if cfg!(not(windows)) {
            assert_eq!(
                paths.last(),
                Some(&PathBuf::from("/home/someone/.cfg/serial-stream/config.toml"))
            );
        }
    }

    #[test]
    #[serial]
    fn test_load_from_missing_file() {
        let err = ConfigLoader::load_from("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }
}
