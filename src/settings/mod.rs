//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables with the
//! `MC2_` prefix, using `__` to separate sections (e.g. `MC2_LAUNCHER__SSH__CONNECT_TIMEOUT=5`).
//! An example configuration file can be found in the `configs/` directory located in the
//! repository root.

use std::{
    env,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment};
use redis::{ConnectionInfo, IntoConnectionInfo};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub directory: DirectorySettings,
    pub log: LoggingSettings,
    #[serde(default)]
    pub pki: PkiSettings,
    #[validate]
    pub launcher: LauncherSettings,
    #[serde(default)]
    #[validate]
    pub federation: FederationSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("mc2")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Deserialize)]
/// Directory service settings.
pub struct DirectorySettings {
    /// The URL of the Redis instance shared by all parties of the federation.
    ///
    /// The format of the URL is `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [directory]
    /// url = "redis://127.0.0.1/"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// MC2_DIRECTORY__URL=redis://127.0.0.1/
    /// ```
    #[serde(deserialize_with = "deserialize_redis_url")]
    pub url: ConnectionInfo,
}

#[derive(Debug, Default, Deserialize)]
/// PKI settings.
pub struct PkiSettings {
    /// The file the public keys of the members are authorized in. Defaults to
    /// `$HOME/.ssh/authorized_keys`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [pki]
    /// authorized_keys = "/home/mc2/.ssh/authorized_keys"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// MC2_PKI__AUTHORIZED_KEYS=/home/mc2/.ssh/authorized_keys
    /// ```
    pub authorized_keys: Option<PathBuf>,
}

impl PkiSettings {
    /// The configured authorized keys file or the default one of the current user.
    pub fn authorized_keys(&self) -> PathBuf {
        match &self.authorized_keys {
            Some(path) => path.clone(),
            None => env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_default()
                .join(".ssh")
                .join("authorized_keys"),
        }
    }
}

#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_launcher"))]
/// Settings of the training job launcher.
pub struct LauncherSettings {
    /// The host list handed to the submission tool. One `host[:port]` entry per line.
    #[serde(default = "default_host_file")]
    pub host_file: PathBuf,

    /// The job submission tool.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [launcher]
    /// submit_program = "../dmlc-core/tracker/dmlc-submit"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// MC2_LAUNCHER__SUBMIT_PROGRAM=../dmlc-core/tracker/dmlc-submit
    /// ```
    pub submit_program: PathBuf,

    /// The cluster backend of the submission tool.
    #[serde(default = "default_cluster")]
    #[validate(length(min = 1))]
    pub cluster: String,

    /// The memory allocated to every worker, e.g. `4g`.
    #[serde(default = "default_worker_memory")]
    #[validate(length(min = 1))]
    pub worker_memory: String,

    /// The interpreter every worker runs the entry point with.
    pub interpreter: PathBuf,

    /// The training program of the workers.
    pub entry_point: PathBuf,

    /// The name of the training processes to terminate on every host before a launch.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [launcher]
    /// process_name = "train_model.py"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// MC2_LAUNCHER__PROCESS_NAME=train_model.py
    /// ```
    #[serde(default = "default_process_name")]
    pub process_name: String,

    /// The time a host gets to terminate its training processes, in seconds.
    #[serde(default = "default_termination_timeout")]
    #[validate(range(min = 1))]
    pub termination_timeout: u64,

    /// The number of hosts contacted at once while terminating training processes.
    #[serde(default = "default_max_concurrent_terminations")]
    #[validate(range(min = 1))]
    pub max_concurrent_terminations: usize,

    #[validate]
    pub ssh: SshSettings,
}

impl LauncherSettings {
    fn validate_launcher(&self) -> Result<(), ValidationError> {
        // the name ends up in a single quoted pattern of the remote kill command, with its
        // first character wrapped in a bracket expression
        let bracketable = !matches!(
            self.process_name.chars().next(),
            None | Some('[') | Some(']') | Some('^') | Some('\\')
        );
        if !bracketable || self.process_name.contains('\'') {
            return Err(ValidationError::new("invalid process name"));
        }
        Ok(())
    }
}

/// A wrapper for validate derive.
fn validate_launcher(s: &LauncherSettings) -> Result<(), ValidationError> {
    s.validate_launcher()
}

fn default_host_file() -> PathBuf {
    PathBuf::from("hosts.config")
}

fn default_cluster() -> String {
    "ssh".to_string()
}

fn default_worker_memory() -> String {
    "4g".to_string()
}

fn default_process_name() -> String {
    "train_model.py".to_string()
}

fn default_termination_timeout() -> u64 {
    30
}

fn default_max_concurrent_terminations() -> usize {
    16
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Settings of the ssh connections to the hosts.
pub struct SshSettings {
    /// Whether the host keys of the hosts are verified.
    ///
    /// There is no default: disabling the verification is only acceptable in a trusted network
    /// and must be an explicit decision.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [launcher.ssh]
    /// strict_host_key_checking = true
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// MC2_LAUNCHER__SSH__STRICT_HOST_KEY_CHECKING=true
    /// ```
    pub strict_host_key_checking: bool,

    /// The connection timeout, in seconds.
    #[serde(default = "default_connect_timeout")]
    #[validate(range(min = 1))]
    pub connect_timeout: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_federation"))]
/// Settings for waiting on a federation.
pub struct FederationSettings {
    /// The time between two checks of the quorum, in seconds.
    #[validate(range(min = 1))]
    pub poll_interval: u64,
    /// The time after which waiting for the quorum is given up, in seconds.
    pub poll_timeout: u64,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            poll_interval: 5,
            poll_timeout: 300,
        }
    }
}

impl FederationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout)
    }

    fn validate_federation(&self) -> Result<(), ValidationError> {
        if self.poll_timeout < self.poll_interval {
            return Err(ValidationError::new("invalid poll timeout"));
        }
        Ok(())
    }
}

/// A wrapper for validate derive.
fn validate_federation(s: &FederationSettings) -> Result<(), ValidationError> {
    s.validate_federation()
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// MC2_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3.17/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_redis_url<'de, D>(deserializer: D) -> Result<ConnectionInfo, D::Error>
where
    D: Deserializer<'de>,
{
    struct ConnectionInfoVisitor;

    impl<'de> Visitor<'de> for ConnectionInfoVisitor {
        type Value = ConnectionInfo;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]"
            )
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .into_connection_info()
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(ConnectionInfoVisitor)
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.3.17/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r#"
[directory]
url = "redis://127.0.0.1/"

[log]
filter = "info"

[launcher]
submit_program = "dmlc-submit"
interpreter = "/opt/conda/bin/python3"
entry_point = "/home/mc2/train_model.py"

[launcher.ssh]
strict_host_key_checking = false
"#;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn launcher() -> LauncherSettings {
        LauncherSettings {
            host_file: default_host_file(),
            submit_program: "dmlc-submit".into(),
            cluster: default_cluster(),
            worker_memory: default_worker_memory(),
            interpreter: "python3".into(),
            entry_point: "train_model.py".into(),
            process_name: default_process_name(),
            termination_timeout: default_termination_timeout(),
            max_concurrent_terminations: default_max_concurrent_terminations(),
            ssh: SshSettings {
                strict_host_key_checking: true,
                connect_timeout: default_connect_timeout(),
            },
        }
    }

    #[test]
    fn test_settings_new() {
        assert!(Settings::new("configs/config.toml").is_ok());
        assert!(Settings::new("").is_err());
    }

    #[test]
    fn test_defaults() {
        let file = config_file(MINIMAL);
        let settings = Settings::new(file.path()).unwrap();

        assert_eq!(settings.launcher.host_file, Path::new("hosts.config"));
        assert_eq!(settings.launcher.cluster, "ssh");
        assert_eq!(settings.launcher.worker_memory, "4g");
        assert_eq!(settings.launcher.process_name, "train_model.py");
        assert_eq!(settings.launcher.ssh.connect_timeout, 10);
        assert!(!settings.launcher.ssh.strict_host_key_checking);
        assert_eq!(settings.federation.poll_interval(), Duration::from_secs(5));
        assert_eq!(settings.federation.poll_timeout(), Duration::from_secs(300));
        assert!(settings.pki.authorized_keys.is_none());
    }

    #[test]
    fn test_host_key_checking_is_required() {
        let file = config_file(&MINIMAL.replace("strict_host_key_checking = false", ""));
        assert!(matches!(
            Settings::new(file.path()),
            Err(SettingsError::Loading(_))
        ));
    }

    #[test]
    fn test_invalid_directory_url() {
        let file = config_file(&MINIMAL.replace("redis://127.0.0.1/", "http://127.0.0.1/"));
        assert!(matches!(
            Settings::new(file.path()),
            Err(SettingsError::Loading(_))
        ));
    }

    #[test]
    fn test_validate_launcher() {
        assert!(launcher().validate().is_ok());

        assert!(LauncherSettings {
            process_name: String::new(),
            ..launcher()
        }
        .validate()
        .is_err());
        assert!(LauncherSettings {
            process_name: "train'; rm -rf ~; '".into(),
            ..launcher()
        }
        .validate()
        .is_err());
        for name in &["[t]rain_model.py", "]x", "^train", "\\dtrain"] {
            assert!(LauncherSettings {
                process_name: name.to_string(),
                ..launcher()
            }
            .validate()
            .is_err());
        }
        assert!(LauncherSettings {
            process_name: "train-[v2].py".into(),
            ..launcher()
        }
        .validate()
        .is_ok());
        assert!(LauncherSettings {
            worker_memory: String::new(),
            ..launcher()
        }
        .validate()
        .is_err());
        assert!(LauncherSettings {
            termination_timeout: 0,
            ..launcher()
        }
        .validate()
        .is_err());
        assert!(LauncherSettings {
            max_concurrent_terminations: 0,
            ..launcher()
        }
        .validate()
        .is_err());

        let mut settings = launcher();
        settings.ssh.connect_timeout = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_federation() {
        assert!(FederationSettings::default().validate().is_ok());
        assert!(FederationSettings {
            poll_interval: 0,
            poll_timeout: 10,
        }
        .validate()
        .is_err());
        assert!(FederationSettings {
            poll_interval: 10,
            poll_timeout: 5,
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_authorized_keys() {
        let pki = PkiSettings {
            authorized_keys: Some("/tmp/authorized_keys".into()),
        };
        assert_eq!(pki.authorized_keys(), Path::new("/tmp/authorized_keys"));
        assert!(PkiSettings::default()
            .authorized_keys()
            .ends_with(".ssh/authorized_keys"));
    }
}
