use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Command-line surface of the `leurre` binary.
///
/// Every flag can also be given through a `LEURRE_*` environment variable. Values given here
/// take precedence over the ones read from the configuration file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "leurre")]
#[command(version)]
#[command(about = "A multi-protocol low-interaction honeypot")]
pub struct Cli {
    /// Path to a TOML configuration file. Built-in defaults are used when omitted.
    pub config_file: Option<PathBuf>,

    /// Address every listener binds to
    #[arg(long, env = "LEURRE_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// SeaORM connection string for the SQLite event store
    #[arg(long, env = "LEURRE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Minimum lifetime of held FTP, Telnet, raw and HTTP connections
    #[arg(long, env = "LEURRE_MIN_SESSION_SECS")]
    pub min_session_secs: Option<u64>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// Built from an optional TOML file, then patched with the [`Cli`] overrides and validated.
///
/// # Fields Overview
///
/// - `bind_address`: address shared by every listener
/// - `max_sessions`: per-service bound on concurrent connections, excess ones are dropped
/// - `session`: dwell time, read and handshake timeouts, shutdown grace period
/// - `storage`: event store backend
/// - `shell`: OS persona of the fake shell
/// - `ssh`: password acceptance policy
/// - `geolocation` / `classifier`: enrichment collaborators
/// - `services`: the listeners, one per protocol by default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub max_sessions: usize,
    pub session: SessionSettings,
    pub storage: StorageSettings,
    pub shell: ShellSettings,
    pub ssh: SshSettings,
    pub geolocation: GeolocationSettings,
    pub classifier: ClassifierSettings,
    pub services: Vec<ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            max_sessions: 256,
            session: SessionSettings::default(),
            storage: StorageSettings::default(),
            shell: ShellSettings::default(),
            ssh: SshSettings::default(),
            geolocation: GeolocationSettings::default(),
            classifier: ClassifierSettings::default(),
            services: ServiceKind::ALL
                .iter()
                .map(|k| ServiceConfig::with_defaults(*k))
                .collect(),
        }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// - `ConfigError::IoError` if the file cannot be read
    /// - `ConfigError::TomlError` if it is not valid TOML for this structure
    /// - any error returned by [`Config::validate`]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the runtime configuration from the parsed command line.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(addr) = &cli.bind_address {
            self.bind_address = addr.clone();
        }
        if let Some(url) = &cli.database_url {
            self.storage.database_url = url.clone();
        }
        if let Some(secs) = cli.min_session_secs {
            self.session.min_session_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;

        let mut seen = HashSet::new();
        for service in self.enabled_services() {
            if service.port == 0 {
                return Err(ConfigError::BadPortsRange(format!(
                    "service {} cannot listen on port 0",
                    service.kind
                )));
            }
            if !seen.insert(service.port) {
                return Err(ConfigError::BadPortsRange(format!(
                    "port {} is used by more than one service",
                    service.port
                )));
            }
        }
        if seen.is_empty() {
            return Err(ConfigError::ServicesEmpty(String::from(
                "at least one service must be enabled",
            )));
        }

        let positive = [
            ("max_sessions", self.max_sessions as u64),
            ("session.read_timeout_secs", self.session.read_timeout_secs),
            (
                "session.handshake_timeout_secs",
                self.session.handshake_timeout_secs,
            ),
            (
                "ssh.accept_after_attempts",
                self.ssh.accept_after_attempts as u64,
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotInRange(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadIPFormatting(self.bind_address.clone()))
    }

    pub fn enabled_services(&self) -> impl Iterator<Item = &ServiceConfig> {
        self.services.iter().filter(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_cover_every_protocol() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.min_session_secs, 120);
        assert_eq!(config.session.read_timeout_secs, 300);

        let ports: Vec<(ServiceKind, u16)> =
            config.services.iter().map(|s| (s.kind, s.port)).collect();
        assert!(ports.contains(&(ServiceKind::Ssh, 2222)));
        assert!(ports.contains(&(ServiceKind::Ftp, 2121)));
        assert!(ports.contains(&(ServiceKind::Http, 8080)));
        assert!(ports.contains(&(ServiceKind::Telnet, 2323)));
        assert!(ports.contains(&(ServiceKind::Nc, 4444)));
        assert!(ports.contains(&(ServiceKind::Redis, 6379)));
    }

    #[test]
    fn test_from_toml_str() {
        let config = Config::from_toml_str(
            r#"
            bind_address = "127.0.0.1"

            [session]
            min_session_secs = 10

            [shell]
            profile = "fedora"

            [[services]]
            kind = "ftp"
            port = 2121
            banner_response = "220 ProFTPD Server ready."

            [[services]]
            kind = "redis"
            port = 6380
            enabled = false
            "#,
        )
        .unwrap_or_else(|e| panic!("{}", e));

        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.session.min_session_secs, 10);
        assert_eq!(config.session.read_timeout_secs, 300);
        assert_eq!(config.shell.profile, OsProfile::Fedora);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.enabled_services().count(), 1);
        assert_eq!(
            config.services[0].banner_response.as_deref(),
            Some("220 ProFTPD Server ready.")
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.bind_address = String::from("not-an-ip");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadIPFormatting(_))
        ));

        let mut config = Config::default();
        config.services[1].port = config.services[0].port;
        assert!(matches!(config.validate(), Err(ConfigError::BadPortsRange(_))));

        let mut config = Config::default();
        config.services.iter_mut().for_each(|s| s.enabled = false);
        assert!(matches!(config.validate(), Err(ConfigError::ServicesEmpty(_))));

        let mut config = Config::default();
        config.ssh.accept_after_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NotInRange(_))));

        assert!(matches!(
            Config::from_toml_str("services = []"),
            Err(ConfigError::ServicesEmpty(_))
        ));
        assert!(matches!(
            Config::from_toml_str("max_sessions = \"many\""),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_load_with_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = \"127.0.0.1\"\n[session]\nmin_session_secs = 30").unwrap();

        let cli = Cli::try_parse_from([
            "leurre",
            file.path().to_str().unwrap(),
            "--min-session-secs",
            "0",
            "--database-url",
            "sqlite::memory:",
        ])
        .unwrap_or_else(|e| panic!("{}", e));

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.session.min_session_secs, 0);
        assert_eq!(config.storage.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_missing_file() {
        let cli = Cli {
            config_file: Some(PathBuf::from("/nonexistent/leurre.toml")),
            ..Default::default()
        };
        assert!(matches!(Config::load(&cli), Err(ConfigError::IoError(_))));
    }
}
