use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The six emulated protocols.
///
/// The lowercase variant name is used everywhere a service is named: in TOML (`kind = "ftp"`),
/// in log lines (`[Service: ftp]`) and in the `service` column of persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Ssh,
    Telnet,
    Ftp,
    Http,
    Redis,
    Nc,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Ssh,
        ServiceKind::Ftp,
        ServiceKind::Http,
        ServiceKind::Telnet,
        ServiceKind::Nc,
        ServiceKind::Redis,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Ssh => "ssh",
            ServiceKind::Telnet => "telnet",
            ServiceKind::Ftp => "ftp",
            ServiceKind::Http => "http",
            ServiceKind::Redis => "redis",
            ServiceKind::Nc => "nc",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ServiceKind::Ssh => 2222,
            ServiceKind::Ftp => 2121,
            ServiceKind::Http => 8080,
            ServiceKind::Telnet => 2323,
            ServiceKind::Nc => 4444,
            ServiceKind::Redis => 6379,
        }
    }

    /// Whether the dwell controller holds the socket open once the conversation ends.
    pub fn holds_socket(&self) -> bool {
        matches!(
            self,
            ServiceKind::Ftp | ServiceKind::Telnet | ServiceKind::Nc | ServiceKind::Http
        )
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One listening service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub kind: ServiceKind,
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Replaces the greeting the handler sends first (FTP, Telnet, raw) or the HTTP page body.
    #[serde(default)]
    pub banner_response: Option<String>,
}

impl ServiceConfig {
    pub fn with_defaults(kind: ServiceKind) -> Self {
        Self {
            kind,
            port: kind.default_port(),
            enabled: true,
            banner_response: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Minimum wall-clock lifetime of a held connection
    pub min_session_secs: u64,
    pub read_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            min_session_secs: 120,
            read_timeout_secs: 300,
            handshake_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub database_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: String::from("sqlite://leurre.sqlite3?mode=rwc"),
        }
    }
}

/// Operating system persona presented by the fake shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsProfile {
    #[default]
    Ubuntu,
    Fedora,
}

impl fmt::Display for OsProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsProfile::Ubuntu => f.write_str("ubuntu"),
            OsProfile::Fedora => f.write_str("fedora"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSettings {
    pub profile: OsProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Password attempt number that succeeds; every earlier attempt is rejected.
    pub accept_after_attempts: u32,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            accept_after_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationSettings {
    pub enabled: bool,
    /// Lookup URL, `{ip}` is substituted with the peer address
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for GeolocationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::from(
                "http://ip-api.com/json/{ip}?fields=status,country,city,regionName,lat,lon,isp,query",
            ),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub model_path: Option<PathBuf>,
}
