use crate::configuration::types::ServiceKind;
use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// In-memory metadata of one live connection. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Short opaque token correlating the log lines of one connection
    pub id: String,
    pub ip: IpAddr,
    pub service: ServiceKind,
    pub start_time: DateTime<Utc>,
    /// Captured commands, in arrival order
    pub command_history: Vec<String>,
}

impl Session {
    pub fn new(id: String, ip: IpAddr, service: ServiceKind) -> Self {
        Self {
            id,
            ip,
            service,
            start_time: Utc::now(),
            command_history: Vec::new(),
        }
    }
}
