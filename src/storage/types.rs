use crate::enrichment::geolocation::GeoRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection fields known when a socket is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConnection {
    pub ip: String,
    /// Local listening port the peer connected to
    pub port: u16,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub geo: Option<GeoRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: i64,
    pub ip: String,
    pub port: u16,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: Option<String>,
    pub raw_geo: Option<String>,
    pub session_duration_sec: i64,
}

impl ConnectionRecord {
    pub fn from_new(id: i64, new: &NewConnection) -> Self {
        let geo = new.geo.clone().unwrap_or_default();
        Self {
            id,
            ip: new.ip.clone(),
            port: new.port,
            service: new.service.clone(),
            timestamp: new.timestamp,
            country: geo.country,
            city: geo.city,
            region: geo.region,
            lat: geo.lat,
            lon: geo.lon,
            isp: geo.isp,
            raw_geo: geo.raw,
            session_duration_sec: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCommand {
    pub connection_id: i64,
    pub ip: String,
    pub service: String,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub attack_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: i64,
    pub connection_id: i64,
    pub ip: String,
    pub service: String,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub attack_category: Option<String>,
}

impl CommandRecord {
    pub fn from_new(id: i64, new: &NewCommand) -> Self {
        Self {
            id,
            connection_id: new.connection_id,
            ip: new.ip.clone(),
            service: new.service.clone(),
            command: new.command.clone(),
            timestamp: new.timestamp,
            attack_category: new.attack_category.clone(),
        }
    }
}
