//! IP geolocation lookups.
//!
//! The lookup never fails from the caller's point of view: local addresses resolve to a fixed
//! `Local` record without touching the network, and every transport or decoding problem is
//! logged and turned into `None`.

use crate::configuration::types::GeolocationSettings;
use crate::error_handling::types::GeolocationError;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Enrichment attached to a connection record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeoRecord {
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: Option<String>,
    /// Provider response as received
    pub raw: Option<String>,
}

impl GeoRecord {
    pub fn local() -> Self {
        Self {
            country: Some(String::from("Local")),
            city: Some(String::from("Local")),
            raw: Some(String::from(r#"{"country":"Local","city":"Local"}"#)),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord>;
}

/// Locator used when enrichment is turned off.
pub struct DisabledLocator;

#[async_trait]
impl GeoLocator for DisabledLocator {
    async fn lookup(&self, _ip: IpAddr) -> Option<GeoRecord> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    city: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    isp: Option<String>,
}

/// Locator querying an ip-api.com compatible JSON endpoint.
pub struct IpApiLocator {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiLocator {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GeolocationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeolocationError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    async fn fetch(&self, ip: IpAddr) -> Result<GeoRecord, GeolocationError> {
        let url = self.endpoint.replace("{ip}", &ip.to_string());
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeolocationError::RequestFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| GeolocationError::BadResponse(e.to_string()))?;

        let response: IpApiResponse = serde_json::from_value(body.clone())
            .map_err(|e| GeolocationError::BadResponse(e.to_string()))?;
        if response.status != "success" {
            return Err(GeolocationError::BadResponse(format!(
                "status {}: {}",
                response.status,
                response.message.unwrap_or_default()
            )));
        }

        Ok(GeoRecord {
            country: response.country,
            city: response.city,
            region: response.region_name,
            lat: response.lat,
            lon: response.lon,
            isp: response.isp,
            raw: Some(body.to_string()),
        })
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord> {
        if is_local(ip) {
            return Some(GeoRecord::local());
        }
        match self.fetch(ip).await {
            Ok(record) => {
                debug!("geolocated {} to {:?}/{:?}", ip, record.country, record.city);
                Some(record)
            }
            Err(e) => {
                warn!("Geolocation lookup for {} failed: {}", ip, e);
                None
            }
        }
    }
}

/// Builds the locator described by the configuration.
pub fn from_settings(settings: &GeolocationSettings) -> Box<dyn GeoLocator> {
    if !settings.enabled {
        return Box::new(DisabledLocator);
    }
    match IpApiLocator::new(
        &settings.endpoint,
        Duration::from_secs(settings.timeout_secs),
    ) {
        Ok(locator) => Box::new(locator),
        Err(e) => {
            warn!("Geolocation disabled: {}", e);
            Box::new(DisabledLocator)
        }
    }
}

/// Loopback, unspecified, private and link-local addresses.
pub fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_v4(v4),
            None => is_local_v6(v6),
        },
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_unspecified() || ip.is_private() || ip.is_link_local()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
}
