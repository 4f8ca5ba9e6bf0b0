//! Query criteria for reading connection records back.

use super::types::ConnectionRecord;
use chrono::{DateTime, Utc};

/// Every criterion left to `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionFilter {
    pub service: Option<String>,
    pub ip: Option<String>,
    /// Inclusive lower bound on the connection timestamp
    pub since: Option<DateTime<Utc>>,
}

impl ConnectionFilter {
    pub fn by_service<S: Into<String>>(service: S) -> Self {
        Self {
            service: Some(service.into()),
            ..Default::default()
        }
    }

    pub fn by_ip<S: Into<String>>(ip: S) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &ConnectionRecord) -> bool {
        self.service.as_ref().map_or(true, |s| *s == record.service)
            && self.ip.as_ref().map_or(true, |ip| *ip == record.ip)
            && self.since.map_or(true, |t| record.timestamp >= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::NewConnection;

    #[test]
    fn test_matches() {
        let now = Utc::now();
        let record = ConnectionRecord::from_new(
            1,
            &NewConnection {
                ip: "203.0.113.9".into(),
                port: 2121,
                service: "ftp".into(),
                timestamp: now,
                geo: None,
            },
        );

        assert!(ConnectionFilter::default().matches(&record));
        assert!(ConnectionFilter::by_service("ftp").matches(&record));
        assert!(!ConnectionFilter::by_service("ssh").matches(&record));
        assert!(ConnectionFilter::by_ip("203.0.113.9").matches(&record));
        let later = ConnectionFilter {
            since: Some(now + chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!later.matches(&record));
    }
}
