use crate::configuration::types::ServiceKind;
use crate::session_management::session::Session;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Length of the hexadecimal session token
const SESSION_ID_LEN: usize = 8;

/// The structure related to session management
///
/// Concurrent map from session identifier to the metadata of a live connection. Handlers
/// register on accept, append captured commands during the conversation and remove their entry
/// on disconnect.
///
/// Tokens come from a counter started at a random offset, so two registries rarely share
/// tokens and one registry repeats a token only after 2^32 sessions.
pub struct SessionRegistry {
    active: RwLock<HashMap<String, Session>>,
    next_id: AtomicU32,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(Uuid::new_v4().as_u128() as u32),
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, ip: IpAddr, service: ServiceKind) -> String {
        let token = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("{:0width$x}", token, width = SESSION_ID_LEN);
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        active.insert(id.clone(), Session::new(id.clone(), ip, service));
        id
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        active.get(id).cloned()
    }

    pub fn append_command(&self, id: &str, command: &str) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = active.get_mut(id) {
            session.command_history.push(command.to_string());
        }
    }

    pub fn end_session(&self, id: &str) -> Option<Session> {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        active.remove(id)
    }

    pub fn get_active_session_count(&self) -> usize {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_session_lifecycle() {
        let registry = SessionRegistry::new();
        let ip: IpAddr = "203.0.113.4".parse().unwrap();

        let id = registry.create_session(ip, ServiceKind::Telnet);
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        registry.append_command(&id, "LOGIN ATTEMPT: USER=root");
        registry.append_command(&id, "uname -a");
        let session = registry.get_session(&id).unwrap();
        assert_eq!(session.service, ServiceKind::Telnet);
        assert_eq!(session.command_history, vec!["LOGIN ATTEMPT: USER=root", "uname -a"]);

        assert!(registry.end_session(&id).is_some());
        assert!(registry.get_session(&id).is_none());
        assert!(registry.end_session(&id).is_none());
        assert_eq!(registry.get_active_session_count(), 0);
    }

    #[test]
    fn test_concurrent_sessions_get_unique_ids() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| registry.create_session("127.0.0.1".parse().unwrap(), ServiceKind::Nc))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(registry.get_active_session_count(), 2000);
    }

    #[test]
    fn test_ended_sessions_leave_nothing_behind() {
        let registry = SessionRegistry::new();
        let ip: IpAddr = "198.51.100.20".parse().unwrap();

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = registry.create_session(ip, ServiceKind::Redis);
            assert!(seen.insert(id.clone()));
            assert!(registry.end_session(&id).is_some());
        }
        assert_eq!(registry.get_active_session_count(), 0);
        let active = registry.active.read().unwrap();
        assert!(active.is_empty());
    }

    #[test]
    fn test_ids_wrap_at_the_token_width() {
        let registry = SessionRegistry {
            active: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(u32::MAX),
        };
        let ip: IpAddr = "198.51.100.21".parse().unwrap();
        assert_eq!(registry.create_session(ip, ServiceKind::Ftp), "ffffffff");
        assert_eq!(registry.create_session(ip, ServiceKind::Ftp), "00000000");
    }
}
