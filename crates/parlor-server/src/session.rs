//! Session registry: connection -> session and the inverse user -> connection
//! map. Enforces the single-session-per-user invariant.

use std::collections::HashMap;

use parlor_shared::meta::UserSummary;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    SessionNotFound,

    #[error("user already online")]
    UserAlreadyOnline,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub logged_in: bool,
    pub user_id: String,
    pub nickname: String,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<u64, Session>,
    user_to_conn: HashMap<String, u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(&mut self, conn_id: u64) {
        self.sessions.insert(conn_id, Session::default());
    }

    pub fn remove_connection(&mut self, conn_id: u64) {
        if let Some(session) = self.sessions.remove(&conn_id) {
            if session.logged_in && !session.user_id.is_empty() {
                self.user_to_conn.remove(&session.user_id);
            }
        }
    }

    /// Upgrade a connection to logged-in. Refused while another connection
    /// owns the user id.
    pub fn login(
        &mut self,
        conn_id: u64,
        user_id: &str,
        nickname: &str,
    ) -> Result<(), SessionError> {
        if !self.sessions.contains_key(&conn_id) {
            return Err(SessionError::SessionNotFound);
        }
        if let Some(&existing) = self.user_to_conn.get(user_id) {
            if existing != conn_id {
                return Err(SessionError::UserAlreadyOnline);
            }
        }
        let session = self.sessions.get_mut(&conn_id).expect("checked above");
        session.logged_in = true;
        session.user_id = user_id.to_owned();
        session.nickname = nickname.to_owned();
        self.user_to_conn.insert(user_id.to_owned(), conn_id);
        Ok(())
    }

    /// Downgrade without dropping the connection.
    pub fn logout(&mut self, conn_id: u64) {
        if let Some(session) = self.sessions.get_mut(&conn_id) {
            if session.logged_in && !session.user_id.is_empty() {
                self.user_to_conn.remove(&session.user_id);
            }
            session.logged_in = false;
            session.user_id.clear();
            session.nickname.clear();
        }
    }

    pub fn is_logged_in(&self, conn_id: u64) -> bool {
        self.sessions
            .get(&conn_id)
            .map(|s| s.logged_in)
            .unwrap_or(false)
    }

    pub fn session(&self, conn_id: u64) -> Option<&Session> {
        self.sessions.get(&conn_id)
    }

    /// Snapshot of currently logged-in users.
    pub fn online_users(&self) -> Vec<UserSummary> {
        let mut users: Vec<UserSummary> = self
            .user_to_conn
            .values()
            .filter_map(|conn_id| self.sessions.get(conn_id))
            .map(|session| UserSummary {
                user_id: session.user_id.clone(),
                nickname: session.nickname.clone(),
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn try_get_conn(&self, user_id: &str) -> Option<u64> {
        self.user_to_conn.get(user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_logout_round_trip() {
        let mut registry = SessionRegistry::new();
        registry.add_connection(1);
        assert!(!registry.is_logged_in(1));

        registry.login(1, "alice", "Alice").unwrap();
        assert!(registry.is_logged_in(1));
        assert_eq!(registry.try_get_conn("alice"), Some(1));

        registry.logout(1);
        assert!(!registry.is_logged_in(1));
        assert_eq!(registry.try_get_conn("alice"), None);
    }

    #[test]
    fn second_session_for_same_user_is_refused() {
        let mut registry = SessionRegistry::new();
        registry.add_connection(1);
        registry.add_connection(2);

        registry.login(1, "alice", "Alice").unwrap();
        assert_eq!(
            registry.login(2, "alice", "Alice"),
            Err(SessionError::UserAlreadyOnline)
        );
        // The original session is unaffected.
        assert!(registry.is_logged_in(1));
        assert_eq!(registry.try_get_conn("alice"), Some(1));
    }

    #[test]
    fn relogin_on_same_connection_is_allowed() {
        let mut registry = SessionRegistry::new();
        registry.add_connection(1);
        registry.login(1, "alice", "Alice").unwrap();
        registry.login(1, "alice", "Alice").unwrap();
    }

    #[test]
    fn login_without_connection_fails() {
        let mut registry = SessionRegistry::new();
        assert_eq!(
            registry.login(9, "alice", "Alice"),
            Err(SessionError::SessionNotFound)
        );
    }

    #[test]
    fn remove_cleans_inverse_map() {
        let mut registry = SessionRegistry::new();
        registry.add_connection(1);
        registry.login(1, "alice", "Alice").unwrap();

        registry.remove_connection(1);
        assert_eq!(registry.try_get_conn("alice"), None);
        assert!(registry.online_users().is_empty());
    }

    #[test]
    fn online_users_lists_only_logged_in() {
        let mut registry = SessionRegistry::new();
        registry.add_connection(1);
        registry.add_connection(2);
        registry.login(1, "alice", "Alice").unwrap();

        let users = registry.online_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "alice");
    }
}
