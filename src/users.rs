//! Per-connection user records.
//!
//! A record is created on a connect notice, enriched by whois responses,
//! moved on nick change and dropped on exit. Snapshots are shared with the
//! pending-check queue, so an exit can flip `connected` on a snapshot that
//! is still waiting for its debounce to elapse.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One connected client as the server notices describe it.
#[derive(Debug, Clone)]
pub struct User {
    pub ident: String,
    pub host: String,
    pub real_name: String,
    /// Absent means an i-line spoof hides the address.
    pub ip: Option<String>,
    pub account: Option<String>,
    pub secure: bool,
    pub connected: bool,
}

impl User {
    pub fn new(
        ident: impl Into<String>,
        host: impl Into<String>,
        real_name: impl Into<String>,
        ip: Option<String>,
    ) -> Self {
        User {
            ident: ident.into(),
            host: host.into(),
            real_name: real_name.into(),
            ip,
            account: None,
            secure: false,
            connected: true,
        }
    }
}

/// Shared handle to a user snapshot. The engine task is the only writer.
pub type UserRef = Arc<RwLock<User>>;

/// Current-user table keyed by nickname.
#[derive(Debug, Default)]
pub struct UserTable {
    users: HashMap<String, UserRef>,
}

impl UserTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly observed connection, returning its shared handle.
    pub fn insert(&mut self, nick: &str, user: User) -> UserRef {
        let user = Arc::new(RwLock::new(user));
        self.users.insert(nick.to_string(), Arc::clone(&user));
        user
    }

    pub fn get(&self, nick: &str) -> Option<UserRef> {
        self.users.get(nick).cloned()
    }

    /// Drop a user on exit, marking the snapshot disconnected so a
    /// queued check is skipped.
    pub fn remove(&mut self, nick: &str) -> Option<UserRef> {
        let user = self.users.remove(nick)?;
        user.write().connected = false;
        Some(user)
    }

    /// Move a record to its new nick. The old binding is gone immediately
    /// and the account is cleared until whois re-establishes it.
    pub fn rename(&mut self, old: &str, new: &str) -> Option<UserRef> {
        let user = self.users.remove(old)?;
        user.write().account = None;
        self.users.insert(new.to_string(), Arc::clone(&user));
        Some(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
