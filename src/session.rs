//! Per-connection session state.
//!
//! A session is owned exclusively by its connection worker. It only tracks
//! identity: `Anonymous` until a successful LOGIN, `Authenticated(username)`
//! until LOGOUT or disconnect. The authoritative account state lives in the
//! account directory; the session never holds a reference into it.

use std::net::SocketAddr;

/// Identity context for one client connection.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    auth: Option<String>,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Session { peer, auth: None }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    /// Logged-in username, if any.
    pub fn username(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    /// Mark the session authenticated. Callers check the anonymous
    /// precondition first; the directory holds the cross-connection flag.
    pub fn authenticate(&mut self, username: String) {
        self.auth = Some(username);
    }

    /// Return to the anonymous state, yielding the username that was
    /// logged in so the caller can clear the directory flag.
    pub fn clear(&mut self) -> Option<String> {
        self.auth.take()
    }
}
