//! Shared account directory.
//!
//! The directory is the one piece of state every connection worker touches:
//! username -> {password, logged_in}. It is loaded from the store at startup
//! and written through on registration. All read-modify-write sequences
//! (duplicate-username checks, logged-in flag flips) happen under a single
//! mutex so concurrent LOGIN/REGISTER/LOGOUT from different connections
//! serialize here rather than in the protocol layer.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::{Store, StoreResult};

struct Entry {
    password: String,
    logged_in: bool,
}

/// Outcome of an atomic login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials matched and the logged-in flag was taken.
    Ok,
    /// Unknown username or wrong password.
    BadCredentials,
    /// Another session already holds this account.
    AlreadyLoggedIn,
}

/// In-memory account cache with atomic create/login/logout operations.
pub struct AccountDirectory {
    store: Arc<dyn Store>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl AccountDirectory {
    /// Load all accounts from the store. Every flag starts cleared; stale
    /// logged-in state never survives a restart.
    pub fn load(store: Arc<dyn Store>) -> StoreResult<Self> {
        let accounts = store.load_accounts()?;
        info!(count = accounts.len(), "Loaded accounts");

        let entries = accounts
            .into_iter()
            .map(|a| {
                (
                    a.username,
                    Entry {
                        password: a.password,
                        logged_in: false,
                    },
                )
            })
            .collect();

        Ok(AccountDirectory {
            store,
            entries: Mutex::new(entries),
        })
    }

    /// Create an account, enforcing username uniqueness against both the
    /// cache and the store under one lock.
    pub fn try_create(&self, username: &str, password: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(username) {
            return Err(crate::store::StoreError::Conflict);
        }
        self.store.create_account(username, password)?;
        entries.insert(
            username.to_string(),
            Entry {
                password: password.to_string(),
                logged_in: false,
            },
        );
        Ok(())
    }

    /// Atomic credential check plus logged-in flag acquisition.
    ///
    /// Check order matches the wire protocol: unknown user and wrong
    /// password both report bad credentials; a busy account reports
    /// already-logged-in before the password is compared.
    pub fn login(&self, username: &str, password: &str) -> LoginOutcome {
        let mut entries = self.entries.lock();
        let entry = match entries.get_mut(username) {
            Some(entry) => entry,
            None => return LoginOutcome::BadCredentials,
        };
        if entry.logged_in {
            return LoginOutcome::AlreadyLoggedIn;
        }
        if entry.password != password {
            return LoginOutcome::BadCredentials;
        }
        entry.logged_in = true;
        LoginOutcome::Ok
    }

    /// Clear the logged-in flag. Idempotent; also invoked on worker
    /// teardown so a dropped connection never leaves the account stuck.
    pub fn logout(&self, username: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(username) {
            if entry.logged_in {
                entry.logged_in = false;
                debug!(username, "Cleared logged-in flag");
            }
        }
    }

    pub fn exists(&self, username: &str) -> bool {
        self.entries.lock().contains_key(username)
    }

    #[cfg(test)]
    pub fn is_logged_in(&self, username: &str) -> bool {
        self.entries
            .lock()
            .get(username)
            .map(|e| e.logged_in)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn directory() -> AccountDirectory {
        AccountDirectory::load(Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_create_and_duplicate() {
        let dir = directory();
        dir.try_create("alice", "pw").unwrap();
        assert!(dir.exists("alice"));
        assert!(dir.try_create("alice", "pw2").is_err());
    }

    #[test]
    fn test_login_lifecycle() {
        let dir = directory();
        dir.try_create("alice", "pw").unwrap();

        assert_eq!(dir.login("alice", "wrong"), LoginOutcome::BadCredentials);
        assert!(!dir.is_logged_in("alice"));

        assert_eq!(dir.login("alice", "pw"), LoginOutcome::Ok);
        assert!(dir.is_logged_in("alice"));

        // Second session is refused while the flag is held.
        assert_eq!(dir.login("alice", "pw"), LoginOutcome::AlreadyLoggedIn);

        dir.logout("alice");
        assert_eq!(dir.login("alice", "pw"), LoginOutcome::Ok);
    }

    #[test]
    fn test_unknown_user_is_bad_credentials() {
        let dir = directory();
        assert_eq!(dir.login("nobody", "pw"), LoginOutcome::BadCredentials);
    }

    #[test]
    fn test_logout_is_idempotent() {
        let dir = directory();
        dir.try_create("alice", "pw").unwrap();
        dir.logout("alice");
        dir.logout("nobody");
    }

    #[test]
    fn test_load_picks_up_store_accounts() {
        let store = Arc::new(MemoryStore::new());
        store.create_account("bob", "pw").unwrap();
        let dir = AccountDirectory::load(store).unwrap();
        assert!(dir.exists("bob"));
        assert_eq!(dir.login("bob", "pw"), LoginOutcome::Ok);
    }
}
