//! Login and registration decisions.
//!
//! The credential table is the only state shared between sessions. It lives
//! behind one lock: logins take shared access, registration takes exclusive
//! access for the whole check-then-append sequence so two sessions cannot
//! both register the same username.

use crate::store::{is_storable, CredentialStore, StoreError};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Thread-safe authentication service over a [`CredentialStore`]
#[derive(Debug)]
pub struct AuthService {
    store: RwLock<CredentialStore>,
}

impl AuthService {
    /// Create a new service owning `store`
    pub fn new(store: CredentialStore) -> Arc<Self> {
        info!(path = %store.path().display(), "Initializing credential store");
        Arc::new(Self {
            store: RwLock::new(store),
        })
    }

    /// Open (or create) the credential table at `path` and wrap it.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Arc<Self>, StoreError> {
        Ok(Self::new(CredentialStore::open(path)?))
    }

    /// True iff a record for `username` carries exactly `password`.
    pub fn check_login(&self, username: &str, password: &str) -> bool {
        let store = self.store.read();
        match store.lookup(username) {
            Ok(stored) => stored.as_deref() == Some(password),
            Err(e) => {
                warn!(username, error = %e, "Credential lookup failed");
                false
            }
        }
    }

    /// True iff no record for `username` exists yet.
    pub fn check_registration_allowed(&self, username: &str) -> bool {
        let store = self.store.read();
        Self::registration_allowed(&store, username)
    }

    /// Register a new user.
    ///
    /// Returns false without touching the table if either field cannot be
    /// stored verbatim, if the username is taken, or if the table could not
    /// be read or written.
    pub fn register(&self, username: &str, password: &str) -> bool {
        if !is_storable(username) || !is_storable(password) {
            info!(username, "Registration denied, credentials cannot be stored");
            return false;
        }

        let mut store = self.store.write();

        if !Self::registration_allowed(&store, username) {
            info!(username, "Registration denied, user already exists");
            return false;
        }

        match store.append(username, password) {
            Ok(()) => {
                info!(username, "User added");
                true
            }
            Err(e) => {
                warn!(username, error = %e, "Failed to append credential record");
                false
            }
        }
    }

    /// Number of well-formed records, for diagnostics.
    pub fn user_count(&self) -> Result<usize, StoreError> {
        Ok(self.store.read().records()?.len())
    }

    fn registration_allowed(store: &CredentialStore, username: &str) -> bool {
        match store.exists(username) {
            Ok(exists) => !exists,
            Err(e) => {
                warn!(username, error = %e, "Credential lookup failed");
                false
            }
        }
    }
}
