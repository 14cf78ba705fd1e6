//! Auth collaborator seams: bearer-token storage and the 401 side effect.
//!
//! The pipeline only consumes these. It reads a token before each request and
//! invokes the unauthorized hook on a 401; acquiring tokens and reacting to
//! session expiry (clearing credentials, navigating to login) belong to the
//! host application.

use std::sync::{Arc, RwLock};

/// Process-wide credential store the pipeline reads bearer tokens from.
///
/// Implementations must be cheap to call: the pipeline asks for the token on
/// every attempt.
pub trait TokenStore: Send + Sync {
    /// Returns the current bearer token, if one is set.
    fn token(&self) -> Option<String>;

    /// Clears the stored credential.
    fn clear(&self);
}

/// In-memory [`TokenStore`] backed by an `RwLock`.
///
/// # Examples
///
/// ```
/// use breakwater::{MemoryTokenStore, TokenStore};
///
/// let store = MemoryTokenStore::new();
/// store.set("abc123");
/// assert_eq!(store.token().as_deref(), Some("abc123"));
/// store.clear();
/// assert_eq!(store.token(), None);
/// ```
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a bearer token, replacing any previous one.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Injected side effect invoked when the backend answers 401.
///
/// Typically clears the credential store and signals navigation to a login
/// screen. The pipeline invokes it once per classified 401 and then surfaces
/// the `UNAUTHORIZED` error; it never performs navigation itself.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;
