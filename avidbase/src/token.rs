use parking_lot::RwLock;
use std::fmt;

/// Which bearer token a resource call is made with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenScope {
    /// The application's own token, acquired from the API key on demand.
    #[default]
    Machine,
    /// The token handed out by the last successful login.
    User,
}

/// Token state shared by every clone of a client.
///
/// Holds at most one machine token and one user token. Writers replace the
/// whole value; there is no merging and no expiry tracking.
#[derive(Default)]
pub(crate) struct TokenStore {
    machine: RwLock<Option<String>>,
    user: RwLock<Option<String>>,
    /// Serializes machine token acquisition so concurrent callers issue a
    /// single token request.
    pub(crate) acquisition: tokio::sync::Mutex<()>,
}

impl TokenStore {
    const fn slot(&self, scope: TokenScope) -> &RwLock<Option<String>> {
        match scope {
            TokenScope::Machine => &self.machine,
            TokenScope::User => &self.user,
        }
    }

    pub(crate) fn get(&self, scope: TokenScope) -> Option<String> {
        self.slot(scope).read().clone()
    }

    pub(crate) fn set(&self, scope: TokenScope, token: String) {
        *self.slot(scope).write() = Some(token);
    }

    pub(crate) fn clear(&self, scope: TokenScope) {
        self.slot(scope).write().take();
    }

    /// Clears the token only if it is still `rejected`. Returns whether it
    /// was cleared; `false` means someone already stored a newer token.
    pub(crate) fn clear_if(&self, scope: TokenScope, rejected: &str) -> bool {
        let mut slot = self.slot(scope).write();
        if slot.as_deref() == Some(rejected) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("machine", &self.machine.read().as_ref().map(|_| "<redacted>"))
            .field("user", &self.user.read().as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}
