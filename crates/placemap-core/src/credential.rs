//! Bearer credentials and the store that holds the current one.

use core::fmt;
use parking_lot::RwLock;

/// An opaque bearer token representing an authenticated session.
///
/// The token text is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value of an `Authorization` header carrying this credential.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

/// Storage for the current credential.
///
/// Only the [`SessionCoordinator`] writes through this trait; every other
/// component reads the credential through the coordinator.
///
/// [`SessionCoordinator`]: crate::SessionCoordinator
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<Credential>;

    fn set(&self, credential: Credential);

    fn clear(&self);
}

/// Process-local [`CredentialStore`].
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.slot.read().clone()
    }

    fn set(&self, credential: Credential) {
        *self.slot.write() = Some(credential);
    }

    fn clear(&self) {
        *self.slot.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_token() {
        let credential = Credential::new("secret-token");
        assert!(!format!("{credential:?}").contains("secret-token"));
        assert_eq!(credential.bearer(), "Bearer secret-token");
    }

    #[test]
    fn store_set_get_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());
        store.set(Credential::new("a"));
        assert_eq!(store.get(), Some(Credential::new("a")));
        store.clear();
        assert!(store.get().is_none());
    }
}
