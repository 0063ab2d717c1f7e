use std::collections::HashMap;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Account check used by connection workers before any data operation.
pub trait Authenticator: Send + Sync {
    /// Creates an account. `false` when the name is already taken.
    fn register(&self, user: &str, password: &str) -> bool;

    fn authenticate(&self, user: &str, password: &str) -> bool;
}

/// In-memory accounts keyed by user name. Only SHA-256 digests of the
/// passwords are kept.
#[derive(Default)]
pub struct UserRegistry {
    users: RwLock<HashMap<String, [u8; 32]>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn digest(user: &str, password: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(user.as_bytes());
        hasher.update([0u8]);
        hasher.update(password.as_bytes());
        hasher.finalize().into()
    }
}

impl Authenticator for UserRegistry {
    fn register(&self, user: &str, password: &str) -> bool {
        let mut users = self.users.write();
        if users.contains_key(user) {
            return false;
        }
        users.insert(user.to_owned(), Self::digest(user, password));
        true
    }

    fn authenticate(&self, user: &str, password: &str) -> bool {
        self.users
            .read()
            .get(user)
            .is_some_and(|stored| *stored == Self::digest(user, password))
    }
}
