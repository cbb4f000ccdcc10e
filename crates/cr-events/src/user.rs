//! Subscriber ownership: the user a subscriber belongs to, and the
//! repository contract used to reload it after the owner cache expires.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{EventsError, Result};

/// The user that owns a subscriber, as reloaded from the user repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Primary key of the user.
    pub id: i64,
    /// Display name, carried only because the repository happens to have
    /// it; the hub and subscriber never inspect it.
    pub name: String,
}

/// Reloads a [`User`] by id.
///
/// Mirrors the narrow slice of the platform's user/account store that
/// [`crate::subscriber::Subscriber::owner`] depends on; database entity
/// mapping itself is out of scope here.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Load a user by id, failing with [`EventsError::AuthContextMissing`]
    /// if no such user exists.
    async fn load(&self, user_id: i64) -> Result<User>;
}

/// In-memory [`UserRepository`] used for tests and local composition.
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<i64, User>>>,
}

impl InMemoryUserRepository {
    /// Construct an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a repository pre-populated with a single user.
    #[must_use]
    pub fn with_user(user: User) -> Self {
        let repository = Self::new();
        repository
            .users
            .try_write()
            .expect("fresh repository is never contended")
            .insert(user.id, user);
        repository
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn load(&self, user_id: i64) -> Result<User> {
        self.users
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or(EventsError::AuthContextMissing)
    }
}
