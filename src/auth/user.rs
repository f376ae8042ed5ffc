//! User store interface
//!
//! The relay only reads users to validate publish keys. [`MemoryUserStore`] backs tests
//! and single-node setups; a SQL-backed store implements the same trait elsewhere.

use std::collections::BTreeMap;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::paginate::{OrderField, OrderMethod, PageOptions};

/// A platform account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    /// Opaque credential hash; never inspected by the relay
    pub password_hash: String,
    pub publish_key: String,
    pub can_publish: bool,
    pub can_stream: bool,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Fields for a user that has not been stored yet
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub publish_key: String,
    pub can_publish: bool,
    pub can_stream: bool,
}

/// Key to find a user by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLookup<'a> {
    Id(u64),
    Username(&'a str),
    Email(&'a str),
}

/// Error type for user store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no user found")]
    NotFound,

    #[error("{0} already taken")]
    Duplicate(&'static str),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Identity collaborator consulted for publish authorization
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>, StoreError>;

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn update_user(&self, user: &User) -> Result<User, StoreError>;

    async fn delete_user(&self, id: u64) -> Result<(), StoreError>;

    async fn list_users(&self, page: &PageOptions) -> Result<Vec<User>, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    users: BTreeMap<u64, User>,
    next_id: u64,
}

/// In-process [`UserStore`]
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(
        inner: &MemoryInner,
        id: Option<u64>,
        username: &str,
        email: &str,
    ) -> Result<(), StoreError> {
        for user in inner.users.values().filter(|u| Some(u.id) != id) {
            if user.username == username {
                return Err(StoreError::Duplicate("username"));
            }
            if user.email == email {
                return Err(StoreError::Duplicate("email"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read();
        let found = match lookup {
            UserLookup::Id(id) => inner.users.get(&id),
            UserLookup::Username(name) => inner.users.values().find(|u| u.username == name),
            UserLookup::Email(email) => inner.users.values().find(|u| u.email == email),
        };
        Ok(found.cloned())
    }

    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        Self::check_unique(&inner, None, &new.username, &new.email)?;

        inner.next_id += 1;
        let now = SystemTime::now();
        let user = User {
            id: inner.next_id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            publish_key: new.publish_key,
            can_publish: new.can_publish,
            can_stream: new.can_stream,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        if !inner.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        Self::check_unique(&inner, Some(user.id), &user.username, &user.email)?;

        let stored = inner.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        let created_at = stored.created_at;
        *stored = User {
            created_at,
            updated_at: SystemTime::now(),
            ..user.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_user(&self, id: u64) -> Result<(), StoreError> {
        self.inner
            .write()
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list_users(&self, page: &PageOptions) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read();
        let mut users: Vec<&User> = inner.users.values().collect();

        users.sort_by(|a, b| match page.order_field {
            OrderField::Id => a.id.cmp(&b.id),
            OrderField::Username => a.username.cmp(&b.username),
            OrderField::Email => a.email.cmp(&b.email),
            OrderField::CreatedAt => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
        });
        if page.order_method == OrderMethod::Desc {
            users.reverse();
        }

        Ok(users
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }
}
