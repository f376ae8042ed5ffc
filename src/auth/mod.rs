//! Identity collaborator
//!
//! The relay consults users only to validate publish keys. Storage and the rest of the
//! account lifecycle belong to the platform's API layer; this module carries the
//! interface plus an in-memory implementation.
//!
//! The `vodstream` binary has no user store and runs with [`crate::AllowAll`], so it
//! accepts any publish key. Embedders enforce keys by passing a
//! [`UserPublishAuthorizer`] to [`crate::RelayServer::new`].

pub mod paginate;
pub mod publish;
pub mod user;

pub use paginate::{OrderField, OrderMethod, PageOptions};
pub use publish::UserPublishAuthorizer;
pub use user::{MemoryUserStore, NewUser, StoreError, User, UserLookup, UserStore};
