//! Publish-key validation against the user store

use std::sync::Arc;

use async_trait::async_trait;

use crate::server::handler::{AuthResult, PublishAuthorizer};
use crate::session::SessionContext;

use super::user::{UserLookup, UserStore};

/// Authorizes a publish when the channel is named after a user who may publish and the
/// presented key matches theirs
pub struct UserPublishAuthorizer<S> {
    store: Arc<S>,
}

impl<S: UserStore> UserPublishAuthorizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: UserStore + 'static> PublishAuthorizer for UserPublishAuthorizer<S> {
    async fn authorize_publish(
        &self,
        ctx: &SessionContext,
        channel: &str,
        publish_key: Option<&str>,
    ) -> AuthResult {
        let Some(key) = publish_key.filter(|k| !k.is_empty()) else {
            return AuthResult::Reject("publish key required".into());
        };

        let user = match self.store.find_user(UserLookup::Username(channel)).await {
            Ok(Some(user)) => user,
            Ok(None) => return AuthResult::Reject("unknown channel".into()),
            Err(e) => {
                tracing::error!(
                    session_id = ctx.session_id,
                    channel = %channel,
                    error = %e,
                    "User lookup failed"
                );
                return AuthResult::Reject("user lookup failed".into());
            }
        };

        if !user.can_publish {
            return AuthResult::Reject("publishing not permitted".into());
        }
        if user.publish_key.is_empty() || user.publish_key != key {
            return AuthResult::Reject("invalid publish key".into());
        }

        AuthResult::Accept
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::auth::{MemoryUserStore, NewUser};

    async fn authorizer() -> UserPublishAuthorizer<MemoryUserStore> {
        let store = Arc::new(MemoryUserStore::new());
        store
            .insert_user(NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                publish_key: "secret".into(),
                can_publish: true,
                ..NewUser::default()
            })
            .await
            .unwrap();
        store
            .insert_user(NewUser {
                username: "bob".into(),
                email: "bob@example.com".into(),
                publish_key: "bobkey".into(),
                can_publish: false,
                ..NewUser::default()
            })
            .await
            .unwrap();
        UserPublishAuthorizer::new(store)
    }

    fn ctx() -> SessionContext {
        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        SessionContext::new(1, addr)
    }

    #[tokio::test]
    async fn test_matching_key_accepted() {
        let auth = authorizer().await;
        let result = auth.authorize_publish(&ctx(), "alice", Some("secret")).await;
        assert!(result.is_accept());
    }

    #[tokio::test]
    async fn test_rejections() {
        let auth = authorizer().await;

        for (channel, key) in [
            ("alice", None),
            ("alice", Some("")),
            ("alice", Some("wrong")),
            ("bob", Some("bobkey")),
            ("carol", Some("secret")),
        ] {
            let result = auth.authorize_publish(&ctx(), channel, key).await;
            assert!(
                matches!(result, AuthResult::Reject(_)),
                "{channel} {key:?} should be rejected"
            );
        }
    }
}
