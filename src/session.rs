use std::sync::Arc;

use tracing::info;

use crate::api::{ApiError, AuthBackend};
use crate::model::*;

type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

/// An authenticated operator, passed explicitly into every booking call.
#[derive(Clone)]
pub struct Session {
    user: User,
    clock: Clock,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("user", &self.user).finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(user: User) -> Self {
        Self {
            user,
            clock: Arc::new(now_ms),
        }
    }

    /// Replace the wall clock (cancellation cutoffs are judged against it).
    pub fn with_clock(mut self, clock: impl Fn() -> Ms + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Freeze the clock at `t`.
    pub fn at(self, t: Ms) -> Self {
        self.with_clock(move || t)
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn operator(&self) -> &str {
        &self.user.username
    }

    pub fn now(&self) -> Ms {
        (self.clock)()
    }

    pub async fn login<A: AuthBackend + ?Sized>(auth: &A, username: &str, password: &str) -> Result<Self, ApiError> {
        let user = auth
            .login(&Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        info!("operator {} logged in", user.username);
        Ok(Self::new(user))
    }

    /// Resume a session the collaborator still considers live.
    pub async fn restore<A: AuthBackend + ?Sized>(auth: &A) -> Result<Option<Self>, ApiError> {
        let status = auth.auth_status().await?;
        Ok(match (status.is_authenticated, status.user) {
            (true, Some(user)) => Some(Self::new(user)),
            _ => None,
        })
    }

    pub async fn logout<A: AuthBackend + ?Sized>(self, auth: &A) -> Result<(), ApiError> {
        auth.logout().await?;
        info!("operator {} logged out", self.user.username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryBackend;

    #[tokio::test]
    async fn login_restore_logout() {
        let backend = MemoryBackend::new();
        backend.add_user("Rita", "rita", "s3cret");

        assert!(Session::restore(&backend).await.unwrap().is_none());

        let bad = Session::login(&backend, "rita", "wrong").await;
        assert_eq!(bad.unwrap_err(), ApiError::Unauthorized);

        let session = Session::login(&backend, "rita", "s3cret").await.unwrap();
        assert_eq!(session.operator(), "rita");

        let restored = Session::restore(&backend).await.unwrap().unwrap();
        assert_eq!(restored.user(), session.user());

        session.logout(&backend).await.unwrap();
        assert!(Session::restore(&backend).await.unwrap().is_none());
    }

    #[test]
    fn frozen_clock() {
        let user = User {
            id: 1,
            name: "Rita".into(),
            username: "rita".into(),
        };
        let session = Session::new(user).at(42);
        assert_eq!(session.now(), 42);
        assert_eq!(session.clone().now(), 42);
    }
}
