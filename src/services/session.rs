use std::sync::Arc;

use url::Url;

use crate::api::{ApiError, ChatApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated,
    /// The user has to complete the external login flow at `login_url`.
    LoginRequired { login_url: Url },
}

/// Cookie-session checks. Login itself happens in the browser; this only
/// tells the caller where to send the user.
pub struct SessionService {
    api: Arc<dyn ChatApi>,
    login_url: Url,
}

impl SessionService {
    pub fn new(api: Arc<dyn ChatApi>, login_url: Url) -> Self {
        Self { api, login_url }
    }

    pub async fn probe(&self) -> SessionStatus {
        if self.api.probe_session().await {
            SessionStatus::Authenticated
        } else {
            SessionStatus::LoginRequired {
                login_url: self.login_url.clone(),
            }
        }
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.api.logout().await?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::FakeApi;

    fn login() -> Url {
        Url::parse("http://localhost:8080/oauth2/authorization/google").unwrap()
    }

    #[tokio::test]
    async fn test_probe_authenticated() {
        let api = Arc::new(FakeApi::default().with_rooms(&[]));
        let session = SessionService::new(api, login());
        assert_eq!(session.probe().await, SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn test_probe_requires_login() {
        let session = SessionService::new(Arc::new(FakeApi::default()), login());
        assert_eq!(
            session.probe().await,
            SessionStatus::LoginRequired { login_url: login() }
        );
    }

    #[tokio::test]
    async fn test_logout_calls_backend() {
        let api = Arc::new(FakeApi::default());
        let session = SessionService::new(api.clone(), login());
        session.logout().await.unwrap();
        assert_eq!(api.calls(), vec!["logout".to_string()]);
    }
}
