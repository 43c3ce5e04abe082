//! Log-access authorization for viewer subscriptions.

use salvo::async_trait;

/// Decides whether a viewer token may read logs for an application.
///
/// Implementations may perform network I/O; callers treat the check as
/// possibly slow. On any internal failure the answer must be `false`.
#[async_trait]
pub trait LogAccessAuthorizer: Send + Sync {
    async fn authorize(&self, auth_token: &str, app_id: &str) -> bool;
}

/// Authorizer backed by the platform API.
///
/// Access is granted when `GET <endpoint>/v2/apps/<appId>` with the viewer's
/// token answers 2xx; anything else, including transport errors, denies.
pub struct ApiLogAccessAuthorizer {
    endpoint: String,
    client: reqwest::Client,
}

impl ApiLogAccessAuthorizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LogAccessAuthorizer for ApiLogAccessAuthorizer {
    async fn authorize(&self, auth_token: &str, app_id: &str) -> bool {
        let url = format!("{}/v2/apps/{}", self.endpoint, app_id);
        match self
            .client
            .get(&url)
            .header("Authorization", auth_token)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::warn!(%error, app_id, "authorization lookup failed");
                false
            }
        }
    }
}
