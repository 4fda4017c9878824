//! Bearer token validation via the Kubernetes TokenReview API
//!
//! # Usage
//!
//! ```rust,ignore
//! let client = kube::Client::try_default().await?;
//! let reviewer = KubeTokenReviewer::new(client);
//! let outcome = reviewer.review(token).await?;
//! ```

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use kube::api::PostParams;
use kube::{Api, Client};

use crate::auth::{TokenReviewOutcome, TokenReviewer, UserIdentity};
use crate::error::{Error, Result};

/// TokenReviewer backed by the cluster's TokenReview API
pub struct KubeTokenReviewer {
    client: Client,
    audiences: Option<Vec<String>>,
}

impl KubeTokenReviewer {
    /// Create a reviewer that accepts the API server's default audiences
    pub fn new(client: Client) -> Self {
        Self {
            client,
            audiences: None,
        }
    }

    /// Create a reviewer that requires one of the given audiences
    pub fn with_audiences(client: Client, audiences: Vec<String>) -> Self {
        Self {
            client,
            audiences: Some(audiences),
        }
    }
}

#[async_trait]
impl TokenReviewer for KubeTokenReviewer {
    async fn review(&self, token: String) -> Result<TokenReviewOutcome> {
        let api: Api<TokenReview> = Api::all(self.client.clone());

        let review = TokenReview {
            metadata: Default::default(),
            spec: TokenReviewSpec {
                token: Some(token),
                audiences: self.audiences.clone(),
            },
            status: None,
        };

        let result = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| Error::Internal(format!("TokenReview API error: {}", e)))?;

        let status = result
            .status
            .ok_or_else(|| Error::Internal("TokenReview returned no status".into()))?;

        outcome_from_status(&status)
    }
}

/// Interpret a TokenReview status
fn outcome_from_status(status: &TokenReviewStatus) -> Result<TokenReviewOutcome> {
    if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
        return Ok(TokenReviewOutcome::Rejected(format!(
            "token review failed: {}",
            error
        )));
    }

    if !status.authenticated.unwrap_or(false) {
        return Ok(TokenReviewOutcome::Rejected("not authenticated".into()));
    }

    let user = status
        .user
        .as_ref()
        .ok_or_else(|| Error::Internal("TokenReview authenticated but no user info".into()))?;

    let username = user
        .username
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::Internal("TokenReview user has no username".into()))?;

    Ok(TokenReviewOutcome::Authenticated(UserIdentity {
        username,
        uid: user.uid.clone().unwrap_or_default(),
        groups: user.groups.clone().unwrap_or_default(),
    }))
}
