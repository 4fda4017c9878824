//! Permission checks via the Kubernetes SubjectAccessReview API

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec, SubjectAccessReviewStatus,
};
use kube::api::PostParams;
use kube::{Api, Client};

use super::{AccessCheck, AccessDecision, AccessReviewer};
use crate::error::{Error, Result};

/// AccessReviewer backed by the cluster's SubjectAccessReview API
pub struct KubeAccessReviewer {
    client: Client,
}

impl KubeAccessReviewer {
    /// Create a reviewer using the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccessReviewer for KubeAccessReviewer {
    async fn review(&self, check: AccessCheck) -> Result<AccessDecision> {
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());

        let result = api
            .create(&PostParams::default(), &build_review(check))
            .await
            .map_err(|e| Error::Internal(format!("SubjectAccessReview API error: {}", e)))?;

        Ok(decision_from_status(result.status.as_ref()))
    }
}

/// Build a SubjectAccessReview for a permission check
fn build_review(check: AccessCheck) -> SubjectAccessReview {
    let AccessCheck {
        identity,
        verb,
        resource,
        namespace,
    } = check;

    SubjectAccessReview {
        metadata: Default::default(),
        spec: SubjectAccessReviewSpec {
            user: Some(identity.username),
            uid: Some(identity.uid).filter(|uid| !uid.is_empty()),
            groups: Some(identity.groups),
            resource_attributes: Some(ResourceAttributes {
                verb: Some(verb),
                resource: Some(resource.resource),
                group: Some(resource.group),
                namespace,
                ..Default::default()
            }),
            ..Default::default()
        },
        status: None,
    }
}

/// Interpret a SubjectAccessReview status
///
/// An explicit allowance wins; otherwise an evaluation error is reported as
/// such rather than being mistaken for a clean denial.
fn decision_from_status(status: Option<&SubjectAccessReviewStatus>) -> AccessDecision {
    let Some(status) = status else {
        return AccessDecision::EvaluationError("SubjectAccessReview returned no status".into());
    };

    if status.allowed {
        return AccessDecision::Allowed;
    }

    if status.denied == Some(true) {
        return AccessDecision::Denied;
    }

    match status.evaluation_error.as_deref() {
        Some(error) if !error.is_empty() => AccessDecision::EvaluationError(error.to_string()),
        _ => AccessDecision::Denied,
    }
}
