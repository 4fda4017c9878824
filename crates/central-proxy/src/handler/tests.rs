use super::*;

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use central_proto::GenerateTokenForPermissionsAndScopeRequest;
use url::Url;

use crate::auth::{MockTokenReviewer, TokenReviewOutcome, MISSING_TOKEN_MESSAGE};
use crate::authz::{AccessDecision, MockAccessReviewer};
use crate::config::{
    default_central_permissions, default_resource_rules, default_verbs, SCOPE_HEADER,
};
use crate::token_provider::{ClusterIdHandle, MockTokenIssuer, TokenProvider};
use crate::transport::{CentralResponse, MockTransport, ScopedTokenTransport};

const TTL: Duration = Duration::from_secs(60);
const SCOPED_TOKEN: &str = "scoped-token";
const CENTRAL_BODY: &[u8] = b"{\"alerts\":[]}";

fn alice() -> UserIdentity {
    UserIdentity {
        username: "alice".to_string(),
        uid: "uid-alice".to_string(),
        groups: vec!["developers".to_string()],
    }
}

fn total_checks() -> usize {
    default_resource_rules().len() * default_verbs().len()
}

/// Wire a handler from the four external collaborators
fn handler(
    reviewer: MockTokenReviewer,
    access: MockAccessReviewer,
    issuer: MockTokenIssuer,
    transport: MockTransport,
) -> GatewayHandler {
    let authenticator = Authenticator::new(Arc::new(reviewer), TTL);
    let authorizer = Authorizer::new(
        Arc::new(access),
        default_resource_rules(),
        default_verbs(),
        TTL,
    );

    let provider = TokenProvider::new(
        Arc::new(ClusterIdHandle::with_id("cluster-1").unwrap()),
        default_central_permissions(),
        Duration::from_secs(300),
        Duration::from_secs(240),
    );
    provider.set_issuer(Arc::new(issuer));

    let scoped = ScopedTokenTransport::new(Arc::new(transport), Arc::new(provider));
    let proxy = ReverseProxy::new(
        Url::parse("https://central.stackrox:443").unwrap(),
        Arc::new(scoped),
    );

    let handler = GatewayHandler::new(authenticator, authorizer, proxy);
    handler.notify(CentralConnectivity::Reachable);
    handler
}

fn authenticating_reviewer() -> MockTokenReviewer {
    let mut reviewer = MockTokenReviewer::new();
    reviewer
        .expect_review()
        .returning(|_| Ok(TokenReviewOutcome::Authenticated(alice())));
    reviewer
}

fn allowing_access() -> MockAccessReviewer {
    let mut access = MockAccessReviewer::new();
    access
        .expect_review()
        .returning(|_| Ok(AccessDecision::Allowed));
    access
}

fn issuing() -> MockTokenIssuer {
    let mut issuer = MockTokenIssuer::new();
    issuer
        .expect_issue()
        .returning(|_| Ok(SCOPED_TOKEN.to_string()));
    issuer
}

fn central_ok() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_round_trip().returning(|_| Ok(central_response()));
    transport
}

fn central_response() -> CentralResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    CentralResponse {
        status: StatusCode::OK,
        headers,
        body: Bytes::from_static(CENTRAL_BODY),
    }
}

fn request(scope: Option<&str>) -> Request<Body> {
    let mut builder = Request::get("/v1/alerts").header(header::AUTHORIZATION, "Bearer caller-token");
    if let Some(scope) = scope {
        builder = builder.header(SCOPE_HEADER, scope);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ========================================================================
// Request validation
// ========================================================================

#[test]
fn test_starts_unreachable() {
    let handler = GatewayHandler::new(
        Authenticator::new(Arc::new(MockTokenReviewer::new()), TTL),
        Authorizer::new(
            Arc::new(MockAccessReviewer::new()),
            default_resource_rules(),
            default_verbs(),
            TTL,
        ),
        ReverseProxy::new(
            Url::parse("https://central.stackrox").unwrap(),
            Arc::new(MockTransport::new()),
        ),
    );
    assert!(!handler.is_reachable());

    handler.notify(CentralConnectivity::Reachable);
    assert!(handler.is_reachable());
    handler.notify(CentralConnectivity::Reachable);
    assert!(handler.is_reachable());
    handler.notify(CentralConnectivity::Offline);
    assert!(!handler.is_reachable());
}

#[test]
fn test_serve_future_is_send() {
    fn assert_send<T: Send>(_: &T) {}

    let handler = handler(
        MockTokenReviewer::new(),
        MockAccessReviewer::new(),
        MockTokenIssuer::new(),
        MockTransport::new(),
    );
    let serving = handler.serve(request(None));
    assert_send(&serving);
}

#[tokio::test]
async fn test_unsupported_methods_are_not_implemented() {
    let mut reviewer = MockTokenReviewer::new();
    reviewer.expect_review().never();
    let handler = handler(reviewer, MockAccessReviewer::new(), MockTokenIssuer::new(), MockTransport::new());

    for method in [Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
        let request = Request::builder()
            .method(method)
            .uri("/v1/alerts")
            .header(header::AUTHORIZATION, "Bearer caller-token")
            .body(Body::empty())
            .unwrap();
        let response = handler.serve(request).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}

#[tokio::test]
async fn test_post_is_supported() {
    let mut transport = MockTransport::new();
    transport
        .expect_round_trip()
        .withf(|req| req.method == Method::POST && req.body == Bytes::from_static(b"{}"))
        .times(1)
        .returning(|_| Ok(central_response()));
    let handler = handler(authenticating_reviewer(), allowing_access(), issuing(), transport);

    let request = Request::post("/v1/search")
        .header(header::AUTHORIZATION, "Bearer caller-token")
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(handler.serve(request).await.status(), StatusCode::OK);
}

// ========================================================================
// End-to-end scenarios
// ========================================================================

#[tokio::test]
async fn test_missing_authorization_is_401() {
    let mut reviewer = MockTokenReviewer::new();
    reviewer.expect_review().never();
    let mut transport = MockTransport::new();
    transport.expect_round_trip().never();
    let handler = handler(reviewer, MockAccessReviewer::new(), MockTokenIssuer::new(), transport);

    let request = Request::get("/v1/alerts").body(Body::empty()).unwrap();
    let response = handler.serve(request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_string(response).await.contains(MISSING_TOKEN_MESSAGE));
}

#[tokio::test]
async fn test_non_bearer_scheme_is_401() {
    let mut reviewer = MockTokenReviewer::new();
    reviewer.expect_review().never();
    let handler = handler(reviewer, MockAccessReviewer::new(), MockTokenIssuer::new(), MockTransport::new());

    let request = Request::get("/v1/alerts")
        .header(header::AUTHORIZATION, "Basic YWxpY2U6c2VjcmV0")
        .body(Body::empty())
        .unwrap();
    assert_eq!(handler.serve(request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejected_token_is_401_without_rbac() {
    let mut reviewer = MockTokenReviewer::new();
    reviewer
        .expect_review()
        .returning(|_| Ok(TokenReviewOutcome::Rejected("token has expired".into())));
    let mut access = MockAccessReviewer::new();
    access.expect_review().never();
    let handler = handler(reviewer, access, MockTokenIssuer::new(), MockTransport::new());

    let response = handler.serve(request(Some("team-a"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_string(response).await.contains("token has expired"));
}

#[tokio::test]
async fn test_unscoped_request_is_proxied_verbatim() {
    let mut access = MockAccessReviewer::new();
    access.expect_review().never();
    let handler = handler(authenticating_reviewer(), access, issuing(), central_ok());

    let response = handler.serve(request(None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(body_string(response).await.as_bytes(), CENTRAL_BODY);
}

#[tokio::test]
async fn test_denied_list_pods_is_403() {
    let mut access = MockAccessReviewer::new();
    access.expect_review().returning(|check| {
        if check.verb == "list" && check.resource.resource == "pods" {
            Ok(AccessDecision::Denied)
        } else {
            Ok(AccessDecision::Allowed)
        }
    });
    let mut transport = MockTransport::new();
    transport.expect_round_trip().never();
    let mut issuer = MockTokenIssuer::new();
    issuer.expect_issue().never();
    let handler = handler(authenticating_reviewer(), access, issuer, transport);

    let response = handler.serve(request(Some("team-a"))).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(
        body.contains(r#"lacks LIST permission for resource "pods.core" in namespace "team-a""#),
        "unexpected body: {}",
        body
    );
    assert!(body.contains(r#"user "alice""#));
}

#[tokio::test]
async fn test_rbac_evaluation_error_is_500_not_403() {
    let mut access = MockAccessReviewer::new();
    access
        .expect_review()
        .returning(|_| Ok(AccessDecision::EvaluationError("webhook timed out".into())));
    let mut transport = MockTransport::new();
    transport.expect_round_trip().never();
    let handler = handler(authenticating_reviewer(), access, MockTokenIssuer::new(), transport);

    let response = handler.serve(request(Some("team-a"))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_cluster_wide_requests_full_cluster_token() {
    let seen: Arc<Mutex<Vec<GenerateTokenForPermissionsAndScopeRequest>>> =
        Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let mut issuer = MockTokenIssuer::new();
    issuer.expect_issue().returning(move |req| {
        recorder.lock().unwrap().push(req);
        Ok(SCOPED_TOKEN.to_string())
    });

    let mut access = MockAccessReviewer::new();
    access
        .expect_review()
        .withf(|check| check.namespace.is_none())
        .times(total_checks())
        .returning(|_| Ok(AccessDecision::Allowed));

    let handler = handler(authenticating_reviewer(), access, issuer, central_ok());
    let response = handler.serve(request(Some("*"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].cluster_scopes.len(), 1);
    assert!(requests[0].cluster_scopes[0].full_cluster_access);
    assert!(requests[0].cluster_scopes[0].namespaces.is_empty());
}

#[tokio::test]
async fn test_caller_token_is_never_forwarded() {
    let mut transport = MockTransport::new();
    transport
        .expect_round_trip()
        .withf(|req| {
            let values: Vec<_> = req.headers.get_all(header::AUTHORIZATION).iter().collect();
            values.len() == 1 && values[0] == "Bearer scoped-token"
        })
        .times(2)
        .returning(|_| Ok(central_response()));
    let handler = handler(authenticating_reviewer(), allowing_access(), issuing(), transport);

    assert_eq!(handler.serve(request(None)).await.status(), StatusCode::OK);
    assert_eq!(
        handler.serve(request(Some("team-a"))).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_central_unreachable_mid_run_is_503() {
    let reviews = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reviews);
    let mut reviewer = MockTokenReviewer::new();
    reviewer.expect_review().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(TokenReviewOutcome::Authenticated(alice()))
    });
    let handler = handler(reviewer, allowing_access(), issuing(), central_ok());

    assert_eq!(handler.serve(request(None)).await.status(), StatusCode::OK);
    assert_eq!(reviews.load(Ordering::SeqCst), 1);

    handler.notify(CentralConnectivity::Offline);

    // A fresh token would need a review; none happens while offline.
    let offline_request = Request::get("/v1/alerts")
        .header(header::AUTHORIZATION, "Bearer other-token")
        .header(SCOPE_HEADER, "team-a")
        .body(Body::empty())
        .unwrap();
    let response = handler.serve(offline_request).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reviews.load(Ordering::SeqCst), 1);

    handler.notify(CentralConnectivity::Reachable);
    assert_eq!(handler.serve(request(None)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_identical_requests_are_idempotent() {
    let mut reviewer = MockTokenReviewer::new();
    reviewer
        .expect_review()
        .times(1)
        .returning(|_| Ok(TokenReviewOutcome::Authenticated(alice())));
    let mut access = MockAccessReviewer::new();
    access
        .expect_review()
        .times(total_checks())
        .returning(|_| Ok(AccessDecision::Allowed));
    let mut issuer = MockTokenIssuer::new();
    issuer
        .expect_issue()
        .times(1)
        .returning(|_| Ok(SCOPED_TOKEN.to_string()));
    let mut transport = MockTransport::new();
    transport
        .expect_round_trip()
        .times(2)
        .returning(|_| Ok(central_response()));
    let handler = handler(reviewer, access, issuer, transport);

    let first = handler.serve(request(Some("team-a"))).await;
    let second = handler.serve(request(Some("team-a"))).await;

    assert_eq!(first.status(), second.status());
    assert_eq!(body_string(first).await, body_string(second).await);
}

#[tokio::test]
async fn test_token_service_unavailable_is_503() {
    let mut issuer = MockTokenIssuer::new();
    issuer.expect_issue().returning(|_| {
        Err(Error::ServiceUnavailable(
            "central token service unreachable".into(),
        ))
    });
    let mut transport = MockTransport::new();
    transport.expect_round_trip().never();
    let handler = handler(authenticating_reviewer(), allowing_access(), issuer, transport);

    let response = handler.serve(request(Some("team-a"))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_transport_failure_is_500() {
    let mut transport = MockTransport::new();
    transport.expect_round_trip().returning(|_| {
        Err(Error::Proxy(
            "failed to reach central: connection refused".into(),
        ))
    });
    let handler = handler(authenticating_reviewer(), allowing_access(), issuing(), transport);

    let response = handler.serve(request(None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_string(response).await.contains("connection refused"));
}
