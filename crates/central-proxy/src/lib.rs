//! Central Proxy
//!
//! An in-cluster authorization gateway in front of the central management
//! service. Local callers present their own Kubernetes bearer token; the
//! gateway verifies it, checks the caller's RBAC permissions for the declared
//! scope, and forwards the request to central carrying a freshly issued,
//! narrowly scoped token instead of the caller's credential.
//!
//! # Architecture
//!
//! ```text
//! caller ──► Handler ──► Authenticator ──► Authorizer ──► Reverse Proxy ──► central
//!            (reach-     (TokenReview)     (SubjectAccess  (scoped token
//!             ability)                      Review fan-out)  from central)
//! ```
//!
//! # Endpoints
//!
//! - `GET|POST /proxy/central/*` - forwarded to central
//! - `GET /healthz` - Health check

#![deny(missing_docs)]

pub mod auth;
pub mod authz;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod probe;
pub mod proxy;
pub mod scope;
pub mod server;
pub mod telemetry;
pub mod token_provider;
pub mod token_review;
pub mod transport;

pub use auth::{Authenticator, UserIdentity};
pub use authz::{Authorizer, KubeAccessReviewer};
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use handler::{CentralConnectivity, GatewayHandler};
pub use scope::AccessScope;
pub use token_provider::{ClusterIdHandle, GrpcTokenIssuer, TokenProvider};
pub use token_review::KubeTokenReviewer;
