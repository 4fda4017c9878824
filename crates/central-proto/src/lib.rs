//! Protocol definitions for the central token-issuing service.
//!
//! The gateway never forwards a caller's own bearer token to central. Instead it
//! exchanges the verified caller identity for a short-lived token minted by
//! central's `TokenService`, narrowed to a fixed set of read permissions and,
//! optionally, to a single cluster scope.
//!
//! # Wire Contract
//!
//! ```text
//! service TokenService {
//!   rpc GenerateTokenForPermissionsAndScope(GenerateTokenForPermissionsAndScopeRequest)
//!       returns (GenerateTokenForPermissionsAndScopeResponse);
//! }
//! ```
//!
//! The message structs below are kept field-for-field compatible with the
//! `central.v1` protobuf package so they can be exchanged with a stock central.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use central_proto::{Access, ClusterScope, GenerateTokenForPermissionsAndScopeRequest};
//!
//! let mut request = GenerateTokenForPermissionsAndScopeRequest::default();
//! request.permissions.insert("Deployment".into(), Access::ReadAccess as i32);
//! request.cluster_scopes.push(ClusterScope::full_cluster("cluster-1"));
//! ```

#![deny(missing_docs)]

mod client;

pub use client::TokenServiceClient;

use std::collections::HashMap;

/// Access level granted on a central resource kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Access {
    /// No access
    NoAccess = 0,
    /// Read-only access
    ReadAccess = 1,
    /// Read and write access
    ReadWriteAccess = 2,
}

/// Restricts an issued token to a single secured cluster
#[derive(Clone, PartialEq, prost::Message)]
pub struct ClusterScope {
    /// Identifier of the secured cluster
    #[prost(string, tag = "1")]
    pub cluster_id: String,
    /// Grants access to every namespace of the cluster, including cluster-level resources
    #[prost(bool, tag = "2")]
    pub full_cluster_access: bool,
    /// Namespaces the token is limited to (ignored when `full_cluster_access` is set)
    #[prost(string, repeated, tag = "3")]
    pub namespaces: Vec<String>,
}

impl ClusterScope {
    /// Scope covering the whole cluster
    pub fn full_cluster(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            full_cluster_access: true,
            namespaces: Vec::new(),
        }
    }

    /// Scope covering a single namespace of the cluster
    pub fn namespace(cluster_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            full_cluster_access: false,
            namespaces: vec![namespace.into()],
        }
    }
}

/// Request for a token carrying exactly the given permissions and scopes
#[derive(Clone, PartialEq, prost::Message)]
pub struct GenerateTokenForPermissionsAndScopeRequest {
    /// Resource kind → `Access` (as its protobuf integer value)
    #[prost(map = "string, enumeration(Access)", tag = "1")]
    pub permissions: HashMap<String, i32>,
    /// Cluster scopes; empty means the token is not restricted to any cluster
    #[prost(message, repeated, tag = "2")]
    pub cluster_scopes: Vec<ClusterScope>,
    /// Requested validity window of the issued token
    #[prost(message, optional, tag = "3")]
    pub lifetime: Option<prost_types::Duration>,
}

/// Response carrying the issued token
#[derive(Clone, PartialEq, prost::Message)]
pub struct GenerateTokenForPermissionsAndScopeResponse {
    /// Opaque bearer token
    #[prost(string, tag = "1")]
    pub token: String,
}
