//! Unary gRPC client for central's `TokenService`

use tonic::codegen::*;

use crate::{
    GenerateTokenForPermissionsAndScopeRequest, GenerateTokenForPermissionsAndScopeResponse,
};

/// Fully qualified gRPC service name
const SERVICE_NAME: &str = "central.v1.TokenService";

/// Method name of the scoped token exchange
const GENERATE_METHOD: &str = "GenerateTokenForPermissionsAndScope";

/// Client for central's token-issuing service
#[derive(Debug, Clone)]
pub struct TokenServiceClient<T> {
    inner: tonic::client::Grpc<T>,
}

impl<T> TokenServiceClient<T>
where
    T: tonic::client::GrpcService<tonic::body::BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    /// Wrap an existing gRPC service (usually a `Channel`)
    pub fn new(inner: T) -> Self {
        Self {
            inner: tonic::client::Grpc::new(inner),
        }
    }

    /// Issue a token limited to the requested permissions and cluster scopes
    pub async fn generate_token_for_permissions_and_scope(
        &mut self,
        request: impl tonic::IntoRequest<GenerateTokenForPermissionsAndScopeRequest>,
    ) -> Result<tonic::Response<GenerateTokenForPermissionsAndScopeResponse>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
        })?;

        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(
            "/central.v1.TokenService/GenerateTokenForPermissionsAndScope",
        );

        let mut req = request.into_request();
        req.extensions_mut()
            .insert(GrpcMethod::new(SERVICE_NAME, GENERATE_METHOD));

        self.inner.unary(req, path, codec).await
    }
}
