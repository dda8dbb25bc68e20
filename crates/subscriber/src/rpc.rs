//! The `ProxyApi` provider service: the RPC-facing wrapper around [`Registry`].

use std::sync::Arc;

use tonic::{Request, Response, Status};

use swarpf_rpc::proxyapi::proxy_api_server::ProxyApi;
use swarpf_rpc::proxyapi::{ProxyApiOptions, ProxyApiProviderResponse};

use crate::registry::Registry;

/// Implements the `ProxyApi` provider service over a shared [`Registry`].
pub struct ProxyApiService {
    registry: Arc<Registry>,
}

impl ProxyApiService {
    /// Wraps `registry` as a tonic service.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl ProxyApi for ProxyApiService {
    async fn register(
        &self,
        request: Request<ProxyApiOptions>,
    ) -> Result<Response<ProxyApiProviderResponse>, Status> {
        let opts = request.into_inner();
        tracing::info!(address = %opts.address, commands = ?opts.commands, "new proxy api consumer registration request");

        match self.registry.register(opts.address.clone(), opts.commands.clone()).await {
            Ok(()) => {
                tracing::info!(address = %opts.address, "registered proxy api consumer");
                Ok(Response::new(ProxyApiProviderResponse {
                    success: true,
                    error: String::new(),
                }))
            }
            Err(err) => {
                tracing::warn!(address = %opts.address, error = %err, "failed to register proxy api consumer");
                Ok(Response::new(ProxyApiProviderResponse {
                    success: false,
                    error: err.to_string(),
                }))
            }
        }
    }

    async fn disconnect(
        &self,
        request: Request<ProxyApiOptions>,
    ) -> Result<Response<ProxyApiProviderResponse>, Status> {
        let opts = request.into_inner();
        tracing::info!(address = %opts.address, "new proxy api consumer disconnect request");

        match self.registry.disconnect(&opts.address).await {
            Ok(()) => {
                tracing::info!(address = %opts.address, "disconnected proxy api consumer");
                Ok(Response::new(ProxyApiProviderResponse {
                    success: true,
                    error: String::new(),
                }))
            }
            Err(err) => {
                tracing::warn!(address = %opts.address, error = %err, "failed to disconnect proxy api consumer");
                Ok(Response::new(ProxyApiProviderResponse {
                    success: false,
                    error: err.to_string(),
                }))
            }
        }
    }
}
