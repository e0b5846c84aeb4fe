//! Reqwest adapter for the outbound HTTP port
//!
//! One client instance per TLS posture: requests with `tls_verify` off are
//! dispatched through a separate client built with certificate checking
//! disabled, so per-request toggles never rebuild a connection pool.
//! Timeouts apply per request. No retries: a failed exchange is terminal
//! for its login attempt.

use async_trait::async_trait;
use authrelay_core::ports::{HttpClientPort, HttpMethod, HttpResponse, OutboundRequest};
use authrelay_domain::{AuthError, Result};
use reqwest::Client;
use tracing::debug;

/// HTTP client port implementation over reqwest.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    verified: Client,
    unverified: Client,
}

impl ReqwestHttpClient {
    /// Build both TLS postures up front.
    ///
    /// # Errors
    /// `TokenRequestFailed` when the TLS backend cannot initialize.
    pub fn new() -> Result<Self> {
        let verified = Client::builder()
            .build()
            .map_err(|e| AuthError::TokenRequestFailed(format!("http client init: {e}")))?;
        let unverified = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| AuthError::TokenRequestFailed(format!("http client init: {e}")))?;
        Ok(Self { verified, unverified })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttpClient {
    async fn send(&self, request: OutboundRequest) -> Result<HttpResponse> {
        let client = if request.tls_verify { &self.verified } else { &self.unverified };

        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url).form(&request.form),
        };
        builder = builder.timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(
            operation = request.operation.name(),
            url = %request.url,
            tls_verify = request.tls_verify,
            "sending HTTP request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::TokenRequestFailed(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenRequestFailed(format!("reading body: {e}")))?;

        debug!(operation = request.operation.name(), status, "received HTTP response");

        Ok(HttpResponse { status, body })
    }
}
