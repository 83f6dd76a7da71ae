//! HTTP transport seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::AUTHORIZATION;
use reqwest::tls::Version;
use reqwest::{Certificate, Client};

use crate::error::{InstallError, InstallResult};
use crate::spec::InstallSpec;

/// A GET request against the registry.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    /// Full `Authorization` header value
    pub authorization: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            authorization: None,
        }
    }

    pub fn authorization(mut self, value: Option<String>) -> Self {
        self.authorization = value;
        self
    }
}

/// Fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport used for every registry and download request.
///
/// Connection-level failures must surface as [`InstallError::Transport`] so
/// the retry helper treats them as transient.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> InstallResult<HttpResponse>;
}

/// Production transport built on reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client honouring the request timeout and TLS settings of `spec`.
    /// TLS 1.2 is the minimum; a custom CA is trusted in addition to the
    /// built-in roots.
    pub fn from_spec(spec: &InstallSpec) -> InstallResult<Self> {
        let mut builder = Client::builder()
            .timeout(spec.timeout)
            .min_tls_version(Version::TLS_1_2);

        if let Some(pem) = &spec.ca_cert_pem {
            let cert = Certificate::from_pem(pem)
                .map_err(|e| InstallError::InvalidCertificate(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        if spec.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| InstallError::ClientSetup(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> InstallResult<HttpResponse> {
        let mut builder = self.client.get(&request.url);
        if let Some(auth) = &request.authorization {
            builder = builder.header(AUTHORIZATION, auth.as_str());
        }

        let response = builder.send().await.map_err(|e| InstallError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| InstallError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// In-memory transport serving canned responses by URL.
///
/// Unknown URLs fail like an unreachable host. Each URL can be told to
/// fail a number of times with `503` before serving its response.
#[derive(Clone, Default)]
pub struct StaticTransport {
    routes: Arc<RwLock<HashMap<String, HttpResponse>>>,
    failures: Arc<RwLock<HashMap<String, u32>>>,
    requests: Arc<RwLock<Vec<HttpRequest>>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: impl Into<String>, response: HttpResponse) -> Self {
        self.routes.write().insert(url.into(), response);
        self
    }

    /// Serve `503` for the first `times` requests to `url`.
    pub fn fail_first(self, url: impl Into<String>, times: u32) -> Self {
        self.failures.write().insert(url.into(), times);
        self
    }

    /// All requests received, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.read().clone()
    }

    /// Number of requests made to `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.read().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl HttpTransport for StaticTransport {
    async fn get(&self, request: &HttpRequest) -> InstallResult<HttpResponse> {
        self.requests.write().push(request.clone());

        if let Some(remaining) = self.failures.write().get_mut(&request.url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(HttpResponse::status(503));
            }
        }

        self.routes
            .read()
            .get(&request.url)
            .cloned()
            .ok_or_else(|| InstallError::Transport {
                url: request.url.clone(),
                message: "connection refused".into(),
            })
    }
}
