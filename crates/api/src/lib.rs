//! Viitjee backend client.
//!
//! This crate defines the contract of the remote service (the "actor") and an
//! HTTP implementation of it. It focuses on:
//!
//! - The [`BackendActor`] trait exposing `greet(name)`
//! - The [`ActorResolver`] trait used to lazily acquire a handle
//! - Constructing an HTTP client with sensible defaults
//! - Validating the configured base URL for safety
//!
//! # Example
//!
//! ```ignore
//! use viitjee_api::{ActorConfig, ActorResolver, HttpActorResolver};
//!
//! # async fn demo() -> Result<(), viitjee_api::ActorError> {
//! let resolver = HttpActorResolver::new(ActorConfig::default());
//! let actor = resolver.resolve().await?;
//! println!("{}", actor.greet("Alice").await?);
//! # Ok(())
//! # }
//! ```

mod error;

use std::sync::Arc;
use std::time::Duration;
use std::{env, fmt};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

pub use error::ActorError;

/// Default base URL for a locally running backend.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8080";
/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Remote operations exposed by the backend.
#[async_trait]
pub trait BackendActor: Send + Sync + fmt::Debug {
    /// Ask the backend to greet `name`. Idempotent.
    async fn greet(&self, name: &str) -> Result<String, ActorError>;
}

/// Lazily acquires a [`BackendActor`] handle.
#[async_trait]
pub trait ActorResolver: Send + Sync {
    async fn resolve(&self) -> Result<Arc<dyn BackendActor>, ActorError>;
}

/// Settings needed to reach the backend over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorConfig {
    pub base_url: String,
    /// Optional path probed with `GET` before the handle counts as resolved.
    pub health_path: Option<String>,
    pub timeout: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            health_path: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for backend access.
///
/// The client pre-configures default headers and builds requests against a
/// validated base URL.
pub struct HttpActor {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl HttpActor {
    /// Construct an [`HttpActor`] from configuration.
    ///
    /// Non-localhost hosts must use HTTPS. A trailing slash on the base URL is
    /// dropped so paths can be appended verbatim.
    pub fn new(config: &ActorConfig) -> Result<Self, ActorError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        validate_base_url(&base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(config.timeout)
            .build()
            .map_err(ActorError::Client)?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("viitjee-cli/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a `reqwest::RequestBuilder` for a method and API-relative path.
    pub fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");

        self.http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
    }

    /// Issue a `GET` against `path` and require a 2xx answer.
    pub async fn probe(&self, path: &str) -> Result<(), ActorError> {
        let response = self.request(reqwest::Method::GET, path).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ActorError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackendActor for HttpActor {
    async fn greet(&self, name: &str) -> Result<String, ActorError> {
        let response = self
            .request(reqwest::Method::POST, "/greet")
            .json(&json!({ "name": name }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ActorError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        parse_greeting(body)
    }
}

/// Resolves an [`HttpActor`] from configuration, optionally probing its health endpoint.
#[derive(Debug, Clone)]
pub struct HttpActorResolver {
    config: ActorConfig,
}

impl HttpActorResolver {
    pub fn new(config: ActorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ActorConfig {
        &self.config
    }
}

#[async_trait]
impl ActorResolver for HttpActorResolver {
    async fn resolve(&self) -> Result<Arc<dyn BackendActor>, ActorError> {
        let actor = HttpActor::new(&self.config)?;
        if let Some(path) = self.config.health_path.as_deref() {
            debug!(base_url = %actor.base_url, health_path = %path, "probing backend");
            actor.probe(path).await?;
        }
        Ok(Arc::new(actor))
    }
}

/// Extract the greeting from a response body.
///
/// Accepts a bare JSON string or an object carrying a `greeting` string field.
fn parse_greeting(body: Value) -> Result<String, ActorError> {
    match body {
        Value::String(greeting) => Ok(greeting),
        Value::Object(mut map) => match map.remove("greeting") {
            Some(Value::String(greeting)) => Ok(greeting),
            _ => Err(ActorError::InvalidResponse("missing 'greeting' field".into())),
        },
        other => Err(ActorError::InvalidResponse(format!("unexpected greeting payload: {}", other))),
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<(), ActorError> {
    let parsed_base_url =
        Url::parse(base).map_err(|e| ActorError::InvalidBaseUrl(format!("'{}': {}", base, e)))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| ActorError::InvalidBaseUrl(format!("'{}' must include a host", base)))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(ActorError::InvalidBaseUrl(format!(
            "must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        )));
    }

    Ok(())
}
