//! HTTP client implementation

use std::time::Duration;

use openapi_client::models::DEVICE_ID_HEADER;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::AgentError;

/// HTTP client for control plane communication
pub struct HttpClient {
    client: Client,
    base_url: String,
    device_id: Option<String>,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: None,
        })
    }

    /// Client sending the device id header on every request
    pub fn with_device_id(
        base_url: &str,
        timeout: Duration,
        device_id: String,
    ) -> Result<Self, AgentError> {
        let mut client = Self::new(base_url, timeout)?;
        client.device_id = Some(device_id);
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        if let Some(device_id) = &self.device_id {
            request = request.header(DEVICE_ID_HEADER, device_id);
        }
        request
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, AgentError> {
        let response = self.request(Method::GET, path, token).send().await?;
        let response = check_status(response, "GET").await?;
        Ok(response.json().await?)
    }

    /// Conditional GET; returns the body with its entity tag, or
    /// `AgentError::NotModified` when `etag` still matches
    pub async fn get_if_none_match<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        etag: Option<&str>,
    ) -> Result<(T, Option<String>), AgentError> {
        let mut request = self.request(Method::GET, path, token);
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, format!("\"{}\"", etag));
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Err(AgentError::NotModified);
        }
        let response = check_status(response, "GET").await?;

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start_matches("W/").trim_matches('"').to_string());
        Ok((response.json().await?, etag))
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<T, AgentError> {
        let response = self
            .request(Method::POST, path, token)
            .json(body)
            .send()
            .await?;
        let response = check_status(response, "POST").await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: Response, method: &str) -> Result<Response, AgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("HTTP {} failed: {} - {}", method, status, body);
    Err(AgentError::ChannelError {
        status: status.as_u16(),
        message: body,
    })
}
