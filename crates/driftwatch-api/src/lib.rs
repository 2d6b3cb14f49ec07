//! Reqwest-backed client for the remote change-detection service.
//!
//! Thin wrapper: issue the request, map transport and HTTP failures into
//! the closed [`ApiError`] taxonomy, validate the body at the boundary.

use async_trait::async_trait;
use driftwatch_core::{
    history_from_map, ApiError, HistoryMap, Snapshot, Watch, WatchApi, WatchListing, WatchRecord,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

pub struct ApiClient {
    base: String,
    api_key: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let base = normalize_base_url(&config.base_url)?;
        let api_key = resolve_api_key(&config.api_key);
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        debug!(
            "api client ready: base={base} timeout_ms={}",
            config.timeout.as_millis()
        );
        Ok(Self {
            base,
            api_key,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base))
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, path));
        }
        let body = response
            .text()
            .await
            .map_err(map_transport_error)?;
        serde_json::from_str(&body)
            .map_err(|err| ApiError::Parse(format!("{path}: {err}")))
    }
}

#[async_trait]
impl WatchApi for ApiClient {
    async fn list_watches(&self) -> Result<Vec<Watch>, ApiError> {
        let listing: WatchListing = self.get_json("/watches").await?;
        let mut watches = Vec::with_capacity(listing.len());
        for (id, record) in listing {
            watches.push(record.into_watch(&id)?);
        }
        watches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(watches)
    }

    async fn get_watch(&self, id: &str) -> Result<Watch, ApiError> {
        let record: WatchRecord = self.get_json(&format!("/watch/{id}")).await?;
        record.into_watch(id)
    }

    async fn trigger_recheck(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/watch/{id}/recheck");
        let response = self
            .request(reqwest::Method::POST, &path)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, &path));
        }
        Ok(())
    }

    async fn fetch_history(&self, id: &str) -> Result<Vec<Snapshot>, ApiError> {
        let map: HistoryMap = self.get_json(&format!("/watch/{id}/history")).await?;
        Ok(history_from_map(map))
    }

    async fn fetch_diff(&self, id: &str, from: &str, to: &str) -> Result<String, ApiError> {
        let path = format!("/watch/{id}/diff");
        let response = self
            .request(reqwest::Method::GET, &path)
            .query(&[("from", from), ("to", to)])
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, &path));
        }
        response.text().await.map_err(map_transport_error)
    }
}

/// Validate the base URL and strip any trailing slash so route paths can
/// be appended verbatim.
fn normalize_base_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ApiError::Parse("empty base url".to_string()));
    }
    let parsed =
        Url::parse(trimmed).map_err(|err| ApiError::Parse(format!("base url '{trimmed}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::Parse(format!(
            "base url '{trimmed}': unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    Ok(trimmed.to_string())
}

/// A configured key of `$VARNAME` is read from the environment once here.
fn resolve_api_key(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix('$') {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => raw.to_string(),
    }
}

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Network(format!("request timed out: {err}"))
    } else {
        ApiError::Network(err.to_string())
    }
}

fn error_for_status(status: StatusCode, context: &str) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Auth(format!("{context}: http {status}"))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(context.to_string()),
        other => ApiError::Network(format!("{context}: http {other}")),
    }
}
