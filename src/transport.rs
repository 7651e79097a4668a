// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retrying HTTP transport.
//!
//! Every network call made by this crate goes through [`Transport`]. After
//! each attempt `i` (starting at 0) the [`RetryPolicy`] decides whether to try
//! again:
//!
//! - network or connection error: retry after `i * backoff_unit`
//! - status 0 or status above 500: retry after `i * backoff_unit`
//! - status 429: retry after `Retry-After` seconds, or the default wait
//! - status in the ignore list: retry after `i * backoff_unit`
//! - anything else: return the response to the caller
//!
//! Retries stop once `max_retry` retries have been made, so at most
//! `max_retry + 1` attempts reach the server. The last response or error is
//! returned as-is; interpreting non-2xx statuses is left to the caller.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::bearer::BearerToken;
use crate::config::TransportConfig;
use crate::error::{KryptonError, Result};
use crate::tls::build_http_client;
use crate::types::headers;

/// What a single attempt produced, as far as the retry decision cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome<'a> {
    /// The request failed before a response arrived.
    NetworkError,
    /// A response arrived.
    Status {
        /// HTTP status.
        status: u16,
        /// Raw `Retry-After` header, if any.
        retry_after: Option<&'a str>,
    },
}

/// Retry and backoff rules applied after every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retry: u32,
    /// Statuses retried as "not available yet".
    pub ignore_status: Vec<u16>,
    /// Wait for 429 without a usable `Retry-After`.
    pub default_retry_after: Duration,
    /// Linear backoff step.
    pub backoff_unit: Duration,
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_retry: config.max_retry,
            ignore_status: config.ignore_status.clone(),
            default_retry_after: config.default_retry_after,
            backoff_unit: config.backoff_unit,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl RetryPolicy {
    /// Decide whether attempt `attempt` should be followed by another one.
    ///
    /// Returns the wait before the next attempt, or `None` to stop.
    pub fn decide(&self, attempt: u32, outcome: AttemptOutcome<'_>) -> Option<Duration> {
        if attempt >= self.max_retry {
            return None;
        }

        let linear = self.backoff_unit * attempt;
        match outcome {
            AttemptOutcome::NetworkError => Some(linear),
            AttemptOutcome::Status { status, .. } if status == 0 || status > 500 => Some(linear),
            AttemptOutcome::Status {
                status: 429,
                retry_after,
            } => Some(self.retry_after_wait(retry_after)),
            AttemptOutcome::Status { status, .. } if self.ignore_status.contains(&status) => {
                Some(linear)
            }
            AttemptOutcome::Status { .. } => None,
        }
    }

    fn retry_after_wait(&self, header: Option<&str>) -> Duration {
        match header.map(|v| v.trim().parse::<u64>()) {
            Some(Ok(secs)) => Duration::from_secs(secs),
            Some(Err(_)) => {
                tracing::warn!("Invalid Retry-After value: {:?}", header);
                self.default_retry_after
            }
            None => self.default_retry_after,
        }
    }
}

#[derive(Debug, Clone)]
enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A request that can be replayed for every attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
}

impl HttpRequest {
    /// Create a request without body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST request.
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a header. Invalid names or values are a configuration error.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| KryptonError::configuration(format!("invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| KryptonError::configuration(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Authorize with a bearer token.
    pub fn bearer(mut self, token: &BearerToken) -> Result<Self> {
        let mut value = HeaderValue::try_from(token.authorization())
            .map_err(|_| KryptonError::configuration("bearer token is not a valid header value"))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Send a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| KryptonError::configuration(format!("unserializable body: {e}")))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    /// Send a form-encoded body.
    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body = RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    fn build(&self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = http
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
    /// URL the request was sent to.
    pub url: Url,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value as a string, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| KryptonError::decode(self.url.as_str(), e))
    }

    /// Fail with a protocol error unless the status is `expected`.
    pub fn expect_status(self, expected: u16) -> Result<Self> {
        if self.status == expected {
            Ok(self)
        } else {
            Err(self.into_protocol_error())
        }
    }

    /// Fail with a protocol error unless the status is 2xx.
    pub fn expect_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_protocol_error())
        }
    }

    /// Convert into a protocol error carrying endpoint, status and body.
    pub fn into_protocol_error(self) -> KryptonError {
        let body = self.text();
        KryptonError::protocol(self.url.as_str(), self.status, body)
    }
}

/// HTTP executor with the retry policy applied to every call.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl Transport {
    /// Create a transport.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(config)?,
            policy: RetryPolicy::from(config),
        })
    }

    /// Same connection pool, different policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            http: self.http.clone(),
            policy,
        }
    }

    /// Same transport with a different retry budget.
    pub fn with_max_retry(&self, max_retry: u32) -> Self {
        self.with_policy(RetryPolicy {
            max_retry,
            ..self.policy.clone()
        })
    }

    /// Same transport with an ignore list.
    pub fn with_ignore_status(&self, statuses: impl Into<Vec<u16>>) -> Self {
        self.with_policy(RetryPolicy {
            ignore_status: statuses.into(),
            ..self.policy.clone()
        })
    }

    /// Active retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a request, retrying per policy.
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut attempt: u32 = 0;
        loop {
            tracing::debug!("{} {}", request.method, request.url);
            let result = self.send_once(request).await;

            let outcome = match &result {
                Ok(resp) => AttemptOutcome::Status {
                    status: resp.status,
                    retry_after: resp.header(headers::RETRY_AFTER),
                },
                Err(_) => AttemptOutcome::NetworkError,
            };

            let decision = self.policy.decide(attempt, outcome);
            if let Err(e) = &result {
                match decision {
                    Some(_) => tracing::warn!("error = {}, retrying", e),
                    None => tracing::error!("error = {}, giving up after {} retries", e, attempt),
                }
            }

            match decision {
                Some(wait) => {
                    tracing::debug!(
                        "Retrying {} after {:?} ({}/{})",
                        request.url,
                        wait,
                        attempt,
                        self.policy.max_retry
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                None => return result,
            }
        }
    }

    /// Poll `url` until it answers with `expected`.
    ///
    /// Statuses in the ignore list are retried. Any other final status is a
    /// protocol error.
    pub async fn wait_for_status(&self, url: &Url, expected: u16) -> Result<HttpResponse> {
        let response = self.execute(&HttpRequest::get(url.clone())).await?;
        tracing::info!("{} answered {}", url, response.status);
        response.expect_status(expected)
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = request.build(&self.http).send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?.to_vec();
        tracing::debug!("{} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

/// Returns true if `err` or any of its sources is a refused connection.
pub fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
            // io::Error::source skips the wrapped error itself
            if let Some(inner) = io.get_ref() {
                if is_connection_refused(inner) {
                    return true;
                }
            }
        }
        current = e.source();
    }
    false
}
