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

//! Interactive device-code login.
//!
//! The poller requests a device code, shows the verification URL, then polls
//! the token endpoint. While the user has not approved yet the server answers
//! 400 or 429 and the poller sleeps `retry_delay`; 200 grants the token and
//! any other status ends the flow. Server errors are terminal here even though
//! [`Transport`] would retry them, so both calls run with a zero retry budget.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::cache::CredentialCache;
use crate::config::join_path;
use crate::error::{KryptonError, Result};
use crate::transport::{HttpRequest, Transport};
use crate::types::{grant_types, paths, AccessToken, DeviceCodeSession};

/// Default number of token polls.
pub const DEFAULT_POLL_COUNT: u32 = 10;

/// Default wait between token polls.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Scopes requested with the device code.
pub const DEVICE_CODE_SCOPE: &str = "openid+enroll";

/// `app_name` sent to the `onecloud` token provider.
pub const DEVICE_CODE_APP_NAME: &str = "krypton_device_code";

/// Device-code grant driver.
#[derive(Clone)]
pub struct DeviceCodePoller {
    transport: Transport,
    server: Url,
    onecloud: bool,
    retry_count: u32,
    retry_delay: Duration,
    cache: Option<Arc<dyn CredentialCache>>,
}

impl std::fmt::Debug for DeviceCodePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodePoller")
            .field("server", &self.server.as_str())
            .field("onecloud", &self.onecloud)
            .field("retry_count", &self.retry_count)
            .field("retry_delay", &self.retry_delay)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl DeviceCodePoller {
    /// Create a poller against the OAuth server at `server`.
    pub fn new(server: Url, transport: &Transport) -> Self {
        Self {
            transport: transport.with_max_retry(0),
            server,
            onecloud: false,
            retry_count: DEFAULT_POLL_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            cache: None,
        }
    }

    /// Number of token polls; 0 selects the default.
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = if count == 0 { DEFAULT_POLL_COUNT } else { count };
        self
    }

    /// Wait between polls that are still pending.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Tag requests for the `onecloud` token provider.
    pub fn with_onecloud_provider(mut self, enabled: bool) -> Self {
        self.onecloud = enabled;
        self
    }

    /// Write the granted token response to `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = join_path(&self.server, path)?;
        if self.onecloud {
            url.query_pairs_mut()
                .append_pair("app_name", DEVICE_CODE_APP_NAME);
        }
        Ok(url)
    }

    /// Ask the server for a device code.
    pub async fn request_code(&self) -> Result<DeviceCodeSession> {
        let url = self.endpoint(paths::DEVICE_AUTHORIZATION)?;
        let request = HttpRequest::post(url).form([("scope", DEVICE_CODE_SCOPE)]);

        let response = self
            .transport
            .execute(&request)
            .await?
            .expect_status(200)?;
        let session: DeviceCodeSession = response.json()?;
        tracing::info!("Please login at this url: {}", session.verification_uri);
        Ok(session)
    }

    /// Poll until the user approves, the server refuses, or the poll budget
    /// runs out.
    ///
    /// # Errors
    ///
    /// A status other than 200/400/429 is a protocol error; running out of
    /// polls is [`KryptonError::AuthorizationPending`].
    pub async fn poll(&self, session: &DeviceCodeSession) -> Result<AccessToken> {
        let url = self.endpoint(paths::DEVICE_TOKEN)?;
        let request = HttpRequest::post(url).form([
            ("grant_type", grant_types::DEVICE_CODE.to_string()),
            ("device_code", session.device_code.clone()),
        ]);

        for attempt in 1..=self.retry_count {
            let response = self.transport.execute(&request).await?;
            match response.status {
                200 => {
                    let token: AccessToken = response.json()?;
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.update(&response.body) {
                            tracing::debug!("failed to cache access token: {}", e);
                        }
                    }
                    tracing::info!("Device code login approved");
                    return Ok(token);
                }
                400 | 429 => {
                    tracing::debug!(
                        "Waiting for token acquire: {} / {}",
                        attempt,
                        self.retry_count
                    );
                    if attempt < self.retry_count {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                _ => return Err(response.into_protocol_error()),
            }
        }

        tracing::error!("unable to acquire token");
        Err(KryptonError::AuthorizationPending {
            attempts: self.retry_count,
        })
    }

    /// Request a code, show the verification URL and poll for the token.
    pub async fn login(&self) -> Result<AccessToken> {
        let session = self.request_code().await?;
        self.poll(&session).await
    }
}
