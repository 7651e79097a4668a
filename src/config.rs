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

//! Configuration types for the device identity client.
//!
//! This module provides the enrollment client configuration, the transport
//! retry settings shared by every component, and the settings provider
//! collaborator that resolves server addresses per module.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KryptonError, Result};

/// Default number of transport retries.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// Default wait for a 429 response without a usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(3);

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Address key used when no server-specific address is configured.
pub const DEFAULT_ADDRESS_KEY: &str = "default";

/// Kind of bearer credential used to authorize enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Azure AD token, pre-supplied or fetched from a token server.
    AzureAd,
    /// Bulk-enrollment token, pre-supplied or fetched per tenant.
    Enrollment,
    /// HP business platform token, always pre-supplied.
    Hpbp,
    /// Device token issued by the STS, always pre-supplied.
    Device,
}

impl TokenType {
    /// Wire value sent in the token-type header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureAd => "azuread",
            Self::Enrollment => "enrollment",
            Self::Hpbp => "hpbp",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = KryptonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "azuread" => Ok(Self::AzureAd),
            "enrollment" => Ok(Self::Enrollment),
            "hpbp" => Ok(Self::Hpbp),
            "device" => Ok(Self::Device),
            other => Err(KryptonError::InvalidTokenType(other.to_string())),
        }
    }
}

/// Retry and connection settings for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Number of retries after the first attempt.
    pub max_retry: u32,

    /// Statuses that are retried as "not there yet".
    pub ignore_status: Vec<u16>,

    /// Wait applied to a 429 response without a usable `Retry-After`.
    pub default_retry_after: Duration,

    /// Linear backoff step; retry `i` waits `i * backoff_unit`.
    pub backoff_unit: Duration,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Extra PEM-encoded root certificates to trust.
    pub root_certificates: Vec<Vec<u8>>,

    /// Accept any server certificate (insecure, for testing only).
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            ignore_status: Vec::new(),
            default_retry_after: DEFAULT_RETRY_AFTER,
            backoff_unit: Duration::from_secs(1),
            timeout: DEFAULT_TIMEOUT,
            root_certificates: Vec::new(),
            accept_invalid_certs: false,
        }
    }
}

impl TransportConfig {
    /// Set the retry budget. Zero means no retries.
    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Set statuses that should be retried.
    pub fn ignore_status(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.ignore_status = statuses.into();
        self
    }

    /// Set the linear backoff step.
    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Set the fallback wait for 429 responses.
    pub fn default_retry_after(mut self, wait: Duration) -> Self {
        self.default_retry_after = wait;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for an enrollment session.
#[derive(Clone)]
pub struct ClientConfig {
    /// Enrollment service base URL, including the API base path.
    pub enroll_url: Url,

    /// Security token service base URL, including the API base path.
    pub dsts_url: Option<Url>,

    /// Server that issues AzureAD or enrollment bearer tokens.
    pub token_server_url: Option<Url>,

    /// Bearer credential kind.
    pub token_type: TokenType,

    /// Pre-supplied JWT used as bearer.
    pub jwt: Option<String>,

    /// Pre-supplied bulk-enrollment token.
    pub bulk_enroll_token: Option<String>,

    /// Management service reported in the enrollment payload.
    pub management_service: String,

    /// Hardware hash reported in the enrollment payload.
    pub hardware_hash: String,

    /// Tenant used to scope fetched bearer tokens.
    pub tenant_id: Option<String>,

    /// Transport settings.
    pub transport: TransportConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("enroll_url", &self.enroll_url.as_str())
            .field("dsts_url", &self.dsts_url.as_ref().map(Url::as_str))
            .field(
                "token_server_url",
                &self.token_server_url.as_ref().map(Url::as_str),
            )
            .field("token_type", &self.token_type)
            .field("jwt", &self.jwt.is_some())
            .field("bulk_enroll_token", &self.bulk_enroll_token.is_some())
            .field("management_service", &self.management_service)
            .field("tenant_id", &self.tenant_id)
            .field("transport", &self.transport)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Build a configuration from a settings provider.
    ///
    /// Addresses are looked up for the `es`, `dsts` and `auth` servers, with
    /// `api_base_path` appended to the enrollment and STS addresses.
    pub fn from_settings(
        settings: &impl SettingsProvider,
        api_base_path: &str,
    ) -> Result<ClientConfigBuilder> {
        let es = required_address(settings, "es")?;
        let dsts = required_address(settings, "dsts")?;
        let base = api_base_path.trim_matches('/');

        let mut builder = ClientConfig::builder()
            .enroll_url(join_base(&es, base))?
            .dsts_url(join_base(&dsts, base))?
            .token_type(settings.token_type()?);

        if let Some(auth) = settings.address("auth") {
            builder = builder.token_server_url(format!(
                "{}/api/v1/token",
                auth.trim_end_matches('/')
            ))?;
        }
        if let Some(mgmt) = settings.management_server() {
            builder = builder.management_service(mgmt);
        }
        if let Some(jwt) = settings.access_token() {
            builder = builder.jwt(jwt);
        }
        if let Some(token) = settings.bulk_enroll_token() {
            builder = builder.bulk_enroll_token(token);
        }
        Ok(builder)
    }

    /// Build an endpoint URL under the enrollment service base.
    pub fn enroll_endpoint(&self, path: &str) -> Result<Url> {
        join_path(&self.enroll_url, path)
    }

    /// Token server URL, with the `enrollment` default applied.
    pub fn effective_token_server(&self) -> Result<Option<Url>> {
        match (&self.token_server_url, self.token_type, &self.dsts_url) {
            (Some(url), _, _) => Ok(Some(url.clone())),
            (None, TokenType::Enrollment, Some(dsts)) => {
                join_path(dsts, crate::types::paths::ENROLLMENT_TOKEN).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn required_address(settings: &impl SettingsProvider, server: &str) -> Result<String> {
    settings
        .address(server)
        .ok_or_else(|| KryptonError::configuration(format!("no address for server '{server}'")))
}

fn join_base(address: &str, base: &str) -> String {
    let address = address.trim_end_matches('/');
    if base.is_empty() {
        address.to_string()
    } else {
        format!("{address}/{base}")
    }
}

/// Append `path` to `base` without dropping the base path.
pub(crate) fn join_path(base: &Url, path: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&joined)?)
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    enroll_url: Option<Url>,
    dsts_url: Option<Url>,
    token_server_url: Option<Url>,
    token_type: Option<TokenType>,
    jwt: Option<String>,
    bulk_enroll_token: Option<String>,
    management_service: Option<String>,
    hardware_hash: Option<String>,
    tenant_id: Option<String>,
    retry_count: u32,
    transport: TransportConfig,
}

impl ClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the enrollment service URL.
    pub fn enroll_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.enroll_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the STS URL.
    pub fn dsts_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.dsts_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the bearer token server URL.
    pub fn token_server_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.token_server_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the bearer credential kind.
    pub fn token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = Some(token_type);
        self
    }

    /// Set a pre-supplied JWT.
    pub fn jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    /// Set a pre-supplied bulk-enrollment token.
    pub fn bulk_enroll_token(mut self, token: impl Into<String>) -> Self {
        self.bulk_enroll_token = Some(token.into());
        self
    }

    /// Set the management service.
    pub fn management_service(mut self, service: impl Into<String>) -> Self {
        self.management_service = Some(service.into());
        self
    }

    /// Set the hardware hash.
    pub fn hardware_hash(mut self, hash: impl Into<String>) -> Self {
        self.hardware_hash = Some(hash.into());
        self
    }

    /// Set the tenant used to scope fetched bearer tokens.
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the transport retry count. Zero selects the default.
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout = timeout;
        self
    }

    /// Trust an extra PEM-encoded root certificate.
    pub fn add_root_certificate(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.transport.root_certificates.push(pem.into());
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.transport.accept_invalid_certs = true;
        self
    }

    /// Replace the transport settings wholesale.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the enrollment URL or token type is
    /// not set.
    pub fn build(self) -> Result<ClientConfig> {
        let enroll_url = self
            .enroll_url
            .ok_or_else(|| KryptonError::configuration("enroll_url is required"))?;
        let token_type = self
            .token_type
            .ok_or_else(|| KryptonError::configuration("token_type is required"))?;

        let mut transport = self.transport;
        if self.retry_count > 0 {
            transport.max_retry = self.retry_count;
        }

        Ok(ClientConfig {
            enroll_url,
            dsts_url: self.dsts_url,
            token_server_url: self.token_server_url,
            token_type,
            jwt: self.jwt,
            bulk_enroll_token: self.bulk_enroll_token,
            management_service: self.management_service.unwrap_or_default(),
            hardware_hash: self.hardware_hash.unwrap_or_default(),
            tenant_id: self.tenant_id,
            transport,
        })
    }
}

/// Source of server addresses and authentication settings.
pub trait SettingsProvider {
    /// Base address for the named server, if configured.
    fn address(&self, server: &str) -> Option<String>;

    /// Active bearer token type.
    fn token_type(&self) -> Result<TokenType>;

    /// Management server reported at enrollment.
    fn management_server(&self) -> Option<String>;

    /// Cached access token, if any.
    fn access_token(&self) -> Option<String>;

    /// Cached bulk-enrollment token, if any.
    fn bulk_enroll_token(&self) -> Option<String>;
}

/// In-memory settings, typically deserialized from a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Server addresses keyed by server name, with an optional `default`.
    #[serde(default)]
    pub addresses: HashMap<String, String>,

    /// Token type string.
    pub token_type: String,

    /// Management server.
    #[serde(default, rename = "mgmt_server")]
    pub management_server: Option<String>,

    /// Cached access token.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,

    /// Cached bulk-enrollment token.
    #[serde(default, skip_serializing)]
    pub bulk_enroll_token: Option<String>,
}

impl SettingsProvider for Settings {
    fn address(&self, server: &str) -> Option<String> {
        let address = self
            .addresses
            .get(server)
            .or_else(|| self.addresses.get(DEFAULT_ADDRESS_KEY))
            .cloned();
        if address.is_none() {
            tracing::debug!("No address configured for server {}", server);
        }
        address
    }

    fn token_type(&self) -> Result<TokenType> {
        self.token_type.parse()
    }

    fn management_server(&self) -> Option<String> {
        self.management_server.clone()
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    fn bulk_enroll_token(&self) -> Option<String> {
        self.bulk_enroll_token.clone()
    }
}
