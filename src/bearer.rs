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

//! Bearer credentials for enrollment calls.
//!
//! The credential depends on the configured [`TokenType`]:
//!
//! | Token type   | Source                                                  |
//! |--------------|---------------------------------------------------------|
//! | `azuread`    | pre-supplied JWT, else raw body of `GET {token_server}` |
//! | `enrollment` | bulk token, else `{token}` of `POST {token_server}`     |
//! | `hpbp`       | pre-supplied JWT                                        |
//! | `device`     | pre-supplied device token                               |

use std::fmt;

use url::Url;

use crate::config::{ClientConfig, TokenType};
use crate::error::{KryptonError, Result};
use crate::transport::{is_connection_refused, HttpRequest, Transport};
use crate::types::EnrollmentTokenResponse;

/// Attempts made by [`BearerTokenProvider::acquire`] on refused connections.
pub const BEARER_TOKEN_RETRY_COUNT: u32 = 10;

/// An opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token. Surrounding whitespace is dropped.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(token.as_ref().trim().to_string())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Strategy producing the bearer for enrollment calls.
#[derive(Clone)]
pub enum BearerTokenProvider {
    /// Azure AD token.
    AzureAd {
        /// Pre-supplied JWT.
        jwt: Option<String>,
        /// Token server queried when no JWT is supplied.
        token_server: Option<Url>,
        /// Tenant scoping the fetched token.
        tenant_id: Option<String>,
    },
    /// Bulk-enrollment token.
    Enrollment {
        /// Pre-supplied bulk token.
        bulk_token: Option<String>,
        /// Token server queried when no bulk token is supplied.
        token_server: Option<Url>,
        /// Tenant scoping the fetched token.
        tenant_id: Option<String>,
    },
    /// HP business platform token.
    Hpbp {
        /// Pre-supplied JWT.
        jwt: String,
    },
    /// Device token.
    Device {
        /// Pre-supplied device token.
        jwt: String,
    },
}

impl fmt::Debug for BearerTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AzureAd {
                jwt, token_server, ..
            } => f
                .debug_struct("AzureAd")
                .field("jwt", &jwt.is_some())
                .field("token_server", &token_server.as_ref().map(Url::as_str))
                .finish(),
            Self::Enrollment {
                bulk_token,
                token_server,
                ..
            } => f
                .debug_struct("Enrollment")
                .field("bulk_token", &bulk_token.is_some())
                .field("token_server", &token_server.as_ref().map(Url::as_str))
                .finish(),
            Self::Hpbp { .. } => f.write_str("Hpbp"),
            Self::Device { .. } => f.write_str("Device"),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

impl BearerTokenProvider {
    /// Select the strategy for the configured token type.
    ///
    /// # Errors
    ///
    /// Fails before any network call when the selected strategy has neither a
    /// pre-supplied token nor a server to fetch one from.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let jwt = non_empty(&config.jwt);
        match config.token_type {
            TokenType::AzureAd => {
                let token_server = config.effective_token_server()?;
                if jwt.is_none() && token_server.is_none() {
                    return Err(KryptonError::configuration(
                        "azuread token type needs a jwt or a token server",
                    ));
                }
                Ok(Self::AzureAd {
                    jwt,
                    token_server,
                    tenant_id: config.tenant_id.clone(),
                })
            }
            TokenType::Enrollment => {
                let bulk_token = non_empty(&config.bulk_enroll_token);
                let token_server = config.effective_token_server()?;
                if bulk_token.is_none() && token_server.is_none() {
                    return Err(KryptonError::configuration(
                        "enrollment token type needs a bulk token, a token server or a dsts url",
                    ));
                }
                Ok(Self::Enrollment {
                    bulk_token,
                    token_server,
                    tenant_id: config.tenant_id.clone(),
                })
            }
            TokenType::Hpbp => Ok(Self::Hpbp {
                jwt: jwt.ok_or_else(|| KryptonError::configuration("hpbp token type needs a jwt"))?,
            }),
            TokenType::Device => Ok(Self::Device {
                jwt: jwt
                    .ok_or_else(|| KryptonError::configuration("device token type needs a jwt"))?,
            }),
        }
    }

    /// Token type sent alongside the bearer.
    pub fn token_type(&self) -> TokenType {
        match self {
            Self::AzureAd { .. } => TokenType::AzureAd,
            Self::Enrollment { .. } => TokenType::Enrollment,
            Self::Hpbp { .. } => TokenType::Hpbp,
            Self::Device { .. } => TokenType::Device,
        }
    }

    /// Produce a bearer with a single fetch.
    pub async fn fetch(&self, transport: &Transport) -> Result<BearerToken> {
        match self {
            Self::AzureAd {
                jwt: Some(jwt), ..
            }
            | Self::Enrollment {
                bulk_token: Some(jwt),
                ..
            }
            | Self::Hpbp { jwt }
            | Self::Device { jwt } => Ok(BearerToken::new(jwt)),
            Self::AzureAd {
                jwt: None,
                token_server,
                tenant_id,
            } => {
                let url = token_url(token_server, tenant_id)?;
                let response = transport
                    .with_ignore_status(Vec::new())
                    .execute(&HttpRequest::get(url))
                    .await?
                    .expect_success()?;
                let token = response.text();
                if token.trim().is_empty() {
                    return Err(KryptonError::decode(
                        response.url.as_str(),
                        "empty token response",
                    ));
                }
                Ok(BearerToken::new(token))
            }
            Self::Enrollment {
                bulk_token: None,
                token_server,
                tenant_id,
            } => {
                let url = token_url(token_server, tenant_id)?;
                let response = transport
                    .with_ignore_status(Vec::new())
                    .execute(&HttpRequest::post(url))
                    .await?
                    .expect_success()?;
                let token: EnrollmentTokenResponse = response.json()?;
                Ok(BearerToken::new(token.token))
            }
        }
    }

    /// Produce a bearer, retrying refused connections.
    ///
    /// Up to [`BEARER_TOKEN_RETRY_COUNT`] attempts are made, waiting
    /// `i * backoff_unit` after attempt `i`. Any other failure is returned
    /// immediately.
    pub async fn acquire(&self, transport: &Transport) -> Result<BearerToken> {
        let unit = transport.policy().backoff_unit;
        let mut attempt = 1;
        loop {
            match self.fetch(transport).await {
                Ok(token) => return Ok(token),
                Err(e) if attempt < BEARER_TOKEN_RETRY_COUNT && is_connection_refused(&e) => {
                    tracing::warn!(
                        "Bearer token server refused connection ({}/{})",
                        attempt,
                        BEARER_TOKEN_RETRY_COUNT
                    );
                    tokio::time::sleep(unit * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to get bearer token: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

fn token_url(token_server: &Option<Url>, tenant_id: &Option<String>) -> Result<Url> {
    let mut url = token_server
        .clone()
        .ok_or_else(|| KryptonError::configuration("token server is not configured"))?;
    if let Some(tenant) = tenant_id.as_deref().filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("tenant_id", tenant);
    }
    Ok(url)
}
