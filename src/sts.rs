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

//! Proof-of-possession token exchange with the security token service.
//!
//! Device and application identities use the same three steps:
//!
//! 1. `GET {dsts}/{deviceauth|appauth}/challenge?{device_id|app_id}=...`
//! 2. sign an RS512 assertion binding the subject to the challenge nonce
//! 3. `POST {dsts}/{deviceauth|appauth}/token` with the assertion
//!
//! A [`Challenge`] and an [`Assertion`] are consumed by value, so neither can
//! be used twice.

use std::fmt;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::DeviceTokenRecord;
use crate::config::{join_path, ClientConfig};
use crate::csr::DeviceKey;
use crate::error::{KryptonError, Result};
use crate::transport::{HttpRequest, Transport};
use crate::types::{grant_types, paths, AccessToken, CertificateRecord, Challenge};

/// Assertion lifetime in seconds.
pub const ASSERTION_LIFETIME_SECS: u64 = 600;

/// Which kind of identity is exchanging a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// Enrolled device, identified by device id.
    Device,
    /// Registered application, identified by app id.
    App,
}

impl IdentityKind {
    /// STS path segment.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Device => "deviceauth",
            Self::App => "appauth",
        }
    }

    /// Query/form parameter carrying the subject id.
    pub fn subject_param(&self) -> &'static str {
        match self {
            Self::Device => "device_id",
            Self::App => "app_id",
        }
    }
}

/// Claims of a client assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer; the subject id.
    pub iss: String,
    /// Subject id.
    pub sub: String,
    /// Challenge nonce.
    pub nonce: String,
    /// Expiry, Unix seconds.
    pub exp: u64,
    /// Not before, Unix seconds.
    pub nbf: u64,
    /// Issued at, Unix seconds.
    pub iat: u64,
    /// Random token id.
    pub jti: String,
}

impl AssertionClaims {
    fn new(subject_id: &str, nonce: String) -> Self {
        let now = jsonwebtoken::get_current_timestamp();
        Self {
            iss: subject_id.to_string(),
            sub: subject_id.to_string(),
            nonce,
            exp: now + ASSERTION_LIFETIME_SECS,
            nbf: now,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// A signed, single-use client assertion.
pub struct Assertion(String);

impl Assertion {
    /// Compact JWT.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the compact JWT.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Assertion(<redacted>)")
    }
}

/// Signs client assertions with a private key.
pub struct AssertionSigner {
    key: EncodingKey,
}

impl fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AssertionSigner")
    }
}

impl AssertionSigner {
    /// Create a signer for `key`.
    pub fn new(key: &DeviceKey) -> Result<Self> {
        Ok(Self {
            key: EncodingKey::from_rsa_der(&key.to_pkcs1_der()?),
        })
    }

    /// Sign an RS512 assertion for `subject_id` over `challenge`.
    ///
    /// With `cert_chain` (base64 DER certificates, leaf first) the chain is
    /// placed in the `x5c` header so the STS can tie the key to the enrolled
    /// certificate.
    pub fn sign(
        &self,
        subject_id: &str,
        challenge: Challenge,
        cert_chain: Option<&[String]>,
    ) -> Result<Assertion> {
        let mut header = Header::new(Algorithm::RS512);
        header.x5c = cert_chain.map(<[String]>::to_vec);

        let claims = AssertionClaims::new(subject_id, challenge.challenge);
        let token = jsonwebtoken::encode(&header, &claims, &self.key)?;
        tracing::debug!("Signed assertion {} for {}", claims.jti, subject_id);
        Ok(Assertion(token))
    }
}

/// Decode JWT claims without verifying the signature or expiry.
pub fn claims_unverified<T: DeserializeOwned>(token: &str) -> Result<T> {
    let mut validation = Validation::new(Algorithm::RS512);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<T>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Client for the security token service.
#[derive(Debug, Clone)]
pub struct StsClient {
    base: Url,
    transport: Transport,
}

impl StsClient {
    /// Create a client for the STS at `base` (including the API base path).
    pub fn new(base: Url, transport: Transport) -> Self {
        Self { base, transport }
    }

    /// Create a client from the session configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base = config
            .dsts_url
            .clone()
            .ok_or_else(|| KryptonError::configuration("dsts_url is required"))?;
        Ok(Self::new(base, Transport::new(&config.transport)?))
    }

    fn endpoint(&self, kind: IdentityKind, leaf: &str) -> Result<Url> {
        join_path(&self.base, &format!("{}/{}", kind.path(), leaf))
    }

    /// Fetch a challenge for `subject_id`.
    pub async fn get_challenge(&self, subject_id: &str, kind: IdentityKind) -> Result<Challenge> {
        let mut url = self.endpoint(kind, "challenge")?;
        url.query_pairs_mut()
            .append_pair(kind.subject_param(), subject_id);

        let response = self
            .transport
            .execute(&HttpRequest::get(url))
            .await?
            .expect_status(200)?;
        response.json()
    }

    /// Exchange a signed assertion for an access token.
    pub async fn exchange(
        &self,
        assertion: Assertion,
        subject_id: &str,
        kind: IdentityKind,
    ) -> Result<AccessToken> {
        let url = self.endpoint(kind, "token")?;

        let mut form = vec![
            ("client_assertion_type", grant_types::JWT_BEARER_ASSERTION.to_string()),
            ("client_assertion", assertion.into_string()),
        ];
        if kind == IdentityKind::App {
            form.push((kind.subject_param(), subject_id.to_string()));
        }

        let response = self
            .transport
            .execute(&HttpRequest::post(url).form(form))
            .await?
            .expect_status(200)?;
        let token: AccessToken = response.json()?;
        tracing::info!("Acquired {:?} token for {}", kind, subject_id);
        Ok(token)
    }

    /// Challenge, sign and exchange in one call.
    pub async fn acquire_token(
        &self,
        subject_id: &str,
        kind: IdentityKind,
        signer: &AssertionSigner,
        cert_chain: Option<&[String]>,
    ) -> Result<AccessToken> {
        let challenge = self.get_challenge(subject_id, kind).await?;
        let assertion = signer.sign(subject_id, challenge, cert_chain)?;
        self.exchange(assertion, subject_id, kind).await
    }

    /// Device token for an issued certificate and the key it was issued for.
    pub async fn get_device_token(
        &self,
        record: &CertificateRecord,
        key: &DeviceKey,
    ) -> Result<DeviceTokenRecord> {
        let signer = AssertionSigner::new(key)?;
        let chain = [record.certificate_base64().to_string()];
        let token = self
            .acquire_token(record.device_id(), IdentityKind::Device, &signer, Some(&chain))
            .await?;
        Ok(DeviceTokenRecord {
            device_token: token.access_token,
            device_id: record.device_id().to_string(),
        })
    }

    /// App token for a registered application key.
    pub async fn get_app_token(&self, app_id: &str, key: &DeviceKey) -> Result<AccessToken> {
        let signer = AssertionSigner::new(key)?;
        self.acquire_token(app_id, IdentityKind::App, &signer, None)
            .await
    }

    /// STS signing keys.
    pub async fn get_jwks(&self) -> Result<JwkSet> {
        let url = join_path(&self.base, paths::KEYS)?;
        let response = self
            .transport
            .execute(&HttpRequest::get(url))
            .await?
            .expect_status(200)?;
        response.json()
    }
}
