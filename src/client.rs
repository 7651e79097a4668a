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

//! Enrollment session.
//!
//! This module provides [`EnrollmentSession`], which drives one device
//! through CSR enrollment against the enrollment service:
//!
//! ```text
//! Idle --enroll()--> Submitted --get_status()--> Pending | Issued | Failed
//!                                   ^               |
//!                                   +---------------+  (caller re-polls)
//! ```
//!
//! The bearer presented at submission is kept in the [`EnrollmentRecord`] and
//! presented again for every status lookup of that enrollment; the service
//! correlates the two calls by bearer identity.

use std::fmt;

use rand::rngs::OsRng;
use reqwest::Method;
use rsa::rand_core::CryptoRngCore;
use url::Url;

use crate::bearer::{BearerToken, BearerTokenProvider};
use crate::config::{ClientConfig, TokenType};
use crate::csr::{generate_key_and_csr, DeviceKey};
use crate::error::{KryptonError, Result};
use crate::transport::{HttpRequest, Transport};
use crate::types::{
    headers, paths, CertificateResponse, EnrollAccepted, EnrollRequest, EnrollToken,
    EnrollmentRecord, EnrollmentResponse, EnrollmentStatus,
};
use crate::validation::CertificateValidator;

/// Retry budget for enrollment submission, renewal and unenrollment.
pub const ENROLL_RETRY_COUNT: u32 = 10;

/// Client session for enrolling one device.
///
/// # Example
///
/// ```no_run
/// use krypton_client::{ClientConfig, EnrollmentSession, TokenType};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::builder()
///     .enroll_url("https://es.example.com/api/v1")?
///     .token_type(TokenType::Hpbp)
///     .jwt("eyJ...")
///     .build()?;
///
/// let mut session = EnrollmentSession::new(config)?;
/// let record = session.enroll().await?;
/// println!("submitted enrollment {}", record.id);
///
/// let status = session.get_status().await?;
/// if let Some(cert) = status.certificate() {
///     println!("device {} issued, thumbprint {}", cert.device_id(), cert.thumbprint());
/// }
/// # Ok(())
/// # }
/// ```
pub struct EnrollmentSession<R = OsRng> {
    config: ClientConfig,
    transport: Transport,
    provider: BearerTokenProvider,
    validator: CertificateValidator,
    rng: R,
    key: Option<DeviceKey>,
    record: Option<EnrollmentRecord>,
}

impl<R> fmt::Debug for EnrollmentSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollmentSession")
            .field("config", &self.config)
            .field("provider", &self.provider)
            .field("key", &self.key)
            .field("record", &self.record)
            .finish()
    }
}

impl EnrollmentSession<OsRng> {
    /// Create a session drawing key material from the OS RNG.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the bearer strategy cannot be built,
    /// or an error if TLS configuration fails.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_rng(config, OsRng)
    }
}

impl<R: CryptoRngCore> EnrollmentSession<R> {
    /// Create a session drawing key material from `rng`.
    pub fn with_rng(config: ClientConfig, rng: R) -> Result<Self> {
        let provider = BearerTokenProvider::from_config(&config)?;
        let transport = Transport::new(&config.transport)?;
        Ok(Self {
            config,
            transport,
            provider,
            validator: CertificateValidator::new(),
            rng,
            key: None,
            record: None,
        })
    }

    /// Replace the certificate validator.
    pub fn with_validator(mut self, validator: CertificateValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Get the session configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current enrollment, if one was submitted.
    pub fn record(&self) -> Option<&EnrollmentRecord> {
        self.record.as_ref()
    }

    /// Key generated for the latest CSR.
    pub fn device_key(&self) -> Option<&DeviceKey> {
        self.key.as_ref()
    }

    /// PKCS#1 PEM of the key generated for the latest CSR.
    pub fn key_pem(&self) -> Result<String> {
        self.key
            .as_ref()
            .ok_or_else(|| KryptonError::key("no key has been generated yet"))?
            .to_pkcs1_pem()
    }

    // =========================================================================
    // Enrollment
    // =========================================================================

    /// Submit a fresh CSR.
    ///
    /// A new key pair is generated for every call. The bearer used is kept
    /// for [`get_status`](Self::get_status).
    pub async fn enroll(&mut self) -> Result<EnrollmentRecord> {
        let bearer = self.provider.acquire(&self.transport).await?;
        let (key, payload) = self.payload()?;

        let url = self.config.enroll_endpoint(paths::ENROLL)?;
        tracing::debug!("enroll: {} {}", url, self.provider.token_type());
        let request = self
            .request(Method::POST, url, self.provider.token_type(), &bearer)?
            .json(&payload)?;

        let record = self.submit(&request, bearer).await?;
        tracing::info!("Enrollment {} submitted", record.id);
        self.key = Some(key);
        self.record = Some(record.clone());
        Ok(record)
    }

    /// Poll the current enrollment once, with the bearer it was submitted with.
    ///
    /// A pending enrollment is returned as [`EnrollmentResponse::Pending`];
    /// call again after `retry_after` seconds. An issued certificate is
    /// validated before it is returned.
    pub async fn get_status(&mut self) -> Result<EnrollmentResponse> {
        let record = self
            .record
            .as_ref()
            .ok_or_else(|| KryptonError::configuration("no enrollment has been submitted"))?;
        let id = record.id.clone();
        let bearer = record.bearer.clone();
        self.poll_status(&id, &bearer).await
    }

    /// Poll enrollment `id` once.
    ///
    /// The retained bearer is reused when `id` is the current enrollment;
    /// otherwise a bearer is acquired from the configured strategy.
    pub async fn get_status_for(&mut self, id: &str) -> Result<EnrollmentResponse> {
        let bearer = match &self.record {
            Some(record) if record.id == id => record.bearer.clone(),
            _ => self.provider.acquire(&self.transport).await?,
        };
        self.poll_status(id, &bearer).await
    }

    /// Enroll, then poll once.
    ///
    /// # Errors
    ///
    /// A failed poll is reported as [`KryptonError::StatusPoll`] carrying the
    /// enrollment id, so the caller can poll again instead of re-enrolling.
    pub async fn get_device_certificate(&mut self) -> Result<EnrollmentResponse> {
        let record = self.enroll().await?;
        self.get_status()
            .await
            .map_err(|e| KryptonError::status_poll(record.id, e))
    }

    /// Renew the enrollment of `device_id` with a fresh CSR.
    ///
    /// Authorized with the device's own token.
    pub async fn renew_enroll(
        &mut self,
        device_id: &str,
        device_token: &str,
    ) -> Result<EnrollmentRecord> {
        let bearer = BearerToken::new(device_token);
        let (key, payload) = self.payload()?;

        let url = self.device_endpoint(device_id)?;
        let request = self
            .request(Method::PATCH, url, TokenType::Device, &bearer)?
            .json(&payload)?;

        let record = self.submit(&request, bearer).await?;
        tracing::info!("Renewal {} submitted for device {}", record.id, device_id);
        self.key = Some(key);
        self.record = Some(record.clone());
        Ok(record)
    }

    /// Unenroll `device_id`.
    ///
    /// Authorized with the device's own token. The body carries the same
    /// payload as an enrollment; the key behind its CSR is not retained.
    pub async fn unenroll(&mut self, device_id: &str, device_token: &str) -> Result<EnrollmentRecord> {
        let bearer = BearerToken::new(device_token);
        let (_, payload) = self.payload()?;

        let url = self.device_endpoint(device_id)?;
        let request = self
            .request(Method::DELETE, url, TokenType::Device, &bearer)?
            .json(&payload)?;

        let record = self.submit(&request, bearer).await?;
        tracing::info!("Unenrollment {} submitted for device {}", record.id, device_id);
        Ok(record)
    }

    // =========================================================================
    // Bulk-enrollment tokens
    // =========================================================================

    /// Issue a bulk-enrollment token for the bearer's tenant.
    pub async fn create_enroll_token(&self) -> Result<EnrollToken> {
        let bearer = self.provider.acquire(&self.transport).await?;
        let url = self.config.enroll_endpoint(paths::ENROLL_TOKEN)?;
        let request = self.request(Method::POST, url, self.provider.token_type(), &bearer)?;

        let response = self.transport.execute(&request).await?;
        let status = response.status;
        let response = response.expect_status(200).map_err(|e| {
            tracing::error!("Create enroll token failed: {}", e);
            e
        })?;

        let mut token: EnrollToken = response.json()?;
        token.http_code = status;
        tracing::info!("Created enroll token for tenant {}", token.tenant_id);
        Ok(token)
    }

    /// Revoke the bulk-enrollment token of the bearer's tenant.
    pub async fn delete_enroll_token(&self) -> Result<EnrollToken> {
        let bearer = self.provider.acquire(&self.transport).await?;
        let url = self.config.enroll_endpoint(paths::ENROLL_TOKEN)?;
        let request = self.request(Method::DELETE, url, self.provider.token_type(), &bearer)?;

        let response = self
            .transport
            .execute(&request)
            .await?
            .expect_success()
            .map_err(|e| {
                tracing::error!("Delete enroll token failed: {}", e);
                e
            })?;
        Ok(EnrollToken {
            http_code: response.status,
            ..Default::default()
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn payload(&mut self) -> Result<(DeviceKey, EnrollRequest)> {
        let (key, csr) = generate_key_and_csr(&mut self.rng)?;
        let payload = EnrollRequest {
            csr: csr.to_base64(),
            management_service: self.config.management_service.clone(),
            hardware_hash: self.config.hardware_hash.clone(),
        };
        Ok((key, payload))
    }

    fn device_endpoint(&self, device_id: &str) -> Result<Url> {
        if device_id.trim().is_empty() {
            return Err(KryptonError::configuration("device id is required"));
        }
        self.config
            .enroll_endpoint(&format!("{}/{}", paths::ENROLL, device_id))
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        token_type: TokenType,
        bearer: &BearerToken,
    ) -> Result<HttpRequest> {
        HttpRequest::new(method, url)
            .header(headers::TOKEN_TYPE, token_type.as_str())?
            .header("Accept", "application/json")?
            .bearer(bearer)
    }

    async fn submit(&self, request: &HttpRequest, bearer: BearerToken) -> Result<EnrollmentRecord> {
        let response = self
            .transport
            .with_max_retry(ENROLL_RETRY_COUNT)
            .execute(request)
            .await?
            .expect_status(202)
            .map_err(|e| {
                tracing::error!("Enrollment request failed: {}", e);
                e
            })?;
        let accepted: EnrollAccepted = response.json()?;
        Ok(EnrollmentRecord::submitted(accepted.id, bearer))
    }

    async fn poll_status(&mut self, id: &str, bearer: &BearerToken) -> Result<EnrollmentResponse> {
        let url = self
            .config
            .enroll_endpoint(&format!("{}/{}", paths::ENROLL, id))?;
        tracing::debug!("get enroll status: {}", url);
        let request = self.request(Method::GET, url, self.provider.token_type(), bearer)?;

        let response = self.transport.execute(&request).await?.expect_success()?;
        let payload: CertificateResponse = response.json()?;
        let status = EnrollmentStatus::from_response(&payload);
        tracing::info!("Enrollment {} is {:?}", id, status);

        let outcome = match status {
            EnrollmentStatus::Issued => self
                .validator
                .certificate_record(&payload)
                .map(|record| EnrollmentResponse::Issued(Box::new(record))),
            EnrollmentStatus::Failed => Err(KryptonError::EnrollmentFailed {
                id: id.to_string(),
                status: payload.status.clone(),
            }),
            EnrollmentStatus::Pending | EnrollmentStatus::Submitted => {
                Ok(EnrollmentResponse::Pending {
                    id: id.to_string(),
                    retry_after: payload.retry_after,
                })
            }
        };

        if let Some(record) = self.record.as_mut().filter(|r| r.id == id) {
            record.status = match &outcome {
                Ok(EnrollmentResponse::Pending { .. }) => EnrollmentStatus::Pending,
                Ok(EnrollmentResponse::Issued(_)) => EnrollmentStatus::Issued,
                Err(_) => EnrollmentStatus::Failed,
            };
            record.retry_after = payload.retry_after;
        }
        if let Err(e) = &outcome {
            tracing::error!("Enrollment {} rejected: {}", id, e);
        }
        outcome
    }
}
