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

//! Enrollment, token and device-code message types.
//!
//! Wire payloads are plain serde structs; the records handed back to callers
//! ([`EnrollmentRecord`], [`CertificateRecord`]) carry the invariants.

use std::fmt;
use std::time::SystemTime;

use base64::prelude::*;
use der::Decode;
use serde::{Deserialize, Serialize};
use x509_cert::Certificate;

use crate::bearer::BearerToken;
use crate::error::Result;

/// Enrollment submission payload.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollRequest {
    /// Base64 (standard) DER-encoded PKCS#10 request.
    pub csr: String,
    /// Management service.
    #[serde(rename = "mgmt_service")]
    pub management_service: String,
    /// Hardware hash.
    pub hardware_hash: String,
}

/// Body of a 202 enrollment submission, renewal or unenrollment.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollAccepted {
    /// Enrollment id.
    pub id: String,
}

/// Enrollment status payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CertificateResponse {
    /// Enrollment id.
    pub id: String,
    /// Device id assigned by the service.
    pub device_id: String,
    /// Base64 DER certificate, empty until issued.
    pub certificate: String,
    /// Queue receipt handle.
    pub receipt_handle: String,
    /// Suggested wait before polling again, in seconds.
    #[serde(deserialize_with = "null_as_zero")]
    pub retry_after: u64,
    /// Service status string.
    pub status: String,
}

fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

/// Token server answer for the `enrollment` token type.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentTokenResponse {
    /// Bulk-enrollment bearer token.
    pub token: String,
}

/// Bulk-enrollment token as issued by the enrollment service.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrollToken {
    /// Tenant the token enrolls into.
    pub tenant_id: String,
    /// The token.
    #[serde(rename = "enroll_token")]
    pub token: String,
    /// Issue time, Unix seconds.
    pub issued_at: i64,
    /// Expiry, Unix seconds.
    pub expires_at: i64,
    /// Status code of the call that produced this record.
    pub http_code: u16,
}

impl fmt::Debug for EnrollToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollToken")
            .field("tenant_id", &self.tenant_id)
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("http_code", &self.http_code)
            .finish()
    }
}

/// STS challenge.
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// Single-use nonce.
    pub challenge: String,
}

/// Access token answer from the STS or the device-code token endpoint.
#[derive(Clone, Deserialize, Serialize)]
pub struct AccessToken {
    /// Opaque bearer string.
    pub access_token: String,
    /// Token type, usually `Bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Answer of the device authorization endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeSession {
    /// Code used to poll the token endpoint.
    pub device_code: String,
    /// Code the user confirms.
    pub user_code: String,
    /// Verification URL to show to the user.
    #[serde(rename = "verification_uri_complete")]
    pub verification_uri: String,
}

/// State of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    /// Accepted by the service.
    Submitted,
    /// Not issued yet.
    Pending,
    /// Certificate issued.
    Issued,
    /// Rejected by the service.
    Failed,
}

impl EnrollmentStatus {
    /// Returns true for `Issued` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Issued | Self::Failed)
    }

    /// Map a status payload onto a state.
    ///
    /// A certificate always means issued. Without one, a failure status
    /// string is terminal and anything else is still pending.
    pub fn from_response(resp: &CertificateResponse) -> Self {
        if !resp.certificate.is_empty() {
            return Self::Issued;
        }
        match resp.status.to_ascii_lowercase().as_str() {
            "failed" | "failure" | "rejected" | "error" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// An enrollment submission and the bearer it was made with.
///
/// Status lookups reuse `bearer`; the backend correlates the two calls.
#[derive(Debug, Clone)]
pub struct EnrollmentRecord {
    /// Enrollment id returned by the service.
    pub id: String,
    /// Bearer presented at submission.
    pub bearer: BearerToken,
    /// Current state.
    pub status: EnrollmentStatus,
    /// Suggested wait before the next status poll, in seconds.
    pub retry_after: u64,
}

impl EnrollmentRecord {
    /// Record a freshly accepted submission.
    pub fn submitted(id: impl Into<String>, bearer: BearerToken) -> Self {
        Self {
            id: id.into(),
            bearer,
            status: EnrollmentStatus::Submitted,
            retry_after: 0,
        }
    }
}

/// A validated, issued device certificate.
///
/// Only produced by [`crate::validation::CertificateValidator`], so every
/// instance has passed all policy checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub(crate) device_id: String,
    pub(crate) certificate: String,
    pub(crate) thumbprint: String,
    pub(crate) not_before: SystemTime,
    pub(crate) not_after: SystemTime,
    pub(crate) receipt_handle: Option<String>,
}

impl CertificateRecord {
    /// Device id the certificate was issued to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Base64 DER certificate as received.
    pub fn certificate_base64(&self) -> &str {
        &self.certificate
    }

    /// Hex SHA-256 of the DER bytes.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> SystemTime {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    /// Always true: records exist only after validation.
    pub fn is_valid(&self) -> bool {
        true
    }

    /// Queue receipt handle reported with the certificate.
    pub fn receipt_handle(&self) -> Option<&str> {
        self.receipt_handle.as_deref()
    }

    /// DER bytes of the certificate.
    pub fn der(&self) -> Result<Vec<u8>> {
        Ok(BASE64_STANDARD.decode(&self.certificate)?)
    }

    /// Parse the certificate again.
    pub fn certificate(&self) -> Result<Certificate> {
        Ok(Certificate::from_der(&self.der()?)?)
    }
}

/// Outcome of a status poll.
#[derive(Debug, Clone)]
pub enum EnrollmentResponse {
    /// Certificate was issued and validated.
    Issued(Box<CertificateRecord>),

    /// Not issued yet; poll again later.
    Pending {
        /// Enrollment id.
        id: String,
        /// Number of seconds to wait before retrying.
        retry_after: u64,
    },
}

impl EnrollmentResponse {
    /// Returns the certificate record if issued.
    pub fn certificate(&self) -> Option<&CertificateRecord> {
        match self {
            Self::Issued(record) => Some(record),
            Self::Pending { .. } => None,
        }
    }

    /// Returns true if the enrollment is pending.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Returns the retry-after value if pending.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Pending { retry_after, .. } => Some(*retry_after),
            Self::Issued(_) => None,
        }
    }
}

/// HTTP header names.
pub mod headers {
    /// Token-type header on enrollment calls.
    pub const TOKEN_TYPE: &str = "X-HP-Token-Type";

    /// Retry-After header on 429 responses.
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// Endpoint paths relative to a service base URL.
pub mod paths {
    /// Enrollment resource.
    pub const ENROLL: &str = "enroll";

    /// Bulk-enrollment token administration.
    pub const ENROLL_TOKEN: &str = "enroll_token";

    /// Default token server for the `enrollment` token type.
    pub const ENROLLMENT_TOKEN: &str = "enrollmenttoken";

    /// STS signing keys.
    pub const KEYS: &str = "keys";

    /// Device authorization endpoint, relative to the OAuth server.
    pub const DEVICE_AUTHORIZATION: &str = "services/oauth_handler/device/authorization";

    /// Device-code token endpoint, relative to the OAuth server.
    pub const DEVICE_TOKEN: &str = "services/oauth_handler/device/token";
}

/// OAuth grant and assertion type identifiers.
pub mod grant_types {
    /// `client_assertion_type` for JWT-bearer assertions.
    pub const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

    /// Device authorization grant.
    pub const DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
}
