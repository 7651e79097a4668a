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

//! Error types for the device identity client.
//!
//! Every failure maps onto one of five categories (see [`ErrorCategory`]):
//! transport failures are absorbed by the retry layer up to its budget, all
//! other categories are terminal for the calling flow.

use thiserror::Error;

/// Result type alias using [`KryptonError`].
pub type Result<T> = std::result::Result<T, KryptonError>;

/// Coarse classification of a [`KryptonError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network or connection failure.
    Transport,
    /// Unexpected HTTP status.
    Protocol,
    /// Malformed response body or encoded data.
    Decode,
    /// Issued certificate violates policy.
    Policy,
    /// Invalid or missing configuration, detected before any network call.
    Configuration,
}

/// Certificate policy violations reported by the certificate validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// Current time is outside `[notBefore, notAfter]`.
    #[error("certificate is expired or not yet valid")]
    ExpiredOrNotYetValid,

    /// Signature or public key algorithm is not RSA with SHA-256.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Key usage is missing or is not exactly digital signature.
    #[error("invalid key usage")]
    InvalidKeyUsage,

    /// An extended key usage other than client/server auth is present.
    #[error("invalid extended key usage: {0}")]
    InvalidExtendedKeyUsage(String),

    /// Subject common name does not match the expected identity.
    #[error("identity mismatch: expected '{expected}', certificate CN is '{}'", actual.as_deref().unwrap_or("<none>"))]
    IdentityMismatch {
        /// Identifier the caller expected.
        expected: String,
        /// Common name found in the certificate, if any.
        actual: Option<String>,
    },
}

/// Errors that can occur during enrollment, token exchange or login.
#[derive(Debug, Error)]
pub enum KryptonError {
    /// HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a status the caller does not accept.
    #[error("Unexpected status {status} from {endpoint}: {body}")]
    Protocol {
        /// Endpoint that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnosis.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode {
        /// Endpoint that produced the body.
        endpoint: String,
        /// Decoder message.
        message: String,
    },

    /// Issued certificate failed validation.
    #[error("Certificate policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    /// Token type string is not one of the supported values.
    #[error("Invalid token type: {0}")]
    InvalidTokenType(String),

    /// Missing or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Key generation or key import/export failed.
    #[error("Key error: {0}")]
    Key(String),

    /// Failed to generate a CSR.
    #[error("CSR error: {0}")]
    Csr(String),

    /// Failed to sign or parse a JWT.
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The enrollment service reported a terminal failure.
    #[error("Enrollment {id} failed with status '{status}'")]
    EnrollmentFailed {
        /// Enrollment id.
        id: String,
        /// Status string reported by the service.
        status: String,
    },

    /// Enrollment was submitted but the follow-up status poll failed.
    ///
    /// The enrollment id is kept so the caller can poll again instead of
    /// submitting a duplicate enrollment.
    #[error("Status poll for enrollment {enrollment_id} failed: {source}")]
    StatusPoll {
        /// Id returned by the submission.
        enrollment_id: String,
        /// Underlying failure.
        #[source]
        source: Box<KryptonError>,
    },

    /// Device-code authorization was not granted within the retry budget.
    #[error("Device code authorization not granted after {attempts} attempts")]
    AuthorizationPending {
        /// Number of token polls made.
        attempts: u32,
    },

    /// Credential cache could not be read or written.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl KryptonError {
    /// Create a protocol error for an unexpected status.
    pub fn protocol(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Protocol {
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a key error.
    pub fn key(msg: impl ToString) -> Self {
        Self::Key(msg.to_string())
    }

    /// Create a CSR error.
    pub fn csr(msg: impl ToString) -> Self {
        Self::Csr(msg.to_string())
    }

    /// Create a TLS error.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a cache error.
    pub fn cache(msg: impl ToString) -> Self {
        Self::Cache(msg.to_string())
    }

    /// Wrap a failed status poll with the enrollment id it belongs to.
    pub fn status_poll(enrollment_id: impl Into<String>, source: KryptonError) -> Self {
        Self::StatusPoll {
            enrollment_id: enrollment_id.into(),
            source: Box::new(source),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Http(_) => ErrorCategory::Transport,
            Self::Protocol { .. }
            | Self::EnrollmentFailed { .. }
            | Self::AuthorizationPending { .. } => ErrorCategory::Protocol,
            Self::Decode { .. } | Self::Base64(_) | Self::Der(_) | Self::Jwt(_) => {
                ErrorCategory::Decode
            }
            Self::Policy(_) => ErrorCategory::Policy,
            Self::InvalidTokenType(_)
            | Self::Configuration(_)
            | Self::Url(_)
            | Self::Tls(_)
            | Self::Key(_)
            | Self::Csr(_)
            | Self::Cache(_) => ErrorCategory::Configuration,
            Self::StatusPoll { source, .. } => source.category(),
        }
    }

    /// Returns true if the error is transient.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// Returns the HTTP status for protocol errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            Self::StatusPoll { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns the enrollment id preserved by a failed status poll.
    pub fn enrollment_id(&self) -> Option<&str> {
        match self {
            Self::StatusPoll { enrollment_id, .. } => Some(enrollment_id),
            Self::EnrollmentFailed { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Returns the policy violation, if this is one.
    pub fn policy_violation(&self) -> Option<&PolicyViolation> {
        match self {
            Self::Policy(v) => Some(v),
            Self::StatusPoll { source, .. } => source.policy_violation(),
            _ => None,
        }
    }
}
