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

//! # krypton-client
//!
//! Client side of the Krypton device identity services.
//!
//! A device enrolls by submitting a CSR to the enrollment service, then
//! exchanges its issued certificate for short-lived access tokens through a
//! challenge-response protocol with the security token service (STS).
//!
//! ## Features
//!
//! - **Async-first design** using Tokio
//! - **Retrying transport** with linear backoff, `Retry-After` and status ignore lists
//! - **CSR enrollment**: enroll, status, renew, unenroll, bulk-enrollment tokens
//! - **Certificate policy validation** of every issued certificate
//! - **Proof-of-possession token exchange** for device and application identities
//! - **Device-code login** for interactive users
//!
//! ## Certificate Enrollment
//!
//! ```no_run
//! use krypton_client::{ClientConfig, EnrollmentResponse, EnrollmentSession, TokenType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .enroll_url("https://es.example.com/api/v1")?
//!         .token_type(TokenType::Enrollment)
//!         .bulk_enroll_token("bulk-token")
//!         .build()?;
//!
//!     let mut session = EnrollmentSession::new(config)?;
//!     session.enroll().await?;
//!
//!     match session.get_status().await? {
//!         EnrollmentResponse::Issued(cert) => {
//!             println!("Device {} enrolled", cert.device_id());
//!         }
//!         EnrollmentResponse::Pending { retry_after, .. } => {
//!             println!("Enrollment pending, retry in {} seconds", retry_after);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Device Token
//!
//! ```no_run
//! use krypton_client::{CertificateRecord, DeviceKey, StsClient, Transport, TransportConfig};
//! use url::Url;
//!
//! # async fn example(cert: CertificateRecord, key: DeviceKey) -> krypton_client::Result<()> {
//! let transport = Transport::new(&TransportConfig::default())?;
//! let sts = StsClient::new(Url::parse("https://dsts.example.com/api/v1")?, transport);
//!
//! let token = sts.get_device_token(&cert, &key).await?;
//! println!("device token for {}", token.device_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bearer;
pub mod cache;
pub mod client;
pub mod config;
pub mod csr;
pub mod device_code;
pub mod error;
pub mod logging;
pub mod sts;
pub mod tls;
pub mod transport;
pub mod types;
pub mod validation;

// Re-export main types at crate root for convenience
pub use bearer::{BearerToken, BearerTokenProvider};
pub use cache::{CredentialCache, DeviceTokenRecord, MemoryCache};
pub use client::EnrollmentSession;
pub use config::{
    ClientConfig, ClientConfigBuilder, Settings, SettingsProvider, TokenType, TransportConfig,
};
pub use csr::{DeviceCsr, DeviceKey};
pub use device_code::DeviceCodePoller;
pub use error::{ErrorCategory, KryptonError, PolicyViolation, Result};
pub use sts::{Assertion, AssertionSigner, IdentityKind, StsClient};
pub use transport::{RetryPolicy, Transport};
pub use types::{
    AccessToken, CertificateRecord, EnrollToken, EnrollmentRecord, EnrollmentResponse,
    EnrollmentStatus,
};
pub use validation::CertificateValidator;

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("krypton-client/", env!("CARGO_PKG_VERSION"));
