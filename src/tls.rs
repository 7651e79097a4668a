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

//! TLS configuration for HTTPS connections.
//
// TLS 1.2 is the minimum; anything older is refused by the client.

use crate::config::TransportConfig;
use crate::error::{KryptonError, Result};

/// Build a reqwest Client with the appropriate TLS configuration.
pub fn build_http_client(config: &TransportConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .use_rustls_tls()
        .min_tls_version(reqwest::tls::Version::TLS_1_2);

    for ca_pem in &config.root_certificates {
        let certs = reqwest::Certificate::from_pem_bundle(ca_pem)
            .map_err(|e| KryptonError::tls(format!("Failed to parse CA certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(KryptonError::tls("No certificate found in CA bundle"));
        }
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    if config.accept_invalid_certs {
        tracing::warn!("Server certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| KryptonError::tls(format!("Failed to build HTTP client: {}", e)))
}
