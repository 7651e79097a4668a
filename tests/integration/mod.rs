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

//! Integration test utilities and helpers
//!
//! Mock enrollment/STS/OAuth servers and certificate fixtures shared by the
//! integration tests.

#![allow(dead_code)]

use std::time::Duration;

use krypton_client::TransportConfig;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// API base path used by every mock service
pub const API_BASE: &str = "/api/v1";

/// Enrollment resource
pub const PATH_ENROLL: &str = "/api/v1/enroll";

/// Bulk-enrollment token resource
pub const PATH_ENROLL_TOKEN: &str = "/api/v1/enroll_token";

/// Default enrollment token server under the STS
pub const PATH_ENROLLMENT_TOKEN: &str = "/api/v1/enrollmenttoken";

/// Device-code endpoints
pub const PATH_DEVICE_AUTHORIZATION: &str = "/services/oauth_handler/device/authorization";
pub const PATH_DEVICE_TOKEN: &str = "/services/oauth_handler/device/token";

/// Transport settings that keep retry tests fast
pub fn fast_transport() -> TransportConfig {
    TransportConfig::default().backoff_unit(Duration::from_millis(10))
}

/// Mock Krypton services for integration tests
pub struct MockKryptonServer {
    server: MockServer,
}

impl MockKryptonServer {
    /// Create a new mock server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the base URL of the mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Base URL including the API base path
    pub fn api_url(&self) -> String {
        format!("{}{}", self.server.uri(), API_BASE)
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Mock an accepted enrollment submission (HTTP 202)
    pub async fn mock_enroll_accepted(&self, id: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_ENROLL))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "id": id })))
            .mount(&self.server)
            .await;
    }

    /// Mock an enrollment status answer
    pub async fn mock_status(&self, id: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("{PATH_ENROLL}/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Mock an issued certificate for enrollment `id`
    pub async fn mock_status_issued(&self, id: &str, device_id: &str, certificate: &str) {
        self.mock_status(
            id,
            json!({
                "id": id,
                "device_id": device_id,
                "certificate": certificate,
                "status": "issued",
            }),
        )
        .await;
    }

    /// Mock an STS challenge for `subject_param=subject`
    pub async fn mock_challenge(&self, kind: &str, subject_param: &str, subject: &str, nonce: &str) {
        Mock::given(method("GET"))
            .and(path(format!("{API_BASE}/{kind}/challenge")))
            .and(query_param(subject_param, subject))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "challenge": nonce })))
            .mount(&self.server)
            .await;
    }

    /// Mock a successful STS token exchange
    pub async fn mock_token_exchange(&self, kind: &str, access_token: &str) {
        Mock::given(method("POST"))
            .and(path(format!("{API_BASE}/{kind}/token")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": access_token, "token_type": "Bearer" })),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock the device authorization endpoint
    pub async fn mock_device_authorization(&self, device_code: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_DEVICE_AUTHORIZATION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": device_code,
                "user_code": "ABCD-EFGH",
                "verification_uri_complete": "https://login.example.com/device?user_code=ABCD-EFGH",
            })))
            .mount(&self.server)
            .await;
    }

    /// Bodies of all requests received on `request_path`
    pub async fn bodies(&self, request_path: &str) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }
}

/// Test fixture helpers
pub mod fixtures {
    use base64::prelude::*;
    use krypton_client::DeviceKey;
    use rcgen::{
        CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
        KeyUsagePurpose, PKCS_RSA_SHA256,
    };

    /// Fresh RSA device key
    pub fn device_key() -> DeviceKey {
        DeviceKey::generate(&mut rand::rngs::OsRng).expect("key generation")
    }

    /// Certificate parameters satisfying the device certificate policy
    pub fn device_params(cn: &str) -> CertificateParams {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params
    }

    /// Self-signed SHA256-RSA certificate, base64 DER
    pub fn certificate_base64(params: CertificateParams, key: &DeviceKey) -> String {
        let pem = key.to_pkcs8_pem().expect("pkcs8 export");
        let key_pair = KeyPair::from_pem_and_sign_algo(&pem, &PKCS_RSA_SHA256).expect("rcgen key");
        let cert = params.self_signed(&key_pair).expect("self-signed certificate");
        BASE64_STANDARD.encode(cert.der())
    }

    /// Valid device certificate for `cn`, base64 DER
    pub fn device_certificate(cn: &str) -> String {
        certificate_base64(device_params(cn), &device_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockKryptonServer::start().await;
        assert!(mock_server.url().starts_with("http://"));
        assert!(mock_server.api_url().ends_with(API_BASE));
    }

    #[test]
    fn test_fixture_certificate_is_base64() {
        let cert = fixtures::device_certificate("d1");
        assert!(BASE64_STANDARD.decode(cert).is_ok());
    }
}
