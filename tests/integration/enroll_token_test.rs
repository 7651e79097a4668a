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

//! Integration tests for bulk-enrollment token administration

use krypton_client::{ClientConfig, EnrollmentSession, ErrorCategory, TokenType};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::{fast_transport, MockKryptonServer, PATH_ENROLL_TOKEN};

fn session(mock: &MockKryptonServer) -> EnrollmentSession {
    let config = ClientConfig::builder()
        .enroll_url(mock.api_url())
        .unwrap()
        .token_type(TokenType::AzureAd)
        .jwt("app-token")
        .transport(fast_transport())
        .build()
        .unwrap();
    EnrollmentSession::new(config).unwrap()
}

#[tokio::test]
async fn test_create_enroll_token() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("POST"))
        .and(path(PATH_ENROLL_TOKEN))
        .and(header("x-hp-token-type", "azuread"))
        .and(header("authorization", "Bearer app-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tenant_id": "tenant-1",
            "enroll_token": "bulk-secret",
            "issued_at": 1_700_000_000,
            "expires_at": 1_700_086_400,
        })))
        .expect(1)
        .mount(mock.inner())
        .await;

    let token = session(&mock).create_enroll_token().await.unwrap();
    assert_eq!(token.tenant_id, "tenant-1");
    assert_eq!(token.token, "bulk-secret");
    assert_eq!(token.expires_at - token.issued_at, 86_400);
    assert_eq!(token.http_code, 200);
    assert!(!format!("{:?}", token).contains("bulk-secret"));
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_create_enroll_token_unauthorized() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("POST"))
        .and(path(PATH_ENROLL_TOKEN))
        .respond_with(ResponseTemplate::new(401))
        .mount(mock.inner())
        .await;

    let err = session(&mock).create_enroll_token().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Protocol);
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_delete_enroll_token() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(PATH_ENROLL_TOKEN))
        .and(header("authorization", "Bearer app-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(mock.inner())
        .await;

    let token = session(&mock).delete_enroll_token().await.unwrap();
    assert_eq!(token.http_code, 200);
    assert!(token.token.is_empty());
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_delete_enroll_token_missing() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(PATH_ENROLL_TOKEN))
        .respond_with(ResponseTemplate::new(404))
        .mount(mock.inner())
        .await;

    let err = session(&mock).delete_enroll_token().await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}
