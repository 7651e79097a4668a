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

//! Integration tests for bearer token acquisition

use std::time::{Duration, Instant};

use krypton_client::{
    BearerTokenProvider, ClientConfig, ErrorCategory, KryptonError, TokenType, Transport,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::{fast_transport, MockKryptonServer, PATH_ENROLLMENT_TOKEN};

fn builder(mock: &MockKryptonServer, token_type: TokenType) -> krypton_client::ClientConfigBuilder {
    ClientConfig::builder()
        .enroll_url(mock.api_url())
        .unwrap()
        .token_type(token_type)
        .transport(fast_transport())
}

#[tokio::test]
async fn test_azuread_token_from_server() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/token"))
        .and(query_param("tenant_id", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  azure-token\n"))
        .expect(1)
        .mount(mock.inner())
        .await;

    let config = builder(&mock, TokenType::AzureAd)
        .token_server_url(format!("{}/api/v1/token", mock.url()))
        .unwrap()
        .tenant_id("t1")
        .build()
        .unwrap();
    let transport = Transport::new(&config.transport).unwrap();

    let provider = BearerTokenProvider::from_config(&config).unwrap();
    let token = provider.acquire(&transport).await.unwrap();
    assert_eq!(token.as_str(), "azure-token");
    assert_eq!(token.authorization(), "Bearer azure-token");
}

#[tokio::test]
async fn test_azuread_token_server_rejects() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .expect(1)
        .mount(mock.inner())
        .await;

    let config = builder(&mock, TokenType::AzureAd)
        .token_server_url(format!("{}/api/v1/token", mock.url()))
        .unwrap()
        .build()
        .unwrap();
    let transport = Transport::new(&config.transport).unwrap();

    let err = BearerTokenProvider::from_config(&config)
        .unwrap()
        .acquire(&transport)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_enrollment_token_from_dsts() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("POST"))
        .and(path(PATH_ENROLLMENT_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "bulk-1" })))
        .expect(1)
        .mount(mock.inner())
        .await;

    let config = builder(&mock, TokenType::Enrollment)
        .dsts_url(mock.api_url())
        .unwrap()
        .build()
        .unwrap();
    let transport = Transport::new(&config.transport).unwrap();

    let token = BearerTokenProvider::from_config(&config)
        .unwrap()
        .acquire(&transport)
        .await
        .unwrap();
    assert_eq!(token.as_str(), "bulk-1");
}

#[tokio::test]
async fn test_enrollment_token_malformed() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("POST"))
        .and(path(PATH_ENROLLMENT_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(mock.inner())
        .await;

    let config = builder(&mock, TokenType::Enrollment)
        .dsts_url(mock.api_url())
        .unwrap()
        .build()
        .unwrap();
    let transport = Transport::new(&config.transport).unwrap();

    let err = BearerTokenProvider::from_config(&config)
        .unwrap()
        .acquire(&transport)
        .await
        .unwrap_err();
    assert!(matches!(err, KryptonError::Decode { .. }));
}

#[tokio::test]
async fn test_refused_connection_is_retried_then_surfaced() {
    let config = ClientConfig::builder()
        .enroll_url("http://127.0.0.1:1/api/v1")
        .unwrap()
        .token_type(TokenType::AzureAd)
        .token_server_url("http://127.0.0.1:1/api/v1/token")
        .unwrap()
        .transport(
            fast_transport()
                .max_retry(0)
                .backoff_unit(Duration::from_millis(20)),
        )
        .build()
        .unwrap();
    let transport = Transport::new(&config.transport).unwrap();
    let unit = transport.policy().backoff_unit;

    let start = Instant::now();
    let err = BearerTokenProvider::from_config(&config)
        .unwrap()
        .acquire(&transport)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transport);
    // ten attempts wait 1 + 2 + ... + 9 units in between
    assert!(start.elapsed() >= unit * 45, "elapsed {:?}", start.elapsed());
}
