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

//! Integration tests for the device-code login

use std::sync::Arc;
use std::time::Duration;

use krypton_client::{
    CredentialCache, DeviceCodePoller, KryptonError, MemoryCache, Transport,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::{
    fast_transport, MockKryptonServer, PATH_DEVICE_AUTHORIZATION, PATH_DEVICE_TOKEN,
};

fn poller(mock: &MockKryptonServer) -> DeviceCodePoller {
    let transport = Transport::new(&fast_transport()).unwrap();
    DeviceCodePoller::new(Url::parse(&mock.url()).unwrap(), &transport)
        .with_retry_delay(Duration::from_millis(10))
}

async fn mock_token_sequence(mock: &MockKryptonServer, pending: u64, pending_status: u16) {
    Mock::given(method("POST"))
        .and(path(PATH_DEVICE_TOKEN))
        .respond_with(ResponseTemplate::new(pending_status))
        .up_to_n_times(pending)
        .mount(mock.inner())
        .await;
    Mock::given(method("POST"))
        .and(path(PATH_DEVICE_TOKEN))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": "granted-token" })),
        )
        .mount(mock.inner())
        .await;
}

#[tokio::test]
async fn test_poll_until_granted() {
    let mock = MockKryptonServer::start().await;
    mock.mock_device_authorization("dc-1").await;
    mock_token_sequence(&mock, 2, 400).await;

    let cache = Arc::new(MemoryCache::new());
    let poller = poller(&mock).with_cache(cache.clone());
    let token = poller.login().await.unwrap();

    assert_eq!(token.access_token, "granted-token");
    let bodies = mock.bodies(PATH_DEVICE_TOKEN).await;
    assert_eq!(bodies.len(), 3);
    assert!(bodies[0].contains("device_code=dc-1"));
    assert!(bodies[0].contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code"));

    let cached: serde_json::Value = serde_json::from_slice(&cache.get().unwrap()).unwrap();
    assert_eq!(cached["access_token"], "granted-token");
}

#[tokio::test]
async fn test_rate_limited_polls_continue() {
    let mock = MockKryptonServer::start().await;
    mock.mock_device_authorization("dc-1").await;
    mock_token_sequence(&mock, 1, 429).await;

    let token = poller(&mock).login().await.unwrap();
    assert_eq!(token.access_token, "granted-token");
    assert_eq!(mock.bodies(PATH_DEVICE_TOKEN).await.len(), 2);
}

#[tokio::test]
async fn test_server_error_is_terminal() {
    let mock = MockKryptonServer::start().await;
    mock.mock_device_authorization("dc-1").await;
    Mock::given(method("POST"))
        .and(path(PATH_DEVICE_TOKEN))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(mock.inner())
        .await;

    let err = poller(&mock).login().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_poll_budget_exhausted() {
    let mock = MockKryptonServer::start().await;
    mock.mock_device_authorization("dc-1").await;
    Mock::given(method("POST"))
        .and(path(PATH_DEVICE_TOKEN))
        .respond_with(ResponseTemplate::new(400))
        .expect(2)
        .mount(mock.inner())
        .await;

    let err = poller(&mock)
        .with_retry_count(2)
        .login()
        .await
        .unwrap_err();
    assert!(matches!(err, KryptonError::AuthorizationPending { attempts: 2 }));
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_request_code() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("POST"))
        .and(path(PATH_DEVICE_AUTHORIZATION))
        .and(query_param("app_name", "krypton_device_code"))
        .and(body_string_contains("scope=openid%2Benroll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dc-9",
            "user_code": "WXYZ",
            "verification_uri_complete": "https://login.example.com/device?user_code=WXYZ",
        })))
        .expect(1)
        .mount(mock.inner())
        .await;

    let session = poller(&mock)
        .with_onecloud_provider(true)
        .request_code()
        .await
        .unwrap();
    assert_eq!(session.device_code, "dc-9");
    assert_eq!(session.user_code, "WXYZ");
    assert!(session.verification_uri.ends_with("user_code=WXYZ"));
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_request_code_rejected() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("POST"))
        .and(path(PATH_DEVICE_AUTHORIZATION))
        .respond_with(ResponseTemplate::new(403))
        .mount(mock.inner())
        .await;

    let err = poller(&mock).request_code().await.unwrap_err();
    assert_eq!(err.status(), Some(403));
}
