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

//! Integration tests for the retrying transport

use std::time::{Duration, Instant};

use krypton_client::transport::{is_connection_refused, HttpRequest, Transport};
use krypton_client::{ErrorCategory, USER_AGENT};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::{fast_transport, MockKryptonServer};

fn target(mock: &MockKryptonServer) -> Url {
    Url::parse(&format!("{}/resource", mock.url())).unwrap()
}

#[tokio::test]
async fn test_max_retry_bounds_attempts() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(mock.inner())
        .await;

    let transport = Transport::new(&fast_transport().max_retry(2)).unwrap();
    let response = transport
        .execute(&HttpRequest::get(target(&mock)))
        .await
        .unwrap();

    // last response is handed back as-is
    assert_eq!(response.status, 503);
    assert_eq!(response.text(), "overloaded");
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_retry_after_is_honoured() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(mock.inner())
        .await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(mock.inner())
        .await;

    let transport = Transport::new(&fast_transport()).unwrap();
    let start = Instant::now();
    let response = transport
        .execute(&HttpRequest::get(target(&mock)))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_ignore_status_is_retried() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .mount(mock.inner())
        .await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(200))
        .mount(mock.inner())
        .await;

    let transport = Transport::new(&fast_transport().ignore_status(vec![404])).unwrap();
    let response = transport.wait_for_status(&target(&mock), 200).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(mock.inner())
        .await;

    let transport = Transport::new(&fast_transport()).unwrap();
    let err = transport
        .wait_for_status(&target(&mock), 200)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Protocol);
    assert_eq!(err.status(), Some(400));
    assert!(err.to_string().contains("bad request"));
    mock.inner().verify().await;
}

#[tokio::test]
async fn test_user_agent_is_sent() {
    let mock = MockKryptonServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .and(header("user-agent", USER_AGENT))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(mock.inner())
        .await;

    let transport = Transport::new(&fast_transport()).unwrap();
    let response = transport
        .execute(&HttpRequest::get(target(&mock)))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_connection_refused_after_retries() {
    let transport = Transport::new(&fast_transport().max_retry(1)).unwrap();
    let url = Url::parse("http://127.0.0.1:1/resource").unwrap();

    let err = transport.execute(&HttpRequest::get(url)).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transport);
    assert!(err.is_retryable());
    assert!(is_connection_refused(&err));
}
