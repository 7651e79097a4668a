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

//! Credential cache interface.
//!
//! Persistence is the caller's business; this crate only reads cached
//! credentials from, and writes results to, a [`CredentialCache`].

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{KryptonError, Result};
use crate::sts::claims_unverified;

/// Claim holding the tenant id in device tokens.
pub const TENANT_ID_CLAIM: &str = "tid";

/// Byte-oriented credential store.
pub trait CredentialCache: Send + Sync {
    /// Cached bytes, if any.
    fn get(&self) -> Option<Vec<u8>>;

    /// Replace the cached bytes.
    fn update(&self, bytes: &[u8]) -> Result<()>;
}

/// In-memory [`CredentialCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    data: Mutex<Option<Vec<u8>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialCache for MemoryCache {
    fn get(&self) -> Option<Vec<u8>> {
        self.data.lock().ok().and_then(|data| data.clone())
    }

    fn update(&self, bytes: &[u8]) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| KryptonError::cache("cache lock poisoned"))?;
        *data = Some(bytes.to_vec());
        Ok(())
    }
}

/// Cached device token and the device it belongs to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTokenRecord {
    /// Device access token.
    pub device_token: String,
    /// Device id.
    pub device_id: String,
}

impl std::fmt::Debug for DeviceTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTokenRecord")
            .field("device_token", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl DeviceTokenRecord {
    /// Write the record to `cache` as JSON.
    pub fn store(&self, cache: &dyn CredentialCache) -> Result<()> {
        let bytes = serde_json::to_vec(self).map_err(KryptonError::cache)?;
        cache.update(&bytes)
    }

    /// Read a record from `cache`. An empty cache yields `None`.
    pub fn load(cache: &dyn CredentialCache) -> Result<Option<Self>> {
        match cache.get() {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(KryptonError::cache),
            None => Ok(None),
        }
    }

    /// Tenant the device token was issued for.
    pub fn tenant_id(&self) -> Result<Option<String>> {
        claim_from_token(&self.device_token, TENANT_ID_CLAIM)
    }
}

/// Read one claim from a JWT without verifying it.
///
/// String claims are returned as-is, other values in their JSON form.
pub fn claim_from_token(token: &str, claim: &str) -> Result<Option<String>> {
    let claims: serde_json::Map<String, serde_json::Value> = claims_unverified(token)?;
    Ok(claims.get(claim).map(|value| match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }))
}
