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

//! Device keys and CSR (Certificate Signing Request) generation.
//!
//! Key generation takes its randomness from the caller; nothing in this
//! module reaches for an ambient RNG.
//!
//! # Example
//!
//! ```no_run
//! use krypton_client::csr::{DeviceCsr, DeviceKey};
//!
//! # fn example() -> krypton_client::Result<()> {
//! let key = DeviceKey::generate(&mut rand::rngs::OsRng)?;
//! let csr = DeviceCsr::generate(&key)?;
//! println!("{}", csr.to_base64());
//! # Ok(())
//! # }
//! ```

use std::fmt;

use base64::prelude::*;
use der::Decode;
use rcgen::{CertificateParams, DistinguishedName, KeyPair, PKCS_RSA_SHA256};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::rand_core::CryptoRngCore;
use rsa::RsaPrivateKey;
use x509_cert::request::CertReq;

use crate::error::{KryptonError, Result};

/// RSA modulus size for device keys.
pub const KEY_BITS: usize = 2048;

/// RSA private key owned by one enrollment or token flow.
#[derive(Clone)]
pub struct DeviceKey {
    key: RsaPrivateKey,
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(<redacted>)")
    }
}

impl DeviceKey {
    /// Generate a fresh 2048-bit key.
    pub fn generate<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let key = RsaPrivateKey::new(rng, KEY_BITS)
            .map_err(|e| KryptonError::key(format!("Failed to generate key pair: {}", e)))?;
        Ok(Self { key })
    }

    /// Load a PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) PEM key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KryptonError::key(format!("Failed to parse private key: {}", e)))?;
        Ok(Self { key })
    }

    /// Load a key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let pem = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            KryptonError::key(format!(
                "Failed to read key file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_pem(&pem)
    }

    /// PKCS#1 PEM export.
    pub fn to_pkcs1_pem(&self) -> Result<String> {
        let pem = self
            .key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KryptonError::key(format!("Failed to encode private key: {}", e)))?;
        Ok(pem.to_string())
    }

    /// PKCS#8 PEM export.
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = self
            .key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KryptonError::key(format!("Failed to encode private key: {}", e)))?;
        Ok(pem.to_string())
    }

    /// PKCS#1 DER of the private key.
    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .key
            .to_pkcs1_der()
            .map_err(|e| KryptonError::key(format!("Failed to encode private key: {}", e)))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// PKCS#1 DER of the public key.
    pub fn public_key_pkcs1_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| KryptonError::key(format!("Failed to encode public key: {}", e)))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// The same key as an rcgen signing key.
    pub(crate) fn rcgen_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem_and_sign_algo(&self.to_pkcs8_pem()?, &PKCS_RSA_SHA256)
            .map_err(|e| KryptonError::key(format!("Failed to load signing key: {}", e)))
    }
}

/// A DER-encoded PKCS#10 request with an empty subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCsr {
    der: Vec<u8>,
}

impl DeviceCsr {
    /// Build and sign a request for `key` with SHA256-RSA.
    pub fn generate(key: &DeviceKey) -> Result<Self> {
        let key_pair = key.rcgen_key_pair()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| KryptonError::csr(format!("Failed to serialize CSR: {}", e)))?;

        Ok(Self {
            der: csr.der().to_vec(),
        })
    }

    /// DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Standard base64 of the DER bytes, as sent to the enrollment service.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.der)
    }
}

/// Generate a key and a CSR for it in one step.
pub fn generate_key_and_csr<R: CryptoRngCore + ?Sized>(
    rng: &mut R,
) -> Result<(DeviceKey, DeviceCsr)> {
    let key = DeviceKey::generate(rng)?;
    let csr = DeviceCsr::generate(&key)?;
    Ok((key, csr))
}

/// Check that `csr_der` is a well-formed PKCS#10 request.
pub fn validate_csr(csr_der: &[u8]) -> Result<()> {
    if csr_der.is_empty() {
        return Err(KryptonError::csr("Empty CSR"));
    }

    // Check for valid DER SEQUENCE tag
    if csr_der[0] != 0x30 {
        return Err(KryptonError::csr("Invalid CSR: not a SEQUENCE"));
    }

    CertReq::from_der(csr_der)
        .map_err(|e| KryptonError::csr(format!("Invalid CSR: {}", e)))?;
    Ok(())
}
