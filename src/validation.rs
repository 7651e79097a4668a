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

//! Policy validation of issued device certificates.
//!
//! A certificate is accepted only if all of the following hold, checked in
//! this order:
//!
//! 1. the current time is within `[notBefore, notAfter]`
//! 2. signature and public key algorithms are RSA with SHA-256
//! 3. key usage is present and is exactly digital signature
//! 4. every extended key usage is client auth or server auth
//! 5. the subject common name equals the expected device id
//!
//! The first failing check is reported as a [`PolicyViolation`]. Validation
//! never touches the network and a violation is never retried.
//!
//! # Example
//!
//! ```no_run
//! use krypton_client::validation::CertificateValidator;
//!
//! # fn example(der: &[u8]) -> krypton_client::Result<()> {
//! let thumbprint = CertificateValidator::new().validate_der(der, "d1")?;
//! println!("thumbprint: {}", thumbprint);
//! # Ok(())
//! # }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use base64::prelude::*;
use const_oid::db::rfc5280::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
use const_oid::db::rfc5912::{RSA_ENCRYPTION, SHA_256_WITH_RSA_ENCRYPTION};
use const_oid::AssociatedOid;
use der::Decode;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use x509_cert::ext::pkix::{ExtendedKeyUsage, KeyUsage};
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::error::{KryptonError, PolicyViolation, Result};
use crate::types::{CertificateRecord, CertificateResponse};

/// Stateless certificate policy checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateValidator {
    now: Option<SystemTime>,
}

impl CertificateValidator {
    /// Validator using the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator evaluating the validity window at a fixed instant.
    pub fn at(now: SystemTime) -> Self {
        Self { now: Some(now) }
    }

    /// Run all checks against `cert`.
    pub fn validate(
        &self,
        cert: &Certificate,
        expected_id: &str,
    ) -> std::result::Result<(), PolicyViolation> {
        let now = self.now.unwrap_or_else(SystemTime::now);
        check_validity(cert, now)?;
        check_algorithms(cert)?;
        check_key_usage(cert)?;
        check_extended_key_usage(cert)?;
        check_identity(cert, expected_id)?;
        debug!("Certificate for {} passed validation", expected_id);
        Ok(())
    }

    /// Parse DER, validate, and return the thumbprint.
    pub fn validate_der(&self, der: &[u8], expected_id: &str) -> Result<String> {
        let cert = Certificate::from_der(der)?;
        self.validate(&cert, expected_id)?;
        Ok(thumbprint(der))
    }

    /// Turn an issued status payload into a validated record.
    pub fn certificate_record(&self, response: &CertificateResponse) -> Result<CertificateRecord> {
        let der = BASE64_STANDARD.decode(response.certificate.trim())?;
        let cert = Certificate::from_der(&der)?;
        self.validate(&cert, &response.device_id)
            .map_err(KryptonError::Policy)?;

        let validity = &cert.tbs_certificate.validity;
        Ok(CertificateRecord {
            device_id: response.device_id.clone(),
            certificate: response.certificate.trim().to_string(),
            thumbprint: thumbprint(&der),
            not_before: system_time(&validity.not_before),
            not_after: system_time(&validity.not_after),
            receipt_handle: Some(response.receipt_handle.clone()).filter(|h| !h.is_empty()),
        })
    }
}

/// Hex SHA-256 of the certificate DER.
pub fn thumbprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

fn system_time(time: &Time) -> SystemTime {
    let since_epoch = match time {
        Time::UtcTime(utc) => utc.to_unix_duration(),
        Time::GeneralTime(r#gen) => r#gen.to_unix_duration(),
    };
    UNIX_EPOCH + since_epoch
}

fn check_validity(cert: &Certificate, now: SystemTime) -> std::result::Result<(), PolicyViolation> {
    let validity = &cert.tbs_certificate.validity;
    let not_before = system_time(&validity.not_before);
    let not_after = system_time(&validity.not_after);

    if now < not_before || now > not_after {
        warn!(
            "cert validity {:?} .. {:?} does not cover {:?}",
            not_before, not_after, now
        );
        return Err(PolicyViolation::ExpiredOrNotYetValid);
    }
    Ok(())
}

fn check_algorithms(cert: &Certificate) -> std::result::Result<(), PolicyViolation> {
    let sig = cert.signature_algorithm.oid;
    if sig != SHA_256_WITH_RSA_ENCRYPTION {
        warn!("cert sig alg: {}", sig);
        return Err(PolicyViolation::UnsupportedAlgorithm(format!(
            "signature algorithm {}",
            sig
        )));
    }

    let key = cert.tbs_certificate.subject_public_key_info.algorithm.oid;
    if key != RSA_ENCRYPTION {
        warn!("cert pubkey alg: {}", key);
        return Err(PolicyViolation::UnsupportedAlgorithm(format!(
            "public key algorithm {}",
            key
        )));
    }
    Ok(())
}

/// Raw value of the extension identified by `T`, if present.
fn extension<T: AssociatedOid>(cert: &Certificate) -> Option<&[u8]> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|ext| ext.extn_id == T::OID)
        .map(|ext| ext.extn_value.as_bytes())
}

fn check_key_usage(cert: &Certificate) -> std::result::Result<(), PolicyViolation> {
    let usage = extension::<KeyUsage>(cert)
        .map(KeyUsage::from_der)
        .transpose()
        .map_err(|_| PolicyViolation::InvalidKeyUsage)?;

    match usage {
        Some(ku) if ku.digital_signature() && ku.0.bits().count_ones() == 1 => Ok(()),
        other => {
            warn!("cert key usage: {:?}", other);
            Err(PolicyViolation::InvalidKeyUsage)
        }
    }
}

fn check_extended_key_usage(cert: &Certificate) -> std::result::Result<(), PolicyViolation> {
    let usage = extension::<ExtendedKeyUsage>(cert)
        .map(ExtendedKeyUsage::from_der)
        .transpose()
        .map_err(|e| PolicyViolation::InvalidExtendedKeyUsage(e.to_string()))?;

    if let Some(eku) = usage {
        for oid in eku.0.iter() {
            if *oid != ID_KP_CLIENT_AUTH && *oid != ID_KP_SERVER_AUTH {
                return Err(PolicyViolation::InvalidExtendedKeyUsage(oid.to_string()));
            }
        }
    }
    Ok(())
}

fn check_identity(cert: &Certificate, expected_id: &str) -> std::result::Result<(), PolicyViolation> {
    let cn = get_subject_cn(cert);
    if cn.as_deref() != Some(expected_id) {
        warn!("device id {} does not match certificate CN {:?}", expected_id, cn);
        return Err(PolicyViolation::IdentityMismatch {
            expected: expected_id.to_string(),
            actual: cn,
        });
    }
    Ok(())
}

/// Helper function to extract common name from certificate subject.
pub fn get_subject_cn(cert: &Certificate) -> Option<String> {
    use const_oid::db::rfc4519::CN;

    for rdn in cert.tbs_certificate.subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid == CN {
                if let Ok(s) = std::str::from_utf8(atv.value.value()) {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}
