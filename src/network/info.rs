// Copyright 2025 jonefeewang@gmail.com
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

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, AppResult};

/// Listen backlog used when [`ConnectionInfo::backlog`] is not set.
pub const DEFAULT_BACKLOG: u32 = 1024;
pub const DEFAULT_PORT: u16 = 5666;
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// Where and how a server listens, produced by the protocol plugin before
/// the server starts.
///
/// The server copies this once at construction, so later changes made by the
/// plugin are not observed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionInfo {
    /// Host name or IP to bind. Empty binds the wildcard interface.
    pub address: String,
    pub port: u16,
    /// Listen queue depth, `None` for the system default.
    pub backlog: Option<u32>,
    pub thread_pool_size: usize,
    /// Capacity of each connection's read buffer.
    pub buffer_size: usize,
    /// Idle read limit per connection in milliseconds, disabled when `None`.
    pub read_timeout_ms: Option<u64>,
    pub tls: TlsConfig,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        ConnectionInfo {
            address: String::new(),
            port: DEFAULT_PORT,
            backlog: None,
            thread_pool_size: num_cpus::get(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout_ms: None,
            tls: TlsConfig::default(),
        }
    }
}

impl ConnectionInfo {
    pub fn validate(&self) -> AppResult<()> {
        if self.thread_pool_size == 0 {
            return Err(AppError::InvalidConfig(
                "thread_pool_size must be at least 1".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(AppError::InvalidConfig(
                "buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn backlog(&self) -> u32 {
        self.backlog.unwrap_or(DEFAULT_BACKLOG)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// `address:port` for log messages, `*` standing in for the wildcard.
    pub fn endpoint_string(&self) -> String {
        if self.address.is_empty() {
            format!("*:{}", self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Encoding of certificate and key files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum CertificateFormat {
    #[default]
    Pem,
    /// Raw DER, also accepted as `asn1`.
    Der,
}

impl FromStr for CertificateFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pem" => Ok(CertificateFormat::Pem),
            "der" | "asn1" => Ok(CertificateFormat::Der),
            other => Err(AppError::InvalidConfig(format!(
                "unknown certificate format: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for CertificateFormat {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for CertificateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateFormat::Pem => f.write_str("pem"),
            CertificateFormat::Der => f.write_str("der"),
        }
    }
}

/// Policy for validating a TLS peer's certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum VerifyMode {
    #[default]
    None,
    /// Verify a client certificate when one is presented.
    Optional,
    /// Refuse clients that do not present a valid certificate.
    Required,
}

impl FromStr for VerifyMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(VerifyMode::None),
            "optional" | "peer" => Ok(VerifyMode::Optional),
            "required" | "peer-cert" | "fail-if-no-cert" | "fail-if-no-peer-cert" => {
                Ok(VerifyMode::Required)
            }
            other => Err(AppError::InvalidConfig(format!(
                "unknown verify mode: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for VerifyMode {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::None => f.write_str("none"),
            VerifyMode::Optional => f.write_str("optional"),
            VerifyMode::Required => f.write_str("required"),
        }
    }
}

/// TLS settings for the listening endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub certificate_path: String,
    /// Private key file. Empty reuses `certificate_path` as the key source.
    pub certificate_key_path: String,
    pub certificate_format: CertificateFormat,
    pub key_format: CertificateFormat,
    /// OpenSSL-style cipher list, empty keeps the provider defaults.
    pub allowed_ciphers: String,
    /// Diffie-Hellman parameter file, `none` or empty to skip.
    pub dh_key_path: String,
    pub ca_path: String,
    pub verify_mode: VerifyMode,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            enabled: false,
            certificate_path: String::new(),
            certificate_key_path: String::new(),
            certificate_format: CertificateFormat::Pem,
            key_format: CertificateFormat::Pem,
            allowed_ciphers: String::new(),
            dh_key_path: "none".to_string(),
            ca_path: String::new(),
            verify_mode: VerifyMode::None,
        }
    }
}

impl TlsConfig {
    /// The file and format the private key is read from.
    pub fn key_source(&self) -> (&str, CertificateFormat) {
        if self.certificate_key_path.is_empty() {
            (&self.certificate_path, self.certificate_format)
        } else {
            (&self.certificate_key_path, self.key_format)
        }
    }

    pub fn dh_key(&self) -> Option<&str> {
        match self.dh_key_path.as_str() {
            "" | "none" => None,
            path => Some(path),
        }
    }
}

impl fmt::Display for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (key, key_format) = self.key_source();
        write!(
            f,
            "cert: {} ({}), key: {} ({}), ciphers: {}, dh: {}, ca: {}, verify: {}",
            self.certificate_path,
            self.certificate_format,
            key,
            key_format,
            if self.allowed_ciphers.is_empty() {
                "default"
            } else {
                &self.allowed_ciphers
            },
            self.dh_key().unwrap_or("none"),
            if self.ca_path.is_empty() {
                "none"
            } else {
                &self.ca_path
            },
            self.verify_mode,
        )
    }
}
