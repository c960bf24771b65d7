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

//! TLS context setup.
//!
//! Builds the `rustls` server configuration from a [`TlsConfig`] one step at
//! a time. A step that fails is logged through the [`LogSink`] and recorded
//! in the [`TlsReport`]; the remaining steps still run, so the server can
//! start with reduced security instead of not starting at all.

use std::fs;
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{
    CertificateError, CipherSuite, DigitallySignedStruct, DistinguishedName, RootCertStore,
    ServerConfig, SignatureScheme, SupportedCipherSuite,
};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use super::{CertificateFormat, TlsConfig, VerifyMode};
use crate::service::LogSink;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PEM in {path}: {source}")]
    Pem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("no DH parameters found in {0}")]
    NoDhParameters(String),

    #[error("none of the allowed ciphers are supported: {0}")]
    NoCiphers(String),

    #[error("invalid CA certificate in {path}: {reason}")]
    InvalidCa { path: String, reason: String },

    #[error("peer verification '{0}' needs a CA file")]
    MissingCa(VerifyMode),

    #[error("failed to build client verifier: {0}")]
    Verifier(String),

    #[error("failed to build TLS config: {0}")]
    Config(#[from] rustls::Error),
}

/// Outcome of each configuration step.
#[derive(Debug, Default)]
pub struct TlsReport {
    pub certificate_loaded: bool,
    pub key_loaded: bool,
    /// Certificate and key were accepted by rustls, handshakes can succeed.
    pub serving_certificate: bool,
    pub cipher_suites: Vec<&'static str>,
    pub dh_parameters_loaded: bool,
    pub ca_certificates: usize,
    /// Configured verification. Without a usable trust store it is still
    /// enforced and no client certificate passes.
    pub verify_mode: VerifyMode,
    pub errors: Vec<TlsError>,
}

impl TlsReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct TlsContext {
    pub acceptor: TlsAcceptor,
    pub report: TlsReport,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

pub struct TlsContextBuilder<'a> {
    config: &'a TlsConfig,
    sink: &'a dyn LogSink,
    report: TlsReport,
}

impl<'a> TlsContextBuilder<'a> {
    pub fn new(config: &'a TlsConfig, sink: &'a dyn LogSink) -> Self {
        TlsContextBuilder {
            config,
            sink,
            report: TlsReport::default(),
        }
    }

    /// Runs every step in order. Only a failure to assemble the final rustls
    /// config with the stock provider is returned as an error, everything
    /// else ends up in the report.
    pub fn build(mut self) -> Result<TlsContext, TlsError> {
        sink_debug!(self.sink, "Using TLS: {}", self.config);

        let certs = self.load_certificate();
        let key = self.load_private_key();
        let provider = Arc::new(self.restrict_ciphers());
        self.load_dh_parameters();
        let roots = self.load_ca();
        let verifier = self.client_verifier(roots, &provider);
        let server_config = self.server_config(provider, verifier, certs, key)?;

        Ok(TlsContext {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            report: self.report,
        })
    }

    fn fail(&mut self, context: &str, err: TlsError) {
        sink_error!(self.sink, "{}: {}", context, err);
        self.report.errors.push(err);
    }

    fn load_certificate(&mut self) -> Option<Vec<CertificateDer<'static>>> {
        let config = self.config;
        match read_certificates(&config.certificate_path, config.certificate_format) {
            Ok(certs) => {
                sink_debug!(
                    self.sink,
                    "Set TLS cert={}/{}: {} certificate(s)",
                    config.certificate_path,
                    config.certificate_format,
                    certs.len()
                );
                self.report.certificate_loaded = true;
                Some(certs)
            }
            Err(err) => {
                self.fail("Failed to load certificate", err);
                None
            }
        }
    }

    fn load_private_key(&mut self) -> Option<PrivateKeyDer<'static>> {
        let config = self.config;
        let (path, format) = config.key_source();
        match read_private_key(path, format) {
            Ok(key) => {
                sink_debug!(self.sink, "Set TLS key={}/{}", path, format);
                self.report.key_loaded = true;
                Some(key)
            }
            Err(err) => {
                self.fail("Failed to load key", err);
                None
            }
        }
    }

    fn restrict_ciphers(&mut self) -> CryptoProvider {
        let config = self.config;
        let mut provider = ring::default_provider();
        let allowed = config.allowed_ciphers.trim();
        if !allowed.is_empty() {
            let (suites, ignored) = select_cipher_suites(allowed, &provider.cipher_suites);
            for token in ignored {
                sink_debug!(self.sink, "Ignoring unsupported cipher token: {}", token);
            }
            if suites.is_empty() {
                self.fail(
                    "Failed to set cipher list",
                    TlsError::NoCiphers(allowed.to_string()),
                );
            } else {
                let mut suites = suites;
                if !suites.iter().any(is_tls13) {
                    // an OpenSSL cipher list only governs TLS 1.2 and below
                    sink_debug!(self.sink, "No TLS 1.3 suite listed, keeping the TLS 1.3 defaults");
                    suites.extend(provider.cipher_suites.iter().copied().filter(is_tls13));
                }
                provider.cipher_suites = suites;
                sink_debug!(
                    self.sink,
                    "Set cipher list={}: {} suite(s)",
                    allowed,
                    provider.cipher_suites.len()
                );
            }
        }
        self.report.cipher_suites = provider.cipher_suites.iter().map(suite_name).collect();
        provider
    }

    fn load_dh_parameters(&mut self) {
        let config = self.config;
        let Some(path) = config.dh_key() else {
            return;
        };
        match read_dh_parameters(path) {
            Ok(()) => {
                // rustls only negotiates ephemeral key exchange, the file is validated but not needed
                sink_debug!(self.sink, "Load DH from={}: ok", path);
                self.report.dh_parameters_loaded = true;
            }
            Err(err) => self.fail("Failed to load DH parameters", err),
        }
    }

    fn load_ca(&mut self) -> Option<RootCertStore> {
        let config = self.config;
        let path = config.ca_path.as_str();
        if path.is_empty() {
            return None;
        }
        let result = read_certificates(path, CertificateFormat::Pem).and_then(|certs| {
            let mut roots = RootCertStore::empty();
            for cert in certs {
                roots.add(cert).map_err(|err| TlsError::InvalidCa {
                    path: path.to_string(),
                    reason: err.to_string(),
                })?;
            }
            Ok(roots)
        });
        match result {
            Ok(roots) => {
                sink_debug!(self.sink, "Load CA={}: {} certificate(s)", path, roots.len());
                self.report.ca_certificates = roots.len();
                Some(roots)
            }
            Err(err) => {
                self.fail("Failed to set CA", err);
                None
            }
        }
    }

    fn client_verifier(
        &mut self,
        roots: Option<RootCertStore>,
        provider: &Arc<CryptoProvider>,
    ) -> Option<Arc<dyn ClientCertVerifier>> {
        let mode = self.config.verify_mode;
        if mode == VerifyMode::None {
            sink_debug!(self.sink, "Set verify mode=none");
            return None;
        }
        self.report.verify_mode = mode;
        let Some(roots) = roots else {
            self.fail("Failed to set verify mode", TlsError::MissingCa(mode));
            return Some(self.reject_all(mode, provider));
        };

        let builder = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone());
        let builder = if mode == VerifyMode::Optional {
            builder.allow_unauthenticated()
        } else {
            builder
        };
        match builder.build() {
            Ok(verifier) => {
                sink_debug!(self.sink, "Set verify mode={}", mode);
                Some(verifier)
            }
            Err(err) => {
                self.fail("Failed to set verify mode", TlsError::Verifier(err.to_string()));
                Some(self.reject_all(mode, provider))
            }
        }
    }

    /// Keeps `mode` without a trust store: no client certificate can pass.
    fn reject_all(
        &self,
        mode: VerifyMode,
        provider: &Arc<CryptoProvider>,
    ) -> Arc<dyn ClientCertVerifier> {
        sink_error!(
            self.sink,
            "Verify mode={} without a trust store, every client certificate is rejected",
            mode
        );
        Arc::new(RejectClientCertificates {
            mandatory: mode == VerifyMode::Required,
            provider: provider.clone(),
        })
    }

    fn server_config(
        &mut self,
        provider: Arc<CryptoProvider>,
        verifier: Option<Arc<dyn ClientCertVerifier>>,
        certs: Option<Vec<CertificateDer<'static>>>,
        key: Option<PrivateKeyDer<'static>>,
    ) -> Result<ServerConfig, TlsError> {
        let builder = match ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
        {
            Ok(builder) => builder,
            Err(err) => {
                // the restricted suite list left no usable protocol version
                self.fail("Failed to apply cipher list", TlsError::Config(err));
                let provider = ring::default_provider();
                self.report.cipher_suites =
                    provider.cipher_suites.iter().map(suite_name).collect();
                ServerConfig::builder_with_provider(Arc::new(provider))
                    .with_safe_default_protocol_versions()?
            }
        };
        let builder = match verifier {
            Some(verifier) => builder.with_client_cert_verifier(verifier),
            None => builder.with_no_client_auth(),
        };

        if let (Some(certs), Some(key)) = (certs, key) {
            match builder.clone().with_single_cert(certs, key) {
                Ok(server_config) => {
                    self.report.serving_certificate = true;
                    return Ok(server_config);
                }
                Err(err) => self.fail("Failed to use certificate and key", TlsError::Config(err)),
            }
        }
        sink_error!(
            self.sink,
            "No usable certificate for {}, TLS handshakes will fail",
            self.config.certificate_path
        );
        Ok(builder.with_cert_resolver(Arc::new(NoCertificate)))
    }
}

/// Resolver used when no certificate could be loaded, every handshake is
/// refused by the server.
#[derive(Debug)]
struct NoCertificate;

impl ResolvesServerCert for NoCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}

/// Client verifier used when peer verification is configured but no trust
/// store is usable. Any certificate presented is refused; `mandatory` also
/// refuses clients that present none.
#[derive(Debug)]
struct RejectClientCertificates {
    mandatory: bool,
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for RejectClientCertificates {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn read_file(path: &str) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_string(),
        source,
    })
}

/// Reads every certificate in a PEM file, or the single certificate of a
/// DER file.
pub fn read_certificates(
    path: &str,
    format: CertificateFormat,
) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let data = read_file(path)?;
    let certs = match format {
        CertificateFormat::Pem => rustls_pemfile::certs(&mut data.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Pem {
                path: path.to_string(),
                source,
            })?,
        CertificateFormat::Der if data.is_empty() => Vec::new(),
        CertificateFormat::Der => vec![CertificateDer::from(data)],
    };
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

/// Reads the first PKCS#8, PKCS#1 or SEC1 key of a PEM file, or a DER
/// PKCS#8 key.
pub fn read_private_key(
    path: &str,
    format: CertificateFormat,
) -> Result<PrivateKeyDer<'static>, TlsError> {
    let data = read_file(path)?;
    match format {
        CertificateFormat::Pem => rustls_pemfile::private_key(&mut data.as_slice())
            .map_err(|source| TlsError::Pem {
                path: path.to_string(),
                source,
            })?
            .ok_or_else(|| TlsError::NoPrivateKey(path.to_string())),
        CertificateFormat::Der if data.is_empty() => {
            Err(TlsError::NoPrivateKey(path.to_string()))
        }
        CertificateFormat::Der => Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(data))),
    }
}

pub fn read_dh_parameters(path: &str) -> Result<(), TlsError> {
    let data = read_file(path)?;
    let text = String::from_utf8_lossy(&data);
    if text.contains("-----BEGIN DH PARAMETERS-----") && text.contains("-----END DH PARAMETERS-----")
    {
        Ok(())
    } else {
        Err(TlsError::NoDhParameters(path.to_string()))
    }
}

fn suite_name(suite: &SupportedCipherSuite) -> &'static str {
    suite.suite().as_str().unwrap_or("UNKNOWN")
}

fn is_tls13(suite: &SupportedCipherSuite) -> bool {
    matches!(suite, SupportedCipherSuite::Tls13(_))
}

/// OpenSSL spellings of the suites the ring provider ships.
const OPENSSL_SUITE_NAMES: &[(&str, CipherSuite)] = &[
    ("TLS_AES_256_GCM_SHA384", CipherSuite::TLS13_AES_256_GCM_SHA384),
    ("TLS_AES_128_GCM_SHA256", CipherSuite::TLS13_AES_128_GCM_SHA256),
    ("TLS_CHACHA20_POLY1305_SHA256", CipherSuite::TLS13_CHACHA20_POLY1305_SHA256),
    (
        "ECDHE-ECDSA-AES256-GCM-SHA384",
        CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    ),
    (
        "ECDHE-ECDSA-AES128-GCM-SHA256",
        CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    ),
    (
        "ECDHE-ECDSA-CHACHA20-POLY1305",
        CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    ),
    (
        "ECDHE-RSA-AES256-GCM-SHA384",
        CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    ),
    (
        "ECDHE-RSA-AES128-GCM-SHA256",
        CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ),
    (
        "ECDHE-RSA-CHACHA20-POLY1305",
        CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    ),
];

/// Matches one upper-cased name: a rustls suite name with or without its
/// protocol prefix, an OpenSSL suite name, or an OpenSSL group keyword.
fn name_matches(suite: &SupportedCipherSuite, name: &str) -> bool {
    let Some(full) = suite.suite().as_str() else {
        return false;
    };
    if full == name
        || full.strip_prefix("TLS13_") == Some(name)
        || full.strip_prefix("TLS_") == Some(name)
    {
        return true;
    }
    if OPENSSL_SUITE_NAMES
        .iter()
        .any(|(openssl, id)| *openssl == name && *id == suite.suite())
    {
        return true;
    }
    match name {
        "ECDHE" | "EECDH" | "KECDHE" => full.contains("_ECDHE_"),
        "ECDSA" | "AECDSA" => full.contains("_ECDSA_"),
        "RSA" | "ARSA" => full.contains("_RSA_"),
        "AES" => full.contains("_AES_"),
        "AES128" => full.contains("_AES_128_"),
        "AES256" => full.contains("_AES_256_"),
        "AESGCM" => full.contains("_GCM_"),
        "CHACHA20" => full.contains("_CHACHA20_"),
        "SHA256" => full.ends_with("_SHA256"),
        "SHA384" => full.ends_with("_SHA384"),
        "TLSV1.2" => !is_tls13(suite),
        "TLSV1.3" => is_tls13(suite),
        _ => false,
    }
}

/// `A+B` selects the suites matching every part.
fn suite_matches(suite: &SupportedCipherSuite, name: &str) -> bool {
    let mut parts = name.split('+').filter(|part| !part.is_empty()).peekable();
    parts.peek().is_some() && parts.all(|part| name_matches(suite, part))
}

/// Applies an OpenSSL-style cipher list to the available suites.
///
/// Returns the selected suites in list order and the tokens that matched
/// nothing. Tokens are rustls or OpenSSL suite names or OpenSSL keywords
/// such as `ECDHE`, `AESGCM` or `TLSv1.3`, joined with `+` to intersect.
/// `ALL`, `DEFAULT` and `HIGH` select every suite, a `!` or `-` prefix
/// removes suites selected so far.
pub fn select_cipher_suites(
    list: &str,
    available: &[SupportedCipherSuite],
) -> (Vec<SupportedCipherSuite>, Vec<String>) {
    let mut selected: Vec<SupportedCipherSuite> = Vec::new();
    let mut ignored = Vec::new();

    let tokens = list
        .split(|c: char| c == ':' || c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty());
    for token in tokens {
        let (exclude, name) = match token.strip_prefix('!').or_else(|| token.strip_prefix('-')) {
            Some(name) => (true, name),
            None => (false, token.strip_prefix('+').unwrap_or(token)),
        };
        let name = name.to_ascii_uppercase();
        let matched: Vec<SupportedCipherSuite> = match name.as_str() {
            "ALL" | "DEFAULT" | "HIGH" => available.to_vec(),
            _ => available
                .iter()
                .filter(|suite| suite_matches(suite, &name))
                .copied()
                .collect(),
        };
        if matched.is_empty() {
            ignored.push(token.to_string());
            continue;
        }
        if exclude {
            selected.retain(|suite| !matched.iter().any(|m| m.suite() == suite.suite()));
        } else {
            for suite in matched {
                if !selected.iter().any(|s| s.suite() == suite.suite()) {
                    selected.push(suite);
                }
            }
        }
    }
    (selected, ignored)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use parking_lot::Mutex;
    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        errors: Mutex<Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn log_error(&self, _file: &str, _line: u32, message: &str) {
            self.errors.lock().push(message.to_string());
        }
    }

    impl RecordingSink {
        fn has_error(&self, prefix: &str) -> bool {
            self.errors.lock().iter().any(|m| m.starts_with(prefix))
        }
    }

    fn write_self_signed(dir: &Path) -> (String, String) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        let cert_path = dir.join("server.crt");
        let key_path = dir.join("server.key");
        fs::write(&cert_path, cert.pem()).unwrap();
        fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        (
            cert_path.to_string_lossy().into_owned(),
            key_path.to_string_lossy().into_owned(),
        )
    }

    fn tls_config(cert: &str, key: &str) -> TlsConfig {
        TlsConfig {
            enabled: true,
            certificate_path: cert.to_string(),
            certificate_key_path: key.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn cipher_list_selects_and_excludes() {
        let available = ring::default_provider().cipher_suites;

        let (suites, ignored) = select_cipher_suites(
            "TLS13_AES_256_GCM_SHA384:tls13_chacha20_poly1305_sha256",
            &available,
        );
        let names: Vec<_> = suites.iter().map(suite_name).collect();
        assert_eq!(
            names,
            vec!["TLS13_AES_256_GCM_SHA384", "TLS13_CHACHA20_POLY1305_SHA256"]
        );
        assert!(ignored.is_empty());

        let (suites, ignored) =
            select_cipher_suites("ALL:!ADH:!LOW:!EXP:!MD5:@STRENGTH", &available);
        assert_eq!(suites.len(), available.len());
        assert_eq!(ignored, vec!["!ADH", "!LOW", "!EXP", "!MD5", "@STRENGTH"]);

        let (suites, _) = select_cipher_suites("ALL:!AES_128_GCM_SHA256", &available);
        assert!(suites
            .iter()
            .all(|suite| suite_name(suite) != "TLS13_AES_128_GCM_SHA256"));
        assert_eq!(suites.len(), available.len() - 1);
    }

    #[test]
    fn openssl_cipher_names_are_recognised() {
        let available = ring::default_provider().cipher_suites;

        let (suites, ignored) = select_cipher_suites(
            "ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES128-GCM-SHA256:TLS_AES_256_GCM_SHA384",
            &available,
        );
        let names: Vec<_> = suites.iter().map(suite_name).collect();
        assert_eq!(
            names,
            vec![
                "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
                "TLS13_AES_256_GCM_SHA384",
            ]
        );
        assert!(ignored.is_empty());

        let (suites, ignored) =
            select_cipher_suites("ECDHE+AESGCM:!aNULL:!eNULL:!CHACHA20", &available);
        let names: Vec<_> = suites.iter().map(suite_name).collect();
        assert_eq!(names.len(), 4);
        assert!(names
            .iter()
            .all(|name| name.starts_with("TLS_ECDHE_") && name.contains("_GCM_")));
        assert_eq!(ignored, vec!["!aNULL", "!eNULL"]);

        let (suites, _) = select_cipher_suites("TLSv1.3:-AES128", &available);
        let names: Vec<_> = suites.iter().map(suite_name).collect();
        assert_eq!(
            names,
            vec!["TLS13_AES_256_GCM_SHA384", "TLS13_CHACHA20_POLY1305_SHA256"]
        );
    }

    #[test]
    fn tls12_only_list_keeps_tls13_defaults() {
        let sink = RecordingSink::default();
        let dir = TempDir::new().unwrap();
        let (cert, key) = write_self_signed(dir.path());
        let config = TlsConfig {
            allowed_ciphers: "ECDHE-ECDSA-AES256-GCM-SHA384".into(),
            ..tls_config(&cert, &key)
        };

        let context = TlsContextBuilder::new(&config, &sink).build().unwrap();
        let suites = &context.report.cipher_suites;
        assert_eq!(suites[0], "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384");
        assert!(!suites.contains(&"TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"));
        assert_eq!(
            suites.iter().filter(|name| name.starts_with("TLS13_")).count(),
            3
        );
        assert!(context.report.is_clean());
    }

    #[test]
    fn unknown_ciphers_keep_defaults() {
        let sink = RecordingSink::default();
        let dir = TempDir::new().unwrap();
        let (cert, key) = write_self_signed(dir.path());
        let config = TlsConfig {
            allowed_ciphers: "RC4-MD5".into(),
            ..tls_config(&cert, &key)
        };

        let context = TlsContextBuilder::new(&config, &sink).build().unwrap();
        assert!(sink.has_error("Failed to set cipher list"));
        assert_eq!(
            context.report.cipher_suites.len(),
            ring::default_provider().cipher_suites.len()
        );
        assert!(context.report.serving_certificate);
    }

    #[test]
    fn complete_config_is_clean() {
        let sink = RecordingSink::default();
        let dir = TempDir::new().unwrap();
        let (cert, key) = write_self_signed(dir.path());
        let dh_path = dir.path().join("dh.pem");
        fs::write(
            &dh_path,
            "-----BEGIN DH PARAMETERS-----\nMIIBCAKCAQEA\n-----END DH PARAMETERS-----\n",
        )
        .unwrap();
        let config = TlsConfig {
            dh_key_path: dh_path.to_string_lossy().into_owned(),
            ca_path: cert.clone(),
            verify_mode: VerifyMode::Optional,
            ..tls_config(&cert, &key)
        };

        let context = TlsContextBuilder::new(&config, &sink).build().unwrap();
        let report = &context.report;
        assert!(report.is_clean(), "{:?}", report.errors);
        assert!(report.serving_certificate);
        assert!(report.dh_parameters_loaded);
        assert_eq!(report.ca_certificates, 1);
        assert_eq!(report.verify_mode, VerifyMode::Optional);
    }

    #[test]
    fn missing_certificate_still_builds() {
        let sink = RecordingSink::default();
        let config = tls_config("/nonexistent/server.crt", "");

        let context = TlsContextBuilder::new(&config, &sink).build().unwrap();
        assert!(!context.report.certificate_loaded);
        assert!(!context.report.serving_certificate);
        assert!(sink.has_error("Failed to load certificate"));
        // the key falls back to the certificate path, which fails as well
        assert!(sink.has_error("Failed to load key"));
    }

    #[test]
    fn missing_dh_parameters_are_tolerated() {
        let sink = RecordingSink::default();
        let dir = TempDir::new().unwrap();
        let (cert, key) = write_self_signed(dir.path());
        let config = TlsConfig {
            dh_key_path: "/nonexistent/dh.pem".into(),
            ..tls_config(&cert, &key)
        };

        let context = TlsContextBuilder::new(&config, &sink).build().unwrap();
        assert!(sink.has_error("Failed to load DH parameters"));
        assert!(!context.report.dh_parameters_loaded);
        assert!(context.report.serving_certificate);
    }

    #[test]
    fn required_verification_without_ca_rejects_every_client() {
        let sink = RecordingSink::default();
        let dir = TempDir::new().unwrap();
        let (cert, key) = write_self_signed(dir.path());
        let config = TlsConfig {
            verify_mode: VerifyMode::Required,
            ..tls_config(&cert, &key)
        };

        let context = TlsContextBuilder::new(&config, &sink).build().unwrap();
        assert!(sink.has_error("Failed to set verify mode"));
        assert!(sink.has_error("Verify mode=required without a trust store"));
        assert_eq!(context.report.verify_mode, VerifyMode::Required);
    }

    #[test]
    fn unreadable_ca_keeps_optional_mode() {
        let sink = RecordingSink::default();
        let dir = TempDir::new().unwrap();
        let (cert, key) = write_self_signed(dir.path());
        let config = TlsConfig {
            ca_path: "/nonexistent/ca.pem".into(),
            verify_mode: VerifyMode::Optional,
            ..tls_config(&cert, &key)
        };

        let context = TlsContextBuilder::new(&config, &sink).build().unwrap();
        assert!(sink.has_error("Failed to set CA"));
        assert_eq!(context.report.ca_certificates, 0);
        assert_eq!(context.report.verify_mode, VerifyMode::Optional);
    }

    #[test]
    fn rejecting_verifier_refuses_any_certificate() {
        let provider = Arc::new(ring::default_provider());
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["client".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();

        let required = RejectClientCertificates {
            mandatory: true,
            provider: provider.clone(),
        };
        assert!(required.offer_client_auth());
        assert!(required.client_auth_mandatory());
        assert!(required
            .verify_client_cert(cert.der(), &[], UnixTime::now())
            .is_err());

        let optional = RejectClientCertificates {
            mandatory: false,
            provider,
        };
        assert!(optional.offer_client_auth());
        assert!(!optional.client_auth_mandatory());
        assert!(optional
            .verify_client_cert(cert.der(), &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn der_files_are_read_whole() {
        let dir = TempDir::new().unwrap();
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        let cert_path = dir.path().join("server.der");
        let key_path = dir.path().join("server.key.der");
        fs::write(&cert_path, cert.der()).unwrap();
        fs::write(&key_path, key_pair.serialize_der()).unwrap();

        let certs =
            read_certificates(&cert_path.to_string_lossy(), CertificateFormat::Der).unwrap();
        assert_eq!(certs.len(), 1);
        assert!(read_private_key(&key_path.to_string_lossy(), CertificateFormat::Der).is_ok());

        let empty = dir.path().join("empty.der");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(
            read_certificates(&empty.to_string_lossy(), CertificateFormat::Der),
            Err(TlsError::NoCertificates(_))
        ));
    }

    #[test]
    fn dh_file_without_parameters_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dh.pem");
        fs::write(&path, "not a dh file").unwrap();
        assert!(matches!(
            read_dh_parameters(&path.to_string_lossy()),
            Err(TlsError::NoDhParameters(_))
        ));
    }
}
