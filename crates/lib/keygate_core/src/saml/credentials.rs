//! IdP signing key and certificate.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Datelike, Duration, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::Sha256;
use tracing::{info, warn};

use super::SamlError;
use crate::config::SamlConfig;

const KEY_BITS: usize = 2048;
const CERT_VALIDITY_DAYS: i64 = 365;
const CERT_FILE: &str = "idp-cert.pem";
const KEY_FILE: &str = "idp-key.pem";

/// Per-user data directory for generated secrets.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keygate")
}

/// RSA-SHA256 signing key with its self-signed certificate.
pub struct SigningCredentials {
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
    certificate_der: Vec<u8>,
    certificate_pem: String,
}

fn signing_failure(context: &str, e: impl std::fmt::Display) -> SamlError {
    SamlError::SigningFailure(format!("{context}: {e}"))
}

/// Generate a key and a one-year self-signed certificate, both PEM.
fn generate_pem(common_name: &str) -> Result<(String, String), SamlError> {
    let private_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, KEY_BITS)
        .map_err(|e| signing_failure("key generation", e))?;
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| signing_failure("key encoding", e))?
        .to_string();

    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)
        .map_err(|e| signing_failure("key import", e))?;
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    let not_before = Utc::now();
    let not_after = not_before + Duration::days(CERT_VALIDITY_DAYS);
    params.not_before = rcgen::date_time_ymd(
        not_before.year(),
        not_before.month() as u8,
        not_before.day() as u8,
    );
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| signing_failure("certificate", e))?;
    Ok((cert.pem(), key_pem))
}

/// DER bytes of the first `CERTIFICATE` block in a PEM document.
fn certificate_der_from_pem(pem: &str) -> Result<Vec<u8>, SamlError> {
    let body: String = pem
        .lines()
        .skip_while(|l| !l.starts_with("-----BEGIN CERTIFICATE-----"))
        .skip(1)
        .take_while(|l| !l.starts_with("-----END CERTIFICATE-----"))
        .map(str::trim)
        .collect();
    if body.is_empty() {
        return Err(SamlError::SigningFailure("no certificate in PEM".into()));
    }
    STANDARD
        .decode(body)
        .map_err(|e| signing_failure("certificate PEM", e))
}

fn read(path: &Path) -> Result<String, SamlError> {
    std::fs::read_to_string(path).map_err(|e| signing_failure(&path.display().to_string(), e))
}

impl SigningCredentials {
    /// Load from a PEM certificate and a PKCS#8 PEM private key.
    pub fn from_pem(certificate_pem: &str, key_pem: &str) -> Result<Self, SamlError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .map_err(|e| signing_failure("private key", e))?;
        let verifying_key = VerifyingKey::<Sha256>::new(private_key.to_public_key());
        let signing_key = SigningKey::<Sha256>::new(private_key);
        Ok(Self {
            signing_key,
            verifying_key,
            certificate_der: certificate_der_from_pem(certificate_pem)?,
            certificate_pem: certificate_pem.to_string(),
        })
    }

    /// Fresh in-memory credentials.
    pub fn generate(common_name: &str) -> Result<Self, SamlError> {
        let (cert_pem, key_pem) = generate_pem(common_name)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Credentials from the configured files, else from (or newly
    /// generated into) the data directory.
    pub fn load_or_generate(config: &SamlConfig, common_name: &str) -> Result<Self, SamlError> {
        if let (Some(cert), Some(key)) = (&config.cert_path, &config.key_path) {
            info!(cert = %cert.display(), "loading SAML signing credentials");
            return Self::from_pem(&read(cert)?, &read(key)?);
        }
        if !config.persist_generated {
            warn!("generating ephemeral SAML signing credentials");
            return Self::generate(common_name);
        }
        Self::load_or_generate_in(&data_dir().join("saml"), common_name)
    }

    /// Load `idp-cert.pem`/`idp-key.pem` from `dir`, generating and
    /// writing them when either is missing.
    pub fn load_or_generate_in(dir: &Path, common_name: &str) -> Result<Self, SamlError> {
        let cert_path = dir.join(CERT_FILE);
        let key_path = dir.join(KEY_FILE);
        if cert_path.exists() && key_path.exists() {
            return Self::from_pem(&read(&cert_path)?, &read(&key_path)?);
        }

        let (cert_pem, key_pem) = generate_pem(common_name)?;
        let written = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&key_path, &key_pem))
            .and_then(|_| std::fs::write(&cert_path, &cert_pem));
        match written {
            Ok(()) => info!(dir = %dir.display(), "generated SAML signing credentials"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "could not persist SAML credentials"),
        }
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Base64 DER certificate, as carried in `ds:X509Certificate`.
    pub fn certificate_base64(&self) -> String {
        STANDARD.encode(&self.certificate_der)
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// RSASSA-PKCS1-v1_5 with SHA-256.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SamlError> {
        let signature = self
            .signing_key
            .try_sign(data)
            .map_err(|e| signing_failure("sign", e))?;
        Ok(signature.to_vec())
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        Signature::try_from(signature)
            .map(|sig| self.verifying_key.verify(data, &sig).is_ok())
            .unwrap_or(false)
    }
}
