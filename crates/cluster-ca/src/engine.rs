//! Certificate engine: RSA key generation, CSRs, the self-signed root and
//! CA-signed leaves.
//!
//! All operations are synchronous transforms over in-memory buffers. Nothing
//! here touches the filesystem; RSA-4096 generation is CPU-bound, so async
//! callers should run it on a blocking thread.

use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyUsagePurpose, SerialNumber,
};
use rsa::RsaPrivateKey;
use uuid::Uuid;

use crate::material::{Certificate, Csr, Fingerprint, KeyPair};
use crate::{CaError, Result};

/// RSA modulus size used for every identity in a deployment.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Generates keys and certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateEngine {
    key_bits: usize,
}

impl Default for CertificateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateEngine {
    /// Engine producing RSA-4096 keys.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            key_bits: DEFAULT_KEY_BITS,
        }
    }

    /// Engine with a different RSA key size. Intended for tests; production
    /// deployments use [`CertificateEngine::new`].
    #[must_use]
    pub const fn with_key_bits(key_bits: usize) -> Self {
        Self { key_bits }
    }

    /// RSA key size this engine generates.
    pub const fn key_bits(&self) -> usize {
        self.key_bits
    }

    /// Generate a fresh RSA private key.
    pub fn generate_key_pair(&self) -> Result<KeyPair> {
        let key = RsaPrivateKey::new(&mut OsRng, self.key_bits)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;
        KeyPair::from_rsa(&key)
    }

    /// Build the self-signed CA root for `key`.
    ///
    /// The root may only sign end-entity certificates (path length 0).
    pub fn generate_self_signed_root(
        &self,
        key: &KeyPair,
        subject_cn: &str,
        validity_days: u32,
    ) -> Result<Certificate> {
        let signing_key = key.signing_key()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(subject_cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params, validity_days);
        params.serial_number = Some(random_serial());

        let cert = params.self_signed(&signing_key)?;
        Ok(Certificate::from_rcgen(&cert))
    }

    /// Build a signing request for `subject_cn`, signed by `key`.
    pub fn generate_csr(&self, key: &KeyPair, subject_cn: &str) -> Result<Csr> {
        let signing_key = key.signing_key()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(subject_cn);

        let csr = params.serialize_request(&signing_key)?;
        Ok(Csr::new(csr.pem()?, subject_cn.to_string()))
    }

    /// Sign `csr` with the CA, producing a leaf usable for both client and
    /// server authentication.
    ///
    /// Each call draws a fresh random serial, so signing the same CSR twice
    /// yields two certificates with different fingerprints.
    pub fn sign_certificate(
        &self,
        csr: &Csr,
        ca_key: &KeyPair,
        ca_cert: &Certificate,
        validity_days: u32,
    ) -> Result<Certificate> {
        let mut request = CertificateSigningRequestParams::from_pem(csr.pem())
            .map_err(|e| CaError::InvalidCsr(e.to_string()))?;

        let params = &mut request.params;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        set_validity(params, validity_days);
        params.serial_number = Some(random_serial());

        let issuer = Issuer::from_ca_cert_pem(ca_cert.pem(), ca_key.signing_key()?)?;
        let cert = request.signed_by(&issuer)?;
        Ok(Certificate::from_rcgen(&cert))
    }

    /// Canonical fingerprint of `cert`; the same function is used at
    /// issuance and at verification.
    pub fn fingerprint_of(&self, cert: &Certificate) -> Fingerprint {
        cert.fingerprint()
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn
}

fn set_validity(params: &mut CertificateParams, validity_days: u32) {
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(i64::from(validity_days));
}

/// 128-bit random serial with the sign bit cleared.
fn random_serial() -> SerialNumber {
    let mut bytes = *Uuid::new_v4().as_bytes();
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}
