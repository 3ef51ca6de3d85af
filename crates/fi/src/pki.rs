//! Certificate issuance and inspection for keysets
//!
//! Keys are ECDSA P-256. Item ids are certificate serials in decimal, built
//! from the issue time so later items sort after earlier ones.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, PublicKeyData, SanType, SerialNumber, string::Ia5String,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use vfs_store::KeysetItem;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use crate::error::TaskError;

/// Validity of CA certificates
pub const CA_VALIDITY_DAYS: i64 = 3650;

/// Validity of leaf certificates
pub const CERT_VALIDITY_DAYS: i64 = 455;

/// What a keypair is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeypairType {
    /// Certificate authority
    Ca,
    /// TLS client
    Client,
    /// TLS server
    Server,
}

impl KeypairType {
    fn validity_days(self) -> i64 {
        match self {
            KeypairType::Ca => CA_VALIDITY_DAYS,
            KeypairType::Client | KeypairType::Server => CERT_VALIDITY_DAYS,
        }
    }
}

/// Subject and usage of a certificate to issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Subject common name
    pub common_name: String,
    /// Subject organizations
    pub organizations: Vec<String>,
    /// DNS names and IP addresses
    pub alternate_names: Vec<String>,
    /// Key usage
    pub keypair_type: KeypairType,
}

/// Fields read back from an issued certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    /// Subject common name
    pub common_name: String,
    /// Subject organizations
    pub organizations: Vec<String>,
    /// Issuer common name
    pub issuer_common_name: String,
    /// Alternate names, sorted
    pub alternate_names: Vec<String>,
    /// Basic constraints mark it as a CA
    pub is_ca: bool,
    /// Serial in decimal
    pub serial: String,
}

fn pki_error(name: &str, message: impl std::fmt::Display) -> TaskError {
    TaskError::Keyset {
        name: name.to_string(),
        message: message.to_string(),
    }
}

/// New serial: issue time in nanoseconds shifted left 32 bits, plus 32 random bits
pub fn build_serial() -> u128 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let random: u32 = rand::thread_rng().r#gen();
    (nanos << 32) | u128::from(random)
}

fn serial_bytes(serial: u128) -> Vec<u8> {
    let bytes = serial.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut out = bytes[first..].to_vec();
    if out[0] & 0x80 != 0 {
        out.insert(0, 0);
    }
    out
}

/// Issue a certificate and key
///
/// # Arguments
///
/// * `name` - Keyset name, used in errors
/// * `request` - Subject and usage
/// * `signer` - CA item that signs the certificate; self-signed when `None`
pub fn issue(name: &str, request: &CertificateRequest, signer: Option<&KeysetItem>) -> Result<KeysetItem, TaskError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(request.common_name.clone()));
    for org in &request.organizations {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
    }
    params.distinguished_name = dn;

    match request.keypair_type {
        KeypairType::Ca => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
        }
        KeypairType::Client => {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        }
        KeypairType::Server => {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        }
    }

    params.subject_alt_names = request
        .alternate_names
        .iter()
        .map(|san| match san.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => Ia5String::try_from(san.clone())
                .map(SanType::DnsName)
                .map_err(|e| pki_error(name, format!("invalid DNS name {san:?}: {e}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let now = ::time::OffsetDateTime::now_utc();
    params.not_before = now - ::time::Duration::hours(1);
    params.not_after = now + ::time::Duration::days(request.keypair_type.validity_days());

    let serial = build_serial();
    params.serial_number = Some(SerialNumber::from_slice(&serial_bytes(serial)));

    let key_pair = KeyPair::generate().map_err(|e| pki_error(name, format!("generating key: {e}")))?;
    let cert = match signer {
        None => params
            .self_signed(&key_pair)
            .map_err(|e| pki_error(name, format!("self-signing: {e}")))?,
        Some(ca) => {
            let ca_key_pem = ca
                .private_key
                .as_deref()
                .ok_or_else(|| pki_error(name, "signing CA has no private key"))?;
            let ca_key = KeyPair::from_pem(ca_key_pem).map_err(|e| pki_error(name, format!("CA key: {e}")))?;
            let issuer = Issuer::from_ca_cert_pem(&ca.certificate, &ca_key)
                .map_err(|e| pki_error(name, format!("CA certificate: {e}")))?;
            params
                .signed_by(&key_pair, &issuer)
                .map_err(|e| pki_error(name, format!("signing: {e}")))?
        }
    };

    Ok(KeysetItem {
        id: serial.to_string(),
        certificate: cert.pem(),
        private_key: Some(key_pair.serialize_pem()),
        distrust_timestamp: None,
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Read the identifying fields of a PEM certificate
pub fn parse_certificate(name: &str, pem_data: &str) -> Result<CertificateSummary, TaskError> {
    let block = ::pem::parse(pem_data.as_bytes()).map_err(|e| pki_error(name, format!("invalid PEM: {e}")))?;
    let (_, cert) = X509Certificate::from_der(block.contents())
        .map_err(|e| pki_error(name, format!("failed to parse certificate: {e}")))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string();
    let organizations = cert
        .subject()
        .iter_organization()
        .filter_map(|o| o.as_str().ok())
        .map(ToString::to_string)
        .collect();
    let issuer_common_name = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string();

    let mut alternate_names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general in &san.value.general_names {
            match general {
                GeneralName::DNSName(dns) => alternate_names.push((*dns).to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        alternate_names.push(ip.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    alternate_names.sort();

    Ok(CertificateSummary {
        common_name,
        organizations,
        issuer_common_name,
        alternate_names,
        is_ca: cert.is_ca(),
        serial: cert.serial.to_string(),
    })
}

/// JSON Web Key for the public half of a PEM private key
///
/// The key id is the unpadded base64url SHA-256 of the DER public key.
pub fn public_jwk(name: &str, private_key_pem: &str) -> Result<Value, TaskError> {
    let key = KeyPair::from_pem(private_key_pem).map_err(|e| pki_error(name, format!("key: {e}")))?;
    let raw = key.public_key_raw();
    if raw.len() != 65 || raw[0] != 0x04 {
        return Err(pki_error(name, "unsupported public key encoding"));
    }
    let kid = URL_SAFE_NO_PAD.encode(Sha256::digest(key.subject_public_key_info()));
    Ok(json!({
        "kty": "EC",
        "crv": "P-256",
        "alg": "ES256",
        "use": "sig",
        "kid": kid,
        "x": URL_SAFE_NO_PAD.encode(&raw[1..33]),
        "y": URL_SAFE_NO_PAD.encode(&raw[33..65]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cn: &str, keypair_type: KeypairType) -> CertificateRequest {
        CertificateRequest {
            common_name: cn.to_string(),
            organizations: Vec::new(),
            alternate_names: Vec::new(),
            keypair_type,
        }
    }

    #[test]
    fn test_serials_are_increasing_and_positive() {
        let a = build_serial();
        let b = build_serial();
        assert!(b >> 32 >= a >> 32);
        let bytes = serial_bytes(0x80);
        assert_eq!(bytes, vec![0, 0x80]);
    }

    #[test]
    fn test_issue_ca_and_signed_server() {
        let ca = issue("kubernetes-ca", &request("kubernetes-ca", KeypairType::Ca), None).unwrap();
        let ca_summary = parse_certificate("kubernetes-ca", &ca.certificate).unwrap();
        assert!(ca_summary.is_ca);
        assert_eq!(ca_summary.common_name, "kubernetes-ca");
        assert_eq!(ca_summary.serial, ca.id);

        let mut server = request("kubernetes-master", KeypairType::Server);
        server.alternate_names = vec!["kubernetes".to_string(), "100.64.0.1".to_string(), "api.example.com".to_string()];
        let item = issue("kubernetes-master", &server, Some(&ca)).unwrap();
        let summary = parse_certificate("kubernetes-master", &item.certificate).unwrap();
        assert!(!summary.is_ca);
        assert_eq!(summary.issuer_common_name, "kubernetes-ca");
        assert_eq!(summary.alternate_names, vec!["100.64.0.1", "api.example.com", "kubernetes"]);
    }

    #[test]
    fn test_client_organizations() {
        let mut client = request("kubelet", KeypairType::Client);
        client.organizations = vec!["system:nodes".to_string()];
        let item = issue("kubelet", &client, None).unwrap();
        let summary = parse_certificate("kubelet", &item.certificate).unwrap();
        assert_eq!(summary.organizations, vec!["system:nodes"]);
    }

    #[test]
    fn test_public_jwk() {
        let item = issue("service-account", &request("service-account", KeypairType::Ca), None).unwrap();
        let jwk = public_jwk("service-account", item.private_key.as_deref().unwrap()).unwrap();
        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["x"].as_str().unwrap().len(), 43);
    }
}
