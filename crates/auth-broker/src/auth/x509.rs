//! Forwarded client certificates.
//!
//! The TLS terminator performs the mTLS handshake and forwards the client
//! certificate as base64 DER in a request header. This module decodes that
//! value, reads the subject distinguished name, and defines the trust seam
//! (`CertificateValidator`) used before a certificate is mapped to a user.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;
use thiserror::Error;
use x509_parser::parse_x509_certificate;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("Certificate is not valid base64")]
    InvalidEncoding,

    #[error("Certificate is not a DER-encoded X.509 structure")]
    MalformedDer,

    #[error("Certificate was not verified: {0}")]
    Untrusted(String),
}

/// Client certificate forwarded by the TLS terminator.
#[derive(Clone)]
pub struct ClientCertificate {
    der: Vec<u8>,
    distinguished_name: String,
    common_name: Option<String>,
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("distinguished_name", &self.distinguished_name)
            .field("der_len", &self.der.len())
            .finish()
    }
}

impl ClientCertificate {
    /// Decode a header value: base64 DER, optionally wrapped in PEM armor.
    pub fn from_header_value(value: &str) -> Result<Self, CertificateError> {
        let body: String = value
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .flat_map(|line| line.chars())
            .filter(|c| !c.is_whitespace())
            .collect();

        let der = STANDARD
            .decode(body)
            .map_err(|_| CertificateError::InvalidEncoding)?;

        Self::from_der(der)
    }

    pub fn from_der(der: Vec<u8>) -> Result<Self, CertificateError> {
        let (distinguished_name, common_name) = {
            let (_, certificate) = parse_x509_certificate(&der).map_err(|e| {
                tracing::debug!(target: "broker.auth.x509", error = %e, "Certificate could not be parsed");
                CertificateError::MalformedDer
            })?;
            let subject = certificate.subject();
            let common_name = subject
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_string);
            (rfc4514_name(subject), common_name)
        };

        Ok(Self {
            der,
            distinguished_name,
            common_name,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Standard base64 of the DER bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    pub fn distinguished_name(&self) -> &str {
        &self.distinguished_name
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }
}

/// Decides whether a forwarded certificate may be trusted.
pub trait CertificateValidator: Send + Sync {
    fn validate(&self, certificate: &ClientCertificate) -> Result<(), CertificateError>;
}

/// Trusts certificates whose chain the TLS terminator verified during the
/// handshake. Only structural checks remain here.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminatorVerified;

impl CertificateValidator for TerminatorVerified {
    fn validate(&self, certificate: &ClientCertificate) -> Result<(), CertificateError> {
        if certificate.distinguished_name().is_empty() {
            return Err(CertificateError::Untrusted(
                "certificate has an empty subject".to_string(),
            ));
        }
        Ok(())
    }
}

/// RFC 4514 form of a name: most specific RDN first, multi-valued RDNs
/// joined with `+`.
fn rfc4514_name(name: &X509Name<'_>) -> String {
    let mut rdns: Vec<String> = name
        .iter_rdn()
        .map(|rdn| {
            rdn.iter()
                .map(|attribute| {
                    format!(
                        "{}={}",
                        attribute_name(attribute),
                        attribute_value(attribute)
                    )
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect();
    rdns.reverse();
    rdns.join(",")
}

fn attribute_name(attribute: &AttributeTypeAndValue<'_>) -> String {
    let oid = attribute.attr_type().to_id_string();
    let name = match oid.as_str() {
        "2.5.4.3" => "CN",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "STREET",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "0.9.2342.19200300.100.1.25" => "DC",
        "0.9.2342.19200300.100.1.1" => "UID",
        _ => return oid,
    };
    name.to_string()
}

/// Escaped string value of an attribute; values that are not strings are
/// written as `#` and the hex of their content.
fn attribute_value(attribute: &AttributeTypeAndValue<'_>) -> String {
    match attribute.as_str() {
        Ok(value) => escape_rdn_value(value),
        Err(_) => format!("#{}", hex::encode(attribute.attr_value().data)),
    }
}

fn escape_rdn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let leading = i == 0 && (c == ' ' || c == '#');
        let trailing = i + 1 == value.chars().count() && c == ' ';
        if leading || trailing || matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    fn certificate_der(entries: &[(DnType, &str)]) -> Vec<u8> {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        let mut dn = DistinguishedName::new();
        for (kind, value) in entries {
            dn.push(kind.clone(), *value);
        }
        params.distinguished_name = dn;
        let key_pair = KeyPair::generate().unwrap();
        params.self_signed(&key_pair).unwrap().der().to_vec()
    }

    #[test]
    fn test_reads_subject_from_certificate() {
        let der = certificate_der(&[
            (DnType::CountryName, "US"),
            (DnType::OrganizationName, "Zowe"),
            (DnType::CommonName, "USER1"),
        ]);

        let certificate = ClientCertificate::from_der(der).unwrap();

        assert_eq!(certificate.common_name(), Some("USER1"));
        assert_eq!(certificate.distinguished_name(), "CN=USER1,O=Zowe,C=US");
    }

    #[test]
    fn test_header_value_accepts_base64_and_pem() {
        let der = certificate_der(&[(DnType::CommonName, "USER1")]);
        let b64 = STANDARD.encode(&der);
        let pem = format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            b64
        );

        let from_b64 = ClientCertificate::from_header_value(&b64).unwrap();
        let from_pem = ClientCertificate::from_header_value(&pem).unwrap();

        assert_eq!(from_b64.der(), der.as_slice());
        assert_eq!(from_pem.der(), der.as_slice());
        assert_eq!(from_b64.to_base64(), b64);
    }

    #[test]
    fn test_rejects_non_base64() {
        assert_eq!(
            ClientCertificate::from_header_value("not*base64").unwrap_err(),
            CertificateError::InvalidEncoding
        );
    }

    #[test]
    fn test_rejects_non_der_payload() {
        let b64 = STANDARD.encode(b"hello world");
        assert_eq!(
            ClientCertificate::from_header_value(&b64).unwrap_err(),
            CertificateError::MalformedDer
        );
    }

    #[test]
    fn test_rejects_truncated_der() {
        let mut der = certificate_der(&[(DnType::CommonName, "USER1")]);
        der.truncate(der.len() / 2);
        assert_eq!(
            ClientCertificate::from_der(der).unwrap_err(),
            CertificateError::MalformedDer
        );
    }

    #[test]
    fn test_terminator_verified_accepts_well_formed_certificate() {
        let der = certificate_der(&[(DnType::CommonName, "USER1")]);
        let certificate = ClientCertificate::from_der(der).unwrap();

        assert!(TerminatorVerified.validate(&certificate).is_ok());
    }

    #[test]
    fn test_terminator_verified_rejects_empty_subject() {
        let der = certificate_der(&[]);
        let certificate = ClientCertificate::from_der(der).unwrap();

        assert!(matches!(
            TerminatorVerified.validate(&certificate),
            Err(CertificateError::Untrusted(_))
        ));
    }

    #[test]
    fn test_unnamed_attributes_use_dotted_oid() {
        let der = certificate_der(&[
            (DnType::CustomDnType(vec![1, 2, 840, 113549, 1, 9, 1]), "user1@example.com"),
            (DnType::CommonName, "USER1"),
        ]);

        let certificate = ClientCertificate::from_der(der).unwrap();

        assert_eq!(
            certificate.distinguished_name(),
            "CN=USER1,1.2.840.113549.1.9.1=user1@example.com"
        );
    }

    #[test]
    fn test_subject_values_are_escaped() {
        let der = certificate_der(&[
            (DnType::OrganizationName, "Doe, Inc"),
            (DnType::CommonName, "USER1"),
        ]);

        let certificate = ClientCertificate::from_der(der).unwrap();

        assert_eq!(certificate.distinguished_name(), "CN=USER1,O=Doe\\, Inc");
        assert_eq!(certificate.common_name(), Some("USER1"));
    }

    #[test]
    fn test_escape_rdn_value() {
        assert_eq!(escape_rdn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_rdn_value("#hash"), "\\#hash");
        assert_eq!(escape_rdn_value("plain"), "plain");
    }

    #[test]
    fn test_debug_does_not_dump_der() {
        let der = certificate_der(&[(DnType::CommonName, "USER1")]);
        let certificate = ClientCertificate::from_der(der).unwrap();

        let debug = format!("{:?}", certificate);

        assert!(debug.contains("CN=USER1"));
        assert!(debug.contains("der_len"));
    }
}
