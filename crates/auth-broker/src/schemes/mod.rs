//! Downstream authentication schemes.
//!
//! Each registered service declares, in its registry metadata, which
//! credential it expects. The declaration is parsed once into an
//! `Authentication`, checked into a `SchemeHandler` at registration, and
//! used on every proxied call to build an `AuthenticationCommand`.

pub mod command;
pub mod dispatch;

pub use command::{AuthenticationCommand, Mutation};
pub use dispatch::SchemeDispatcher;

use crate::errors::BrokerError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SCHEME_METADATA_KEY: &str = "apiml.authentication.scheme";
pub const APPLID_METADATA_KEY: &str = "apiml.authentication.applid";
pub const HEADERS_METADATA_KEY: &str = "apiml.authentication.headers";

pub const SAF_TOKEN_HEADER: &str = "X-SAF-Token";
pub const OIDC_TOKEN_HEADER: &str = "OIDC-token";
pub const CERT_PUBLIC_HEADER: &str = "X-Certificate-Public";
pub const CERT_DN_HEADER: &str = "X-Certificate-DistinguishedName";
pub const CERT_CN_HEADER: &str = "X-Certificate-CommonName";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationScheme {
    Bypass,
    ZoweJwt,
    HttpBasicPassTicket,
    SafIdt,
    Zosmf,
    X509,
    Oidc,
}

impl AuthenticationScheme {
    pub const ALL: [AuthenticationScheme; 7] = [
        AuthenticationScheme::Bypass,
        AuthenticationScheme::ZoweJwt,
        AuthenticationScheme::HttpBasicPassTicket,
        AuthenticationScheme::SafIdt,
        AuthenticationScheme::Zosmf,
        AuthenticationScheme::X509,
        AuthenticationScheme::Oidc,
    ];

    /// Name used in registry metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            AuthenticationScheme::Bypass => "bypass",
            AuthenticationScheme::ZoweJwt => "zoweJwt",
            AuthenticationScheme::HttpBasicPassTicket => "httpBasicPassTicket",
            AuthenticationScheme::SafIdt => "safIdt",
            AuthenticationScheme::Zosmf => "zosmf",
            AuthenticationScheme::X509 => "x509",
            AuthenticationScheme::Oidc => "oidc",
        }
    }
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthenticationScheme {
    type Err = SchemeConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|scheme| scheme.as_str() == s)
            .ok_or_else(|| SchemeConfigError::UnknownScheme(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemeConfigError {
    #[error("Unknown authentication scheme '{0}'")]
    UnknownScheme(String),

    #[error("Scheme '{0}' requires an application id")]
    MissingApplicationId(AuthenticationScheme),

    #[error("Header '{0}' cannot be set by the x509 scheme")]
    UnknownHeader(String),

    #[error("Scheme '{scheme}' is not supported here: {reason}")]
    Unsupported {
        scheme: AuthenticationScheme,
        reason: String,
    },

    #[error("Invalid service registry: {0}")]
    InvalidRegistry(String),
}

impl From<SchemeConfigError> for BrokerError {
    fn from(err: SchemeConfigError) -> Self {
        BrokerError::SchemeConfiguration(err.to_string())
    }
}

/// A service's declared authentication, as read from its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub scheme: AuthenticationScheme,
    pub application_id: Option<String>,
    pub headers: Vec<String>,
}

impl Authentication {
    /// Read the `apiml.authentication.*` keys. A service that declares no
    /// scheme is `bypass`.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self, SchemeConfigError> {
        let scheme = match metadata.get(SCHEME_METADATA_KEY).map(|s| s.trim()) {
            None | Some("") => AuthenticationScheme::Bypass,
            Some(name) => name.parse()?,
        };
        let application_id = metadata
            .get(APPLID_METADATA_KEY)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let headers = metadata
            .get(HEADERS_METADATA_KEY)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            scheme,
            application_id,
            headers,
        })
    }
}

/// Certificate field an X.509 service may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateHeader {
    Public,
    DistinguishedName,
    CommonName,
}

impl CertificateHeader {
    pub const ALL: [CertificateHeader; 3] = [
        CertificateHeader::Public,
        CertificateHeader::DistinguishedName,
        CertificateHeader::CommonName,
    ];

    pub fn header_name(self) -> &'static str {
        match self {
            CertificateHeader::Public => CERT_PUBLIC_HEADER,
            CertificateHeader::DistinguishedName => CERT_DN_HEADER,
            CertificateHeader::CommonName => CERT_CN_HEADER,
        }
    }

    fn parse(name: &str) -> Result<Self, SchemeConfigError> {
        Self::ALL
            .into_iter()
            .find(|h| h.header_name().eq_ignore_ascii_case(name))
            .ok_or_else(|| SchemeConfigError::UnknownHeader(name.to_string()))
    }
}

/// One handler per scheme, carrying the configuration it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemeHandler {
    Bypass,
    ZoweJwt,
    HttpBasicPassTicket { application_id: String },
    SafIdt { application_id: String },
    Zosmf,
    X509 { headers: Vec<CertificateHeader> },
    Oidc,
}

impl SchemeHandler {
    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            SchemeHandler::Bypass => AuthenticationScheme::Bypass,
            SchemeHandler::ZoweJwt => AuthenticationScheme::ZoweJwt,
            SchemeHandler::HttpBasicPassTicket { .. } => AuthenticationScheme::HttpBasicPassTicket,
            SchemeHandler::SafIdt { .. } => AuthenticationScheme::SafIdt,
            SchemeHandler::Zosmf => AuthenticationScheme::Zosmf,
            SchemeHandler::X509 { .. } => AuthenticationScheme::X509,
            SchemeHandler::Oidc => AuthenticationScheme::Oidc,
        }
    }
}

impl TryFrom<&Authentication> for SchemeHandler {
    type Error = SchemeConfigError;

    fn try_from(authentication: &Authentication) -> Result<Self, Self::Error> {
        let application_id = || {
            authentication
                .application_id
                .clone()
                .ok_or(SchemeConfigError::MissingApplicationId(authentication.scheme))
        };

        Ok(match authentication.scheme {
            AuthenticationScheme::Bypass => SchemeHandler::Bypass,
            AuthenticationScheme::ZoweJwt => SchemeHandler::ZoweJwt,
            AuthenticationScheme::HttpBasicPassTicket => SchemeHandler::HttpBasicPassTicket {
                application_id: application_id()?,
            },
            AuthenticationScheme::SafIdt => SchemeHandler::SafIdt {
                application_id: application_id()?,
            },
            AuthenticationScheme::Zosmf => SchemeHandler::Zosmf,
            AuthenticationScheme::X509 => {
                let headers = if authentication.headers.is_empty() {
                    CertificateHeader::ALL.to_vec()
                } else {
                    authentication
                        .headers
                        .iter()
                        .map(|h| CertificateHeader::parse(h))
                        .collect::<Result<_, _>>()?
                };
                SchemeHandler::X509 { headers }
            }
            AuthenticationScheme::Oidc => SchemeHandler::Oidc,
        })
    }
}
