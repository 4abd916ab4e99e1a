//! SAML2 identity provider: signing credentials, assertion and logout
//! documents, request parsing and metadata.

pub mod assertion;
pub mod credentials;
pub mod form;
pub mod logout;
pub mod metadata;
pub mod request;
pub mod signature;

use thiserror::Error;

pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const METADATA_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const STATUS_REQUESTER: &str = "urn:oasis:names:tc:SAML:2.0:status:Requester";

pub const BINDING_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const BINDING_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// SAML time format: UTC, second precision.
pub(crate) fn saml_time(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// SAML errors.
#[derive(Debug, Error)]
pub enum SamlError {
    #[error("Service provider is not registered: {0}")]
    ServiceNotRegistered(String),

    #[error("Invalid SAML request: {0}")]
    InvalidRequest(String),

    /// IdP key or certificate unusable.
    #[error("Signing failure: {0}")]
    SigningFailure(String),

    /// The SAML subsystem failed to start.
    #[error("SAML is unavailable")]
    Unavailable,
}
