//! `samlp:LogoutResponse` construction.

use std::fmt::Write;

use chrono::Utc;
use tracing::info;

use super::assertion::AssertionBuilder;
use super::signature::sign_enveloped;
use super::{ASSERTION_NS, PROTOCOL_NS, STATUS_REQUESTER, STATUS_SUCCESS, SamlError, saml_time};
use crate::xml::{escape_attr, escape_text};

impl AssertionBuilder {
    /// Signed answer to a `LogoutRequest`.
    pub fn build_logout_response(
        &self,
        in_response_to: &str,
        destination: Option<&str>,
        success: bool,
    ) -> Result<String, SamlError> {
        let id = self.ids().fresh();
        let status = if success { STATUS_SUCCESS } else { STATUS_REQUESTER };

        let mut xml = format!("<samlp:LogoutResponse xmlns:samlp=\"{PROTOCOL_NS}\"");
        if let Some(dest) = destination {
            let _ = write!(xml, " Destination=\"{}\"", escape_attr(dest));
        }
        let _ = write!(
            xml,
            " ID=\"{id}\" InResponseTo=\"{}\" IssueInstant=\"{}\" Version=\"2.0\">\
             <saml:Issuer xmlns:saml=\"{ASSERTION_NS}\">{}</saml:Issuer>\
             <samlp:Status><samlp:StatusCode Value=\"{status}\"></samlp:StatusCode></samlp:Status>\
             </samlp:LogoutResponse>",
            escape_attr(in_response_to),
            saml_time(Utc::now()),
            escape_text(self.idp_entity_id()),
        );
        let signed = sign_enveloped(self.credentials(), &xml, &id)?;
        info!(logout_response_id = %id, in_response_to, success, "SAML logout response issued");
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{signed}"))
    }
}
