//! Signed `samlp:Response` construction.

use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::credentials::SigningCredentials;
use super::signature::sign_enveloped;
use super::{ASSERTION_NS, PROTOCOL_NS, STATUS_SUCCESS, SamlError, saml_time};
use crate::attributes::{ResolvedAttributes, resolve};
use crate::ids::prefixed_token;
use crate::models::application::{Application, AttributeMapping};
use crate::models::auth::Principal;
use crate::xml::{escape_attr, escape_text};

/// Half-width of the `Conditions` window and the bearer confirmation lifetime.
pub const ASSERTION_VALIDITY_SECS: i64 = 5 * 60;

/// How long issued ids are remembered.
const REPLAY_WINDOW_SECS: i64 = 30 * 60;
const PRUNE_THRESHOLD: usize = 4096;
/// Minimum spacing between full prunes of the registry.
const PRUNE_INTERVAL_SECS: i64 = 60;

const NAMEID_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";
const CM_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
const AC_PASSWORD_PROTECTED: &str =
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";
const ATTRNAME_URI: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";
const ATTRNAME_BASIC: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:basic";

pub const CLAIM_EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
pub const CLAIM_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
pub const CLAIM_NAME_ID: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
pub const CLAIM_ROLE: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";

/// Protocol message ids issued within the replay window.
///
/// An id is never handed out twice while it is remembered.
#[derive(Debug, Default)]
pub struct IdRegistry {
    issued: DashMap<String, DateTime<Utc>>,
    /// Unix time before which no full prune runs.
    next_prune: AtomicI64,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new `_`-prefixed id, unique within the replay window.
    pub fn fresh(&self) -> String {
        let now = Utc::now();
        if self.issued.len() >= PRUNE_THRESHOLD {
            self.prune(now);
        }
        loop {
            let id = prefixed_token("_", 20);
            if let Entry::Vacant(slot) = self.issued.entry(id.clone()) {
                slot.insert(now);
                return id;
            }
            debug!("message id collision, regenerating");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.issued.contains_key(id)
    }

    /// Forget ids older than the replay window. Only the caller that wins
    /// the interval slot scans the map; the rest return immediately.
    fn prune(&self, now: DateTime<Utc>) {
        let due = self.next_prune.load(Ordering::Relaxed);
        if now.timestamp() < due
            || self
                .next_prune
                .compare_exchange(
                    due,
                    now.timestamp() + PRUNE_INTERVAL_SECS,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
        {
            return;
        }
        let before = self.issued.len();
        self.issued
            .retain(|_, at| (now - *at).num_seconds() < REPLAY_WINDOW_SECS);
        debug!(pruned = before - self.issued.len(), "pruned issued SAML ids");
    }
}

/// The SP side of a response: where it goes and what it may see.
#[derive(Debug, Clone, Copy)]
pub struct ServiceProvider<'a> {
    pub entity_id: &'a str,
    pub acs_url: &'a str,
    pub mapping: &'a AttributeMapping,
}

impl<'a> ServiceProvider<'a> {
    /// SAML view of a registered application; both entity id and ACS URL
    /// must be configured.
    pub fn from_application(app: &'a Application) -> Result<Self, SamlError> {
        match (app.entity_id.as_deref(), app.acs_url.as_deref()) {
            (Some(entity_id), Some(acs_url)) if !entity_id.is_empty() && !acs_url.is_empty() => {
                Ok(Self {
                    entity_id,
                    acs_url,
                    mapping: &app.attribute_mapping,
                })
            }
            _ => Err(SamlError::ServiceNotRegistered(app.name.clone())),
        }
    }
}

/// A signed response ready for the POST binding.
#[derive(Debug, Clone)]
pub struct BuiltResponse {
    pub response_id: String,
    pub assertion_id: String,
    pub issue_instant: DateTime<Utc>,
    pub xml: String,
}

impl BuiltResponse {
    /// `SAMLResponse` form value.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.xml.as_bytes())
    }
}

/// One released attribute.
struct SamlAttribute {
    name: String,
    name_format: &'static str,
    values: Vec<String>,
}

/// Claim-URI attributes plus the application's custom mapped ones.
fn attribute_set(principal: &Principal, mapping: &AttributeMapping) -> Vec<SamlAttribute> {
    let claim = |name: &str, values: Vec<String>| SamlAttribute {
        name: name.to_string(),
        name_format: ATTRNAME_URI,
        values,
    };
    let mut out = Vec::new();
    if !principal.email.is_empty() {
        out.push(claim(CLAIM_EMAIL, vec![principal.email.clone()]));
    }
    if !principal.display_name.is_empty() {
        out.push(claim(CLAIM_NAME, vec![principal.display_name.clone()]));
    }
    out.push(claim(CLAIM_NAME_ID, vec![principal.username.clone()]));
    if !principal.roles.is_empty() {
        out.push(claim(CLAIM_ROLE, principal.roles.clone()));
    }

    let custom = AttributeMapping {
        default_attributes: Default::default(),
        custom_attributes: mapping.custom_attributes.clone(),
        include_all_fields: mapping.include_all_fields,
    };
    let resolved: ResolvedAttributes = resolve(principal, &custom);
    out.extend(resolved.into_iter().map(|(name, values)| SamlAttribute {
        name,
        name_format: ATTRNAME_BASIC,
        values,
    }));
    out
}

/// Builds and signs responses for one IdP identity.
pub struct AssertionBuilder {
    idp_entity_id: String,
    credentials: Arc<SigningCredentials>,
    ids: IdRegistry,
}

impl AssertionBuilder {
    pub fn new(idp_entity_id: impl Into<String>, credentials: Arc<SigningCredentials>) -> Self {
        Self {
            idp_entity_id: idp_entity_id.into(),
            credentials,
            ids: IdRegistry::new(),
        }
    }

    pub fn idp_entity_id(&self) -> &str {
        &self.idp_entity_id
    }

    pub fn credentials(&self) -> &Arc<SigningCredentials> {
        &self.credentials
    }

    pub fn ids(&self) -> &IdRegistry {
        &self.ids
    }

    /// Build a signed `samlp:Response` with one signed `saml:Assertion`.
    ///
    /// `in_response_to` is the AuthnRequest id for SP-initiated flows and
    /// `None` for IdP-initiated ones.
    pub fn build_response(
        &self,
        principal: &Principal,
        sp: &ServiceProvider<'_>,
        in_response_to: Option<&str>,
    ) -> Result<BuiltResponse, SamlError> {
        let response_id = self.ids.fresh();
        let assertion_id = self.ids.fresh();
        let now = Utc::now();

        let assertion = self.assertion_xml(principal, sp, &assertion_id, now, in_response_to);
        let signed_assertion = sign_enveloped(&self.credentials, &assertion, &assertion_id)?;

        let mut response = String::new();
        let _ = write!(
            response,
            "<samlp:Response xmlns:samlp=\"{PROTOCOL_NS}\" Destination=\"{}\" ID=\"{response_id}\"",
            escape_attr(sp.acs_url)
        );
        if let Some(irt) = in_response_to {
            let _ = write!(response, " InResponseTo=\"{}\"", escape_attr(irt));
        }
        let _ = write!(
            response,
            " IssueInstant=\"{}\" Version=\"2.0\">\
             <saml:Issuer xmlns:saml=\"{ASSERTION_NS}\">{}</saml:Issuer>\
             <samlp:Status><samlp:StatusCode Value=\"{STATUS_SUCCESS}\"></samlp:StatusCode></samlp:Status>\
             {signed_assertion}</samlp:Response>",
            saml_time(now),
            escape_text(&self.idp_entity_id),
        );
        let signed = sign_enveloped(&self.credentials, &response, &response_id)?;

        info!(
            response_id = %response_id,
            assertion_id = %assertion_id,
            username = %principal.username,
            audience = sp.entity_id,
            "SAML response issued"
        );
        Ok(BuiltResponse {
            response_id,
            assertion_id,
            issue_instant: now,
            xml: format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{signed}"),
        })
    }

    fn assertion_xml(
        &self,
        principal: &Principal,
        sp: &ServiceProvider<'_>,
        assertion_id: &str,
        now: DateTime<Utc>,
        in_response_to: Option<&str>,
    ) -> String {
        let issue_instant = saml_time(now);
        let validity = Duration::seconds(ASSERTION_VALIDITY_SECS);
        let not_before = saml_time(now - validity);
        let not_on_or_after = saml_time(now + validity);
        let acs = escape_attr(sp.acs_url);

        let mut xml = String::new();
        let _ = write!(
            xml,
            "<saml:Assertion xmlns:saml=\"{ASSERTION_NS}\" ID=\"{assertion_id}\" IssueInstant=\"{issue_instant}\" Version=\"2.0\">\
             <saml:Issuer>{}</saml:Issuer>\
             <saml:Subject>\
             <saml:NameID Format=\"{NAMEID_PERSISTENT}\">{}</saml:NameID>\
             <saml:SubjectConfirmation Method=\"{CM_BEARER}\">\
             <saml:SubjectConfirmationData",
            escape_text(&self.idp_entity_id),
            escape_text(&principal.username),
        );
        if let Some(irt) = in_response_to {
            let _ = write!(xml, " InResponseTo=\"{}\"", escape_attr(irt));
        }
        let _ = write!(
            xml,
            " NotOnOrAfter=\"{not_on_or_after}\" Recipient=\"{acs}\"></saml:SubjectConfirmationData>\
             </saml:SubjectConfirmation>\
             </saml:Subject>\
             <saml:Conditions NotBefore=\"{not_before}\" NotOnOrAfter=\"{not_on_or_after}\">\
             <saml:AudienceRestriction><saml:Audience>{}</saml:Audience></saml:AudienceRestriction>\
             </saml:Conditions>\
             <saml:AuthnStatement AuthnInstant=\"{issue_instant}\" SessionIndex=\"{assertion_id}\">\
             <saml:AuthnContext><saml:AuthnContextClassRef>{AC_PASSWORD_PROTECTED}</saml:AuthnContextClassRef></saml:AuthnContext>\
             </saml:AuthnStatement>",
            escape_text(sp.entity_id),
        );

        let attributes = attribute_set(principal, sp.mapping);
        if !attributes.is_empty() {
            xml.push_str("<saml:AttributeStatement>");
            for attr in &attributes {
                let _ = write!(
                    xml,
                    "<saml:Attribute Name=\"{}\" NameFormat=\"{}\">",
                    escape_attr(&attr.name),
                    attr.name_format
                );
                for value in &attr.values {
                    let _ = write!(
                        xml,
                        "<saml:AttributeValue>{}</saml:AttributeValue>",
                        escape_text(value)
                    );
                }
                xml.push_str("</saml:Attribute>");
            }
            xml.push_str("</saml:AttributeStatement>");
        }
        xml.push_str("</saml:Assertion>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::tests::alice;
    use crate::saml::credentials::tests::test_credentials;
    use crate::saml::signature::verify_enveloped;
    use chrono::NaiveDateTime;
    use std::collections::HashSet;

    fn builder() -> AssertionBuilder {
        AssertionBuilder::new("https://idp.example.com/saml/metadata", test_credentials())
    }

    fn attr<'a>(xml: &'a str, element: &str, name: &str) -> &'a str {
        let start = xml.find(&format!("<{element} ")).unwrap();
        let tag_end = start + xml[start..].find('>').unwrap();
        let tag = &xml[start..tag_end];
        let key = format!(" {name}=\"");
        let v = tag.find(&key).unwrap() + key.len();
        let len = tag[v..].find('"').unwrap();
        &tag[v..v + len]
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn response_targets_sp_with_five_minute_window() {
        let mapping = AttributeMapping::default();
        let sp = ServiceProvider {
            entity_id: "urn:sp:test",
            acs_url: "https://sp.example.com/acs",
            mapping: &mapping,
        };
        let built = builder().build_response(&alice(), &sp, None).unwrap();
        let xml = &built.xml;

        assert!(xml.contains("<saml:Audience>urn:sp:test</saml:Audience>"));
        assert_eq!(xml.matches("<saml:Assertion ").count(), 1);

        let assertion_start = xml.find("<saml:Assertion ").unwrap();
        let assertion_xml = &xml[assertion_start..];
        let issue_instant = parse_time(attr(assertion_xml, "saml:Assertion", "IssueInstant"));
        let not_before = parse_time(attr(xml, "saml:Conditions", "NotBefore"));
        let not_on_or_after = parse_time(attr(xml, "saml:Conditions", "NotOnOrAfter"));
        assert_eq!(not_on_or_after - issue_instant, Duration::minutes(5));
        assert_eq!(issue_instant - not_before, Duration::minutes(5));
        assert_eq!(
            attr(xml, "saml:SubjectConfirmationData", "Recipient"),
            "https://sp.example.com/acs"
        );
        assert_eq!(
            attr(xml, "saml:SubjectConfirmationData", "NotOnOrAfter"),
            attr(xml, "saml:Conditions", "NotOnOrAfter")
        );
        assert!(!xml.contains("InResponseTo"));
    }

    #[test]
    fn response_and_assertion_signatures_verify() {
        let creds = test_credentials();
        let mapping = AttributeMapping::default();
        let sp = ServiceProvider {
            entity_id: "urn:sp:test",
            acs_url: "https://sp.example.com/acs",
            mapping: &mapping,
        };
        let built = builder().build_response(&alice(), &sp, Some("_req1")).unwrap();
        let body = built.xml.trim_start_matches("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        assert!(verify_enveloped(&creds, body));

        let start = body.find("<saml:Assertion ").unwrap();
        let end = body.find("</saml:Assertion>").unwrap() + "</saml:Assertion>".len();
        assert!(verify_enveloped(&creds, &body[start..end]));
        assert_eq!(attr(body, "samlp:Response", "InResponseTo"), "_req1");
        assert_eq!(attr(body, "saml:SubjectConfirmationData", "InResponseTo"), "_req1");
    }

    #[test]
    fn claims_and_custom_attributes_are_released() {
        let mut mapping = AttributeMapping::default();
        mapping.custom_attributes.insert("uid".into(), "id".into());
        let sp = ServiceProvider {
            entity_id: "urn:sp:test",
            acs_url: "https://sp.example.com/acs",
            mapping: &mapping,
        };
        let built = builder().build_response(&alice(), &sp, None).unwrap();
        let xml = &built.xml;
        assert!(xml.contains(&format!(
            "<saml:Attribute Name=\"{CLAIM_EMAIL}\" NameFormat=\"{ATTRNAME_URI}\"><saml:AttributeValue>a@b.com</saml:AttributeValue>"
        )));
        assert!(xml.contains(&format!(
            "<saml:Attribute Name=\"{CLAIM_NAME}\" NameFormat=\"{ATTRNAME_URI}\"><saml:AttributeValue>Alice A</saml:AttributeValue>"
        )));
        assert!(xml.contains(
            "<saml:AttributeValue>admin</saml:AttributeValue><saml:AttributeValue>staff</saml:AttributeValue>"
        ));
        assert!(xml.contains(
            "<saml:Attribute Name=\"uid\" NameFormat=\"urn:oasis:names:tc:SAML:2.0:attrname-format:basic\"><saml:AttributeValue>u-1</saml:AttributeValue>"
        ));
        assert!(xml.contains(&format!(
            "<saml:NameID Format=\"{NAMEID_PERSISTENT}\">alice</saml:NameID>"
        )));
    }

    #[test]
    fn ids_are_fresh_and_remembered() {
        let b = builder();
        let mapping = AttributeMapping::default();
        let sp = ServiceProvider {
            entity_id: "urn:sp:test",
            acs_url: "https://sp.example.com/acs",
            mapping: &mapping,
        };
        let first = b.build_response(&alice(), &sp, None).unwrap();
        let second = b.build_response(&alice(), &sp, None).unwrap();
        let ids: HashSet<_> = [
            &first.response_id,
            &first.assertion_id,
            &second.response_id,
            &second.assertion_id,
        ]
        .into_iter()
        .collect();
        assert_eq!(ids.len(), 4);
        assert!(first.response_id.starts_with('_'));
        assert!(b.ids().contains(&first.assertion_id));
    }

    #[test]
    fn registry_never_repeats() {
        let registry = IdRegistry::new();
        let ids: HashSet<String> = (0..2000).map(|_| registry.fresh()).collect();
        assert_eq!(ids.len(), 2000);
    }

    #[test]
    fn application_without_acs_is_not_a_service_provider() {
        let app = Application {
            id: "app-2".into(),
            name: "Payroll".into(),
            protocol: crate::models::application::Protocol::Saml,
            active: true,
            service_url: None,
            entity_id: Some("urn:sp:payroll".into()),
            acs_url: None,
            slo_url: None,
            home_page_url: None,
            redirect_uris: vec![],
            attribute_mapping: AttributeMapping::default(),
        };
        assert!(matches!(
            ServiceProvider::from_application(&app),
            Err(SamlError::ServiceNotRegistered(_))
        ));
    }

    #[test]
    fn base64_form_value_decodes_to_document() {
        let mapping = AttributeMapping::default();
        let sp = ServiceProvider {
            entity_id: "urn:sp:test",
            acs_url: "https://sp.example.com/acs",
            mapping: &mapping,
        };
        let built = builder().build_response(&alice(), &sp, None).unwrap();
        let decoded = STANDARD.decode(built.to_base64()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), built.xml);
    }

    #[test]
    fn stale_ids_are_pruned_at_most_once_per_interval() {
        let registry = IdRegistry::new();
        let stale = Utc::now() - Duration::seconds(REPLAY_WINDOW_SECS + 1);
        for n in 0..PRUNE_THRESHOLD {
            registry.issued.insert(format!("_old{n}"), stale);
        }
        let first = registry.fresh();
        assert_eq!(registry.issued.len(), 1);
        assert!(registry.contains(&first));

        for n in 0..PRUNE_THRESHOLD {
            registry.issued.insert(format!("_again{n}"), stale);
        }
        registry.fresh();
        assert_eq!(registry.issued.len(), PRUNE_THRESHOLD + 2);
    }
}
