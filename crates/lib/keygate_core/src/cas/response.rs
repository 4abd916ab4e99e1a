//! CAS protocol documents: the 1.0 text answer and the 2.0/3.0 XML and
//! JSON `serviceResponse` bodies.

use std::fmt::Write;

use serde_json::{Map, Value, json};

use crate::attributes::ResolvedAttributes;
use crate::xml::{escape_attr, escape_text, is_element_name};

pub const CAS_NAMESPACE: &str = "http://www.yale.edu/tp/cas";

/// `/cas/validate` body.
pub fn validate_v1(user: Option<&str>) -> String {
    match user {
        Some(user) => format!("yes\n{user}\n"),
        None => "no\n\n".to_string(),
    }
}

/// `authenticationFailure` / `proxyFailure` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    InvalidRequest,
    InvalidTicket,
    InvalidService,
    InvalidProxyCallback,
    InternalError,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::InvalidRequest => "INVALID_REQUEST",
            FailureCode::InvalidTicket => "INVALID_TICKET",
            FailureCode::InvalidService => "INVALID_SERVICE",
            FailureCode::InvalidProxyCallback => "INVALID_PROXY_CALLBACK",
            FailureCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Body of a successful validation.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationSuccess {
    pub user: String,
    pub attributes: ResolvedAttributes,
    /// PGTIOU when a proxy callback was honoured.
    pub proxy_granting_ticket: Option<String>,
    /// Proxy chain, most recent first.
    pub proxies: Vec<String>,
}

/// Response encoding selected by `format=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

impl Format {
    /// `json` (any case) selects JSON; everything else is XML.
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw {
            Some(f) if f.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Xml,
        }
    }
}

fn open_document(out: &mut String) {
    let _ = write!(out, "<cas:serviceResponse xmlns:cas=\"{CAS_NAMESPACE}\">");
}

fn close_document(out: &mut String) {
    out.push_str("</cas:serviceResponse>");
}

/// `<cas:authenticationSuccess>` document.
///
/// Multi-valued attributes repeat the element. Attribute names that are
/// not valid XML names are left out.
pub fn success_xml(success: &AuthenticationSuccess) -> String {
    let mut out = String::new();
    open_document(&mut out);
    out.push_str("<cas:authenticationSuccess>");
    let _ = write!(out, "<cas:user>{}</cas:user>", escape_text(&success.user));

    if !success.attributes.is_empty() {
        out.push_str("<cas:attributes>");
        for (name, values) in &success.attributes {
            if !is_element_name(name) {
                continue;
            }
            for value in values {
                let _ = write!(out, "<cas:{name}>{}</cas:{name}>", escape_text(value));
            }
        }
        out.push_str("</cas:attributes>");
    }

    if let Some(iou) = &success.proxy_granting_ticket {
        let _ = write!(
            out,
            "<cas:proxyGrantingTicket>{}</cas:proxyGrantingTicket>",
            escape_text(iou)
        );
    }
    if !success.proxies.is_empty() {
        out.push_str("<cas:proxies>");
        for proxy in &success.proxies {
            let _ = write!(out, "<cas:proxy>{}</cas:proxy>", escape_text(proxy));
        }
        out.push_str("</cas:proxies>");
    }
    out.push_str("</cas:authenticationSuccess>");
    close_document(&mut out);
    out
}

/// `<cas:authenticationFailure>` document.
pub fn failure_xml(code: FailureCode, description: &str) -> String {
    let mut out = String::new();
    open_document(&mut out);
    let _ = write!(
        out,
        "<cas:authenticationFailure code=\"{}\">{}</cas:authenticationFailure>",
        code.as_str(),
        escape_text(description)
    );
    close_document(&mut out);
    out
}

fn attribute_value(values: &[String]) -> Value {
    match values {
        [single] => Value::String(single.clone()),
        many => Value::Array(many.iter().cloned().map(Value::String).collect()),
    }
}

/// JSON form of [`success_xml`].
pub fn success_json(success: &AuthenticationSuccess) -> Value {
    let attributes: Map<String, Value> = success
        .attributes
        .iter()
        .map(|(name, values)| (name.clone(), attribute_value(values)))
        .collect();
    let mut body = Map::new();
    body.insert("user".into(), Value::String(success.user.clone()));
    body.insert("attributes".into(), Value::Object(attributes));
    if let Some(iou) = &success.proxy_granting_ticket {
        body.insert("proxyGrantingTicket".into(), Value::String(iou.clone()));
    }
    if !success.proxies.is_empty() {
        body.insert("proxies".into(), json!(success.proxies));
    }
    json!({ "serviceResponse": { "authenticationSuccess": body } })
}

/// JSON form of [`failure_xml`].
pub fn failure_json(code: FailureCode, description: &str) -> Value {
    json!({
        "serviceResponse": {
            "authenticationFailure": {
                "code": code.as_str(),
                "description": description,
            }
        }
    })
}

/// `/cas/proxy` success.
pub fn proxy_success_xml(proxy_ticket: &str) -> String {
    let mut out = String::new();
    open_document(&mut out);
    let _ = write!(
        out,
        "<cas:proxySuccess><cas:proxyTicket>{}</cas:proxyTicket></cas:proxySuccess>",
        escape_text(proxy_ticket)
    );
    close_document(&mut out);
    out
}

/// `/cas/proxy` failure.
pub fn proxy_failure_xml(code: FailureCode, description: &str) -> String {
    let mut out = String::new();
    open_document(&mut out);
    let _ = write!(
        out,
        "<cas:proxyFailure code=\"{}\">{}</cas:proxyFailure>",
        escape_attr(code.as_str()),
        escape_text(description)
    );
    close_document(&mut out);
    out
}

pub fn proxy_success_json(proxy_ticket: &str) -> Value {
    json!({ "serviceResponse": { "proxySuccess": { "proxyTicket": proxy_ticket } } })
}

pub fn proxy_failure_json(code: FailureCode, description: &str) -> Value {
    json!({
        "serviceResponse": {
            "proxyFailure": { "code": code.as_str(), "description": description }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AuthenticationSuccess {
        let mut attributes = ResolvedAttributes::new();
        attributes.insert("email".into(), vec!["a@b.com".into()]);
        attributes.insert("roles".into(), vec!["admin".into(), "staff".into()]);
        attributes.insert("bad name".into(), vec!["x".into()]);
        AuthenticationSuccess {
            user: "alice".into(),
            attributes,
            ..Default::default()
        }
    }

    #[test]
    fn v1_answers() {
        assert_eq!(validate_v1(Some("alice")), "yes\nalice\n");
        assert_eq!(validate_v1(None), "no\n\n");
    }

    #[test]
    fn success_document_shape() {
        let xml = success_xml(&alice());
        assert!(xml.starts_with(
            "<cas:serviceResponse xmlns:cas=\"http://www.yale.edu/tp/cas\"><cas:authenticationSuccess>"
        ));
        assert!(xml.contains("<cas:user>alice</cas:user>"));
        assert!(xml.contains("<cas:email>a@b.com</cas:email>"));
        assert!(xml.contains("<cas:roles>admin</cas:roles><cas:roles>staff</cas:roles>"));
        assert!(!xml.contains("bad name"));
        assert!(!xml.contains("proxyGrantingTicket"));
    }

    #[test]
    fn success_document_escapes_values() {
        let success = AuthenticationSuccess {
            user: "a<b>&c".into(),
            ..Default::default()
        };
        let xml = success_xml(&success);
        assert!(xml.contains("<cas:user>a&lt;b&gt;&amp;c</cas:user>"));
        assert!(!xml.contains("<cas:attributes>"));
    }

    #[test]
    fn success_carries_proxy_fields() {
        let success = AuthenticationSuccess {
            proxy_granting_ticket: Some("PGTIOU-1".into()),
            proxies: vec!["https://p1/cb".into()],
            ..alice()
        };
        let xml = success_xml(&success);
        assert!(xml.contains("<cas:proxyGrantingTicket>PGTIOU-1</cas:proxyGrantingTicket>"));
        assert!(xml.contains("<cas:proxies><cas:proxy>https://p1/cb</cas:proxy></cas:proxies>"));
        let json = success_json(&success);
        assert_eq!(
            json["serviceResponse"]["authenticationSuccess"]["proxyGrantingTicket"],
            "PGTIOU-1"
        );
    }

    #[test]
    fn failure_documents() {
        let xml = failure_xml(FailureCode::InvalidTicket, "Ticket ST-1 not recognized");
        assert!(xml.contains(
            "<cas:authenticationFailure code=\"INVALID_TICKET\">Ticket ST-1 not recognized</cas:authenticationFailure>"
        ));
        let json = failure_json(FailureCode::InvalidRequest, "missing");
        assert_eq!(
            json["serviceResponse"]["authenticationFailure"]["code"],
            "INVALID_REQUEST"
        );
    }

    #[test]
    fn json_success_collapses_single_values() {
        let json = success_json(&alice());
        let body = &json["serviceResponse"]["authenticationSuccess"];
        assert_eq!(body["user"], "alice");
        assert_eq!(body["attributes"]["email"], "a@b.com");
        assert_eq!(body["attributes"]["roles"], json!(["admin", "staff"]));
    }

    #[test]
    fn proxy_documents() {
        assert!(proxy_success_xml("PT-1").contains("<cas:proxyTicket>PT-1</cas:proxyTicket>"));
        assert!(
            proxy_failure_xml(FailureCode::InvalidTicket, "nope")
                .contains("<cas:proxyFailure code=\"INVALID_TICKET\">nope</cas:proxyFailure>")
        );
        assert_eq!(
            proxy_success_json("PT-1")["serviceResponse"]["proxySuccess"]["proxyTicket"],
            "PT-1"
        );
    }

    #[test]
    fn format_selection() {
        assert_eq!(Format::from_param(Some("JSON")), Format::Json);
        assert_eq!(Format::from_param(Some("xml")), Format::Xml);
        assert_eq!(Format::from_param(None), Format::Xml);
    }
}
