//! Inbound `SAMLRequest` decoding: `AuthnRequest` and `LogoutRequest`.

use std::collections::HashMap;
use std::io::Read;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::DeflateDecoder;
use quick_xml::Reader;
use quick_xml::events::Event;

use super::SamlError;

/// Inflated documents larger than this are rejected.
const MAX_INFLATED_SIZE: u64 = 64 * 1024;
const MAX_ENCODED_SIZE: usize = 256 * 1024;
const MAX_ID_LENGTH: usize = 256;

/// How the message reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Query string, raw DEFLATE then base64.
    Redirect,
    /// Form field, base64 only.
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    pub id: String,
    pub issuer: String,
    pub acs_url: Option<String>,
    pub force_authn: bool,
    pub is_passive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub id: String,
    pub issuer: String,
    pub name_id: Option<String>,
    pub session_index: Option<String>,
}

fn invalid(msg: impl Into<String>) -> SamlError {
    SamlError::InvalidRequest(msg.into())
}

/// Undo the binding's transport encoding.
pub fn decode(encoded: &str, binding: Binding) -> Result<String, SamlError> {
    if encoded.len() > MAX_ENCODED_SIZE {
        return Err(invalid("SAMLRequest too large"));
    }
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let raw = STANDARD
        .decode(compact)
        .map_err(|e| invalid(format!("base64: {e}")))?;
    match binding {
        Binding::Post => String::from_utf8(raw).map_err(|e| invalid(format!("utf-8: {e}"))),
        Binding::Redirect => {
            let mut xml = String::new();
            DeflateDecoder::new(&raw[..])
                .take(MAX_INFLATED_SIZE)
                .read_to_string(&mut xml)
                .map_err(|e| invalid(format!("inflate: {e}")))?;
            if xml.len() as u64 >= MAX_INFLATED_SIZE {
                return Err(invalid("inflated SAMLRequest too large"));
            }
            Ok(xml)
        }
    }
}

/// Root element name and attributes, plus the first text of each
/// interesting child element, all by local name.
#[derive(Debug, Default)]
struct Scanned {
    root: Option<String>,
    root_attrs: HashMap<String, String>,
    texts: HashMap<String, String>,
}

fn scan(xml: &str, wanted_texts: &[&str]) -> Result<Scanned, SamlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = Scanned::default();
    let mut capturing: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if out.root.is_none() {
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.local_name().as_ref())
                            .into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(|e| invalid(format!("attribute: {e}")))?;
                        out.root_attrs.insert(key, value.into_owned());
                    }
                    out.root = Some(local);
                } else if wanted_texts.contains(&local.as_str()) && !out.texts.contains_key(&local)
                {
                    capturing = Some(local);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(name) = capturing.take() {
                    let text = t.unescape().map_err(|e| invalid(format!("text: {e}")))?;
                    out.texts.insert(name, text.into_owned());
                }
            }
            Ok(Event::End(_)) => capturing = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(invalid(format!("xml: {e}"))),
            _ => {}
        }
    }
    Ok(out)
}

fn checked_root(scanned: &Scanned, expected: &str) -> Result<String, SamlError> {
    match scanned.root.as_deref() {
        Some(root) if root == expected => {}
        Some(other) => return Err(invalid(format!("expected {expected}, got {other}"))),
        None => return Err(invalid("empty document")),
    }
    let id = scanned
        .root_attrs
        .get("ID")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid("missing ID"))?;
    if id.len() > MAX_ID_LENGTH {
        return Err(invalid("ID too long"));
    }
    Ok(id.clone())
}

pub fn parse_authn_request(xml: &str) -> Result<AuthnRequest, SamlError> {
    let scanned = scan(xml, &["Issuer"])?;
    let id = checked_root(&scanned, "AuthnRequest")?;
    let issuer = scanned
        .texts
        .get("Issuer")
        .cloned()
        .ok_or_else(|| invalid("missing Issuer"))?;
    let flag = |name: &str| scanned.root_attrs.get(name).is_some_and(|v| v == "true");
    Ok(AuthnRequest {
        id,
        issuer,
        acs_url: scanned
            .root_attrs
            .get("AssertionConsumerServiceURL")
            .cloned(),
        force_authn: flag("ForceAuthn"),
        is_passive: flag("IsPassive"),
    })
}

pub fn parse_logout_request(xml: &str) -> Result<LogoutRequest, SamlError> {
    let mut scanned = scan(xml, &["Issuer", "NameID", "SessionIndex"])?;
    let id = checked_root(&scanned, "LogoutRequest")?;
    let issuer = scanned
        .texts
        .remove("Issuer")
        .ok_or_else(|| invalid("missing Issuer"))?;
    Ok(LogoutRequest {
        id,
        issuer,
        name_id: scanned.texts.remove("NameID"),
        session_index: scanned.texts.remove("SessionIndex"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    const AUTHN: &str = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_req1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z" AssertionConsumerServiceURL="https://sp.example.com/acs?a=1&amp;b=2" ForceAuthn="true">
  <saml:Issuer>urn:sp:test</saml:Issuer>
  <samlp:NameIDPolicy Format="urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified"/>
</samlp:AuthnRequest>"#;

    const LOGOUT: &str = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_lr1" Version="2.0">
  <saml:Issuer>urn:sp:test</saml:Issuer>
  <saml:NameID>alice</saml:NameID>
  <samlp:SessionIndex>_s1</samlp:SessionIndex>
</samlp:LogoutRequest>"#;

    fn redirect_encode(xml: &str) -> String {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(xml.as_bytes()).unwrap();
        STANDARD.encode(enc.finish().unwrap())
    }

    #[test]
    fn redirect_binding_inflates() {
        let xml = decode(&redirect_encode(AUTHN), Binding::Redirect).unwrap();
        let req = parse_authn_request(&xml).unwrap();
        assert_eq!(req.id, "_req1");
        assert_eq!(req.issuer, "urn:sp:test");
        assert_eq!(req.acs_url.as_deref(), Some("https://sp.example.com/acs?a=1&b=2"));
        assert!(req.force_authn);
        assert!(!req.is_passive);
    }

    #[test]
    fn post_binding_tolerates_line_breaks() {
        let encoded = STANDARD.encode(AUTHN);
        let wrapped = encoded
            .as_bytes()
            .chunks(76)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        let xml = decode(&wrapped, Binding::Post).unwrap();
        assert_eq!(parse_authn_request(&xml).unwrap().id, "_req1");
    }

    #[test]
    fn logout_request_fields() {
        let xml = decode(&redirect_encode(LOGOUT), Binding::Redirect).unwrap();
        let req = parse_logout_request(&xml).unwrap();
        assert_eq!(req.id, "_lr1");
        assert_eq!(req.name_id.as_deref(), Some("alice"));
        assert_eq!(req.session_index.as_deref(), Some("_s1"));
    }

    #[test]
    fn wrong_root_or_missing_parts_are_rejected() {
        assert!(parse_authn_request(LOGOUT).is_err());
        assert!(parse_logout_request(AUTHN).is_err());
        assert!(
            parse_authn_request(r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_x"/>"#)
                .is_err()
        );
        assert!(parse_authn_request("<AuthnRequest><Issuer>x</Issuer></AuthnRequest>").is_err());
    }

    #[test]
    fn garbage_encoding_is_rejected() {
        assert!(decode("%%%", Binding::Post).is_err());
        assert!(decode(&STANDARD.encode("not deflate"), Binding::Redirect).is_err());
    }
}
