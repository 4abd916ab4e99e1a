//! Registered relying parties.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// SSO protocol an application is integrated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Saml,
    Cas,
    OAuth2,
    Oidc,
    /// Plain link to the application's home page.
    Direct,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Saml => "saml",
            Protocol::Cas => "cas",
            Protocol::OAuth2 => "oauth2",
            Protocol::Oidc => "oidc",
            Protocol::Direct => "direct",
        }
    }

    /// Parse the stored representation. Anything unrecognised launches directly.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "saml" | "saml2" => Protocol::Saml,
            "cas" => Protocol::Cas,
            "oauth2" => Protocol::OAuth2,
            "oidc" => Protocol::Oidc,
            _ => Protocol::Direct,
        }
    }
}

/// Attribute release policy for an application.
///
/// Keys are the attribute names released to the relying party, values name
/// a principal field (`id`, `username`, `email`, `display_name`, `roles`,
/// `permissions`, `status`, `last_login_at`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeMapping {
    pub default_attributes: BTreeMap<String, String>,
    pub custom_attributes: BTreeMap<String, String>,
    pub include_all_fields: bool,
}

impl Default for AttributeMapping {
    fn default() -> Self {
        let default_attributes = [
            ("email", "email"),
            ("displayName", "display_name"),
            ("username", "username"),
            ("userId", "id"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            default_attributes,
            custom_attributes: BTreeMap::new(),
            include_all_fields: false,
        }
    }
}

impl AttributeMapping {
    /// Parse a stored JSON mapping. Empty input or an empty
    /// `default_attributes` object falls back to the default mapping.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut mapping: AttributeMapping = serde_json::from_str(raw)?;
        if mapping.default_attributes.is_empty() {
            mapping.default_attributes = Self::default().default_attributes;
        }
        Ok(mapping)
    }
}

/// A registered application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub active: bool,
    /// CAS service URL.
    pub service_url: Option<String>,
    /// SAML service provider entity id.
    pub entity_id: Option<String>,
    /// SAML assertion consumer service URL.
    pub acs_url: Option<String>,
    /// SAML single logout URL.
    pub slo_url: Option<String>,
    pub home_page_url: Option<String>,
    pub redirect_uris: Vec<String>,
    pub attribute_mapping: AttributeMapping,
}

impl Application {
    /// Whether a CAS `service` presented by a client belongs to this application.
    ///
    /// Exact match, or the registered URL followed by a path, query or
    /// fragment boundary.
    pub fn matches_service(&self, service: &str) -> bool {
        let Some(registered) = self.service_url.as_deref() else {
            return false;
        };
        if service == registered {
            return true;
        }
        match service.strip_prefix(registered) {
            Some(rest) => {
                registered.ends_with('/')
                    || rest.starts_with('/')
                    || rest.starts_with('?')
                    || rest.starts_with('#')
            }
            None => false,
        }
    }
}
