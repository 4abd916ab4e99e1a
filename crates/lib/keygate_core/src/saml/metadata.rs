//! IdP metadata document.

use super::{BINDING_POST, BINDING_REDIRECT, DSIG_NS, METADATA_NS, PROTOCOL_NS};
use crate::xml::{escape_attr, escape_text};

/// Where the IdP's endpoints live.
#[derive(Debug, Clone)]
pub struct IdpEndpoints {
    pub sso_url: String,
    pub sls_url: String,
}

impl IdpEndpoints {
    /// `/saml/sso` and `/saml/sls` under `base_url`.
    pub fn under(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            sso_url: format!("{base}/saml/sso"),
            sls_url: format!("{base}/saml/sls"),
        }
    }
}

/// `md:EntityDescriptor` with one signing key and the SSO/SLS endpoints
/// in both bindings.
pub fn idp_metadata(
    entity_id: &str,
    endpoints: &IdpEndpoints,
    certificate_b64: &str,
    organization: &str,
) -> String {
    let sso = escape_attr(&endpoints.sso_url);
    let sls = escape_attr(&endpoints.sls_url);
    let org = escape_text(organization);
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<md:EntityDescriptor xmlns:md=\"{METADATA_NS}\" xmlns:ds=\"{DSIG_NS}\" entityID=\"{entity}\">\n\
  <md:IDPSSODescriptor WantAuthnRequestsSigned=\"false\" protocolSupportEnumeration=\"{PROTOCOL_NS}\">\n\
    <md:KeyDescriptor use=\"signing\">\n\
      <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{certificate_b64}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>\n\
    </md:KeyDescriptor>\n\
    <md:SingleLogoutService Binding=\"{BINDING_REDIRECT}\" Location=\"{sls}\"/>\n\
    <md:SingleLogoutService Binding=\"{BINDING_POST}\" Location=\"{sls}\"/>\n\
    <md:NameIDFormat>urn:oasis:names:tc:SAML:2.0:nameid-format:persistent</md:NameIDFormat>\n\
    <md:SingleSignOnService Binding=\"{BINDING_REDIRECT}\" Location=\"{sso}\"/>\n\
    <md:SingleSignOnService Binding=\"{BINDING_POST}\" Location=\"{sso}\"/>\n\
  </md:IDPSSODescriptor>\n\
  <md:Organization>\n\
    <md:OrganizationName xml:lang=\"en\">{org}</md:OrganizationName>\n\
    <md:OrganizationDisplayName xml:lang=\"en\">{org}</md:OrganizationDisplayName>\n\
    <md:OrganizationURL xml:lang=\"en\">{entity}</md:OrganizationURL>\n\
  </md:Organization>\n\
</md:EntityDescriptor>\n",
        entity = escape_attr(entity_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_lists_endpoints_and_certificate() {
        let endpoints = IdpEndpoints::under("https://idp.example.com/");
        let xml = idp_metadata(
            "https://idp.example.com/saml/metadata",
            &endpoints,
            "MIIBcert",
            "Acme & Co",
        );
        assert!(xml.contains("entityID=\"https://idp.example.com/saml/metadata\""));
        assert!(xml.contains("Location=\"https://idp.example.com/saml/sso\""));
        assert!(xml.contains("Location=\"https://idp.example.com/saml/sls\""));
        assert!(xml.contains("<ds:X509Certificate>MIIBcert</ds:X509Certificate>"));
        assert!(xml.contains("Acme &amp; Co"));
    }
}
