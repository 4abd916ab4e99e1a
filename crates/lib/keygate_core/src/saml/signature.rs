//! Enveloped XML signatures (exclusive c14n, RSA-SHA256, SHA-256 digest).
//!
//! Elements passed in here are built in exclusive canonical form already:
//! each prefix declared on the outermost element that uses it, attributes
//! in canonical order, explicit end tags, no inter-element whitespace. The
//! digest is taken over the element text as-is.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use super::credentials::SigningCredentials;
use super::{DSIG_NS, SamlError};

const C14N_EXCL: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

const SIGNED_INFO_OPEN: &str = "<ds:SignedInfo>";
const SIGNED_INFO_CLOSE: &str = "</ds:SignedInfo>";

fn digest_b64(canonical: &str) -> String {
    STANDARD.encode(Sha256::digest(canonical.as_bytes()))
}

/// Children of `ds:SignedInfo` for a reference to `#id`.
fn signed_info_children(reference_id: &str, digest: &str) -> String {
    format!(
        "<ds:CanonicalizationMethod Algorithm=\"{C14N_EXCL}\"></ds:CanonicalizationMethod>\
         <ds:SignatureMethod Algorithm=\"{RSA_SHA256}\"></ds:SignatureMethod>\
         <ds:Reference URI=\"#{reference_id}\">\
         <ds:Transforms>\
         <ds:Transform Algorithm=\"{ENVELOPED}\"></ds:Transform>\
         <ds:Transform Algorithm=\"{C14N_EXCL}\"></ds:Transform>\
         </ds:Transforms>\
         <ds:DigestMethod Algorithm=\"{SHA256}\"></ds:DigestMethod>\
         <ds:DigestValue>{digest}</ds:DigestValue>\
         </ds:Reference>"
    )
}

/// `ds:SignedInfo` as canonicalized on its own: the `ds` namespace is
/// rendered on it because no output ancestor declares it.
fn canonical_signed_info(children: &str) -> String {
    format!("<ds:SignedInfo xmlns:ds=\"{DSIG_NS}\">{children}{SIGNED_INFO_CLOSE}")
}

/// Sign `element` (whose `ID` is `reference_id`) and insert the
/// `ds:Signature` right after its first `</saml:Issuer>`.
pub fn sign_enveloped(
    credentials: &SigningCredentials,
    element: &str,
    reference_id: &str,
) -> Result<String, SamlError> {
    const ISSUER_END: &str = "</saml:Issuer>";
    let insert_at = element
        .find(ISSUER_END)
        .map(|pos| pos + ISSUER_END.len())
        .ok_or_else(|| SamlError::SigningFailure("element has no Issuer".into()))?;

    let children = signed_info_children(reference_id, &digest_b64(element));
    let signature_value =
        STANDARD.encode(credentials.sign(canonical_signed_info(&children).as_bytes())?);

    let signature = format!(
        "<ds:Signature xmlns:ds=\"{DSIG_NS}\">\
         {SIGNED_INFO_OPEN}{children}{SIGNED_INFO_CLOSE}\
         <ds:SignatureValue>{signature_value}</ds:SignatureValue>\
         <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>\
         </ds:Signature>",
        credentials.certificate_base64()
    );

    let mut out = String::with_capacity(element.len() + signature.len());
    out.push_str(&element[..insert_at]);
    out.push_str(&signature);
    out.push_str(&element[insert_at..]);
    Ok(out)
}

fn between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<(usize, &'a str)> {
    let start = haystack.find(open)? + open.len();
    let len = haystack[start..].find(close)?;
    Some((start, &haystack[start..start + len]))
}

/// Check the first enveloped signature in `signed_element` against
/// `credentials`: digest of the element without the signature, then the
/// RSA signature over the canonical `SignedInfo`.
pub fn verify_enveloped(credentials: &SigningCredentials, signed_element: &str) -> bool {
    const SIG_OPEN: &str = "<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">";
    const SIG_CLOSE: &str = "</ds:Signature>";

    let Some(sig_start) = signed_element.find(SIG_OPEN) else {
        return false;
    };
    let Some(sig_len) = signed_element[sig_start..].find(SIG_CLOSE) else {
        return false;
    };
    let sig_end = sig_start + sig_len + SIG_CLOSE.len();
    let signature = &signed_element[sig_start..sig_end];
    let unsigned = format!(
        "{}{}",
        &signed_element[..sig_start],
        &signed_element[sig_end..]
    );

    let Some((_, children)) = between(signature, SIGNED_INFO_OPEN, SIGNED_INFO_CLOSE) else {
        return false;
    };
    let Some((_, digest)) = between(children, "<ds:DigestValue>", "</ds:DigestValue>") else {
        return false;
    };
    if digest != digest_b64(&unsigned) {
        return false;
    }
    let Some((_, value)) = between(signature, "<ds:SignatureValue>", "</ds:SignatureValue>")
    else {
        return false;
    };
    let Ok(raw) = STANDARD.decode(value) else {
        return false;
    };
    credentials.verify(canonical_signed_info(children).as_bytes(), &raw)
}
