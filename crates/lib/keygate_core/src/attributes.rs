//! Attribute resolution shared by the CAS and SAML front ends.

use std::collections::BTreeMap;

use crate::models::application::AttributeMapping;
use crate::models::auth::Principal;

/// Released attributes: name → one or more values, ordered by name.
pub type ResolvedAttributes = BTreeMap<String, Vec<String>>;

/// Read a principal field by its mapping name. Unknown fields resolve to nothing.
pub fn principal_field(principal: &Principal, field: &str) -> Option<Vec<String>> {
    let single = |v: &str| (!v.is_empty()).then(|| vec![v.to_string()]);
    match field.to_ascii_lowercase().as_str() {
        "id" | "user_id" | "userid" => single(&principal.id),
        "username" | "user_name" => single(&principal.username),
        "email" | "email_address" | "mail" => single(&principal.email),
        "display_name" | "displayname" | "full_name" => single(&principal.display_name),
        "roles" | "role" => (!principal.roles.is_empty()).then(|| principal.roles.clone()),
        "permissions" => {
            (!principal.permissions.is_empty()).then(|| principal.permissions.clone())
        }
        "status" | "user_status" => single(principal.status.as_str()),
        "last_login_at" | "lastloginat" => principal
            .last_login_at
            .map(|t| vec![t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)]),
        _ => None,
    }
}

/// Resolve a mapping against a principal.
///
/// Custom attributes override defaults of the same name. With
/// `include_all_fields`, the remaining principal fields are added under
/// their camelCase names unless already present.
pub fn resolve(principal: &Principal, mapping: &AttributeMapping) -> ResolvedAttributes {
    let mut out = ResolvedAttributes::new();
    for (name, field) in mapping
        .default_attributes
        .iter()
        .chain(mapping.custom_attributes.iter())
    {
        if let Some(values) = principal_field(principal, field) {
            out.insert(name.clone(), values);
        }
    }
    if mapping.include_all_fields {
        for (name, field) in [
            ("roles", "roles"),
            ("permissions", "permissions"),
            ("status", "status"),
            ("lastLoginAt", "last_login_at"),
        ] {
            if out.contains_key(name) {
                continue;
            }
            if let Some(values) = principal_field(principal, field) {
                out.insert(name.to_string(), values);
            }
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::auth::AccountStatus;

    pub(crate) fn alice() -> Principal {
        Principal {
            id: "u-1".into(),
            username: "alice".into(),
            email: "a@b.com".into(),
            display_name: "Alice A".into(),
            status: AccountStatus::Active,
            password_hash: None,
            roles: vec!["admin".into(), "staff".into()],
            permissions: vec!["apps:read".into()],
            failed_login_count: 0,
            locked_until: None,
            otp_secret: None,
            last_login_at: None,
            last_login_ip: None,
        }
    }

    #[test]
    fn default_mapping_releases_identity_fields() {
        let attrs = resolve(&alice(), &AttributeMapping::default());
        assert_eq!(attrs["email"], vec!["a@b.com"]);
        assert_eq!(attrs["displayName"], vec!["Alice A"]);
        assert_eq!(attrs["username"], vec!["alice"]);
        assert_eq!(attrs["userId"], vec!["u-1"]);
        assert!(!attrs.contains_key("roles"));
    }

    #[test]
    fn include_all_fields_adds_roles_without_overwriting() {
        let mut mapping = AttributeMapping::default();
        mapping.include_all_fields = true;
        mapping
            .custom_attributes
            .insert("status".into(), "username".into());
        let attrs = resolve(&alice(), &mapping);
        assert_eq!(attrs["roles"], vec!["admin", "staff"]);
        assert_eq!(attrs["status"], vec!["alice"]);
        assert!(!attrs.contains_key("lastLoginAt"));
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut mapping = AttributeMapping::default();
        mapping
            .custom_attributes
            .insert("shoeSize".into(), "shoe_size".into());
        assert!(!resolve(&alice(), &mapping).contains_key("shoeSize"));
    }
}
