//! HTTP-POST binding page.

use std::fmt::Write;

use crate::xml::escape_attr;

/// Self-submitting form that POSTs `field=value` (and `RelayState`) to `action`.
pub fn auto_post_form(action: &str, field: &str, value: &str, relay_state: Option<&str>) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Signing in</title></head>\
         <body onload=\"document.forms[0].submit()\">\
         <form method=\"post\" action=\"{}\">\
         <input type=\"hidden\" name=\"{}\" value=\"{}\">",
        escape_attr(action),
        escape_attr(field),
        escape_attr(value),
    );
    if let Some(rs) = relay_state.filter(|rs| !rs.is_empty()) {
        let _ = write!(
            html,
            "<input type=\"hidden\" name=\"RelayState\" value=\"{}\">",
            escape_attr(rs)
        );
    }
    html.push_str(
        "<noscript><button type=\"submit\">Continue</button></noscript></form></body></html>",
    );
    html
}
