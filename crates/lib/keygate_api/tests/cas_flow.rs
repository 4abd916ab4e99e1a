//! CAS login, validation and proxy flows through the router.

mod common;

use axum::http::StatusCode;
use common::*;

async fn login_for_ticket(h: &Harness, service: &str) -> (String, String) {
    let resp = h
        .post_form(
            "/cas/login",
            &[("username", "alice"), ("password", PASSWORD), ("service", service)],
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let cookie = session_cookie(&resp).expect("session cookie");
    let ticket = query_param(&location(&resp), "ticket").expect("ticket param");
    (ticket, cookie)
}

#[tokio::test]
async fn login_then_service_validate_returns_user() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;
    assert!(ticket.starts_with("ST-"));

    let resp = h
        .get(
            &format!("/cas/serviceValidate?service={}&ticket={ticket}", enc(CAS_SERVICE)),
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let xml = body_text(resp).await;
    assert!(xml.contains("<cas:authenticationSuccess>"), "{xml}");
    assert!(xml.contains("<cas:user>alice</cas:user>"), "{xml}");
    assert!(xml.contains("<cas:email>alice@example.com</cas:email>"), "{xml}");
    assert!(xml.contains("<cas:isFromNewLogin>true</cas:isFromNewLogin>"), "{xml}");
}

#[tokio::test]
async fn second_validation_of_same_ticket_fails() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;
    let uri = format!("/cas/serviceValidate?service={}&ticket={ticket}", enc(CAS_SERVICE));

    let first = body_text(h.get(&uri, None).await).await;
    assert!(first.contains("<cas:user>alice</cas:user>"));

    let second = body_text(h.get(&uri, None).await).await;
    assert!(second.contains("<cas:authenticationFailure code=\"INVALID_TICKET\">"), "{second}");
}

#[tokio::test]
async fn wrong_service_burns_the_ticket() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;

    let other = "https://portal.example.com";
    let xml = body_text(
        h.get(&format!("/cas/serviceValidate?service={}&ticket={ticket}", enc(other)), None)
            .await,
    )
    .await;
    assert!(xml.contains("INVALID_TICKET"));

    let xml = body_text(
        h.get(
            &format!("/cas/serviceValidate?service={}&ticket={ticket}", enc(CAS_SERVICE)),
            None,
        )
        .await,
    )
    .await;
    assert!(xml.contains("INVALID_TICKET"));
}

#[tokio::test]
async fn gateway_without_session_redirects_without_ticket() {
    let h = Harness::new();
    let resp = h
        .get(&format!("/cas/login?service={}&gateway=true", enc(CAS_SERVICE)), None)
        .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let loc = location(&resp);
    assert_eq!(loc, CAS_SERVICE);
    assert!(!loc.contains("ticket="));
}

#[tokio::test]
async fn no_session_and_no_gateway_asks_for_credentials() {
    let h = Harness::new();
    let resp = h
        .get(&format!("/cas/login?service={}", enc(CAS_SERVICE)), None)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"], "login_required");
}

#[tokio::test]
async fn existing_session_gets_a_ticket_without_credentials() {
    let h = Harness::new();
    let (_, cookie) = h.login("alice").await;
    let resp = h
        .get(&format!("/cas/login?service={}", enc(CAS_SERVICE)), Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let ticket = query_param(&location(&resp), "ticket").expect("ticket");

    let xml = body_text(
        h.get(
            &format!("/cas/p3/serviceValidate?service={}&ticket={ticket}", enc(CAS_SERVICE)),
            None,
        )
        .await,
    )
    .await;
    assert!(xml.contains("<cas:isFromNewLogin>false</cas:isFromNewLogin>"), "{xml}");
}

#[tokio::test]
async fn renew_ignores_the_session_and_rejects_reused_login() {
    let h = Harness::new();
    let (_, cookie) = h.login("alice").await;

    let resp = h
        .get(
            &format!("/cas/login?service={}&renew=true", enc(CAS_SERVICE)),
            Some(&cookie),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = h
        .get(&format!("/cas/login?service={}", enc(CAS_SERVICE)), Some(&cookie))
        .await;
    let ticket = query_param(&location(&resp), "ticket").unwrap();
    let xml = body_text(
        h.get(
            &format!(
                "/cas/serviceValidate?service={}&ticket={ticket}&renew=true",
                enc(CAS_SERVICE)
            ),
            None,
        )
        .await,
    )
    .await;
    assert!(
        xml.contains(&format!(
            "<cas:authenticationFailure code=\"INVALID_TICKET\">Ticket '{ticket}' not recognized</cas:authenticationFailure>"
        )),
        "{xml}"
    );
}

#[tokio::test]
async fn unregistered_service_is_refused_at_login() {
    let h = Harness::new();
    let resp = h
        .get(&format!("/cas/login?service={}&gateway=true", enc("https://evil.example.net")), None)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cas1_validate_answers_plain_text() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;
    let uri = format!("/cas/validate?service={}&ticket={ticket}", enc(CAS_SERVICE));
    assert_eq!(body_text(h.get(&uri, None).await).await, "yes\nalice\n");
    assert_eq!(body_text(h.get(&uri, None).await).await, "no\n\n");
    assert_eq!(
        body_text(h.get("/cas/validate?ticket=ST-x", None).await).await,
        "no\n\n"
    );
}

#[tokio::test]
async fn missing_parameters_are_invalid_request() {
    let h = Harness::new();
    let xml = body_text(h.get("/cas/serviceValidate?ticket=ST-x", None).await).await;
    assert!(xml.contains("code=\"INVALID_REQUEST\""), "{xml}");
}

#[tokio::test]
async fn json_format_on_request() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;
    let json = body_json(
        h.get(
            &format!(
                "/cas/serviceValidate?service={}&ticket={ticket}&format=json",
                enc(CAS_SERVICE)
            ),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(
        json["serviceResponse"]["authenticationSuccess"]["user"],
        "alice"
    );
}

#[tokio::test]
async fn proxy_chain_from_pgt_to_proxy_validate() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;
    let pgt_url = "https://sp.example.com/pgtCallback";

    let xml = body_text(
        h.get(
            &format!(
                "/cas/serviceValidate?service={}&ticket={ticket}&pgtUrl={}",
                enc(CAS_SERVICE),
                enc(pgt_url)
            ),
            None,
        )
        .await,
    )
    .await;
    let (url, pgt, iou) = h.callback.delivered.lock().unwrap()[0].clone();
    assert_eq!(url, pgt_url);
    assert!(pgt.starts_with("PGT-"));
    assert!(xml.contains(&format!("<cas:proxyGrantingTicket>{iou}</cas:proxyGrantingTicket>")));

    let target = "https://portal.example.com";
    let xml = body_text(
        h.get(&format!("/cas/proxy?pgt={pgt}&targetService={}", enc(target)), None)
            .await,
    )
    .await;
    assert!(xml.contains("<cas:proxySuccess>"), "{xml}");
    let start = xml.find("<cas:proxyTicket>").unwrap() + "<cas:proxyTicket>".len();
    let end = xml.find("</cas:proxyTicket>").unwrap();
    let pt = &xml[start..end];
    assert!(pt.starts_with("PT-"));

    // Proxy tickets are refused at serviceValidate and burned by the attempt.
    let refused = body_text(
        h.get(&format!("/cas/serviceValidate?service={}&ticket={pt}", enc(target)), None)
            .await,
    )
    .await;
    assert!(refused.contains("INVALID_TICKET"));

    let xml = body_text(
        h.get(&format!("/cas/proxy?pgt={pgt}&targetService={}", enc(target)), None)
            .await,
    )
    .await;
    let start = xml.find("<cas:proxyTicket>").map(|i| i + "<cas:proxyTicket>".len());
    // The PGT is single-use.
    assert!(start.is_none(), "{xml}");
}

#[tokio::test]
async fn proxy_validate_lists_the_callback_chain() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;
    let pgt_url = "https://sp.example.com/pgtCallback";
    h.get(
        &format!(
            "/cas/serviceValidate?service={}&ticket={ticket}&pgtUrl={}",
            enc(CAS_SERVICE),
            enc(pgt_url)
        ),
        None,
    )
    .await;
    let pgt = h.callback.delivered.lock().unwrap()[0].1.clone();

    let target = "https://portal.example.com";
    let xml = body_text(
        h.get(&format!("/cas/proxy?pgt={pgt}&targetService={}", enc(target)), None)
            .await,
    )
    .await;
    let start = xml.find("<cas:proxyTicket>").unwrap() + "<cas:proxyTicket>".len();
    let end = xml.find("</cas:proxyTicket>").unwrap();
    let pt = xml[start..end].to_string();

    let xml = body_text(
        h.get(&format!("/cas/proxyValidate?service={}&ticket={pt}", enc(target)), None)
            .await,
    )
    .await;
    assert!(xml.contains("<cas:user>alice</cas:user>"), "{xml}");
    assert!(xml.contains(&format!("<cas:proxy>{pgt_url}</cas:proxy>")), "{xml}");
}

#[tokio::test]
async fn insecure_pgt_url_still_authenticates_without_pgt() {
    let h = Harness::new();
    let (ticket, _) = login_for_ticket(&h, CAS_SERVICE).await;
    let xml = body_text(
        h.get(
            &format!(
                "/cas/serviceValidate?service={}&ticket={ticket}&pgtUrl={}",
                enc(CAS_SERVICE),
                enc("http://sp.example.com/cb")
            ),
            None,
        )
        .await,
    )
    .await;
    assert!(xml.contains("<cas:user>alice</cas:user>"));
    assert!(!xml.contains("proxyGrantingTicket"));
    assert!(h.callback.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn logout_clears_session_and_redirects_to_registered_service() {
    let h = Harness::new();
    let (_, cookie) = h.login("alice").await;
    let resp = h
        .get(&format!("/cas/logout?service={}", enc(CAS_SERVICE)), Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), CAS_SERVICE);

    let resp = h
        .get(&format!("/cas/login?service={}", enc(CAS_SERVICE)), Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_password_at_cas_login_is_generic() {
    let h = Harness::new();
    let resp = h
        .post_form(
            "/cas/login",
            &[("username", "alice"), ("password", "nope"), ("service", CAS_SERVICE)],
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"], "invalid_credentials");

    let resp = h
        .post_form(
            "/cas/login",
            &[("username", "nobody"), ("password", "nope"), ("service", CAS_SERVICE)],
            None,
        )
        .await;
    assert_eq!(body_json(resp).await["error"], "invalid_credentials");
}
