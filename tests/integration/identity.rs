use crate::common::{auth, register_agent, test_client, test_client_with_admin};
use rocket::http::{ContentType, Status};

#[test]
fn test_register_requires_admin_secret() {
    let client = test_client_with_admin();
    let res = client
        .post("/register")
        .header(ContentType::JSON)
        .body(r#"{"name": "alice", "admin_secret": "wrong"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_register_rejects_empty_name() {
    let client = test_client_with_admin();
    let res = client
        .post("/register")
        .header(ContentType::JSON)
        .body(r#"{"name": "", "admin_secret": "test-admin-secret"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_register_via_header() {
    let client = test_client_with_admin();
    let res = client
        .post("/register")
        .header(ContentType::JSON)
        .header(rocket::http::Header::new("x-admin-secret", "test-admin-secret"))
        .body(r#"{"name": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["api_key"].as_str().unwrap().len() > 16);
}

#[test]
fn test_join_then_approve() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let res = client
        .post("/join")
        .header(ContentType::JSON)
        .body(r#"{"agent_name": "carol", "description": "new agent"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let reg: serde_json::Value = res.into_json().unwrap();
    let reg_id = reg["id"].as_str().unwrap();
    assert_eq!(reg["status"], "pending");

    let res = client
        .post(format!("/join/{reg_id}/approve"))
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body("{}")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let approved: serde_json::Value = res.into_json().unwrap();
    assert_eq!(approved["status"], "approved");
    assert!(approved["api_key"].is_string());

    let res = client.get(format!("/join/{reg_id}")).dispatch();
    let status: serde_json::Value = res.into_json().unwrap();
    assert!(status["api_key"].is_string());
}

#[test]
fn test_join_duplicate_name_rejected_while_registered() {
    let client = test_client_with_admin();
    register_agent(&client, "alice");
    let res = client
        .post("/join")
        .header(ContentType::JSON)
        .body(r#"{"agent_name": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_join_rejected_name_can_be_resubmitted() {
    // §9 point 6: uniqueness check only looks at status='pending', so a
    // rejected name can be re-requested freely.
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let res = client
        .post("/join")
        .header(ContentType::JSON)
        .body(r#"{"agent_name": "dave"}"#)
        .dispatch();
    let reg: serde_json::Value = res.into_json().unwrap();
    let reg_id = reg["id"].as_str().unwrap();

    let res = client
        .post(format!("/join/{reg_id}/reject"))
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body("{}")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post("/join")
        .header(ContentType::JSON)
        .body(r#"{"agent_name": "dave"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_approve_is_idempotent() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let res = client
        .post("/join")
        .header(ContentType::JSON)
        .body(r#"{"agent_name": "eve"}"#)
        .dispatch();
    let reg: serde_json::Value = res.into_json().unwrap();
    let reg_id = reg["id"].as_str().unwrap();

    for _ in 0..2 {
        let res = client
            .post(format!("/join/{reg_id}/approve"))
            .header(ContentType::JSON)
            .header(auth(&alice_key))
            .body("{}")
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
    }

    let res = client.get("/agents").dispatch();
    let agents: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(agents.iter().filter(|a| a["name"] == "eve").count(), 1);
}

#[test]
fn test_unauthenticated_request_rejected() {
    let client = test_client();
    let res = client
        .post("/send")
        .header(ContentType::JSON)
        .body(r#"{"to": "bob", "content": "hi"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}
