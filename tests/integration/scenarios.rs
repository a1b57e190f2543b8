// Literal end-to-end walkthroughs, one per documented scenario. These
// overlap with feature-specific tests but exercise each flow exactly as
// described, in a single sequence, rather than split across assertions.
use crate::common::{auth, multipart_body, register_agent, test_client_with_admin};
use rocket::http::{ContentType, Status};

#[test]
fn scenario_1_register_send_inbox() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let res = client
        .post("/send")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"to": "bob", "content": "hi"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let sent: serde_json::Value = res.into_json().unwrap();
    assert!(sent["conversation_id"].is_string());

    let bob_key = register_agent(&client, "bob");
    let res = client.get("/inbox").header(auth(&bob_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let inbox: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["content"], "hi");
    assert_eq!(inbox[0]["from_agent"], "alice");
}

#[test]
fn scenario_2_claim_then_second_claim_rejected() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let bob_key = register_agent(&client, "bob");

    let res = client
        .post("/tasks")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"title": "T1", "priority": "urgent"}"#)
        .dispatch();
    let task: serde_json::Value = res.into_json().unwrap();
    let id = task["id"].as_str().unwrap();

    let res = client.post(format!("/tasks/{id}/claim")).header(auth(&alice_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let claimed: serde_json::Value = res.into_json().unwrap();
    assert_eq!(claimed["status"], "claimed");
    assert_eq!(claimed["claimed_by"], "alice");

    let res = client.post(format!("/tasks/{id}/claim")).header(auth(&bob_key)).dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn scenario_3_dependencies_unmet_blockers() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let res = client
        .post("/tasks")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"title": "T1"}"#)
        .dispatch();
    let t1: serde_json::Value = res.into_json().unwrap();
    let t1_id = t1["id"].as_str().unwrap();
    assert_eq!(t1["status"], "open");

    let res = client
        .post("/tasks")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(format!(r#"{{"title": "T2", "depends_on": ["{t1_id}"]}}"#))
        .dispatch();
    let t2: serde_json::Value = res.into_json().unwrap();
    let t2_id = t2["id"].as_str().unwrap();

    let res = client.get(format!("/tasks/{t2_id}/dependencies")).dispatch();
    let deps: serde_json::Value = res.into_json().unwrap();
    assert_eq!(deps["unmet_blockers"], 1);

    let res = client.post(format!("/tasks/{t1_id}/complete")).header(auth(&alice_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/tasks/{t2_id}/dependencies")).dispatch();
    let deps: serde_json::Value = res.into_json().unwrap();
    assert_eq!(deps["unmet_blockers"], 0);
}

#[test]
fn scenario_4_commit_modify_read_diff() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    client
        .post("/git/repos")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"name": "r1"}"#)
        .dispatch();

    client
        .post("/git/repos/r1/commit")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"branch": "main", "message": "c1", "files": [{"path": "a.txt", "content": "hello", "action": "add"}]}"#)
        .dispatch();

    let res = client
        .post("/git/repos/r1/commit")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"branch": "main", "message": "c2", "files": [{"path": "a.txt", "content": "hello world", "action": "modify"}]}"#)
        .dispatch();
    let second_commit: serde_json::Value = res.into_json().unwrap();
    let second_commit_id = second_commit["id"].as_str().unwrap();

    let res = client.get("/git/repos/r1/files/a.txt").dispatch();
    let file: serde_json::Value = res.into_json().unwrap();
    assert_eq!(file["content"], "hello world");

    let res = client.get(format!("/git/repos/r1/diff/{second_commit_id}")).dispatch();
    let diff_text = res.into_string().unwrap();
    assert!(diff_text.contains("hello"));
    assert!(diff_text.contains("world"));
}

#[test]
fn scenario_5_upload_download_delete_404() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let bytes = b"0123456789";
    let (ct, body) = multipart_body(&[], "file", "x", bytes);
    let res = client.post("/files/upload").header(ct).header(auth(&alice_key)).body(body).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let meta: serde_json::Value = res.into_json().unwrap();
    let id = meta["id"].as_str().unwrap();

    let res = client.get(format!("/files/{id}/x")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_bytes().unwrap().len(), 10);

    let res = client.delete(format!("/files/{id}")).header(auth(&alice_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/files/{id}/x")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn scenario_6_join_approve_api_key_visible() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let res = client
        .post("/join")
        .header(ContentType::JSON)
        .body(r#"{"agent_name": "carol"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let reg: serde_json::Value = res.into_json().unwrap();
    assert_eq!(reg["status"], "pending");
    let reg_id = reg["id"].as_str().unwrap();

    let res = client
        .post(format!("/join/{reg_id}/approve"))
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body("{}")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/join/{reg_id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let final_reg: serde_json::Value = res.into_json().unwrap();
    assert!(final_reg["api_key"].is_string());
}
