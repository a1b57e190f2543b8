use crate::common::{auth, register_agent, test_client_with_admin};
use rocket::http::{ContentType, Status};

#[test]
fn test_create_project_creator_is_owner() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let res = client
        .post("/projects")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"name": "Bridge", "description": "the server itself"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let project: serde_json::Value = res.into_json().unwrap();
    assert_eq!(project["progress_pct"], 0.0);
    let id = project["id"].as_str().unwrap();

    let res = client.get(format!("/projects/{id}")).dispatch();
    let detail: serde_json::Value = res.into_json().unwrap();
    let members = detail["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["agent_name"], "alice");
    assert_eq!(members[0]["role"], "owner");
}

#[test]
fn test_progress_pct_reflects_done_tasks() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let res = client
        .post("/projects")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"name": "P1"}"#)
        .dispatch();
    let project: serde_json::Value = res.into_json().unwrap();
    let project_id = project["id"].as_str().unwrap();

    let res = client
        .post("/tasks")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(format!(r#"{{"title": "T1", "project_id": "{project_id}"}}"#))
        .dispatch();
    let t1: serde_json::Value = res.into_json().unwrap();
    let t1_id = t1["id"].as_str().unwrap();

    client
        .post("/tasks")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(format!(r#"{{"title": "T2", "project_id": "{project_id}"}}"#))
        .dispatch();

    client.post(format!("/tasks/{t1_id}/complete")).header(auth(&alice_key)).dispatch();

    let res = client.get(format!("/projects/{project_id}")).dispatch();
    let detail: serde_json::Value = res.into_json().unwrap();
    assert_eq!(detail["progress_pct"], 50.0);
    assert_eq!(detail["tasks"].as_array().unwrap().len(), 2);
}

#[test]
fn test_add_member_and_milestone() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    register_agent(&client, "bob");
    let res = client
        .post("/projects")
        .header(ContentType::JSON)
        .header(auth(&alice_key))
        .body(r#"{"name": "P1"}"#)
        .dispatch();
    let project: serde_json::Value = res.into_json().unwrap();
    let project_id = project["id"].as_str().unwrap();

    let res = client
        .post(format!("/projects/{project_id}/members"))
        .header(ContentType::JSON)
        .body(r#"{"agent_name": "bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post(format!("/projects/{project_id}/milestones"))
        .header(ContentType::JSON)
        .body(r#"{"name": "v1.0", "due_by": "2026-12-01T00:00:00Z"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let milestone: serde_json::Value = res.into_json().unwrap();
    assert_eq!(milestone["status"], "open");

    let res = client.get(format!("/projects/{project_id}/milestones")).dispatch();
    let milestones: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(milestones.len(), 1);
}
