use crate::common::{auth, register_agent, test_client_with_admin};
use rocket::http::{ContentType, Status};

fn create_task(client: &rocket::local::blocking::Client, key: &str, body: &str) -> serde_json::Value {
    let res = client.post("/tasks").header(ContentType::JSON).header(auth(key)).body(body).dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

#[test]
fn test_dependencies_via_create_request() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let t1 = create_task(&client, &alice_key, r#"{"title": "T1"}"#);
    let t1_id = t1["id"].as_str().unwrap();
    let t2 = create_task(&client, &alice_key, &format!(r#"{{"title": "T2", "depends_on": ["{t1_id}"]}}"#));
    let t2_id = t2["id"].as_str().unwrap();

    let res = client.get(format!("/tasks/{t2_id}/dependencies")).dispatch();
    let deps: serde_json::Value = res.into_json().unwrap();
    assert_eq!(deps["unmet_blockers"], 1);
    assert_eq!(deps["depends_on"].as_array().unwrap().len(), 1);

    client.post(format!("/tasks/{t1_id}/complete")).header(auth(&alice_key)).dispatch();

    let res = client.get(format!("/tasks/{t2_id}/dependencies")).dispatch();
    let deps: serde_json::Value = res.into_json().unwrap();
    assert_eq!(deps["unmet_blockers"], 0);
}

#[test]
fn test_add_dependency_rejects_self_loop() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let t1 = create_task(&client, &alice_key, r#"{"title": "T1"}"#);
    let t1_id = t1["id"].as_str().unwrap();

    let res = client
        .post(format!("/tasks/{t1_id}/dependencies"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"depends_on": "{t1_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_add_dependency_twice_conflicts() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let t1 = create_task(&client, &alice_key, r#"{"title": "T1"}"#);
    let t2 = create_task(&client, &alice_key, r#"{"title": "T2"}"#);
    let t1_id = t1["id"].as_str().unwrap();
    let t2_id = t2["id"].as_str().unwrap();

    let body = format!(r#"{{"depends_on": "{t1_id}"}}"#);
    let res = client.post(format!("/tasks/{t2_id}/dependencies")).header(ContentType::JSON).body(body.clone()).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.post(format!("/tasks/{t2_id}/dependencies")).header(ContentType::JSON).body(body).dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_dependency_cycle_is_not_detected() {
    // §9 point 3: A -> B -> A is allowed; no cycle detection.
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let a = create_task(&client, &alice_key, r#"{"title": "A"}"#);
    let b = create_task(&client, &alice_key, r#"{"title": "B"}"#);
    let a_id = a["id"].as_str().unwrap();
    let b_id = b["id"].as_str().unwrap();

    let res = client
        .post(format!("/tasks/{a_id}/dependencies"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"depends_on": "{b_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post(format!("/tasks/{b_id}/dependencies"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"depends_on": "{a_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_remove_dependency() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let t1 = create_task(&client, &alice_key, r#"{"title": "T1"}"#);
    let t2 = create_task(&client, &alice_key, r#"{"title": "T2"}"#);
    let t1_id = t1["id"].as_str().unwrap();
    let t2_id = t2["id"].as_str().unwrap();

    client
        .post(format!("/tasks/{t2_id}/dependencies"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"depends_on": "{t1_id}"}}"#))
        .dispatch();

    let res = client.delete(format!("/tasks/{t2_id}/dependencies/{t1_id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.delete(format!("/tasks/{t2_id}/dependencies/{t1_id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
