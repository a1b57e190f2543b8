use crate::common::{auth, multipart_body, register_agent, test_client_with_admin};
use rocket::http::Status;

#[test]
fn test_upload_download_roundtrip() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let bytes = b"0123456789";
    let (ct, body) = multipart_body(&[], "file", "x.bin", bytes);
    let res = client.post("/files/upload").header(ct).header(auth(&alice_key)).body(body).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let meta: serde_json::Value = res.into_json().unwrap();
    let id = meta["id"].as_str().unwrap();
    assert_eq!(meta["size"], 10);

    let res = client.get(format!("/files/{id}/x")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let downloaded = res.into_bytes().unwrap();
    assert_eq!(downloaded, bytes);
}

#[test]
fn test_delete_then_download_404() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");

    let (ct, body) = multipart_body(&[], "file", "gone.bin", b"1234567890");
    let res = client.post("/files/upload").header(ct).header(auth(&alice_key)).body(body).dispatch();
    let meta: serde_json::Value = res.into_json().unwrap();
    let id = meta["id"].as_str().unwrap();

    let res = client.delete(format!("/files/{id}")).header(auth(&alice_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/files/{id}/gone.bin")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_delete_requires_uploader() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let bob_key = register_agent(&client, "bob");

    let (ct, body) = multipart_body(&[], "file", "mine.bin", b"hello");
    let res = client.post("/files/upload").header(ct).header(auth(&alice_key)).body(body).dispatch();
    let meta: serde_json::Value = res.into_json().unwrap();
    let id = meta["id"].as_str().unwrap();

    let res = client.delete(format!("/files/{id}")).header(auth(&bob_key)).dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_empty_upload_rejected() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let (ct, body) = multipart_body(&[], "file", "empty.bin", b"");
    let res = client.post("/files/upload").header(ct).header(auth(&alice_key)).body(body).dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_send_file_creates_message_and_conversation() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    register_agent(&client, "bob");

    let (ct, body) = multipart_body(&[("to", "bob"), ("description", "see attached")], "file", "report.txt", b"report contents");
    let res = client.post("/send-file").header(ct).header(auth(&alice_key)).body(body).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let msg: serde_json::Value = res.into_json().unwrap();
    assert_eq!(msg["from_agent"], "alice");
    assert_eq!(msg["to_agent"], "bob");
    assert!(msg["content"].as_str().unwrap().contains("report.txt"));
}

#[test]
fn test_files_stats_aggregate() {
    let client = test_client_with_admin();
    let alice_key = register_agent(&client, "alice");
    let (ct, body) = multipart_body(&[], "file", "a.bin", b"12345");
    client.post("/files/upload").header(ct).header(auth(&alice_key)).body(body).dispatch();

    let res = client.get("/files/stats").dispatch();
    let stats: serde_json::Value = res.into_json().unwrap();
    assert_eq!(stats["count"], 1);
    assert_eq!(stats["total_bytes"], 5);
}
