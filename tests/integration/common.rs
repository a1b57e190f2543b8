use agent_bridge::config::Config;
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp DB and files dir on drop.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
    files_dir: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        // Drop client first to release the SQLite connection (WAL mode holds the file).
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        let _ = std::fs::remove_dir_all(&self.files_dir);
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    test_client_with_admin_secret(None)
}

pub fn test_client_with_admin_secret(admin_secret: Option<&str>) -> TestClient {
    let tag = uuid::Uuid::new_v4().to_string().split('-').next().unwrap().to_string();
    let db_path = format!("/tmp/agent_bridge_test_{tag}.db");
    let files_dir = format!("/tmp/agent_bridge_test_files_{tag}");

    let config = Config {
        db_path: db_path.clone(),
        files_dir: files_dir.clone(),
        admin_secret: admin_secret.map(|s| s.to_string()),
        max_file_size: 50 * 1024 * 1024,
    };
    let rocket = agent_bridge::rocket_with_config(config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path, files_dir }
}

/// Registers an agent as admin (using the default admin secret) and returns its API key.
pub fn register_agent(client: &Client, name: &str) -> String {
    let res = client
        .post("/register")
        .header(ContentType::JSON)
        .body(format!(r#"{{"name": "{name}", "admin_secret": "test-admin-secret"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok, "register failed: {:?}", res.into_string());
    let body: serde_json::Value = res.into_json().unwrap();
    body["api_key"].as_str().unwrap().to_string()
}

pub fn auth(key: &str) -> Header<'static> {
    Header::new("x-api-key", key.to_string())
}

pub fn test_client_with_admin() -> TestClient {
    test_client_with_admin_secret(Some("test-admin-secret"))
}

/// Builds a `multipart/form-data` body for upload tests. `fields` are plain
/// text fields; `file_field`/`file_name`/`file_bytes` supply the single file part.
pub fn multipart_body(
    fields: &[(&str, &str)],
    file_field: &str,
    file_name: &str,
    file_bytes: &[u8],
) -> (ContentType, Vec<u8>) {
    let boundary = "agent-bridge-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{file_field}\"; filename=\"{file_name}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let content_type = ContentType::new("multipart", "form-data").with_params(("boundary", boundary));
    (content_type, body)
}
