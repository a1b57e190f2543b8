use crate::db::Db;
use crate::error::ApiResult;
use rocket::serde::json::Json;
use rocket::{catch, get, State};

#[get("/")]
pub fn index() -> &'static str {
    "agent-bridge"
}

#[get("/status")]
pub fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[get("/stats")]
pub fn stats(db: &State<Db>) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn.lock().unwrap();
    let agents: i64 = conn.query_row("SELECT COUNT(*) FROM agents", [], |r| r.get(0))?;
    let conversations: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))?;
    let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;
    let files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
    let tasks: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?;
    let projects: i64 = conn.query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))?;
    let repos: i64 = conn.query_row("SELECT COUNT(*) FROM repos", [], |r| r.get(0))?;
    let commits: i64 = conn.query_row("SELECT COUNT(*) FROM commits", [], |r| r.get(0))?;
    Ok(Json(serde_json::json!({
        "agents": agents,
        "conversations": conversations,
        "messages": messages,
        "files": files,
        "tasks": tasks,
        "projects": projects,
        "repos": repos,
        "commits": commits,
    })))
}

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "not found"}))
}

#[catch(413)]
pub fn payload_too_large() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "payload too large"}))
}
