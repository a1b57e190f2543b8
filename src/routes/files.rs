use crate::auth::Caller;
use crate::config::Config;
use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::files_store::{self, sha256_hex};
use crate::models::*;
use crate::time;
use rocket::form::Form;
use rocket::fs::NamedFile;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use rusqlite::{params, OptionalExtension};

use super::messaging::canonical_key;

const MAX_UPLOAD_HARD_CAP: usize = 50 * 1024 * 1024;

#[post("/files/upload", data = "<form>")]
pub async fn upload(
    db: &State<Db>,
    config: &State<Config>,
    caller: Caller,
    mut form: Form<UploadForm<'_>>,
) -> ApiResult<Json<FileMeta>> {
    if let Some(conv_id) = &form.conversation_id {
        let conn = db.conn.lock().unwrap();
        let is_member: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND agent_name = ?2",
                params![conv_id, &caller.0],
                |r| r.get(0),
            )
            .optional()?;
        if is_member.is_none() {
            return Err(ApiError::Forbidden("not a member of this conversation".into()));
        }
    }

    let original_name = form
        .file
        .raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let mime_type = form
        .file
        .content_type()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());

    let limit = config.max_file_size.min(MAX_UPLOAD_HARD_CAP);
    let size = form.file.len() as usize;
    if size == 0 {
        return Err(ApiError::Validation("empty upload rejected".into()));
    }
    if size > limit {
        return Err(ApiError::TooLarge(format!("upload exceeds {limit} byte limit")));
    }

    let tmp_path = std::env::temp_dir().join(uuid::Uuid::new_v4().to_string());
    form.file
        .persist_to(&tmp_path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to buffer upload: {e}")))?;
    let bytes = std::fs::read(&tmp_path).map_err(|e| ApiError::Internal(e.to_string()))?;
    let _ = std::fs::remove_file(&tmp_path);

    let sha256 = sha256_hex(&bytes);
    let id = uuid::Uuid::new_v4().to_string();
    let ext = files_store::extension_of(&original_name);
    let stored_filename = files_store::write_blob(&config.files_dir, &id, &ext, &bytes)?;

    let now = time::now();
    let conn = db.conn.lock().unwrap();
    let insert = conn.execute(
        "INSERT INTO files (id, stored_filename, original_name, mime_type, size, sha256, uploaded_by, uploaded_at, conversation_id, message_id, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10)",
        params![&id, &stored_filename, &original_name, &mime_type, size as i64, &sha256, &caller.0, now, &form.conversation_id, &form.description],
    );
    if let Err(e) = insert {
        files_store::remove_blob(&config.files_dir, &stored_filename);
        return Err(e.into());
    }

    tracing::debug!(file_id = %id, size, "file uploaded");
    Ok(Json(FileMeta {
        id,
        stored_filename,
        original_name,
        mime_type,
        size: size as i64,
        sha256,
        uploaded_by: caller.0,
        uploaded_at: now,
        conversation_id: form.conversation_id.clone(),
        message_id: None,
        description: form.description.clone(),
    }))
}

#[get("/files")]
pub fn list(db: &State<Db>) -> ApiResult<Json<Vec<FileMeta>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT id, stored_filename, original_name, mime_type, size, sha256, uploaded_by, uploaded_at, conversation_id, message_id, description
         FROM files ORDER BY uploaded_at DESC",
    )?;
    let rows = stmt.query_map([], file_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[get("/files/stats")]
pub fn stats(db: &State<Db>) -> ApiResult<Json<FileStats>> {
    let conn = db.conn.lock().unwrap();
    let (count, total_bytes) = conn.query_row("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files", [], |r| {
        Ok((r.get(0)?, r.get(1)?))
    })?;
    Ok(Json(FileStats { count, total_bytes }))
}

#[get("/files/<id>")]
pub fn info(db: &State<Db>, id: &str) -> ApiResult<Json<FileMeta>> {
    let conn = db.conn.lock().unwrap();
    let row = conn
        .query_row(
            "SELECT id, stored_filename, original_name, mime_type, size, sha256, uploaded_by, uploaded_at, conversation_id, message_id, description
             FROM files WHERE id = ?1",
            params![id],
            file_from_row,
        )
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such file '{id}'")))?;
    Ok(Json(row))
}

#[get("/files/<id>/<_name>")]
pub async fn download(db: &State<Db>, config: &State<Config>, id: &str, _name: &str) -> ApiResult<NamedFile> {
    let stored_filename: String = {
        let conn = db.conn.lock().unwrap();
        conn.query_row("SELECT stored_filename FROM files WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?
            .ok_or_else(|| ApiError::NotFound(format!("no such file '{id}'")))?
    };
    let path = std::path::Path::new(&config.files_dir).join(&stored_filename);
    NamedFile::open(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("no such file '{id}'")))
}

#[delete("/files/<id>")]
pub fn remove(db: &State<Db>, config: &State<Config>, caller: Caller, id: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn.lock().unwrap();
    let (uploaded_by, stored_filename): (String, String) = conn
        .query_row("SELECT uploaded_by, stored_filename FROM files WHERE id = ?1", params![id], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such file '{id}'")))?;
    if uploaded_by != caller.0 {
        return Err(ApiError::Forbidden("only the uploader may delete this file".into()));
    }
    files_store::remove_blob(&config.files_dir, &stored_filename);
    conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
    Ok(Json(serde_json::json!({"id": id, "deleted": true})))
}

#[post("/send-file", data = "<form>")]
pub async fn send_file(
    db: &State<Db>,
    config: &State<Config>,
    caller: Caller,
    mut form: Form<SendFileForm<'_>>,
) -> ApiResult<Json<Message>> {
    let original_name = form
        .file
        .raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let mime_type = form.file.content_type().map(|c| c.to_string()).unwrap_or_else(|| "application/octet-stream".into());
    let limit = config.max_file_size.min(MAX_UPLOAD_HARD_CAP);
    let size = form.file.len() as usize;
    if size == 0 {
        return Err(ApiError::Validation("empty upload rejected".into()));
    }
    if size > limit {
        return Err(ApiError::TooLarge(format!("upload exceeds {limit} byte limit")));
    }

    let tmp_path = std::env::temp_dir().join(uuid::Uuid::new_v4().to_string());
    form.file.persist_to(&tmp_path).await.map_err(|e| ApiError::Internal(format!("failed to buffer upload: {e}")))?;
    let bytes = std::fs::read(&tmp_path).map_err(|e| ApiError::Internal(e.to_string()))?;
    let _ = std::fs::remove_file(&tmp_path);

    let sha256 = sha256_hex(&bytes);
    let file_id = uuid::Uuid::new_v4().to_string();
    let ext = files_store::extension_of(&original_name);
    let stored_filename = files_store::write_blob(&config.files_dir, &file_id, &ext, &bytes)?;

    let now = time::now();
    let mut conn = db.conn.lock().unwrap();
    let result = (|| -> ApiResult<Message> {
        let tx = conn.transaction()?;
        let key = canonical_key(&caller.0, &form.to);
        let conversation_id: Option<String> = tx
            .query_row("SELECT id FROM conversations WHERE canonical_key = ?1", params![&key], |r| r.get(0))
            .optional()?;
        let conversation_id = match conversation_id {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let name = format!("{}, {}", caller.0, form.to);
                tx.execute(
                    "INSERT INTO conversations (id, name, type, created_by, created_at, canonical_key) VALUES (?1, ?2, 'dm', ?3, ?4, ?5)",
                    params![&id, &name, &caller.0, now, &key],
                )?;
                for member in [&caller.0, &form.to] {
                    tx.execute(
                        "INSERT INTO conversation_members (conversation_id, agent_name, joined_at) VALUES (?1, ?2, ?3)",
                        params![&id, member, now],
                    )?;
                }
                id
            }
        };

        let content = format!("📎 {original_name} ({size} bytes): /files/{file_id}/{original_name}");
        let content = if form.description.is_empty() { content } else { format!("{} — {}", form.description, content) };
        let message_id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO messages (id, conversation_id, from_agent, to_agent, content, timestamp, read) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![&message_id, &conversation_id, &caller.0, &form.to, &content, now],
        )?;
        tx.execute(
            "INSERT INTO files (id, stored_filename, original_name, mime_type, size, sha256, uploaded_by, uploaded_at, conversation_id, message_id, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![&file_id, &stored_filename, &original_name, &mime_type, size as i64, &sha256, &caller.0, now, &conversation_id, &message_id, &form.description],
        )?;
        tx.commit()?;
        Ok(Message {
            id: message_id,
            conversation_id,
            from_agent: caller.0.clone(),
            to_agent: Some(form.to.clone()),
            content,
            timestamp: now,
            read: false,
        })
    })();

    if result.is_err() {
        files_store::remove_blob(&config.files_dir, &stored_filename);
    }
    Ok(Json(result?))
}

fn file_from_row(r: &rusqlite::Row) -> rusqlite::Result<FileMeta> {
    Ok(FileMeta {
        id: r.get(0)?,
        stored_filename: r.get(1)?,
        original_name: r.get(2)?,
        mime_type: r.get(3)?,
        size: r.get(4)?,
        sha256: r.get(5)?,
        uploaded_by: r.get(6)?,
        uploaded_at: r.get(7)?,
        conversation_id: r.get(8)?,
        message_id: r.get(9)?,
        description: r.get(10)?,
    })
}
