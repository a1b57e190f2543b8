use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::time;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::{params, OptionalExtension};

use crate::db::Db;

pub(crate) fn canonical_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}\u{0}{b}")
    } else {
        format!("{b}\u{0}{a}")
    }
}

/// Finds or creates the DM conversation for an unordered pair of agent names.
fn resolve_dm(tx: &rusqlite::Transaction, a: &str, b: &str) -> ApiResult<String> {
    let key = canonical_key(a, b);
    if let Some(id) = tx
        .query_row("SELECT id FROM conversations WHERE canonical_key = ?1", params![&key], |r| r.get(0))
        .optional()?
    {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    let name = format!("{a}, {b}");
    tx.execute(
        "INSERT INTO conversations (id, name, type, created_by, created_at, canonical_key) VALUES (?1, ?2, 'dm', ?3, ?4, ?5)",
        params![&id, &name, a, now, &key],
    )?;
    for member in [a, b] {
        tx.execute(
            "INSERT INTO conversation_members (conversation_id, agent_name, joined_at) VALUES (?1, ?2, ?3)",
            params![&id, member, now],
        )?;
    }
    Ok(id)
}

fn is_member(conn: &rusqlite::Connection, conversation_id: &str, agent: &str) -> ApiResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND agent_name = ?2",
            params![conversation_id, agent],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

#[post("/send", format = "json", data = "<body>")]
pub fn send(db: &State<Db>, caller: Caller, body: Json<SendRequest>) -> ApiResult<Json<Message>> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    let conversation_id = resolve_dm(&tx, &caller.0, &body.to)?;
    let message = insert_message(&tx, &conversation_id, &caller.0, Some(body.to.clone()), &body.content)?;
    tx.commit()?;
    Ok(Json(message))
}

#[post("/conversations/<id>/send", format = "json", data = "<body>")]
pub fn send_to_conversation(
    db: &State<Db>,
    caller: Caller,
    id: &str,
    body: Json<SendToConversationRequest>,
) -> ApiResult<Json<Message>> {
    let mut conn = db.conn.lock().unwrap();
    if !is_member(&conn, id, &caller.0)? {
        return Err(ApiError::Forbidden("not a member of this conversation".into()));
    }
    let tx = conn.transaction()?;
    let message = insert_message(&tx, id, &caller.0, None, &body.content)?;
    tx.commit()?;
    Ok(Json(message))
}

fn insert_message(
    tx: &rusqlite::Transaction,
    conversation_id: &str,
    from_agent: &str,
    to_agent: Option<String>,
    content: &str,
) -> ApiResult<Message> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    tx.execute(
        "INSERT INTO messages (id, conversation_id, from_agent, to_agent, content, timestamp, read)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![&id, conversation_id, from_agent, &to_agent, content, now],
    )?;
    Ok(Message {
        id,
        conversation_id: conversation_id.to_string(),
        from_agent: from_agent.to_string(),
        to_agent,
        content: content.to_string(),
        timestamp: now,
        read: false,
    })
}

#[get("/inbox?<since>&<limit>")]
pub fn inbox(db: &State<Db>, caller: Caller, since: Option<f64>, limit: Option<i64>) -> ApiResult<Json<Vec<Message>>> {
    let conn = db.conn.lock().unwrap();
    let limit = limit.unwrap_or(50);
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.from_agent, m.to_agent, m.content, m.timestamp, m.read
         FROM messages m
         JOIN conversation_members cm ON cm.conversation_id = m.conversation_id AND cm.agent_name = ?1
         WHERE m.read = 0 AND m.from_agent != ?1 AND (?2 IS NULL OR m.timestamp > ?2)
         ORDER BY m.timestamp ASC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![&caller.0, since, limit], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[post("/inbox/<id>/read")]
pub fn mark_read(db: &State<Db>, _caller: Caller, id: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn.lock().unwrap();
    let updated = conn.execute("UPDATE messages SET read = 1 WHERE id = ?1", params![id])?;
    if updated == 0 {
        return Err(ApiError::NotFound(format!("no such message '{id}'")));
    }
    Ok(Json(serde_json::json!({"id": id, "read": true})))
}

#[get("/history?<with_agent>&<limit>")]
pub fn history(db: &State<Db>, caller: Caller, with_agent: Option<&str>, limit: Option<i64>) -> ApiResult<Json<Vec<Message>>> {
    let conn = db.conn.lock().unwrap();
    let limit = limit.unwrap_or(50);
    let rows = if let Some(other) = with_agent {
        let mut stmt = conn.prepare(
            "SELECT m.id, m.conversation_id, m.from_agent, m.to_agent, m.content, m.timestamp, m.read
             FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE c.canonical_key = ?1
             ORDER BY m.timestamp DESC LIMIT ?2",
        )?;
        stmt.query_map(params![canonical_key(&caller.0, other), limit], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let mut stmt = conn.prepare(
            "SELECT m.id, m.conversation_id, m.from_agent, m.to_agent, m.content, m.timestamp, m.read
             FROM messages m
             WHERE m.from_agent = ?1 OR m.to_agent = ?1
             ORDER BY m.timestamp DESC LIMIT ?2",
        )?;
        stmt.query_map(params![&caller.0, limit], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(Json(rows))
}

fn message_from_row(r: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: r.get(0)?,
        conversation_id: r.get(1)?,
        from_agent: r.get(2)?,
        to_agent: r.get(3)?,
        content: r.get(4)?,
        timestamp: r.get(5)?,
        read: r.get::<_, i64>(6)? != 0,
    })
}

#[post("/conversations", format = "json", data = "<body>")]
pub fn create_conversation(db: &State<Db>, caller: Caller, body: Json<CreateConversationRequest>) -> ApiResult<Json<Conversation>> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO conversations (id, name, type, created_by, created_at) VALUES (?1, ?2, 'group', ?3, ?4)",
        params![&id, &body.name, &caller.0, now],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, agent_name, joined_at) VALUES (?1, ?2, ?3)",
        params![&id, &caller.0, now],
    )?;
    for member in &body.members {
        tx.execute(
            "INSERT OR IGNORE INTO conversation_members (conversation_id, agent_name, joined_at) VALUES (?1, ?2, ?3)",
            params![&id, member, now],
        )?;
    }
    tx.commit()?;
    Ok(Json(Conversation {
        id,
        name: body.name.clone(),
        kind: "group".into(),
        created_by: caller.0,
        created_at: now,
        members: None,
    }))
}

#[get("/conversations")]
pub fn list_conversations(db: &State<Db>, caller: Caller) -> ApiResult<Json<Vec<Conversation>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.type, c.created_by, c.created_at
         FROM conversations c
         JOIN conversation_members cm ON cm.conversation_id = c.id
         WHERE cm.agent_name = ?1 ORDER BY c.created_at DESC",
    )?;
    let rows = stmt
        .query_map(params![&caller.0], |r| {
            Ok(Conversation {
                id: r.get(0)?,
                name: r.get(1)?,
                kind: r.get(2)?,
                created_by: r.get(3)?,
                created_at: r.get(4)?,
                members: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[get("/conversations/<id>")]
pub fn get_conversation(db: &State<Db>, caller: Caller, id: &str) -> ApiResult<Json<Conversation>> {
    let conn = db.conn.lock().unwrap();
    if !is_member(&conn, id, &caller.0)? {
        return Err(ApiError::Forbidden("not a member of this conversation".into()));
    }
    let mut conv = conn
        .query_row(
            "SELECT id, name, type, created_by, created_at FROM conversations WHERE id = ?1",
            params![id],
            |r| {
                Ok(Conversation {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    kind: r.get(2)?,
                    created_by: r.get(3)?,
                    created_at: r.get(4)?,
                    members: None,
                })
            },
        )
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such conversation '{id}'")))?;
    let mut stmt = conn.prepare("SELECT agent_name FROM conversation_members WHERE conversation_id = ?1")?;
    let members = stmt
        .query_map(params![id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    conv.members = Some(members);
    Ok(Json(conv))
}

#[get("/conversations/<id>/messages?<limit>")]
pub fn conversation_messages(db: &State<Db>, caller: Caller, id: &str, limit: Option<i64>) -> ApiResult<Json<Vec<Message>>> {
    let conn = db.conn.lock().unwrap();
    if !is_member(&conn, id, &caller.0)? {
        return Err(ApiError::Forbidden("not a member of this conversation".into()));
    }
    let limit = limit.unwrap_or(50);
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, from_agent, to_agent, content, timestamp, read
         FROM messages WHERE conversation_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![id, limit], message_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[post("/conversations/<id>/invite", format = "json", data = "<body>")]
pub fn invite(db: &State<Db>, caller: Caller, id: &str, body: Json<InviteRequest>) -> ApiResult<Json<serde_json::Value>> {
    let now = time::now();
    let conn = db.conn.lock().unwrap();
    let kind: String = conn
        .query_row("SELECT type FROM conversations WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such conversation '{id}'")))?;
    if kind == "dm" {
        return Err(ApiError::Validation("cannot invite into a DM conversation".into()));
    }
    if !is_member(&conn, id, &caller.0)? {
        return Err(ApiError::Forbidden("not a member of this conversation".into()));
    }
    conn.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, agent_name, joined_at) VALUES (?1, ?2, ?3)",
        params![id, &body.agent_name, now],
    )?;
    Ok(Json(serde_json::json!({"conversation_id": id, "agent_name": body.agent_name})))
}

#[post("/conversations/<id>/leave")]
pub fn leave(db: &State<Db>, caller: Caller, id: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn.lock().unwrap();
    conn.execute(
        "DELETE FROM conversation_members WHERE conversation_id = ?1 AND agent_name = ?2",
        params![id, &caller.0],
    )?;
    Ok(Json(serde_json::json!({"conversation_id": id, "left": true})))
}
