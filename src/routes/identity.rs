use crate::auth::{admin_secret_matches, AdminAuthorized, Caller};
use crate::config::Config;
use crate::db::{generate_api_key, Db};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::time;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::{params, OptionalExtension};

/// Admin-direct registration. Accepts the admin secret either via the
/// `x-admin-secret` header or inline in the body.
#[post("/register", format = "json", data = "<body>")]
pub fn register(
    db: &State<Db>,
    config: &State<Config>,
    req_admin: Option<AdminAuthorized>,
    body: Json<RegisterRequest>,
) -> ApiResult<Json<Agent>> {
    if req_admin.is_none() && !admin_secret_matches(config, body.admin_secret.as_deref()) {
        return Err(ApiError::Forbidden("invalid admin secret".into()));
    }
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".into()));
    }
    let api_key = generate_api_key();
    let now = time::now();
    let conn = db.conn.lock().unwrap();
    conn.execute(
        "INSERT INTO agents (name, api_key, created_at) VALUES (?1, ?2, ?3)",
        params![name, &api_key, now],
    )?;
    tracing::info!(agent = name, "agent registered");
    Ok(Json(Agent {
        name: name.to_string(),
        api_key: Some(api_key),
        created_at: now,
        message_count: None,
        task_count: None,
        commit_count: None,
        last_active: None,
    }))
}

#[post("/join", format = "json", data = "<body>")]
pub fn join(db: &State<Db>, body: Json<JoinRequest>) -> ApiResult<Json<PendingRegistration>> {
    let agent_name = body.agent_name.trim();
    if agent_name.is_empty() {
        return Err(ApiError::Validation("agent_name must not be empty".into()));
    }
    let conn = db.conn.lock().unwrap();
    let exists_agent: Option<String> = conn
        .query_row("SELECT name FROM agents WHERE name = ?1", params![agent_name], |r| r.get(0))
        .optional()?;
    if exists_agent.is_some() {
        return Err(ApiError::Conflict(format!("agent '{agent_name}' already registered")));
    }
    let exists_pending: Option<String> = conn
        .query_row(
            "SELECT id FROM pending_registrations WHERE agent_name = ?1 AND status = 'pending'",
            params![agent_name],
            |r| r.get(0),
        )
        .optional()?;
    if exists_pending.is_some() {
        return Err(ApiError::Conflict(format!("a pending registration for '{agent_name}' already exists")));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    conn.execute(
        "INSERT INTO pending_registrations (id, agent_name, description, contact, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        params![&id, agent_name, &body.description, &body.contact, now],
    )?;
    tracing::info!(agent = agent_name, reg_id = %id, "join request filed");
    Ok(Json(PendingRegistration {
        id,
        agent_name: agent_name.to_string(),
        description: body.description.clone(),
        contact: body.contact.clone(),
        status: "pending".into(),
        created_at: now,
        reviewed_at: None,
        reviewed_by: None,
        api_key: None,
    }))
}

#[get("/join")]
pub fn list_pending(db: &State<Db>) -> ApiResult<Json<Vec<PendingRegistration>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT id, agent_name, description, contact, status, created_at, reviewed_at, reviewed_by
         FROM pending_registrations ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(PendingRegistration {
                id: r.get(0)?,
                agent_name: r.get(1)?,
                description: r.get(2)?,
                contact: r.get(3)?,
                status: r.get(4)?,
                created_at: r.get(5)?,
                reviewed_at: r.get(6)?,
                reviewed_by: r.get(7)?,
                api_key: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[get("/join/<id>")]
pub fn join_status(db: &State<Db>, id: &str) -> ApiResult<Json<PendingRegistration>> {
    let conn = db.conn.lock().unwrap();
    let mut reg = conn
        .query_row(
            "SELECT id, agent_name, description, contact, status, created_at, reviewed_at, reviewed_by
             FROM pending_registrations WHERE id = ?1",
            params![id],
            |r| {
                Ok(PendingRegistration {
                    id: r.get(0)?,
                    agent_name: r.get(1)?,
                    description: r.get(2)?,
                    contact: r.get(3)?,
                    status: r.get(4)?,
                    created_at: r.get(5)?,
                    reviewed_at: r.get(6)?,
                    reviewed_by: r.get(7)?,
                    api_key: None,
                })
            },
        )
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such registration '{id}'")))?;
    if reg.status == "approved" {
        reg.api_key = conn
            .query_row("SELECT api_key FROM agents WHERE name = ?1", params![&reg.agent_name], |r| r.get(0))
            .optional()?;
    }
    Ok(Json(reg))
}

#[post("/join/<id>/approve", format = "json", data = "<body>")]
pub fn approve(db: &State<Db>, caller: Caller, id: &str, body: Json<ApprovalRequest>) -> ApiResult<Json<PendingRegistration>> {
    decide(db, id, "approved", body.approver.clone().unwrap_or(caller.0))
}

#[post("/join/<id>/reject", format = "json", data = "<body>")]
pub fn reject(db: &State<Db>, caller: Caller, id: &str, body: Json<ApprovalRequest>) -> ApiResult<Json<PendingRegistration>> {
    decide(db, id, "rejected", body.approver.clone().unwrap_or(caller.0))
}

fn decide(db: &State<Db>, id: &str, decision: &str, approver: String) -> ApiResult<Json<PendingRegistration>> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    let (agent_name, status): (String, String) = tx
        .query_row(
            "SELECT agent_name, status FROM pending_registrations WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such registration '{id}'")))?;

    let now = time::now();
    if status == "approved" || status == "rejected" {
        // Idempotent: re-decide is a no-op returning current state.
        tx.commit()?;
        drop(conn);
        return join_status(db, id);
    }

    tx.execute(
        "UPDATE pending_registrations SET status = ?1, reviewed_at = ?2, reviewed_by = ?3 WHERE id = ?4",
        params![decision, now, &approver, id],
    )?;

    if decision == "approved" {
        let api_key = generate_api_key();
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO agents (name, api_key, created_at) VALUES (?1, ?2, ?3)",
            params![&agent_name, &api_key, now],
        )?;
        if inserted == 0 {
            tx.rollback()?;
            return Err(ApiError::Conflict(format!("agent '{agent_name}' already registered")));
        }
    }
    tx.commit()?;
    drop(conn);
    tracing::info!(reg_id = id, %decision, approver, "registration decided");
    join_status(db, id)
}

#[get("/agents")]
pub fn list_agents(db: &State<Db>) -> ApiResult<Json<Vec<Agent>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT a.name, a.created_at,
            (SELECT COUNT(*) FROM messages m WHERE m.from_agent = a.name) AS message_count,
            (SELECT COUNT(*) FROM tasks t WHERE t.created_by = a.name OR t.assigned_to = a.name OR t.claimed_by = a.name) AS task_count,
            (SELECT COUNT(*) FROM commits c WHERE c.author = a.name) AS commit_count,
            (SELECT MAX(x) FROM (
                SELECT MAX(timestamp) AS x FROM messages WHERE from_agent = a.name
                UNION ALL SELECT MAX(created_at) FROM tasks WHERE created_by = a.name
                UNION ALL SELECT MAX(created_at) FROM commits WHERE author = a.name
            )) AS last_active
         FROM agents a ORDER BY a.name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Agent {
                name: r.get(0)?,
                api_key: None,
                created_at: r.get(1)?,
                message_count: r.get(2)?,
                task_count: r.get(3)?,
                commit_count: r.get(4)?,
                last_active: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[get("/admin/keys")]
pub fn admin_list_keys(db: &State<Db>, _admin: AdminAuthorized) -> ApiResult<Json<Vec<Agent>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare("SELECT name, api_key, created_at FROM agents ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Agent {
                name: r.get(0)?,
                api_key: r.get(1)?,
                created_at: r.get(2)?,
                message_count: None,
                task_count: None,
                commit_count: None,
                last_active: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}
