use crate::auth::Caller;
use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::time;
use chrono::DateTime;
use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, State};
use rusqlite::{params, OptionalExtension};

const PRIORITIES: [&str; 4] = ["low", "normal", "high", "urgent"];

pub(crate) fn priority_rank(p: &str) -> i64 {
    match p {
        "urgent" => 0,
        "high" => 1,
        "normal" => 2,
        "low" => 3,
        _ => 4,
    }
}

fn parse_due_by(raw: &Option<String>) -> ApiResult<Option<f64>> {
    match raw {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.timestamp() as f64))
            .map_err(|_| ApiError::Validation(format!("invalid due_by date '{s}'"))),
    }
}

pub(crate) fn task_from_row(r: &rusqlite::Row) -> rusqlite::Result<Task> {
    let tags_json: String = r.get(8)?;
    Ok(Task {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        status: r.get(3)?,
        priority: r.get(4)?,
        created_by: r.get(5)?,
        assigned_to: r.get(6)?,
        claimed_by: r.get(7)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
        completed_at: r.get(11)?,
        due_by: r.get(12)?,
        parent_id: r.get(13)?,
        project_id: r.get(14)?,
        milestone_id: r.get(15)?,
        effort_estimate: r.get(16)?,
    })
}

const TASK_COLUMNS: &str = "id, title, description, status, priority, created_by, assigned_to, claimed_by, tags, created_at, updated_at, completed_at, due_by, parent_id, project_id, milestone_id, effort_estimate";

fn fetch_task(conn: &rusqlite::Connection, id: &str) -> ApiResult<Task> {
    conn.query_row(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"), params![id], task_from_row)
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such task '{id}'")))
}

fn record_history(tx: &rusqlite::Transaction, task_id: &str, agent: &str, action: &str, details: &str) -> ApiResult<()> {
    tx.execute(
        "INSERT INTO task_history (id, task_id, agent_name, action, details, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![uuid::Uuid::new_v4().to_string(), task_id, agent, action, details, time::now()],
    )?;
    Ok(())
}

#[post("/tasks", format = "json", data = "<body>")]
pub fn create(db: &State<Db>, caller: Caller, body: Json<CreateTaskRequest>) -> ApiResult<Json<Task>> {
    if !PRIORITIES.contains(&body.priority.as_str()) {
        return Err(ApiError::Validation(format!("invalid priority '{}'", body.priority)));
    }
    let due_by = parse_due_by(&body.due_by)?;

    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;

    if let Some(parent_id) = &body.parent_id {
        let exists: Option<i64> = tx.query_row("SELECT 1 FROM tasks WHERE id = ?1", params![parent_id], |r| r.get(0)).optional()?;
        if exists.is_none() {
            return Err(ApiError::Validation(format!("parent task '{parent_id}' does not exist")));
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    let tags_json = serde_json::to_string(&body.tags).unwrap();
    tx.execute(
        "INSERT INTO tasks (id, title, description, status, priority, created_by, assigned_to, claimed_by, tags, created_at, updated_at, due_by, parent_id, project_id, milestone_id, effort_estimate)
         VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?6, NULL, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![&id, &body.title, &body.description, &body.priority, &caller.0, &body.assigned_to, &tags_json, now, now, due_by, &body.parent_id, &body.project_id, &body.milestone_id, body.effort_estimate],
    )?;

    for dep in &body.depends_on {
        if dep == &id {
            continue;
        }
        let dep_exists: Option<i64> = tx.query_row("SELECT 1 FROM tasks WHERE id = ?1", params![dep], |r| r.get(0)).optional()?;
        if dep_exists.is_some() {
            tx.execute(
                "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on) VALUES (?1, ?2)",
                params![&id, dep],
            )?;
        }
    }

    record_history(&tx, &id, &caller.0, "created", &format!("task '{}' created", body.title))?;
    tx.commit()?;
    fetch_task(&conn, &id).map(Json)
}

#[get("/tasks?<status>&<priority>&<assigned_to>&<project_id>&<tag>")]
pub fn list(
    db: &State<Db>,
    status: Option<&str>,
    priority: Option<&str>,
    assigned_to: Option<&str>,
    project_id: Option<&str>,
    tag: Option<&str>,
) -> ApiResult<Json<Vec<Task>>> {
    let conn = db.conn.lock().unwrap();
    let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
    let mut binds: Vec<String> = vec![];
    if let Some(s) = status {
        sql.push_str(" AND status = ?");
        binds.push(s.to_string());
    }
    if let Some(p) = priority {
        sql.push_str(" AND priority = ?");
        binds.push(p.to_string());
    }
    if let Some(a) = assigned_to {
        sql.push_str(" AND assigned_to = ?");
        binds.push(a.to_string());
    }
    if let Some(pr) = project_id {
        sql.push_str(" AND project_id = ?");
        binds.push(pr.to_string());
    }
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b as &dyn rusqlite::ToSql).collect();
    let mut rows = stmt.query_map(params.as_slice(), task_from_row)?.collect::<Result<Vec<_>, _>>()?;
    if let Some(t) = tag {
        rows.retain(|task| task.tags.iter().any(|x| x == t));
    }
    rows.sort_by(|a, b| priority_rank(&a.priority).cmp(&priority_rank(&b.priority)).then(b.updated_at.partial_cmp(&a.updated_at).unwrap()));
    Ok(Json(rows))
}

#[get("/tasks/<id>")]
pub fn get(db: &State<Db>, id: &str) -> ApiResult<Json<Task>> {
    let conn = db.conn.lock().unwrap();
    fetch_task(&conn, id).map(Json)
}

#[patch("/tasks/<id>", format = "json", data = "<body>")]
pub fn update(db: &State<Db>, caller: Caller, id: &str, body: Json<UpdateTaskRequest>) -> ApiResult<Json<Task>> {
    if let Some(p) = &body.priority {
        if !PRIORITIES.contains(&p.as_str()) {
            return Err(ApiError::Validation(format!("invalid priority '{p}'")));
        }
    }
    let due_by = parse_due_by(&body.due_by)?;

    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    fetch_task(&tx, id)?;

    let now = time::now();
    let mut changes: Vec<String> = vec![];

    if let Some(title) = &body.title {
        tx.execute("UPDATE tasks SET title = ?1 WHERE id = ?2", params![title, id])?;
        changes.push(format!("title -> '{title}'"));
    }
    if let Some(description) = &body.description {
        tx.execute("UPDATE tasks SET description = ?1 WHERE id = ?2", params![description, id])?;
        changes.push("description updated".to_string());
    }
    if let Some(status) = &body.status {
        let valid = ["open", "claimed", "in_progress", "blocked", "done", "cancelled"];
        if !valid.contains(&status.as_str()) {
            return Err(ApiError::Validation(format!("invalid status '{status}'")));
        }
        if status == "done" {
            tx.execute("UPDATE tasks SET status = ?1, completed_at = ?2 WHERE id = ?3", params![status, now, id])?;
        } else {
            tx.execute("UPDATE tasks SET status = ?1 WHERE id = ?2", params![status, id])?;
        }
        changes.push(format!("status -> '{status}'"));
    }
    if let Some(priority) = &body.priority {
        tx.execute("UPDATE tasks SET priority = ?1 WHERE id = ?2", params![priority, id])?;
        changes.push(format!("priority -> '{priority}'"));
    }
    if body.assigned_to.is_some() {
        tx.execute("UPDATE tasks SET assigned_to = ?1 WHERE id = ?2", params![&body.assigned_to, id])?;
        changes.push("assigned_to updated".to_string());
    }
    if let Some(tags) = &body.tags {
        let tags_json = serde_json::to_string(tags).unwrap();
        tx.execute("UPDATE tasks SET tags = ?1 WHERE id = ?2", params![tags_json, id])?;
        changes.push("tags updated".to_string());
    }
    if body.due_by.is_some() {
        tx.execute("UPDATE tasks SET due_by = ?1 WHERE id = ?2", params![due_by, id])?;
        changes.push("due_by updated".to_string());
    }
    if body.milestone_id.is_some() {
        tx.execute("UPDATE tasks SET milestone_id = ?1 WHERE id = ?2", params![&body.milestone_id, id])?;
        changes.push("milestone_id updated".to_string());
    }
    if body.effort_estimate.is_some() {
        tx.execute("UPDATE tasks SET effort_estimate = ?1 WHERE id = ?2", params![body.effort_estimate, id])?;
        changes.push("effort_estimate updated".to_string());
    }

    tx.execute("UPDATE tasks SET updated_at = ?1 WHERE id = ?2", params![now, id])?;
    if !changes.is_empty() {
        record_history(&tx, id, &caller.0, "updated", &changes.join("; "))?;
    }
    tx.commit()?;
    fetch_task(&conn, id).map(Json)
}

#[post("/tasks/<id>/claim")]
pub fn claim(db: &State<Db>, caller: Caller, id: &str) -> ApiResult<Json<Task>> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    let task = fetch_task(&tx, id)?;
    if task.status != "open" {
        return Err(ApiError::Validation(format!("cannot claim task in status '{}'", task.status)));
    }
    let now = time::now();
    tx.execute(
        "UPDATE tasks SET status = 'claimed', claimed_by = ?1, updated_at = ?2 WHERE id = ?3",
        params![&caller.0, now, id],
    )?;
    record_history(&tx, id, &caller.0, "claimed", &format!("claimed by {}", caller.0))?;
    tx.commit()?;
    fetch_task(&conn, id).map(Json)
}

#[post("/tasks/<id>/start")]
pub fn start(db: &State<Db>, caller: Caller, id: &str) -> ApiResult<Json<Task>> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    let task = fetch_task(&tx, id)?;
    if task.status != "open" && task.status != "claimed" {
        return Err(ApiError::Validation(format!("cannot start task in status '{}'", task.status)));
    }
    let now = time::now();
    if task.claimed_by.is_none() {
        tx.execute(
            "UPDATE tasks SET status = 'in_progress', claimed_by = ?1, updated_at = ?2 WHERE id = ?3",
            params![&caller.0, now, id],
        )?;
    } else {
        tx.execute("UPDATE tasks SET status = 'in_progress', updated_at = ?1 WHERE id = ?2", params![now, id])?;
    }
    record_history(&tx, id, &caller.0, "started", "transitioned to in_progress")?;
    tx.commit()?;
    fetch_task(&conn, id).map(Json)
}

#[post("/tasks/<id>/complete")]
pub fn complete(db: &State<Db>, caller: Caller, id: &str) -> ApiResult<Json<Task>> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    let task = fetch_task(&tx, id)?;
    if task.status == "done" || task.status == "cancelled" {
        return Err(ApiError::Validation(format!("cannot complete task in status '{}'", task.status)));
    }
    let now = time::now();
    tx.execute("UPDATE tasks SET status = 'done', completed_at = ?1, updated_at = ?1 WHERE id = ?2", params![now, id])?;
    record_history(&tx, id, &caller.0, "completed", "transitioned to done")?;
    tx.commit()?;
    fetch_task(&conn, id).map(Json)
}

#[post("/tasks/<id>/block", format = "json", data = "<body>")]
pub fn block(db: &State<Db>, caller: Caller, id: &str, body: Json<BlockRequest>) -> ApiResult<Json<Task>> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    fetch_task(&tx, id)?;
    let now = time::now();
    let reason = body.reason.clone().unwrap_or_else(|| "no reason given".to_string());
    tx.execute("UPDATE tasks SET status = 'blocked', updated_at = ?1 WHERE id = ?2", params![now, id])?;
    record_history(&tx, id, &caller.0, "blocked", &reason)?;
    tx.execute(
        "INSERT INTO task_comments (id, task_id, agent_name, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![uuid::Uuid::new_v4().to_string(), id, &caller.0, format!("\u{1f6ab} Blocked: {reason}"), now],
    )?;
    tx.commit()?;
    fetch_task(&conn, id).map(Json)
}

#[post("/tasks/<id>/comments", format = "json", data = "<body>")]
pub fn add_comment(db: &State<Db>, caller: Caller, id: &str, body: Json<CreateCommentRequest>) -> ApiResult<Json<TaskComment>> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    fetch_task(&tx, id)?;
    let comment_id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    tx.execute(
        "INSERT INTO task_comments (id, task_id, agent_name, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&comment_id, id, &caller.0, &body.content, now],
    )?;
    tx.execute("UPDATE tasks SET updated_at = ?1 WHERE id = ?2", params![now, id])?;
    tx.commit()?;
    Ok(Json(TaskComment {
        id: comment_id,
        task_id: id.to_string(),
        agent_name: caller.0,
        content: body.content.clone(),
        created_at: now,
    }))
}

#[get("/tasks/<id>/comments")]
pub fn list_comments(db: &State<Db>, id: &str) -> ApiResult<Json<Vec<TaskComment>>> {
    let conn = db.conn.lock().unwrap();
    fetch_task(&conn, id)?;
    let mut stmt = conn.prepare("SELECT id, task_id, agent_name, content, created_at FROM task_comments WHERE task_id = ?1 ORDER BY created_at ASC")?;
    let rows = stmt
        .query_map(params![id], |r| {
            Ok(TaskComment { id: r.get(0)?, task_id: r.get(1)?, agent_name: r.get(2)?, content: r.get(3)?, created_at: r.get(4)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[get("/tasks/<id>/history")]
pub fn get_history(db: &State<Db>, id: &str) -> ApiResult<Json<Vec<TaskHistoryEntry>>> {
    let conn = db.conn.lock().unwrap();
    fetch_task(&conn, id)?;
    let mut stmt = conn.prepare("SELECT id, task_id, agent_name, action, details, created_at FROM task_history WHERE task_id = ?1 ORDER BY created_at ASC")?;
    let rows = stmt
        .query_map(params![id], |r| {
            Ok(TaskHistoryEntry { id: r.get(0)?, task_id: r.get(1)?, agent_name: r.get(2)?, action: r.get(3)?, details: r.get(4)?, created_at: r.get(5)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

#[post("/tasks/<id>/dependencies", format = "json", data = "<body>")]
pub fn add_dependency(db: &State<Db>, id: &str, body: Json<AddDependencyRequest>) -> ApiResult<Json<TaskDependencies>> {
    if body.depends_on == id {
        return Err(ApiError::Validation("a task cannot depend on itself".into()));
    }
    let conn = db.conn.lock().unwrap();
    fetch_task(&conn, id)?;
    fetch_task(&conn, &body.depends_on)?;
    conn.execute(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES (?1, ?2)",
        params![id, &body.depends_on],
    )?;
    drop(conn);
    get_dependencies(db, id)
}

#[get("/tasks/<id>/dependencies")]
pub fn get_dependencies(db: &State<Db>, id: &str) -> ApiResult<Json<TaskDependencies>> {
    let conn = db.conn.lock().unwrap();
    fetch_task(&conn, id)?;
    let mut stmt = conn.prepare("SELECT depends_on FROM task_dependencies WHERE task_id = ?1")?;
    let depends_on: Vec<String> = stmt.query_map(params![id], |r| r.get(0))?.collect::<Result<Vec<_>, _>>()?;

    let mut unmet_blockers = 0;
    for dep in &depends_on {
        let status: String = conn.query_row("SELECT status FROM tasks WHERE id = ?1", params![dep], |r| r.get(0))?;
        if status != "done" {
            unmet_blockers += 1;
        }
    }

    let mut stmt = conn.prepare("SELECT task_id FROM task_dependencies WHERE depends_on = ?1")?;
    let blocks: Vec<String> = stmt.query_map(params![id], |r| r.get(0))?.collect::<Result<Vec<_>, _>>()?;

    Ok(Json(TaskDependencies { task_id: id.to_string(), depends_on, unmet_blockers, blocks }))
}

#[delete("/tasks/<id>/dependencies/<depends_on>")]
pub fn remove_dependency(db: &State<Db>, id: &str, depends_on: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn.lock().unwrap();
    let deleted = conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1 AND depends_on = ?2",
        params![id, depends_on],
    )?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("no dependency from '{id}' on '{depends_on}'")));
    }
    Ok(Json(serde_json::json!({"task_id": id, "depends_on": depends_on, "removed": true})))
}

#[get("/tasks/my/active")]
pub fn my_active(db: &State<Db>, caller: Caller) -> ApiResult<Json<Vec<Task>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE (assigned_to = ?1 OR claimed_by = ?1) AND status NOT IN ('done', 'cancelled')"
    ))?;
    let mut rows = stmt.query_map(params![&caller.0], task_from_row)?.collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|a, b| priority_rank(&a.priority).cmp(&priority_rank(&b.priority)).then(b.updated_at.partial_cmp(&a.updated_at).unwrap()));
    Ok(Json(rows))
}

#[get("/tasks/my/feed")]
pub fn my_feed(db: &State<Db>, caller: Caller) -> ApiResult<Json<Vec<Task>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {cols} FROM tasks t WHERE t.created_by = ?1 OR t.assigned_to = ?1
         OR t.id IN (SELECT task_id FROM task_comments WHERE agent_name = ?1)",
        cols = TASK_COLUMNS.split(", ").map(|c| format!("t.{c}")).collect::<Vec<_>>().join(", ")
    ))?;
    let mut rows = stmt.query_map(params![&caller.0], task_from_row)?.collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|a, b| b.updated_at.partial_cmp(&a.updated_at).unwrap());
    Ok(Json(rows))
}

#[get("/board")]
pub fn board(db: &State<Db>) -> ApiResult<Json<Board>> {
    let conn = db.conn.lock().unwrap();
    let mut by_status = |status: &str| -> ApiResult<Vec<Task>> {
        let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1"))?;
        let mut rows = stmt.query_map(params![status], task_from_row)?.collect::<Result<Vec<_>, _>>()?;
        rows.sort_by(|a, b| priority_rank(&a.priority).cmp(&priority_rank(&b.priority)).then(b.updated_at.partial_cmp(&a.updated_at).unwrap()));
        rows.truncate(50);
        Ok(rows)
    };
    Ok(Json(Board {
        open: by_status("open")?,
        claimed: by_status("claimed")?,
        in_progress: by_status("in_progress")?,
        blocked: by_status("blocked")?,
        done: by_status("done")?,
    }))
}
