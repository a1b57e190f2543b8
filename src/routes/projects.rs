use crate::auth::Caller;
use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::time;
use chrono::DateTime;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::{params, OptionalExtension};

#[post("/projects", format = "json", data = "<body>")]
pub fn create(db: &State<Db>, caller: Caller, body: Json<CreateProjectRequest>) -> ApiResult<Json<Project>> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    let tags_json = serde_json::to_string(&body.tags).unwrap();
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO projects (id, name, description, status, created_by, tags, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?6, ?6)",
        params![&id, &body.name, &body.description, &caller.0, &tags_json, now],
    )?;
    tx.execute(
        "INSERT INTO project_members (project_id, agent_name, role, joined_at) VALUES (?1, ?2, 'owner', ?3)",
        params![&id, &caller.0, now],
    )?;
    tx.commit()?;
    Ok(Json(Project {
        id,
        name: body.name.clone(),
        description: body.description.clone(),
        status: "active".into(),
        created_by: caller.0,
        tags: body.tags.clone(),
        created_at: now,
        updated_at: now,
        progress_pct: Some(0.0),
        members: None,
        tasks: None,
        milestones: None,
        repos: None,
    }))
}

fn project_row(r: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String, String, String, f64, f64)> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?))
}

#[get("/projects")]
pub fn list(db: &State<Db>) -> ApiResult<Json<Vec<Project>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT id, name, description, status, created_by, tags, created_at, updated_at FROM projects ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map([], project_row)?.collect::<Result<Vec<_>, _>>()?;

    let mut projects = vec![];
    for (id, name, description, status, created_by, tags_json, created_at, updated_at) in rows {
        let (task_count, done_count): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0) FROM tasks WHERE project_id = ?1",
            params![&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let progress_pct = if task_count == 0 { 0.0 } else { 100.0 * done_count as f64 / task_count as f64 };
        projects.push(Project {
            id,
            name,
            description,
            status,
            created_by,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            created_at,
            updated_at,
            progress_pct: Some(progress_pct),
            members: None,
            tasks: None,
            milestones: None,
            repos: None,
        });
    }
    Ok(Json(projects))
}

#[get("/projects/<id>")]
pub fn get(db: &State<Db>, id: &str) -> ApiResult<Json<Project>> {
    let conn = db.conn.lock().unwrap();
    let (name, description, status, created_by, tags_json, created_at, updated_at): (String, String, String, String, String, f64, f64) = conn
        .query_row(
            "SELECT name, description, status, created_by, tags, created_at, updated_at FROM projects WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?)),
        )
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such project '{id}'")))?;

    let mut stmt = conn.prepare("SELECT agent_name, role, joined_at FROM project_members WHERE project_id = ?1")?;
    let members: Vec<ProjectMember> = stmt
        .query_map(params![id], |r| Ok(ProjectMember { agent_name: r.get(0)?, role: r.get(1)?, joined_at: r.get(2)? }))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, title, description, status, priority, created_by, assigned_to, claimed_by, tags, created_at, updated_at, completed_at, due_by, parent_id, project_id, milestone_id, effort_estimate
         FROM tasks WHERE project_id = ?1",
    )?;
    let mut tasks: Vec<Task> = stmt.query_map(params![id], super::tasks::task_from_row)?.collect::<Result<Vec<_>, _>>()?;
    tasks.sort_by(|a, b| super::tasks::priority_rank(&a.priority).cmp(&super::tasks::priority_rank(&b.priority)));
    let task_count = tasks.len();
    let done_count = tasks.iter().filter(|t| t.status == "done").count();

    let mut stmt = conn.prepare("SELECT id, project_id, name, description, due_by, status, created_at FROM milestones WHERE project_id = ?1")?;
    let mut milestones: Vec<Milestone> = stmt
        .query_map(params![id], |r| {
            Ok(Milestone { id: r.get(0)?, project_id: r.get(1)?, name: r.get(2)?, description: r.get(3)?, due_by: r.get(4)?, status: r.get(5)?, created_at: r.get(6)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    milestones.sort_by(|a, b| match (a.due_by, b.due_by) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap(),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut stmt = conn.prepare("SELECT id, name, description, created_by, default_branch, project_id, created_at FROM repos WHERE project_id = ?1")?;
    let repos: Vec<Repo> = stmt
        .query_map(params![id], |r| {
            Ok(Repo { id: r.get(0)?, name: r.get(1)?, description: r.get(2)?, created_by: r.get(3)?, default_branch: r.get(4)?, project_id: r.get(5)?, created_at: r.get(6)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let progress_pct = if task_count == 0 { 0.0 } else { 100.0 * done_count as f64 / task_count as f64 };

    Ok(Json(Project {
        id: id.to_string(),
        name,
        description,
        status,
        created_by,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at,
        updated_at,
        progress_pct: Some(progress_pct),
        members: Some(members),
        tasks: Some(tasks),
        milestones: Some(milestones),
        repos: Some(repos),
    }))
}

#[post("/projects/<id>/members", format = "json", data = "<body>")]
pub fn add_member(db: &State<Db>, id: &str, body: Json<AddMemberRequest>) -> ApiResult<Json<ProjectMember>> {
    let conn = db.conn.lock().unwrap();
    let exists: Option<i64> = conn.query_row("SELECT 1 FROM projects WHERE id = ?1", params![id], |r| r.get(0)).optional()?;
    if exists.is_none() {
        return Err(ApiError::NotFound(format!("no such project '{id}'")));
    }
    let now = time::now();
    conn.execute(
        "INSERT INTO project_members (project_id, agent_name, role, joined_at) VALUES (?1, ?2, 'member', ?3)",
        params![id, &body.agent_name, now],
    )?;
    Ok(Json(ProjectMember { agent_name: body.agent_name.clone(), role: "member".into(), joined_at: now }))
}

#[post("/projects/<id>/milestones", format = "json", data = "<body>")]
pub fn add_milestone(db: &State<Db>, id: &str, body: Json<CreateMilestoneRequest>) -> ApiResult<Json<Milestone>> {
    let conn = db.conn.lock().unwrap();
    let exists: Option<i64> = conn.query_row("SELECT 1 FROM projects WHERE id = ?1", params![id], |r| r.get(0)).optional()?;
    if exists.is_none() {
        return Err(ApiError::NotFound(format!("no such project '{id}'")));
    }
    let due_by = match &body.due_by {
        Some(s) if !s.is_empty() => Some(
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp() as f64)
                .map_err(|_| ApiError::Validation(format!("invalid due_by date '{s}'")))?,
        ),
        _ => None,
    };
    let milestone_id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    conn.execute(
        "INSERT INTO milestones (id, project_id, name, description, due_by, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6)",
        params![&milestone_id, id, &body.name, &body.description, due_by, now],
    )?;
    Ok(Json(Milestone {
        id: milestone_id,
        project_id: id.to_string(),
        name: body.name.clone(),
        description: body.description.clone(),
        due_by,
        status: "open".into(),
        created_at: now,
    }))
}

#[get("/projects/<id>/milestones")]
pub fn list_milestones(db: &State<Db>, id: &str) -> ApiResult<Json<Vec<Milestone>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare("SELECT id, project_id, name, description, due_by, status, created_at FROM milestones WHERE project_id = ?1")?;
    let mut rows: Vec<Milestone> = stmt
        .query_map(params![id], |r| {
            Ok(Milestone { id: r.get(0)?, project_id: r.get(1)?, name: r.get(2)?, description: r.get(3)?, due_by: r.get(4)?, status: r.get(5)?, created_at: r.get(6)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|a, b| match (a.due_by, b.due_by) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap(),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    Ok(Json(rows))
}
