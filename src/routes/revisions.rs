use crate::auth::Caller;
use crate::db::Db;
use crate::diffing;
use crate::error::{ApiError, ApiResult};
use crate::files_store::sha256_hex;
use crate::models::*;
use crate::time;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

#[post("/git/repos", format = "json", data = "<body>")]
pub fn create_repo(db: &State<Db>, caller: Caller, body: Json<CreateRepoRequest>) -> ApiResult<Json<Repo>> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    let conn = db.conn.lock().unwrap();
    conn.execute(
        "INSERT INTO repos (id, name, description, created_by, default_branch, project_id, created_at) VALUES (?1, ?2, ?3, ?4, 'main', ?5, ?6)",
        params![&id, &body.name, &body.description, &caller.0, &body.project_id, now],
    )?;
    conn.execute(
        "INSERT INTO branches (repo_id, name, head_commit) VALUES (?1, 'main', NULL)",
        params![&id],
    )?;
    Ok(Json(Repo {
        id,
        name: body.name.clone(),
        description: body.description.clone(),
        created_by: caller.0,
        default_branch: "main".into(),
        project_id: body.project_id.clone(),
        created_at: now,
    }))
}

#[get("/git/repos")]
pub fn list_repos(db: &State<Db>) -> ApiResult<Json<Vec<Repo>>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn.prepare("SELECT id, name, description, created_by, default_branch, project_id, created_at FROM repos ORDER BY created_at DESC")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Repo { id: r.get(0)?, name: r.get(1)?, description: r.get(2)?, created_by: r.get(3)?, default_branch: r.get(4)?, project_id: r.get(5)?, created_at: r.get(6)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

fn find_repo_id(conn: &rusqlite::Connection, name: &str) -> ApiResult<String> {
    conn.query_row("SELECT id FROM repos WHERE name = ?1", params![name], |r| r.get(0))
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such repo '{name}'")))
}

#[get("/git/repos/<name>")]
pub fn get_repo(db: &State<Db>, name: &str) -> ApiResult<Json<Repo>> {
    let conn = db.conn.lock().unwrap();
    conn.query_row(
        "SELECT id, name, description, created_by, default_branch, project_id, created_at FROM repos WHERE name = ?1",
        params![name],
        |r| Ok(Repo { id: r.get(0)?, name: r.get(1)?, description: r.get(2)?, created_by: r.get(3)?, default_branch: r.get(4)?, project_id: r.get(5)?, created_at: r.get(6)? }),
    )
    .optional()?
    .ok_or_else(|| ApiError::NotFound(format!("no such repo '{name}'")))
    .map(Json)
}

#[post("/git/repos/<name>/commit", format = "json", data = "<body>")]
pub fn commit(db: &State<Db>, caller: Caller, name: &str, body: Json<CommitRequest>) -> ApiResult<Json<Commit>> {
    let mut conn = db.conn.lock().unwrap();
    let repo_id = find_repo_id(&conn, name)?;
    let tx = conn.transaction()?;

    let head: Option<String> = tx
        .query_row("SELECT head_commit FROM branches WHERE repo_id = ?1 AND name = ?2", params![&repo_id, &body.branch], |r| r.get(0))
        .optional()?
        .flatten();
    let branch_exists: Option<i64> = tx
        .query_row("SELECT 1 FROM branches WHERE repo_id = ?1 AND name = ?2", params![&repo_id, &body.branch], |r| r.get(0))
        .optional()?;
    if branch_exists.is_none() {
        tx.execute("INSERT INTO branches (repo_id, name, head_commit) VALUES (?1, ?2, NULL)", params![&repo_id, &body.branch])?;
    }

    let commit_id = uuid::Uuid::new_v4().to_string();
    let now = time::now();
    tx.execute(
        "INSERT INTO commits (id, repo_id, branch, author, message, created_at, parent_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&commit_id, &repo_id, &body.branch, &caller.0, &body.message, now, &head],
    )?;

    let mut rev_files = vec![];
    for f in &body.files {
        if !["add", "modify", "delete"].contains(&f.action.as_str()) {
            return Err(ApiError::Validation(format!("invalid action '{}'", f.action)));
        }
        let sha256 = sha256_hex(f.content.as_bytes());
        let size = f.content.len() as i64;
        tx.execute(
            "INSERT INTO rev_files (id, commit_id, path, content, sha256, size, action) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![uuid::Uuid::new_v4().to_string(), &commit_id, &f.path, &f.content, &sha256, size, &f.action],
        )?;
        rev_files.push(RevFile { path: f.path.clone(), content: Some(f.content.clone()), sha256, size, action: f.action.clone() });
    }

    tx.execute("UPDATE branches SET head_commit = ?1 WHERE repo_id = ?2 AND name = ?3", params![&commit_id, &repo_id, &body.branch])?;
    tx.commit()?;
    tracing::debug!(repo = name, branch = %body.branch, commit = %commit_id, "commit recorded");

    Ok(Json(Commit {
        id: commit_id,
        repo_id,
        branch: body.branch.clone(),
        author: caller.0,
        message: body.message.clone(),
        created_at: now,
        parent_id: head,
        files: Some(rev_files),
    }))
}

/// Walks a branch's commit chain newest-to-oldest, applying `visit` to each
/// commit's files until it returns `false` (stop) or the chain is exhausted.
fn walk_chain(conn: &rusqlite::Connection, repo_id: &str, branch: &str, mut visit: impl FnMut(&str, &[(String, String, String, i64, String)]) -> bool) -> ApiResult<()> {
    let mut current: Option<String> = conn
        .query_row("SELECT head_commit FROM branches WHERE repo_id = ?1 AND name = ?2", params![repo_id, branch], |r| r.get(0))
        .optional()?
        .flatten();

    while let Some(commit_id) = current {
        let mut stmt = conn.prepare("SELECT path, content, sha256, size, action FROM rev_files WHERE commit_id = ?1")?;
        let files: Vec<(String, String, String, i64, String)> = stmt
            .query_map(params![&commit_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        if !visit(&commit_id, &files) {
            break;
        }
        current = conn
            .query_row("SELECT parent_id FROM commits WHERE id = ?1", params![&commit_id], |r| r.get(0))
            .optional()?
            .flatten();
    }
    Ok(())
}

#[get("/git/repos/<name>/tree?<branch>")]
pub fn tree(db: &State<Db>, name: &str, branch: Option<&str>) -> ApiResult<Json<Vec<TreeEntry>>> {
    let conn = db.conn.lock().unwrap();
    let repo_id = find_repo_id(&conn, name)?;
    let branch = branch.unwrap_or("main");

    let mut seen: HashMap<String, Option<(String, i64)>> = HashMap::new();
    walk_chain(&conn, &repo_id, branch, |_commit_id, files| {
        for (path, _content, sha256, size, action) in files {
            seen.entry(path.clone()).or_insert_with(|| {
                if action == "delete" {
                    None
                } else {
                    Some((sha256.clone(), *size))
                }
            });
        }
        true
    })?;

    let mut entries: Vec<TreeEntry> = seen
        .into_iter()
        .filter_map(|(path, v)| v.map(|(sha256, size)| TreeEntry { path, sha256, size }))
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(Json(entries))
}

/// Finds the most recent non-deleted content for `path` on `branch`, starting
/// the walk from the commit immediately before `before_commit` if given.
fn most_recent_content(conn: &rusqlite::Connection, repo_id: &str, branch: &str, path: &str, before_commit: Option<&str>) -> ApiResult<Option<String>> {
    let mut result = None;
    let mut skipping = before_commit.is_some();
    walk_chain(conn, repo_id, branch, |commit_id, files| {
        if skipping {
            if Some(commit_id) == before_commit {
                skipping = false;
            } else {
                return true;
            }
        }
        for (p, content, _sha256, _size, action) in files {
            if p == path {
                result = if action == "delete" { None } else { Some(content.clone()) };
                return false;
            }
        }
        true
    })?;
    Ok(result)
}

#[get("/git/repos/<name>/files/<path..>?<branch>")]
pub fn read_file(db: &State<Db>, name: &str, path: std::path::PathBuf, branch: Option<&str>) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn.lock().unwrap();
    let repo_id = find_repo_id(&conn, name)?;
    let branch = branch.unwrap_or("main");
    let path_str = path.to_string_lossy().to_string();
    match most_recent_content(&conn, &repo_id, branch, &path_str, None)? {
        Some(content) => Ok(Json(serde_json::json!({"path": path_str, "content": content}))),
        None => Err(ApiError::NotFound(format!("no such file '{path_str}' on branch '{branch}'"))),
    }
}

#[get("/git/repos/<name>/log?<branch>")]
pub fn log(db: &State<Db>, name: &str, branch: Option<&str>) -> ApiResult<Json<Vec<Commit>>> {
    let conn = db.conn.lock().unwrap();
    let repo_id = find_repo_id(&conn, name)?;
    let branch = branch.unwrap_or("main");
    let mut stmt = conn.prepare(
        "SELECT id, repo_id, branch, author, message, created_at, parent_id FROM commits WHERE repo_id = ?1 AND branch = ?2 ORDER BY created_at DESC",
    )?;
    let commits: Vec<(String, String, String, String, String, f64, Option<String>)> = stmt
        .query_map(params![&repo_id, branch], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut result = vec![];
    for (id, repo_id, branch, author, message, created_at, parent_id) in commits {
        let mut stmt = conn.prepare("SELECT path, content, sha256, size, action FROM rev_files WHERE commit_id = ?1")?;
        let files: Vec<RevFile> = stmt
            .query_map(params![&id], |r| {
                Ok(RevFile { path: r.get(0)?, content: None, sha256: r.get(2)?, size: r.get(3)?, action: r.get(4)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        result.push(Commit { id, repo_id, branch, author, message, created_at, parent_id, files: Some(files) });
    }
    Ok(Json(result))
}

#[get("/git/repos/<name>/diff/<commit_id>")]
pub fn diff(db: &State<Db>, name: &str, commit_id: &str) -> ApiResult<String> {
    let conn = db.conn.lock().unwrap();
    let repo_id = find_repo_id(&conn, name)?;
    let (branch, parent_id): (String, Option<String>) = conn
        .query_row("SELECT branch, parent_id FROM commits WHERE id = ?1 AND repo_id = ?2", params![commit_id, &repo_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("no such commit '{commit_id}'")))?;

    let mut stmt = conn.prepare("SELECT path, content, size, action FROM rev_files WHERE commit_id = ?1")?;
    let files: Vec<(String, String, i64, String)> = stmt
        .query_map(params![commit_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = String::new();
    for (path, content, size, action) in files {
        match action.as_str() {
            "add" => out.push_str(&diffing::added_stub(&path, size)),
            "delete" => out.push_str(&diffing::deleted_stub(&path)),
            _ => {
                let previous = most_recent_content(&conn, &repo_id, &branch, &path, parent_id.as_deref())?.unwrap_or_default();
                out.push_str(&diffing::unified_diff(&path, &path, &previous, &content));
            }
        }
    }
    Ok(out)
}
