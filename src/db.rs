use rusqlite::Connection;
use std::sync::Mutex;
use std::time::Duration;

pub struct Db {
    pub conn: Mutex<Connection>,
}

/// Generate an agent API key: 32 random hex bytes (64 hex chars, well over the
/// required 32 bytes of entropy).
pub fn generate_api_key() -> String {
    format!(
        "{:032x}{:032x}",
        uuid::Uuid::new_v4().as_u128(),
        uuid::Uuid::new_v4().as_u128()
    )
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("failed to open database");
        conn.busy_timeout(Duration::from_secs(10))
            .expect("failed to set busy timeout");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("failed to set pragmas");
        let db = Db { conn: Mutex::new(conn) };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                name TEXT PRIMARY KEY,
                api_key TEXT NOT NULL UNIQUE,
                created_at REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pending_registrations (
                id TEXT PRIMARY KEY,
                agent_name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                contact TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                created_at REAL NOT NULL,
                reviewed_at REAL,
                reviewed_by TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pending_agent_name ON pending_registrations(agent_name);
            CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_registrations(status);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at REAL NOT NULL,
                canonical_key TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_canonical
                ON conversations(canonical_key) WHERE canonical_key IS NOT NULL;

            CREATE TABLE IF NOT EXISTS conversation_members (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                agent_name TEXT NOT NULL,
                joined_at REAL NOT NULL,
                PRIMARY KEY (conversation_id, agent_name)
            );
            CREATE INDEX IF NOT EXISTS idx_members_agent ON conversation_members(agent_name);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                from_agent TEXT NOT NULL,
                to_agent TEXT,
                content TEXT NOT NULL,
                timestamp REAL NOT NULL,
                read INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_from ON messages(from_agent);

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                stored_filename TEXT NOT NULL,
                original_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                uploaded_by TEXT NOT NULL,
                uploaded_at REAL NOT NULL,
                conversation_id TEXT,
                message_id TEXT,
                description TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_files_uploader ON files(uploaded_by);

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'active',
                created_by TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_members (
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                agent_name TEXT NOT NULL,
                role TEXT NOT NULL,
                joined_at REAL NOT NULL,
                PRIMARY KEY (project_id, agent_name)
            );

            CREATE TABLE IF NOT EXISTS milestones (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                due_by REAL,
                status TEXT NOT NULL DEFAULT 'open',
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_milestones_project ON milestones(project_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'open',
                priority TEXT NOT NULL DEFAULT 'normal',
                created_by TEXT NOT NULL,
                assigned_to TEXT,
                claimed_by TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL,
                completed_at REAL,
                due_by REAL,
                parent_id TEXT REFERENCES tasks(id),
                project_id TEXT REFERENCES projects(id),
                milestone_id TEXT REFERENCES milestones(id),
                effort_estimate REAL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_assigned ON tasks(assigned_to);
            CREATE INDEX IF NOT EXISTS idx_tasks_claimed ON tasks(claimed_by);
            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);

            CREATE TABLE IF NOT EXISTS task_dependencies (
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                depends_on TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                PRIMARY KEY (task_id, depends_on)
            );
            CREATE INDEX IF NOT EXISTS idx_deps_depends_on ON task_dependencies(depends_on);

            CREATE TABLE IF NOT EXISTS task_comments (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                agent_name TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_task ON task_comments(task_id);

            CREATE TABLE IF NOT EXISTS task_history (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                agent_name TEXT NOT NULL,
                action TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '',
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_task ON task_history(task_id);

            CREATE TABLE IF NOT EXISTS repos (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                created_by TEXT NOT NULL,
                default_branch TEXT NOT NULL DEFAULT 'main',
                project_id TEXT,
                created_at REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS branches (
                repo_id TEXT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                head_commit TEXT,
                PRIMARY KEY (repo_id, name)
            );

            CREATE TABLE IF NOT EXISTS commits (
                id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
                branch TEXT NOT NULL,
                author TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at REAL NOT NULL,
                parent_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_commits_branch ON commits(repo_id, branch, created_at);
            CREATE INDEX IF NOT EXISTS idx_commits_author ON commits(author);

            CREATE TABLE IF NOT EXISTS rev_files (
                id TEXT PRIMARY KEY,
                commit_id TEXT NOT NULL REFERENCES commits(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                content TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                size INTEGER NOT NULL,
                action TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_revfiles_commit ON rev_files(commit_id);
            CREATE INDEX IF NOT EXISTS idx_revfiles_path ON rev_files(path);
            ",
        )
        .expect("failed to run migrations");
    }
}
