use serde::{Deserialize, Serialize};

// --- Identity ---

#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    #[serde(default)]
    pub admin_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub agent_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingRegistration {
    pub id: String,
    pub agent_name: String,
    pub description: String,
    pub contact: String,
    pub status: String,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub approver: Option<String>,
}

// --- Messaging ---

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_by: String,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub from_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<String>,
    pub content: String,
    pub timestamp: f64,
    pub read: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SendToConversationRequest {
    pub content: String,
}

// --- Files ---

#[derive(Debug, Clone, Serialize)]
pub struct FileMeta {
    pub id: String,
    pub stored_filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub sha256: String,
    pub uploaded_by: String,
    pub uploaded_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileStats {
    pub count: i64,
    pub total_bytes: i64,
}

#[derive(Debug, rocket::form::FromForm)]
pub struct UploadForm<'r> {
    pub file: rocket::fs::TempFile<'r>,
    #[field(default = None)]
    pub conversation_id: Option<String>,
    #[field(default = None)]
    pub description: Option<String>,
}

#[derive(Debug, rocket::form::FromForm)]
pub struct SendFileForm<'r> {
    pub to: String,
    #[field(default = String::new())]
    pub description: String,
    pub file: rocket::fs::TempFile<'r>,
}

// --- Projects ---

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_by: String,
    pub tags: Vec<String>,
    pub created_at: f64,
    pub updated_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<ProjectMember>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestones: Option<Vec<Milestone>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repos: Option<Vec<Repo>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectMember {
    pub agent_name: String,
    pub role: String,
    pub joined_at: f64,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_by: Option<f64>,
    pub status: String,
    pub created_at: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateMilestoneRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_by: Option<String>,
}

// --- Tasks ---

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    pub tags: Vec<String>,
    pub created_at: f64,
    pub updated_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_by: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort_estimate: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_by: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub milestone_id: Option<String>,
    #[serde(default)]
    pub effort_estimate: Option<f64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_priority() -> String {
    "normal".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub due_by: Option<String>,
    #[serde(default)]
    pub milestone_id: Option<String>,
    #[serde(default)]
    pub effort_estimate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskComment {
    pub id: String,
    pub task_id: String,
    pub agent_name: String,
    pub content: String,
    pub created_at: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskHistoryEntry {
    pub id: String,
    pub task_id: String,
    pub agent_name: String,
    pub action: String,
    pub details: String,
    pub created_at: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct BlockRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskDependencies {
    pub task_id: String,
    pub depends_on: Vec<String>,
    pub unmet_blockers: i64,
    pub blocks: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddDependencyRequest {
    pub depends_on: String,
}

#[derive(Debug, Serialize)]
pub struct Board {
    pub open: Vec<Task>,
    pub claimed: Vec<Task>,
    pub in_progress: Vec<Task>,
    pub blocked: Vec<Task>,
    pub done: Vec<Task>,
}

// --- Revisions ("agent git") ---

#[derive(Debug, Clone, Serialize)]
pub struct Repo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub default_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub created_at: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Commit {
    pub id: String,
    pub repo_id: String,
    pub branch: String,
    pub author: String,
    pub message: String,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<RevFile>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub sha256: String,
    pub size: i64,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitFileInput {
    pub path: String,
    #[serde(default)]
    pub content: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub message: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub files: Vec<CommitFileInput>,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub sha256: String,
    pub size: i64,
}
