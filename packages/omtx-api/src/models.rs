//! Request/response bodies for the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use omtx_types::batch::BatchProgress;
use omtx_types::job::{JobRecord, JobStatus, JobType};

fn default_priority() -> String {
    "normal".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub model: String,
    pub protein_sequence: String,
    pub ligand_smiles: Option<String>,
    pub job_name: String,
    pub user_id: String,
    #[serde(default)]
    pub parameters: JsonValue,
    pub idem_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LigandSpec {
    pub name: String,
    pub smiles: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictBatchRequest {
    pub model: String,
    pub protein_sequence: String,
    pub ligands: Vec<LigandSpec>,
    pub batch_name: String,
    pub user_id: String,
    pub max_concurrent: Option<usize>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub parameters: JsonValue,
    pub idem_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub model: String,
    pub task_type: String,
    pub user_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_links: Option<HashMap<&'static str, String>>,
}

impl JobResponse {
    pub fn from_record(record: &JobRecord) -> Self {
        let download_links = if record.status == JobStatus::Completed {
            let mut links = HashMap::new();
            links.insert("json", format!("/api/v1/jobs/{}/files/json", record.id));
            links.insert("cif", format!("/api/v1/jobs/{}/files/cif", record.id));
            Some(links)
        } else {
            None
        };

        Self {
            job_id: record.id.clone(),
            job_type: record.job_type,
            status: record.status,
            model: record.model_name.clone(),
            task_type: record.task_type.clone(),
            user_id: record.user_id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
            error: record.error.as_ref().map(|e| serde_json::json!({"kind": e.kind, "message": e.message, "details": e.details})),
            batch_parent_id: record.batch_parent_id.clone(),
            download_links,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub batch_id: String,
    pub status: JobStatus,
    pub model: String,
    pub user_id: String,
    pub child_ids: Vec<String>,
    pub progress: Option<BatchProgress>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_links: Option<HashMap<&'static str, String>>,
}

impl BatchResponse {
    pub fn from_record(record: &JobRecord) -> Self {
        let export_links = if record.status.is_terminal() {
            let mut links = HashMap::new();
            for fmt in ["csv", "json", "zip"] {
                links.insert(
                    match fmt {
                        "csv" => "csv",
                        "json" => "json",
                        _ => "zip",
                    },
                    format!("/api/v1/batches/{}/export?format={}", record.id, fmt),
                );
            }
            Some(links)
        } else {
            None
        };

        Self {
            batch_id: record.id.clone(),
            status: record.status,
            model: record.model_name.clone(),
            user_id: record.user_id.clone(),
            child_ids: record.batch_child_ids.clone(),
            progress: record.batch_progress.clone(),
            created_at: record.created_at,
            export_links,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchListResponse {
    pub batches: Vec<BatchResponse>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct PredictBatchResponse {
    pub batch_id: String,
    pub child_ids: Vec<String>,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub user_id: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub status: Option<String>,
    pub model: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

/// Query param carried on mutating job/batch endpoints so a cancellation
/// can be checked against the record's owner. Optional because this
/// service has no first-class auth directory (see `AppState::tier_for`);
/// when absent the request is trusted as-is.
#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_export_format")]
    pub format: String,
}

fn default_export_format() -> String {
    "json".to_string()
}

#[derive(Debug, Serialize)]
pub struct SystemStatusResponse {
    pub status: &'static str,
    pub api_version: &'static str,
    pub components: JsonValue,
    pub statistics: JsonValue,
}

/// Body posted by the GPU worker when a task finishes (spec §4.7/§6.2).
#[derive(Debug, Deserialize)]
pub struct CompletionWebhookRequest {
    pub job_id: Option<String>,
    pub modal_call_id: Option<String>,
    pub status: CompletionStatus,
    #[serde(default)]
    pub result: JsonValue,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: JsonValue,
    pub execution_time_seconds: Option<f64>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    Failed,
}
