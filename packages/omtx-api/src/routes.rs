//! HTTP route handlers: the Submission API and the Completion Handler
//! webhook. Each handler runs the admission pipeline in the fixed order
//! the rest of this service is built around — rate limit, validate,
//! estimate, quota check, reserve, persist, dispatch — so a failure at
//! any step short-circuits before anything downstream is touched.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use omtx_aggregator::ChildOutcome;
use omtx_dispatch::Lane;
use omtx_quota::estimate_job_resources;
use omtx_ratelimit::RouteClass;
use omtx_types::error::ApiError as CoreError;
use omtx_types::job::{JobError, JobRecord, JobStatus, JobType};
use omtx_types::paths::{self, ArtifactKind};

use crate::error::ApiError;
use crate::models::{
    BatchListResponse, BatchResponse, CompletionStatus, CompletionWebhookRequest, ExportQuery,
    JobListResponse, JobResponse, ListQuery, OwnerQuery, PredictBatchRequest, PredictBatchResponse,
    PredictRequest, PredictResponse, SystemStatusResponse,
};
use crate::state::AppState;
use crate::validation::{validate_predict, validate_predict_batch};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/predict", post(predict))
        .route("/api/v1/predict/batch", post(predict_batch))
        .route("/api/v1/jobs/:job_id", get(get_job).delete(delete_job))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/batches/:batch_id", get(get_batch).delete(delete_batch))
        .route("/api/v1/batches", get(list_batches))
        .route("/api/v1/jobs/:job_id/files/:kind", get(get_job_file))
        .route("/api/v1/batches/:batch_id/export", get(export_batch))
        .route("/api/v1/system/status", get(system_status))
        .route("/api/v3/webhooks/completion", post(completion_webhook))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let decision = state.rate_limiter.check(&req.user_id, RouteClass::Submit).await;
    if !decision.allowed {
        return Err(CoreError::new(
            omtx_types::error::ErrorKind::RateLimited,
            format!("rate limit exceeded, retry after {:?}", decision.retry_after),
        )
        .into());
    }

    validate_predict(&req)?;

    let tier = state.tier_for(&req.user_id);
    let estimate = estimate_job_resources(&req.model, 1, false);

    let check = state.quota.check_resource_availability(&req.user_id, tier, &estimate).await;
    if !check.allowed {
        return Err(CoreError::quota_exceeded(serde_json::to_value(&check.violations).unwrap_or_default()).into());
    }

    let input_data = serde_json::json!({
        "protein_sequence": req.protein_sequence,
        "ligand_smiles": req.ligand_smiles,
        "job_name": req.job_name,
        "parameters": req.parameters,
    });

    if let Some(idem_key) = &req.idem_key {
        if let Some(existing) = state.job_store.find_by_idempotency_key(&req.user_id, idem_key).await? {
            if existing.input_data == input_data {
                info!(job_id = %existing.id, "idempotent replay of predict, returning existing job without reserving quota");
                return Ok(Json(PredictResponse {
                    job_id: existing.id,
                    status: existing.status,
                }));
            }
            return Err(CoreError::new(
                omtx_types::error::ErrorKind::Conflict,
                "idem_key was already used with a different payload",
            )
            .into());
        }
    }

    let job_id = Uuid::new_v4().to_string();
    let mut record = JobRecord::new(
        job_id.clone(),
        JobType::Individual,
        "protein_ligand_binding",
        &req.model,
        &req.user_id,
        input_data,
    );
    record.idempotency_key = req.idem_key.clone();

    state.quota.reserve_resources(&req.user_id, tier, &job_id, estimate, false).await;
    state.job_store.create(record).await?;
    state.job_store.transition_status(&job_id, JobStatus::Queued).await?;

    match state
        .dispatcher
        .dispatch_one(&job_id, JobType::Individual, None, Lane::Interactive, req.idem_key.as_deref(), &req.user_id)
        .await
    {
        Ok(_receipt) => {
            if let Err(e) = state.job_store.transition_status(&job_id, JobStatus::Running).await {
                warn!(job_id, error = %e, "dispatched job could not be marked running");
            }
            info!(job_id, user_id = %req.user_id, "individual job dispatched");
            Ok(Json(PredictResponse {
                job_id,
                status: JobStatus::Running,
            }))
        }
        Err(e) => {
            warn!(job_id, error = %e, "dispatch failed, marking job failed and releasing quota");
            if let Err(te) = state
                .job_store
                .transition_with_error(&job_id, JobStatus::Failed, JobError::new("dispatch_failed", e.to_string()))
                .await
            {
                warn!(job_id, error = %te, "failed to persist dispatch failure on job record");
            }
            let _ = state.quota.release_resources(&req.user_id, tier, &job_id, None, false).await;
            Err(e.into())
        }
    }
}

async fn predict_batch(
    State(state): State<AppState>,
    Json(req): Json<PredictBatchRequest>,
) -> Result<Json<PredictBatchResponse>, ApiError> {
    let decision = state.rate_limiter.check(&req.user_id, RouteClass::Submit).await;
    if !decision.allowed {
        return Err(CoreError::new(
            omtx_types::error::ErrorKind::RateLimited,
            format!("rate limit exceeded, retry after {:?}", decision.retry_after),
        )
        .into());
    }

    validate_predict_batch(&req)?;

    let tier = state.tier_for(&req.user_id);
    let is_priority = req.priority == "high";
    let estimate = estimate_job_resources(&req.model, req.ligands.len() as u32, is_priority);

    let check = state.quota.check_resource_availability(&req.user_id, tier, &estimate).await;
    if !check.allowed {
        return Err(CoreError::quota_exceeded(serde_json::to_value(&check.violations).unwrap_or_default()).into());
    }

    let ligand_payload: Vec<JsonValue> = req
        .ligands
        .iter()
        .map(|l| serde_json::json!({"name": l.name, "smiles": l.smiles}))
        .collect();
    let input_data = serde_json::json!({
        "protein_sequence": req.protein_sequence,
        "batch_name": req.batch_name,
        "priority": req.priority,
        "parameters": req.parameters,
        "ligands": ligand_payload,
    });

    if let Some(idem_key) = &req.idem_key {
        if let Some(existing) = state.job_store.find_by_idempotency_key(&req.user_id, idem_key).await? {
            if existing.input_data == input_data {
                info!(batch_id = %existing.id, "idempotent replay of predict_batch, returning existing batch without reserving quota");
                return Ok(Json(PredictBatchResponse {
                    batch_id: existing.id.clone(),
                    child_ids: existing.batch_child_ids.clone(),
                    status: existing.status,
                }));
            }
            return Err(CoreError::new(
                omtx_types::error::ErrorKind::Conflict,
                "idem_key was already used with a different payload",
            )
            .into());
        }
    }

    let batch_id = Uuid::new_v4().to_string();
    let mut parent = JobRecord::new(
        batch_id.clone(),
        JobType::BatchParent,
        "protein_ligand_binding",
        &req.model,
        &req.user_id,
        input_data,
    );
    parent.idempotency_key = req.idem_key.clone();

    let mut children = Vec::with_capacity(req.ligands.len());
    for (index, ligand) in req.ligands.iter().enumerate() {
        let child_id = format!("{batch_id}-{index}");
        let mut child = JobRecord::new(
            child_id.clone(),
            JobType::BatchChild,
            "protein_ligand_binding",
            &req.model,
            &req.user_id,
            serde_json::json!({
                "protein_sequence": req.protein_sequence,
                "ligand_smiles": ligand.smiles,
                "parameters": req.parameters,
            }),
        );
        child.batch_parent_id = Some(batch_id.clone());
        child.batch_index = Some(index as u32);
        child.metadata.insert("ligand_name".into(), serde_json::json!(ligand.name));
        children.push(child);
    }
    parent.batch_child_ids = children.iter().map(|c| c.id.clone()).collect();
    parent.batch_progress = Some(omtx_types::batch::BatchProgress::new(children.len() as u32));

    state.quota.reserve_resources(&req.user_id, tier, &batch_id, estimate, true).await;
    state.job_store.create_batch(parent, children.clone()).await?;

    state
        .storage
        .store_batch_metadata_atomic(
            &req.user_id,
            &batch_id,
            &serde_json::json!({
                "batch_name": req.batch_name,
                "model": req.model,
                "ligand_count": children.len(),
                "priority": req.priority,
            }),
        )
        .await?;

    state.job_store.transition_status(&batch_id, JobStatus::Queued).await?;
    state.job_store.transition_status(&batch_id, JobStatus::Running).await?;

    let dispatch_targets: Vec<(String, JobType)> = children.iter().map(|c| (c.id.clone(), JobType::BatchChild)).collect();
    let results = state.dispatcher.dispatch_batch_children(&batch_id, dispatch_targets, &req.user_id).await;

    for (child_id, outcome) in &results {
        match outcome {
            Ok(_) => {
                if let Err(e) = state.job_store.transition_status(child_id, JobStatus::Queued).await {
                    warn!(child_id, error = %e, "dispatched batch child could not be marked queued");
                    continue;
                }
                if let Err(e) = state.job_store.transition_status(child_id, JobStatus::Running).await {
                    warn!(child_id, error = %e, "dispatched batch child could not be marked running");
                }
            }
            Err(e) => {
                warn!(child_id, error = %e, "batch child dispatch failed");
                if let Err(qe) = state.job_store.transition_status(child_id, JobStatus::Queued).await {
                    warn!(child_id, error = %qe, "failed batch child could not be marked queued before failing");
                }
                if let Err(fe) = state
                    .job_store
                    .transition_with_error(child_id, JobStatus::Failed, JobError::new("dispatch_failed", e.to_string()))
                    .await
                {
                    warn!(child_id, error = %fe, "failed to persist batch child dispatch failure");
                }
                if let Err(agg_err) = state.aggregator.on_child_terminal(&batch_id, child_id, ChildOutcome::Failed).await {
                    warn!(child_id, error = %agg_err, "failed to record dispatch failure against batch progress");
                }
            }
        }
    }

    info!(batch_id, user_id = %req.user_id, ligands = children.len(), "batch submitted");
    Ok(Json(PredictBatchResponse {
        batch_id,
        child_ids: children.into_iter().map(|c| c.id).collect(),
        status: JobStatus::Running,
    }))
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Json<JobResponse>, ApiError> {
    let _decision = state.rate_limiter.check(&job_id, RouteClass::Read).await;
    let record = state.job_store.require(&job_id).await?;
    Ok(Json(JobResponse::from_record(&record)))
}

async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<Json<JobListResponse>, ApiError> {
    let _decision = state.rate_limiter.check(&query.user_id, RouteClass::Read).await;
    let mut records = state.job_store.list_by_user(&query.user_id, None).await?;

    if let Some(model) = &query.model {
        records.retain(|r| &r.model_name == model);
    }
    if let Some(status) = &query.status {
        records.retain(|r| format!("{:?}", r.status).to_ascii_lowercase() == status.to_ascii_lowercase());
    }

    let total = records.len();
    let page = query.page.max(1);
    let limit = query.limit.max(1);
    let start = ((page - 1) * limit) as usize;
    let page_records: Vec<_> = records.into_iter().skip(start).take(limit as usize).collect();

    Ok(Json(JobListResponse {
        jobs: page_records.iter().map(JobResponse::from_record).collect(),
        page,
        limit,
        total,
    }))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<JobResponse>, ApiError> {
    let record = state.job_store.require(&job_id).await?;
    if let Some(caller) = &owner.user_id {
        if caller != &record.user_id {
            return Err(CoreError::new(omtx_types::error::ErrorKind::Forbidden, "job belongs to a different user").into());
        }
    }

    let tier = state.tier_for(&record.user_id);
    let updated = state.job_store.transition_status(&job_id, JobStatus::Cancelled).await?;

    if let Some(parent_id) = &record.batch_parent_id {
        // Quota for a batch is reserved once, in aggregate, under the
        // parent's id — a single child's cancellation only releases it
        // once every sibling has also reached a terminal status.
        if let Err(e) = state.aggregator.on_child_terminal(parent_id, &job_id, ChildOutcome::Cancelled).await {
            warn!(job_id, parent_id, error = %e, "failed to notify aggregator of cancellation");
        }
        release_batch_quota_if_terminal(&state, parent_id, tier).await;
    } else {
        let _ = state.quota.release_resources(&record.user_id, tier, &job_id, None, false).await;
    }

    info!(job_id, "job cancelled");
    Ok(Json(JobResponse::from_record(&updated)))
}

/// Releases a batch's single aggregate quota reservation once its parent
/// has reached a terminal status. Safe to call redundantly — a repeat
/// release just hits `NoActiveReservation`, which is logged and ignored.
async fn release_batch_quota_if_terminal(state: &AppState, parent_id: &str, tier: omtx_types::quota::UserTier) {
    match state.job_store.require(parent_id).await {
        Ok(parent) if parent.status.is_terminal() => {
            if let Err(e) = state.quota.release_resources(&parent.user_id, tier, parent_id, None, true).await {
                warn!(parent_id, error = %e, "batch quota release skipped");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(parent_id, error = %e, "could not reload parent to check batch quota release"),
    }
}

async fn get_batch(State(state): State<AppState>, Path(batch_id): Path<String>) -> Result<Json<BatchResponse>, ApiError> {
    let _decision = state.rate_limiter.check(&batch_id, RouteClass::Read).await;
    let record = state.job_store.require(&batch_id).await?;
    Ok(Json(BatchResponse::from_record(&record)))
}

async fn list_batches(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<Json<BatchListResponse>, ApiError> {
    let _decision = state.rate_limiter.check(&query.user_id, RouteClass::Read).await;
    let mut records = state.job_store.list_by_user(&query.user_id, Some(JobType::BatchParent)).await?;

    if let Some(model) = &query.model {
        records.retain(|r| &r.model_name == model);
    }

    let total = records.len();
    let page = query.page.max(1);
    let limit = query.limit.max(1);
    let start = ((page - 1) * limit) as usize;
    let page_records: Vec<_> = records.into_iter().skip(start).take(limit as usize).collect();

    Ok(Json(BatchListResponse {
        batches: page_records.iter().map(BatchResponse::from_record).collect(),
        page,
        limit,
        total,
    }))
}

async fn delete_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<BatchResponse>, ApiError> {
    let record = state.job_store.require(&batch_id).await?;
    if let Some(caller) = &owner.user_id {
        if caller != &record.user_id {
            return Err(CoreError::new(omtx_types::error::ErrorKind::Forbidden, "batch belongs to a different user").into());
        }
    }

    let children = state.job_store.list_batch_children(&batch_id).await?;
    let tier = state.tier_for(&record.user_id);
    for child in children.iter().filter(|c| !c.status.is_terminal()) {
        let _ = state.job_store.transition_status(&child.id, JobStatus::Cancelled).await;
    }

    let updated = state.job_store.transition_status(&batch_id, JobStatus::Cancelled).await?;
    let _ = state.quota.release_resources(&record.user_id, tier, &batch_id, None, true).await;
    state.aggregator.forget(&batch_id);
    info!(batch_id, "batch cancelled");
    Ok(Json(BatchResponse::from_record(&updated)))
}

async fn get_job_file(
    State(state): State<AppState>,
    Path((job_id, kind)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let decision = state.rate_limiter.check(&job_id, RouteClass::Download).await;
    if !decision.allowed {
        return Err(CoreError::new(
            omtx_types::error::ErrorKind::RateLimited,
            format!("rate limit exceeded, retry after {:?}", decision.retry_after),
        )
        .into());
    }

    let record = state.job_store.require(&job_id).await?;
    let artifact_kind = match kind.as_str() {
        "json" | "results" => ArtifactKind::Results,
        "cif" | "pdb" | "structure" => ArtifactKind::Structure,
        "metadata" => ArtifactKind::Metadata,
        other => {
            return Err(CoreError::validation(format!("unknown file kind `{other}`")).into());
        }
    };

    let bytes = if let Some(batch_id) = &record.batch_parent_id {
        state
            .storage
            .read_key(&paths::batch_child_artifact_path(&record.user_id, batch_id, &job_id, artifact_kind))
            .await?
    } else {
        state.storage.read_artifact(&record.user_id, &job_id, artifact_kind).await?
    };

    let filename = format!("{job_id}.{}", kind);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"").parse().unwrap());
    Ok((StatusCode::OK, headers, bytes).into_response())
}

async fn export_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let decision = state.rate_limiter.check(&batch_id, RouteClass::Download).await;
    if !decision.allowed {
        return Err(CoreError::new(
            omtx_types::error::ErrorKind::RateLimited,
            format!("rate limit exceeded, retry after {:?}", decision.retry_after),
        )
        .into());
    }

    let record = state.job_store.require(&batch_id).await?;

    let (bytes, content_type, filename) = match query.format.as_str() {
        "zip" => (
            state.aggregator.export_zip(&record.user_id, &batch_id).await?,
            "application/zip",
            format!("{batch_id}.zip"),
        ),
        "csv" => (
            state.storage.read_key(&paths::batch_csv_path(&record.user_id, &batch_id)).await?,
            "text/csv",
            format!("{batch_id}.csv"),
        ),
        _ => (
            state.storage.read_key(&paths::batch_aggregated_path(&record.user_id, &batch_id)).await?,
            "application/json",
            format!("{batch_id}.json"),
        ),
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type.parse().unwrap());
    headers.insert(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"").parse().unwrap());
    Ok((StatusCode::OK, headers, bytes).into_response())
}

async fn system_status(State(state): State<AppState>) -> Json<SystemStatusResponse> {
    let quota_metrics = state.quota.metrics();
    let statistics = serde_json::json!({
        "uptime_seconds": (chrono::Utc::now() - state.started_at).num_seconds(),
        "dispatched_total": state.dispatcher.dispatched_total(),
        "rate_limit_fallback_used": state.rate_limiter.fallback_used(),
        "quota_checks": quota_metrics.quota_checks,
        "quota_violations": quota_metrics.quota_violations,
        "quota_fallback_used": quota_metrics.fallback_used,
    });
    let components = serde_json::json!({
        "job_store": "ok",
        "storage_gateway": "ok",
        "rate_limiter": if state.rate_limiter.fallback_used() > 0 { "degraded" } else { "ok" },
    });

    Json(SystemStatusResponse {
        status: "ok",
        api_version: "v1",
        components,
        statistics,
    })
}

async fn completion_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CompletionWebhookRequest>,
) -> Result<StatusCode, ApiError> {
    // The worker mints its callback token against the same shared service
    // identity the dispatcher used to reach it in the first place — there
    // is no separate "this API's own audience" setting, so the service
    // account string doubles as both signer and audience here.
    let authenticator = crate::auth::WebhookAuthenticator::new(
        state.config.service_account.clone().into_bytes(),
        state.config.service_account.clone(),
        state.config.dev_auth,
    );
    authenticator.verify(&headers)?;

    let dedup_key = body
        .modal_call_id
        .clone()
        .or_else(|| body.job_id.clone())
        .ok_or_else(|| CoreError::validation("completion webhook requires job_id or modal_call_id"))?;

    if state.processed_calls.check_and_insert(&dedup_key).await {
        info!(dedup_key = %dedup_key, "duplicate completion webhook, ignoring");
        return Ok(StatusCode::OK);
    }

    let job_id = body
        .job_id
        .clone()
        .ok_or_else(|| CoreError::validation("completion webhook requires job_id to resolve the job"))?;
    let record = state.job_store.require(&job_id).await?;
    let tier = state.tier_for(&record.user_id);

    match body.status {
        CompletionStatus::Success => {
            state
                .job_store
                .attach_output(&job_id, &record.user_id, body.result.clone(), record.batch_parent_id.as_deref())
                .await?;
            state.job_store.transition_status(&job_id, JobStatus::Completed).await?;

            if let Some(parent_id) = &record.batch_parent_id {
                state.aggregator.on_child_terminal(parent_id, &job_id, ChildOutcome::Completed).await?;
                release_batch_quota_if_terminal(&state, parent_id, tier).await;
            } else {
                let _ = state.quota.release_resources(&record.user_id, tier, &job_id, None, false).await;
            }
        }
        CompletionStatus::Failed => {
            let message = body.error.clone().unwrap_or_else(|| "unspecified".to_string());
            warn!(job_id, error = %message, "worker reported job failure");
            let mut job_error = JobError::new("worker_reported_failure", message);
            if !body.metadata.is_null() {
                job_error = job_error.with_details(body.metadata.clone());
            }
            state.job_store.transition_with_error(&job_id, JobStatus::Failed, job_error).await?;

            if let Some(parent_id) = &record.batch_parent_id {
                state.aggregator.on_child_terminal(parent_id, &job_id, ChildOutcome::Failed).await?;
                release_batch_quota_if_terminal(&state, parent_id, tier).await;
            } else {
                let _ = state.quota.release_resources(&record.user_id, tier, &job_id, None, false).await;
            }
        }
    }

    Ok(StatusCode::OK)
}
