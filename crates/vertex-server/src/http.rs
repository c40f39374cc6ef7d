use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::Level;

use vertex_observability::{emit_event, ObservabilityEvent, ProcessKind};
use vertex_orchestrator::{Batch, BatchConfig, Task, TaskStatus};
use vertex_types::{ModelCapability, TaskPriority, VertexError};

use crate::AppState;

const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_RETRIES: u32 = 10;
const MAX_BATCH_SIZE: usize = 100;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/providers", get(list_providers))
        .route("/providers/{id}", get(get_provider))
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(get_task).delete(cancel_task))
        .route("/batches", post(create_batch))
        .route("/batches/{id}", get(get_batch).delete(cancel_batch))
        .route("/batches/{id}/tasks", get(get_batch_tasks))
        .route("/resources/usage", get(resource_usage))
        .route("/resources/optimize", post(optimize_resources))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Error mapping
// ============================================================================

struct ApiError(VertexError);

impl From<VertexError> for ApiError {
    fn from(err: VertexError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VertexError::NotFound(_) => StatusCode::NOT_FOUND,
            VertexError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VertexError::AlreadyExists(_) => StatusCode::CONFLICT,
            VertexError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct TaskRequest {
    description: String,
    #[serde(default)]
    input: Map<String, Value>,
    priority: Option<String>,
    max_retries: Option<u32>,
    timeout_seconds: Option<u64>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    required_capabilities: Vec<String>,
}

impl TaskRequest {
    fn into_task(self) -> Result<Task, VertexError> {
        if self.description.trim().is_empty() {
            return Err(VertexError::InvalidInput(
                "task description must not be empty".to_string(),
            ));
        }

        let mut task = Task::new(self.description).with_input(self.input);

        if let Some(priority) = self.priority {
            task = task.with_priority(priority.parse::<TaskPriority>()?);
        }
        if let Some(max_retries) = self.max_retries {
            if max_retries > MAX_RETRIES {
                return Err(VertexError::InvalidInput(format!(
                    "max_retries must be at most {MAX_RETRIES}"
                )));
            }
            task = task.with_max_retries(max_retries);
        }
        if let Some(timeout) = self.timeout_seconds {
            if !(1..=MAX_TIMEOUT_SECS).contains(&timeout) {
                return Err(VertexError::InvalidInput(format!(
                    "timeout_seconds must be between 1 and {MAX_TIMEOUT_SECS}"
                )));
            }
            task = task.with_timeout_secs(timeout);
        }

        let capabilities = self
            .required_capabilities
            .iter()
            .map(|c| c.parse::<ModelCapability>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(task
            .with_dependencies(self.dependencies)
            .with_required_capabilities(capabilities))
    }
}

#[derive(Debug, Default, Deserialize)]
struct BatchConfigRequest {
    max_batch_size: Option<usize>,
    min_batch_size: Option<usize>,
    max_concurrent_tasks: Option<usize>,
    #[serde(default)]
    stop_on_first_failure: bool,
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    tasks: Vec<TaskRequest>,
    #[serde(default)]
    config: BatchConfigRequest,
}

impl BatchRequest {
    fn into_parts(self) -> Result<(Vec<Task>, BatchConfig), VertexError> {
        if self.tasks.is_empty() || self.tasks.len() > MAX_BATCH_SIZE {
            return Err(VertexError::InvalidInput(format!(
                "batch must contain between 1 and {MAX_BATCH_SIZE} tasks"
            )));
        }

        let mut config = BatchConfig::default();
        if let Some(size) = self.config.max_batch_size {
            if !(1..=MAX_BATCH_SIZE).contains(&size) {
                return Err(VertexError::InvalidInput(format!(
                    "max_batch_size must be between 1 and {MAX_BATCH_SIZE}"
                )));
            }
            config.max_batch_size = size;
        }
        if let Some(size) = self.config.min_batch_size {
            config.min_batch_size = size;
        }
        if let Some(limit) = self.config.max_concurrent_tasks {
            if limit == 0 {
                return Err(VertexError::InvalidInput(
                    "max_concurrent_tasks must be at least 1".to_string(),
                ));
            }
            config.max_concurrent_tasks = limit;
        }
        config.stop_on_first_failure = self.config.stop_on_first_failure;

        let tasks = self
            .tasks
            .into_iter()
            .map(TaskRequest::into_task)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((tasks, config))
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
    }))
}

async fn provider_summary(provider_id: &str, provider: &dyn vertex_providers::Provider) -> Value {
    let info = provider.info();
    let models = provider.list_models();

    let mut capabilities: Vec<ModelCapability> = models
        .iter()
        .flat_map(|m| m.capabilities.iter().copied())
        .collect();
    capabilities.sort_by_key(|c| c.as_str());
    capabilities.dedup();

    json!({
        "provider_id": provider_id,
        "name": info.name,
        "description": info.description,
        "capabilities": capabilities,
        "models": models,
    })
}

async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    let mut summaries = Vec::new();
    for (provider_id, provider) in state.registry.snapshot().await {
        summaries.push(provider_summary(&provider_id, provider.as_ref()).await);
    }
    Json(Value::Array(summaries))
}

async fn get_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let provider = state.registry.get(&provider_id).await?;
    Ok(Json(
        provider_summary(&provider_id, provider.as_ref()).await,
    ))
}

async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> ApiResult<Json<Task>> {
    let task = request.into_task()?;
    let task_id = state.orchestrator.submit(task).await?;

    // Task-level failures (provider errors, timeouts, poisoned dependencies)
    // are reflected in the returned snapshot rather than an error status.
    if let Err(e) = state.orchestrator.execute(&task_id).await {
        match e {
            VertexError::Provider(_) | VertexError::Timeout(_) | VertexError::Cancelled(_) => {}
            VertexError::NoProvider(_) | VertexError::NoAffordable(_) => {}
            other => return Err(other.into()),
        }
    }

    let snapshot = state
        .orchestrator
        .get_status(&task_id)
        .await
        .ok_or_else(|| VertexError::Internal(format!("task '{task_id}' vanished")))?;

    emit_event(
        Level::INFO,
        ProcessKind::Engine,
        ObservabilityEvent {
            event: "task_executed",
            component: "http",
            task_id: Some(&snapshot.id),
            batch_id: None,
            workflow_id: None,
            provider_id: snapshot.assigned_provider.as_deref(),
            model_id: snapshot.assigned_model.as_deref(),
            status: Some(status_label(snapshot.status)),
            detail: snapshot.error.as_deref(),
        },
    );
    Ok(Json(snapshot))
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = state
        .orchestrator
        .get_status(&task_id)
        .await
        .ok_or_else(|| VertexError::NotFound(format!("task '{task_id}'")))?;
    Ok(Json(task))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = state
        .orchestrator
        .get_status(&task_id)
        .await
        .ok_or_else(|| VertexError::NotFound(format!("task '{task_id}'")))?;

    if !state.orchestrator.cancel(&task_id).await {
        return Err(VertexError::InvalidInput(format!(
            "task '{task_id}' is already {:?}",
            task.status
        ))
        .into());
    }
    Ok(Json(json!({"status": "canceled"})))
}

async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<Batch>> {
    if !state.config.feature_enabled("advanced_batching") {
        return Err(VertexError::FeatureDisabled("advanced_batching".to_string()).into());
    }

    let (tasks, config) = request.into_parts()?;
    let batch_id = state.batches.create_batch(tasks, config).await?;
    let batch = state.batches.execute_batch(&batch_id).await?;
    Ok(Json(batch))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<Batch>> {
    let batch = state
        .batches
        .get_status(&batch_id)
        .await
        .ok_or_else(|| VertexError::NotFound(format!("batch '{batch_id}'")))?;
    Ok(Json(batch))
}

async fn get_batch_tasks(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.batches.get_tasks(&batch_id).await?))
}

async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.batches.cancel(&batch_id).await?;
    Ok(Json(json!({"status": "canceled"})))
}

async fn resource_usage(State(state): State<AppState>) -> Json<Value> {
    let report = state.resources.usage_report(None, None, None).await;
    Json(json!(report))
}

async fn optimize_resources(State(state): State<AppState>) -> Json<Value> {
    let plan = state.resources.optimize_allocation().await;
    Json(json!({
        "current": plan.current,
        "optimized": plan.optimized,
        "total": plan.total,
    }))
}
