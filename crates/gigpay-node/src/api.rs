use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use gigpay_engine::{grade, Grade, PaymentEngine, TaskCompletionEvent};
use gigpay_ledger::{Loan, LoanStatus, ReputationCause, Stream, StreamStatus, TaskKind, TaskStatus, WorkerStatus};
use gigpay_types::{LedgerError, LoanId, PlatformId, StreamId, TaskId, TxId, UsdcAmount, WorkerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<PaymentEngine>,
}

/// The UI layer only ever sees a stable error code plus a message,
/// never partial internal state.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let status = match e {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Conflict(_) | LedgerError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            LedgerError::ExternalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::ReconciliationMismatch { .. }
            | LedgerError::TerminalFailure { .. }
            | LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                error: e.error_code(),
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Deserialize)]
pub struct RegisterWorkerRequest {
    pub wallet: String,
}

#[derive(Deserialize)]
pub struct RegisterPlatformRequest {
    pub name: String,
    pub api_key: String,
    pub webhook_url: String,
    pub webhook_secret: String,
}

#[derive(Deserialize)]
pub struct OpenTaskRequest {
    pub platform_id: u64,
    pub worker_id: u64,
    pub kind: TaskKind,
    pub payment_usdc: f64,
}

#[derive(Deserialize)]
pub struct CompleteTaskRequest {
    pub worker_id: u64,
    pub platform_id: u64,
    pub amount_usdc: f64,
    pub rating: Option<f64>,
}

#[derive(Deserialize)]
pub struct OpenStreamRequest {
    pub contract_stream_id: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub release_interval_secs: u64,
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub amount_usdc: f64,
}

#[derive(Deserialize)]
pub struct RetryRequest {
    pub actor: String,
}

#[derive(Deserialize)]
pub struct EligibilityQuery {
    pub amount_usdc: f64,
}

#[derive(Serialize)]
pub struct WorkerResponse {
    pub worker_id: u64,
    pub wallet: String,
}

#[derive(Serialize)]
pub struct PlatformResponse {
    pub platform_id: u64,
    pub name: String,
}

#[derive(Serialize)]
pub struct TaskResponse {
    pub task_id: u64,
    pub payment_usdc: f64,
    pub status: TaskStatus,
}

#[derive(Serialize)]
pub struct CompletionResponse {
    pub duplicate: bool,
    pub transaction_id: Option<TxId>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub worker_id: u64,
    pub wallet: String,
    pub total_earned_usdc: f64,
    pub completed_tasks: u64,
    pub status: WorkerStatus,
}

#[derive(Serialize)]
pub struct ReputationEventInfo {
    pub cause: ReputationCause,
    pub points_delta: i64,
    pub previous_score: i64,
    pub new_score: i64,
    pub actor: String,
    pub reason: Option<String>,
    pub created_at: i64,
}

#[derive(Serialize)]
pub struct ReputationResponse {
    pub worker_id: u64,
    pub score: i64,
    pub grade: Grade,
    pub events: Vec<ReputationEventInfo>,
}

#[derive(Serialize)]
pub struct LoanInfo {
    pub loan_id: LoanId,
    pub principal_usdc: f64,
    pub fee_usdc: f64,
    pub total_owed_usdc: f64,
    pub remaining_usdc: f64,
    pub fee_percentage: u64,
    pub status: LoanStatus,
    pub due_date: i64,
}

impl LoanInfo {
    fn from_loan(loan: &Loan) -> Self {
        Self {
            loan_id: loan.id,
            principal_usdc: loan.principal.to_usdc(),
            fee_usdc: loan.fee.to_usdc(),
            total_owed_usdc: loan.total_owed.to_usdc(),
            remaining_usdc: loan.remaining.to_usdc(),
            fee_percentage: loan.fee_percentage,
            status: loan.status,
            due_date: loan.due_date,
        }
    }
}

#[derive(Serialize)]
pub struct LoanStatusResponse {
    pub outstanding: Option<LoanInfo>,
    pub history: Vec<LoanInfo>,
}

#[derive(Serialize)]
pub struct AdvanceResponse {
    pub loan: LoanInfo,
    pub transaction_id: TxId,
}

#[derive(Serialize)]
pub struct StreamResponse {
    pub stream_id: u64,
    pub task_id: u64,
    pub worker_id: u64,
    pub contract_stream_id: u64,
    pub total_usdc: f64,
    pub released_usdc: f64,
    pub claimed_usdc: f64,
    pub start_time: i64,
    pub end_time: i64,
    pub next_release_at: i64,
    pub status: StreamStatus,
}

impl StreamResponse {
    fn from_stream(stream: &Stream) -> Self {
        Self {
            stream_id: stream.id.value(),
            task_id: stream.task_id.value(),
            worker_id: stream.worker_id.value(),
            contract_stream_id: stream.contract_stream_id,
            total_usdc: stream.total.to_usdc(),
            released_usdc: stream.released.to_usdc(),
            claimed_usdc: stream.claimed.to_usdc(),
            start_time: stream.start_time,
            end_time: stream.end_time,
            next_release_at: stream.next_release_at,
            status: stream.status,
        }
    }
}

pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/workers", post(register_worker))
        .route("/v1/platforms", post(register_platform))
        .route("/v1/tasks", post(open_task))
        .route("/v1/tasks/:id/complete", post(complete_task))
        .route("/v1/tasks/:id/stream", post(open_stream))
        .route("/v1/transactions/:id/retry", post(retry_transaction))
        .route("/v1/workers/:id/advance", post(request_advance))
        .route("/v1/workers/:id/balance", get(get_balance))
        .route("/v1/workers/:id/reputation", get(get_reputation))
        .route("/v1/workers/:id/eligibility", get(get_eligibility))
        .route("/v1/workers/:id/loan", get(get_loan))
        .route("/v1/streams/:id", get(get_stream))
        .with_state(Arc::new(state))
}

pub fn start_api_server(engine: Arc<PaymentEngine>, host: String, port: u16) -> JoinHandle<()> {
    let app = routes(ApiState { engine });
    let addr = format!("{}:{}", host, port);
    info!(addr = %addr, "📡 Starting API server");

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind API server");
        axum::serve(listener, app).await.expect("API server failed");
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register_worker(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RegisterWorkerRequest>,
) -> ApiResult<WorkerResponse> {
    let worker = state
        .engine
        .register_worker(&req.wallet, Utc::now().timestamp())
        .await?;
    Ok(Json(WorkerResponse {
        worker_id: worker.id.value(),
        wallet: worker.wallet.to_hex(),
    }))
}

async fn register_platform(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RegisterPlatformRequest>,
) -> ApiResult<PlatformResponse> {
    let platform = state
        .engine
        .register_platform(
            &req.name,
            &req.api_key,
            &req.webhook_url,
            &req.webhook_secret,
            Utc::now().timestamp(),
        )
        .await?;
    Ok(Json(PlatformResponse {
        platform_id: platform.id.value(),
        name: platform.name,
    }))
}

async fn open_task(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<OpenTaskRequest>,
) -> ApiResult<TaskResponse> {
    let task = state
        .engine
        .open_task(
            PlatformId::new(req.platform_id),
            WorkerId::new(req.worker_id),
            req.kind,
            UsdcAmount::from_usdc(req.payment_usdc),
            Utc::now().timestamp(),
        )
        .await?;
    Ok(Json(TaskResponse {
        task_id: task.id.value(),
        payment_usdc: task.payment.to_usdc(),
        status: task.status,
    }))
}

/// The inbound task-completion boundary. Delivery is at-least-once, so
/// re-posting the same completion returns the original outcome.
async fn complete_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<u64>,
    Json(req): Json<CompleteTaskRequest>,
) -> ApiResult<CompletionResponse> {
    let outcome = state
        .engine
        .pipeline
        .on_task_completed(
            TaskCompletionEvent {
                task_id: TaskId::new(task_id),
                worker_id: WorkerId::new(req.worker_id),
                platform_id: PlatformId::new(req.platform_id),
                amount: UsdcAmount::from_usdc(req.amount_usdc),
                rating: req.rating,
            },
            Utc::now().timestamp(),
        )
        .await?;
    Ok(Json(CompletionResponse {
        duplicate: outcome.duplicate,
        transaction_id: outcome.payout.map(|tx| tx.id),
    }))
}

async fn open_stream(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<u64>,
    Json(req): Json<OpenStreamRequest>,
) -> ApiResult<StreamResponse> {
    let task_id = TaskId::new(task_id);
    let task = state
        .engine
        .store
        .storage
        .get_task(task_id)
        .await?
        .ok_or_else(|| ApiError::from(LedgerError::NotFound(format!("Task {}", task_id))))?;

    let stream = state
        .engine
        .scheduler
        .create_stream(
            task_id,
            task.worker_id,
            req.contract_stream_id,
            task.payment,
            req.start_time,
            req.end_time,
            req.release_interval_secs,
        )
        .await?;
    Ok(Json(StreamResponse::from_stream(&stream)))
}

/// Operator action for a terminally failed payout; the fresh attempt is
/// derived from the originating task, never the failed transaction.
async fn retry_transaction(
    State(state): State<Arc<ApiState>>,
    Path(tx_id): Path<u64>,
    Json(req): Json<RetryRequest>,
) -> ApiResult<CompletionResponse> {
    let tx_id = TxId::new(tx_id);
    let tx = state
        .engine
        .store
        .storage
        .get_transaction(tx_id)
        .await?
        .ok_or_else(|| ApiError::from(LedgerError::NotFound(format!("Transaction {}", tx_id))))?;
    let task_id = tx.task_id.ok_or_else(|| {
        ApiError::from(LedgerError::Validation(format!(
            "Transaction {} is not task-bound",
            tx_id
        )))
    })?;

    let fresh = state
        .engine
        .pipeline
        .retry_failed_payout(task_id, &req.actor, Utc::now().timestamp())
        .await?;
    Ok(Json(CompletionResponse {
        duplicate: false,
        transaction_id: Some(fresh.id),
    }))
}

async fn request_advance(
    State(state): State<Arc<ApiState>>,
    Path(worker_id): Path<u64>,
    Json(req): Json<AdvanceRequest>,
) -> ApiResult<AdvanceResponse> {
    let now = Utc::now().timestamp();
    let (loan, tx) = state
        .engine
        .loans
        .request_advance(
            WorkerId::new(worker_id),
            UsdcAmount::from_usdc(req.amount_usdc),
            now,
        )
        .await?;
    let tx = state.engine.transactions.submit(tx.id, now).await?;
    Ok(Json(AdvanceResponse {
        loan: LoanInfo::from_loan(&loan),
        transaction_id: tx.id,
    }))
}

async fn get_balance(
    State(state): State<Arc<ApiState>>,
    Path(worker_id): Path<u64>,
) -> ApiResult<BalanceResponse> {
    let worker = state
        .engine
        .store
        .storage
        .get_worker(WorkerId::new(worker_id))
        .await?
        .ok_or_else(|| ApiError::from(LedgerError::NotFound(format!("Worker {}", worker_id))))?;
    Ok(Json(BalanceResponse {
        worker_id: worker.id.value(),
        wallet: worker.wallet.to_hex(),
        total_earned_usdc: worker.total_earned.to_usdc(),
        completed_tasks: worker.completed_tasks,
        status: worker.status,
    }))
}

async fn get_reputation(
    State(state): State<Arc<ApiState>>,
    Path(worker_id): Path<u64>,
) -> ApiResult<ReputationResponse> {
    let worker_id = WorkerId::new(worker_id);
    let worker = state
        .engine
        .store
        .storage
        .get_worker(worker_id)
        .await?
        .ok_or_else(|| ApiError::from(LedgerError::NotFound(format!("Worker {}", worker_id))))?;

    let events = state
        .engine
        .reputation
        .breakdown(worker_id)
        .await?
        .into_iter()
        .map(|e| ReputationEventInfo {
            cause: e.cause,
            points_delta: e.points_delta,
            previous_score: e.previous_score,
            new_score: e.new_score,
            actor: e.actor,
            reason: e.reason,
            created_at: e.created_at,
        })
        .collect();

    Ok(Json(ReputationResponse {
        worker_id: worker_id.value(),
        score: worker.reputation_score,
        grade: grade(worker.reputation_score),
        events,
    }))
}

async fn get_eligibility(
    State(state): State<Arc<ApiState>>,
    Path(worker_id): Path<u64>,
    Query(query): Query<EligibilityQuery>,
) -> ApiResult<serde_json::Value> {
    let report = state
        .engine
        .loans
        .check_eligibility(
            WorkerId::new(worker_id),
            UsdcAmount::from_usdc(query.amount_usdc),
            Utc::now().timestamp(),
        )
        .await?;
    let eligible = report.eligible();
    let mut value = serde_json::to_value(&report)
        .map_err(|e| ApiError::from(LedgerError::Storage(e.to_string())))?;
    value["eligible"] = serde_json::Value::Bool(eligible);
    Ok(Json(value))
}

async fn get_loan(
    State(state): State<Arc<ApiState>>,
    Path(worker_id): Path<u64>,
) -> ApiResult<LoanStatusResponse> {
    let worker_id = WorkerId::new(worker_id);
    let outstanding = state
        .engine
        .store
        .storage
        .outstanding_loan(worker_id)
        .await?
        .map(|l| LoanInfo::from_loan(&l));
    let history = state
        .engine
        .store
        .storage
        .loans_by_worker(worker_id)
        .await?
        .iter()
        .map(LoanInfo::from_loan)
        .collect();
    Ok(Json(LoanStatusResponse {
        outstanding,
        history,
    }))
}

async fn get_stream(
    State(state): State<Arc<ApiState>>,
    Path(stream_id): Path<u64>,
) -> ApiResult<StreamResponse> {
    let stream = state
        .engine
        .store
        .storage
        .get_stream(StreamId::new(stream_id))
        .await?
        .ok_or_else(|| ApiError::from(LedgerError::NotFound(format!("Stream {}", stream_id))))?;
    Ok(Json(StreamResponse::from_stream(&stream)))
}
