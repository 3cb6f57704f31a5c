//! REST API server for the expense assistant
//!
//! Exposes the chat boundary and direct ledger access for a frontend.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::agent::{SessionContext, SessionOrchestrator};
use crate::ledger::{
    budget_status, spending_summary, validate_budget, weekly_summary, LedgerReader, LedgerWriter,
};
use crate::models::{BudgetSettings, LedgerEntry};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub user_id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    pub user_id: Option<i64>,
    pub amount: f64,
    pub category: String,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    #[serde(default)]
    pub recurring: bool,
    pub location: Option<String>,
    pub payment_method: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub user_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub user_id: Option<i64>,
    /// Defaults to the trailing week
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UserParams {
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BudgetRequest {
    pub user_id: Option<i64>,
    pub monthly_budget: f64,
    pub savings_goal: f64,
    pub actual_savings: f64,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
    pub default_user_id: i64,
}

impl ExpenseRequest {
    fn into_entry(self, default_user_id: i64) -> Result<LedgerEntry, String> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err("amount must be greater than zero".to_string());
        }
        if self.category.trim().is_empty() {
            return Err("category is required".to_string());
        }
        if self.payment_method.trim().is_empty() {
            return Err("payment_method is required".to_string());
        }

        Ok(LedgerEntry {
            user_id: self.user_id.unwrap_or(default_user_id),
            amount: self.amount,
            category: self.category.trim().to_string(),
            date: self.date.unwrap_or_else(|| Utc::now().date_naive()),
            description: self.description.filter(|d| !d.trim().is_empty()),
            recurring: self.recurring,
            location: self.location.filter(|l| !l.trim().is_empty()),
            payment_method: self.payment_method.trim().to_string(),
        })
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.session_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("session_id is required".into())),
        );
    }
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("message is required".into())),
        );
    }

    let session = SessionContext::new(
        req.session_id.trim(),
        req.user_id.unwrap_or(state.default_user_id),
    );
    info!(session_id = %session.session_id, user_id = session.user_id, "Chat request");

    let reply = state.orchestrator.submit(&req.message, &session).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "reply": reply,
            "session_id": session.session_id,
        }))),
    )
}

async fn add_expense(
    State(state): State<ApiState>,
    Json(req): Json<ExpenseRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let entry = match req.into_entry(state.default_user_id) {
        Ok(entry) => entry,
        Err(message) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message))),
    };

    match state.writer.add_entry(&entry).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(serde_json::json!({
                "id": id,
                "entry": entry,
            }))),
        ),
        Err(e) => {
            error!(error = %e, "Direct expense insert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to add expense".into())),
            )
        }
    }
}

async fn list_expenses(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = params.user_id.unwrap_or(state.default_user_id);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match state.reader.recent_entries(user_id, limit).await {
        Ok(rows) => (StatusCode::OK, Json(ApiResponse::success(rows))),
        Err(e) => {
            error!(error = %e, user_id, "Listing expenses failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to load expenses".into())),
            )
        }
    }
}

async fn expense_summary(
    State(state): State<ApiState>,
    Query(params): Query<SummaryParams>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = params.user_id.unwrap_or(state.default_user_id);
    let today = Utc::now().date_naive();

    let summary = match params.days {
        None => weekly_summary(state.reader.as_ref(), user_id, today).await,
        Some(days) if days <= 0 => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("days must be positive".into())),
            )
        }
        Some(days) => spending_summary(state.reader.as_ref(), user_id, today, days).await,
    };

    match summary {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))),
        Err(e) => {
            error!(error = %e, user_id, "Spending summary failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to summarize expenses".into())),
            )
        }
    }
}

async fn get_budget(
    State(state): State<ApiState>,
    Query(params): Query<UserParams>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = params.user_id.unwrap_or(state.default_user_id);
    let today = Utc::now().date_naive();

    match budget_status(state.reader.as_ref(), user_id, today).await {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::success(status))),
        Err(e) => {
            error!(error = %e, user_id, "Budget status failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to load budget".into())),
            )
        }
    }
}

async fn update_budget(
    State(state): State<ApiState>,
    Json(req): Json<BudgetRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let settings = BudgetSettings {
        user_id: req.user_id.unwrap_or(state.default_user_id),
        monthly_budget: req.monthly_budget,
        savings_goal: req.savings_goal,
        actual_savings: req.actual_savings,
    };
    if let Err(e) = validate_budget(&settings) {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string())));
    }

    match state.writer.save_budget_settings(&settings).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(settings))),
        Err(e) => {
            error!(error = %e, user_id = settings.user_id, "Saving budget failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to save budget".into())),
            )
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/expenses", post(add_expense).get(list_expenses))
        .route("/api/expenses/summary", get(expense_summary))
        .route("/api/budget", get(get_budget).put(update_budget))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::handlers::Handlers;
    use crate::ledger::InMemoryLedger;
    use crate::llm::ScriptedModel;
    use crate::models::Completion;
    use crate::router::Router as IntentRouter;
    use crate::state::InMemorySessionStore;
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(ledger: Arc<InMemoryLedger>) -> Router {
        let router_model = Arc::new(ScriptedModel::from_fn(|_, _| Completion::text("finance")));
        let handler_model = Arc::new(ScriptedModel::from_fn(|_, _| {
            Completion::text("Markets are mixed today.")
        }));
        let handlers = Handlers::new(
            handler_model,
            ToolRegistry::new(),
            ledger.clone(),
            &AppConfig::default(),
        );
        let orchestrator = SessionOrchestrator::new(
            IntentRouter::new(router_model),
            handlers,
            Arc::new(InMemorySessionStore::new()),
            ledger.clone(),
        );

        create_router(ApiState {
            orchestrator: Arc::new(orchestrator),
            reader: ledger.clone(),
            writer: ledger,
            default_user_id: 1,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Arc::new(InMemoryLedger::new()))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_returns_reply() {
        let response = app(Arc::new(InMemoryLedger::new()))
            .oneshot(json_request(
                "POST",
                "/api/chat",
                serde_json::json!({"session_id": "web-1", "message": "How are markets?"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["reply"], "Markets are mixed today.");
        assert_eq!(body["data"]["session_id"], "web-1");
    }

    #[tokio::test]
    async fn test_chat_requires_message() {
        let response = app(Arc::new(InMemoryLedger::new()))
            .oneshot(json_request(
                "POST",
                "/api/chat",
                serde_json::json!({"session_id": "web-1", "message": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_add_and_list_expenses() {
        let ledger = Arc::new(InMemoryLedger::new());
        let router = app(ledger.clone());

        let created = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/expenses",
                serde_json::json!({
                    "user_id": 4,
                    "amount": 18.75,
                    "category": "Transport",
                    "date": "2024-07-01",
                    "payment_method": "Mobile Payment"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let rejected = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/expenses",
                serde_json::json!({
                    "amount": -3.0,
                    "category": "Food",
                    "payment_method": "Cash"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ledger.len().await, 1);

        let listed = router
            .oneshot(
                Request::get("/api/expenses?user_id=4&limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(listed).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["category"], "Transport");
        assert_eq!(rows[0]["amount"], 18.75);
    }

    #[tokio::test]
    async fn test_summary_defaults_to_trailing_week() {
        let ledger = Arc::new(InMemoryLedger::new());
        let today = Utc::now().date_naive();
        for (amount, days_ago) in [(40.0, 0), (15.0, 6), (900.0, 7)] {
            ledger
                .add_entry(&LedgerEntry {
                    user_id: 1,
                    amount,
                    category: "Food".to_string(),
                    date: today - chrono::Duration::days(days_ago),
                    description: None,
                    recurring: false,
                    location: None,
                    payment_method: "Cash".to_string(),
                })
                .await
                .unwrap();
        }

        let response = app(ledger)
            .oneshot(Request::get("/api/expenses/summary").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["data"]["total"], 55.0);
        assert_eq!(body["data"]["top_expenses"][0]["amount"], 40.0);
        assert_eq!(body["data"]["top_expenses"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_budget_round_trip_and_validation() {
        let ledger = Arc::new(InMemoryLedger::new());
        let router = app(ledger.clone());

        let saved = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/budget",
                serde_json::json!({
                    "user_id": 2,
                    "monthly_budget": 800.0,
                    "savings_goal": 300.0,
                    "actual_savings": 150.0
                }),
            ))
            .await
            .unwrap();
        assert_eq!(saved.status(), StatusCode::OK);

        let rejected = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/budget",
                serde_json::json!({
                    "user_id": 2,
                    "monthly_budget": -5.0,
                    "savings_goal": 0.0,
                    "actual_savings": 0.0
                }),
            ))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let fetched = router
            .oneshot(Request::get("/api/budget?user_id=2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(fetched).await;
        assert_eq!(body["data"]["settings"]["monthly_budget"], 800.0);
        assert_eq!(body["data"]["month_spent"], 0.0);
        assert_eq!(body["data"]["remaining_budget"], 800.0);
        assert_eq!(body["data"]["savings_progress"], 50.0);
    }

    #[tokio::test]
    async fn test_summary_rejects_non_positive_days() {
        let response = app(Arc::new(InMemoryLedger::new()))
            .oneshot(
                Request::get("/api/expenses/summary?days=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
