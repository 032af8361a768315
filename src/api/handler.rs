use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ai::analysis::transaction_update_request;
use crate::ai::{AnalysisEngine, AnalysisInput, Message};
use crate::api::extract::{ApiJson, ApiQuery};
use crate::budget::BudgetSummary;
use crate::categories;
use crate::config::Config;
use crate::error::ApiError;
use crate::ingest::{self, columns, FileKind, Transaction};
use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub engine: AnalysisEngine,
    pub config: Arc<Config>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub file_id: String,
    pub filename: String,
    pub rows: usize,
    pub columns: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IncomeRequest {
    pub session_id: Option<String>,
    pub income: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct BudgetRequest {
    pub session_id: Option<String>,
    pub budget: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub session_id: Option<String>,
    pub amount: Option<Value>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddTransactionResponse {
    pub ok: bool,
    pub file_id: String,
    pub summary: BudgetSummary,
    /// Model commentary on the updated budget; absent when the call failed.
    pub analysis: Option<String>,
}

fn require_session(session_id: Option<String>) -> Result<String, ApiError> {
    session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("No session ID provided"))
}

/// Numbers and numeric strings are both accepted for money fields. Values
/// above `columns::max_amount()` are rejected like unparseable ones.
fn parse_amount(value: Option<&Value>, field: &str) -> Result<Decimal, ApiError> {
    let invalid = || ApiError::bad_request(format!("Invalid {} value", field));
    match value {
        None | Some(Value::Null) => {
            Err(ApiError::bad_request(format!("No {} value provided", field)))
        }
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .and_then(Decimal::from_f64)
            .map(|d| d.round_dp(2))
            .filter(|d| d.abs() <= columns::max_amount())
            .ok_or_else(invalid),
        Some(Value::String(s)) => columns::parse_money(s).ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

fn ok() -> Json<Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart?;
    let limit = state.config.max_upload_bytes;
    let mut file = None;
    let mut requested_session = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, limit))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::from_multipart(e, limit))?;
                file = Some((filename, data));
            }
            Some("session_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::from_multipart(e, limit))?;
                requested_session = Some(text);
            }
            _ => {}
        }
    }

    let (filename, data) = file.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    if filename.trim().is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    if data.len() > limit {
        return Err(ApiError::PayloadTooLarge(limit));
    }
    FileKind::from_name(&filename)?;

    let parse_timeout = state.config.parse_timeout;
    let name = filename.clone();
    let task = tokio::task::spawn_blocking(move || ingest::ingest(&data, &name));
    let table = match tokio::time::timeout(parse_timeout, task).await {
        Err(_) => {
            warn!(
                filename = %filename,
                timeout_secs = parse_timeout.as_secs(),
                "parse timed out"
            );
            return Err(ApiError::Timeout {
                what: "File parsing",
                after: parse_timeout,
            });
        }
        Ok(Err(join)) => return Err(ApiError::Internal(format!("parse task failed: {}", join))),
        Ok(Ok(result)) => result?,
    };

    let session_id = state.store.create_or_get(requested_session.as_deref()).await;
    let rows = table.row_count();
    let columns = table.column_count;
    let warnings = table.warnings.clone();
    let file_id = state.store.add_table(&session_id, filename.clone(), table).await?;

    info!(
        session_id = %session_id,
        file_id = %file_id,
        filename = %filename,
        rows,
        columns,
        "file uploaded"
    );

    Ok(Json(UploadResponse {
        session_id,
        file_id,
        filename,
        rows,
        columns,
        warnings,
    }))
}

pub async fn chat(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("No message provided"))?;
    let session_id = require_session(req.session_id)?;

    let session = state.store.get(&session_id).await?;
    let tables = session.select_tables(&req.file_ids);
    info!(
        session_id = %session_id,
        tables = tables.len(),
        history_len = session.history.len(),
        "chat request"
    );

    let response = state
        .engine
        .analyze(
            &message,
            AnalysisInput {
                tables: &tables,
                income: session.income,
                budget: session.budget.as_ref(),
                history: &session.history,
            },
        )
        .await?;

    let exchange = vec![Message::user(message), Message::assistant(response.clone())];
    state.store.append_history(&session_id, exchange).await?;

    Ok(Json(ChatResponse { response }))
}

pub async fn reset(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = require_session(req.session_id)?;
    state.store.mutate(&session_id, Box::new(|s| s.history.clear())).await?;
    info!(session_id = %session_id, "chat history cleared");
    Ok(ok())
}

pub async fn set_income(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<IncomeRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = require_session(req.session_id)?;
    let income = parse_amount(req.income.as_ref(), "income")?;
    if income <= Decimal::ZERO {
        return Err(ApiError::bad_request("Income must be a positive number"));
    }

    state.store.set_income(&session_id, income).await?;
    info!(session_id = %session_id, %income, "income set");
    Ok(ok())
}

pub async fn set_budget(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BudgetRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id = require_session(req.session_id)?;
    let raw = req.budget.ok_or_else(|| ApiError::bad_request("No budget provided"))?;

    let mut budget = BTreeMap::new();
    for (label, value) in &raw {
        let category = categories::normalise_label(label).ok_or_else(|| {
            ApiError::bad_request(format!("Invalid budget category '{}'", label))
        })?;
        let limit = parse_amount(Some(value), "budget")?;
        if limit < Decimal::ZERO {
            return Err(ApiError::bad_request(format!(
                "Budget for '{}' must not be negative",
                category
            )));
        }
        budget.insert(category, limit);
    }

    let count = budget.len();
    state.store.set_budget(&session_id, budget).await?;
    info!(session_id = %session_id, categories = count, "budget set");
    Ok(ok())
}

pub async fn add_transaction(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TransactionRequest>,
) -> Result<Json<AddTransactionResponse>, ApiError> {
    let session_id = require_session(req.session_id)?;
    let description = req.description.map(|d| d.trim().to_string()).unwrap_or_default();
    if req.amount.is_none() || description.is_empty() {
        return Err(ApiError::bad_request("Amount and description are required"));
    }
    let amount = parse_amount(req.amount.as_ref(), "amount")?;
    if amount.is_zero() {
        return Err(ApiError::bad_request("Amount must not be zero"));
    }

    let date = match req.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => columns::parse_date(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid date '{}'", raw)))?,
        None => Utc::now().date_naive(),
    };
    let category = req
        .category
        .as_deref()
        .and_then(categories::normalise_label)
        .or_else(|| categories::guess(&description, amount).map(|c| c.to_string()));

    let tx = Transaction {
        date,
        description,
        amount,
        category,
    };
    let request = transaction_update_request(&tx);
    let file_id = state.store.add_transaction(&session_id, tx).await?;

    let session = state.store.get(&session_id).await?;
    let summary = BudgetSummary::compute(
        session.tables.iter().flat_map(|t| t.table.transactions.iter()),
        session.income,
        session.budget.as_ref(),
    );
    info!(session_id = %session_id, %amount, "transaction added");

    // The transaction is stored either way; a model failure only drops the
    // commentary.
    let input = AnalysisInput {
        tables: &session.tables,
        income: session.income,
        budget: session.budget.as_ref(),
        history: &session.history,
    };
    let analysis = match state.engine.analyze(&request, input).await {
        Ok(text) => {
            let exchange = vec![Message::user(request), Message::assistant(text.clone())];
            state.store.append_history(&session_id, exchange).await?;
            Some(text)
        }
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "updated analysis failed");
            None
        }
    };

    Ok(Json(AddTransactionResponse {
        ok: true,
        file_id,
        summary,
        analysis,
    }))
}

pub async fn summary(
    State(state): State<AppState>,
    ApiQuery(req): ApiQuery<SessionRequest>,
) -> Result<Json<BudgetSummary>, ApiError> {
    let session_id = require_session(req.session_id)?;
    let session = state
        .store
        .get(&session_id)
        .await
        .map_err(|e| ApiError::from(e).as_not_found())?;

    Ok(Json(BudgetSummary::compute(
        session.tables.iter().flat_map(|t| t.table.transactions.iter()),
        session.income,
        session.budget.as_ref(),
    )))
}

pub async fn initial_analysis(
    State(state): State<AppState>,
    ApiQuery(req): ApiQuery<SessionRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let session_id = require_session(req.session_id)?;
    let session = state
        .store
        .get(&session_id)
        .await
        .map_err(|e| ApiError::from(e).as_not_found())?;

    let response = state
        .engine
        .initial_analysis(AnalysisInput {
            tables: &session.tables,
            income: session.income,
            budget: session.budget.as_ref(),
            history: &[],
        })
        .await?;

    state
        .store
        .append_history(&session_id, vec![Message::assistant(response.clone())])
        .await?;

    Ok(Json(ChatResponse { response }))
}
