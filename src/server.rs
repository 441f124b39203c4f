// HTTP front end
// JSON API over the transaction store and the stats aggregator.
//
// Identity comes from the `X-User-Id` header, set by the authenticating
// proxy in front of this service. Requests without it are rejected here and
// never reach a handler.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{handle_stats, StatsRequest, StatsResponse};
use crate::db::SqliteStore;
use crate::error::LedgerError;
use crate::import::parse_date;
use crate::period::WeekStart;
use crate::stats::StatsAggregator;
use crate::transaction::{
    NewTransaction, Transaction, TransactionFilter, TransactionKind, TransactionPatch,
};

pub const USER_HEADER: &str = "x-user-id";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    store: SqliteStore,
    aggregator: StatsAggregator<SqliteStore>,
    utc_offset: FixedOffset,
}

impl AppState {
    pub fn new(store: SqliteStore, week_start: WeekStart, utc_offset: FixedOffset) -> Self {
        Self {
            aggregator: StatsAggregator::new(store.clone()).with_week_start(week_start),
            store,
            utc_offset,
        }
    }
}

/// Caller identity attached by [`require_user`].
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Ledger(LedgerError),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" })),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Ledger(LedgerError::Validation(errors)) => {
                (StatusCode::BAD_REQUEST, json!({ "error": errors }))
            }
            ApiError::Ledger(LedgerError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, json!({ "error": "Transaction not found" }))
            }
            ApiError::Ledger(err) => {
                tracing::error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Something went wrong" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Middleware
// ============================================================================

async fn require_user(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let user_id = req
        .headers()
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(req).await)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct TransactionList {
    transactions: Vec<Transaction>,
}

#[derive(Serialize)]
struct TransactionEnvelope {
    transaction: Transaction,
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    period: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    category: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl ListQuery {
    /// Unknown `type` values are ignored; unparseable dates are rejected.
    fn into_filter(self) -> Result<TransactionFilter, ApiError> {
        let bound = |name: &str, raw: Option<String>| match raw {
            None => Ok(None),
            Some(raw) => parse_date(&raw)
                .map(Some)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid {name} '{raw}'"))),
        };

        Ok(TransactionFilter {
            kind: self.kind.as_deref().and_then(TransactionKind::from_wire),
            category: self.category.filter(|category| !category.is_empty()),
            start: bound("startDate", self.start_date)?,
            end: bound("endDate", self.end_date)?,
        })
    }
}

/// GET /api/health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/stats?period=daily|weekly|monthly|yearly
async fn get_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    let request = StatsRequest {
        user_id: user.user_id,
        period: query.period,
    };
    let now = Utc::now().with_timezone(&state.utc_offset);

    let response = handle_stats(&state.aggregator, &request, now).await?;
    Ok(Json(response))
}

/// GET /api/transactions
async fn list_transactions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TransactionList>, ApiError> {
    let filter = query.into_filter()?;
    let transactions = state.store.list(&user.user_id, &filter)?;
    Ok(Json(TransactionList { transactions }))
}

/// POST /api/transactions
async fn create_transaction(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<NewTransaction>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionEnvelope>), ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let transaction = state.store.create(&user.user_id, &payload)?;
    Ok((StatusCode::CREATED, Json(TransactionEnvelope { transaction })))
}

/// GET /api/transactions/:id
async fn get_transaction(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<TransactionEnvelope>, ApiError> {
    let transaction = state.store.get(&user.user_id, &id)?;
    Ok(Json(TransactionEnvelope { transaction }))
}

/// PATCH /api/transactions/:id
async fn update_transaction(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: Result<Json<TransactionPatch>, JsonRejection>,
) -> Result<Json<TransactionEnvelope>, ApiError> {
    let Json(patch) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let transaction = state.store.update(&user.user_id, &id, &patch)?;
    Ok(Json(TransactionEnvelope { transaction }))
}

/// DELETE /api/transactions/:id
async fn delete_transaction(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete(&user.user_id, &id)?;
    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/stats", get(get_stats))
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route(
            "/transactions/:id",
            get(get_transaction)
                .patch(update_transaction)
                .delete(delete_transaction),
        )
        .route_layer(middleware::from_fn(require_user))
        .route("/health", get(health));

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = SqliteStore::open_in_memory().unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        router(AppState::new(store, WeekStart::Sunday, utc))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn salary() -> Value {
        json!({
            "type": "INCOME",
            "amount": 100.0,
            "category": "Salary",
            "description": "Monthly pay"
        })
    }

    #[tokio::test]
    async fn test_health_needs_no_identity() {
        let (status, body) = send(&app(), Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let app = app();
        for uri in ["/api/stats", "/api/transactions", "/api/transactions/abc"] {
            let (status, body) = send(&app, Method::GET, uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["error"], "Unauthorized");
        }

        let (status, _) = send(&app, Method::GET, "/api/stats", Some("  "), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stats_reflect_created_transactions() {
        let app = app();
        let (status, _) =
            send(&app, Method::POST, "/api/transactions", Some("alice"), Some(salary())).await;
        assert_eq!(status, StatusCode::CREATED);

        let food = json!({
            "type": "EXPENSE",
            "amount": 40.0,
            "category": "Food",
            "description": "Groceries"
        });
        send(&app, Method::POST, "/api/transactions", Some("alice"), Some(food)).await;

        let (status, body) =
            send(&app, Method::GET, "/api/stats?period=yearly", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["period"], "yearly");
        assert_eq!(body["summary"]["income"], 100.0);
        assert_eq!(body["summary"]["expense"], 40.0);
        assert_eq!(body["summary"]["balance"], 60.0);
        assert_eq!(body["categoryBreakdown"]["Food"]["expense"], 40.0);
        assert_eq!(body["transactionCount"], 2);

        // Another user sees nothing.
        let (_, body) = send(&app, Method::GET, "/api/stats?period=yearly", Some("bob"), None).await;
        assert_eq!(body["transactionCount"], 0);
        assert_eq!(body["summary"]["balance"], 0.0);
    }

    #[tokio::test]
    async fn test_stats_default_to_daily() {
        let app = app();
        for uri in ["/api/stats", "/api/stats?period=bogus"] {
            let (status, body) = send(&app, Method::GET, uri, Some("alice"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["period"], "daily");
        }
    }

    #[tokio::test]
    async fn test_create_validation_errors_are_400() {
        let app = app();
        let bad = json!({ "type": "EXPENSE", "amount": -3, "category": "", "description": "x" });

        let (status, body) =
            send(&app, Method::POST, "/api/transactions", Some("alice"), Some(bad)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<&str> = body["error"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["amount", "category"]);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/transactions",
            Some("alice"),
            Some(json!({ "type": "GIFT", "amount": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_transaction_lifecycle() {
        let app = app();
        let (_, created) =
            send(&app, Method::POST, "/api/transactions", Some("alice"), Some(salary())).await;
        let id = created["transaction"]["id"].as_str().unwrap().to_string();
        let item = format!("/api/transactions/{id}");

        let (status, body) = send(&app, Method::GET, &item, Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction"]["category"], "Salary");

        let (status, _) = send(&app, Method::GET, &item, Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            Method::PATCH,
            &item,
            Some("alice"),
            Some(json!({ "amount": 120.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction"]["amount"], 120.0);
        assert_eq!(body["transaction"]["description"], "Monthly pay");

        let (status, body) = send(&app, Method::DELETE, &item, Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(&app, Method::DELETE, &item, Some("alice"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Transaction not found");
    }

    #[tokio::test]
    async fn test_list_filters() {
        let app = app();
        send(&app, Method::POST, "/api/transactions", Some("alice"), Some(salary())).await;
        let rent = json!({
            "type": "EXPENSE",
            "amount": 900.0,
            "category": "Rent",
            "description": "Flat",
            "date": "2024-01-01T09:00:00Z"
        });
        send(&app, Method::POST, "/api/transactions", Some("alice"), Some(rent)).await;

        let (_, body) = send(&app, Method::GET, "/api/transactions", Some("alice"), None).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 2);

        let (_, body) =
            send(&app, Method::GET, "/api/transactions?type=EXPENSE", Some("alice"), None).await;
        let list = body["transactions"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["category"], "Rent");

        // Unknown type is ignored rather than rejected.
        let (_, body) =
            send(&app, Method::GET, "/api/transactions?type=OTHER", Some("alice"), None).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 2);

        // Only the exact upper-case spelling filters.
        let (_, body) =
            send(&app, Method::GET, "/api/transactions?type=expense", Some("alice"), None).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 2);

        let (_, body) = send(
            &app,
            Method::GET,
            "/api/transactions?startDate=2024-01-01&endDate=2024-01-02",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            Method::GET,
            "/api/transactions?startDate=soon",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
