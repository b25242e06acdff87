use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::response::{BalanceResponse, TransactionHistoryResponse};
use crate::domain::error::AppError;
use crate::domain::fingerprint::request_fingerprint;
use crate::domain::types::UserId;
use crate::use_cases::execute_mutation::{
    ExecuteMutationUseCase, MutationKind, MutationOutcome, MutationRequest,
};
use crate::use_cases::get_balance::GetBalanceUseCase;
use crate::use_cases::get_transaction_history::GetTransactionHistoryUseCase;

/// Header con la clave de idempotencia del cliente.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Header de respuesta que marca un replay.
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "Idempotency-Replayed";

// Estado compartido de la aplicación
pub struct AppState {
    pub execute_mutation_use_case: ExecuteMutationUseCase,
    pub get_balance_use_case: GetBalanceUseCase,
    pub get_transaction_history_use_case: GetTransactionHistoryUseCase,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/wallet/topup", post(topup))
        .route("/wallet/bonus", post(bonus))
        .route("/wallet/spend", post(spend))
        .route("/wallet/{user_id}/balance", get(get_balance))
        .route("/wallet/{user_id}/transactions", get(get_transaction_history))
        .fallback(route_not_found)
        .with_state(state) // Inyectamos el estado (Casos de Uso)
}

/// Monto aceptado como número entero JSON o como string decimal.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Number(i64),
    Text(String),
}

impl AmountField {
    fn into_amount(self) -> Result<i64, AppError> {
        let value = match self {
            AmountField::Number(n) => n,
            AmountField::Text(raw) => raw.trim().parse::<i64>().map_err(|_| {
                AppError::Validation(format!("amount must be a positive integer, got '{}'", raw))
            })?,
        };

        if value <= 0 {
            return Err(AppError::Validation(
                "amount must be a positive integer".to_string(),
            ));
        }
        Ok(value)
    }
}

// DTO de entrada para las tres mutaciones
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequestDto {
    pub user_id: Uuid,
    pub asset_code: String,
    #[schema(value_type = String)]
    pub amount: AmountField,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct BalanceQuery {
    pub asset_code: Option<String>,
}

fn extract_idempotency_key(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or(AppError::IdempotencyKeyMissing)
}

/// Flujo compartido de las tres mutaciones.
///
/// La huella se calcula sobre el body crudo decodificado, antes de cualquier
/// validación, para que dos reintentos byte-a-byte equivalentes (módulo orden
/// de claves) produzcan la misma huella.
async fn handle_mutation(
    state: &AppState,
    kind: MutationKind,
    path: &'static str,
    headers: &HeaderMap,
    body: Value,
) -> Result<Response, ApiError> {
    let idempotency_key = extract_idempotency_key(headers)?;
    let fingerprint = request_fingerprint("POST", path, &body);

    let dto: MutationRequestDto =
        serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))?;

    let asset_code = dto.asset_code.trim().to_string();
    if asset_code.is_empty() || asset_code.len() > 50 {
        return Err(AppError::Validation(
            "assetCode must be a non-empty string of at most 50 characters".to_string(),
        )
        .into());
    }

    let request = MutationRequest {
        user_id: UserId(dto.user_id),
        asset_code,
        amount: dto.amount.into_amount()?,
        idempotency_key,
        request_fingerprint: fingerprint,
    };

    let outcome = state.execute_mutation_use_case.execute(kind, request).await?;
    Ok(mutation_response(outcome))
}

fn mutation_response(outcome: MutationOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = (status, Json(outcome.body)).into_response();
    if outcome.replayed {
        response
            .headers_mut()
            .insert(IDEMPOTENCY_REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    response
}

// Handler: Acreditar saldo comprado al usuario
// POST /wallet/topup
#[utoipa::path(
    post,
    path = "/wallet/topup",
    request_body = MutationRequestDto,
    params(("Idempotency-Key" = String, Header, description = "Clave de idempotencia del cliente")),
    responses(
        (status = 200, description = "Posting aplicado (o replay del resultado registrado)"),
        (status = 400, description = "Cuerpo inválido o header de idempotencia ausente", body = crate::api::response::ErrorResponseDto),
        (status = 404, description = "Usuario, activo o billetera inexistente", body = crate::api::response::ErrorResponseDto),
        (status = 409, description = "Fondos insuficientes o conflicto de idempotencia/concurrencia", body = crate::api::response::ErrorResponseDto),
        (status = 423, description = "Lock distribuido no disponible", body = crate::api::response::ErrorResponseDto),
    )
)]
pub async fn topup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    handle_mutation(&state, MutationKind::Topup, "/wallet/topup", &headers, body).await
}

// Handler: Acreditar saldo promocional al usuario
// POST /wallet/bonus
#[utoipa::path(
    post,
    path = "/wallet/bonus",
    request_body = MutationRequestDto,
    params(("Idempotency-Key" = String, Header, description = "Clave de idempotencia del cliente")),
    responses(
        (status = 200, description = "Posting aplicado (o replay del resultado registrado)"),
        (status = 409, description = "Fondos insuficientes o conflicto de idempotencia/concurrencia", body = crate::api::response::ErrorResponseDto),
    )
)]
pub async fn bonus(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    handle_mutation(&state, MutationKind::Bonus, "/wallet/bonus", &headers, body).await
}

// Handler: Debitar saldo del usuario hacia Tesorería
// POST /wallet/spend
#[utoipa::path(
    post,
    path = "/wallet/spend",
    request_body = MutationRequestDto,
    params(("Idempotency-Key" = String, Header, description = "Clave de idempotencia del cliente")),
    responses(
        (status = 200, description = "Posting aplicado (o replay del resultado registrado)"),
        (status = 409, description = "Fondos insuficientes o conflicto de idempotencia/concurrencia", body = crate::api::response::ErrorResponseDto),
    )
)]
pub async fn spend(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    handle_mutation(&state, MutationKind::Spend, "/wallet/spend", &headers, body).await
}

// Handler: Balance por activo de un usuario
// GET /wallet/{user_id}/balance?assetCode=CODE
#[utoipa::path(
    get,
    path = "/wallet/{user_id}/balance",
    params(
        ("user_id" = Uuid, Path, description = "Identificador del usuario"),
        BalanceQuery,
    ),
    responses(
        (status = 200, description = "Balances derivados, ordenados por código de activo", body = BalanceResponse),
        (status = 404, description = "Usuario inexistente o filtro sin billeteras", body = crate::api::response::ErrorResponseDto),
    )
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balances = state
        .get_balance_use_case
        .execute(UserId(user_id), query.asset_code)
        .await?;

    Ok(Json(BalanceResponse::new(user_id, balances)))
}

// Handler: Historial de transacciones del usuario (las más recientes primero)
// GET /wallet/{user_id}/transactions
#[utoipa::path(
    get,
    path = "/wallet/{user_id}/transactions",
    params(("user_id" = Uuid, Path, description = "Identificador del usuario")),
    responses(
        (status = 200, description = "Transacciones que tocan las billeteras del usuario", body = TransactionHistoryResponse),
        (status = 404, description = "Usuario inexistente", body = crate::api::response::ErrorResponseDto),
    )
)]
pub async fn get_transaction_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<TransactionHistoryResponse>, ApiError> {
    let transactions = state
        .get_transaction_history_use_case
        .execute(UserId(user_id))
        .await?;

    Ok(Json(TransactionHistoryResponse {
        user_id,
        transactions: transactions.into_iter().map(|t| t.into()).collect(),
    }))
}

// Fallback: toda ruta desconocida responde el payload de error estándar
pub async fn route_not_found(uri: Uri) -> ApiError {
    ApiError(AppError::RouteNotFound(uri.path().to_string()))
}
