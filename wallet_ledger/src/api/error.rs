use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::domain::error::AppError;

// Frontera única de renderizado de errores: cualquier capa retorna AppError
// y aquí se mapea al payload `{error: {code, message, details?}}`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

// Permitimos convertir errores de dominio al ApiError implícitamente
impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // El detalle interno de los 5xx no viaja al cliente.
        let body = if status.is_server_error() {
            error!("Internal error rendered to client: {}", err);
            json!({
                "error": {
                    "code": err.code(),
                    "message": "Internal server error",
                }
            })
        } else {
            err.to_error_body()
        };

        (status, Json(body)).into_response()
    }
}
