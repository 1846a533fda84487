use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::Deserialize;
use tracing::{error, info};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::{AuthRouterExt, AuthUser};
use crate::config::GatewayConfig;
use crate::entities::PaymentStatus;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orders::PaymentUrlResponse;
use crate::services::settlement::{SettlementEvent, SettlementOutcome};
use crate::ApiResponse;

pub const MESSAGE_COMPLETED: &str = "Payment Completed Successfully!";
pub const MESSAGE_FAILED: &str = "Payment Failed!";
pub const MESSAGE_CANCELLED: &str = "Payment Cancelled!";
pub const MESSAGE_ALREADY_PROCESSED: &str = "Payment already processed";

/// Parameters the gateway appends to the callback URLs
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub transaction_id: Option<String>,
    pub amount: Option<String>,
    pub status: Option<String>,
}

/// Open a new checkout session for an unpaid gateway order
#[utoipa::path(
    post,
    path = "/api/v1/payments/init/:order_id",
    params(
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 201, description = "Payment URL created", body = crate::ApiResponse<PaymentUrlResponse>),
        (status = 400, description = "Order is cash on delivery", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or payment not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Payment already settled", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn init_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentUrlResponse>>), ServiceError> {
    let session = state.services.orders.init_payment(order_id, &user).await?;

    let mut body = ApiResponse::success(session);
    body.message = Some("Payment URL created successfully".to_string());
    Ok((StatusCode::CREATED, Json(body)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/success",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Redirect to the storefront result page")
    ),
    tag = "Payments"
)]
pub async fn payment_success(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    settle_and_redirect(&state, query, SettlementEvent::Success).await
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/fail",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Redirect to the storefront result page")
    ),
    tag = "Payments"
)]
pub async fn payment_fail(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    settle_and_redirect(&state, query, SettlementEvent::Fail).await
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/cancel",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Redirect to the storefront result page")
    ),
    tag = "Payments"
)]
pub async fn payment_cancel(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    settle_and_redirect(&state, query, SettlementEvent::Cancel).await
}

async fn settle_and_redirect(
    state: &AppState,
    query: CallbackQuery,
    event: SettlementEvent,
) -> Response {
    let gateway = &state.config.gateway;

    let result = match query.transaction_id.as_deref().filter(|id| !id.is_empty()) {
        Some(transaction_id) => state.services.settlement.settle(transaction_id, event).await,
        None => Err(ServiceError::BadRequest(
            "transactionId is required".to_string(),
        )),
    };

    let (target, message) = match result {
        Ok(SettlementOutcome::Settled(status)) => {
            (status_page(gateway, status), settled_message(event))
        }
        Ok(SettlementOutcome::AlreadySettled(status)) => {
            (status_page(gateway, status), MESSAGE_ALREADY_PROCESSED.to_string())
        }
        Err(e) => {
            // The provider may have captured funds; operators must reconcile.
            error!(
                error = %e,
                transaction_id = query.transaction_id.as_deref().unwrap_or(""),
                %event,
                "Gateway callback could not be settled"
            );
            (gateway.frontend_fail_url.as_str(), e.response_message())
        }
    };

    let status = query
        .status
        .clone()
        .unwrap_or_else(|| event.to_string());
    match frontend_url(target, &query, &message, &status) {
        Ok(url) => {
            info!(%event, location = %url, "Redirecting buyer after callback");
            Redirect::to(&url).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn settled_message(event: SettlementEvent) -> String {
    match event {
        SettlementEvent::Success => MESSAGE_COMPLETED,
        SettlementEvent::Fail => MESSAGE_FAILED,
        SettlementEvent::Cancel => MESSAGE_CANCELLED,
    }
    .to_string()
}

/// Storefront page matching the final payment status.
fn status_page(gateway: &GatewayConfig, status: PaymentStatus) -> &str {
    match status {
        PaymentStatus::Paid => gateway.frontend_success_url.as_str(),
        PaymentStatus::Cancelled => gateway.frontend_cancel_url.as_str(),
        PaymentStatus::Unpaid | PaymentStatus::Failed | PaymentStatus::Refunded => {
            gateway.frontend_fail_url.as_str()
        }
    }
}

fn frontend_url(
    base: &str,
    query: &CallbackQuery,
    message: &str,
    status: &str,
) -> Result<String, ServiceError> {
    let url = url::Url::parse_with_params(
        base,
        &[
            ("transactionId", query.transaction_id.as_deref().unwrap_or("")),
            ("amount", query.amount.as_deref().unwrap_or("")),
            ("message", message),
            ("status", status),
        ],
    )
    .map_err(|e| ServiceError::InternalError(format!("invalid frontend url {}: {}", base, e)))?;

    Ok(url.into())
}

pub fn payment_routes() -> Router<AppState> {
    let checkout = Router::new()
        .route("/init/:order_id", post(init_payment))
        .with_auth();

    Router::new()
        .route("/success", get(payment_success).post(payment_success))
        .route("/fail", get(payment_fail).post(payment_fail))
        .route("/cancel", get(payment_cancel).post(payment_cancel))
        .merge(checkout)
}
