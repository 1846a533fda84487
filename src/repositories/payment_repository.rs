use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, Set,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::entities::payment::{
    self, ActiveModel as PaymentActiveModel, Entity as Payment, PaymentStatus,
};
use crate::errors::ServiceError;

/// Inserts an UNPAID payment. A duplicate transaction id or a second
/// payment for the same order surfaces as `ServiceError::Conflict`.
pub async fn insert_unpaid<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    transaction_id: &str,
    amount: Decimal,
) -> Result<payment::Model, ServiceError> {
    let now = Utc::now();
    let payment = PaymentActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        transaction_id: Set(transaction_id.to_string()),
        amount: Set(amount),
        status: Set(PaymentStatus::Unpaid),
        invoice_url: Set(String::new()),
        gateway_data: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    Ok(payment)
}

pub async fn find_by_transaction_id<C: ConnectionTrait>(
    conn: &C,
    transaction_id: &str,
) -> Result<Option<payment::Model>, ServiceError> {
    Ok(Payment::find()
        .filter(payment::Column::TransactionId.eq(transaction_id))
        .one(conn)
        .await?)
}

pub async fn find_by_order_id<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<payment::Model>, ServiceError> {
    Ok(Payment::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .one(conn)
        .await?)
}

pub async fn find_map_by_order_ids<C: ConnectionTrait>(
    conn: &C,
    order_ids: &[Uuid],
) -> Result<HashMap<Uuid, payment::Model>, ServiceError> {
    if order_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let payments = Payment::find()
        .filter(payment::Column::OrderId.is_in(order_ids.iter().copied()))
        .all(conn)
        .await?;
    Ok(payments.into_iter().map(|p| (p.order_id, p)).collect())
}

/// Compare-and-swap from UNPAID to `target`.
///
/// Returns `true` when this call performed the transition. The UPDATE takes
/// the row lock, so a concurrent settlement of the same transaction waits
/// and then matches zero rows.
pub async fn transition_from_unpaid<C: ConnectionTrait>(
    conn: &C,
    transaction_id: &str,
    target: PaymentStatus,
) -> Result<bool, ServiceError> {
    let result = Payment::update_many()
        .col_expr(payment::Column::Status, Expr::value(target.to_value()))
        .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(payment::Column::TransactionId.eq(transaction_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Unpaid))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Stores where the rendered invoice of a settled payment can be fetched.
pub async fn record_invoice<C: ConnectionTrait>(
    conn: &C,
    payment: payment::Model,
    invoice_url: String,
) -> Result<payment::Model, ServiceError> {
    let mut active: PaymentActiveModel = payment.into();
    active.invoice_url = Set(invoice_url);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

pub async fn record_gateway_data<C: ConnectionTrait>(
    conn: &C,
    payment: payment::Model,
    gateway_data: serde_json::Value,
) -> Result<payment::Model, ServiceError> {
    let mut active: PaymentActiveModel = payment.into();
    active.gateway_data = Set(Some(gateway_data));
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}
