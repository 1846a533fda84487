use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use std::collections::HashMap;
use uuid::Uuid;

use super::Page;
use crate::entities::order::{
    self, ActiveModel as OrderActiveModel, BillingAddress, Entity as Order, OrderStatus,
    PaymentMethod,
};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::errors::ServiceError;

/// Line to persist with a new order, already priced from the catalog
#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub size: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub total_amount: Decimal,
    pub shipping_cost: Decimal,
    pub payment_method: PaymentMethod,
    pub billing_address: BillingAddress,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub order_status: Option<OrderStatus>,
}

/// Inserts a PENDING order together with its lines.
pub async fn insert<C: ConnectionTrait>(
    conn: &C,
    new_order: NewOrder,
) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();

    let order = OrderActiveModel {
        id: Set(order_id),
        user_id: Set(new_order.user_id),
        total_amount: Set(new_order.total_amount),
        shipping_cost: Set(new_order.shipping_cost),
        payment_method: Set(new_order.payment_method),
        payment_id: Set(None),
        order_status: Set(OrderStatus::Pending),
        billing_address: Set(new_order.billing_address),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(new_order.lines.len());
    for (position, line) in new_order.lines.into_iter().enumerate() {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            position: Set(position as i32),
            product_name: Set(line.product_name),
            unit_price: Set(line.unit_price),
            quantity: Set(line.quantity),
            size: Set(line.size),
        }
        .insert(conn)
        .await?;
        items.push(item);
    }

    Ok((order, items))
}

pub async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<Option<order::Model>, ServiceError> {
    Ok(Order::find_by_id(id).one(conn).await?)
}

pub async fn get_by_id<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<order::Model, ServiceError> {
    find_by_id(conn, id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
}

/// Lines of an order in request order
pub async fn find_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?)
}

pub async fn find_items_for_orders<C: ConnectionTrait>(
    conn: &C,
    order_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<order_item::Model>>, ServiceError> {
    let mut grouped: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
    if order_ids.is_empty() {
        return Ok(grouped);
    }

    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.is_in(order_ids.iter().copied()))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?;
    for item in items {
        grouped.entry(item.order_id).or_default().push(item);
    }
    Ok(grouped)
}

/// Applies the given changes to an order row and bumps `updated_at`.
pub async fn save<C: ConnectionTrait>(
    conn: &C,
    mut order: OrderActiveModel,
) -> Result<order::Model, ServiceError> {
    order.updated_at = Set(Utc::now());
    Ok(order.update(conn).await?)
}

pub async fn link_payment<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
    payment_id: Uuid,
) -> Result<order::Model, ServiceError> {
    let mut active: OrderActiveModel = order.into();
    active.payment_id = Set(Some(payment_id));
    save(conn, active).await
}

pub async fn set_status<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
    status: OrderStatus,
) -> Result<order::Model, ServiceError> {
    let mut active: OrderActiveModel = order.into();
    active.order_status = Set(status);
    save(conn, active).await
}

/// Swaps the shipping component of the total inside the UPDATE itself.
///
/// The row only matches while its shipping cost is still `current`, so two
/// concurrent edits cannot both apply a delta computed from the same read.
/// Returns `false` when the row no longer matches.
pub async fn replace_shipping_cost<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    current: Decimal,
    new_shipping_cost: Decimal,
) -> Result<bool, ServiceError> {
    let delta = new_shipping_cost.checked_sub(current).ok_or_else(|| {
        ServiceError::ValidationError("Shipping cost change is out of range".to_string())
    })?;

    let result = Order::update_many()
        .col_expr(order::Column::ShippingCost, Expr::value(new_shipping_cost))
        .col_expr(
            order::Column::TotalAmount,
            Expr::col(order::Column::TotalAmount).add(delta),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::ShippingCost.eq(current))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Newest first
pub async fn list<C: ConnectionTrait>(
    conn: &C,
    filter: &OrderFilter,
    page: Page,
) -> Result<(Vec<order::Model>, u64), ServiceError> {
    let mut query = Order::find();
    if let Some(user_id) = filter.user_id {
        query = query.filter(order::Column::UserId.eq(user_id));
    }
    if let Some(status) = filter.order_status {
        query = query.filter(order::Column::OrderStatus.eq(status));
    }

    let paginator = query
        .order_by_desc(order::Column::CreatedAt)
        .paginate(conn, page.limit);

    let total = paginator.num_items().await?;
    let orders = paginator.fetch_page(page.page - 1).await?;

    Ok((orders, total))
}
