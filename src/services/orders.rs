use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseTransaction, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::AuthUser;
use crate::db::{rollback, DbPool};
use crate::entities::{
    order, order_item, payment, user, BillingAddress, BillingAddressPatch, OrderStatus,
    PaymentMethod, PaymentStatus, MAX_MONEY_AMOUNT,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::order_repository::{self, NewOrder, NewOrderLine, OrderFilter};
use crate::repositories::{catalog_repository, payment_repository, user_repository, Page};
use crate::services::gateway::{GatewaySessionRequest, SharedPaymentGateway};
use crate::services::transaction_id::TransactionIdGenerator;
use crate::PaginatedResponse;

fn validate_money_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    if *value > MAX_MONEY_AMOUNT {
        return Err(ValidationError::new("exceeds_maximum_amount"));
    }
    Ok(())
}

fn amount_out_of_range() -> ServiceError {
    ServiceError::ValidationError("Order total exceeds the maximum supported amount".to_string())
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

fn validate_order_lines(lines: &Vec<OrderLineInput>) -> Result<(), ValidationError> {
    for line in lines {
        if line.quantity < 1 {
            return Err(ValidationError::new("quantity_must_be_at_least_one"));
        }
        validate_positive(&line.size)?;
    }
    Ok(())
}

/// A requested line. Any client-side price is ignored; prices come from the
/// catalog.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product: Uuid,
    pub quantity: i32,
    pub size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(
        length(min = 1, message = "At least one product is required"),
        custom = "validate_order_lines"
    )]
    pub products: Vec<OrderLineInput>,
    #[validate(custom = "validate_money_amount")]
    pub shipping_cost: Decimal,
    pub payment_method: PaymentMethod,
    #[validate]
    pub billing_address: BillingAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub order_status: OrderStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    pub order_status: Option<OrderStatus>,
    #[validate]
    pub billing_address: Option<BillingAddressPatch>,
    #[validate(custom = "validate_money_amount")]
    pub shipping_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub order_status: Option<OrderStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub size: Decimal,
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            line_total: item.line_total(),
            product_id: item.product_id,
            product_name: item.product_name,
            unit_price: item.unit_price,
            quantity: item.quantity,
            size: item.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentView {
    fn from(payment: payment::Model) -> Self {
        Self {
            id: payment.id,
            transaction_id: payment.transaction_id,
            amount: payment.amount,
            status: payment.status,
            invoice_url: Some(payment.invoice_url).filter(|url| !url.is_empty()),
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<user::Model> for CustomerSummary {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
        }
    }
}

/// Read model of an order with its lines, customer and payment
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerSummary>,
    pub products: Vec<OrderItemView>,
    pub total_amount: Decimal,
    pub shipping_cost: Decimal,
    pub payment_method: PaymentMethod,
    pub order_status: OrderStatus,
    pub billing_address: BillingAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    fn assemble(
        order: order::Model,
        items: Vec<order_item::Model>,
        customer: Option<user::Model>,
        payment: Option<payment::Model>,
    ) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            customer: customer.map(CustomerSummary::from),
            products: items.into_iter().map(OrderItemView::from).collect(),
            total_amount: order.total_amount,
            shipping_cost: order.shipping_cost,
            payment_method: order.payment_method,
            order_status: order.order_status,
            billing_address: order.billing_address,
            payment: payment.map(PaymentView::from),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order: OrderView,
    #[serde(rename = "paymentURL", skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentUrlResponse {
    #[serde(rename = "paymentURL")]
    pub payment_url: String,
}

/// Order creation and admin mutation
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    gateway: SharedPaymentGateway,
    transaction_ids: Arc<dyn TransactionIdGenerator>,
    event_sender: EventSender,
    strict_status_transitions: bool,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: SharedPaymentGateway,
        transaction_ids: Arc<dyn TransactionIdGenerator>,
        event_sender: EventSender,
        strict_status_transitions: bool,
    ) -> Self {
        Self {
            db,
            gateway,
            transaction_ids,
            event_sender,
            strict_status_transitions,
        }
    }

    /// Creates an order priced from the catalog and, for gateway payments,
    /// its UNPAID payment plus a checkout session. Nothing is persisted
    /// unless every step, including the gateway call, succeeds.
    #[instrument(skip(self, request), fields(user_id = %user_id, payment_method = %request.payment_method))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::from(e)
        })?;

        match self.create_order_in(&txn, user_id, request).await {
            Ok(created) => {
                txn.commit().await?;

                let method = created.order.payment_method.to_string();
                counter!("orders.created", 1, "payment_method" => method);
                info!(order_id = %created.order.id, total = %created.order.total_amount, "Order created");

                self.event_sender
                    .send_or_log(Event::OrderCreated {
                        order_id: created.order.id,
                        user_id,
                        payment_method: created.order.payment_method,
                        total_amount: created.order.total_amount,
                    })
                    .await;
                Ok(created)
            }
            Err(e) => {
                rollback(txn).await;
                counter!("orders.creation_failed", 1);
                warn!(error = %e, "Order creation aborted");
                Err(e)
            }
        }
    }

    async fn create_order_in(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let customer = user_repository::find_by_id(txn, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        let mut seen = HashSet::new();
        let product_ids: Vec<Uuid> = request
            .products
            .iter()
            .map(|line| line.product)
            .filter(|id| seen.insert(*id))
            .collect();

        let catalog = catalog_repository::find_by_ids(txn, &product_ids).await?;
        if catalog.len() != product_ids.len() {
            return Err(ServiceError::ValidationError(
                "One or more products do not exist".to_string(),
            ));
        }
        let catalog: HashMap<Uuid, _> = catalog.into_iter().map(|p| (p.id, p)).collect();

        let mut subtotal = Decimal::ZERO;
        let mut lines = Vec::with_capacity(request.products.len());
        for line in &request.products {
            let product = catalog.get(&line.product).ok_or_else(|| {
                ServiceError::ValidationError("One or more products do not exist".to_string())
            })?;
            subtotal = product
                .price
                .checked_mul(Decimal::from(line.quantity))
                .and_then(|line_total| subtotal.checked_add(line_total))
                .filter(|amount| *amount <= MAX_MONEY_AMOUNT)
                .ok_or_else(amount_out_of_range)?;
            lines.push(NewOrderLine {
                product_id: product.id,
                product_name: product.name.clone(),
                unit_price: product.price,
                quantity: line.quantity,
                size: line.size,
            });
        }
        let total_amount = subtotal
            .checked_add(request.shipping_cost)
            .filter(|amount| *amount <= MAX_MONEY_AMOUNT)
            .ok_or_else(amount_out_of_range)?;

        let transaction_id = self.transaction_ids.generate();

        let (order, items) = order_repository::insert(
            txn,
            NewOrder {
                user_id,
                total_amount,
                shipping_cost: request.shipping_cost,
                payment_method: request.payment_method,
                billing_address: request.billing_address.clone(),
                lines,
            },
        )
        .await?;

        if request.payment_method == PaymentMethod::CashOnDelivery {
            return Ok(CreateOrderResponse {
                order: OrderView::assemble(order, items, Some(customer), None),
                payment_url: None,
            });
        }

        let payment =
            payment_repository::insert_unpaid(txn, order.id, &transaction_id, total_amount)
                .await?;
        let order = order_repository::link_payment(txn, order, payment.id).await?;

        let billing = &request.billing_address;
        let session = self
            .gateway
            .init_session(GatewaySessionRequest {
                name: billing.name.clone(),
                email: customer.email.clone(),
                phone: billing.phone.clone(),
                address: billing.one_line(),
                city: billing.city.clone(),
                amount: total_amount,
                transaction_id,
            })
            .await?;
        let payment = payment_repository::record_gateway_data(txn, payment, session.raw).await?;

        Ok(CreateOrderResponse {
            order: OrderView::assemble(order, items, Some(customer), Some(payment)),
            payment_url: Some(session.redirect_url),
        })
    }

    /// Owners see their own orders, admins see any. Other callers get
    /// NotFound so order ids cannot be probed.
    #[instrument(skip(self, requester), fields(requester = %requester.user_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        requester: &AuthUser,
    ) -> Result<OrderView, ServiceError> {
        let db = &*self.db;
        let order = order_repository::get_by_id(db, order_id).await?;
        if !requester.can_access(order.user_id) {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        load_view(db, order).await
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        query: OrderListQuery,
    ) -> Result<PaginatedResponse<OrderView>, ServiceError> {
        self.list(
            OrderFilter {
                user_id: None,
                order_status: query.order_status,
            },
            Page::new(query.page, query.limit),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        query: OrderListQuery,
    ) -> Result<PaginatedResponse<OrderView>, ServiceError> {
        self.list(
            OrderFilter {
                user_id: Some(user_id),
                order_status: query.order_status,
            },
            Page::new(query.page, query.limit),
        )
        .await
    }

    async fn list(
        &self,
        filter: OrderFilter,
        page: Page,
    ) -> Result<PaginatedResponse<OrderView>, ServiceError> {
        let db = &*self.db;
        let (orders, total) = order_repository::list(db, &filter, page).await?;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut user_ids: Vec<Uuid> = orders.iter().map(|o| o.user_id).collect();
        user_ids.sort();
        user_ids.dedup();

        let mut items = order_repository::find_items_for_orders(db, &order_ids).await?;
        let mut payments = payment_repository::find_map_by_order_ids(db, &order_ids).await?;
        let users = user_repository::find_map_by_ids(db, &user_ids).await?;

        let views = orders
            .into_iter()
            .map(|order| {
                let lines = items.remove(&order.id).unwrap_or_default();
                let payment = payments.remove(&order.id);
                let customer = users.get(&order.user_id).cloned();
                OrderView::assemble(order, lines, customer, payment)
            })
            .collect();

        Ok(PaginatedResponse::new(views, total, page))
    }

    /// Sets the order status. Permissive unless strict transitions are
    /// configured; a paid order can never go back to PENDING or FAILED.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderView, ServiceError> {
        self.update_order(
            order_id,
            UpdateOrderRequest {
                order_status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Status change, partial billing merge and shipping cost change in one
    /// transaction. Shipping changes adjust the total by the delta only.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<OrderView, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;
        let result = self.update_order_in(&txn, order_id, request).await;
        let (view, old_status) = match result {
            Ok(updated) => {
                txn.commit().await?;
                updated
            }
            Err(e) => {
                rollback(txn).await;
                return Err(e);
            }
        };

        if view.order_status != old_status {
            info!(old_status = %old_status, new_status = %view.order_status, "Order status changed");
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status: view.order_status,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderUpdated(order_id))
            .await;

        Ok(view)
    }

    async fn update_order_in(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<(OrderView, OrderStatus), ServiceError> {
        let order = order_repository::get_by_id(txn, order_id).await?;
        let old_status = order.order_status;

        if let Some(next) = request.order_status {
            self.check_status_change(txn, &order, next).await?;
        }

        let shipping_change = match request.shipping_cost {
            Some(shipping) if shipping != order.shipping_cost => {
                order
                    .total_with_shipping(shipping)
                    .ok_or_else(amount_out_of_range)?;
                Some((order.shipping_cost, shipping))
            }
            _ => None,
        };
        let billing = request.billing_address.map(|patch| {
            let mut billing = order.billing_address.clone();
            billing.merge(patch);
            billing
        });

        if let Some((current, shipping)) = shipping_change {
            let applied =
                order_repository::replace_shipping_cost(txn, order_id, current, shipping).await?;
            if !applied {
                return Err(ServiceError::Conflict(format!(
                    "Shipping cost of order {} changed concurrently",
                    order_id
                )));
            }
        }

        let mut active: order::ActiveModel = order_repository::get_by_id(txn, order_id)
            .await?
            .into();
        if let Some(status) = request.order_status {
            active.order_status = Set(status);
        }
        if let Some(billing) = billing {
            active.billing_address = Set(billing);
        }
        let order = order_repository::save(txn, active).await?;

        Ok((load_view(txn, order).await?, old_status))
    }

    async fn check_status_change<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &order::Model,
        next: OrderStatus,
    ) -> Result<(), ServiceError> {
        let current = order.order_status;
        if current == next {
            return Ok(());
        }

        if next.precedes_payment() {
            if let Some(payment) = payment_repository::find_by_order_id(conn, order.id).await? {
                if payment.status == PaymentStatus::Paid {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Order {} is paid and cannot be moved to {}",
                        order.id, next
                    )));
                }
            }
        }

        if self.strict_status_transitions && !current.can_transition_to(next) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot change order status from {} to {}",
                current, next
            )));
        }

        Ok(())
    }

    /// Opens a new checkout session for an unpaid gateway order, reusing its
    /// transaction id and amount.
    #[instrument(skip(self, requester), fields(order_id = %order_id, requester = %requester.user_id))]
    pub async fn init_payment(
        &self,
        order_id: Uuid,
        requester: &AuthUser,
    ) -> Result<PaymentUrlResponse, ServiceError> {
        let db = &*self.db;
        let order = order_repository::get_by_id(db, order_id).await?;
        if !requester.can_access(order.user_id) {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        if order.payment_method == PaymentMethod::CashOnDelivery {
            return Err(ServiceError::BadRequest(
                "Cash on delivery orders are not paid online".to_string(),
            ));
        }

        let payment = payment_repository::find_by_order_id(db, order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(
                    "Payment not found! You might not have initiated order!".to_string(),
                )
            })?;
        if payment.status != PaymentStatus::Unpaid {
            return Err(ServiceError::InvalidOperation(format!(
                "Payment is already {}",
                payment.status
            )));
        }

        let customer = user_repository::find_by_id(db, order.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        let billing = &order.billing_address;
        let session = self
            .gateway
            .init_session(GatewaySessionRequest {
                name: billing.name.clone(),
                email: customer.email,
                phone: billing.phone.clone(),
                address: billing.one_line(),
                city: billing.city.clone(),
                amount: payment.amount,
                transaction_id: payment.transaction_id.clone(),
            })
            .await?;
        payment_repository::record_gateway_data(db, payment, session.raw).await?;

        Ok(PaymentUrlResponse {
            payment_url: session.redirect_url,
        })
    }
}

/// Explicit read-side assembly of an order with its related rows.
async fn load_view<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
) -> Result<OrderView, ServiceError> {
    let items = order_repository::find_items(conn, order.id).await?;
    let customer = user_repository::find_by_id(conn, order.user_id).await?;
    let payment = payment_repository::find_by_order_id(conn, order.id).await?;
    Ok(OrderView::assemble(order, items, customer, payment))
}
