//! Admin mutations: status changes, billing merges and shipping cost deltas.

mod common;

use assert_matches::assert_matches;
use commerce_settlement::entities::{
    BillingAddressPatch, OrderStatus, PaymentMethod, Role, MAX_MONEY_AMOUNT,
};
use commerce_settlement::errors::ServiceError;
use commerce_settlement::repositories::order_repository;
use commerce_settlement::services::orders::UpdateOrderRequest;
use commerce_settlement::services::settlement::SettlementEvent;
use common::{billing_address, line, order_request, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn place_order(app: &TestApp, email: &str, method: PaymentMethod) -> Uuid {
    let buyer = app.seed_user(email, Role::User).await;
    let shirt = app.seed_product(&format!("SKU-A-{}", email), dec!(100)).await;
    let socks = app.seed_product(&format!("SKU-B-{}", email), dec!(50)).await;

    app.state
        .services
        .orders
        .create_order(
            buyer.id,
            order_request(
                vec![line(shirt.id, 2), line(socks.id, 1)],
                dec!(20),
                method,
            ),
        )
        .await
        .expect("order created")
        .order
        .id
}

fn shipping(cost: Decimal) -> UpdateOrderRequest {
    UpdateOrderRequest {
        shipping_cost: Some(cost),
        ..Default::default()
    }
}

#[tokio::test]
async fn shipping_change_adjusts_total_by_delta() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "ship@test.com", PaymentMethod::CashOnDelivery).await;
    let orders = app.state.services.orders.clone();

    let view = orders
        .update_order(order_id, shipping(dec!(50)))
        .await
        .expect("updated");
    assert_eq!(view.shipping_cost, dec!(50));
    assert_eq!(view.total_amount, dec!(300));

    let view = orders
        .update_order(order_id, shipping(dec!(35)))
        .await
        .expect("updated again");
    assert_eq!(view.total_amount, dec!(285));

    let stored = app.order(order_id).await;
    assert_eq!(stored.total_amount, dec!(285));
    assert_eq!(stored.shipping_cost, dec!(35));
}

#[tokio::test]
async fn zero_shipping_cost_is_applied() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "free@test.com", PaymentMethod::CashOnDelivery).await;

    let view = app
        .state
        .services
        .orders
        .update_order(order_id, shipping(Decimal::ZERO))
        .await
        .expect("updated");

    assert_eq!(view.shipping_cost, Decimal::ZERO);
    assert_eq!(view.total_amount, dec!(250));
}

#[tokio::test]
async fn negative_shipping_cost_is_rejected() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "negative@test.com", PaymentMethod::CashOnDelivery).await;

    let result = app
        .state
        .services
        .orders
        .update_order(order_id, shipping(dec!(-5)))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(app.order(order_id).await.total_amount, dec!(270));
}

#[tokio::test]
async fn shipping_cost_beyond_money_range_is_rejected() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "overflow@test.com", PaymentMethod::CashOnDelivery).await;
    let orders = app.state.services.orders.clone();

    for cost in [Decimal::MAX, MAX_MONEY_AMOUNT] {
        let result = orders.update_order(order_id, shipping(cost)).await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    let stored = app.order(order_id).await;
    assert_eq!(stored.shipping_cost, dec!(20));
    assert_eq!(stored.total_amount, dec!(270));
}

#[tokio::test]
async fn shipping_swap_only_applies_to_the_cost_it_was_read_from() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "swap@test.com", PaymentMethod::CashOnDelivery).await;

    let applied = order_repository::replace_shipping_cost(&*app.db, order_id, dec!(20), dec!(50))
        .await
        .expect("first swap");
    assert!(applied);

    // A second editor that also read a shipping cost of 20 no longer matches.
    let stale = order_repository::replace_shipping_cost(&*app.db, order_id, dec!(20), dec!(35))
        .await
        .expect("stale swap");
    assert!(!stale);

    let stored = app.order(order_id).await;
    assert_eq!(stored.shipping_cost, dec!(50));
    assert_eq!(stored.total_amount, dec!(300));
}

#[tokio::test]
async fn billing_patch_merges_provided_fields() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "billing@test.com", PaymentMethod::CashOnDelivery).await;

    let view = app
        .state
        .services
        .orders
        .update_order(
            order_id,
            UpdateOrderRequest {
                billing_address: Some(BillingAddressPatch {
                    city: Some("Chattogram".to_string()),
                    phone: Some("01899999999".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .expect("updated");

    let original = billing_address();
    assert_eq!(view.billing_address.city, "Chattogram");
    assert_eq!(view.billing_address.phone, "01899999999");
    assert_eq!(view.billing_address.name, original.name);
    assert_eq!(view.billing_address.address, original.address);
    assert_eq!(view.order_status, OrderStatus::Pending);
    assert_eq!(view.total_amount, dec!(270));

    let stored = app.order(order_id).await;
    assert_eq!(stored.billing_address.city, "Chattogram");
    assert_eq!(stored.billing_address.postal_code, original.postal_code);
}

#[tokio::test]
async fn status_updates_are_permissive_by_default() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "loose@test.com", PaymentMethod::CashOnDelivery).await;
    let orders = app.state.services.orders.clone();

    let view = orders
        .update_order_status(order_id, OrderStatus::Delivered)
        .await
        .expect("delivered");
    assert_eq!(view.order_status, OrderStatus::Delivered);

    let view = orders
        .update_order_status(order_id, OrderStatus::Pending)
        .await
        .expect("back to pending");
    assert_eq!(view.order_status, OrderStatus::Pending);
}

#[tokio::test]
async fn paid_order_cannot_return_to_pending_or_failed() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "paidguard@test.com", PaymentMethod::Gateway).await;
    let payment = app.payment_for(order_id).await.expect("payment");
    app.state
        .services
        .settlement
        .settle(&payment.transaction_id, SettlementEvent::Success)
        .await
        .expect("settled");

    let orders = app.state.services.orders.clone();
    for status in [OrderStatus::Pending, OrderStatus::Failed] {
        let result = orders.update_order_status(order_id, status).await;
        assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
    }
    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Confirmed);

    let view = orders
        .update_order_status(order_id, OrderStatus::Shipped)
        .await
        .expect("shipping a paid order");
    assert_eq!(view.order_status, OrderStatus::Shipped);
}

#[tokio::test]
async fn strict_mode_enforces_transition_table() {
    let app = TestApp::with_config(|cfg| cfg.settlement.strict_status_transitions = true).await;
    let order_id = place_order(&app, "strict@test.com", PaymentMethod::CashOnDelivery).await;
    let orders = app.state.services.orders.clone();

    let result = orders
        .update_order_status(order_id, OrderStatus::Delivered)
        .await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Pending);

    for next in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
        let view = orders
            .update_order_status(order_id, next)
            .await
            .expect("legal transition");
        assert_eq!(view.order_status, next);
    }
}

#[tokio::test]
async fn rejected_status_leaves_other_fields_untouched() {
    let app = TestApp::with_config(|cfg| cfg.settlement.strict_status_transitions = true).await;
    let order_id = place_order(&app, "atomic@test.com", PaymentMethod::CashOnDelivery).await;

    let result = app
        .state
        .services
        .orders
        .update_order(
            order_id,
            UpdateOrderRequest {
                order_status: Some(OrderStatus::Delivered),
                shipping_cost: Some(dec!(100)),
                ..Default::default()
            },
        )
        .await;

    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
    let stored = app.order(order_id).await;
    assert_eq!(stored.shipping_cost, dec!(20));
    assert_eq!(stored.total_amount, dec!(270));
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;

    let result = app
        .state
        .services
        .orders
        .update_order_status(Uuid::new_v4(), OrderStatus::Confirmed)
        .await;

    assert_matches!(result, Err(ServiceError::NotFound(_)));
}
