//! Gateway callback settlement: the success path with its invoice side
//! effects, failure and cancel outcomes, and replays.

mod common;

use assert_matches::assert_matches;
use commerce_settlement::entities::{OrderStatus, PaymentMethod, PaymentStatus, Role};
use commerce_settlement::errors::ServiceError;
use commerce_settlement::services::settlement::{
    SettlementEvent, SettlementOutcome, INVOICE_EMAIL_SUBJECT, INVOICE_EMAIL_TEMPLATE,
};
use common::{line, order_request, TestApp};
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Places a 270 gateway order and returns (order id, transaction id).
async fn place_gateway_order(app: &TestApp, email: &str) -> (Uuid, String) {
    let buyer = app.seed_user(email, Role::User).await;
    let shirt = app.seed_product(&format!("SKU-A-{}", email), dec!(100)).await;
    let socks = app.seed_product(&format!("SKU-B-{}", email), dec!(50)).await;

    let created = app
        .state
        .services
        .orders
        .create_order(
            buyer.id,
            order_request(
                vec![line(shirt.id, 2), line(socks.id, 1)],
                dec!(20),
                PaymentMethod::Gateway,
            ),
        )
        .await
        .expect("order created");

    let transaction_id = created
        .order
        .payment
        .expect("gateway order has a payment")
        .transaction_id;
    (created.order.id, transaction_id)
}

#[tokio::test]
async fn success_confirms_order_and_delivers_invoice() {
    let app = TestApp::new().await;
    let (order_id, txn) = place_gateway_order(&app, "paid@test.com").await;

    let outcome = app
        .state
        .services
        .settlement
        .settle(&txn, SettlementEvent::Success)
        .await
        .expect("settled");
    assert_eq!(outcome, SettlementOutcome::Settled(PaymentStatus::Paid));

    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Confirmed);
    let payment = app.payment_for(order_id).await.expect("payment");
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(
        payment.invoice_url,
        format!("https://files.test/invoices/invoice-{}.txt", txn)
    );

    let uploads = app.documents.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, format!("invoice-{}.txt", txn));
    let rendered = String::from_utf8(uploads[0].1.clone()).expect("utf8 invoice");
    assert!(rendered.contains(&txn));
    assert!(rendered.contains("270"));

    let sent = app.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "paid@test.com");
    assert_eq!(sent[0].subject, INVOICE_EMAIL_SUBJECT);
    assert_eq!(sent[0].template, INVOICE_EMAIL_TEMPLATE);
    assert_eq!(sent[0].attachments.len(), 1);
    assert_eq!(sent[0].attachments[0].filename, format!("invoice-{}.txt", txn));
    assert_eq!(sent[0].attachments[0].content, uploads[0].1);
    assert_eq!(sent[0].data["transactionId"], txn.as_str());
}

#[tokio::test]
async fn replayed_success_has_no_further_effects() {
    let app = TestApp::new().await;
    let (order_id, txn) = place_gateway_order(&app, "replay@test.com").await;
    let settlement = app.state.services.settlement.clone();

    settlement
        .settle(&txn, SettlementEvent::Success)
        .await
        .expect("first delivery");
    let first_url = app.payment_for(order_id).await.expect("payment").invoice_url;

    for _ in 0..3 {
        let outcome = settlement
            .settle(&txn, SettlementEvent::Success)
            .await
            .expect("replay accepted");
        assert_eq!(outcome, SettlementOutcome::AlreadySettled(PaymentStatus::Paid));
    }

    assert_eq!(app.notifier.attempts(), 1);
    assert_eq!(app.documents.uploads().len(), 1);
    let payment = app.payment_for(order_id).await.expect("payment");
    assert_eq!(payment.invoice_url, first_url);
    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn concurrent_success_deliveries_settle_once() {
    let app = TestApp::new().await;
    let (order_id, txn) = place_gateway_order(&app, "race@test.com").await;
    let settlement = app.state.services.settlement.clone();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let settlement = settlement.clone();
            let txn = txn.clone();
            tokio::spawn(async move { settlement.settle(&txn, SettlementEvent::Success).await })
        })
        .collect();

    let mut settled = 0;
    let mut replayed = 0;
    for handle in handles {
        match handle.await.expect("task joined").expect("settle ok") {
            SettlementOutcome::Settled(_) => settled += 1,
            SettlementOutcome::AlreadySettled(_) => replayed += 1,
        }
    }

    assert_eq!(settled, 1);
    assert_eq!(replayed, 3);
    assert_eq!(app.notifier.attempts(), 1);
    assert_eq!(
        app.payment_for(order_id).await.expect("payment").status,
        PaymentStatus::Paid
    );
}

#[tokio::test]
#[ignore = "requires a Postgres database in TEST_POSTGRES_URL"]
async fn overlapping_transactions_settle_once_on_postgres() {
    let Some(app) = TestApp::postgres().await else {
        return;
    };
    let email = format!("race-{}@test.com", Uuid::new_v4().simple());
    let (order_id, txn) = place_gateway_order(&app, &email).await;
    let settlement = app.state.services.settlement.clone();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let settlement = settlement.clone();
            let txn = txn.clone();
            tokio::spawn(async move { settlement.settle(&txn, SettlementEvent::Success).await })
        })
        .collect();

    let mut settled = 0;
    for handle in handles {
        match handle.await.expect("task joined").expect("settle ok") {
            SettlementOutcome::Settled(status) => {
                assert_eq!(status, PaymentStatus::Paid);
                settled += 1;
            }
            SettlementOutcome::AlreadySettled(status) => assert_eq!(status, PaymentStatus::Paid),
        }
    }

    assert_eq!(settled, 1);
    assert_eq!(app.notifier.attempts(), 1);
    assert_eq!(app.documents.uploads().len(), 1);
    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn notification_failure_leaves_order_retryable() {
    let app = TestApp::new().await;
    let (order_id, txn) = place_gateway_order(&app, "mailfail@test.com").await;
    app.notifier.fail_next_calls(true);

    let result = app
        .state
        .services
        .settlement
        .settle(&txn, SettlementEvent::Success)
        .await;
    assert_matches!(result, Err(ServiceError::ExternalServiceError(_)));

    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Pending);
    let payment = app.payment_for(order_id).await.expect("payment");
    assert_eq!(payment.status, PaymentStatus::Unpaid);
    assert!(payment.invoice_url.is_empty());

    // The provider retries once the relay is back.
    app.notifier.fail_next_calls(false);
    let outcome = app
        .state
        .services
        .settlement
        .settle(&txn, SettlementEvent::Success)
        .await
        .expect("retry settles");
    assert_eq!(outcome, SettlementOutcome::Settled(PaymentStatus::Paid));
    assert_eq!(app.notifier.sent().len(), 1);
    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn fail_and_cancel_skip_invoice_side_effects() {
    let app = TestApp::new().await;
    let (failed_order, failed_txn) = place_gateway_order(&app, "fail@test.com").await;
    let (cancelled_order, cancelled_txn) = place_gateway_order(&app, "cancel@test.com").await;
    let settlement = app.state.services.settlement.clone();

    let outcome = settlement
        .settle(&failed_txn, SettlementEvent::Fail)
        .await
        .expect("fail applied");
    assert_eq!(outcome, SettlementOutcome::Settled(PaymentStatus::Failed));

    let outcome = settlement
        .settle(&cancelled_txn, SettlementEvent::Cancel)
        .await
        .expect("cancel applied");
    assert_eq!(outcome, SettlementOutcome::Settled(PaymentStatus::Cancelled));

    assert_eq!(app.order(failed_order).await.order_status, OrderStatus::Failed);
    assert_eq!(
        app.order(cancelled_order).await.order_status,
        OrderStatus::Cancelled
    );
    assert_eq!(
        app.payment_for(cancelled_order).await.expect("payment").status,
        PaymentStatus::Cancelled
    );
    assert!(app.documents.uploads().is_empty());
    assert_eq!(app.notifier.attempts(), 0);
}

#[tokio::test]
async fn late_success_after_failure_is_a_replay() {
    let app = TestApp::new().await;
    let (order_id, txn) = place_gateway_order(&app, "late@test.com").await;
    let settlement = app.state.services.settlement.clone();

    settlement
        .settle(&txn, SettlementEvent::Fail)
        .await
        .expect("fail applied");
    let outcome = settlement
        .settle(&txn, SettlementEvent::Success)
        .await
        .expect("late success accepted");

    assert_eq!(outcome, SettlementOutcome::AlreadySettled(PaymentStatus::Failed));
    assert_eq!(app.order(order_id).await.order_status, OrderStatus::Failed);
    assert_eq!(app.notifier.attempts(), 0);
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let app = TestApp::new().await;

    let result = app
        .state
        .services
        .settlement
        .settle("txn_does_not_exist", SettlementEvent::Success)
        .await;

    assert_matches!(result, Err(ServiceError::NotFound(_)));
    assert_eq!(app.notifier.attempts(), 0);
}
