#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use commerce_settlement::{
    auth::{JwtAuthenticator, SharedAuthenticator},
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        order, payment, product, user, BillingAddress, Order, OrderItem, Payment, PaymentMethod,
        Role,
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::{AppServices, Collaborators},
    services::{
        documents::{DocumentStore, StoredDocument},
        gateway::{GatewaySession, GatewaySessionRequest, PaymentGateway},
        invoice::TextInvoiceRenderer,
        notifications::{EmailMessage, Notifier},
        orders::{CreateOrderRequest, OrderLineInput},
        transaction_id::TransactionIdGenerator,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-secret-with-plenty-of-entropy-9f3k";

/// Gateway fake that records every session request.
#[derive(Default)]
pub struct FakeGateway {
    fail: AtomicBool,
    requests: Mutex<Vec<GatewaySessionRequest>>,
}

impl FakeGateway {
    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<GatewaySessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn init_session(
        &self,
        request: GatewaySessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let transaction_id = request.transaction_id.clone();
        self.requests.lock().unwrap().push(request);

        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "gateway unavailable".to_string(),
            ));
        }

        Ok(GatewaySession {
            redirect_url: format!("https://pay.test/checkout/{}", transaction_id),
            raw: json!({ "status": "SUCCESS", "sessionkey": transaction_id }),
        })
    }
}

/// Notifier fake that keeps sent messages in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: AtomicBool,
    sent: Mutex<Vec<EmailMessage>>,
    attempts: AtomicU64,
}

impl RecordingNotifier {
    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "mail relay rejected message".to_string(),
            ));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Document store fake keeping uploads in memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryDocumentStore {
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<StoredDocument, ServiceError> {
        self.uploads.lock().unwrap().push((name.to_string(), bytes));
        Ok(StoredDocument {
            url: format!("https://files.test/invoices/{}", name),
        })
    }
}

/// Sequential transaction ids, prefixed per instance so that runs against a
/// shared database never collide.
pub struct SequenceTransactionIds {
    run: String,
    next: AtomicU64,
}

impl Default for SequenceTransactionIds {
    fn default() -> Self {
        let run = Uuid::new_v4().simple().to_string();
        Self {
            run: run[..8].to_string(),
            next: AtomicU64::new(0),
        }
    }
}

impl TransactionIdGenerator for SequenceTransactionIds {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("txn_test_{}_{:04}", self.run, n)
    }
}

/// Application wired to a throwaway SQLite file and recording fakes.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DbPool>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub documents: Arc<MemoryDocumentStore>,
    authenticator: JwtAuthenticator,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Application on the Postgres database named by `TEST_POSTGRES_URL`,
    /// with a pool wide enough for transactions to overlap.
    pub async fn postgres() -> Option<Self> {
        let url = std::env::var("TEST_POSTGRES_URL").ok()?;
        Some(
            Self::with_config(|cfg| {
                cfg.database_url = url;
                cfg.db_max_connections = 8;
                cfg.db_min_connections = 2;
            })
            .await,
        )
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("settlement_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.documents.storage_dir = dir.path().join("invoices").display().to_string();
        cfg.settlement.side_effect_timeout_secs = 5;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let documents = Arc::new(MemoryDocumentStore::default());
        let collaborators = Collaborators {
            gateway: gateway.clone(),
            transaction_ids: Arc::new(SequenceTransactionIds::default()),
            renderer: Arc::new(TextInvoiceRenderer),
            documents: documents.clone(),
            notifier: notifier.clone(),
        };

        let services = AppServices::new(db.clone(), event_sender, collaborators, &cfg);
        let authenticator = JwtAuthenticator::new(JWT_SECRET, Duration::from_secs(3600));
        let shared: SharedAuthenticator = Arc::new(authenticator.clone());

        let state = AppState {
            db: db.clone(),
            config: cfg,
            services,
            authenticator: shared,
        };
        let router = commerce_settlement::build_router(state.clone());

        Self {
            router,
            state,
            db,
            gateway,
            notifier,
            documents,
            authenticator,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub async fn seed_user(&self, email: &str, role: Role) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("User {}", email)),
            email: Set(email.to_string()),
            phone: Set(Some("01700000000".to_string())),
            address: Set(None),
            role: Set(role),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_product(&self, sku: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Product {}", sku)),
            sku: Set(sku.to_string()),
            price: Set(price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.authenticator
            .issue_token(
                user.id,
                Some(user.name.clone()),
                Some(user.email.clone()),
                user.role,
            )
            .expect("issue token")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        Order::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn payment_for(&self, order_id: Uuid) -> Option<payment::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await
            .expect("load payment")
    }

    /// Row counts of (orders, order_items, payments)
    pub async fn row_counts(&self) -> (u64, u64, u64) {
        let db = &*self.db;
        (
            Order::find().count(db).await.expect("count orders"),
            OrderItem::find().count(db).await.expect("count items"),
            Payment::find().count(db).await.expect("count payments"),
        )
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn billing_address() -> BillingAddress {
    BillingAddress {
        name: "Rahim Uddin".to_string(),
        phone: "01711111111".to_string(),
        address: "House 12, Road 5".to_string(),
        district: "Dhaka".to_string(),
        city: "Dhaka".to_string(),
        postal_code: Some("1207".to_string()),
    }
}

pub fn line(product: Uuid, quantity: i32) -> OrderLineInput {
    OrderLineInput {
        product,
        quantity,
        size: Decimal::ONE,
    }
}

pub fn order_request(
    lines: Vec<OrderLineInput>,
    shipping_cost: Decimal,
    payment_method: PaymentMethod,
) -> CreateOrderRequest {
    CreateOrderRequest {
        products: lines,
        shipping_cost,
        payment_method,
        billing_address: billing_address(),
    }
}
