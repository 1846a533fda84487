use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Commerce Settlement API",
        version = "0.1.0",
        description = r#"
# Order and payment settlement

Orders are priced from the catalog and persisted atomically together with
their payment. Gateway orders return a `paymentURL` for the hosted checkout
page; the gateway later reports the outcome through the success, fail and
cancel callbacks, which settle the payment exactly once.

## Authentication

Order endpoints require a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Gateway callbacks are unauthenticated and answer with a redirect to the
storefront.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order placement and administration"),
        (name = "Payments", description = "Checkout sessions and gateway callbacks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::update_order,
        crate::handlers::payments::init_payment,
        crate::handlers::payments::payment_success,
        crate::handlers::payments::payment_fail,
        crate::handlers::payments::payment_cancel,
    ),
    components(
        schemas(
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::UpdateOrderRequest,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::entities::OrderStatus,
            crate::entities::PaymentMethod,
            crate::entities::PaymentStatus,
            crate::entities::BillingAddress,
            crate::entities::BillingAddressPatch,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_settlement_paths() {
        let doc = ApiDocV1::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/orders"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/payments/success"));
        assert!(doc
            .components
            .as_ref()
            .map(|c| c.security_schemes.contains_key("bearer_auth"))
            .unwrap_or(false));
    }
}
