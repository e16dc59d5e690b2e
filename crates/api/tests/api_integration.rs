//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::auth::SignedTokenVerifier;
use api::config::{Config, PaymentConfig};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{ProductId, ShopId, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::{InMemoryPaymentGateway, WebhookVerifier};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use store::{
    InMemoryStore, ProductRecord, ProductStore, Role, ShopRecord, UserRecord, UserStore,
};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const TOKEN_SECRET: &str = "test-token-secret";
const WEBHOOK_SECRET: &str = "whsec_test";
const IDENTITY_SECRET: &str = "idsec_test";

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn config(webhook_secret: Option<&str>) -> Config {
    Config {
        auth_token_secret: SecretString::from(TOKEN_SECRET.to_string()),
        payment: PaymentConfig {
            webhook_secret: webhook_secret.map(|s| SecretString::from(s.to_string())),
            ..PaymentConfig::default()
        },
        identity_webhook_secret: Some(SecretString::from(IDENTITY_SECRET.to_string())),
        ..Config::default()
    }
}

struct TestApp {
    app: axum::Router,
    store: InMemoryStore,
    gateway: InMemoryPaymentGateway,
}

struct Caller {
    user: UserRecord,
    token: String,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(config(Some(WEBHOOK_SECRET)))
    }

    fn with_config(config: Config) -> Self {
        let store = InMemoryStore::new();
        let gateway = InMemoryPaymentGateway::new();
        let state = api::create_state(store.clone(), Arc::new(gateway.clone()), &config);
        Self {
            app: api::create_app(state, get_metrics_handle()),
            store,
            gateway,
        }
    }

    async fn caller(&self, external_id: &str, role: Role) -> Caller {
        let user = self
            .store
            .upsert_user(UserRecord {
                id: UserId::new(),
                external_id: external_id.to_string(),
                email: format!("{external_id}@example.com"),
                role,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let token = SignedTokenVerifier::new(SecretString::from(TOKEN_SECRET.to_string()))
            .issue(external_id)
            .unwrap();
        Caller { user, token }
    }

    async fn product(&self, vendor: &Caller, price: i64, stock: i32) -> ProductRecord {
        let now = Utc::now();
        let shop = match self.store.shop_for_vendor(vendor.user.id).await.unwrap() {
            Some(shop) => shop,
            None => {
                let shop = ShopRecord {
                    id: ShopId::new(),
                    vendor_id: vendor.user.id,
                    name: "Patan Crafts".to_string(),
                    is_active: true,
                    created_at: now,
                };
                self.store.insert_shop(shop.clone()).await.unwrap();
                shop
            }
        };
        let product = ProductRecord {
            id: ProductId::new(),
            shop_id: shop.id,
            name: format!("Singing Bowl {price}"),
            sku: None,
            price: Decimal::from(price),
            stock_quantity: stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_product(product.clone()).await.unwrap();
        product
    }

    async fn stock(&self, product_id: ProductId) -> i32 {
        self.store
            .get_product(product_id)
            .await
            .unwrap()
            .unwrap()
            .stock_quantity
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        caller: &Caller,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", caller.token));
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn add_to_cart(&self, caller: &Caller, product: &ProductRecord, quantity: i32) {
        let (status, _) = self
            .call(
                "POST",
                "/cart",
                caller,
                Some(json!({ "product_id": product.id, "quantity": quantity })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
}

fn address() -> Value {
    json!({
        "full_name": "Anita Shrestha",
        "phone": "9851000000",
        "address_line1": "Durbar Marg",
        "city": "Kathmandu",
        "country": "Nepal"
    })
}

fn amount(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

mod ops {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let app = TestApp::new();
        let (status, body) = app
            .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = TestApp::new();
        let response = app
            .app
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let app = TestApp::new();
        let (status, body) = app
            .send(Request::builder().uri("/orders").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_forged_token_is_unauthorized() {
        let app = TestApp::new();
        let forged = SignedTokenVerifier::new(SecretString::from("not-ours".to_string()))
            .issue("user_1")
            .unwrap();
        let (status, _) = app
            .send(
                Request::builder()
                    .uri("/orders")
                    .header("authorization", format!("Bearer {forged}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unmapped_identity_is_not_provisioned() {
        let app = TestApp::new();
        let token = SignedTokenVerifier::new(SecretString::from(TOKEN_SECRET.to_string()))
            .issue("user_never_synced")
            .unwrap();
        let (status, body) = app
            .send(
                Request::builder()
                    .uri("/cart")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "user_not_found");
    }
}

mod orders {
    use super::*;

    #[tokio::test]
    async fn test_cod_checkout_round_trip() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;
        let flag = app.product(&vendor, 50, 5).await;

        app.add_to_cart(&customer, &bowl, 1).await;
        app.add_to_cart(&customer, &flag, 2).await;
        let (_, count) = app.call("GET", "/cart/count", &customer, None).await;
        assert_eq!(count["data"]["count"], 3);

        let (status, body) = app
            .call(
                "POST",
                "/orders",
                &customer,
                Some(json!({
                    "shipping_address": address(),
                    "use_same_address": true,
                    "payment_method": "cod",
                    "notes": "  Call before delivery  "
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        let order = &body["data"];
        assert_eq!(order["status"], "confirmed");
        assert_eq!(order["payment_status"], "pending");
        assert_eq!(order["items"].as_array().unwrap().len(), 2);
        assert_eq!(amount(&order["total"]), Decimal::from(200));
        assert_eq!(order["notes"], "Call before delivery");
        assert_eq!(
            order["shipping_address"]["id"],
            order["billing_address"]["id"]
        );

        assert_eq!(app.stock(bowl.id).await, 4);
        assert_eq!(app.stock(flag.id).await, 3);
        let (_, count) = app.call("GET", "/cart/count", &customer, None).await;
        assert_eq!(count["data"]["count"], 0);

        let (status, list) = app.call("GET", "/orders", &customer, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["data"].as_array().unwrap().len(), 1);
        assert_eq!(list["data"][0]["item_count"], 2);

        let id = order["id"].as_str().unwrap();
        let (status, fetched) = app
            .call("GET", &format!("/orders/{id}"), &customer, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["data"]["order_number"], order["order_number"]);
    }

    #[tokio::test]
    async fn test_empty_cart_is_conflict() {
        let app = TestApp::new();
        let customer = app.caller("customer_1", Role::Customer).await;
        let (status, body) = app
            .call(
                "POST",
                "/orders",
                &customer,
                Some(json!({ "shipping_address": address(), "payment_method": "cod" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "empty_cart");
        assert_eq!(app.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_address_is_bad_request() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;
        app.add_to_cart(&customer, &bowl, 1).await;

        let (status, body) = app
            .call("POST", "/orders", &customer, Some(json!({ "payment_method": "cod" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_shipping_address");
        assert_eq!(app.stock(bowl.id).await, 5);
    }

    #[tokio::test]
    async fn test_malformed_body_and_id() {
        let app = TestApp::new();
        let customer = app.caller("customer_1", Role::Customer).await;

        let (status, body) = app
            .call("POST", "/orders", &customer, Some(json!({ "payment_method": "cheque" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = app.call("GET", "/orders/not-a-uuid", &customer, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_other_customers_order_is_not_found() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let owner = app.caller("customer_1", Role::Customer).await;
        let other = app.caller("customer_2", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;
        app.add_to_cart(&owner, &bowl, 1).await;
        let (_, body) = app
            .call(
                "POST",
                "/orders",
                &owner,
                Some(json!({ "shipping_address": address(), "payment_method": "cod" })),
            )
            .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = app.call("GET", &format!("/orders/{id}"), &other, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .call("POST", &format!("/orders/{id}/cancel"), &other, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;
        app.add_to_cart(&customer, &bowl, 2).await;
        let (_, body) = app
            .call(
                "POST",
                "/orders",
                &customer,
                Some(json!({ "shipping_address": address(), "payment_method": "cod" })),
            )
            .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(app.stock(bowl.id).await, 3);

        let (status, cancelled) = app
            .call("POST", &format!("/orders/{id}/cancel"), &customer, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["data"]["status"], "cancelled");
        assert_eq!(app.stock(bowl.id).await, 5);

        let (status, body) = app
            .call("POST", &format!("/orders/{id}/cancel"), &customer, None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "not_cancellable");
        assert_eq!(app.stock(bowl.id).await, 5);
    }
}

mod cart {
    use super::*;

    #[tokio::test]
    async fn test_cart_lifecycle() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 3).await;

        let (status, body) = app
            .call(
                "POST",
                "/cart",
                &customer,
                Some(json!({ "product_id": bowl.id, "quantity": 4 })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "insufficient_stock");

        app.add_to_cart(&customer, &bowl, 2).await;
        let (_, cart) = app.call("GET", "/cart", &customer, None).await;
        assert_eq!(cart["data"]["item_count"], 2);
        assert_eq!(amount(&cart["data"]["subtotal"]), Decimal::from(200));
        let item_id = cart["data"]["items"][0]["id"].as_str().unwrap().to_string();

        let (status, line) = app
            .call(
                "PATCH",
                &format!("/cart/items/{item_id}"),
                &customer,
                Some(json!({ "quantity": 3 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(line["data"]["quantity"], 3);

        let (status, _) = app
            .call(
                "PATCH",
                &format!("/cart/items/{item_id}"),
                &customer,
                Some(json!({ "quantity": 0 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let other = app.caller("customer_2", Role::Customer).await;
        let (status, _) = app
            .call("DELETE", &format!("/cart/items/{item_id}"), &other, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .call("DELETE", &format!("/cart/items/{item_id}"), &customer, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, count) = app.call("GET", "/cart/count", &customer, None).await;
        assert_eq!(count["data"]["count"], 0);
    }

    #[tokio::test]
    async fn test_quantity_overflow_is_rejected() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;

        app.add_to_cart(&customer, &bowl, 1).await;
        let (status, body) = app
            .call(
                "POST",
                "/cart",
                &customer,
                Some(json!({ "product_id": bowl.id, "quantity": i32::MAX })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "insufficient_stock");

        let (_, count) = app.call("GET", "/cart/count", &customer, None).await;
        assert_eq!(count["data"]["count"], 1);
    }
}

mod addresses {
    use super::*;

    #[tokio::test]
    async fn test_address_crud_and_default() {
        let app = TestApp::new();
        let customer = app.caller("customer_1", Role::Customer).await;

        let mut home = address();
        home["is_default"] = json!(true);
        let (status, first) = app.call("POST", "/addresses", &customer, Some(home)).await;
        assert_eq!(status, StatusCode::CREATED);
        let first_id = first["data"]["id"].as_str().unwrap().to_string();

        let mut office = address();
        office["address_line1"] = json!("New Baneshwor");
        let (_, second) = app.call("POST", "/addresses", &customer, Some(office)).await;
        let second_id = second["data"]["id"].as_str().unwrap().to_string();

        let (_, default) = app.call("GET", "/addresses/default", &customer, None).await;
        assert_eq!(default["data"]["id"], first_id.as_str());

        let (status, _) = app
            .call("POST", &format!("/addresses/{second_id}/default"), &customer, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, default) = app.call("GET", "/addresses/default", &customer, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(default["data"]["id"], second_id.as_str());

        let (_, list) = app.call("GET", "/addresses", &customer, None).await;
        let list = list["data"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["id"], second_id.as_str());
        assert_eq!(list.iter().filter(|a| a["is_default"] == true).count(), 1);

        let mut moved = address();
        moved["city"] = json!("Bhaktapur");
        let (status, updated) = app
            .call("PUT", &format!("/addresses/{first_id}"), &customer, Some(moved))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["data"]["city"], "Bhaktapur");

        let mut blank = address();
        blank["phone"] = json!(" ");
        let (status, body) = app
            .call("PUT", &format!("/addresses/{first_id}"), &customer, Some(blank))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "phone is required");

        let other = app.caller("customer_2", Role::Customer).await;
        let (status, _) = app
            .call("GET", &format!("/addresses/{first_id}"), &other, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .call("DELETE", &format!("/addresses/{first_id}"), &customer, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .call("GET", &format!("/addresses/{first_id}"), &customer, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_default_address_is_null_without_one() {
        let app = TestApp::new();
        let customer = app.caller("customer_1", Role::Customer).await;
        app.call("POST", "/addresses", &customer, Some(address())).await;

        let (status, body) = app.call("GET", "/addresses/default", &customer, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].is_null());
    }
}

mod vendor {
    use super::*;

    async fn place_order(app: &TestApp, customer: &Caller, product: &ProductRecord) -> String {
        app.add_to_cart(customer, product, 1).await;
        let (status, body) = app
            .call(
                "POST",
                "/orders",
                customer,
                Some(json!({ "shipping_address": address(), "payment_method": "cod" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_status_updates_are_role_and_shop_scoped() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let rival = app.caller("vendor_2", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;
        app.product(&rival, 80, 5).await;
        let id = place_order(&app, &customer, &bowl).await;
        let uri = format!("/vendor/orders/{id}/status");

        let (status, body) = app
            .call("PATCH", &uri, &customer, Some(json!({ "status": "processing" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, _) = app
            .call("PATCH", &uri, &rival, Some(json!({ "status": "processing" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .call("PATCH", &uri, &vendor, Some(json!({ "status": "processing" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "processing");

        let (status, body) = app
            .call("PATCH", &uri, &vendor, Some(json!({ "status": "confirmed" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_transition");

        let admin = app.caller("admin_1", Role::Admin).await;
        let (status, body) = app
            .call("PATCH", &uri, &admin, Some(json!({ "status": "shipped" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "shipped");
    }

    #[tokio::test]
    async fn test_vendor_order_listing() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;
        place_order(&app, &customer, &bowl).await;

        let (status, body) = app.call("GET", "/vendor/orders", &vendor, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = app.call("GET", "/vendor/orders", &customer, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}

mod payments_flow {
    use super::*;

    async fn open_session(app: &TestApp, customer: &Caller, product: &ProductRecord) -> Value {
        app.add_to_cart(customer, product, 2).await;
        let (status, body) = app
            .call(
                "POST",
                "/checkout/session",
                customer,
                Some(json!({ "shipping_address": address(), "use_same_address": true })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"].clone()
    }

    fn webhook(body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/payment")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(payments::SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn sign(body: &str) -> String {
        WebhookVerifier::new(SecretString::from(WEBHOOK_SECRET.to_string()))
            .sign(body.as_bytes(), Utc::now().timestamp())
            .unwrap()
    }

    fn completed(session_id: &str) -> String {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": { "id": session_id } }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_session_then_signed_webhook_confirms_order() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;

        let result = open_session(&app, &customer, &bowl).await;
        assert_eq!(result["order"]["status"], "pending");
        assert_eq!(result["order"]["payment_method"], "card");
        let session_id = result["session_id"].as_str().unwrap().to_string();
        assert!(result["redirect_url"].as_str().unwrap().contains(&session_id));
        assert_eq!(app.stock(bowl.id).await, 3);

        let (status, verify) = app
            .call(
                "GET",
                &format!("/checkout/verify?session_id={session_id}"),
                &customer,
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verify["data"]["payment_status"], "unpaid");

        let body = completed(&session_id);
        let (status, _) = app.send(webhook(&body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, reply) = app.send(webhook(&body, Some("t=1,v1=00".to_string()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply["error"], "invalid_signature");

        let (status, ack) = app.send(webhook(&body, Some(sign(&body)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "applied");
        let (status, ack) = app.send(webhook(&body, Some(sign(&body)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "already_applied");

        let id = result["order"]["id"].as_str().unwrap();
        let (_, order) = app
            .call("GET", &format!("/orders/{id}"), &customer, None)
            .await;
        assert_eq!(order["data"]["status"], "confirmed");
        assert_eq!(order["data"]["payment_status"], "paid");
        assert_eq!(order["data"]["payment_session_id"], session_id.as_str());

        app.gateway.mark_paid(&session_id);
        let (_, verify) = app
            .call(
                "GET",
                &format!("/checkout/verify?session_id={session_id}"),
                &customer,
                None,
            )
            .await;
        assert_eq!(verify["data"]["payment_status"], "paid");
    }

    #[tokio::test]
    async fn test_unknown_events_and_sessions_are_acknowledged() {
        let app = TestApp::new();
        let other = json!({
            "id": "evt_2",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        })
        .to_string();
        let (status, ack) = app.send(webhook(&other, Some(sign(&other)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "ignored");

        let stray = completed("cs_unknown");
        let (status, ack) = app.send(webhook(&stray, Some(sign(&stray)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "unknown_session");
    }

    #[tokio::test]
    async fn test_webhooks_refused_without_secret() {
        let app = TestApp::with_config(config(None));
        let body = completed("cs_test_0001");
        let (status, _) = app.send(webhook(&body, Some(sign(&body)))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_gateway_failure_rolls_back_and_returns_502() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let bowl = app.product(&vendor, 100, 5).await;
        app.add_to_cart(&customer, &bowl, 2).await;
        app.gateway.set_fail_on_create(true);

        let (status, body) = app
            .call(
                "POST",
                "/checkout/session",
                &customer,
                Some(json!({ "shipping_address": address() })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "payment_gateway_error");

        assert_eq!(app.stock(bowl.id).await, 5);
        let (_, count) = app.call("GET", "/cart/count", &customer, None).await;
        assert_eq!(count["data"]["count"], 2);
    }

    #[tokio::test]
    async fn test_verify_requires_session_id() {
        let app = TestApp::new();
        let customer = app.caller("customer_1", Role::Customer).await;
        let (status, _) = app.call("GET", "/checkout/verify", &customer, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .call("GET", "/checkout/verify?session_id=cs_missing", &customer, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_session");
    }
}

mod identity_sync {
    use api::routes::webhooks::IDENTITY_SIGNATURE_HEADER;

    use super::*;

    fn user_event(event_type: &str, external_id: &str, role: Option<&str>) -> String {
        json!({
            "type": event_type,
            "data": {
                "id": external_id,
                "email_addresses": [{ "id": "idn_1", "email_address": "anita@example.com" }],
                "primary_email_address_id": "idn_1",
                "public_metadata": { "role": role }
            }
        })
        .to_string()
    }

    fn signed(body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/identity")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(IDENTITY_SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn sign(body: &str) -> String {
        WebhookVerifier::new(SecretString::from(IDENTITY_SECRET.to_string()))
            .sign(body.as_bytes(), Utc::now().timestamp())
            .unwrap()
    }

    async fn deliver(app: &TestApp, body: &str) -> (StatusCode, Value) {
        app.send(signed(body, Some(sign(body)))).await
    }

    async fn synced(app: &TestApp, external_id: &str) -> Caller {
        let user = app
            .store
            .find_user_by_external_id(external_id)
            .await
            .unwrap()
            .unwrap();
        let token = SignedTokenVerifier::new(SecretString::from(TOKEN_SECRET.to_string()))
            .issue(external_id)
            .unwrap();
        Caller { user, token }
    }

    #[tokio::test]
    async fn test_created_user_can_sign_in() {
        let app = TestApp::new();
        let (status, ack) =
            deliver(&app, &user_event("user.created", "user_2abc", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "provisioned");

        let customer = synced(&app, "user_2abc").await;
        assert_eq!(customer.user.role, Role::Customer);
        assert_eq!(customer.user.email, "anita@example.com");
        let (status, _) = app.call("GET", "/cart", &customer, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_promotes_to_vendor() {
        let app = TestApp::new();
        deliver(&app, &user_event("user.created", "user_2abc", None)).await;
        let (status, _) =
            deliver(&app, &user_event("user.updated", "user_2abc", Some("vendor"))).await;
        assert_eq!(status, StatusCode::OK);

        let vendor = synced(&app, "user_2abc").await;
        assert_eq!(vendor.user.role, Role::Vendor);
        let (status, _) = app
            .call("POST", "/vendor/shop", &vendor, Some(json!({ "name": "Patan Crafts" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_deleted_user_loses_access() {
        let app = TestApp::new();
        deliver(&app, &user_event("user.created", "user_2abc", None)).await;
        let customer = synced(&app, "user_2abc").await;

        let (status, ack) =
            deliver(&app, &user_event("user.deleted", "user_2abc", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "deactivated");

        let (status, body) = app.call("GET", "/cart", &customer, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "user_not_found");

        let (status, ack) =
            deliver(&app, &user_event("user.deleted", "user_2abc", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "unknown_user");
    }

    #[tokio::test]
    async fn test_unsigned_or_forged_events_are_rejected() {
        let app = TestApp::new();
        let body = user_event("user.created", "user_2abc", Some("admin"));

        let (status, _) = app.send(signed(&body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let forged = WebhookVerifier::new(SecretString::from("not-ours".to_string()))
            .sign(body.as_bytes(), Utc::now().timestamp())
            .unwrap();
        let (status, reply) = app.send(signed(&body, Some(forged))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply["error"], "invalid_signature");

        let (status, _) = app.send(signed(&body, Some(sign(&body[1..])))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert!(app.store.find_user_by_external_id("user_2abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_without_secret_every_event_is_rejected() {
        let app = TestApp::with_config(Config {
            identity_webhook_secret: None,
            ..config(Some(WEBHOOK_SECRET))
        });
        let body = user_event("user.created", "user_2abc", None);

        let (status, _) = deliver(&app, &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(app.store.find_user_by_external_id("user_2abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_and_unhandled_events() {
        let app = TestApp::new();

        let (status, body) =
            deliver(&app, &user_event("user.created", "user_2abc", Some("superuser"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let session = json!({ "type": "session.created", "data": { "id": "sess_1" } }).to_string();
        let (status, ack) = deliver(&app, &session).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["data"]["outcome"], "ignored");
    }
}

mod catalog {
    use super::*;

    async fn open_shop(app: &TestApp, vendor: &Caller) {
        let (status, _) = app
            .call("POST", "/vendor/shop", vendor, Some(json!({ "name": "Patan Crafts" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn create(app: &TestApp, vendor: &Caller, name: &str, price: &str) -> Value {
        let (status, body) = app
            .call(
                "POST",
                "/vendor/products",
                vendor,
                Some(json!({ "name": name, "price": price, "stock_quantity": 4 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"].clone()
    }

    #[tokio::test]
    async fn test_vendor_opens_a_single_shop() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;

        let (status, _) = app.call("GET", "/vendor/shop", &vendor, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        open_shop(&app, &vendor).await;
        let (status, shop) = app.call("GET", "/vendor/shop", &vendor, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shop["data"]["name"], "Patan Crafts");
        assert_eq!(shop["data"]["vendor_id"], vendor.user.id.to_string());

        let (status, body) = app
            .call("POST", "/vendor/shop", &vendor, Some(json!({ "name": "Another" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "shop_exists");

        let (status, _) = app
            .call("POST", "/vendor/shop", &customer, Some(json!({ "name": "Mine" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_created_product_is_sellable() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        open_shop(&app, &vendor).await;

        let product = create(&app, &vendor, "Brass Bowl", "250.00").await;
        assert_eq!(amount(&product["price"]), Decimal::from(250));
        assert_eq!(product["stock_quantity"], 4);

        let (status, _) = app
            .call(
                "POST",
                "/cart",
                &customer,
                Some(json!({ "product_id": product["id"], "quantity": 2 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_products_are_rejected() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let customer = app.caller("customer_1", Role::Customer).await;
        let payload = json!({ "name": "Brass Bowl", "price": "10.00" });

        let (status, _) = app
            .call("POST", "/vendor/products", &vendor, Some(payload.clone()))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        open_shop(&app, &vendor).await;
        for bad in [
            json!({ "name": "Brass Bowl", "price": "0" }),
            json!({ "name": "  ", "price": "10.00" }),
            json!({ "name": "Brass Bowl", "price": "10.00", "stock_quantity": -1 }),
        ] {
            let (status, body) = app.call("POST", "/vendor/products", &vendor, Some(bad)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
        }

        let (status, _) = app
            .call("POST", "/vendor/products", &customer, Some(payload))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_listing_shows_only_own_products() {
        let app = TestApp::new();
        let vendor = app.caller("vendor_1", Role::Vendor).await;
        let rival = app.caller("vendor_2", Role::Vendor).await;
        open_shop(&app, &vendor).await;
        create(&app, &vendor, "Cheap Bowl", "10.00").await;
        create(&app, &vendor, "Brass Bowl", "90.00").await;
        app.product(&rival, 50, 3).await;

        let (status, body) = app
            .call("GET", "/vendor/products?sort=price_desc", &vendor, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["Brass Bowl", "Cheap Bowl"]);

        let (_, body) = app
            .call("GET", "/vendor/products?search=cheap&limit=5", &vendor, None)
            .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = app
            .call("GET", "/vendor/products?sort=cheapest", &vendor, None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
