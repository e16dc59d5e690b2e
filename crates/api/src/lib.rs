//! HTTP API for the multi-vendor commerce backend.
//!
//! Exposes cart, address, checkout and order endpoints for customers, shop,
//! product and order management for vendors, and the webhooks of the payment
//! and identity providers, with structured logging (tracing) and Prometheus
//! metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod response;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::CommerceStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
pub use state::{AppState, SharedGateway};

/// Builds the HTTP router: commerce routes, ops routes, CORS and request tracing.
pub fn create_app<S: CommerceStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{addresses, cart, checkout, orders, vendor, webhooks};

    let ops_router = Router::new()
        .route("/health", get(routes::ops::health))
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/cart", get(cart::get::<S>).post(cart::add::<S>).delete(cart::clear::<S>))
        .route("/cart/count", get(cart::count::<S>))
        .route(
            "/cart/items/{id}",
            patch(cart::update_item::<S>).delete(cart::remove_item::<S>),
        )
        .route("/addresses", get(addresses::list::<S>).post(addresses::create::<S>))
        .route("/addresses/default", get(addresses::get_default::<S>))
        .route(
            "/addresses/{id}",
            get(addresses::get::<S>)
                .put(addresses::update::<S>)
                .delete(addresses::delete::<S>),
        )
        .route("/addresses/{id}/default", post(addresses::set_default::<S>))
        .route("/orders", post(orders::create::<S>).get(orders::list::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/cancel", post(orders::cancel::<S>))
        .route("/checkout/session", post(checkout::create_session::<S>))
        .route("/checkout/verify", get(checkout::verify::<S>))
        .route("/vendor/shop", get(vendor::shop::<S>).post(vendor::open_shop::<S>))
        .route(
            "/vendor/products",
            get(vendor::products::<S>).post(vendor::create_product::<S>),
        )
        .route("/vendor/orders", get(vendor::list::<S>))
        .route("/vendor/orders/{id}/status", patch(vendor::update_status::<S>))
        .route("/webhooks/payment", post(webhooks::payment::<S>))
        .route("/webhooks/identity", post(webhooks::identity::<S>))
        .with_state(state)
        .merge(ops_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state for `store` and `gateway`.
pub fn create_state<S: CommerceStore + Clone + 'static>(
    store: S,
    gateway: SharedGateway,
    config: &Config,
) -> Arc<AppState<S>> {
    Arc::new(AppState::new(store, gateway, config))
}
