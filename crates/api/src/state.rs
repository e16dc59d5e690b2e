//! Shared application state.

use std::sync::Arc;

use domain::{
    AddressService, CartService, CatalogService, CheckoutService, OrderService, UserDirectory,
};
use payments::{
    CheckoutSessionCoordinator, PaymentGateway, ReconciliationService, RedirectUrls,
    WebhookVerifier,
};
use store::CommerceStore;

use crate::auth::{IdentityVerifier, SignedTokenVerifier};
use crate::config::Config;

/// The configured payment gateway.
pub type SharedGateway = Arc<dyn PaymentGateway>;

/// Services accessible from all handlers.
pub struct AppState<S: CommerceStore> {
    pub users: UserDirectory<S>,
    pub catalog: CatalogService<S>,
    pub carts: CartService<S>,
    pub addresses: AddressService<S>,
    pub checkout: CheckoutService<S>,
    pub orders: OrderService<S>,
    pub sessions: CheckoutSessionCoordinator<S, SharedGateway>,
    pub reconciliation: ReconciliationService<S, SharedGateway>,
    pub identity: Arc<dyn IdentityVerifier>,
    /// `None` when no webhook secret is configured; webhooks are then refused.
    pub webhooks: Option<WebhookVerifier>,
    /// Verifies user sync events. Same signature scheme, separate secret.
    pub identity_webhooks: Option<WebhookVerifier>,
}

impl<S: CommerceStore + Clone> AppState<S> {
    /// Builds the state with the signed-token verifier from `config`.
    pub fn new(store: S, gateway: SharedGateway, config: &Config) -> Self {
        let identity = Arc::new(SignedTokenVerifier::new(config.auth_token_secret.clone()));
        Self::with_identity(store, gateway, identity, config)
    }

    pub fn with_identity(
        store: S,
        gateway: SharedGateway,
        identity: Arc<dyn IdentityVerifier>,
        config: &Config,
    ) -> Self {
        let urls = RedirectUrls::for_frontend(&config.payment.frontend_url);
        Self {
            users: UserDirectory::new(store.clone()),
            catalog: CatalogService::new(store.clone()),
            carts: CartService::new(store.clone()),
            addresses: AddressService::new(store.clone()),
            checkout: CheckoutService::new(store.clone()),
            orders: OrderService::new(store.clone()),
            sessions: CheckoutSessionCoordinator::new(store.clone(), gateway.clone(), urls),
            reconciliation: ReconciliationService::new(store, gateway),
            identity,
            webhooks: config.payment.webhook_secret.clone().map(WebhookVerifier::new),
            identity_webhooks: config.identity_webhook_secret.clone().map(WebhookVerifier::new),
        }
    }
}
