//! Payments for the commerce backend.
//!
//! - [`PaymentGateway`] opens hosted checkout sessions; [`StripeGateway`]
//!   talks to a Stripe-compatible API and [`InMemoryPaymentGateway`] is used
//!   in development and tests.
//! - [`CheckoutSessionCoordinator`] creates a card order and its session
//!   together, rolling the order back if the gateway fails.
//! - [`ReconciliationService`] applies payment outcomes delivered by webhook.

pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod reconciliation;
pub mod stripe;
pub mod webhook;

pub use coordinator::{CheckoutSessionCoordinator, CheckoutSessionResult, RedirectUrls};
pub use error::{PaymentError, Result};
pub use gateway::{
    CheckoutSession, CheckoutSessionRequest, PaymentGateway, SessionLineItem, SessionStatus,
};
pub use memory::InMemoryPaymentGateway;
pub use reconciliation::{ReconcileOutcome, ReconciliationService};
pub use stripe::StripeGateway;
pub use webhook::{PaymentEvent, SIGNATURE_HEADER, WebhookVerifier};
