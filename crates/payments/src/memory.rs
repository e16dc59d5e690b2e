//! In-memory payment gateway for development and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{PaymentError, Result};
use crate::gateway::{CheckoutSession, CheckoutSessionRequest, PaymentGateway, SessionStatus};

#[derive(Debug, Default)]
struct GatewayState {
    sessions: HashMap<String, (CheckoutSessionRequest, String)>,
    next_id: u32,
    fail_on_create: bool,
}

/// A gateway that keeps sessions in memory and never charges anyone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes session creation fail until reset.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state().fail_on_create = fail;
    }

    /// Marks a session as paid, as if the customer completed checkout.
    pub fn mark_paid(&self, session_id: &str) {
        if let Some((_, status)) = self.state().sessions.get_mut(session_id) {
            *status = "paid".to_string();
        }
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Returns the request a session was opened with.
    pub fn request_for(&self, session_id: &str) -> Option<CheckoutSessionRequest> {
        self.state()
            .sessions
            .get(session_id)
            .map(|(request, _)| request.clone())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        let mut state = self.state();
        if state.fail_on_create {
            return Err(PaymentError::Declined("gateway unavailable".to_string()));
        }

        state.next_id += 1;
        let session_id = format!("cs_test_{:04}", state.next_id);
        let redirect_url = format!("https://checkout.example.test/pay/{session_id}");
        state
            .sessions
            .insert(session_id.clone(), (request, "unpaid".to_string()));

        Ok(CheckoutSession {
            session_id,
            redirect_url,
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionStatus> {
        let state = self.state();
        let (request, payment_status) = state
            .sessions
            .get(session_id)
            .ok_or_else(|| PaymentError::UnknownSession(session_id.to_string()))?;

        Ok(SessionStatus {
            session_id: session_id.to_string(),
            payment_status: payment_status.clone(),
            order_id: Some(request.order_id),
            order_number: Some(request.order_number.clone()),
        })
    }
}
