//! Applying payment outcomes to orders.

use chrono::Utc;
use common::{OrderStatus, PaymentStatus};
use domain::TransitionPlan;
use store::{CommerceStore, OrderRecord, StoreError};

use crate::error::{PaymentError, Result};
use crate::gateway::{PaymentGateway, SessionStatus};
use crate::webhook::PaymentEvent;

/// What a reconciliation call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order was updated.
    Applied,
    /// The outcome was already recorded; nothing changed.
    AlreadyApplied,
    /// The outcome no longer applies to the order and was not recorded.
    Skipped,
    /// The event type is not one we act on.
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::AlreadyApplied => "already_applied",
            ReconcileOutcome::Skipped => "skipped",
            ReconcileOutcome::Ignored => "ignored",
        }
    }
}

/// Consumes payment outcomes and advances order and payment status.
///
/// Every handler is safe to call again for the same session.
#[derive(Clone)]
pub struct ReconciliationService<S: CommerceStore, G: PaymentGateway> {
    store: S,
    gateway: G,
}

impl<S: CommerceStore, G: PaymentGateway> ReconciliationService<S, G> {
    pub fn new(store: S, gateway: G) -> Self {
        Self { store, gateway }
    }

    async fn order_for_session(&self, session_id: &str) -> Result<OrderRecord> {
        self.store
            .find_order_by_payment_session(session_id)
            .await?
            .ok_or_else(|| PaymentError::UnknownSession(session_id.to_string()))
    }

    /// Records a completed payment: payment becomes paid and a pending
    /// order is confirmed.
    #[tracing::instrument(skip(self))]
    pub async fn handle_payment_success(&self, session_id: &str) -> Result<ReconcileOutcome> {
        let order = self.order_for_session(session_id).await?;
        let outcome = self.apply_success(order).await?;
        record("success", outcome);
        Ok(outcome)
    }

    async fn apply_success(&self, order: OrderRecord) -> Result<ReconcileOutcome> {
        if order.payment_status == PaymentStatus::Paid && order.status != OrderStatus::Pending {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        if order.status != OrderStatus::Pending {
            // The order moved on without us, e.g. an operator confirmed it.
            tracing::warn!(
                order_id = %order.id,
                status = %order.status,
                "payment received for non-pending order"
            );
            self.store
                .set_payment_status(order.id, PaymentStatus::Paid)
                .await?;
            return Ok(ReconcileOutcome::Applied);
        }

        let plan = TransitionPlan::for_order(&order, OrderStatus::Confirmed)?
            .with_payment_status(PaymentStatus::Paid);
        match self
            .store
            .apply_status_change(plan.into_change(&order, Utc::now()))
            .await
        {
            Ok(updated) => {
                tracing::info!(
                    order_id = %updated.id,
                    order_number = %updated.order_number,
                    "payment confirmed"
                );
                Ok(ReconcileOutcome::Applied)
            }
            // Another writer moved the order first, e.g. a redelivered event.
            Err(StoreError::StatusConflict { actual, .. }) => {
                let current = self
                    .store
                    .get_order(order.id)
                    .await?
                    .ok_or_else(|| PaymentError::UnknownSession(order.id.to_string()))?;
                if current.payment_status == PaymentStatus::Paid {
                    return Ok(ReconcileOutcome::AlreadyApplied);
                }
                tracing::warn!(
                    order_id = %order.id,
                    status = %actual,
                    "payment received for non-pending order"
                );
                self.store
                    .set_payment_status(order.id, PaymentStatus::Paid)
                    .await?;
                Ok(ReconcileOutcome::Applied)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records a failed or expired payment. The order status is left as is.
    #[tracing::instrument(skip(self))]
    pub async fn handle_payment_failure(&self, session_id: &str) -> Result<ReconcileOutcome> {
        let order = self.order_for_session(session_id).await?;

        let outcome = match order.payment_status {
            PaymentStatus::Failed => ReconcileOutcome::AlreadyApplied,
            PaymentStatus::Paid | PaymentStatus::Refunded => {
                tracing::warn!(
                    order_id = %order.id,
                    payment_status = %order.payment_status,
                    "ignoring failure for settled payment"
                );
                ReconcileOutcome::Skipped
            }
            PaymentStatus::Pending => {
                self.store
                    .set_payment_status(order.id, PaymentStatus::Failed)
                    .await?;
                tracing::info!(order_id = %order.id, "payment failed");
                ReconcileOutcome::Applied
            }
        };

        record("failure", outcome);
        Ok(outcome)
    }

    /// Applies a parsed webhook event.
    pub async fn handle_event(&self, event: &PaymentEvent) -> Result<ReconcileOutcome> {
        match event {
            PaymentEvent::SessionCompleted { session_id, .. } => {
                self.handle_payment_success(session_id).await
            }
            PaymentEvent::SessionFailed { session_id, .. } => {
                self.handle_payment_failure(session_id).await
            }
            PaymentEvent::Ignored {
                event_id,
                event_type,
            } => {
                tracing::debug!(%event_id, %event_type, "ignoring webhook event");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    /// Asks the gateway for the session's state, for the post-redirect page.
    #[tracing::instrument(skip(self))]
    pub async fn verify_session(&self, session_id: &str) -> Result<SessionStatus> {
        self.gateway.get_session(session_id).await
    }
}

fn record(kind: &'static str, outcome: ReconcileOutcome) {
    metrics::counter!(
        "payment_reconciliations_total",
        "kind" => kind,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}
