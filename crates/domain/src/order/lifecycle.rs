//! Status transitions and their side effects.

use chrono::{DateTime, Utc};
use common::{OrderStatus, PaymentMethod, PaymentStatus};
use store::{Milestone, OrderRecord, StatusChange};

use crate::DomainError;

/// A validated status transition, ready to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Milestone timestamp to set, if not already set.
    pub stamp: Option<Milestone>,
    /// Payment status forced by the transition.
    pub payment_status: Option<PaymentStatus>,
}

impl TransitionPlan {
    /// Checks `to` against the legal-transition table and works out side effects.
    ///
    /// Delivering a cash-on-delivery order marks it paid.
    pub fn for_order(order: &OrderRecord, to: OrderStatus) -> Result<Self, DomainError> {
        let from = order.status;
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidTransition { from, to });
        }

        let stamp = match to {
            OrderStatus::Confirmed => Some(Milestone::Confirmed),
            OrderStatus::Shipped => Some(Milestone::Shipped),
            OrderStatus::Delivered => Some(Milestone::Delivered),
            _ => None,
        };

        let payment_status = (to == OrderStatus::Delivered
            && order.payment_method == PaymentMethod::CashOnDelivery
            && order.payment_status != PaymentStatus::Paid)
            .then_some(PaymentStatus::Paid);

        Ok(Self {
            from,
            to,
            stamp,
            payment_status,
        })
    }

    /// Overrides the payment status written with the transition.
    pub fn with_payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = Some(payment_status);
        self
    }

    pub fn into_change(self, order: &OrderRecord, at: DateTime<Utc>) -> StatusChange {
        StatusChange {
            order_id: order.id,
            from: self.from,
            to: self.to,
            stamp: self.stamp,
            payment_status: self.payment_status,
            at,
        }
    }
}
