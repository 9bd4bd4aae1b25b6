use thiserror::Error;

use crate::domain::order::OrderStatus;
use crate::domain::product::ProductId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("checkout requires a non-empty cart")]
    EmptyCartCheckout,
    #[error("cart currency {cart} does not match product currency {product}")]
    CurrencyMismatch { cart: String, product: String },
    #[error("product {product_id:?} is not in the cart")]
    LineNotInCart { product_id: ProductId },
    #[error("invalid order transition from {from:?} to {to:?}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures raised while dispatching a named action. Every variant maps to a
/// user-safe message; raw detail goes to the audit trail, not the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("action `{action}` is not registered for this tenant")]
    NotFound { action: String },
    #[error("action `{action}` is disabled for this tenant")]
    Disabled { action: String },
    #[error("action `{action}` has malformed handler reference `{handler}`")]
    InvalidHandler { action: String, handler: String },
    #[error("no implementation registered for `{namespace}.{function}`")]
    FunctionNotFound { namespace: String, function: String },
    #[error("handler `{handler}` failed while executing `{action}`: {message}")]
    Execution { action: String, handler: String, message: String },
}

impl ActionError {
    /// What the end user sees. Deployment defects degrade to an apology;
    /// per-tenant configuration gaps get an honest capability message.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::Disabled { .. } => {
                "I can't help with that here. Try searching for products, managing your cart, or checking an order."
            }
            Self::InvalidHandler { .. } | Self::FunctionNotFound { .. } => {
                "Something is misconfigured on our side. The team has been notified; please try a different request."
            }
            Self::Execution { .. } => {
                "I ran into a problem completing that. Nothing was changed; please try again."
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("order `{order_id}` was not found in this session")]
    OrderNotFound { order_id: String },
}
