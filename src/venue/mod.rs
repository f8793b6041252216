pub mod auth;
pub mod rest;
pub mod types;

use std::future::Future;

use thiserror::Error;

use self::types::{
    BalanceResponse, CreateOrderRequest, PositionsResponse, VenueOrder,
};

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("venue rejected: {0}")]
    Validation(String),
    #[error("order not found")]
    UnknownOrder,
    #[error("venue error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("auth: {0}")]
    Auth(String),
}

impl VenueError {
    /// Transient failures worth a bounded retry. Validation and auth
    /// failures are not — retrying the same bad request cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            VenueError::Transport(_) | VenueError::Timeout | VenueError::RateLimited => true,
            VenueError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// The narrow boundary the engine sees of the venue. The live client signs
/// REST calls; tests drive the whole loop through [`MockVenue`].
#[allow(async_fn_in_trait)]
pub trait VenueClient: Send + Sync + 'static {
    fn place_order(
        &self,
        req: CreateOrderRequest,
    ) -> impl Future<Output = Result<VenueOrder, VenueError>> + Send;

    fn cancel_order(
        &self,
        venue_id: &str,
    ) -> impl Future<Output = Result<(), VenueError>> + Send;

    fn batch_cancel(
        &self,
        venue_ids: Vec<String>,
    ) -> impl Future<Output = Result<(), VenueError>> + Send;

    fn fetch_positions(
        &self,
    ) -> impl Future<Output = Result<PositionsResponse, VenueError>> + Send;

    fn fetch_balance(
        &self,
    ) -> impl Future<Output = Result<BalanceResponse, VenueError>> + Send;
}

#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::types::*;
    use super::{VenueClient, VenueError};

    /// In-memory venue: records placements, hands out ids, honors cancels.
    /// Error injection drives the failure-path tests.
    #[derive(Default)]
    pub struct MockVenue {
        next_id: AtomicU64,
        pub orders: Mutex<HashMap<String, CreateOrderRequest>>,
        pub canceled: Mutex<Vec<String>>,
        pub fail_next_place: Mutex<Option<VenueError>>,
        pub fail_next_cancel: Mutex<Option<VenueError>>,
    }

    impl MockVenue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn order_count(&self) -> usize {
            self.orders.lock().unwrap().len()
        }
    }

    impl VenueClient for MockVenue {
        async fn place_order(&self, req: CreateOrderRequest) -> Result<VenueOrder, VenueError> {
            if let Some(err) = self.fail_next_place.lock().unwrap().take() {
                return Err(err);
            }
            let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            let order = VenueOrder {
                order_id: id.clone(),
                ticker: req.ticker.clone(),
                status: VenueOrderStatus::Resting,
                remaining_count: Some(req.count),
                client_order_id: Some(req.client_order_id.clone()),
            };
            self.orders.lock().unwrap().insert(id, req);
            Ok(order)
        }

        async fn cancel_order(&self, venue_id: &str) -> Result<(), VenueError> {
            if let Some(err) = self.fail_next_cancel.lock().unwrap().take() {
                return Err(err);
            }
            if self.orders.lock().unwrap().remove(venue_id).is_none() {
                return Err(VenueError::UnknownOrder);
            }
            self.canceled.lock().unwrap().push(venue_id.to_string());
            Ok(())
        }

        async fn batch_cancel(&self, venue_ids: Vec<String>) -> Result<(), VenueError> {
            let mut orders = self.orders.lock().unwrap();
            let mut canceled = self.canceled.lock().unwrap();
            for id in venue_ids {
                orders.remove(&id);
                canceled.push(id);
            }
            Ok(())
        }

        async fn fetch_positions(&self) -> Result<PositionsResponse, VenueError> {
            Ok(PositionsResponse {
                market_positions: Vec::new(),
                cursor: None,
            })
        }

        async fn fetch_balance(&self) -> Result<BalanceResponse, VenueError> {
            Ok(BalanceResponse { balance: 1_000_000 })
        }
    }
}
