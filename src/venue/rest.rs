use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::auth::RequestSigner;
use super::types::{
    BalanceResponse, BatchCancelRequest, CreateOrderRequest, OrderResponse, PositionsResponse,
    VenueOrder,
};
use super::{VenueClient, VenueError};

/// Venue call budget, shared by every caller in the process. Place and
/// cancel are charged full price; portfolio reads are cheaper.
pub const PLACE_COST: f64 = 1.0;
pub const CANCEL_COST: f64 = 1.0;
pub const READ_COST: f64 = 0.5;

pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_s: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_s: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_s,
        }
    }

    /// Take `cost` tokens now, or report how long until they exist. The
    /// lock is held only for the arithmetic.
    fn take_or_wait(&self, cost: f64) -> Option<Duration> {
        let mut st = self.state.lock().unwrap();
        let now = Instant::now();
        st.tokens = (st.tokens + now.duration_since(st.last_refill).as_secs_f64() * self.refill_per_s)
            .min(self.capacity);
        st.last_refill = now;
        if st.tokens >= cost {
            st.tokens -= cost;
            None
        } else {
            Some(Duration::from_secs_f64(
                ((cost - st.tokens) / self.refill_per_s).max(0.01),
            ))
        }
    }

    pub async fn acquire(&self, cost: f64) {
        while let Some(wait) = self.take_or_wait(cost) {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Authenticated REST client. One attempt per call; retry policy lives in
/// the gateway so the engine controls it.
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    /// Path prefix included in the signed message, e.g. "/trade-api/v2".
    sign_prefix: String,
    signer: RequestSigner,
    bucket: TokenBucket,
}

impl RestClient {
    pub fn new(
        base: String,
        signer: RequestSigner,
        timeout_ms: u64,
        rate_limit_per_s: f64,
    ) -> Result<Self, VenueError> {
        let sign_prefix = base
            .find("/trade-api")
            .map(|i| base[i..].to_string())
            .unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base,
            sign_prefix,
            signer,
            bucket: TokenBucket::new(rate_limit_per_s * 2.0, rate_limit_per_s),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        cost: f64,
    ) -> Result<T, VenueError> {
        self.bucket.acquire(cost).await;

        let url = format!("{}{}", self.base, path);
        let sign_path = format!("{}{}", self.sign_prefix, path);
        let mut req = self.http.request(method.clone(), &url);
        for (name, value) in self.signer.headers(method.as_str(), &sign_path) {
            req = req.header(name, value);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                VenueError::Timeout
            } else {
                VenueError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| VenueError::Transport(format!("decode: {}", e)));
        }

        let message = resp.text().await.unwrap_or_default();
        debug!(%status, %message, %url, "venue call failed");
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => VenueError::RateLimited,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VenueError::Auth(message),
            StatusCode::NOT_FOUND => VenueError::UnknownOrder,
            s if s.is_client_error() => VenueError::Validation(message),
            s => VenueError::Api {
                status: s.as_u16(),
                message,
            },
        })
    }
}

impl VenueClient for RestClient {
    async fn place_order(&self, req: CreateOrderRequest) -> Result<VenueOrder, VenueError> {
        let body = serde_json::to_value(&req)
            .map_err(|e| VenueError::Validation(format!("serialize: {}", e)))?;
        let resp: OrderResponse = self
            .send(Method::POST, "/portfolio/orders", Some(body), PLACE_COST)
            .await?;
        Ok(resp.order)
    }

    async fn cancel_order(&self, venue_id: &str) -> Result<(), VenueError> {
        let path = format!("/portfolio/orders/{}", venue_id);
        self.send::<serde_json::Value>(Method::DELETE, &path, None, CANCEL_COST)
            .await?;
        Ok(())
    }

    async fn batch_cancel(&self, venue_ids: Vec<String>) -> Result<(), VenueError> {
        let body = serde_json::to_value(BatchCancelRequest { ids: venue_ids })
            .map_err(|e| VenueError::Validation(format!("serialize: {}", e)))?;
        self.send::<serde_json::Value>(
            Method::DELETE,
            "/portfolio/orders/batched",
            Some(body),
            CANCEL_COST,
        )
        .await?;
        Ok(())
    }

    async fn fetch_positions(&self) -> Result<PositionsResponse, VenueError> {
        self.send(Method::GET, "/portfolio/positions", None, READ_COST)
            .await
    }

    async fn fetch_balance(&self) -> Result<BalanceResponse, VenueError> {
        self.send(Method::GET, "/portfolio/balance", None, READ_COST)
            .await
    }
}
