//! Bounded retry with exponential backoff for gateway calls.
//!
//! [`RetryingGateway`] wraps any [`BrokerGateway`] and retries calls that
//! failed with a retryable error (network unavailability, rate limiting).
//! Exhausting the attempt budget surfaces the last error, which callers
//! degrade to "retry on next tick" rather than treating as fatal.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::broker_gateway::{
    AccountInfo, BrokerGateway, GatewayError, OpenPosition, OrderFill, PlaceOrderRequest,
};

/// Retry policy for gateway calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial call.
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (0.2 = plus or minus 20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct BackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl BackoffCalculator {
    /// Create a calculator from a policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Next backoff duration with jitter, or `None` once attempts are spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base = self.base_backoff_ms();
        let jittered = self.apply_jitter(base);
        let capped = jittered.min(self.max_backoff_ms);

        self.current_attempt += 1;
        Some(Duration::from_millis(capped))
    }

    /// Current attempt number.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    fn base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 {
            return backoff_ms;
        }
        let mut rng = rand::rng();
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = rng.random_range(min..=max) as u64;
        jittered
    }
}

/// Gateway decorator adding bounded retry with backoff.
#[derive(Debug)]
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGateway<G> {
    /// Wrap a gateway with a retry policy.
    #[must_use]
    pub const fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Access the wrapped gateway.
    #[must_use]
    pub const fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: BrokerGateway> RetryingGateway<G> {
    async fn retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut backoff = BackoffCalculator::new(&self.policy);
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match backoff.next_backoff() {
                    Some(delay) => {
                        tracing::warn!(
                            op,
                            attempt = backoff.current_attempt(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying gateway call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(op, error = %e, "Retry budget exhausted, deferring");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<G: BrokerGateway> BrokerGateway for RetryingGateway<G> {
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<OrderFill, GatewayError> {
        self.retry("place_order", || self.inner.place_order(request.clone()))
            .await
    }

    async fn modify_position(
        &self,
        ticket: &str,
        new_stop_loss: Decimal,
    ) -> Result<(), GatewayError> {
        self.retry("modify_position", || {
            self.inner.modify_position(ticket, new_stop_loss)
        })
        .await
    }

    async fn close_position(&self, ticket: &str) -> Result<(), GatewayError> {
        self.retry("close_position", || self.inner.close_position(ticket))
            .await
    }

    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError> {
        self.retry("get_open_positions", || self.inner.get_open_positions())
            .await
    }

    async fn get_account_info(&self) -> Result<AccountInfo, GatewayError> {
        self.retry("get_account_info", || self.inner.get_account_info())
            .await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
