//! Broker gateway backends.
//!
//! Concrete implementations of the gateway capability interface, selected at
//! startup configuration time. Every backend is wrapped in the retry
//! decorator before the rest of the engine sees it.

pub mod paper;
pub mod retry;
pub mod scripted;

pub use paper::{PaperBroker, PaperConfig};
pub use retry::{BackoffCalculator, RetryPolicy, RetryingGateway};
pub use scripted::ScriptedBroker;

use crate::config::{BrokerBackend, BrokerSettings};

/// Build the configured gateway backend behind the retry decorator.
#[must_use]
pub fn build_gateway(settings: &BrokerSettings, policy: RetryPolicy) -> RetryingGateway<PaperBroker> {
    match settings.backend {
        BrokerBackend::Paper => {
            RetryingGateway::new(PaperBroker::new(settings.paper.to_paper_config()), policy)
        }
    }
}
