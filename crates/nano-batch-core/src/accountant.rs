//! Session usage and estimated cost

use crate::config::PricingConfig;
use crate::models::CreditInfo;
use std::sync::atomic::{AtomicU64, Ordering};

/// Session-lifetime ledger of successful generations. There is no
/// decrement path; removing a successful item does not refund it.
#[derive(Debug)]
pub struct UsageAccountant {
    generations: AtomicU64,
    cost_per_image: f64,
}

impl Default for UsageAccountant {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

impl UsageAccountant {
    pub fn new(cost_per_image: f64) -> Self {
        Self {
            generations: AtomicU64::new(0),
            cost_per_image,
        }
    }

    pub fn from_config(config: &PricingConfig) -> Self {
        Self::new(config.cost_per_image)
    }

    /// Called once per item entering `success`
    pub fn record_success(&self) {
        self.generations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_generations(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn credit_info(&self) -> CreditInfo {
        let session_generations = self.session_generations();
        CreditInfo {
            session_generations,
            estimated_session_cost: session_generations as f64 * self.cost_per_image,
            cost_per_image: self.cost_per_image,
        }
    }
}
