//! Metrics collection for observability
//!
//! Prometheus metrics owned by one engine instance. Collectors are
//! registered on the instance's own [`Registry`], so several engines can
//! live in one process.
//!
//! # Metrics
//!
//! - `dlp_registrations_total` - DLPs registered
//! - `dlp_stakes_created_total` - Stakes opened
//! - `dlp_stakes_closed_total` - Stakes closed
//! - `dlp_stakes_withdrawn_total` - Stakes withdrawn
//! - `dlp_epochs_created_total` - Epochs materialized
//! - `dlp_scores_saved_total` - Oracle score entries written
//! - `dlp_reward_claims_total` - Stakes settled by reward claims
//! - `dlp_eligible_set_size` - Members of the ranked eligible set
//! - `dlp_escrow_balance` - Value escrowed for stakes
//! - `dlp_epochs_per_catch_up` - Histogram of epochs materialized per catch-up

use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// DLPs registered
    pub registrations_total: IntCounter,

    /// Stakes opened
    pub stakes_created_total: IntCounter,

    /// Stakes closed
    pub stakes_closed_total: IntCounter,

    /// Stakes withdrawn
    pub stakes_withdrawn_total: IntCounter,

    /// Epochs materialized
    pub epochs_created_total: IntCounter,

    /// Oracle score entries written
    pub scores_saved_total: IntCounter,

    /// Stakes settled by reward claims
    pub reward_claims_total: IntCounter,

    /// Ranked eligible set size
    pub eligible_set_size: IntGauge,

    /// Escrowed stake value
    pub escrow_balance: Gauge,

    /// Epochs materialized per catch-up
    pub epochs_per_catch_up: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let registrations_total =
            IntCounter::new("dlp_registrations_total", "DLPs registered")?;
        registry.register(Box::new(registrations_total.clone()))?;

        let stakes_created_total =
            IntCounter::new("dlp_stakes_created_total", "Stakes opened")?;
        registry.register(Box::new(stakes_created_total.clone()))?;

        let stakes_closed_total = IntCounter::new("dlp_stakes_closed_total", "Stakes closed")?;
        registry.register(Box::new(stakes_closed_total.clone()))?;

        let stakes_withdrawn_total =
            IntCounter::new("dlp_stakes_withdrawn_total", "Stakes withdrawn")?;
        registry.register(Box::new(stakes_withdrawn_total.clone()))?;

        let epochs_created_total =
            IntCounter::new("dlp_epochs_created_total", "Epochs materialized")?;
        registry.register(Box::new(epochs_created_total.clone()))?;

        let scores_saved_total =
            IntCounter::new("dlp_scores_saved_total", "Oracle score entries written")?;
        registry.register(Box::new(scores_saved_total.clone()))?;

        let reward_claims_total =
            IntCounter::new("dlp_reward_claims_total", "Stakes settled by reward claims")?;
        registry.register(Box::new(reward_claims_total.clone()))?;

        let eligible_set_size =
            IntGauge::new("dlp_eligible_set_size", "Members of the ranked eligible set")?;
        registry.register(Box::new(eligible_set_size.clone()))?;

        let escrow_balance = Gauge::new("dlp_escrow_balance", "Value escrowed for stakes")?;
        registry.register(Box::new(escrow_balance.clone()))?;

        let epochs_per_catch_up = Histogram::with_opts(
            HistogramOpts::new(
                "dlp_epochs_per_catch_up",
                "Histogram of epochs materialized per catch-up",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(epochs_per_catch_up.clone()))?;

        Ok(Self {
            registrations_total,
            stakes_created_total,
            stakes_closed_total,
            stakes_withdrawn_total,
            epochs_created_total,
            scores_saved_total,
            reward_claims_total,
            eligible_set_size,
            escrow_balance,
            epochs_per_catch_up,
            registry,
        })
    }

    /// Record a catch-up that materialized `created` epochs
    pub fn record_catch_up(&self, created: usize) {
        if created > 0 {
            self.epochs_created_total.inc_by(created as u64);
            self.epochs_per_catch_up.observe(created as f64);
        }
    }

    /// Update eligible set size
    pub fn update_eligible_set_size(&self, size: usize) {
        self.eligible_set_size.set(size as i64);
    }

    /// Update escrow balance
    pub fn update_escrow_balance(&self, balance: f64) {
        self.escrow_balance.set(balance);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("registrations_total", &self.registrations_total.get())
            .field("epochs_created_total", &self.epochs_created_total.get())
            .finish_non_exhaustive()
    }
}
