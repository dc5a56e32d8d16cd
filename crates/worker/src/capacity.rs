//! Per-provider capacity and pacing checks.
//!
//! Concurrency is always computed from the store (count of `processing`
//! jobs), so a restarted process sees the right numbers immediately. Only
//! the time of the last start lives in memory, in [`PacingState`]; losing it
//! on restart at worst lets one job start slightly early.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::providers::ProviderLimits;
use cadence_core::types::Timestamp;
use cadence_db::{JobStore, StoreError};
use serde::Serialize;

// ---------------------------------------------------------------------------
// CapacityTracker
// ---------------------------------------------------------------------------

/// Result of a capacity check for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityStatus {
    pub is_available: bool,
    pub active_count: i64,
    pub max_concurrent: u32,
}

/// Answers "can provider P take another job right now?" from the store.
pub struct CapacityTracker {
    store: Arc<dyn JobStore>,
    /// Providers in configuration order; dispatch visits them in this order.
    limits: Vec<ProviderLimits>,
}

impl CapacityTracker {
    pub fn new(store: Arc<dyn JobStore>, limits: Vec<ProviderLimits>) -> Self {
        Self { store, limits }
    }

    /// Configured providers.
    pub fn providers(&self) -> &[ProviderLimits] {
        &self.limits
    }

    pub fn limits_for(&self, provider: &str) -> Option<&ProviderLimits> {
        self.limits.iter().find(|l| l.name == provider)
    }

    pub fn is_configured(&self, provider: &str) -> bool {
        self.limits_for(provider).is_some()
    }

    /// Compare the provider's processing count against its ceiling.
    ///
    /// An unconfigured provider is reported unavailable with a ceiling of 0.
    pub async fn available(&self, provider: &str) -> Result<CapacityStatus, StoreError> {
        let Some(limits) = self.limits_for(provider) else {
            return Ok(CapacityStatus {
                is_available: false,
                active_count: 0,
                max_concurrent: 0,
            });
        };
        let active_count = self.store.count_processing(provider).await?;
        Ok(CapacityStatus {
            is_available: active_count < i64::from(limits.max_concurrent),
            active_count,
            max_concurrent: limits.max_concurrent,
        })
    }
}

// ---------------------------------------------------------------------------
// PacingState
// ---------------------------------------------------------------------------

/// Last observed start time per provider, scoped to one orchestrator.
#[derive(Debug, Default)]
pub struct PacingState {
    last_start: HashMap<String, Timestamp>,
}

impl PacingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `provider` may start another job; zero when ready.
    pub fn remaining(&self, provider: &str, min_interval: Duration, now: Timestamp) -> Duration {
        let Some(last) = self.last_start.get(provider) else {
            return Duration::ZERO;
        };
        let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
        min_interval.saturating_sub(elapsed)
    }

    pub fn is_ready(&self, provider: &str, min_interval: Duration, now: Timestamp) -> bool {
        self.remaining(provider, min_interval, now).is_zero()
    }

    pub fn record_start(&mut self, provider: &str, now: Timestamp) {
        self.last_start.insert(provider.to_string(), now);
    }

    pub fn last_start(&self, provider: &str) -> Option<Timestamp> {
        self.last_start.get(provider).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
