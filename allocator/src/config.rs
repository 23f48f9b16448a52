//! Configuration for the allocator.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};

use fairshare_resources::ResourceQuantities;

/// How long allocation stays paused after `recover()` before resuming
/// regardless of how many agents reconnected.
pub const ALLOCATION_HOLD_OFF_RECOVERY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Fraction of the expected agent count that must reconnect for recovery
/// to finish early.
pub const AGENT_RECOVERY_FACTOR: f64 = 0.8;

/// Fallback refusal timeout when a framework supplies an invalid
/// `refuse_seconds`.
pub const DEFAULT_REFUSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper clamp for refusal timeouts.
pub const MAX_REFUSE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Allocator configuration.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Interval between periodic allocation passes.
    pub allocation_interval: Duration,

    /// Resource names ignored when computing DRF shares (e.g. `gpus` on
    /// clusters where only a few agents carry them).
    pub fairness_exclude_resource_names: BTreeSet<String>,

    /// Global minimum offer sizes: an offer is viable when it satisfies any
    /// one of these quantity sets. Frameworks may override per role.
    pub min_allocatable_resources: Vec<ResourceQuantities>,

    /// Whether to retain per-framework counters.
    pub publish_per_framework_metrics: bool,

    /// How many removed frameworks keep a counter shell around.
    pub max_completed_frameworks: usize,

    /// Whether agents with GPUs are withheld from frameworks that did not
    /// opt into GPU resources.
    pub filter_gpu_resources: bool,

    /// The master's region; agents in any other region are only offered to
    /// region-aware frameworks.
    pub region: Option<String>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            allocation_interval: Duration::from_secs(1),
            fairness_exclude_resource_names: BTreeSet::new(),
            min_allocatable_resources: vec![
                ResourceQuantities::from([("cpus", 0.01)]),
                ResourceQuantities::from([("mem", 32.0)]),
            ],
            publish_per_framework_metrics: true,
            max_completed_frameworks: 50,
            filter_gpu_resources: true,
            region: None,
        }
    }
}

impl AllocatorConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("FAIRSHARE_ALLOCATION_INTERVAL_MS") {
            let ms: u64 = ms
                .parse()
                .context("FAIRSHARE_ALLOCATION_INTERVAL_MS must be an integer")?;
            config.allocation_interval = Duration::from_millis(ms);
        }

        if let Ok(names) = std::env::var("FAIRSHARE_FAIRNESS_EXCLUDE") {
            config.fairness_exclude_resource_names = names
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(max) = std::env::var("FAIRSHARE_MAX_COMPLETED_FRAMEWORKS") {
            config.max_completed_frameworks = max
                .parse()
                .context("FAIRSHARE_MAX_COMPLETED_FRAMEWORKS must be an integer")?;
        }

        if let Ok(filter) = std::env::var("FAIRSHARE_FILTER_GPU_RESOURCES") {
            config.filter_gpu_resources = filter == "1" || filter.to_lowercase() == "true";
        }

        if let Ok(region) = std::env::var("FAIRSHARE_REGION") {
            if !region.is_empty() {
                config.region = Some(region);
            }
        }

        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================
