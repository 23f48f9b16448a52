//! Offer and inverse-offer refusal filters.
//!
//! When a framework declines an offer it may attach a refusal duration;
//! until it elapses, offers contained by the declined resources are
//! withheld from that (framework, role, agent). Filters are owned records
//! keyed by a monotonically increasing [`FilterId`]; the expiry timer
//! carries the id, and an expiry whose record is already gone (revive,
//! framework removal, agent attribute change) is a no-op.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use fairshare_resources::Resources;

use crate::config::{DEFAULT_REFUSE_TIMEOUT, MAX_REFUSE_TIMEOUT};

/// Identity of a filter record, unique for the lifetime of the allocator.
pub type FilterId = u64;

/// A refusal attached to an offer decline or inverse-offer response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Refusal {
    /// How long to withhold matching offers, in seconds. Invalid values
    /// fall back to a default; oversized values are clamped.
    pub refuse_seconds: f64,
}

impl Refusal {
    /// A refusal for the given number of seconds.
    #[must_use]
    pub fn seconds(refuse_seconds: f64) -> Self {
        Self { refuse_seconds }
    }

    /// Converts `refuse_seconds` into a timeout, coercing invalid input to
    /// the default and clamping oversized input.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        if self.refuse_seconds.is_nan() {
            warn!(
                refuse_seconds = self.refuse_seconds,
                "Using the default refusal timeout because refuse_seconds is not a number"
            );
            return DEFAULT_REFUSE_TIMEOUT;
        }

        if self.refuse_seconds < 0.0 {
            warn!(
                refuse_seconds = self.refuse_seconds,
                "Using the default refusal timeout because refuse_seconds is negative"
            );
            return DEFAULT_REFUSE_TIMEOUT;
        }

        if self.refuse_seconds > MAX_REFUSE_TIMEOUT.as_secs_f64() {
            warn!(
                refuse_seconds = self.refuse_seconds,
                "Clamping refusal timeout to 365 days because refuse_seconds is too big"
            );
            return MAX_REFUSE_TIMEOUT;
        }

        Duration::from_secs_f64(self.refuse_seconds)
    }
}

/// A standing refusal of offers for one (framework, role, agent).
#[derive(Debug, Clone)]
pub struct OfferFilter {
    /// Record identity carried by the expiry timer.
    pub id: FilterId,

    /// The declined resources, in unallocated form.
    pub resources: Resources,
}

impl OfferFilter {
    /// Returns true if this filter suppresses an offer of `resources`.
    ///
    /// The refused resources must be a superset: declining a large offer
    /// also declines every smaller offer it contains.
    #[must_use]
    pub fn filters(&self, resources: &Resources) -> bool {
        self.resources.contains(resources)
    }
}

/// A standing refusal of inverse offers for one (framework, agent).
///
/// Maintenance is modeled at whole-agent granularity, so the filter has no
/// resource payload; existence alone suppresses.
#[derive(Debug, Clone, Copy)]
pub struct InverseOfferFilter {
    /// Record identity carried by the expiry timer.
    pub id: FilterId,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fairshare_resources::Resource;

    #[test]
    fn test_refusal_timeout_valid() {
        assert_eq!(
            Refusal::seconds(30.0).timeout(),
            Duration::from_secs(30)
        );
        assert_eq!(Refusal::seconds(0.0).timeout(), Duration::ZERO);
    }

    #[test]
    fn test_refusal_timeout_invalid_falls_back() {
        assert_eq!(Refusal::seconds(-1.0).timeout(), DEFAULT_REFUSE_TIMEOUT);
        assert_eq!(Refusal::seconds(f64::NAN).timeout(), DEFAULT_REFUSE_TIMEOUT);
    }

    #[test]
    fn test_refusal_timeout_clamped() {
        let huge = Refusal::seconds(MAX_REFUSE_TIMEOUT.as_secs_f64() * 2.0);
        assert_eq!(huge.timeout(), MAX_REFUSE_TIMEOUT);
    }

    #[test]
    fn test_offer_filter_superset_containment() {
        let declined: Resources = vec![
            Resource::scalar("cpus", 4.0),
            Resource::scalar("mem", 512.0),
        ]
        .into();

        let filter = OfferFilter {
            id: 1,
            resources: declined,
        };

        // Smaller offers are filtered; larger ones are not.
        assert!(filter.filters(&Resource::scalar("cpus", 2.0).into()));
        assert!(filter.filters(&vec![
            Resource::scalar("cpus", 4.0),
            Resource::scalar("mem", 512.0),
        ]
        .into()));
        assert!(!filter.filters(&Resource::scalar("cpus", 8.0).into()));
        assert!(!filter.filters(&Resource::scalar("gpus", 1.0).into()));
    }
}
