//! Resource operations and conversions.
//!
//! The master expresses mutations of an agent's resources (reservations
//! made or released by operators and frameworks) as operations. Internally
//! each operation lowers to one or more conversions; applying a conversion
//! replaces the consumed resources with the converted ones. Conversions
//! must either preserve scalar quantities or remove the consumed resources
//! entirely — the allocator's accounting depends on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Resource, Resources};

/// Errors from applying operations or conversions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The target collection does not contain the consumed resources.
    #[error("resources do not contain {0}")]
    MissingConsumed(String),

    /// A conversion changed scalar quantities without removing resources.
    #[error("conversion does not preserve quantities: {consumed} -> {converted}")]
    QuantityMismatch { consumed: String, converted: String },

    /// An operation's resources were malformed for that operation kind.
    #[error("invalid {operation} operation: {reason}")]
    InvalidOperation {
        operation: &'static str,
        reason: String,
    },
}

/// A replacement of `consumed` resources by `converted` resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConversion {
    pub consumed: Resources,
    pub converted: Resources,
}

impl ResourceConversion {
    /// Creates a conversion.
    #[must_use]
    pub fn new(consumed: Resources, converted: Resources) -> Self {
        Self {
            consumed,
            converted,
        }
    }

    /// Validates the quantity contract: quantities are preserved, or the
    /// consumed resources are removed outright (empty `converted`).
    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.converted.is_empty() {
            return Ok(());
        }

        if self.consumed.scalar_quantities() != self.converted.scalar_quantities() {
            return Err(ResourceError::QuantityMismatch {
                consumed: self.consumed.to_string(),
                converted: self.converted.to_string(),
            });
        }

        Ok(())
    }

    /// Returns a copy with allocation roles cleared on both sides, for
    /// application against unallocated totals.
    #[must_use]
    pub fn unallocated(&self) -> ResourceConversion {
        let mut consumed = self.consumed.clone();
        let mut converted = self.converted.clone();
        consumed.unallocate();
        converted.unallocate();
        Self {
            consumed,
            converted,
        }
    }
}

/// An operation on an agent's resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Reserve resources: `resources` carry the desired (post-reservation)
    /// form; the matching unreserved resources are consumed.
    Reserve { resources: Resources },

    /// Release a reservation: `resources` carry the reserved form; the
    /// unreserved form is produced.
    Unreserve { resources: Resources },
}

impl Operation {
    /// Lowers the operation to a conversion.
    pub fn to_conversion(&self) -> Result<ResourceConversion, ResourceError> {
        match self {
            Operation::Reserve { resources } => {
                let mut consumed = Resources::new();
                for resource in resources {
                    consumed.add(popped_reservation(resource, "reserve")?);
                }
                Ok(ResourceConversion::new(consumed, resources.clone()))
            }
            Operation::Unreserve { resources } => {
                let mut converted = Resources::new();
                for resource in resources {
                    converted.add(popped_reservation(resource, "unreserve")?);
                }
                Ok(ResourceConversion::new(resources.clone(), converted))
            }
        }
    }
}

fn popped_reservation(
    resource: &Resource,
    operation: &'static str,
) -> Result<Resource, ResourceError> {
    let mut popped = resource.clone();
    if popped.reservations.pop().is_none() {
        return Err(ResourceError::InvalidOperation {
            operation,
            reason: format!("{resource} is not reserved"),
        });
    }
    Ok(popped)
}

impl Resources {
    /// Applies conversions, returning the converted collection.
    ///
    /// Fails without modifying anything if a conversion's consumed
    /// resources are absent or its quantity contract is violated.
    pub fn apply_conversions(
        &self,
        conversions: &[ResourceConversion],
    ) -> Result<Resources, ResourceError> {
        let mut result = self.clone();

        for conversion in conversions {
            conversion.validate()?;

            if !result.contains(&conversion.consumed) {
                return Err(ResourceError::MissingConsumed(
                    conversion.consumed.to_string(),
                ));
            }

            result -= &conversion.consumed;
            result += &conversion.converted;
        }

        Ok(result)
    }

    /// Applies operations, returning the transformed collection.
    pub fn apply_operations(&self, operations: &[Operation]) -> Result<Resources, ResourceError> {
        let conversions = operations
            .iter()
            .map(Operation::to_conversion)
            .collect::<Result<Vec<_>, _>>()?;

        self.apply_conversions(&conversions)
    }
}

// =============================================================================
// Tests
// =============================================================================
