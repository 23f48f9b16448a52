//! # fairshare-resources
//!
//! Resource algebra for the fairshare allocator.
//!
//! ## Design Principles
//!
//! - Scalar arithmetic is fixed-point (milli-units) so that repeated
//!   add/subtract cycles never drift
//! - A `Resource` is a named value plus metadata: a reservation stack, the
//!   revocable and shared flags, an optional disk source, and the role the
//!   resource is currently allocated to
//! - `Resources` is a merge-on-add collection: two resources with identical
//!   metadata combine into one entry, so equality is structural
//! - `ResourceQuantities` is the scalar projection used for quota
//!   guarantees and headroom math; its subtraction is a monus (floors at
//!   zero) because quantities express "how much is left to satisfy"
//!
//! ## Reservations
//!
//! A reservation binds a resource to a role. Reservation stacks with more
//! than one entry are refined reservations; frameworks must opt in to
//! receive those. The effective reservation role is the top of the stack.

mod operation;
mod quantities;
mod resource;
mod resources;
mod value;

pub use operation::{Operation, ResourceConversion, ResourceError};
pub use quantities::ResourceQuantities;
pub use resource::{DiskSource, Reservation, Resource};
pub use resources::Resources;
pub use value::{Range, Ranges, Scalar, Value};
