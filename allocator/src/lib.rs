//! # fairshare-allocator
//!
//! Two-level hierarchical resource allocator for a cluster workload
//! manager. A master aggregates resource totals from many agents and asks
//! this crate to decide, periodically and on demand, which subset of each
//! agent's unused resources to offer to which framework scheduler.
//!
//! ## Architecture
//!
//! - [`engine::HierarchicalAllocator`] is a synchronous state machine
//!   owning every piece of allocator state: the framework/agent registry,
//!   the weighted-DRF sorters, quota guarantees and reservation tracking,
//!   offer and inverse-offer filters. All mutators run to completion before
//!   the next one starts; results flow out through the offer and
//!   inverse-offer callbacks installed at construction.
//! - [`worker::AllocatorWorker`] wraps the engine in a tokio task: a
//!   mailbox of [`worker::AllocatorHandle`] requests, a periodic allocation
//!   interval, and timer tasks for filter expiry and recovery hold-off.
//!   Mutations arriving in a burst coalesce into a single allocation pass.
//! - [`sorter::Sorter`] is the fairness seam: the production
//!   [`sorter::DrfSorter`] orders clients by weighted dominant share; tests
//!   may substitute a deterministic stub through the engine's sorter
//!   factory.
//!
//! ## Allocation model
//!
//! Each allocation run visits candidate agents in random order and walks
//! two stages: quota'ed roles first (guaranteeing each top-level role its
//! promised quantities while holding back enough unreserved headroom for
//! guarantees not yet satisfiable), then everything else in fair-share
//! order. Offers are coarse-grained: once a framework takes resources on an
//! agent within a stage, later frameworks see only the remainder.

pub mod agent;
pub mod config;
pub mod engine;
pub mod filters;
pub mod framework;
pub mod sorter;
pub mod worker;

pub use agent::{Agent, AgentCapabilities, AgentInfo, Maintenance, Unavailability};
pub use config::AllocatorConfig;
pub use engine::{HierarchicalAllocator, InverseOfferStatus, UnavailableResources};
pub use filters::Refusal;
pub use framework::{Framework, FrameworkCapabilities, FrameworkInfo};
pub use sorter::{DrfSorter, Sorter};
pub use worker::{AllocatorHandle, AllocatorWorker};
