//! Async shell around the allocator engine.
//!
//! The engine itself is synchronous; this worker owns it on a dedicated
//! task and serializes all access through a mailbox. The loop selects
//! over three inputs:
//!
//! - mailbox requests from [`AllocatorHandle`] clones (master operations
//!   and timer callbacks),
//! - the periodic allocation interval,
//! - a shutdown watch.
//!
//! Requests that arrive in a burst are drained before the next allocation
//! pass runs, so a flurry of agent updates coalesces into one run instead
//! of one run each. Filter expiries and the recovery hold-off are plain
//! timer tasks that post back into the mailbox; a timer whose target is
//! already gone no-ops inside the engine.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use fairshare_id::{AgentId, FrameworkId, RoleName};
use fairshare_resources::{Operation, ResourceConversion, ResourceError, ResourceQuantities, Resources};

use crate::agent::{AgentCapabilities, AgentInfo, Unavailability};
use crate::config::AllocatorConfig;
use crate::engine::{
    Deferred, HierarchicalAllocator, InverseOfferCallback, InverseOfferStatus, OfferCallback,
    ResourceRequest, UnavailableResources,
};
use crate::filters::{FilterId, Refusal};
use crate::framework::FrameworkInfo;

/// Mailbox capacity; a full mailbox backpressures the master.
const MAILBOX_SIZE: usize = 1024;

/// Errors surfaced to mailbox callers.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker task has stopped; no further requests will be served.
    #[error("allocator worker stopped")]
    Stopped,

    /// The engine rejected the resources in the request.
    #[error(transparent)]
    Resources(#[from] ResourceError),
}

/// A request posted to the allocator worker.
pub enum AllocatorRequest {
    Recover {
        expected_agent_count: usize,
        quotas: HashMap<RoleName, ResourceQuantities>,
    },
    AddFramework {
        framework_id: FrameworkId,
        info: FrameworkInfo,
        used: HashMap<AgentId, Resources>,
        active: bool,
        suppressed_roles: BTreeSet<RoleName>,
    },
    RemoveFramework {
        framework_id: FrameworkId,
    },
    ActivateFramework {
        framework_id: FrameworkId,
    },
    DeactivateFramework {
        framework_id: FrameworkId,
    },
    UpdateFramework {
        framework_id: FrameworkId,
        info: FrameworkInfo,
        suppressed_roles: BTreeSet<RoleName>,
    },
    AddAgent {
        agent_id: AgentId,
        info: AgentInfo,
        capabilities: AgentCapabilities,
        unavailability: Option<Unavailability>,
        total: Resources,
        used: HashMap<FrameworkId, Resources>,
    },
    RemoveAgent {
        agent_id: AgentId,
    },
    UpdateAgent {
        agent_id: AgentId,
        info: AgentInfo,
        total: Option<Resources>,
        capabilities: Option<AgentCapabilities>,
    },
    AddResourceProvider {
        agent_id: AgentId,
        total: Resources,
        used: HashMap<FrameworkId, Resources>,
    },
    ActivateAgent {
        agent_id: AgentId,
    },
    DeactivateAgent {
        agent_id: AgentId,
    },
    UpdateWhitelist {
        whitelist: Option<HashSet<String>>,
    },
    RequestResources {
        framework_id: FrameworkId,
        requests: Vec<ResourceRequest>,
    },
    UpdateAllocation {
        framework_id: FrameworkId,
        agent_id: AgentId,
        offered: Resources,
        conversions: Vec<ResourceConversion>,
    },
    UpdateAvailable {
        agent_id: AgentId,
        operations: Vec<Operation>,
        reply: oneshot::Sender<Result<(), ResourceError>>,
    },
    UpdateUnavailability {
        agent_id: AgentId,
        unavailability: Option<Unavailability>,
    },
    UpdateInverseOffer {
        agent_id: AgentId,
        framework_id: FrameworkId,
        unavailable_resources: Option<UnavailableResources>,
        status: Option<InverseOfferStatus>,
        refusal: Option<Refusal>,
    },
    GetInverseOfferStatuses {
        reply: oneshot::Sender<BTreeMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>>>,
    },
    RecoverResources {
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
        refusal: Option<Refusal>,
    },
    SuppressOffers {
        framework_id: FrameworkId,
        roles: BTreeSet<RoleName>,
    },
    ReviveOffers {
        framework_id: FrameworkId,
        roles: BTreeSet<RoleName>,
    },
    SetQuota {
        role: RoleName,
        guarantee: ResourceQuantities,
    },
    RemoveQuota {
        role: RoleName,
    },
    UpdateWeights {
        weights: Vec<(RoleName, f64)>,
    },
    Pause,
    Resume,
    TriggerAllocation {
        agent_id: Option<AgentId>,
    },
    ExpireOfferFilter {
        framework_id: FrameworkId,
        role: RoleName,
        agent_id: AgentId,
        filter_id: FilterId,
    },
    ExpireInverseOfferFilter {
        framework_id: FrameworkId,
        agent_id: AgentId,
        filter_id: FilterId,
    },
}

/// Handle for posting requests to the allocator worker.
#[derive(Clone)]
pub struct AllocatorHandle {
    tx: mpsc::Sender<AllocatorRequest>,
}

impl AllocatorHandle {
    async fn send(&self, request: AllocatorRequest) -> Result<(), WorkerError> {
        self.tx.send(request).await.map_err(|_| WorkerError::Stopped)
    }

    pub async fn recover(
        &self,
        expected_agent_count: usize,
        quotas: HashMap<RoleName, ResourceQuantities>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::Recover {
            expected_agent_count,
            quotas,
        })
        .await
    }

    pub async fn add_framework(
        &self,
        framework_id: FrameworkId,
        info: FrameworkInfo,
        used: HashMap<AgentId, Resources>,
        active: bool,
        suppressed_roles: BTreeSet<RoleName>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::AddFramework {
            framework_id,
            info,
            used,
            active,
            suppressed_roles,
        })
        .await
    }

    pub async fn remove_framework(&self, framework_id: FrameworkId) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::RemoveFramework { framework_id })
            .await
    }

    pub async fn activate_framework(&self, framework_id: FrameworkId) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::ActivateFramework { framework_id })
            .await
    }

    pub async fn deactivate_framework(
        &self,
        framework_id: FrameworkId,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::DeactivateFramework { framework_id })
            .await
    }

    pub async fn update_framework(
        &self,
        framework_id: FrameworkId,
        info: FrameworkInfo,
        suppressed_roles: BTreeSet<RoleName>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::UpdateFramework {
            framework_id,
            info,
            suppressed_roles,
        })
        .await
    }

    pub async fn add_agent(
        &self,
        agent_id: AgentId,
        info: AgentInfo,
        capabilities: AgentCapabilities,
        unavailability: Option<Unavailability>,
        total: Resources,
        used: HashMap<FrameworkId, Resources>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::AddAgent {
            agent_id,
            info,
            capabilities,
            unavailability,
            total,
            used,
        })
        .await
    }

    pub async fn remove_agent(&self, agent_id: AgentId) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::RemoveAgent { agent_id }).await
    }

    pub async fn update_agent(
        &self,
        agent_id: AgentId,
        info: AgentInfo,
        total: Option<Resources>,
        capabilities: Option<AgentCapabilities>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::UpdateAgent {
            agent_id,
            info,
            total,
            capabilities,
        })
        .await
    }

    pub async fn add_resource_provider(
        &self,
        agent_id: AgentId,
        total: Resources,
        used: HashMap<FrameworkId, Resources>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::AddResourceProvider {
            agent_id,
            total,
            used,
        })
        .await
    }

    pub async fn activate_agent(&self, agent_id: AgentId) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::ActivateAgent { agent_id })
            .await
    }

    pub async fn deactivate_agent(&self, agent_id: AgentId) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::DeactivateAgent { agent_id })
            .await
    }

    pub async fn update_whitelist(
        &self,
        whitelist: Option<HashSet<String>>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::UpdateWhitelist { whitelist })
            .await
    }

    pub async fn request_resources(
        &self,
        framework_id: FrameworkId,
        requests: Vec<ResourceRequest>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::RequestResources {
            framework_id,
            requests,
        })
        .await
    }

    pub async fn update_allocation(
        &self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        offered: Resources,
        conversions: Vec<ResourceConversion>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::UpdateAllocation {
            framework_id,
            agent_id,
            offered,
            conversions,
        })
        .await
    }

    /// Applies operations to an agent's unused resources, waiting for the
    /// engine's verdict.
    pub async fn update_available(
        &self,
        agent_id: AgentId,
        operations: Vec<Operation>,
    ) -> Result<(), WorkerError> {
        let (reply, response) = oneshot::channel();
        self.send(AllocatorRequest::UpdateAvailable {
            agent_id,
            operations,
            reply,
        })
        .await?;

        response.await.map_err(|_| WorkerError::Stopped)??;
        Ok(())
    }

    pub async fn update_unavailability(
        &self,
        agent_id: AgentId,
        unavailability: Option<Unavailability>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::UpdateUnavailability {
            agent_id,
            unavailability,
        })
        .await
    }

    pub async fn update_inverse_offer(
        &self,
        agent_id: AgentId,
        framework_id: FrameworkId,
        unavailable_resources: Option<UnavailableResources>,
        status: Option<InverseOfferStatus>,
        refusal: Option<Refusal>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::UpdateInverseOffer {
            agent_id,
            framework_id,
            unavailable_resources,
            status,
            refusal,
        })
        .await
    }

    pub async fn inverse_offer_statuses(
        &self,
    ) -> Result<BTreeMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>>, WorkerError> {
        let (reply, response) = oneshot::channel();
        self.send(AllocatorRequest::GetInverseOfferStatuses { reply })
            .await?;

        response.await.map_err(|_| WorkerError::Stopped)
    }

    pub async fn recover_resources(
        &self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
        refusal: Option<Refusal>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::RecoverResources {
            framework_id,
            agent_id,
            resources,
            refusal,
        })
        .await
    }

    pub async fn suppress_offers(
        &self,
        framework_id: FrameworkId,
        roles: BTreeSet<RoleName>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::SuppressOffers {
            framework_id,
            roles,
        })
        .await
    }

    pub async fn revive_offers(
        &self,
        framework_id: FrameworkId,
        roles: BTreeSet<RoleName>,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::ReviveOffers {
            framework_id,
            roles,
        })
        .await
    }

    pub async fn set_quota(
        &self,
        role: RoleName,
        guarantee: ResourceQuantities,
    ) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::SetQuota { role, guarantee })
            .await
    }

    pub async fn remove_quota(&self, role: RoleName) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::RemoveQuota { role }).await
    }

    pub async fn update_weights(&self, weights: Vec<(RoleName, f64)>) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::UpdateWeights { weights }).await
    }

    pub async fn pause(&self) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::Pause).await
    }

    pub async fn resume(&self) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::Resume).await
    }

    /// Requests an on-demand allocation run over every agent, or one
    /// agent when given.
    pub async fn trigger_allocation(&self, agent_id: Option<AgentId>) -> Result<(), WorkerError> {
        self.send(AllocatorRequest::TriggerAllocation { agent_id })
            .await
    }
}

/// The allocator worker: owns the engine and runs the mailbox loop.
pub struct AllocatorWorker {
    allocator: HierarchicalAllocator,
    rx: mpsc::Receiver<AllocatorRequest>,
    timer_tx: mpsc::Sender<AllocatorRequest>,
    allocation_interval: Duration,
}

impl AllocatorWorker {
    /// Creates a worker and its handle.
    pub fn new(
        config: AllocatorConfig,
        offer_callback: OfferCallback,
        inverse_offer_callback: InverseOfferCallback,
    ) -> (Self, AllocatorHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let allocation_interval = config.allocation_interval;
        let allocator = HierarchicalAllocator::new(config, offer_callback, inverse_offer_callback);

        let worker = Self {
            allocator,
            rx,
            timer_tx: tx.clone(),
            allocation_interval,
        };

        (worker, AllocatorHandle { tx })
    }

    /// Runs the worker until shutdown is signaled or every handle is
    /// dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.allocation_interval.as_millis() as u64,
            "Starting allocator worker"
        );

        let mut interval = tokio::time::interval(self.allocation_interval);
        // Don't allocate immediately on startup - wait for first interval.
        interval.tick().await;

        loop {
            tokio::select! {
                maybe_request = self.rx.recv() => {
                    let Some(request) = maybe_request else {
                        debug!("All allocator handles dropped");
                        break;
                    };

                    self.handle(request);

                    // Coalesce: drain the burst before allocating once.
                    while let Ok(request) = self.rx.try_recv() {
                        self.handle(request);
                    }

                    self.schedule_timers();
                    self.run_allocation();
                }
                _ = interval.tick() => {
                    self.allocator.request_allocation();
                    self.schedule_timers();
                    self.run_allocation();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Allocator worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Applies one request to the engine.
    fn handle(&mut self, request: AllocatorRequest) {
        match request {
            AllocatorRequest::Recover {
                expected_agent_count,
                quotas,
            } => self.allocator.recover(expected_agent_count, quotas),
            AllocatorRequest::AddFramework {
                framework_id,
                info,
                used,
                active,
                suppressed_roles,
            } => self
                .allocator
                .add_framework(&framework_id, info, used, active, suppressed_roles),
            AllocatorRequest::RemoveFramework { framework_id } => {
                self.allocator.remove_framework(&framework_id)
            }
            AllocatorRequest::ActivateFramework { framework_id } => {
                self.allocator.activate_framework(&framework_id)
            }
            AllocatorRequest::DeactivateFramework { framework_id } => {
                self.allocator.deactivate_framework(&framework_id)
            }
            AllocatorRequest::UpdateFramework {
                framework_id,
                info,
                suppressed_roles,
            } => self
                .allocator
                .update_framework(&framework_id, info, suppressed_roles),
            AllocatorRequest::AddAgent {
                agent_id,
                info,
                capabilities,
                unavailability,
                total,
                used,
            } => self
                .allocator
                .add_agent(&agent_id, info, capabilities, unavailability, total, used),
            AllocatorRequest::RemoveAgent { agent_id } => self.allocator.remove_agent(&agent_id),
            AllocatorRequest::UpdateAgent {
                agent_id,
                info,
                total,
                capabilities,
            } => self
                .allocator
                .update_agent(&agent_id, info, total, capabilities),
            AllocatorRequest::AddResourceProvider {
                agent_id,
                total,
                used,
            } => self.allocator.add_resource_provider(&agent_id, total, used),
            AllocatorRequest::ActivateAgent { agent_id } => {
                self.allocator.activate_agent(&agent_id)
            }
            AllocatorRequest::DeactivateAgent { agent_id } => {
                self.allocator.deactivate_agent(&agent_id)
            }
            AllocatorRequest::UpdateWhitelist { whitelist } => {
                self.allocator.update_whitelist(whitelist)
            }
            AllocatorRequest::RequestResources {
                framework_id,
                requests,
            } => self.allocator.request_resources(&framework_id, &requests),
            AllocatorRequest::UpdateAllocation {
                framework_id,
                agent_id,
                offered,
                conversions,
            } => self
                .allocator
                .update_allocation(&framework_id, &agent_id, offered, &conversions),
            AllocatorRequest::UpdateAvailable {
                agent_id,
                operations,
                reply,
            } => {
                let result = self.allocator.update_available(&agent_id, &operations);
                let _ = reply.send(result);
            }
            AllocatorRequest::UpdateUnavailability {
                agent_id,
                unavailability,
            } => self
                .allocator
                .update_unavailability(&agent_id, unavailability),
            AllocatorRequest::UpdateInverseOffer {
                agent_id,
                framework_id,
                unavailable_resources,
                status,
                refusal,
            } => self.allocator.update_inverse_offer(
                &agent_id,
                &framework_id,
                unavailable_resources,
                status,
                refusal,
            ),
            AllocatorRequest::GetInverseOfferStatuses { reply } => {
                let _ = reply.send(self.allocator.inverse_offer_statuses());
            }
            AllocatorRequest::RecoverResources {
                framework_id,
                agent_id,
                resources,
                refusal,
            } => self
                .allocator
                .recover_resources(&framework_id, &agent_id, resources, refusal),
            AllocatorRequest::SuppressOffers {
                framework_id,
                roles,
            } => self.allocator.suppress_offers(&framework_id, roles),
            AllocatorRequest::ReviveOffers {
                framework_id,
                roles,
            } => self.allocator.revive_offers(&framework_id, roles),
            AllocatorRequest::SetQuota { role, guarantee } => {
                self.allocator.set_quota(&role, guarantee)
            }
            AllocatorRequest::RemoveQuota { role } => self.allocator.remove_quota(&role),
            AllocatorRequest::UpdateWeights { weights } => {
                self.allocator.update_weights(&weights)
            }
            AllocatorRequest::Pause => self.allocator.pause(),
            AllocatorRequest::Resume => self.allocator.resume(),
            AllocatorRequest::TriggerAllocation { agent_id } => match agent_id {
                Some(agent_id) => self.allocator.request_allocation_on(&agent_id),
                None => self.allocator.request_allocation(),
            },
            AllocatorRequest::ExpireOfferFilter {
                framework_id,
                role,
                agent_id,
                filter_id,
            } => self
                .allocator
                .expire_offer_filter(&framework_id, &role, &agent_id, filter_id),
            AllocatorRequest::ExpireInverseOfferFilter {
                framework_id,
                agent_id,
                filter_id,
            } => self
                .allocator
                .expire_inverse_offer_filter(&framework_id, &agent_id, filter_id),
        }
    }

    /// Turns the engine's deferred entries into timer tasks that post
    /// back into the mailbox.
    fn schedule_timers(&mut self) {
        for deferred in self.allocator.take_deferred() {
            let tx = self.timer_tx.clone();

            match deferred {
                Deferred::ExpireOfferFilter {
                    framework_id,
                    role,
                    agent_id,
                    filter_id,
                    after,
                } => {
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx
                            .send(AllocatorRequest::ExpireOfferFilter {
                                framework_id,
                                role,
                                agent_id,
                                filter_id,
                            })
                            .await;
                    });
                }
                Deferred::ExpireInverseOfferFilter {
                    framework_id,
                    agent_id,
                    filter_id,
                    after,
                } => {
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx
                            .send(AllocatorRequest::ExpireInverseOfferFilter {
                                framework_id,
                                agent_id,
                                filter_id,
                            })
                            .await;
                    });
                }
                Deferred::ResumeAllocation { after } => {
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx.send(AllocatorRequest::Resume).await;
                    });
                }
            }
        }
    }

    /// Executes the pending allocation pass, if any.
    fn run_allocation(&mut self) {
        if let Some(stats) = self.allocator.run_allocation() {
            if stats.frameworks_offered > 0 || stats.frameworks_inverse_offered > 0 {
                info!(
                    candidates = stats.candidates,
                    offers = stats.frameworks_offered,
                    inverse_offers = stats.frameworks_inverse_offered,
                    duration_us = stats.duration.as_micros() as u64,
                    "Allocation run complete"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
