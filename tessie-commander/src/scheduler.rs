//! Assignment loop.
//!
//! Each tick walks the registry once: free nodes receive the task at the head
//! of the queue, busy nodes are polled and treated as free if they now say so,
//! and every node with an in-flight task is asked for its output. The loop
//! ends when the queue and the active set are both empty.

use crate::collector::{Artifact, OutputCollector};
use crate::error::SubmitStep;
use crate::protocol;
use crate::registry::NodeRegistry;
use crate::task::{Task, TaskQueue};
use crate::transport::NodeTransport;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tessie_core::NodeStatus;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub submitted: Vec<(IpAddr, Uuid)>,
    pub requeued: Vec<(IpAddr, Uuid, SubmitStep)>,
    pub polled: usize,
    pub collected: Vec<Artifact>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub artifacts: Vec<Artifact>,
}

pub struct Scheduler<T> {
    transport: T,
    registry: NodeRegistry,
    queue: TaskQueue,
    active: BTreeMap<IpAddr, Task>,
    collector: OutputCollector,
    poll_interval: Duration,
}

impl<T: NodeTransport> Scheduler<T> {
    pub fn new(
        transport: T,
        registry: NodeRegistry,
        tasks: impl IntoIterator<Item = Task>,
        collector: OutputCollector,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            queue: tasks.into_iter().collect(),
            active: BTreeMap::new(),
            collector,
            poll_interval,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    #[cfg(test)]
    pub fn active(&self) -> &BTreeMap<IpAddr, Task> {
        &self.active
    }

    /// Nothing queued and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.active.is_empty()
    }

    /// Ticks until drained, sleeping `poll_interval` after each tick.
    pub async fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();

        if self.registry.is_empty() && !self.queue.is_empty() {
            warn!(
                queued = self.queue.len(),
                "No nodes discovered; tasks will wait until the process is stopped"
            );
        }

        while !self.is_drained() {
            let report = self.tick().await;
            summary.ticks += 1;
            debug!(
                tick = summary.ticks,
                submitted = report.submitted.len(),
                requeued = report.requeued.len(),
                polled = report.polled,
                collected = report.collected.len(),
                queued = self.queue.len(),
                active = self.active.len(),
                "Tick finished"
            );
            summary.artifacts.extend(report.collected);
            tokio::time::sleep(self.poll_interval).await;
        }

        info!(
            ticks = summary.ticks,
            artifacts = summary.artifacts.len(),
            "All tasks completed"
        );
        summary
    }

    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for (address, status) in self.registry.snapshot() {
            if self.active.contains_key(&address) {
                continue;
            }

            let free = match status {
                NodeStatus::Available => true,
                NodeStatus::Busy => {
                    report.polled += 1;
                    self.poll_available(address).await
                }
                NodeStatus::Unknown => false,
            };

            if free {
                self.assign(address, &mut report).await;
            }
        }

        self.reclaim(&mut report).await;
        report
    }

    async fn poll_available(&self, address: IpAddr) -> bool {
        match self.transport.status(address).await {
            Ok(status) => {
                debug!(node = %address, status = %status, "Polled busy node");
                status == NodeStatus::Available
            }
            Err(e) => {
                warn!(node = %address, "Error checking status: {}", e);
                false
            }
        }
    }

    async fn assign(&mut self, address: IpAddr, report: &mut TickReport) {
        let Some(task) = self.queue.pop() else {
            return;
        };

        match protocol::submit(&self.transport, address, &task).await {
            Ok(()) => {
                info!(node = %address, task = %task.id, "Task started");
                report.submitted.push((address, task.id));
                self.active.insert(address, task);
            }
            Err(e) => {
                warn!(node = %address, task = %task.id, "Failed to submit task, requeuing: {}", e);
                report.requeued.push((address, task.id, e.step));
                self.queue.requeue(task);
            }
        }
    }

    async fn reclaim(&mut self, report: &mut TickReport) {
        let running: Vec<IpAddr> = self.active.keys().copied().collect();

        for address in running {
            match self.collector.fetch(&self.transport, address).await {
                Ok(Some(artifact)) => {
                    if let Some(task) = self.active.remove(&address) {
                        info!(
                            node = %address,
                            task = %task.id,
                            bytes = artifact.bytes,
                            sha256 = %artifact.sha256,
                            "Output from {}: {}",
                            address,
                            artifact.path.display()
                        );
                    }
                    report.collected.push(artifact);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(node = %address, "Error retrieving output: {}", e);
                }
            }
        }
    }
}
