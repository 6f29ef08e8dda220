use crate::connection_slot::ConnectionSlot;
use crate::gateway::GatewayPath;
use crate::sink::{Sink, SnapshotRow};
use crate::snapshot::SharedSnapshot;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of the low frequency work on a flush tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Failed,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub gateway: StepOutcome,
    pub sink: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickReport {
    pub slots_ok: usize,
    pub slots_failed: usize,
    pub flush: Option<FlushReport>,
}

/// Drives the acquisition cycle. Every tick polls all inverters; every
/// `flush_period` ticks the gateway is queried and the snapshot persisted.
pub struct Scheduler {
    slots: Vec<ConnectionSlot>,
    gateway: Option<GatewayPath>,
    sink: Option<Box<dyn Sink>>,
    snapshot: SharedSnapshot,
    tick_period: Duration,
    flush_period: u32,
    cycle: u32,
}

impl Scheduler {
    /// Builds a scheduler over `slots`. A missing gateway or sink makes that
    /// step report `Disabled`; a zero `flush_period` is treated as 1.
    pub fn new(
        slots: Vec<ConnectionSlot>,
        gateway: Option<GatewayPath>,
        sink: Option<Box<dyn Sink>>,
        snapshot: SharedSnapshot,
        tick_period: Duration,
        flush_period: u32,
    ) -> Self {
        Self {
            slots,
            gateway,
            sink,
            snapshot,
            tick_period,
            flush_period: flush_period.max(1),
            cycle: 0,
        }
    }

    pub fn snapshot(&self) -> &SharedSnapshot {
        &self.snapshot
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Runs ticks forever. Individual failures never end the loop.
    pub async fn run(mut self) {
        info!(
            inverters = self.slots.len(),
            gateway = self.gateway.is_some(),
            period_ms = self.tick_period.as_millis() as u64,
            flush_period = self.flush_period,
            "Acquisition loop running"
        );
        let mut ticker = interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first interval tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Runs one cycle: polls every slot in order, then fetches the gateway
    /// and writes the sink when the flush counter wraps.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for slot in &mut self.slots {
            match slot.poll().await {
                Ok(values) => {
                    self.snapshot.update(slot.sources(), &values);
                    report.slots_ok += 1;
                }
                // Already reported by the slot, previous values stay
                Err(_) => {
                    debug!(group = %slot.name(), "Keeping previous inverter values");
                    report.slots_failed += 1;
                }
            }
        }

        self.cycle += 1;
        if self.cycle >= self.flush_period {
            self.cycle = 0;
            report.flush = Some(self.flush().await);
        }
        report
    }

    async fn flush(&mut self) -> FlushReport {
        let gateway = match &self.gateway {
            None => StepOutcome::Disabled,
            Some(path) => match path.fetch().await {
                Ok((a, b)) => {
                    debug!(?a, ?b, "Gateway readings");
                    self.snapshot.update(path.sources(), &[a, b]);
                    StepOutcome::Ok
                }
                Err(e) => {
                    warn!(device = %path.device_key(), "Gateway query failed, keeping previous values: {e}");
                    StepOutcome::Failed
                }
            },
        };

        let view = self.snapshot.read_all();
        debug!(total = view.total, "Snapshot total power");
        let sink = match &mut self.sink {
            None => StepOutcome::Disabled,
            Some(sink) => match sink.write(&SnapshotRow::from(&view)).await {
                Ok(rows) => {
                    debug!(rows, "Snapshot written");
                    StepOutcome::Ok
                }
                Err(e) => {
                    warn!("Snapshot write failed, sample dropped: {e}");
                    StepOutcome::Failed
                }
            },
        };

        FlushReport { gateway, sink }
    }
}
