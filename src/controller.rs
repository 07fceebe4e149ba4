//! The reactive controller: handles switch events, installs paths on demand, and periodically
//! reroutes flows around switches that exceed their energy budget.
//!
//! All handlers run to completion. The controller never blocks, and periodic work is scheduled
//! on the [`EventQueue`] of the driver.

use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::{
    algorithms::{dijkstra::shortest_path_between, NodeId, Topology},
    balancer::{rebalance, RebalanceReport},
    config::ControllerConfig,
    energy::{EnergyTracker, PollStrategy},
    error::Error,
    event::{Event, EventQueue, FlowRemovedReason},
    flow::{Flow, HeaderFields},
    forecast::{ForecastSource, ForecastTable},
    rules::{
        handshake_instructions, install_instructions, send_all, DpctlFormatter, RecordingChannel,
        RuleChannel,
    },
    state::FlowTable,
    telemetry::{StaticTelemetry, Telemetry},
    weight::{Snapshot, WeightModel},
};

/// Answer to a packet-in: send the packet out of `out_port` of the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketOut {
    /// Datapath id of the switch
    pub dpid: u64,
    /// Port the packet arrived on
    pub in_port: u32,
    /// Port to send the packet out of
    pub out_port: u32,
}

/// Path controller, routing on the metric of `M`.
#[derive(Debug)]
pub struct Controller<M, T = StaticTelemetry, F = ForecastTable, R = RecordingChannel> {
    model: M,
    config: ControllerConfig,
    formatter: DpctlFormatter,
    topo: Topology,
    telemetry: T,
    forecast: F,
    channel: R,
    energy: EnergyTracker,
    table: FlowTable,
    last_report: Option<RebalanceReport>,
}

impl<M, T, F, R> Controller<M, T, F, R>
where
    M: WeightModel,
    T: Telemetry,
    F: ForecastSource,
    R: RuleChannel,
{
    /// Create a new controller. Fails if the configuration is invalid.
    pub fn new(
        topo: Topology,
        model: M,
        config: ControllerConfig,
        telemetry: T,
        forecast: F,
        channel: R,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            model,
            formatter: DpctlFormatter::new(config.idle_timeout_secs),
            energy: EnergyTracker::new(config.poll_strategy),
            config,
            topo,
            telemetry,
            forecast,
            channel,
            table: FlowTable::new(),
            last_report: None,
        })
    }

    /// The topology
    pub fn topo(&self) -> &Topology {
        &self.topo
    }

    /// The configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The installed flows
    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    /// The energy samples
    pub fn energy(&self) -> &EnergyTracker {
        &self.energy
    }

    /// The telemetry source
    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    /// Mutable access to the telemetry source, for drivers that feed it.
    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }

    /// The rule channel
    pub fn channel(&self) -> &R {
        &self.channel
    }

    /// Mutable access to the rule channel.
    pub fn channel_mut(&mut self) -> &mut R {
        &mut self.channel
    }

    /// Report of the most recent rebalance pass.
    pub fn last_report(&self) -> Option<&RebalanceReport> {
        self.last_report.as_ref()
    }

    /// Schedule the first energy poll and the first rebalance pass.
    pub fn start(&self, queue: &mut EventQueue) {
        queue.schedule(self.config.poll_interval(), Event::PollEnergy);
        queue.schedule(self.config.rebalance_interval(), Event::Rebalance);
    }

    /// Dispatch an event to its handler. Periodic events schedule their next occurrence.
    pub fn handle(
        &mut self,
        event: Event,
        now: Duration,
        queue: &mut EventQueue,
    ) -> Result<Option<PacketOut>, Error> {
        match event {
            Event::SwitchConnected { dpid } => self.on_switch_connected(dpid, now).map(|_| None),
            Event::PacketIn {
                dpid,
                fields,
                in_port,
            } => self.on_packet_in(dpid, &fields, in_port, now),
            Event::FlowRemoved {
                dpid,
                fields,
                reason,
            } => self.on_flow_removed(dpid, &fields, reason).map(|_| None),
            Event::PollEnergy => {
                self.poll_energy(now);
                queue.schedule(self.config.poll_interval(), Event::PollEnergy);
                Ok(None)
            }
            Event::Rebalance => {
                self.rebalance(now);
                queue.schedule(self.config.rebalance_interval(), Event::Rebalance);
                Ok(None)
            }
        }
    }

    /// Handshake with a new switch: install the table-miss rule and the routes towards its
    /// attached hosts, and register its initial energy sample.
    pub fn on_switch_connected(&mut self, dpid: u64, now: Duration) -> Result<(), Error> {
        let n = self.topo.node_by_dpid(dpid)?;
        let instructions = handshake_instructions(&self.topo, n)?;
        send_all(&mut self.channel, &self.formatter, &instructions);
        self.energy
            .register(dpid, self.telemetry.power_drawn(n), now);
        info!("Switch {} connected", self.topo.name(n));
        Ok(())
    }

    /// Handle a packet without a matching rule. A new flow gets a path computed and installed.
    /// Returns where the switch should send the packet, or `None` if the switch is not on the path
    /// of the flow.
    pub fn on_packet_in(
        &mut self,
        dpid: u64,
        fields: &HeaderFields,
        in_port: u32,
        now: Duration,
    ) -> Result<Option<PacketOut>, Error> {
        let switch = self.topo.node_by_dpid(dpid)?;
        let flow = Flow::extract_with(
            fields,
            self.config.base_priority,
            self.config.priority_step,
        )?;

        let path = match self.table.lookup(&flow) {
            Some(path) => path.to_vec(),
            None => self.install_flow(&flow, now)?,
        };

        let out_port = match self.next_hop(switch, &path, &flow) {
            Some(p) => p,
            None => {
                warn!(
                    "{} is not on the path {} of {flow}",
                    self.topo.name(switch),
                    self.topo.fmt_path(&path)
                );
                return Ok(None);
            }
        };

        Ok(Some(PacketOut {
            dpid,
            in_port,
            out_port,
        }))
    }

    /// Compute, install, and store the path of a new flow.
    fn install_flow(&mut self, flow: &Flow, now: Duration) -> Result<Vec<NodeId>, Error> {
        let full = {
            let snapshot = self.snapshot(now);
            let calc = self.model.calculator(&snapshot);
            shortest_path_between(&self.topo, &flow.src_addr(), &flow.dst_addr(), &calc)?
        };
        let (Some(&source), Some(&target)) = (full.first(), full.last()) else {
            return Err(Error::InvariantViolation("empty path".to_string()));
        };
        // hosts only appear at the ends of a path
        let path: Vec<NodeId> = full
            .into_iter()
            .filter(|n| self.topo.is_switch(n))
            .collect();
        if path.is_empty() {
            return Err(Error::NoPathFound {
                from: source,
                to: target,
            });
        }

        let instructions = install_instructions(&self.topo, &path, flow)?;
        send_all(&mut self.channel, &self.formatter, &instructions);
        info!("New flow {flow}: {}", self.topo.fmt_path(&path));
        self.table.install(*flow, path.clone());
        Ok(path)
    }

    /// Port of `switch` towards the next node of the path. The last switch forwards to the
    /// destination host.
    fn next_hop(&self, switch: NodeId, path: &[NodeId], flow: &Flow) -> Option<u32> {
        let i = path.iter().position(|n| *n == switch)?;
        let next = match path.get(i + 1) {
            Some(next) => *next,
            None => self.topo.host_node(flow.dst_addr()).ok()?,
        };
        self.topo.port_towards(switch, next)
    }

    /// Handle the removal of a flow rule. Only idle timeouts of a switch on the current path evict
    /// the flow. Returns `true` if the flow was evicted.
    pub fn on_flow_removed(
        &mut self,
        dpid: u64,
        fields: &HeaderFields,
        reason: FlowRemovedReason,
    ) -> Result<bool, Error> {
        if reason != FlowRemovedReason::IdleTimeout {
            trace!("[{dpid}]: ignore flow removal ({reason:?})");
            return Ok(false);
        }
        let switch = self.topo.node_by_dpid(dpid)?;
        let flow = Flow::extract_with(
            fields,
            self.config.base_priority,
            self.config.priority_step,
        )?;
        match self.table.lookup(&flow) {
            Some(path) if path.contains(&switch) => {
                self.table.evict(&flow);
                debug!("Flow {flow} expired");
                Ok(true)
            }
            Some(_) => {
                trace!("[{dpid}]: stale rule of {flow} expired");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Record a new energy sample of every connected switch.
    pub fn poll_energy(&mut self, now: Duration) {
        self.energy.refresh_from(&self.topo, &self.telemetry, now);
    }

    /// Run a rebalance pass.
    ///
    /// With [`PollStrategy::PerFlowRead`], the samples are refreshed before the pass, and the
    /// margins compare the last two readings. With [`PollStrategy::ForecastNormalized`], the pass
    /// measures the consumption since the last poll, and the samples are refreshed afterwards.
    pub fn rebalance(&mut self, now: Duration) -> RebalanceReport {
        let strategy = self.energy.strategy();
        if strategy == PollStrategy::PerFlowRead {
            self.poll_energy(now);
        }

        let snapshot = Snapshot {
            topo: &self.topo,
            telemetry: &self.telemetry,
            energy: &self.energy,
            forecast: &self.forecast,
            now,
        };
        let calc = self.model.calculator(&snapshot);
        let report = rebalance(
            &self.topo,
            &mut self.table,
            &calc,
            &self.formatter,
            &mut self.channel,
        );

        if strategy == PollStrategy::ForecastNormalized {
            self.poll_energy(now);
        }
        if report.violating > 0 {
            info!("Rebalance: {report}");
        } else {
            debug!("Rebalance: no violating switch carries flows");
        }
        self.last_report = Some(report);
        report
    }

    fn snapshot(&self, now: Duration) -> Snapshot<'_> {
        Snapshot {
            topo: &self.topo,
            telemetry: &self.telemetry,
            energy: &self.energy,
            forecast: &self.forecast,
            now,
        }
    }
}
