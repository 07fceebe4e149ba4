//! Live switch telemetry.

use std::collections::HashMap;

use crate::algorithms::NodeId;

/// Readings reported by the switches. Nodes without a reading report zero.
pub trait Telemetry: std::fmt::Debug {
    /// CPU utilization as a fraction in `[0, 1]`.
    fn cpu_utilization(&self, n: NodeId) -> f64;

    /// Forwarding load in bits per second.
    fn cpu_load(&self, n: NodeId) -> u64;

    /// Accumulated power drawn since the switch started.
    fn power_drawn(&self, n: NodeId) -> f64;
}

/// Telemetry held in memory and updated by the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticTelemetry {
    cpu: HashMap<NodeId, f64>,
    load: HashMap<NodeId, u64>,
    power: HashMap<NodeId, f64>,
}

impl StaticTelemetry {
    /// Set the CPU utilization of a node.
    pub fn set_cpu(&mut self, n: NodeId, utilization: f64) -> &mut Self {
        self.cpu.insert(n, utilization);
        self
    }

    /// Set the forwarding load of a node.
    pub fn set_load(&mut self, n: NodeId, bps: u64) -> &mut Self {
        self.load.insert(n, bps);
        self
    }

    /// Set the accumulated power drawn by a node.
    pub fn set_power(&mut self, n: NodeId, drawn: f64) -> &mut Self {
        self.power.insert(n, drawn);
        self
    }

    /// Add `delta` to the accumulated power drawn by a node.
    pub fn add_power(&mut self, n: NodeId, delta: f64) -> &mut Self {
        *self.power.entry(n).or_default() += delta;
        self
    }
}

impl Telemetry for StaticTelemetry {
    fn cpu_utilization(&self, n: NodeId) -> f64 {
        self.cpu.get(&n).copied().unwrap_or_default()
    }

    fn cpu_load(&self, n: NodeId) -> u64 {
        self.load.get(&n).copied().unwrap_or_default()
    }

    fn power_drawn(&self, n: NodeId) -> f64 {
        self.power.get(&n).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_and_accumulation() {
        let n = NodeId::new(3);
        let mut t = StaticTelemetry::default();
        assert_eq!(t.cpu_load(n), 0);
        t.add_power(n, 2.5).add_power(n, 1.5);
        assert_eq!(t.power_drawn(n), 4.0);
        t.set_power(n, 1.0).set_cpu(n, 0.3);
        assert_eq!(t.power_drawn(n), 1.0);
        assert_eq!(t.cpu_utilization(n), 0.3);
    }
}
