//! Scenario tests driving a whole controller.

use std::{net::Ipv4Addr, time::Duration};

use crate::{
    algorithms::{NodeId, Topology},
    config::ControllerConfig,
    controller::Controller,
    flow::{HeaderFields, MacAddr},
    forecast::ForecastTable,
    rules::RecordingChannel,
    telemetry::StaticTelemetry,
    weight::EnergyFlex,
};


/// Test network:
///
/// ```text
/// h0 - s1 - s2 - s4 - h1
///        \       /
///         s3 - s5         s6 - h2
/// ```
pub(crate) struct Net {
    pub topo: Topology,
    pub h: [NodeId; 3],
    /// `s[i]` is the switch with datapath id `i`. `s[0]` is unused.
    pub s: [NodeId; 7],
}

pub(crate) fn net() -> Net {
    let mut topo = Topology::new();
    let h = [
        topo.add_host("h0", Some(ip(1)), MacAddr::from(1)),
        topo.add_host("h1", Some(ip(2)), MacAddr::from(2)),
        topo.add_host("h2", Some(ip(3)), MacAddr::from(3)),
    ];
    let mut s = [NodeId::end(); 7];
    for (i, slot) in s.iter_mut().enumerate().skip(1) {
        *slot = topo.add_switch(format!("s{i}"), i as u64);
    }
    topo.add_links_from([
        (h[0], s[1]),
        (s[1], s[2]),
        (s[2], s[4]),
        (s[4], h[1]),
        (s[1], s[3]),
        (s[3], s[5]),
        (s[5], s[4]),
        (s[6], h[2]),
    ]);
    Net { topo, h, s }
}

pub(crate) fn ip(x: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, x)
}

/// TCP flow from h0 to h1
pub(crate) fn tcp(src_port: u16) -> HeaderFields {
    HeaderFields::tcp(ip(1), ip(2), src_port, 80)
}

pub(crate) const T0: Duration = Duration::ZERO;

pub(crate) fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Controller on [`net`] with a budget of 100 per bucket for every switch, and all switches
/// connected at time zero.
pub(crate) fn controller(config: ControllerConfig) -> (Controller<EnergyFlex>, Net) {
    let net = net();
    let mut forecast = ForecastTable::new();
    for i in 1..=6 {
        forecast.insert_constant(format!("s{i}"), 60.0, 40.0);
    }
    let mut ctrl = Controller::new(
        net.topo.clone(),
        EnergyFlex,
        config,
        StaticTelemetry::default(),
        forecast,
        RecordingChannel::default(),
    )
    .unwrap();
    for dpid in 1..=6 {
        ctrl.on_switch_connected(dpid, T0).unwrap();
    }
    (ctrl, net)
}
