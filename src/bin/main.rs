//! Simulate the energy-aware path controller on a random ring topology.
//!
//! Every switch gets one host. Random TCP flows start between hosts and expire after a random
//! lifetime. A few *hot* switches draw more power than their budget allows, and the controller
//! should move flows away from them on its rebalance passes. Without forecast files, every switch
//! gets a budget of 100 per 15-minute bucket, about 0.11 per second.

#![deny(missing_docs, missing_debug_implementations)]

use std::{collections::HashMap, net::Ipv4Addr, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use flexpath::{
    algorithms::{NodeId, Topology},
    config::ControllerConfig,
    controller::Controller,
    event::{Event, EventQueue, FlowRemovedReason},
    flow::{HeaderFields, MacAddr},
    forecast::ForecastTable,
    rules::RecordingChannel,
    telemetry::StaticTelemetry,
    weight::{BandwidthLoad, CpuLoad, EnergyFlex, Hops, WeightModel},
};
use itertools::Itertools;
use log::{info, warn};
use rand::prelude::*;

/// Idle draw of a switch, per second.
const BASE_DRAW: f64 = 0.03;
/// Additional draw per carried flow, per second.
const FLOW_DRAW: f64 = 0.01;
/// Additional draw of a hot switch, per second.
const HOT_DRAW: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Model {
    Hops,
    Cpu,
    Bandwidth,
    Flex,
}

/// Simulate the energy-aware path controller on a random ring topology.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Number of switches in the ring.
    #[arg(short = 'n', long, default_value_t = 8)]
    switches: u8,
    /// Number of random chords added to the ring.
    #[arg(long, default_value_t = 4)]
    chords: usize,
    /// Number of flows.
    #[arg(short, long, default_value_t = 20)]
    flows: usize,
    /// Number of switches that exceed their budget.
    #[arg(long, default_value_t = 1)]
    hot: usize,
    /// Simulated time, in seconds.
    #[arg(short, long, default_value_t = 900)]
    duration: u64,
    /// Metric to route on.
    #[arg(short, long, value_enum, default_value_t = Model::Flex)]
    model: Model,
    /// Controller configuration (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Forecast estimate per device (JSON).
    #[arg(long, requires = "flex")]
    estimate: Option<PathBuf>,
    /// Forecast flexibility per device (JSON).
    #[arg(long, requires = "estimate")]
    flex: Option<PathBuf>,
    /// Seed of the random generator.
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(p) => ControllerConfig::load(p)
            .with_context(|| format!("Loading the configuration from {}", p.display()))?,
        None => ControllerConfig::default(),
    };
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let topo = ring(&args, &mut rng)?;
    let forecast = match (&args.estimate, &args.flex) {
        (Some(e), Some(f)) => ForecastTable::load(e, f).context("Loading the forecast")?,
        _ => {
            let mut table = ForecastTable::new();
            for n in topo.switches() {
                table.insert_constant(topo.name(n), 60.0, 40.0);
            }
            table
        }
    };

    match args.model {
        Model::Hops => simulate(Hops, topo, config, forecast, &args, &mut rng),
        Model::Cpu => simulate(CpuLoad, topo, config, forecast, &args, &mut rng),
        Model::Bandwidth => simulate(BandwidthLoad, topo, config, forecast, &args, &mut rng),
        Model::Flex => simulate(EnergyFlex, topo, config, forecast, &args, &mut rng),
    }
}

/// Ring of switches `s0, s1, ...` with random chords, and host `hi` attached to switch `si`.
fn ring(args: &Args, rng: &mut SmallRng) -> anyhow::Result<Topology> {
    let n = args.switches;
    if !(3..=254).contains(&n) {
        bail!("The ring needs between 3 and 254 switches, not {n}");
    }
    let mut topo = Topology::new();
    let switches: Vec<NodeId> = (0..n)
        .map(|i| topo.add_switch(format!("s{i}"), i as u64 + 1))
        .collect();
    for (a, b) in switches.iter().circular_tuple_windows() {
        topo.add_link(*a, *b);
    }
    let mut chords = 0;
    for _ in 0..args.chords * 10 {
        if chords == args.chords {
            break;
        }
        let (a, b) = (
            *switches.choose(rng).context("empty ring")?,
            *switches.choose(rng).context("empty ring")?,
        );
        if a != b && topo.find_edge(a, b).is_none() {
            topo.add_link(a, b);
            chords += 1;
        }
    }
    for (i, s) in switches.iter().enumerate() {
        let ip = Ipv4Addr::new(10, 0, 0, i as u8 + 1);
        let h = topo.add_host(format!("h{i}"), Some(ip), MacAddr::from(i as u64 + 1));
        topo.add_link(h, *s);
    }
    info!(
        "Topology with {} switches, {} hosts, and {} links",
        topo.switches().count(),
        topo.hosts().count(),
        topo.edge_count()
    );
    Ok(topo)
}

fn simulate<M: WeightModel>(
    model: M,
    topo: Topology,
    config: ControllerConfig,
    forecast: ForecastTable,
    args: &Args,
    rng: &mut SmallRng,
) -> anyhow::Result<()> {
    let hosts: Vec<NodeId> = topo.hosts().collect();
    let switches: Vec<NodeId> = topo.switches().collect();
    let hot: Vec<NodeId> = switches.choose_multiple(rng, args.hot).copied().collect();
    info!("Hot switches: {}", topo.fmt_path(&hot));

    let mut ctrl = Controller::new(
        topo,
        model,
        config,
        StaticTelemetry::default(),
        forecast,
        RecordingChannel::default(),
    )?;
    let mut queue = EventQueue::new();
    for s in &switches {
        let dpid = ctrl.topo().dpid(s).context("switch without datapath id")?;
        queue.push(Duration::ZERO, Event::SwitchConnected { dpid });
    }
    ctrl.start(&mut queue);

    let end = Duration::from_secs(args.duration);
    let idle = u64::from(ctrl.config().idle_timeout_secs);
    for i in 0..args.flows {
        let pair: Vec<NodeId> = hosts.choose_multiple(rng, 2).copied().collect();
        let &[src, dst] = pair.as_slice() else {
            bail!("Need at least two hosts");
        };
        let topo = ctrl.topo();
        let (Some(src_ip), Some(dst_ip)) = (
            topo.host(src).and_then(|h| h.ip),
            topo.host(dst).and_then(|h| h.ip),
        ) else {
            bail!("Hosts without an IP address");
        };
        let ingress = topo
            .neighbors_of(src)
            .next()
            .context("host without a switch")?;
        let dpid = topo.dpid(ingress).context("host not attached to a switch")?;
        let in_port = topo.port_towards(ingress, src).context("missing link")?;

        let fields = HeaderFields::tcp(src_ip, dst_ip, 10_000 + i as u16, 80);
        let start = rng.gen_range(1..args.duration.max(2));
        let lifetime = rng.gen_range(60..600);
        queue.push(
            Duration::from_secs(start),
            Event::PacketIn {
                dpid,
                fields: fields.clone(),
                in_port,
            },
        );
        queue.push(
            Duration::from_secs(start + lifetime + idle),
            Event::FlowRemoved {
                dpid,
                fields,
                reason: FlowRemovedReason::IdleTimeout,
            },
        );
    }

    let step = ctrl.config().poll_interval();
    let mut now = Duration::ZERO;
    let mut packet_outs = 0;
    let mut errors = 0;
    let mut rerouted = 0;
    let mut passes = 0;
    while now < end {
        now = (now + step).min(end);
        while let Some((t, event)) = queue.pop_until(now) {
            let is_rebalance = event == Event::Rebalance;
            match ctrl.handle(event, t, &mut queue) {
                Ok(Some(_)) => packet_outs += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("{e}");
                    errors += 1;
                }
            }
            if is_rebalance {
                passes += 1;
                rerouted += ctrl.last_report().map(|r| r.rerouted).unwrap_or_default();
            }
        }

        // power drawn until the next step
        let mut carried: HashMap<NodeId, usize> = HashMap::new();
        for (_, path) in ctrl.table().iter() {
            for n in path {
                *carried.entry(*n).or_default() += 1;
            }
        }
        let secs = step.as_secs_f64();
        for s in &switches {
            let flows = carried.get(s).copied().unwrap_or_default();
            let mut draw = BASE_DRAW + FLOW_DRAW * flows as f64;
            if hot.contains(s) {
                draw += HOT_DRAW;
            }
            ctrl.telemetry_mut()
                .add_power(*s, draw * secs)
                .set_cpu(*s, (0.05 + 0.05 * flows as f64).min(0.95))
                .set_load(*s, flows as u64 * 1_000_000);
        }
    }

    println!("packet-outs:       {packet_outs}");
    println!("rejected events:   {errors}");
    println!("rules sent:        {}", ctrl.channel().commands.len());
    println!("rebalance passes:  {passes}");
    println!("flows rerouted:    {rerouted}");
    println!("active flows:      {}", ctrl.table().len());
    for (flow, path) in ctrl.table().iter().sorted_by_key(|(f, _)| **f) {
        println!("  {flow}: {}", ctrl.topo().fmt_path(path));
    }
    for s in &hot {
        println!(
            "hot switch {} carries {} flows",
            ctrl.topo().name(s),
            ctrl.table().flows_through(*s).count()
        );
    }

    Ok(())
}
