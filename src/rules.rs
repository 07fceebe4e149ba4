//! Rule synthesis: turn flows and paths into ordered switch instructions, and format them as
//! `dpctl` commands.

use std::net::Ipv4Addr;

use log::debug;

use crate::{
    algorithms::{NodeId, Topology},
    error::Error,
    flow::{Flow, FlowKey, IP_PROTO_TCP, IP_PROTO_UDP},
};

/// Flag asking the switch to report the removal of the rule.
pub const FLAG_SEND_FLOW_REM: u16 = 0x0001;
/// Flag resetting the packet and byte counters of the rule.
pub const FLAG_RESET_COUNTS: u16 = 0x0004;

/// A single instruction for one switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Forward the flow out of `out_port`.
    Install {
        /// Datapath id of the switch
        dpid: u64,
        /// The flow to match
        flow: Flow,
        /// Output port
        out_port: u32,
    },
    /// Remove the rule of the flow.
    Delete {
        /// Datapath id of the switch
        dpid: u64,
        /// The flow to match
        flow: Flow,
    },
    /// Send packets without a matching rule to the controller.
    TableMiss {
        /// Datapath id of the switch
        dpid: u64,
    },
    /// Do not attach packet contents to messages sent to the controller.
    MissConfig {
        /// Datapath id of the switch
        dpid: u64,
    },
    /// Static rule delivering IPv4 traffic to a directly attached host.
    HostRoute {
        /// Datapath id of the switch
        dpid: u64,
        /// Address of the host
        ip: Ipv4Addr,
        /// Port towards the host
        out_port: u32,
    },
}

impl Instruction {
    /// The switch the instruction is sent to.
    pub fn dpid(&self) -> u64 {
        match self {
            Instruction::Install { dpid, .. }
            | Instruction::Delete { dpid, .. }
            | Instruction::TableMiss { dpid }
            | Instruction::MissConfig { dpid }
            | Instruction::HostRoute { dpid, .. } => *dpid,
        }
    }
}

fn dpid_of(topo: &Topology, n: NodeId) -> Result<u64, Error> {
    topo.dpid(n).ok_or(Error::UnknownNode(n))
}

/// Install instructions for every node of `path` except the last one, each forwarding towards the
/// next node. The instructions walk the path backwards, so that the last hop is installed first.
pub fn install_instructions(
    topo: &Topology,
    path: &[NodeId],
    flow: &Flow,
) -> Result<Vec<Instruction>, Error> {
    path.windows(2)
        .rev()
        .map(|w| {
            let out_port = topo.port_towards(w[0], w[1]).ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "{} is not adjacent to {}",
                    topo.name(w[0]),
                    topo.name(w[1])
                ))
            })?;
            Ok(Instruction::Install {
                dpid: dpid_of(topo, w[0])?,
                flow: *flow,
                out_port,
            })
        })
        .collect()
}

/// Delete instructions for every node of `nodes` except the last one, which is the node nearest
/// the destination. Its stale rule expires with the idle timeout.
pub fn delete_instructions(
    topo: &Topology,
    nodes: &[NodeId],
    flow: &Flow,
) -> Result<Vec<Instruction>, Error> {
    let Some((_, rest)) = nodes.split_last() else {
        return Ok(Vec::new());
    };
    rest.iter()
        .map(|n| {
            Ok(Instruction::Delete {
                dpid: dpid_of(topo, *n)?,
                flow: *flow,
            })
        })
        .collect()
}

/// Instructions sent to a switch right after it connected: the table-miss rule, the miss
/// configuration, and one static route per attached host with an IPv4 address.
pub fn handshake_instructions(topo: &Topology, switch: NodeId) -> Result<Vec<Instruction>, Error> {
    let dpid = dpid_of(topo, switch)?;
    let mut instructions = vec![Instruction::TableMiss { dpid }, Instruction::MissConfig { dpid }];
    for (host, out_port) in topo.attached_hosts(switch) {
        if let Some(ip) = topo.host(host).and_then(|h| h.ip) {
            instructions.push(Instruction::HostRoute { dpid, ip, out_port });
        }
    }
    Ok(instructions)
}

/// Formats instructions as `dpctl` command strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpctlFormatter {
    /// Idle timeout of installed flow rules, in seconds.
    pub idle_timeout: u16,
}

impl Default for DpctlFormatter {
    fn default() -> Self {
        Self { idle_timeout: 60 }
    }
}

impl DpctlFormatter {
    /// Create a formatter with the given idle timeout.
    pub fn new(idle_timeout: u16) -> Self {
        Self { idle_timeout }
    }

    /// Format a single instruction.
    pub fn format(&self, instruction: &Instruction) -> String {
        match instruction {
            Instruction::Install { flow, out_port, .. } => format!(
                "flow-mod cmd=add,table=0,idle={},flags={:#06x},{} apply:output={out_port}",
                self.idle_timeout,
                FLAG_SEND_FLOW_REM | FLAG_RESET_COUNTS,
                flow_match(flow),
            ),
            Instruction::Delete { flow, .. } => format!(
                "flow-mod cmd=del,table=0,flags={FLAG_SEND_FLOW_REM:#06x},{}",
                flow_match(flow)
            ),
            Instruction::TableMiss { .. } => {
                "flow-mod cmd=add,table=0,prio=0 apply:output=ctrl:0".to_string()
            }
            Instruction::MissConfig { .. } => "set-config miss=0".to_string(),
            Instruction::HostRoute { ip, out_port, .. } => format!(
                "flow-mod cmd=add,table=0,flags={FLAG_RESET_COUNTS:#06x} eth_type=0x800,ip_dst={ip} apply:output={out_port}"
            ),
        }
    }
}

/// Priority and match fields of a flow, e.g. `prio=1500,eth_type=0x800,ip_proto=6,...`.
pub fn flow_match(flow: &Flow) -> String {
    let prio = format!("prio={}", flow.priority());
    match *flow.key() {
        FlowKey::Ethernet { eth_type, src, dst } => {
            format!("{prio},eth_dst={dst},eth_src={src},eth_type={eth_type:#x}")
        }
        FlowKey::Ipv4 {
            src,
            dst,
            proto,
            src_port,
            dst_port,
        } => {
            let ports = match proto {
                IP_PROTO_TCP => format!(",tcp_src={src_port},tcp_dst={dst_port}"),
                IP_PROTO_UDP => format!(",udp_src={src_port},udp_dst={dst_port}"),
                _ => String::new(),
            };
            format!("{prio},eth_type=0x800,ip_proto={proto},ip_src={src},ip_dst={dst}{ports}")
        }
    }
}

/// Control channel towards the switches. Commands are fire-and-forget.
pub trait RuleChannel: std::fmt::Debug {
    /// Execute the command on the switch.
    fn execute(&mut self, dpid: u64, command: &str);
}

/// Channel that keeps every command it receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingChannel {
    /// All commands, in the order they were executed.
    pub commands: Vec<(u64, String)>,
}

impl RecordingChannel {
    /// Commands sent to a single switch.
    pub fn commands_for(&self, dpid: u64) -> impl Iterator<Item = &str> + '_ {
        self.commands
            .iter()
            .filter(move |(d, _)| *d == dpid)
            .map(|(_, c)| c.as_str())
    }

    /// Drop all recorded commands.
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl RuleChannel for RecordingChannel {
    fn execute(&mut self, dpid: u64, command: &str) {
        self.commands.push((dpid, command.to_string()));
    }
}

/// Format the instructions and send them over the channel, in order.
pub fn send_all<'a, I>(channel: &mut dyn RuleChannel, formatter: &DpctlFormatter, instructions: I)
where
    I: IntoIterator<Item = &'a Instruction>,
{
    for i in instructions {
        let cmd = formatter.format(i);
        debug!("[{}]: {cmd}", i.dpid());
        channel.execute(i.dpid(), &cmd);
    }
}
