//! Flow identity: canonical flow keys extracted from packet header fields.

use std::{fmt::Display, net::Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Ethernet type of IPv4.
pub const ETH_TYPE_IP: u16 = 0x0800;
/// IP protocol number of TCP.
pub const IP_PROTO_TCP: u8 = 6;
/// IP protocol number of UDP.
pub const IP_PROTO_UDP: u8 = 17;

/// Default priority of a flow rule.
pub const DEFAULT_BASE_PRIORITY: u16 = 500;
/// Default priority increment for each more specific match (IP, then TCP/UDP ports).
pub const DEFAULT_PRIORITY_STEP: u16 = 500;

/// A 48-bit hardware address.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MacAddr(pub [u8; 6]);

impl From<u64> for MacAddr {
    /// Take the lower 48 bits, most significant byte first.
    fn from(x: u64) -> Self {
        let b = x.to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Host-layer address used to find the endpoints of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostAddr {
    /// IPv4 address
    Ip(Ipv4Addr),
    /// Hardware address
    Mac(MacAddr),
}

impl Display for HostAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostAddr::Ip(ip) => ip.fmt(f),
            HostAddr::Mac(mac) => mac.fmt(f),
        }
    }
}

/// Match fields of a packet, as reported by a switch. Fields the switch did not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    /// Ethernet type
    pub eth_type: Option<u16>,
    /// Ethernet source
    pub eth_src: Option<MacAddr>,
    /// Ethernet destination
    pub eth_dst: Option<MacAddr>,
    /// IPv4 source
    pub ipv4_src: Option<Ipv4Addr>,
    /// IPv4 destination
    pub ipv4_dst: Option<Ipv4Addr>,
    /// IP protocol
    pub ip_proto: Option<u8>,
    /// TCP source port
    pub tcp_src: Option<u16>,
    /// TCP destination port
    pub tcp_dst: Option<u16>,
    /// UDP source port
    pub udp_src: Option<u16>,
    /// UDP destination port
    pub udp_dst: Option<u16>,
}

impl HeaderFields {
    /// Headers of a non-IP frame.
    pub fn ethernet(eth_type: u16, src: MacAddr, dst: MacAddr) -> Self {
        Self {
            eth_type: Some(eth_type),
            eth_src: Some(src),
            eth_dst: Some(dst),
            ..Default::default()
        }
    }

    /// Headers of an IPv4 packet without transport ports.
    pub fn ipv4(src: Ipv4Addr, dst: Ipv4Addr, proto: u8) -> Self {
        Self {
            eth_type: Some(ETH_TYPE_IP),
            ipv4_src: Some(src),
            ipv4_dst: Some(dst),
            ip_proto: Some(proto),
            ..Default::default()
        }
    }

    /// Headers of a TCP segment.
    pub fn tcp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        Self {
            tcp_src: Some(src_port),
            tcp_dst: Some(dst_port),
            ..Self::ipv4(src, dst, IP_PROTO_TCP)
        }
    }

    /// Headers of a UDP datagram.
    pub fn udp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        Self {
            udp_src: Some(src_port),
            udp_dst: Some(dst_port),
            ..Self::ipv4(src, dst, IP_PROTO_UDP)
        }
    }
}

/// The fields identifying a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlowKey {
    /// Non-IP traffic, identified by its hardware addresses.
    Ethernet {
        /// Ethernet type
        eth_type: u16,
        /// Source address
        src: MacAddr,
        /// Destination address
        dst: MacAddr,
    },
    /// IPv4 traffic. Ports are zero unless the protocol is TCP or UDP.
    Ipv4 {
        /// Source address
        src: Ipv4Addr,
        /// Destination address
        dst: Ipv4Addr,
        /// IP protocol
        proto: u8,
        /// Transport source port
        src_port: u16,
        /// Transport destination port
        dst_port: u16,
    },
}

/// A flow: its key and the priority of the rules installed for it.
///
/// Equality, hashing, and ordering all consider the key first and the priority second. The order
/// is lexicographic over the key fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Flow {
    key: FlowKey,
    priority: u16,
}

impl Flow {
    /// Extract the flow from the header fields, using the default priorities.
    pub fn extract(fields: &HeaderFields) -> Result<Self, Error> {
        Self::extract_with(fields, DEFAULT_BASE_PRIORITY, DEFAULT_PRIORITY_STEP)
    }

    /// Extract the flow from the header fields. The priority starts at `base`, and grows by `step`
    /// for IPv4 traffic, and by another `step` for TCP and UDP.
    pub fn extract_with(fields: &HeaderFields, base: u16, step: u16) -> Result<Self, Error> {
        let eth_type = fields.eth_type.ok_or(Error::MalformedFlowKey("eth_type"))?;
        let mut priority = base;

        if eth_type != ETH_TYPE_IP {
            let key = FlowKey::Ethernet {
                eth_type,
                src: fields.eth_src.ok_or(Error::MalformedFlowKey("eth_src"))?,
                dst: fields.eth_dst.ok_or(Error::MalformedFlowKey("eth_dst"))?,
            };
            return Ok(Self { key, priority });
        }

        let src = fields.ipv4_src.ok_or(Error::MalformedFlowKey("ipv4_src"))?;
        let dst = fields.ipv4_dst.ok_or(Error::MalformedFlowKey("ipv4_dst"))?;
        let proto = fields.ip_proto.ok_or(Error::MalformedFlowKey("ip_proto"))?;
        priority = priority.saturating_add(step);

        let (src_port, dst_port) = match proto {
            IP_PROTO_TCP => {
                priority = priority.saturating_add(step);
                (
                    fields.tcp_src.ok_or(Error::MalformedFlowKey("tcp_src"))?,
                    fields.tcp_dst.ok_or(Error::MalformedFlowKey("tcp_dst"))?,
                )
            }
            IP_PROTO_UDP => {
                priority = priority.saturating_add(step);
                (
                    fields.udp_src.ok_or(Error::MalformedFlowKey("udp_src"))?,
                    fields.udp_dst.ok_or(Error::MalformedFlowKey("udp_dst"))?,
                )
            }
            _ => (0, 0),
        };

        Ok(Self {
            key: FlowKey::Ipv4 {
                src,
                dst,
                proto,
                src_port,
                dst_port,
            },
            priority,
        })
    }

    /// The key of the flow
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// The rule priority
    pub fn priority(&self) -> u16 {
        self.priority
    }

    /// Returns `true` for IPv4 flows.
    pub fn is_ip(&self) -> bool {
        matches!(self.key, FlowKey::Ipv4 { .. })
    }

    /// Address of the host that originates the flow.
    pub fn src_addr(&self) -> HostAddr {
        match self.key {
            FlowKey::Ethernet { src, .. } => HostAddr::Mac(src),
            FlowKey::Ipv4 { src, .. } => HostAddr::Ip(src),
        }
    }

    /// Address of the host that terminates the flow.
    pub fn dst_addr(&self) -> HostAddr {
        match self.key {
            FlowKey::Ethernet { dst, .. } => HostAddr::Mac(dst),
            FlowKey::Ipv4 { dst, .. } => HostAddr::Ip(dst),
        }
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.key {
            FlowKey::Ethernet { eth_type, src, dst } => {
                write!(f, "{src} -> {dst} (eth_type={eth_type:#06x})")
            }
            FlowKey::Ipv4 {
                src,
                dst,
                proto,
                src_port,
                dst_port,
            } => write!(f, "{src}:{src_port} -> {dst}:{dst_port} (proto={proto})"),
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn ip(x: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, x)
    }

    #[test]
    fn extract_tcp() {
        let flow = Flow::extract(&HeaderFields::tcp(ip(1), ip(2), 4000, 80)).unwrap();
        assert_eq!(flow.priority(), 1500);
        assert_eq!(
            *flow.key(),
            FlowKey::Ipv4 {
                src: ip(1),
                dst: ip(2),
                proto: IP_PROTO_TCP,
                src_port: 4000,
                dst_port: 80
            }
        );
        assert_eq!(flow.src_addr(), HostAddr::Ip(ip(1)));
        assert_eq!(flow.dst_addr(), HostAddr::Ip(ip(2)));
        assert!(flow.is_ip());
    }

    #[test]
    fn extract_udp_and_icmp() {
        let udp = Flow::extract(&HeaderFields::udp(ip(1), ip(2), 53, 5353)).unwrap();
        assert_eq!(udp.priority(), 1500);

        let icmp = Flow::extract(&HeaderFields::ipv4(ip(1), ip(2), 1)).unwrap();
        assert_eq!(icmp.priority(), 1000);
        assert!(matches!(
            icmp.key(),
            FlowKey::Ipv4 { src_port: 0, dst_port: 0, proto: 1, .. }
        ));
    }

    #[test]
    fn extract_ethernet() {
        let (a, b) = (MacAddr::from(1), MacAddr::from(2));
        let flow = Flow::extract(&HeaderFields::ethernet(0x0806, a, b)).unwrap();
        assert_eq!(flow.priority(), 500);
        assert_eq!(flow.src_addr(), HostAddr::Mac(a));
        assert_eq!(flow.dst_addr(), HostAddr::Mac(b));
        assert!(!flow.is_ip());
        assert_eq!(a.to_string(), "00:00:00:00:00:01");
    }

    #[test]
    fn extract_with_priorities() {
        let flow = Flow::extract_with(&HeaderFields::tcp(ip(1), ip(2), 1, 2), 100, 10).unwrap();
        assert_eq!(flow.priority(), 120);
    }

    #[test]
    fn malformed() {
        assert!(matches!(
            Flow::extract(&HeaderFields::default()),
            Err(Error::MalformedFlowKey("eth_type"))
        ));
        let mut h = HeaderFields::tcp(ip(1), ip(2), 1, 2);
        h.tcp_dst = None;
        assert!(matches!(Flow::extract(&h), Err(Error::MalformedFlowKey("tcp_dst"))));
        let mut h = HeaderFields::udp(ip(1), ip(2), 1, 2);
        h.ipv4_src = None;
        assert!(matches!(Flow::extract(&h), Err(Error::MalformedFlowKey("ipv4_src"))));
        let mut h = HeaderFields::ethernet(0x0806, MacAddr::from(1), MacAddr::from(2));
        h.eth_dst = None;
        assert!(matches!(Flow::extract(&h), Err(Error::MalformedFlowKey("eth_dst"))));
    }

    #[test]
    fn order_is_total_where_conjunction_is_not() {
        // a is smaller in the source address but larger in the destination port. A field-wise
        // conjunction reports neither a < b nor b < a.
        let a = Flow::extract(&HeaderFields::tcp(ip(1), ip(9), 1, 9)).unwrap();
        let b = Flow::extract(&HeaderFields::tcp(ip(2), ip(9), 1, 1)).unwrap();
        assert!(a < b);
        assert!(!(b < a));
        assert_ne!(a, b);
    }

    fn flow() -> impl Strategy<Value = Flow> {
        prop_oneof![
            (any::<[u8; 4]>(), any::<[u8; 4]>(), 0..3u8, any::<u16>(), any::<u16>()).prop_map(
                |(s, d, p, sp, dp)| {
                    let (s, d) = (Ipv4Addr::from(s), Ipv4Addr::from(d));
                    let h = match p {
                        0 => HeaderFields::tcp(s, d, sp, dp),
                        1 => HeaderFields::udp(s, d, sp, dp),
                        _ => HeaderFields::ipv4(s, d, 1),
                    };
                    Flow::extract(&h).unwrap()
                }
            ),
            (any::<[u8; 6]>(), any::<[u8; 6]>()).prop_map(|(s, d)| {
                Flow::extract(&HeaderFields::ethernet(0x0806, MacAddr(s), MacAddr(d))).unwrap()
            }),
        ]
    }

    proptest! {
        #[test]
        fn trichotomy(a in flow(), b in flow()) {
            let n = (a < b) as u8 + (b < a) as u8 + (a == b) as u8;
            prop_assert_eq!(n, 1);
        }

        #[test]
        fn transitive(a in flow(), b in flow(), c in flow()) {
            let mut v = [a, b, c];
            v.sort();
            prop_assert!(v[0] <= v[1] && v[1] <= v[2] && v[0] <= v[2]);
        }
    }
}
