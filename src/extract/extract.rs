use std::net::Ipv4Addr;
use crate::flow::flow::{FlowKey, FlowRecord};

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const MAX_VLAN_TAGS: usize = 2;
const LINUX_SLL_HEADER_LEN: usize = 16;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;

const IPV4_MIN_HEADER_LEN: usize = 20;
const TCP_MIN_HEADER_LEN: usize = 20;
const IPPROTO_TCP: u8 = 6;

/// Link-layer framing of captured frames, derived from the capture's datalink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkType{
    Ethernet,
    LinuxSll,
    RawIp,
}

impl LinkType{
    /// Maps a pcap DLT/LINKTYPE number to a supported framing.
    pub fn from_datalink(datalink: i32) -> Option<LinkType>{
        match datalink{
            1 => Some(LinkType::Ethernet),
            113 => Some(LinkType::LinuxSll),
            12 | 14 | 101 | 228 => Some(LinkType::RawIp),
            _ => None,
        }
    }
}

/// Decodes one captured frame into a flow record. Returns `None` for
/// anything that is not a complete IPv4 + TCP header pair.
pub fn extract(link: LinkType, frame: &[u8]) -> Option<FlowRecord>{
    let ip = network_layer(link, frame)?;
    parse_ipv4_tcp(ip)
}

fn network_layer(link: LinkType, frame: &[u8]) -> Option<&[u8]>{
    match link{
        LinkType::Ethernet => {
            if frame.len() < ETHERNET_HEADER_LEN{
                return None;
            }
            let mut offset = 12;
            let mut ethertype = read_u16(frame, offset)?;
            let mut tags = 0;
            while (ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ) && tags < MAX_VLAN_TAGS{
                offset += VLAN_TAG_LEN;
                ethertype = read_u16(frame, offset)?;
                tags += 1;
            }
            if ethertype != ETHERTYPE_IPV4{
                return None;
            }
            frame.get(offset + 2..)
        },
        LinkType::LinuxSll => {
            if frame.len() < LINUX_SLL_HEADER_LEN || read_u16(frame, 14)? != ETHERTYPE_IPV4{
                return None;
            }
            frame.get(LINUX_SLL_HEADER_LEN..)
        },
        LinkType::RawIp => Some(frame),
    }
}

fn parse_ipv4_tcp(ip: &[u8]) -> Option<FlowRecord>{
    if ip.len() < IPV4_MIN_HEADER_LEN || ip[0] >> 4 != 4{
        return None;
    }
    let ip_header_len = ((ip[0] & 0x0f) as usize) * 4;
    if ip_header_len < IPV4_MIN_HEADER_LEN || ip.len() < ip_header_len{
        return None;
    }
    if ip[9] != IPPROTO_TCP{
        return None;
    }
    // non-first fragments carry no TCP header
    let fragment_offset = read_u16(ip, 6)? & 0x1fff;
    if fragment_offset != 0{
        return None;
    }
    let total_len = read_u16(ip, 2)? as usize;

    let tcp = &ip[ip_header_len..];
    if tcp.len() < TCP_MIN_HEADER_LEN{
        return None;
    }
    let tcp_header_len = ((tcp[12] >> 4) as usize) * 4;
    if tcp_header_len < TCP_MIN_HEADER_LEN || tcp.len() < tcp_header_len{
        return None;
    }
    let payload_len = total_len.checked_sub(ip_header_len + tcp_header_len)?;

    let key = FlowKey::new(
        Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]),
        read_u16(tcp, 0)?,
        Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]),
        read_u16(tcp, 2)?,
    );
    Some(FlowRecord{ key, byte_delta: payload_len as u64 })
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16>{
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}
