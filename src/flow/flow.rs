use std::collections::HashMap;
use std::net::Ipv4Addr;
use serde::Serialize;

/// Identity of a flow. Direction is kept as seen on the wire, so the two
/// halves of a TCP connection are separate keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowKey{
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

impl FlowKey{
    pub fn new(src_ip: Ipv4Addr, src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) -> FlowKey{
        FlowKey{
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlowStats{
    pub bytes: u64,
    pub packets: u64,
}

impl FlowStats{
    pub fn new(bytes: u64, packets: u64) -> FlowStats{
        FlowStats{ bytes, packets }
    }
    pub fn add(&mut self, other: &FlowStats){
        self.bytes += other.bytes;
        self.packets += other.packets;
    }
}

/// One accounted packet: the flow it belongs to and its TCP payload length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowRecord{
    pub key: FlowKey,
    pub byte_delta: u64,
}

/// Per-window mapping of flow key to counters. Used both as a worker's
/// local table and as the coordinator's canonical table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowTable{
    flows: HashMap<FlowKey, FlowStats>,
}

impl FlowTable{
    pub fn new() -> FlowTable{
        FlowTable::default()
    }

    pub fn record(&mut self, record: FlowRecord){
        let stats = self.flows.entry(record.key).or_default();
        stats.bytes += record.byte_delta;
        stats.packets += 1;
    }

    /// Adds every entry of `other` into this table. Order of merges does
    /// not change the resulting totals.
    pub fn merge(&mut self, other: FlowTable){
        for (key, stats) in other.flows{
            self.flows.entry(key).or_default().add(&stats);
        }
    }

    /// Returns the current contents and leaves the table empty.
    pub fn take(&mut self) -> FlowTable{
        std::mem::take(self)
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowStats>{
        self.flows.get(key)
    }

    pub fn len(&self) -> usize{
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool{
        self.flows.is_empty()
    }

    /// Entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &FlowStats)>{
        self.flows.iter()
    }

    pub fn totals(&self) -> FlowStats{
        let mut totals = FlowStats::default();
        for (_, stats) in self.iter(){
            totals.add(stats);
        }
        totals
    }

    /// Entries ordered by key, for presentation.
    pub fn sorted(&self) -> Vec<(FlowKey, FlowStats)>{
        let mut entries: Vec<(FlowKey, FlowStats)> = self.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl FromIterator<FlowRecord> for FlowTable{
    fn from_iter<I: IntoIterator<Item = FlowRecord>>(iter: I) -> FlowTable{
        let mut table = FlowTable::new();
        for record in iter{
            table.record(record);
        }
        table
    }
}
