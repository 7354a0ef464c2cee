use std::collections::BTreeMap;
use std::net::IpAddr;
use tessie_core::{Advertisement, NodeStatus};

#[derive(Debug, Clone)]
pub struct Node {
    pub address: IpAddr,
    pub name: String,
    pub mac: String,
    pub total_executed: u64,
    pub status: NodeStatus,
    pub free_spiffs_bytes: u64,
    pub rssi: i64,
}

impl Node {
    fn from_advertisement(address: IpAddr, ad: Advertisement) -> Self {
        Self {
            address,
            name: ad.node,
            mac: ad.mac,
            total_executed: ad.total_executed,
            status: ad.status,
            free_spiffs_bytes: ad.free_spiffs_bytes,
            rssi: ad.rssi,
        }
    }
}

/// Directory of discovered nodes keyed by the address their advertisement
/// arrived from. Iteration order is by address.
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    nodes: BTreeMap<IpAddr, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the node at `address` with the advertised fields.
    pub fn update(&mut self, address: IpAddr, ad: Advertisement) -> &Node {
        let node = Node::from_advertisement(address, ad);
        self.nodes.insert(address, node);
        &self.nodes[&address]
    }

    #[cfg(test)]
    pub fn get(&self, address: &IpAddr) -> Option<&Node> {
        self.nodes.get(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Point-in-time copy of `(address, status)` pairs.
    pub fn snapshot(&self) -> Vec<(IpAddr, NodeStatus)> {
        self.nodes
            .values()
            .map(|node| (node.address, node.status))
            .collect()
    }
}
