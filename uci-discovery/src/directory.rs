//! Node directory: fan-out discovery and the node cache
//!
//! One probe per transport kind runs concurrently, each with its own
//! timeout; the directory aggregates whatever arrives before the overall
//! deadline. Partial results on timeout are not an error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uci_core::{NODE_TYPE_ALL, NodeAddress, NodeDescriptor, NodeType, UciError, UciResult,
               effective_timeout};

/// Discovery fan-out parameters
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    /// Bitwise OR of `NODE_TYPE_*` masks selecting transport kinds
    pub type_mask: u32,
    /// Candidate LAN ports; empty selects the default instrument port
    pub ports: Vec<u16>,
    /// Candidate packed PVIDs for USB; empty matches any device
    pub pvids: Vec<u32>,
    /// Query message broadcast to LAN candidates
    pub query_message: String,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            type_mask: NODE_TYPE_ALL,
            ports: Vec::new(),
            pvids: Vec::new(),
            query_message: String::new(),
        }
    }
}

/// Result of one discovery fan-out
///
/// `nodes` holds at most the requested capacity; `total_found` is the
/// true deduplicated count, so truncation is always visible to the
/// caller.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub nodes: Vec<NodeDescriptor>,
    pub total_found: usize,
}

impl DiscoveryReport {
    /// True when more nodes answered than the capacity allowed
    pub fn truncated(&self) -> bool {
        self.total_found > self.nodes.len()
    }
}

/// One transport kind's discovery mechanism
#[async_trait]
pub trait DiscoveryProbe: Send + Sync {
    /// Transport kind this probe covers
    fn node_type(&self) -> NodeType;

    /// Enumerate reachable nodes within `timeout`
    async fn scan(&self, filter: &DiscoveryFilter, timeout: Duration)
    -> UciResult<Vec<NodeDescriptor>>;

    /// Single-shot probe of one candidate address
    async fn probe_address(
        &self,
        address: &NodeAddress,
        timeout: Duration,
    ) -> UciResult<NodeDescriptor>;
}

/// Discovers and caches reachable device descriptors
pub struct NodeDirectory {
    probes: Vec<Arc<dyn DiscoveryProbe>>,
    cache: Mutex<HashMap<(NodeType, String), NodeDescriptor>>,
}

impl std::fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDirectory")
            .field("probes", &self.probes.len())
            .finish()
    }
}

impl NodeDirectory {
    /// Directory with the built-in LAN and USB probes
    pub fn new() -> Self {
        Self::with_probes(vec![
            Arc::new(crate::lan::LanProbe::new()),
            Arc::new(crate::usb::UsbProbe::new()),
        ])
    }

    /// Directory over an explicit probe set (tests inject stubs here)
    pub fn with_probes(probes: Vec<Arc<dyn DiscoveryProbe>>) -> Self {
        Self {
            probes,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fan out discovery probes and aggregate their answers
    ///
    /// Returns at most `capacity` descriptors while reporting the true
    /// deduplicated count in the report, so a too-small capacity is
    /// signaled rather than silently truncated.
    ///
    /// # Errors
    /// `Unsupported` when no configured transport kind matches the mask.
    /// An empty result after the deadline is success, not an error.
    pub async fn discover(
        &self,
        filter: &DiscoveryFilter,
        timeout: Duration,
        capacity: usize,
    ) -> UciResult<DiscoveryReport> {
        let selected: Vec<Arc<dyn DiscoveryProbe>> = self
            .probes
            .iter()
            .filter(|p| p.node_type().matches_mask(filter.type_mask))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(UciError::Unsupported(format!(
                "no transport matches type mask {:#06x}",
                filter.type_mask
            )));
        }

        let budget = effective_timeout(timeout);
        let deadline = Instant::now() + budget;
        let (tx, mut rx) = mpsc::channel::<Vec<NodeDescriptor>>(selected.len());

        for probe in selected {
            let tx = tx.clone();
            let filter = filter.clone();
            tokio::spawn(async move {
                let kind = probe.node_type();
                let found = match tokio::time::timeout(budget, probe.scan(&filter, budget)).await
                {
                    Ok(Ok(nodes)) => nodes,
                    Ok(Err(e)) => {
                        log::debug!("{kind} discovery probe failed: {e}");
                        Vec::new()
                    }
                    Err(_) => {
                        log::debug!("{kind} discovery probe timed out");
                        Vec::new()
                    }
                };
                let _ = tx.send(found).await;
            });
        }
        drop(tx);

        // Aggregate until every probe reported or the deadline passed,
        // deduplicating by (kind, address) and keeping the most recent
        // observation. Arrival order is preserved for the survivors.
        let mut seen: HashMap<(NodeType, String), NodeDescriptor> = HashMap::new();
        let mut order: Vec<(NodeType, String)> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(nodes)) => {
                    for node in nodes {
                        let key = (node.node_type(), node.uci_addr());
                        if !seen.contains_key(&key) {
                            order.push(key.clone());
                        }
                        seen.insert(key, node);
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        {
            let mut cache = self.cache.lock().unwrap();
            for (key, node) in &seen {
                cache.insert(key.clone(), node.clone());
            }
        }

        let total_found = seen.len();
        let nodes: Vec<NodeDescriptor> = order
            .iter()
            .take(capacity)
            .filter_map(|key| seen.remove(key))
            .collect();
        log::info!(
            "Discovery found {total_found} node(s), returning {}",
            nodes.len()
        );
        Ok(DiscoveryReport { nodes, total_found })
    }

    /// Probe one candidate address directly
    ///
    /// # Errors
    /// `Unsupported` when the address kind is excluded by the mask or no
    /// probe covers it; otherwise whatever the probe reports.
    pub async fn probe_address(
        &self,
        address_hint: &str,
        type_mask: u32,
        timeout: Duration,
    ) -> UciResult<NodeDescriptor> {
        let address = NodeAddress::parse(address_hint)?;
        if !address.node_type().matches_mask(type_mask) {
            return Err(UciError::Unsupported(format!(
                "address kind {} excluded by type mask {:#06x}",
                address.node_type(),
                type_mask
            )));
        }
        let probe = self
            .probes
            .iter()
            .find(|p| p.node_type() == address.node_type())
            .ok_or_else(|| {
                UciError::Unsupported(format!("no probe for {}", address.node_type()))
            })?;

        let budget = effective_timeout(timeout);
        let node = tokio::time::timeout(budget, probe.probe_address(&address, budget))
            .await
            .map_err(|_| UciError::Timeout)??;

        self.cache
            .lock()
            .unwrap()
            .insert((node.node_type(), node.uci_addr()), node.clone());
        Ok(node)
    }

    /// Snapshot of every descriptor seen so far, without new I/O
    pub fn cached(&self) -> Vec<NodeDescriptor> {
        self.cache.lock().unwrap().values().cloned().collect()
    }
}

impl Default for NodeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use uci_core::{NODE_TYPE_LAN, NODE_TYPE_USB};

    /// Stub probe answering with a fixed node list after a delay
    struct StubProbe {
        kind: NodeType,
        nodes: Vec<NodeDescriptor>,
        delay: Duration,
    }

    #[async_trait]
    impl DiscoveryProbe for StubProbe {
        fn node_type(&self) -> NodeType {
            self.kind
        }

        async fn scan(
            &self,
            _filter: &DiscoveryFilter,
            _timeout: Duration,
        ) -> UciResult<Vec<NodeDescriptor>> {
            tokio::time::sleep(self.delay).await;
            Ok(self.nodes.clone())
        }

        async fn probe_address(
            &self,
            address: &NodeAddress,
            _timeout: Duration,
        ) -> UciResult<NodeDescriptor> {
            self.nodes
                .iter()
                .find(|n| &n.address == address)
                .cloned()
                .ok_or(UciError::DeviceNotFound)
        }
    }

    fn lan_node(last_octet: u8) -> NodeDescriptor {
        NodeDescriptor::from_idn(
            NodeAddress::Lan {
                ip: Ipv4Addr::new(192, 168, 1, last_octet),
                port: 5025,
            },
            &format!("Acme,MP7500,SN{last_octet:03},1.0"),
        )
    }

    fn directory_with(nodes: Vec<NodeDescriptor>) -> NodeDirectory {
        NodeDirectory::with_probes(vec![Arc::new(StubProbe {
            kind: NodeType::Lan,
            nodes,
            delay: Duration::ZERO,
        })])
    }

    #[tokio::test]
    async fn test_capacity_truncation_reports_true_count() {
        let directory = directory_with(vec![lan_node(10), lan_node(11)]);
        let report = directory
            .discover(&DiscoveryFilter::default(), Duration::from_secs(1), 1)
            .await
            .unwrap();
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.total_found, 2);
        assert!(report.truncated());
    }

    #[tokio::test]
    async fn test_unsupported_mask() {
        let directory = directory_with(vec![lan_node(10)]);
        match directory
            .discover(
                &DiscoveryFilter {
                    type_mask: NODE_TYPE_USB,
                    ..Default::default()
                },
                Duration::from_secs(1),
                16,
            )
            .await
        {
            Err(UciError::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let directory = directory_with(Vec::new());
        let report = directory
            .discover(&DiscoveryFilter::default(), Duration::from_millis(200), 16)
            .await
            .unwrap();
        assert!(report.nodes.is_empty());
        assert_eq!(report.total_found, 0);
    }

    #[tokio::test]
    async fn test_slow_probe_yields_partial_results() {
        let directory = NodeDirectory::with_probes(vec![
            Arc::new(StubProbe {
                kind: NodeType::Lan,
                nodes: vec![lan_node(10)],
                delay: Duration::ZERO,
            }),
            Arc::new(StubProbe {
                kind: NodeType::Usb,
                nodes: vec![NodeDescriptor::from_idn(
                    NodeAddress::Usb {
                        vid: 1,
                        pid: 2,
                        bus_addr: 3,
                    },
                    "Acme,USB-X,SN1,1.0",
                )],
                delay: Duration::from_secs(5),
            }),
        ]);

        let report = directory
            .discover(&DiscoveryFilter::default(), Duration::from_millis(300), 16)
            .await
            .unwrap();
        assert_eq!(report.total_found, 1);
        assert_eq!(report.nodes[0].node_type(), NodeType::Lan);
    }

    #[tokio::test]
    async fn test_duplicate_nodes_are_merged() {
        let node = lan_node(10);
        let directory = NodeDirectory::with_probes(vec![
            Arc::new(StubProbe {
                kind: NodeType::Lan,
                nodes: vec![node.clone(), node.clone()],
                delay: Duration::ZERO,
            }),
        ]);
        let report = directory
            .discover(&DiscoveryFilter::default(), Duration::from_millis(200), 16)
            .await
            .unwrap();
        assert_eq!(report.total_found, 1);
    }

    #[tokio::test]
    async fn test_probe_address_and_cache() {
        let node = lan_node(10);
        let directory = directory_with(vec![node.clone()]);
        assert!(directory.cached().is_empty());

        let found = directory
            .probe_address(&node.uci_addr(), NODE_TYPE_LAN, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(found, node);
        assert_eq!(directory.cached().len(), 1);

        // Excluded by mask.
        assert!(matches!(
            directory
                .probe_address(&node.uci_addr(), NODE_TYPE_USB, Duration::from_secs(1))
                .await,
            Err(UciError::Unsupported(_))
        ));
    }
}
