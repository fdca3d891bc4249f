//! Initial map generation for a freshly created bucket.

use crate::types::{Chain, NodeId, VbMap};

/// Generate the first map for a bucket: `num_vbuckets` chains of
/// `num_replicas + 1` slots each, filled round-robin from `servers`.
///
/// Chain `v` takes its nodes from a window over `servers` starting at
/// `v mod |servers|`, advancing one server per vbucket. When the server
/// list is shorter than the chain, the remaining slots stay empty. No
/// randomness; the same inputs always yield the same map. An empty server
/// list produces all-empty chains.
#[must_use]
pub fn generate_initial_map(
    num_replicas: usize,
    num_vbuckets: usize,
    servers: &[NodeId],
) -> VbMap {
    let chain_len = num_replicas + 1;
    let chains = (0..num_vbuckets)
        .map(|v| {
            let slots = (0..chain_len)
                .map(|i| {
                    if i < servers.len() {
                        Some(servers[(v + i) % servers.len()].clone())
                    } else {
                        None
                    }
                })
                .collect();
            Chain(slots)
        })
        .collect();
    // uniform by construction
    VbMap { chains }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|s| NodeId::from(*s)).collect()
    }

    fn chain(ids: &[Option<&str>]) -> Chain {
        Chain(ids.iter().map(|s| s.map(NodeId::from)).collect())
    }

    #[test]
    fn test_round_robin_windows() {
        let map = generate_initial_map(1, 4, &nodes(&["a", "b", "c"]));
        assert_eq!(
            map.chains(),
            &[
                chain(&[Some("a"), Some("b")]),
                chain(&[Some("b"), Some("c")]),
                chain(&[Some("c"), Some("a")]),
                chain(&[Some("a"), Some("b")]),
            ]
        );
    }

    #[test]
    fn test_short_server_list_pads_with_empty() {
        let map = generate_initial_map(2, 2, &nodes(&["a"]));
        assert_eq!(
            map.chains(),
            &[
                chain(&[Some("a"), None, None]),
                chain(&[Some("a"), None, None]),
            ]
        );
    }

    #[test]
    fn test_masters_follow_modular_rotation() {
        let servers = nodes(&["a", "b", "c", "d"]);
        let map = generate_initial_map(1, 16, &servers);
        for (v, chain) in map.chains().iter().enumerate() {
            assert_eq!(chain.master(), Some(&servers[v % servers.len()]));
        }
    }

    #[test]
    fn test_no_duplicates_within_chains() {
        let map = generate_initial_map(2, 32, &nodes(&["a", "b", "c", "d", "e"]));
        for chain in map.chains() {
            assert!(!chain.has_duplicates());
        }
    }

    #[test]
    fn test_uniform_chain_length() {
        let map = generate_initial_map(3, 8, &nodes(&["a", "b"]));
        assert_eq!(map.chain_len(), 4);
        for chain in map.chains() {
            assert_eq!(chain.len(), 4);
        }
    }

    #[test]
    fn test_empty_server_list() {
        let map = generate_initial_map(1, 2, &[]);
        assert_eq!(map.num_vbuckets(), 2);
        for chain in map.chains() {
            assert_eq!(chain.slots(), &[None, None]);
        }
    }

    #[test]
    fn test_zero_vbuckets() {
        let map = generate_initial_map(1, 0, &nodes(&["a"]));
        assert_eq!(map.num_vbuckets(), 0);
        assert_eq!(map.chain_len(), 0);
    }

    #[test]
    fn test_masters_balanced_when_divisible() {
        let servers = nodes(&["a", "b", "c", "d"]);
        let map = generate_initial_map(1, 16, &servers);
        let hists = map.histograms(&servers);
        for node in &servers {
            assert_eq!(hists[0].count(node), Some(4));
        }
        assert_eq!(hists[0].spread(), 0);
    }

    #[test]
    fn test_initial_map_is_deterministic() {
        let servers = nodes(&["a", "b", "c"]);
        assert_eq!(
            generate_initial_map(1, 64, &servers),
            generate_initial_map(1, 64, &servers)
        );
    }
}
