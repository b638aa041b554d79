//! Ketama consistent-hash ring.
//!
//! Each node contributes 160 virtual points to a 32-bit ring, so replacing
//! one node relocates only the keys on its arcs instead of reshuffling the
//! whole keyspace. The point layout matches the canonical clients: 40 MD5
//! digests per node over `"{label}-{i}"`, four little-endian u32 points per
//! digest.

use md5::{Digest, Md5};

use crate::locator::{NodeLocator, RingMember};

/// Digest rounds per node.
const DIGEST_ROUNDS: usize = 40;

/// Each 16-byte digest yields this many ring points.
const POINTS_PER_DIGEST: usize = 4;

/// Consistent-hash locator for classic deployments.
///
/// Membership is fixed at construction; a config change builds a new
/// locator. Liveness is consulted per lookup, so a node flapping dead and
/// alive never moves the ring.
pub struct KetamaLocator<N> {
    nodes: Vec<N>,
    /// `(point, index into nodes)`, sorted by point. Equal points keep
    /// insertion order.
    ring: Vec<(u32, usize)>,
}

impl<N: RingMember> KetamaLocator<N> {
    pub fn new(nodes: Vec<N>) -> Self {
        let mut ring = Vec::with_capacity(nodes.len() * DIGEST_ROUNDS * POINTS_PER_DIGEST);
        for (idx, node) in nodes.iter().enumerate() {
            let label = node.label();
            for round in 0..DIGEST_ROUNDS {
                let digest = Md5::digest(format!("{label}-{round}").as_bytes());
                for point in 0..POINTS_PER_DIGEST {
                    let at = point * 4;
                    let value = u32::from_le_bytes([
                        digest[at],
                        digest[at + 1],
                        digest[at + 2],
                        digest[at + 3],
                    ]);
                    ring.push((value, idx));
                }
            }
        }
        // stable sort: ties resolve by insertion order
        ring.sort_by_key(|&(point, _)| point);
        Self { nodes, ring }
    }

    /// The 32-bit ring hash of a key: the first four MD5 digest bytes,
    /// little-endian.
    pub fn hash_key(key: &[u8]) -> u32 {
        let digest = Md5::digest(key);
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Number of virtual points on the ring.
    pub fn point_count(&self) -> usize {
        self.ring.len()
    }
}

impl<N: RingMember> NodeLocator<N> for KetamaLocator<N> {
    fn locate(&self, key: &[u8]) -> Option<N> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = Self::hash_key(key);
        // first point at or past the hash, wrapping to the ring start
        let start = self.ring.partition_point(|&(point, _)| point < hash);
        for offset in 0..self.ring.len() {
            let (_, idx) = self.ring[(start + offset) % self.ring.len()];
            let node = &self.nodes[idx];
            if node.is_alive() {
                return Some(node.clone());
            }
        }
        None
    }

    fn working_nodes(&self) -> Vec<N> {
        self.nodes.iter().filter(|n| n.is_alive()).cloned().collect()
    }
}
