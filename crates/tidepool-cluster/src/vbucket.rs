//! VBucket (partition) routing driven by a server-supplied map.
//!
//! The cluster owns key placement here: the client hashes a key to a bucket
//! index and the map names the master node for that bucket. The bucket
//! index travels with every request so the server can reject stale routing
//! after a rebalance.

use crate::config::VBucketServerMap;
use crate::error::TopologyError;
use crate::locator::{NodeLocator, RingMember};

/// One keyspace partition: a master seat and zero or more replica seats,
/// all indices into the config's server list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VBucket {
    master: Option<usize>,
    replicas: Vec<usize>,
}

impl VBucket {
    /// The master's server-list index, `None` while the seat is unassigned.
    pub fn master(&self) -> Option<usize> {
        self.master
    }

    /// Replica server-list indices, in map order.
    pub fn replicas(&self) -> &[usize] {
        &self.replicas
    }
}

/// The key hash named by the map's `hashAlgorithm` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketHasher {
    /// CRC-32 truncated to 15 bits: `(crc32(key) >> 16) & 0x7fff`.
    Crc,
}

impl BucketHasher {
    pub fn parse(name: &str) -> Result<Self, TopologyError> {
        if name.eq_ignore_ascii_case("crc") || name.eq_ignore_ascii_case("crc32") {
            Ok(BucketHasher::Crc)
        } else {
            Err(TopologyError::InvalidConfiguration(format!(
                "unsupported hash algorithm '{name}'"
            )))
        }
    }

    pub fn hash(self, key: &[u8]) -> u32 {
        match self {
            BucketHasher::Crc => (crc32fast::hash(key) >> 16) & 0x7fff,
        }
    }
}

/// Partition-map locator for vbucket deployments.
///
/// `nodes` must be in server-list order so the map indices stay valid.
#[derive(Debug)]
pub struct VBucketLocator<N> {
    nodes: Vec<N>,
    buckets: Vec<VBucket>,
    hasher: BucketHasher,
    /// `buckets.len() - 1`; the bucket count is a power of two.
    mask: u32,
}

impl<N: RingMember> VBucketLocator<N> {
    pub fn new(nodes: Vec<N>, map: &VBucketServerMap) -> Result<Self, TopologyError> {
        if nodes.len() != map.server_list.len() {
            return Err(TopologyError::InvalidConfiguration(format!(
                "{} nodes for a server list of {}",
                nodes.len(),
                map.server_list.len()
            )));
        }
        let buckets = build_buckets(&map.v_bucket_map, map.server_list.len())?;
        let hasher = BucketHasher::parse(&map.hash_algorithm)?;
        let mask = (buckets.len() - 1) as u32;
        Ok(Self {
            nodes,
            buckets,
            hasher,
            mask,
        })
    }

    /// The bucket a key hashes into.
    pub fn vbucket_of(&self, key: &[u8]) -> u16 {
        (self.hasher.hash(key) & self.mask) as u16
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, index: u16) -> Option<&VBucket> {
        self.buckets.get(usize::from(index))
    }

    /// The master of a bucket, by index, regardless of liveness.
    pub fn locate_by_vbucket(&self, index: u16) -> Option<N> {
        let master = self.bucket(index)?.master?;
        Some(self.nodes[master].clone())
    }

    /// Replica nodes for a key, in map order, dead ones included.
    pub fn replicas_of(&self, key: &[u8]) -> Vec<N> {
        let bucket = &self.buckets[usize::from(self.vbucket_of(key))];
        bucket
            .replicas
            .iter()
            .map(|&idx| self.nodes[idx].clone())
            .collect()
    }
}

impl<N: RingMember> NodeLocator<N> for VBucketLocator<N> {
    fn locate(&self, key: &[u8]) -> Option<N> {
        let bucket = &self.buckets[usize::from(self.vbucket_of(key))];
        let node = &self.nodes[bucket.master?];
        // a dead master is not substituted here; replica retry is the
        // operation layer's decision
        node.is_alive().then(|| node.clone())
    }

    fn working_nodes(&self) -> Vec<N> {
        self.nodes.iter().filter(|n| n.is_alive()).cloned().collect()
    }
}

/// Checks a server map's structural invariants without building a locator:
/// a known hash algorithm, a power-of-two bucket count, and in-range seats,
/// for the live map and any forward map.
///
/// Callers that acquire per-node resources before constructing a
/// [`VBucketLocator`] use this to reject a bad map while it is still free
/// to do so.
pub fn validate_server_map(map: &VBucketServerMap) -> Result<(), TopologyError> {
    BucketHasher::parse(&map.hash_algorithm)?;
    build_buckets(&map.v_bucket_map, map.server_list.len())?;
    if let Some(forward) = &map.v_bucket_map_forward {
        build_buckets(forward, map.server_list.len())?;
    }
    Ok(())
}

fn build_buckets(rows: &[Vec<i32>], servers: usize) -> Result<Vec<VBucket>, TopologyError> {
    if rows.is_empty() || !rows.len().is_power_of_two() {
        return Err(TopologyError::InvalidConfiguration(format!(
            "bucket count {} is not a power of two",
            rows.len()
        )));
    }
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let (&master, replicas) = row.split_first().ok_or_else(|| {
                TopologyError::InvalidConfiguration(format!("bucket {index} has no master seat"))
            })?;
            let seat = |value: i32| -> Result<Option<usize>, TopologyError> {
                if value < 0 {
                    return Ok(None);
                }
                let idx = value as usize;
                if idx >= servers {
                    return Err(TopologyError::InvalidConfiguration(format!(
                        "bucket {index} points at server {value} of {servers}"
                    )));
                }
                Ok(Some(idx))
            };
            Ok(VBucket {
                master: seat(master)?,
                replicas: replicas
                    .iter()
                    .filter_map(|&r| seat(r).transpose())
                    .collect::<Result<_, _>>()?,
            })
        })
        .collect()
}
