//! Request routing functions.
//!
//! A routing function maps a request to a partition index in `[0, partitions)`.
//! It must be consistent: requests targeting the same entry always map to the
//! same index, so sharded replicas see stable traffic.

use rand::Rng;

use crate::connection::{Dn, Request};

/// Maps a request to the index of the delegate that should serve it first.
pub trait RoutingFunction: Send + Sync {
    fn route(&self, request: &Request, partitions: usize) -> usize;
}

impl<F> RoutingFunction for F
where
    F: Fn(&Request) -> usize + Send + Sync,
{
    fn route(&self, request: &Request, partitions: usize) -> usize {
        if partitions == 0 {
            return 0;
        }
        self(request) % partitions
    }
}

/// Routes by a hash of the request's target DN.
///
/// Requests without a resolvable target (most extended operations, StartTLS,
/// SASL binds with non-DN authorization ids) are spread uniformly at random.
/// The hash is FNV-1a over the normalized DN, so every client process configured
/// with the same delegate order routes a given entry to the same server.
#[derive(Debug, Default, Clone, Copy)]
pub struct AffinityRouting;

impl AffinityRouting {
    pub fn new() -> Self {
        Self
    }

    /// The partition for a DN.
    pub fn partition_for_dn(dn: &Dn, partitions: usize) -> usize {
        if partitions == 0 {
            return 0;
        }
        (fnv1a(dn.as_str().as_bytes()) % partitions as u64) as usize
    }
}

impl RoutingFunction for AffinityRouting {
    fn route(&self, request: &Request, partitions: usize) -> usize {
        if partitions <= 1 {
            return 0;
        }
        match request.target_dn() {
            Some(dn) => Self::partition_for_dn(&dn, partitions),
            None => rand::thread_rng().gen_range(0..partitions),
        }
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET_BASIS;
    for &byte in bytes {
        h ^= u64::from(byte);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}
