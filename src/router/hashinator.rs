// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The hashinator: an opaque consistent-hash function mapping `(type,
//! value-bytes)` to a partition id. Its hash body is an external
//! collaborator this crate doesn't reproduce — what this module owns is
//! the contract (build one from the `HASHCONFIG` varbinary, query it with
//! a typed parameter) and a deterministic placeholder implementation good
//! enough to drive routing decisions and tests.

use bytes::{Buf, Bytes};

pub trait Hashinator: Send + Sync {
    fn hash(&self, type_tag: u8, value_bytes: &[u8]) -> i32;
}

/// Built from a `HASHCONFIG` blob whose only structure this core assumes is
/// a leading big-endian `u32` partition count; everything after it is
/// opaque configuration the real hash function would consume. Partition
/// assignment here is a simple, deterministic byte-sum modulo, which is
/// sufficient to exercise routing/affinity without depending on the real
/// algorithm.
pub struct ModuloHashinator {
    partition_count: u32,
}

impl ModuloHashinator {
    pub fn from_hashconfig(mut hashconfig: Bytes) -> anyhow::Result<Self> {
        anyhow::ensure!(hashconfig.remaining() >= 4, "truncated HASHCONFIG");
        let partition_count = hashconfig.get_u32();
        anyhow::ensure!(partition_count > 0, "HASHCONFIG declares zero partitions");
        Ok(Self { partition_count })
    }

    pub fn with_partition_count(partition_count: u32) -> Self {
        Self { partition_count }
    }
}

impl Hashinator for ModuloHashinator {
    fn hash(&self, _type_tag: u8, value_bytes: &[u8]) -> i32 {
        let sum: u64 = value_bytes.iter().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(u64::from(*b))
        });
        (sum % u64::from(self.partition_count)) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_input() {
        let h = ModuloHashinator::with_partition_count(8);
        assert_eq!(h.hash(3, &42i32.to_be_bytes()), h.hash(3, &42i32.to_be_bytes()));
    }

    #[test]
    fn stays_in_partition_range() {
        let h = ModuloHashinator::with_partition_count(4);
        for v in 0..50i32 {
            let p = h.hash(3, &v.to_be_bytes());
            assert!((0..4).contains(&p));
        }
    }

    #[test]
    fn rejects_zero_partition_hashconfig() {
        let bytes = Bytes::from_static(&0u32.to_be_bytes());
        assert!(ModuloHashinator::from_hashconfig(bytes).is_err());
    }
}
