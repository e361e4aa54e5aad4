//! Distributed vector layout.

use crate::error::{LaError, LaResult};
use pk_core::{Comm, block_len};
use std::ops::Range;

/// Immutable description of how a vector is partitioned: the process group,
/// the number of entries owned by this rank, and the total over all ranks.
///
/// The local sizes of all ranks are assumed to add up to the global size;
/// this cannot be checked without a collective call.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorSpec {
    comm: Comm,
    local_size: usize,
    global_size: usize,
}

impl VectorSpec {
    pub fn new(comm: Comm, local_size: usize, global_size: usize) -> Self {
        Self {
            comm,
            local_size,
            global_size,
        }
    }

    /// Split `global_size` entries into contiguous blocks over the group.
    pub fn distributed(comm: Comm, global_size: usize) -> Self {
        let local_size = block_len(global_size, comm.size(), comm.rank());
        Self::new(comm, local_size, global_size)
    }

    /// A vector held entirely by the single-process group.
    pub fn serial(size: usize) -> Self {
        Self::new(Comm::world(), size, size)
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    /// Global indices owned by this rank. Collective.
    pub fn local_range(&self) -> Range<usize> {
        let start = self.comm.sum_exscan(&[self.local_size as i64])[0] as usize;
        start..start + self.local_size
    }

    /// Same group and same local/global extents.
    pub fn is_compatible(&self, other: &VectorSpec) -> bool {
        self.comm.same_group(&other.comm)
            && self.local_size == other.local_size
            && self.global_size == other.global_size
    }

    pub fn ensure_compatible(&self, other: &VectorSpec) -> LaResult<()> {
        if self.is_compatible(other) {
            return Ok(());
        }
        Err(LaError::SpecMismatch {
            what: format!(
                "local {} / global {} vs local {} / global {}{}",
                self.local_size,
                self.global_size,
                other.local_size,
                other.global_size,
                if self.comm.same_group(&other.comm) {
                    ""
                } else {
                    " (different process groups)"
                }
            ),
        })
    }
}
