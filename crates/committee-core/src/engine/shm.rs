use nalgebra::{Point3, Vector3};
use shared_memory::{Shmem, ShmemConf};
use std::mem;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("failed to create shared segment of {slots} f64 slots: {reason}")]
    Create { slots: usize, reason: String },

    #[error("failed to attach shared segment {os_id}: {reason}")]
    Attach { os_id: String, reason: String },

    #[error("segment {os_id} holds {actual} bytes, expected at least {expected}")]
    Undersized {
        os_id: String,
        expected: usize,
        actual: usize,
    },
}

/// A coordinator-owned array of `f64` slots backed by a named shared-memory
/// segment. Dropping the owner unlinks the segment.
///
/// The buffer itself carries no synchronization; exclusive access is
/// guaranteed by the request/acknowledge rendezvous (exactly one writer role
/// per field at any instant).
pub(crate) struct SharedArray {
    shmem: Shmem,
    slots: usize,
}

impl SharedArray {
    pub fn create(slots: usize) -> Result<Self, ShmError> {
        let shmem = ShmemConf::new()
            .size(slots * mem::size_of::<f64>())
            .create()
            .map_err(|e| ShmError::Create {
                slots,
                reason: e.to_string(),
            })?;
        Ok(Self { shmem, slots })
    }

    pub fn os_id(&self) -> &str {
        self.shmem.get_os_id()
    }

    pub fn as_slice(&self) -> &[f64] {
        // SAFETY: the segment is at least `slots * 8` bytes, page-aligned,
        // and lives as long as `self`; the rendezvous protocol guarantees the
        // counterpart is not writing while we read.
        unsafe { std::slice::from_raw_parts(self.shmem.as_ptr() as *const f64, self.slots) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        // SAFETY: as `as_slice`, plus `&mut self` makes this side's access
        // exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.shmem.as_ptr() as *mut f64, self.slots) }
    }
}

/// A worker-side, non-owning view of a [`SharedArray`], attached by OS id.
/// Dropping a view only unmaps it; the segment stays alive with its owner.
pub(crate) struct SharedArrayView {
    shmem: Shmem,
    slots: usize,
}

impl SharedArrayView {
    pub fn open(os_id: &str, slots: usize) -> Result<Self, ShmError> {
        let shmem = ShmemConf::new()
            .os_id(os_id)
            .open()
            .map_err(|e| ShmError::Attach {
                os_id: os_id.to_owned(),
                reason: e.to_string(),
            })?;
        let expected = slots * mem::size_of::<f64>();
        if shmem.len() < expected {
            return Err(ShmError::Undersized {
                os_id: os_id.to_owned(),
                expected,
                actual: shmem.len(),
            });
        }
        Ok(Self { shmem, slots })
    }

    pub fn as_slice(&self) -> &[f64] {
        // SAFETY: see `SharedArray::as_slice`; `open` verified the length.
        unsafe { std::slice::from_raw_parts(self.shmem.as_ptr() as *const f64, self.slots) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        // SAFETY: see `SharedArray::as_mut_slice`.
        unsafe { std::slice::from_raw_parts_mut(self.shmem.as_ptr() as *mut f64, self.slots) }
    }
}

pub(crate) fn pack_points(dst: &mut [f64], src: &[Point3<f64>]) {
    assert_eq!(dst.len(), 3 * src.len());
    for (chunk, point) in dst.chunks_exact_mut(3).zip(src) {
        chunk[0] = point.x;
        chunk[1] = point.y;
        chunk[2] = point.z;
    }
}

pub(crate) fn pack_vectors(dst: &mut [f64], src: &[Vector3<f64>]) {
    assert_eq!(dst.len(), 3 * src.len());
    for (chunk, vector) in dst.chunks_exact_mut(3).zip(src) {
        chunk[0] = vector.x;
        chunk[1] = vector.y;
        chunk[2] = vector.z;
    }
}

pub(crate) fn unpack_points(src: &[f64]) -> Vec<Point3<f64>> {
    src.chunks_exact(3)
        .map(|chunk| Point3::new(chunk[0], chunk[1], chunk[2]))
        .collect()
}

pub(crate) fn unpack_vectors(src: &[f64]) -> Vec<Vector3<f64>> {
    src.chunks_exact(3)
        .map(|chunk| Vector3::new(chunk[0], chunk[1], chunk[2]))
        .collect()
}
