//! Vector storage backed by the `refvec` library.

use crate::error::{LaError, LaResult};
use crate::handle::ForeignHandle;
use crate::refvec::{self, BackendError, RawVec};
use crate::spec::VectorSpec;
use crate::storage::{VectorStorage, peer};
use pk_core::Real;
use std::any::Any;
use std::ptr::NonNull;

impl From<BackendError> for LaError {
    fn from(e: BackendError) -> Self {
        LaError::Backend {
            code: e.code,
            message: e.message,
        }
    }
}

/// Owns one `refvec` object through a [`ForeignHandle`].
#[derive(Debug)]
pub struct RefVecStorage {
    spec: VectorSpec,
    handle: ForeignHandle<RawVec>,
}

impl RefVecStorage {
    pub const KIND: &'static str = "refvec";

    /// Allocate a zeroed vector. Collective.
    pub fn new(spec: VectorSpec) -> LaResult<Self> {
        let mut handle = ForeignHandle::null();
        // SAFETY: vec_create only writes a fresh handle with one reference
        // owned by the writer.
        refvec::vec_create(
            spec.comm(),
            spec.local_size(),
            spec.global_size(),
            unsafe { handle.writable_ptr() },
        )?;
        Ok(Self { spec, handle })
    }

    /// The underlying handle, sharing ownership with this storage.
    pub fn native(&self) -> ForeignHandle<RawVec> {
        self.handle.clone()
    }

    fn raw(&self) -> LaResult<RawVec> {
        self.handle.get().ok_or(LaError::InvalidState {
            what: "refvec storage without a handle",
        })
    }
}

impl VectorStorage for RefVecStorage {
    fn spec(&self) -> &VectorSpec {
        &self.spec
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn duplicate(&self) -> LaResult<Box<dyn VectorStorage>> {
        let raw = self.raw()?;
        let mut handle = ForeignHandle::null();
        // SAFETY: `raw` is held by `self.handle`; the duplicate's single
        // reference is adopted through the slot.
        unsafe { refvec::vec_duplicate(raw, handle.writable_ptr())? };
        Ok(Box::new(Self {
            spec: self.spec.clone(),
            handle,
        }))
    }

    fn assign(&mut self, rhs: &dyn VectorStorage) -> LaResult<()> {
        let rhs = peer(self, rhs)?;
        // SAFETY: both handles are held by live storages.
        unsafe { refvec::vec_copy(rhs.raw()?, self.raw()?)? };
        Ok(())
    }

    fn add_scaled(&mut self, factor: Real, rhs: &dyn VectorStorage) -> LaResult<()> {
        let rhs = peer(self, rhs)?;
        // SAFETY: both handles are held by live storages.
        unsafe { refvec::vec_axpy(self.raw()?, factor, rhs.raw()?)? };
        Ok(())
    }

    fn scale(&mut self, factor: Real) -> LaResult<()> {
        // SAFETY: held handle.
        unsafe { refvec::vec_scale(self.raw()?, factor)? };
        Ok(())
    }

    fn fill(&mut self, value: Real) -> LaResult<()> {
        // SAFETY: held handle.
        unsafe { refvec::vec_set(self.raw()?, value)? };
        Ok(())
    }

    fn dot(&self, rhs: &dyn VectorStorage) -> LaResult<Real> {
        let rhs = peer(self, rhs)?;
        // SAFETY: both handles are held by live storages.
        Ok(unsafe { refvec::vec_dot(self.raw()?, rhs.raw()?)? })
    }

    fn l2_norm(&self) -> LaResult<Real> {
        // SAFETY: held handle.
        Ok(unsafe { refvec::vec_norm(self.raw()?)? })
    }

    unsafe fn acquire_data_ptr(&mut self) -> LaResult<NonNull<Real>> {
        // SAFETY: held handle; pairing is the caller's contract.
        Ok(unsafe { refvec::vec_get_array(self.raw()?)? })
    }

    unsafe fn release_data_ptr(&mut self, data: NonNull<Real>) -> LaResult<()> {
        // SAFETY: held handle; `data` came from vec_get_array.
        unsafe { refvec::vec_restore_array(self.raw()?, data)? };
        Ok(())
    }

    unsafe fn acquire_read_ptr(&self) -> LaResult<NonNull<Real>> {
        // SAFETY: held handle; pairing is the caller's contract.
        Ok(unsafe { refvec::vec_get_array_read(self.raw()?)? })
    }

    unsafe fn release_read_ptr(&self, data: NonNull<Real>) -> LaResult<()> {
        // SAFETY: held handle; `data` came from vec_get_array_read.
        unsafe { refvec::vec_restore_array_read(self.raw()?, data)? };
        Ok(())
    }
}
