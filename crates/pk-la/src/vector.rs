//! Vector facade over a boxed [`VectorStorage`].

use crate::dense::DenseStorage;
use crate::error::{LaError, LaResult};
use crate::spec::VectorSpec;
use crate::storage::{Backend, VectorStorage};
use pk_core::Real;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// A distributed vector with value semantics: [`Vector::try_clone`] yields an
/// independent numeric copy, never a shared view.
///
/// Arithmetic between two vectors requires the same storage variant and a
/// compatible [`VectorSpec`]. Reductions (`dot`, `l2_norm`) are collective.
#[derive(Debug)]
pub struct Vector {
    storage: Box<dyn VectorStorage>,
}

impl Vector {
    /// A zeroed vector. Collective for backends that validate the layout.
    pub fn new(spec: VectorSpec, backend: Backend) -> LaResult<Self> {
        Ok(Self::from_storage(backend.create(spec)?))
    }

    /// A zeroed vector with Rust-owned storage.
    pub fn dense(spec: VectorSpec) -> Self {
        Self::from_storage(Box::new(DenseStorage::new(spec)))
    }

    pub fn from_storage(storage: Box<dyn VectorStorage>) -> Self {
        Self { storage }
    }

    /// A vector whose local entries are `values`.
    pub fn from_local_values(spec: VectorSpec, backend: Backend, values: &[Real]) -> LaResult<Self> {
        if values.len() != spec.local_size() {
            return Err(LaError::SpecMismatch {
                what: format!(
                    "{} local values for a local size of {}",
                    values.len(),
                    spec.local_size()
                ),
            });
        }
        let mut v = Self::new(spec, backend)?;
        v.local_slice_mut()?.copy_from_slice(values);
        Ok(v)
    }

    pub fn spec(&self) -> &VectorSpec {
        self.storage.spec()
    }

    /// Name of the storage variant.
    pub fn kind(&self) -> &'static str {
        self.storage.kind()
    }

    pub fn storage(&self) -> &dyn VectorStorage {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut dyn VectorStorage {
        self.storage.as_mut()
    }

    /// The storage as a concrete variant, if it is one.
    pub fn downcast_ref<S: VectorStorage>(&self) -> Option<&S> {
        self.storage.as_any().downcast_ref::<S>()
    }

    /// A zeroed vector with the same variant and layout.
    pub fn duplicate(&self) -> LaResult<Vector> {
        Ok(Self::from_storage(self.storage.duplicate()?))
    }

    /// An independent copy of the entries.
    pub fn try_clone(&self) -> LaResult<Vector> {
        let mut copy = self.duplicate()?;
        copy.assign(self)?;
        Ok(copy)
    }

    /// `self = other`.
    pub fn assign(&mut self, other: &Vector) -> LaResult<()> {
        self.storage.assign(other.storage())
    }

    /// `self += other`.
    pub fn add(&mut self, other: &Vector) -> LaResult<()> {
        self.storage.add(other.storage())
    }

    /// `self += factor * other`.
    pub fn add_scaled(&mut self, factor: Real, other: &Vector) -> LaResult<()> {
        self.storage.add_scaled(factor, other.storage())
    }

    /// `self *= factor`. Fallible because the backend may reject it, which is
    /// why there is no `MulAssign` impl.
    pub fn scale(&mut self, factor: Real) -> LaResult<()> {
        self.storage.scale(factor)
    }

    pub fn fill(&mut self, value: Real) -> LaResult<()> {
        self.storage.fill(value)
    }

    pub fn set_zero(&mut self) -> LaResult<()> {
        self.storage.fill(0.0)
    }

    pub fn dot(&self, other: &Vector) -> LaResult<Real> {
        self.storage.dot(other.storage())
    }

    pub fn l2_norm(&self) -> LaResult<Real> {
        self.storage.l2_norm()
    }

    /// Read access to the local entries. Other reads may run while the guard
    /// is alive; writes are prevented by the shared borrow.
    pub fn local_slice(&self) -> LaResult<LocalSlice<'_>> {
        let len = self.spec().local_size();
        // SAFETY: released by the guard's Drop.
        let data = unsafe { self.storage.acquire_read_ptr()? };
        Ok(LocalSlice {
            storage: self.storage.as_ref(),
            data,
            len,
        })
    }

    /// Exclusive access to the local entries. The vector cannot be used in any
    /// other operation until the guard is dropped.
    pub fn local_slice_mut(&mut self) -> LaResult<LocalSliceMut<'_>> {
        let len = self.spec().local_size();
        // SAFETY: released by the guard's Drop.
        let data = unsafe { self.storage.acquire_data_ptr()? };
        Ok(LocalSliceMut {
            storage: self.storage.as_mut(),
            data,
            len,
        })
    }

    /// Copy of the local entries.
    pub fn to_local_vec(&self) -> LaResult<Vec<Real>> {
        Ok(self.local_slice()?.to_vec())
    }
}

/// Scoped read borrow of a vector's local entries.
pub struct LocalSlice<'a> {
    storage: &'a dyn VectorStorage,
    data: NonNull<Real>,
    len: usize,
}

impl Deref for LocalSlice<'_> {
    type Target = [Real];

    fn deref(&self) -> &[Real] {
        // SAFETY: the checkout stays valid until Drop and covers `len` entries.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl Drop for LocalSlice<'_> {
    fn drop(&mut self) {
        // SAFETY: `data` came from acquire_read_ptr on this storage.
        if let Err(e) = unsafe { self.storage.release_read_ptr(self.data) } {
            tracing::error!(kind = self.storage.kind(), error = %e, "failed to release local slice");
        }
    }
}

/// Scoped exclusive borrow of a vector's local entries.
pub struct LocalSliceMut<'a> {
    storage: &'a mut dyn VectorStorage,
    data: NonNull<Real>,
    len: usize,
}

impl Deref for LocalSliceMut<'_> {
    type Target = [Real];

    fn deref(&self) -> &[Real] {
        // SAFETY: the checkout stays valid until Drop and covers `len` entries.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl DerefMut for LocalSliceMut<'_> {
    fn deref_mut(&mut self) -> &mut [Real] {
        // SAFETY: exclusive checkout, valid until Drop.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

impl Drop for LocalSliceMut<'_> {
    fn drop(&mut self) {
        // SAFETY: `data` came from acquire_data_ptr on this storage.
        if let Err(e) = unsafe { self.storage.release_data_ptr(self.data) } {
            tracing::error!(kind = self.storage.kind(), error = %e, "failed to release local slice");
        }
    }
}
