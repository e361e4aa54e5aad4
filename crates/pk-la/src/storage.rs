//! Backend-specific vector storage.
//!
//! A [`VectorStorage`] owns the local part of one distributed vector and
//! implements the numerical kernels on it. Binary operations only work
//! between storages of the same variant; a foreign variant is rejected with
//! [`LaError::TypeMismatch`] before anything is modified.

use crate::dense::DenseStorage;
use crate::error::{LaError, LaResult};
use crate::refvec_storage::RefVecStorage;
use crate::spec::VectorSpec;
use pk_core::Real;
use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

/// Numerical capability interface shared by all storage variants.
pub trait VectorStorage: fmt::Debug + Any {
    fn spec(&self) -> &VectorSpec;

    /// Short name of the variant, used in error messages.
    fn kind(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// A zeroed storage of the same variant and layout.
    fn duplicate(&self) -> LaResult<Box<dyn VectorStorage>>;

    /// `self = rhs`.
    fn assign(&mut self, rhs: &dyn VectorStorage) -> LaResult<()>;

    /// `self += rhs`.
    fn add(&mut self, rhs: &dyn VectorStorage) -> LaResult<()> {
        self.add_scaled(1.0, rhs)
    }

    /// `self += factor * rhs`.
    fn add_scaled(&mut self, factor: Real, rhs: &dyn VectorStorage) -> LaResult<()>;

    /// `self *= factor`.
    fn scale(&mut self, factor: Real) -> LaResult<()>;

    fn fill(&mut self, value: Real) -> LaResult<()>;

    /// Global inner product. Collective.
    fn dot(&self, rhs: &dyn VectorStorage) -> LaResult<Real>;

    /// Global Euclidean norm, reduced by the backend itself. Collective.
    fn l2_norm(&self) -> LaResult<Real>;

    /// Check out the local entries for reading and writing.
    ///
    /// # Safety
    /// Must be paired with [`VectorStorage::release_data_ptr`] before any
    /// other operation on this storage. Use [`crate::Vector::local_slice_mut`]
    /// instead, which enforces the pairing.
    unsafe fn acquire_data_ptr(&mut self) -> LaResult<NonNull<Real>>;

    /// # Safety
    /// `data` must come from the matching `acquire_data_ptr` call.
    unsafe fn release_data_ptr(&mut self, data: NonNull<Real>) -> LaResult<()>;

    /// Check out the local entries for reading.
    ///
    /// # Safety
    /// Must be paired with [`VectorStorage::release_read_ptr`]; the entries
    /// must not be written through the pointer.
    unsafe fn acquire_read_ptr(&self) -> LaResult<NonNull<Real>>;

    /// # Safety
    /// `data` must come from the matching `acquire_read_ptr` call.
    unsafe fn release_read_ptr(&self, data: NonNull<Real>) -> LaResult<()>;
}

/// Resolve `rhs` as the same variant as `this` with a compatible layout.
pub(crate) fn peer<'a, S: VectorStorage>(
    this: &S,
    rhs: &'a dyn VectorStorage,
) -> LaResult<&'a S> {
    let peer = rhs
        .as_any()
        .downcast_ref::<S>()
        .ok_or(LaError::TypeMismatch {
            expected: this.kind(),
            found: rhs.kind(),
        })?;
    this.spec().ensure_compatible(peer.spec())?;
    Ok(peer)
}

/// Storage variants that can be created by name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Backend {
    /// Rust-owned buffer.
    #[default]
    Dense,
    /// Handle into the reference-counted `refvec` library.
    RefVec,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Dense => DenseStorage::KIND,
            Backend::RefVec => RefVecStorage::KIND,
        }
    }

    /// Allocate a zeroed storage. Collective for backends that validate the
    /// layout across the group.
    pub fn create(self, spec: VectorSpec) -> LaResult<Box<dyn VectorStorage>> {
        Ok(match self {
            Backend::Dense => Box::new(DenseStorage::new(spec)),
            Backend::RefVec => Box::new(RefVecStorage::new(spec)?),
        })
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = LaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(Backend::Dense),
            "refvec" => Ok(Backend::RefVec),
            _ => Err(LaError::InvalidArg {
                what: "unknown backend (expected `dense` or `refvec`)",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for backend in [Backend::Dense, Backend::RefVec] {
            assert_eq!(backend.name().parse::<Backend>().unwrap(), backend);
        }
        assert!("petsc".parse::<Backend>().is_err());
    }

    #[test]
    fn created_storage_matches_spec() {
        for backend in [Backend::Dense, Backend::RefVec] {
            let storage = backend.create(VectorSpec::serial(5)).unwrap();
            assert_eq!(storage.kind(), backend.name());
            assert_eq!(storage.spec().local_size(), 5);
            assert_eq!(storage.l2_norm().unwrap(), 0.0);
        }
    }
}
