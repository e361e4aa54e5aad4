//! Rust-owned vector storage.

use crate::error::{LaError, LaResult};
use crate::spec::VectorSpec;
use crate::storage::{VectorStorage, peer};
use nalgebra::DVector;
use pk_core::Real;
use std::any::Any;
use std::ptr::NonNull;

/// Local entries in a `nalgebra` vector; global reductions go through the
/// vector's process group.
#[derive(Clone, Debug)]
pub struct DenseStorage {
    spec: VectorSpec,
    data: DVector<Real>,
}

impl DenseStorage {
    pub const KIND: &'static str = "dense";

    pub fn new(spec: VectorSpec) -> Self {
        let data = DVector::zeros(spec.local_size());
        Self { spec, data }
    }

    pub fn from_values(spec: VectorSpec, values: Vec<Real>) -> LaResult<Self> {
        if values.len() != spec.local_size() {
            return Err(LaError::SpecMismatch {
                what: format!(
                    "{} local values for a local size of {}",
                    values.len(),
                    spec.local_size()
                ),
            });
        }
        Ok(Self {
            spec,
            data: DVector::from_vec(values),
        })
    }

    /// Local entries.
    pub fn local(&self) -> &DVector<Real> {
        &self.data
    }
}

impl VectorStorage for DenseStorage {
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
        Ok(Box::new(Self::new(self.spec.clone())))
    }

    fn assign(&mut self, rhs: &dyn VectorStorage) -> LaResult<()> {
        let rhs = peer(self, rhs)?;
        self.data.copy_from(&rhs.data);
        Ok(())
    }

    fn add_scaled(&mut self, factor: Real, rhs: &dyn VectorStorage) -> LaResult<()> {
        let rhs = peer(self, rhs)?;
        self.data.axpy(factor, &rhs.data, 1.0);
        Ok(())
    }

    fn scale(&mut self, factor: Real) -> LaResult<()> {
        self.data.scale_mut(factor);
        Ok(())
    }

    fn fill(&mut self, value: Real) -> LaResult<()> {
        self.data.fill(value);
        Ok(())
    }

    fn dot(&self, rhs: &dyn VectorStorage) -> LaResult<Real> {
        let rhs = peer(self, rhs)?;
        Ok(self
            .spec
            .comm()
            .all_reduce_sum_scalar(self.data.dot(&rhs.data)))
    }

    fn l2_norm(&self) -> LaResult<Real> {
        Ok(self.spec.comm().all_reduce_l2_norm(self.data.as_slice()))
    }

    unsafe fn acquire_data_ptr(&mut self) -> LaResult<NonNull<Real>> {
        Ok(NonNull::from(self.data.as_mut_slice()).cast())
    }

    unsafe fn release_data_ptr(&mut self, _data: NonNull<Real>) -> LaResult<()> {
        Ok(())
    }

    unsafe fn acquire_read_ptr(&self) -> LaResult<NonNull<Real>> {
        Ok(NonNull::from(self.data.as_slice()).cast())
    }

    unsafe fn release_read_ptr(&self, _data: NonNull<Real>) -> LaResult<()> {
        Ok(())
    }
}
