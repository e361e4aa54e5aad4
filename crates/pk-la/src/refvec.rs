//! `refvec`: a small distributed vector library with a C-style handle API.
//!
//! Objects live on the heap behind opaque [`RawVec`] handles and are freed
//! when their reference count drops to zero. Constructors write the new
//! handle into an out-parameter and hand the caller one reference. Every
//! call reports failure through a [`BackendError`] carrying an error code.
//!
//! Handles are `!Send`/`!Sync`: reference counts are plain cells and may only
//! be touched from the thread that created the object. Parallelism comes from
//! the process group, one handle set per rank.
//!
//! Collective calls (`vec_create`, `vec_dot`, `vec_norm`) must be made by
//! every rank of the vector's group in the same order.

use crate::handle::ForeignObject;
use pk_core::{Comm, Real};
use std::cell::{Cell, UnsafeCell};
use std::ptr::NonNull;

pub type ErrorCode = i32;

/// Nonconforming object sizes.
pub const ERR_ARG_SIZ: ErrorCode = 60;
/// Object is in the wrong state (e.g. its array is checked out).
pub const ERR_ARG_WRONGSTATE: ErrorCode = 73;
/// Arguments are incompatible (e.g. different process groups).
pub const ERR_ARG_INCOMP: ErrorCode = 75;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("refvec error {code}: {message}")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Checkout {
    Free,
    Read(usize),
    Write,
}

struct VecObject {
    refcount: Cell<usize>,
    checkout: Cell<Checkout>,
    comm: Comm,
    global: usize,
    data: UnsafeCell<Box<[Real]>>,
}

/// Opaque handle to a `refvec` vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawVec(NonNull<VecObject>);

impl ForeignObject for RawVec {
    unsafe fn reference(self) {
        // SAFETY: forwarded from the trait contract.
        unsafe { object_reference(self) }
    }

    unsafe fn dereference(self) {
        // SAFETY: forwarded from the trait contract.
        unsafe { object_dereference(self) }
    }
}

thread_local! {
    static LIVE: Cell<usize> = const { Cell::new(0) };
}

/// Number of objects alive on the calling thread.
pub fn live_objects() -> usize {
    LIVE.with(Cell::get)
}

/// # Safety
/// `v` must be a live handle created on this thread.
unsafe fn object<'a>(v: RawVec) -> &'a VecObject {
    // SAFETY: live handles point to a boxed VecObject.
    unsafe { v.0.as_ref() }
}

fn ensure_state(obj: &VecObject, writing: bool, call: &str) -> BackendResult<()> {
    match (obj.checkout.get(), writing) {
        (Checkout::Free, _) | (Checkout::Read(_), false) => Ok(()),
        (state, _) => Err(BackendError::new(
            ERR_ARG_WRONGSTATE,
            format!("{call}: vector array is checked out ({state:?})"),
        )),
    }
}

fn ensure_compatible(a: &VecObject, b: &VecObject, call: &str) -> BackendResult<()> {
    if !a.comm.same_group(&b.comm) {
        return Err(BackendError::new(
            ERR_ARG_INCOMP,
            format!("{call}: vectors live on different process groups"),
        ));
    }
    // SAFETY: only lengths are read; no `&mut` to either array is live.
    let (la, lb) = unsafe { ((&*a.data.get()).len(), (&*b.data.get()).len()) };
    if la != lb || a.global != b.global {
        return Err(BackendError::new(
            ERR_ARG_SIZ,
            format!(
                "{call}: nonconforming sizes (local {la} vs {lb}, global {} vs {})",
                a.global, b.global
            ),
        ));
    }
    Ok(())
}

fn allocate(comm: &Comm, local: usize, global: usize) -> RawVec {
    let obj = Box::new(VecObject {
        refcount: Cell::new(1),
        checkout: Cell::new(Checkout::Free),
        comm: comm.clone(),
        global,
        data: UnsafeCell::new(vec![0.0; local].into_boxed_slice()),
    });
    LIVE.with(|l| l.set(l.get() + 1));
    RawVec(NonNull::from(Box::leak(obj)))
}

/// Create a zeroed vector distributed over `comm`. Collective: the local
/// sizes of all ranks must add up to `global`.
pub fn vec_create(
    comm: &Comm,
    local: usize,
    global: usize,
    out: &mut Option<RawVec>,
) -> BackendResult<()> {
    let total = comm.all_reduce_sum_scalar(local as Real) as usize;
    if total != global {
        return Err(BackendError::new(
            ERR_ARG_SIZ,
            format!("vec_create: sum of local sizes {total} does not match global size {global}"),
        ));
    }
    *out = Some(allocate(comm, local, global));
    Ok(())
}

/// Create a zeroed vector with the same layout as `v`.
///
/// # Safety
/// `v` must be live.
pub unsafe fn vec_duplicate(v: RawVec, out: &mut Option<RawVec>) -> BackendResult<()> {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    // SAFETY: only the length is read; no `&mut` to the array is live.
    let local = unsafe { (&*obj.data.get()).len() };
    *out = Some(allocate(&obj.comm, local, obj.global));
    Ok(())
}

/// # Safety
/// `v` must be live.
pub unsafe fn object_reference(v: RawVec) {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    obj.refcount.set(obj.refcount.get() + 1);
}

/// Give back one reference, freeing the object when none remain.
///
/// # Safety
/// `v` must be live and the caller must own the reference it gives back.
pub unsafe fn object_dereference(v: RawVec) {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    let count = obj.refcount.get();
    debug_assert!(count > 0, "refvec: dereference of a dead object");
    if count <= 1 {
        // SAFETY: allocated via Box::leak in `allocate`, last reference.
        drop(unsafe { Box::from_raw(v.0.as_ptr()) });
        LIVE.with(|l| l.set(l.get().saturating_sub(1)));
    } else {
        obj.refcount.set(count - 1);
    }
}

/// # Safety
/// `v` must be live.
pub unsafe fn reference_count(v: RawVec) -> usize {
    // SAFETY: caller contract.
    unsafe { object(v) }.refcount.get()
}

/// `(local, global)` sizes.
///
/// # Safety
/// `v` must be live.
pub unsafe fn vec_get_sizes(v: RawVec) -> (usize, usize) {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    // SAFETY: only the length is read; no `&mut` to the array is live.
    (unsafe { (&*obj.data.get()).len() }, obj.global)
}

/// `y += alpha * x`.
///
/// # Safety
/// Both handles must be live.
pub unsafe fn vec_axpy(y: RawVec, alpha: Real, x: RawVec) -> BackendResult<()> {
    // SAFETY: caller contract.
    let (yo, xo) = unsafe { (object(y), object(x)) };
    ensure_state(yo, true, "vec_axpy")?;
    ensure_state(xo, false, "vec_axpy")?;
    ensure_compatible(yo, xo, "vec_axpy")?;

    if y == x {
        // SAFETY: no array is checked out, so no other reference exists.
        let yd = unsafe { &mut *yo.data.get() };
        yd.iter_mut().for_each(|v| *v *= 1.0 + alpha);
        return Ok(());
    }

    // SAFETY: distinct objects, no checkouts.
    let (yd, xd) = unsafe { (&mut *yo.data.get(), &*xo.data.get()) };
    for (yi, xi) in yd.iter_mut().zip(xd.iter()) {
        *yi += alpha * xi;
    }
    Ok(())
}

/// `v *= alpha`.
///
/// # Safety
/// `v` must be live.
pub unsafe fn vec_scale(v: RawVec, alpha: Real) -> BackendResult<()> {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    ensure_state(obj, true, "vec_scale")?;
    // SAFETY: no checkout, exclusive access.
    unsafe { &mut *obj.data.get() }
        .iter_mut()
        .for_each(|x| *x *= alpha);
    Ok(())
}

/// Set every local entry to `value`.
///
/// # Safety
/// `v` must be live.
pub unsafe fn vec_set(v: RawVec, value: Real) -> BackendResult<()> {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    ensure_state(obj, true, "vec_set")?;
    // SAFETY: no checkout, exclusive access.
    unsafe { &mut *obj.data.get() }.fill(value);
    Ok(())
}

/// `dst = src`.
///
/// # Safety
/// Both handles must be live.
pub unsafe fn vec_copy(src: RawVec, dst: RawVec) -> BackendResult<()> {
    if src == dst {
        return Ok(());
    }
    // SAFETY: caller contract.
    let (so, do_) = unsafe { (object(src), object(dst)) };
    ensure_state(so, false, "vec_copy")?;
    ensure_state(do_, true, "vec_copy")?;
    ensure_compatible(so, do_, "vec_copy")?;
    // SAFETY: distinct objects, no checkouts.
    unsafe { (&mut *do_.data.get()).copy_from_slice(&*so.data.get()) };
    Ok(())
}

/// Global inner product. Collective.
///
/// # Safety
/// Both handles must be live.
pub unsafe fn vec_dot(x: RawVec, y: RawVec) -> BackendResult<Real> {
    // SAFETY: caller contract.
    let (xo, yo) = unsafe { (object(x), object(y)) };
    ensure_state(xo, false, "vec_dot")?;
    ensure_state(yo, false, "vec_dot")?;
    ensure_compatible(xo, yo, "vec_dot")?;
    // SAFETY: read-only access, no writers.
    let (xd, yd) = unsafe { (&*xo.data.get(), &*yo.data.get()) };
    let local: Real = xd.iter().zip(yd.iter()).map(|(a, b)| a * b).sum();
    Ok(xo.comm.all_reduce_sum_scalar(local))
}

/// Global 2-norm. Collective.
///
/// Accumulated with running rescaling so that large entries do not overflow
/// the sum of squares.
///
/// # Safety
/// `x` must be live.
pub unsafe fn vec_norm(x: RawVec) -> BackendResult<Real> {
    // SAFETY: caller contract.
    let obj = unsafe { object(x) };
    ensure_state(obj, false, "vec_norm")?;
    // SAFETY: read-only access, no writers.
    let data = unsafe { &*obj.data.get() };
    Ok(obj.comm.all_reduce_l2_norm(data))
}

/// Check out the local array for reading and writing. Must be paired with
/// [`vec_restore_array`]; no other call may use the vector meanwhile.
///
/// # Safety
/// `v` must be live.
pub unsafe fn vec_get_array(v: RawVec) -> BackendResult<NonNull<Real>> {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    ensure_state(obj, true, "vec_get_array")?;
    obj.checkout.set(Checkout::Write);
    // SAFETY: the boxed slice pointer is never null.
    Ok(unsafe { NonNull::new_unchecked((*obj.data.get()).as_mut_ptr()) })
}

/// # Safety
/// `v` must be live and `data` must come from [`vec_get_array`] on `v`.
pub unsafe fn vec_restore_array(v: RawVec, data: NonNull<Real>) -> BackendResult<()> {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    // SAFETY: pointer comparison only.
    let expected = unsafe { (*obj.data.get()).as_mut_ptr() };
    if obj.checkout.get() != Checkout::Write || expected != data.as_ptr() {
        return Err(BackendError::new(
            ERR_ARG_WRONGSTATE,
            "vec_restore_array: array was not checked out for writing",
        ));
    }
    obj.checkout.set(Checkout::Free);
    Ok(())
}

/// Check out the local array for reading. Several read checkouts may be
/// outstanding at once; writes fail until all are restored.
///
/// # Safety
/// `v` must be live.
pub unsafe fn vec_get_array_read(v: RawVec) -> BackendResult<NonNull<Real>> {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    let readers = match obj.checkout.get() {
        Checkout::Free => 0,
        Checkout::Read(n) => n,
        Checkout::Write => {
            return Err(BackendError::new(
                ERR_ARG_WRONGSTATE,
                "vec_get_array_read: array is checked out for writing",
            ));
        }
    };
    obj.checkout.set(Checkout::Read(readers + 1));
    // SAFETY: the boxed slice pointer is never null.
    Ok(unsafe { NonNull::new_unchecked((*obj.data.get()).as_mut_ptr()) })
}

/// # Safety
/// `v` must be live and `data` must come from [`vec_get_array_read`] on `v`.
pub unsafe fn vec_restore_array_read(v: RawVec, data: NonNull<Real>) -> BackendResult<()> {
    // SAFETY: caller contract.
    let obj = unsafe { object(v) };
    // SAFETY: pointer comparison only.
    let expected = unsafe { (*obj.data.get()).as_mut_ptr() };
    match obj.checkout.get() {
        Checkout::Read(n) if expected == data.as_ptr() => {
            obj.checkout.set(if n > 1 {
                Checkout::Read(n - 1)
            } else {
                Checkout::Free
            });
            Ok(())
        }
        _ => Err(BackendError::new(
            ERR_ARG_WRONGSTATE,
            "vec_restore_array_read: array was not checked out for reading",
        )),
    }
}
