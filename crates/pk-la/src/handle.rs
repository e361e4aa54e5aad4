//! Ownership wrapper for reference-counted handles of an external backend.
//!
//! The backend hands out opaque handles whose lifetime is governed by its own
//! reference count. [`ForeignHandle`] owns exactly one increment of that count
//! while it holds a value:
//!
//! | Rust operation        | effect on the external count |
//! |-----------------------|------------------------------|
//! | `clone()`             | +1, both wrappers share      |
//! | move                  | none, ownership transferred  |
//! | `drop` / `release()`  | -1 (if non-null)             |
//! | `abandon()`           | none, caller now owns it     |
//!
//! Handle kinds are not `Send`/`Sync` unless the backend allows it, and the
//! wrapper inherits that: no locking is added here.

use std::fmt;

/// A raw handle kind whose lifetime is managed by an external reference count.
pub trait ForeignObject: Copy + fmt::Debug {
    /// Increment the external reference count.
    ///
    /// # Safety
    /// `self` must be a live handle of the backend.
    unsafe fn reference(self);

    /// Decrement the external reference count, destroying the object when it
    /// reaches zero.
    ///
    /// # Safety
    /// `self` must be a live handle and the caller must own the increment
    /// being given back.
    unsafe fn dereference(self);
}

/// How a wrapper takes ownership of a raw handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Increment the count; the caller keeps its own reference.
    Share,
    /// Take over an increment the caller already owns; the caller must not
    /// decrement it itself.
    Adopt,
}

/// Reference-counted owner of one external handle, or null.
pub struct ForeignHandle<T: ForeignObject> {
    value: Option<T>,
}

impl<T: ForeignObject> ForeignHandle<T> {
    /// An empty wrapper.
    pub const fn null() -> Self {
        Self { value: None }
    }

    /// Wrap an existing handle.
    ///
    /// # Safety
    /// `value` must be live. With [`Ownership::Adopt`] the caller must own an
    /// increment that is transferred to the wrapper.
    pub unsafe fn from_raw(value: T, mode: Ownership) -> Self {
        let mut handle = Self::null();
        // SAFETY: forwarded from the caller.
        unsafe { handle.set(value, mode) };
        handle
    }

    /// Replace the held handle.
    ///
    /// The new value is referenced before the old one is released, so
    /// assigning a handle to itself (or to an object only kept alive by the
    /// current one) never drops the last reference in between.
    ///
    /// # Safety
    /// Same contract as [`ForeignHandle::from_raw`].
    pub unsafe fn set(&mut self, value: T, mode: Ownership) {
        if mode == Ownership::Share {
            // SAFETY: `value` is live per the caller's contract.
            unsafe { value.reference() };
        }
        self.release();
        self.value = Some(value);
    }

    /// The raw handle, without transferring ownership.
    pub fn get(&self) -> Option<T> {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Give back the held increment and become null. No-op when null.
    pub fn release(&mut self) {
        if let Some(value) = self.value.take() {
            // SAFETY: a held value always carries one increment owned by us.
            unsafe { value.dereference() };
        }
    }

    /// Become null without decrementing. The caller takes over the increment,
    /// typically to hand it to a backend call that consumes a reference.
    #[must_use = "the abandoned handle still owns a reference"]
    pub fn abandon(&mut self) -> Option<T> {
        self.value.take()
    }

    /// Release the held handle and expose the slot to a backend constructor.
    /// Whatever the backend writes is adopted.
    ///
    /// # Safety
    /// Anything written to the slot must be a live handle whose increment is
    /// owned by the writer.
    pub unsafe fn writable_ptr(&mut self) -> &mut Option<T> {
        self.release();
        &mut self.value
    }

    /// Exchange raw handles; no reference-count traffic.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.value, &mut other.value);
    }
}

impl<T: ForeignObject> Clone for ForeignHandle<T> {
    fn clone(&self) -> Self {
        if let Some(value) = self.value {
            // SAFETY: held values are live.
            unsafe { value.reference() };
        }
        Self { value: self.value }
    }
}

impl<T: ForeignObject> Drop for ForeignHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ForeignObject> Default for ForeignHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ForeignObject> fmt::Debug for ForeignHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) => write!(f, "ForeignHandle({v:?})"),
            None => write!(f, "ForeignHandle(null)"),
        }
    }
}
