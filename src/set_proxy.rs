//! Native mutable set backed by a host set.
//!
//! A [`ForeignSet`] owns exactly one strong reference to a host value and
//! forwards every set operation to it: membership, add, remove, count and
//! iteration all run against the host object, so mutations made from either
//! side are visible to the other and nothing is cached here. Host code that
//! gets a proxy back receives the very same object (see
//! [`ForeignSet::host_value`]), never a reconstruction.
//!
//! The backing value is expected to behave like a host `set`; that is a
//! convention, not checked at construction. When it does not hold, the
//! forwarded operation fails with [`BridgeError::ContractViolation`].
//!
//! Iteration is live and fail-fast: it walks the host set's own iterator, so
//! a size change during iteration surfaces as a `ContractViolation` on the
//! next step.

use std::ffi::c_void;

use pyo3::prelude::*;
use pyo3::types::PyIterator;
use tracing::trace;

use crate::convert::pyerr_to_string;
use crate::error::{BridgeError, BridgeResult};
use crate::object::{self, Allocation, NativeClass, ObjRef};
use crate::value::NativeValue;

#[derive(Debug)]
pub struct ForeignSet {
    value: Py<PyAny>,
}

impl NativeClass for ForeignSet {
    const CLASS_NAME: &'static str = "ForeignSet";
}

impl ForeignSet {
    /// Allocate a proxy adopting `value`.
    ///
    /// The caller's reference is moved in. If allocation fails it is released
    /// here and `AllocationFailed` is returned.
    pub fn with_host_value(value: Py<PyAny>) -> BridgeResult<ObjRef<ForeignSet>> {
        Self::init_with_host_value(Allocation::new(), value)
    }

    /// Initialize previously reserved storage with `value`.
    ///
    /// `allocation` is `None` when the reservation failed; the adopted
    /// reference is then released exactly once and nothing else happens.
    pub fn init_with_host_value(
        allocation: Option<Allocation<ForeignSet>>,
        value: Py<PyAny>,
    ) -> BridgeResult<ObjRef<ForeignSet>> {
        let Some(allocation) = allocation else {
            drop(value);
            return Err(BridgeError::AllocationFailed(Self::CLASS_NAME));
        };
        let proxy = allocation.init(ForeignSet { value });
        trace!(proxy = ?ObjRef::as_ptr(&proxy), "foreign set created");
        Ok(proxy)
    }

    /// The backing host value, borrowed.
    pub fn host_value(&self) -> &Py<PyAny> {
        &self.value
    }

    /// Whether a raw native object is a foreign set proxy.
    ///
    /// # Safety
    /// `ptr` must be null or point to a live native object.
    pub unsafe fn is_foreign_set(ptr: *const c_void) -> bool {
        unsafe { object::is_instance::<ForeignSet>(ptr) }
    }

    /// Borrow the proxy behind a raw native object, if it is one.
    ///
    /// # Safety
    /// `ptr` must be null or point to a native object alive for `'a`.
    pub unsafe fn downcast<'a>(ptr: *mut c_void) -> Option<&'a ForeignSet> {
        unsafe { ObjRef::<ForeignSet>::borrow_raw(ptr) }
    }

    fn bound<'py>(&self, py: Python<'py>) -> &Bound<'py, PyAny> {
        self.value.bind(py)
    }

    pub fn contains(&self, py: Python<'_>, item: &NativeValue) -> BridgeResult<bool> {
        let item = item.to_host(py)?;
        self.bound(py)
            .contains(item)
            .map_err(|e| BridgeError::contract("contains", pyerr_to_string(py, e)))
    }

    pub fn add(&self, py: Python<'_>, item: &NativeValue) -> BridgeResult<()> {
        let item = item.to_host(py)?;
        self.bound(py)
            .call_method1("add", (item,))
            .map(drop)
            .map_err(|e| BridgeError::contract("add", pyerr_to_string(py, e)))
    }

    /// Remove `item`; absent items are ignored.
    pub fn remove(&self, py: Python<'_>, item: &NativeValue) -> BridgeResult<()> {
        let item = item.to_host(py)?;
        self.bound(py)
            .call_method1("discard", (item,))
            .map(drop)
            .map_err(|e| BridgeError::contract("remove", pyerr_to_string(py, e)))
    }

    pub fn remove_all(&self, py: Python<'_>) -> BridgeResult<()> {
        self.bound(py)
            .call_method0("clear")
            .map(drop)
            .map_err(|e| BridgeError::contract("remove_all", pyerr_to_string(py, e)))
    }

    pub fn count(&self, py: Python<'_>) -> BridgeResult<usize> {
        self.bound(py)
            .len()
            .map_err(|e| BridgeError::contract("count", pyerr_to_string(py, e)))
    }

    pub fn iter<'py>(&self, py: Python<'py>) -> BridgeResult<ForeignSetIter<'py>> {
        let iter = self
            .bound(py)
            .try_iter()
            .map_err(|e| BridgeError::contract("iterate", pyerr_to_string(py, e)))?;
        Ok(ForeignSetIter { iter })
    }

    /// A detached iterator that can outlive this borrow, for callers that step
    /// it across separate GIL acquisitions.
    pub fn cursor(&self, py: Python<'_>) -> BridgeResult<ForeignSetCursor> {
        let iter = self
            .bound(py)
            .try_iter()
            .map_err(|e| BridgeError::contract("iterate", pyerr_to_string(py, e)))?;
        Ok(ForeignSetCursor {
            iter: iter.unbind(),
        })
    }

    /// The stored element equal to `item`, if any.
    pub fn member(&self, py: Python<'_>, item: &NativeValue) -> BridgeResult<Option<NativeValue>> {
        let needle = item.to_host(py)?;
        if !self.contains(py, item)? {
            return Ok(None);
        }
        for element in self.iter_host(py)? {
            let element = element?;
            let equal = element
                .eq(&needle)
                .map_err(|e| BridgeError::contract("member", pyerr_to_string(py, e)))?;
            if equal {
                return NativeValue::from_host(&element).map(Some);
            }
        }
        Ok(None)
    }

    /// Some element of the set, `None` when empty.
    pub fn any_object(&self, py: Python<'_>) -> BridgeResult<Option<NativeValue>> {
        match self.iter_host(py)?.next() {
            Some(element) => NativeValue::from_host(&element?).map(Some),
            None => Ok(None),
        }
    }

    /// A new proxy over a host-side copy of the backing set.
    pub fn mutable_copy(&self, py: Python<'_>) -> BridgeResult<ObjRef<ForeignSet>> {
        let copy = self
            .bound(py)
            .call_method0("copy")
            .map_err(|e| BridgeError::contract("copy", pyerr_to_string(py, e)))?;
        Self::with_host_value(copy.unbind())
    }

    fn iter_host<'py>(
        &self,
        py: Python<'py>,
    ) -> BridgeResult<impl Iterator<Item = BridgeResult<Bound<'py, PyAny>>>> {
        let iter = self
            .bound(py)
            .try_iter()
            .map_err(|e| BridgeError::contract("iterate", pyerr_to_string(py, e)))?;
        Ok(iter.map(move |element| {
            element.map_err(|e| BridgeError::contract("iterate", pyerr_to_string(py, e)))
        }))
    }
}

impl Drop for ForeignSet {
    fn drop(&mut self) {
        trace!(value = ?self.value.as_ptr(), "foreign set released");
    }
}

/// Live iterator over a [`ForeignSet`].
pub struct ForeignSetIter<'py> {
    iter: Bound<'py, PyIterator>,
}

impl Iterator for ForeignSetIter<'_> {
    type Item = BridgeResult<NativeValue>;

    fn next(&mut self) -> Option<Self::Item> {
        let py = self.iter.py();
        match self.iter.next()? {
            Ok(element) => Some(NativeValue::from_host(&element)),
            Err(e) => Some(Err(BridgeError::contract(
                "iterate",
                pyerr_to_string(py, e),
            ))),
        }
    }
}

/// Owned, fail-fast iterator over a [`ForeignSet`]'s host elements.
///
/// Holds a reference to the host iterator, which keeps the backing set alive
/// even if the proxy is released first.
#[derive(Debug)]
pub struct ForeignSetCursor {
    iter: Py<PyIterator>,
}

impl ForeignSetCursor {
    /// Next host element, `None` when exhausted.
    pub fn next_host<'py>(&self, py: Python<'py>) -> Option<BridgeResult<Bound<'py, PyAny>>> {
        let mut iter = self.iter.bind(py).clone();
        iter.next()
            .map(|element| element.map_err(|e| BridgeError::contract("iterate", pyerr_to_string(py, e))))
    }
}
