//! Host-side wrapper for opaque native pointers.
//!
//! An [`OpaquePointer`] is what host code sees for a pointer type that has no
//! host representation of its own. Plain wrappers only remember the address.
//! Reference-counted wrappers hold one reference on the handle, taken when the
//! wrapper is created and given back when the host object is deallocated.

use std::collections::hash_map::DefaultHasher;
use std::ffi::c_void;
use std::hash::{Hash, Hasher};

use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;
use tracing::trace;

use crate::object::{pnb_object_release, pnb_object_retain};

pub type RetainFn = unsafe extern "C" fn(*const c_void) -> *const c_void;
pub type ReleaseFn = unsafe extern "C" fn(*const c_void);

/// Acquire/release pair for one family of reference-counted handles.
#[derive(Debug, Clone, Copy)]
pub struct RetainRelease {
    pub retain: RetainFn,
    pub release: ReleaseFn,
}

impl RetainRelease {
    /// Objects of the native object runtime.
    pub const fn native_object() -> Self {
        RetainRelease {
            retain: pnb_object_retain,
            release: pnb_object_release,
        }
    }

    /// CoreFoundation-style handles.
    #[cfg(target_vendor = "apple")]
    pub const fn cf_style() -> Self {
        RetainRelease {
            retain: cf::CFRetain,
            release: cf::CFRelease,
        }
    }

    /// CoreFoundation-style handles. Without CoreFoundation they are native
    /// runtime objects.
    #[cfg(not(target_vendor = "apple"))]
    pub const fn cf_style() -> Self {
        RetainRelease {
            retain: pnb_object_retain,
            release: pnb_object_release,
        }
    }
}

#[cfg(target_vendor = "apple")]
mod cf {
    use std::ffi::c_void;

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        pub fn CFRetain(cf: *const c_void) -> *const c_void;
        pub fn CFRelease(cf: *const c_void);
    }
}

#[pyclass(module = "pynative", name = "OpaquePointer", frozen)]
pub struct OpaquePointer {
    type_id: String,
    type_name: String,
    address: usize,
    ownership: Option<RetainRelease>,
}

impl OpaquePointer {
    /// Wrap `ptr` without taking a reference.
    pub fn borrowed(type_id: &str, type_name: &str, ptr: *mut c_void) -> Self {
        OpaquePointer {
            type_id: type_id.to_owned(),
            type_name: type_name.to_owned(),
            address: ptr as usize,
            ownership: None,
        }
    }

    /// Wrap `ptr`, retaining it with `discipline`. The reference is released
    /// when the wrapper is dropped.
    ///
    /// # Safety
    /// `ptr` must be a live handle of the family `discipline` manages.
    pub unsafe fn retained(
        type_id: &str,
        type_name: &str,
        ptr: *mut c_void,
        discipline: RetainRelease,
    ) -> Self {
        unsafe { (discipline.retain)(ptr) };
        OpaquePointer {
            type_id: type_id.to_owned(),
            type_name: type_name.to_owned(),
            address: ptr as usize,
            ownership: Some(discipline),
        }
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.address as *mut c_void
    }

    /// Pointer held by a host object, if it wraps `type_id`.
    pub fn extract_ptr(obj: &Bound<'_, PyAny>, type_id: &str) -> PyResult<*mut c_void> {
        let wrapper = obj.downcast::<OpaquePointer>()?.get();
        if wrapper.type_id != type_id {
            return Err(PyTypeError::new_err(format!(
                "expecting {type_id} pointer, got {}",
                wrapper.type_id
            )));
        }
        Ok(wrapper.as_ptr())
    }
}

#[pymethods]
impl OpaquePointer {
    #[getter(type_id)]
    fn py_type_id(&self) -> &str {
        &self.type_id
    }

    #[getter(type_name)]
    fn py_type_name(&self) -> &str {
        &self.type_name
    }

    #[getter(__pointer__)]
    fn pointer(&self) -> usize {
        self.address
    }

    fn __eq__(&self, other: &Bound<'_, PyAny>) -> bool {
        other
            .downcast::<OpaquePointer>()
            .is_ok_and(|o| o.get().address == self.address && o.get().type_id == self.type_id)
    }

    fn __hash__(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.type_id.hash(&mut hasher);
        self.address.hash(&mut hasher);
        hasher.finish()
    }

    fn __repr__(&self) -> String {
        format!("<{} at {:#x}>", self.type_name, self.address)
    }
}

impl Drop for OpaquePointer {
    fn drop(&mut self) {
        if let Some(discipline) = self.ownership {
            trace!(type_id = %self.type_id, address = self.address, "releasing handle");
            unsafe { (discipline.release)(self.as_ptr()) };
        }
    }
}
