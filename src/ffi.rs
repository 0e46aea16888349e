//! C ABI exports for the native object runtime.
//!
//! Every `pnb_*` function follows this contract:
//!
//! 1. Clears the last error
//! 2. Acquires the Python GIL (when it touches host objects)
//! 3. Performs the operation
//! 4. On error: stores message via `set_last_error`, returns sentinel
//! 5. On success: returns the result
//!
//! **Sentinel values:**
//! - Pointer functions (`-> *mut T`): null means error
//! - Status functions (`-> c_int`):   `-1` means error, `0` means success
//! - Predicate functions (`-> c_int`): `1` true, `0` false, `-1` error
//! - Count functions (`-> isize`):    `-1` means error
//!
//! **Memory:**
//! - `PyObject*` arguments to `pnb_set_new` / `pnb_set_init` are stolen; all
//!   other `PyObject*` arguments are borrowed.
//! - `pnb_pointer_to_python` returns a new reference.
//! - `pnb_set_python_object` returns a borrowed reference.
//! - Set handles are native objects: release with `pnb_set_release` (or
//!   `pnb_object_release`).
//! - `pnb_set_iter_next` stores a new reference; iterator handles are freed
//!   with `pnb_set_iter_free`.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::ptr;

use pyo3::ffi::PyObject;
use pyo3::prelude::*;

use crate::convert;
use crate::error::{clear_last_error, set_last_error, BridgeError, BridgeResult};
use crate::object::{Allocation, ObjRef};
use crate::registry;
use crate::set_proxy::{ForeignSet, ForeignSetCursor};
use crate::value::NativeValue;

// ==================== Internal Helpers ====================

/// Acquire GIL, run closure, return pointer (null on error).
fn gil_ptr<T>(f: impl FnOnce(Python<'_>) -> BridgeResult<*mut T>) -> *mut T {
    clear_last_error();
    Python::with_gil(|py| match f(py) {
        Ok(p) => p,
        Err(e) => {
            set_last_error(e);
            ptr::null_mut()
        }
    })
}

/// Acquire GIL, run closure, return status (0=ok, -1=error).
fn gil_status(f: impl FnOnce(Python<'_>) -> BridgeResult<()>) -> c_int {
    clear_last_error();
    Python::with_gil(|py| match f(py) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(e);
            -1
        }
    })
}

/// Acquire GIL, run closure, return predicate (1/0, -1=error).
fn gil_flag(f: impl FnOnce(Python<'_>) -> BridgeResult<bool>) -> c_int {
    clear_last_error();
    Python::with_gil(|py| match f(py) {
        Ok(flag) => c_int::from(flag),
        Err(e) => {
            set_last_error(e);
            -1
        }
    })
}

/// Run a closure that does not need the GIL, return status (0=ok, -1=error).
fn status(f: impl FnOnce() -> BridgeResult<()>) -> c_int {
    clear_last_error();
    match f() {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(e);
            -1
        }
    }
}

/// Shorthand: read a C string argument.
///
/// # Safety
/// Pointer must be null or valid and null-terminated.
unsafe fn arg_str<'a>(ptr: *const c_char) -> BridgeResult<&'a str> {
    unsafe { convert::cstr_to_str(ptr) }
}

/// Borrow the proxy behind a set handle.
///
/// # Safety
/// `set` must be null or a live native object.
unsafe fn arg_set<'a>(set: *mut c_void) -> BridgeResult<&'a ForeignSet> {
    unsafe { ForeignSet::downcast(set) }
        .ok_or_else(|| BridgeError::InvalidArgument("Not a foreign set".into()))
}

/// Wrap a borrowed `PyObject*` as a native value.
///
/// # Safety
/// `obj` must be null or a valid object pointer.
unsafe fn arg_item(py: Python<'_>, obj: *mut PyObject) -> BridgeResult<NativeValue> {
    unsafe { Py::<PyAny>::from_borrowed_ptr_or_opt(py, obj) }
        .map(NativeValue::Host)
        .ok_or(BridgeError::NullHostValue)
}

// ==================== Lifecycle ====================

/// Initialize the embedded interpreter and install the built-in pointer
/// wrappers. Safe to call more than once.
///
/// On Linux, attempts to re-open `libpython` with `RTLD_GLOBAL` so that
/// Python C extensions can resolve interpreter symbols.
///
/// Returns `0` on success, `-1` on error.
#[no_mangle]
pub extern "C" fn pnb_init() -> c_int {
    clear_last_error();

    #[cfg(target_os = "linux")]
    {
        unsafe {
            use libc::{dlopen, RTLD_GLOBAL, RTLD_NOLOAD, RTLD_NOW};
            let candidates: &[&[u8]] = &[
                b"libpython3.so\0",
                b"libpython3.13.so\0",
                b"libpython3.12.so\0",
                b"libpython3.11.so\0",
                b"libpython3.10.so\0",
            ];
            for name in candidates {
                let handle = dlopen(name.as_ptr().cast(), RTLD_NOW | RTLD_NOLOAD);
                if !handle.is_null() {
                    dlopen(name.as_ptr().cast(), RTLD_NOW | RTLD_GLOBAL);
                    break;
                }
            }
        }
    }

    pyo3::prepare_freethreaded_python();
    status(registry::initialize)
}

// ==================== Foreign Sets ====================

/// Create a set proxy over `value`, stealing the reference.
///
/// Returns null if `value` is null or allocation fails; the stolen reference
/// has been released in the latter case.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_new(value: *mut PyObject) -> *mut c_void {
    gil_ptr(|py| {
        let value = unsafe { Py::<PyAny>::from_owned_ptr_or_opt(py, value) }
            .ok_or(BridgeError::NullHostValue)?;
        ForeignSet::with_host_value(value).map(ObjRef::into_raw)
    })
}

/// Reserve storage for a set proxy, to be passed to `pnb_set_init`.
///
/// Returns null when out of memory. Passing that null on to `pnb_set_init`
/// is allowed.
#[no_mangle]
pub extern "C" fn pnb_set_alloc() -> *mut c_void {
    clear_last_error();
    match Allocation::<ForeignSet>::new() {
        Some(allocation) => allocation.into_raw(),
        None => {
            set_last_error(BridgeError::AllocationFailed("ForeignSet"));
            ptr::null_mut()
        }
    }
}

/// Initialize storage from `pnb_set_alloc` with `value`, stealing the
/// reference.
///
/// On failure the storage is freed, the stolen reference released, and null
/// returned.
///
/// # Safety
/// `allocation` must be null or an uninitialized result of `pnb_set_alloc`.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_init(allocation: *mut c_void, value: *mut PyObject) -> *mut c_void {
    gil_ptr(|py| {
        let allocation = unsafe { Allocation::<ForeignSet>::from_raw(allocation) };
        let value = unsafe { Py::<PyAny>::from_owned_ptr_or_opt(py, value) }
            .ok_or(BridgeError::NullHostValue)?;
        ForeignSet::init_with_host_value(allocation, value).map(ObjRef::into_raw)
    })
}

/// The host object backing a set proxy (borrowed reference).
///
/// Returns null if `set` is not a foreign set proxy.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_python_object(set: *mut c_void) -> *mut PyObject {
    clear_last_error();
    match unsafe { arg_set(set) } {
        Ok(proxy) => proxy.host_value().as_ptr(),
        Err(e) => {
            set_last_error(e);
            ptr::null_mut()
        }
    }
}

/// `1` if `obj` is a foreign set proxy, `0` otherwise.
#[no_mangle]
pub unsafe extern "C" fn pnb_is_foreign_set(obj: *const c_void) -> c_int {
    clear_last_error();
    c_int::from(unsafe { ForeignSet::is_foreign_set(obj) })
}

/// Membership test. Returns `1`, `0`, or `-1` on error.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_contains(set: *mut c_void, item: *mut PyObject) -> c_int {
    gil_flag(|py| {
        let proxy = unsafe { arg_set(set) }?;
        let item = unsafe { arg_item(py, item) }?;
        proxy.contains(py, &item)
    })
}

/// Add `item` (borrowed). Returns `0` on success, `-1` on error.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_add(set: *mut c_void, item: *mut PyObject) -> c_int {
    gil_status(|py| {
        let proxy = unsafe { arg_set(set) }?;
        let item = unsafe { arg_item(py, item) }?;
        proxy.add(py, &item)
    })
}

/// Remove `item` (borrowed) if present. Returns `0` on success, `-1` on error.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_remove(set: *mut c_void, item: *mut PyObject) -> c_int {
    gil_status(|py| {
        let proxy = unsafe { arg_set(set) }?;
        let item = unsafe { arg_item(py, item) }?;
        proxy.remove(py, &item)
    })
}

/// Number of elements. Returns `-1` on error.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_count(set: *mut c_void) -> isize {
    clear_last_error();
    Python::with_gil(|py| {
        match unsafe { arg_set(set) }.and_then(|proxy| proxy.count(py)) {
            Ok(n) => n as isize,
            Err(e) => {
                set_last_error(e);
                -1
            }
        }
    })
}

/// Begin iterating a set proxy. Returns an iterator handle, or null on error.
///
/// Iteration is live: changing the set's size before the iterator is
/// exhausted makes the next `pnb_set_iter_next` fail.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_iter(set: *mut c_void) -> *mut c_void {
    gil_ptr(|py| {
        let cursor = unsafe { arg_set(set) }?.cursor(py)?;
        Ok(Box::into_raw(Box::new(cursor)).cast())
    })
}

/// Advance an iterator from `pnb_set_iter`.
///
/// Returns `1` with a new reference stored in `*out`, `0` when exhausted, or
/// `-1` on error. `*out` is only written when `1` is returned.
///
/// # Safety
/// `iter` must be a live handle from `pnb_set_iter`; `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_iter_next(iter: *mut c_void, out: *mut *mut PyObject) -> c_int {
    gil_flag(|py| {
        let cursor = unsafe { iter.cast::<ForeignSetCursor>().as_ref() }
            .ok_or_else(|| BridgeError::InvalidArgument("Null iterator".into()))?;
        let out = unsafe { out.as_mut() }
            .ok_or_else(|| BridgeError::InvalidArgument("Null output pointer".into()))?;
        match cursor.next_host(py) {
            Some(element) => {
                *out = element?.into_ptr();
                Ok(true)
            }
            None => Ok(false),
        }
    })
}

/// Free an iterator handle. NULL is ignored.
///
/// # Safety
/// `iter` must be null or a handle from `pnb_set_iter` not yet freed.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_iter_free(iter: *mut c_void) {
    clear_last_error();
    if iter.is_null() {
        return;
    }
    Python::with_gil(|_py| drop(unsafe { Box::from_raw(iter.cast::<ForeignSetCursor>()) }));
}

/// Release one reference to a set proxy. The backing host reference is
/// released with the last one. NULL is ignored.
#[no_mangle]
pub unsafe extern "C" fn pnb_set_release(set: *mut c_void) {
    clear_last_error();
    if set.is_null() {
        return;
    }
    Python::with_gil(|_py| match unsafe { ObjRef::<ForeignSet>::from_raw(set) } {
        // Dropped here, with the GIL held, so the host decref is immediate.
        Some(proxy) => drop(proxy),
        None => set_last_error(BridgeError::InvalidArgument("Not a foreign set".into())),
    });
}

// ==================== Pointer Wrappers ====================

pub type PythonifyFn = unsafe extern "C" fn(*mut c_void) -> *mut PyObject;
pub type DepythonifyFn = unsafe extern "C" fn(*mut PyObject, *mut c_void) -> c_int;

/// Register C converters for `type_id`.
///
/// `to_python` returns a new reference or null with a Python exception set.
/// `from_python` stores the pointer through its second argument and returns
/// `0`, or returns `-1` with a Python exception set.
///
/// Returns `0` on success, `-1` on duplicate or invalid registration.
#[no_mangle]
pub unsafe extern "C" fn pnb_pointer_register(
    type_id: *const c_char,
    name: *const c_char,
    to_python: Option<PythonifyFn>,
    from_python: Option<DepythonifyFn>,
) -> c_int {
    status(|| {
        let type_id = unsafe { arg_str(type_id) }?;
        let name = unsafe { arg_str(name) }?;
        let (Some(to_python), Some(from_python)) = (to_python, from_python) else {
            return Err(BridgeError::InvalidArgument(format!(
                "missing converter for '{type_id}'"
            )));
        };
        registry::register(
            type_id,
            name,
            move |py, ptr| unsafe { Py::from_owned_ptr_or_err(py, to_python(ptr)) },
            move |obj| {
                let mut out: *mut c_void = ptr::null_mut();
                let rc = unsafe { from_python(obj.as_ptr(), ptr::addr_of_mut!(out).cast()) };
                if rc == 0 {
                    Ok(out)
                } else {
                    Err(PyErr::take(obj.py()).unwrap_or_else(|| {
                        pyo3::exceptions::PyValueError::new_err("pointer conversion failed")
                    }))
                }
            },
        )
    })
}

/// Register a native-runtime reference-counted handle type.
///
/// Returns `0` on success, `-1` on error.
#[no_mangle]
pub unsafe extern "C" fn pnb_pointer_register_id(type_id: *const c_char, name: *const c_char) -> c_int {
    status(|| {
        let type_id = unsafe { arg_str(type_id) }?;
        let name = unsafe { arg_str(name) }?;
        registry::register_reference_counted(type_id, name)
    })
}

/// Register a CF-style handle type.
///
/// Returns `0` on success, `-1` on error.
#[no_mangle]
pub unsafe extern "C" fn pnb_pointer_register_cf(type_id: *const c_char) -> c_int {
    status(|| {
        let type_id = unsafe { arg_str(type_id) }?;
        registry::register_cf_style(type_id)
    })
}

/// Convert `ptr` to a host object (new reference). Returns null on lookup
/// miss or converter failure.
///
/// # Safety
/// `ptr` must be null or a valid pointer of the registered type.
#[no_mangle]
pub unsafe extern "C" fn pnb_pointer_to_python(type_id: *const c_char, ptr: *mut c_void) -> *mut PyObject {
    gil_ptr(|py| {
        let type_id = unsafe { arg_str(type_id) }?;
        let obj = unsafe { registry::to_host(py, type_id, ptr) }?;
        Ok(obj.into_ptr())
    })
}

/// Convert a host object (borrowed) to a pointer stored in `*out`.
///
/// Returns `0` on success, `-1` on error; `*out` is untouched on error.
///
/// # Safety
/// `out` must point to writable pointer-sized storage.
#[no_mangle]
pub unsafe extern "C" fn pnb_pointer_from_python(
    type_id: *const c_char,
    obj: *mut PyObject,
    out: *mut *mut c_void,
) -> c_int {
    gil_status(|py| {
        let type_id = unsafe { arg_str(type_id) }?;
        let out = unsafe { out.as_mut() }
            .ok_or_else(|| BridgeError::InvalidArgument("Null output pointer".into()))?;
        let obj = unsafe { Bound::<PyAny>::from_borrowed_ptr_or_opt(py, obj) }
            .ok_or(BridgeError::NullHostValue)?;
        registry::from_host(type_id, &obj, out)
    })
}

/// `1` if a wrapper exists for `type_id`, `0` otherwise (including bad input).
#[no_mangle]
pub unsafe extern "C" fn pnb_pointer_have_wrapper(type_id: *const c_char) -> c_int {
    clear_last_error();
    match unsafe { arg_str(type_id) } {
        Ok(type_id) => c_int::from(registry::have_wrapper(type_id)),
        Err(_) => 0,
    }
}

/// Display name of the wrapper for a pointer encoding, or null.
///
/// Null with no last error means the encoding is not wrappable or has no
/// wrapper; an unreadable `signature` also sets the last error.
///
/// The result lives in a TLS buffer and is valid until the next call that
/// returns a string on this thread. Do NOT free it.
#[no_mangle]
pub unsafe extern "C" fn pnb_pointer_describe(signature: *const c_char) -> *const c_char {
    clear_last_error();
    let signature = match unsafe { arg_str(signature) } {
        Ok(signature) => signature,
        Err(e) => {
            set_last_error(e);
            return ptr::null();
        }
    };
    match registry::describe(signature) {
        Some(name) => convert::set_return_str(&name),
        None => ptr::null(),
    }
}
