//! Pointer wrapper registry: maps pointer type identifiers to converter pairs.
//!
//! Identifiers are the struct names produced by [`crate::encoding`]
//! (`__CFString`, `_NSZone`, ...). Lookup is exact string equality.
//!
//! The table is process-wide and append-only. Registration takes the write
//! lock and either inserts a complete entry or leaves the table untouched;
//! lookups take the read lock only long enough to clone the entry's `Arc`,
//! so converters run without any lock held and may themselves register.
//! Registration is meant to happen during initialization, before the bridge
//! is used concurrently.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, OnceLock, RwLock};

use pyo3::prelude::*;
use tracing::{debug, warn};

use crate::convert::pyerr_to_string;
use crate::encoding;
use crate::error::{BridgeError, BridgeResult};
use crate::opaque::{OpaquePointer, RetainRelease};

/// Native pointer → new host reference.
pub type ToHostFn = dyn Fn(Python<'_>, *mut c_void) -> PyResult<Py<PyAny>> + Send + Sync;
/// Host value → native pointer.
pub type FromHostFn = dyn Fn(&Bound<'_, PyAny>) -> PyResult<*mut c_void> + Send + Sync;

/// Global pointer wrapper table, created by the first registration.
static WRAPPERS: RwLock<Option<HashMap<String, Arc<PointerWrapper>>>> = RwLock::new(None);

/// Outcome of installing the built-ins, kept for every later `initialize`.
static BUILTINS: OnceLock<BridgeResult<()>> = OnceLock::new();

struct PointerWrapper {
    type_id: String,
    name: String,
    to_host: Box<ToHostFn>,
    from_host: Box<FromHostFn>,
}

fn insert(wrapper: PointerWrapper) -> BridgeResult<()> {
    if wrapper.type_id.is_empty() || wrapper.type_id.contains('\0') {
        warn!(type_id = ?wrapper.type_id, "rejected pointer wrapper with invalid identifier");
        return Err(BridgeError::InvalidIdentifier(wrapper.type_id));
    }
    let mut guard = WRAPPERS.write().map_err(|_| BridgeError::Poisoned)?;
    let table = guard.get_or_insert_with(HashMap::new);
    if table.contains_key(&wrapper.type_id) {
        warn!(type_id = %wrapper.type_id, "pointer wrapper already registered");
        return Err(BridgeError::DuplicateWrapper(wrapper.type_id));
    }
    debug!(type_id = %wrapper.type_id, name = %wrapper.name, "registered pointer wrapper");
    table.insert(wrapper.type_id.clone(), Arc::new(wrapper));
    Ok(())
}

fn lookup(type_id: &str) -> BridgeResult<Arc<PointerWrapper>> {
    let guard = WRAPPERS.read().map_err(|_| BridgeError::Poisoned)?;
    guard
        .as_ref()
        .and_then(|table| table.get(type_id))
        .cloned()
        .ok_or_else(|| BridgeError::UnknownType(type_id.to_owned()))
}

// ==================== Registration ====================

/// Register converters for `type_id`.
///
/// Fails with `DuplicateWrapper` if the identifier is taken and with
/// `InvalidIdentifier` if it is empty; the table is unchanged in both cases.
pub fn register<T, F>(type_id: &str, name: &str, to_host: T, from_host: F) -> BridgeResult<()>
where
    T: Fn(Python<'_>, *mut c_void) -> PyResult<Py<PyAny>> + Send + Sync + 'static,
    F: Fn(&Bound<'_, PyAny>) -> PyResult<*mut c_void> + Send + Sync + 'static,
{
    insert(PointerWrapper {
        type_id: type_id.to_owned(),
        name: name.to_owned(),
        to_host: Box::new(to_host),
        from_host: Box::new(from_host),
    })
}

/// Register a plain opaque pointer type. Pointers cross as [`OpaquePointer`]
/// objects that do not own anything; NULL crosses as `None`.
pub fn register_opaque(type_id: &str, name: &str) -> BridgeResult<()> {
    let (to_id, to_name) = (type_id.to_owned(), name.to_owned());
    let from_id = type_id.to_owned();
    register(
        type_id,
        name,
        move |py, ptr| {
            if ptr.is_null() {
                return Ok(py.None());
            }
            Ok(Py::new(py, OpaquePointer::borrowed(&to_id, &to_name, ptr))?.into_any())
        },
        move |obj| {
            if obj.is_none() {
                return Ok(std::ptr::null_mut());
            }
            OpaquePointer::extract_ptr(obj, &from_id)
        },
    )
}

/// Register a reference-counted handle type managed with `discipline`.
///
/// The to-host converter retains the handle on behalf of the new host
/// wrapper, which releases it when deallocated. The from-host converter hands
/// back the wrapped pointer without retaining it.
pub fn register_with_discipline(
    type_id: &str,
    name: &str,
    discipline: RetainRelease,
) -> BridgeResult<()> {
    let (to_id, to_name) = (type_id.to_owned(), name.to_owned());
    let from_id = type_id.to_owned();
    register(
        type_id,
        name,
        move |py, ptr| {
            if ptr.is_null() {
                return Ok(py.None());
            }
            // SAFETY: `to_host` callers vouch that `ptr` is a live handle of this type.
            let wrapper = unsafe { OpaquePointer::retained(&to_id, &to_name, ptr, discipline) };
            Ok(Py::new(py, wrapper)?.into_any())
        },
        move |obj| {
            if obj.is_none() {
                return Ok(std::ptr::null_mut());
            }
            OpaquePointer::extract_ptr(obj, &from_id)
        },
    )
}

/// Register a handle type of the native object runtime.
pub fn register_reference_counted(type_id: &str, name: &str) -> BridgeResult<()> {
    register_with_discipline(type_id, name, RetainRelease::native_object())
}

/// Register a CoreFoundation-style handle type. The display name is derived
/// from the identifier (`__CFString` → `CFStringRef`).
pub fn register_cf_style(type_id: &str) -> BridgeResult<()> {
    register_with_discipline(
        type_id,
        &encoding::cf_display_name(type_id),
        RetainRelease::cf_style(),
    )
}

/// Install the built-in wrappers. Safe to call any number of times.
///
/// Built-ins that were registered explicitly beforehand are left alone.
/// A failed installation keeps failing: later calls report the same error.
pub fn initialize() -> BridgeResult<()> {
    initialize_once(&BUILTINS, register_builtins)
}

fn initialize_once(
    cell: &OnceLock<BridgeResult<()>>,
    install: impl FnOnce() -> BridgeResult<()>,
) -> BridgeResult<()> {
    cell.get_or_init(install).clone()
}

fn register_builtins() -> BridgeResult<()> {
    let outcomes = [
        register(
            "_object",
            "PyObject",
            |py, ptr| {
                // SAFETY: the pointer is a host object pointer; a new reference is taken.
                let obj = unsafe { Py::<PyAny>::from_borrowed_ptr_or_opt(py, ptr.cast()) };
                Ok(obj.unwrap_or_else(|| py.None()))
            },
            |obj| Ok(obj.as_ptr().cast()),
        ),
        register_opaque("_NSZone", "NSZone"),
        register_cf_style("__CFAllocator"),
    ];
    for outcome in outcomes {
        match outcome {
            Ok(()) | Err(BridgeError::DuplicateWrapper(_)) => {}
            Err(e) => return Err(e),
        }
    }
    debug!("built-in pointer wrappers installed");
    Ok(())
}

// ==================== Lookup ====================

/// Whether `type_id` has a wrapper. No side effects.
pub fn have_wrapper(type_id: &str) -> bool {
    lookup(type_id).is_ok()
}

/// Convert a native pointer to a new host reference.
///
/// # Safety
/// `ptr` must be null or a valid pointer of the type registered as `type_id`;
/// converters dereference or retain it.
pub unsafe fn to_host(py: Python<'_>, type_id: &str, ptr: *mut c_void) -> BridgeResult<Py<PyAny>> {
    let wrapper = lookup(type_id)?;
    (wrapper.to_host)(py, ptr).map_err(|e| BridgeError::conversion(type_id, pyerr_to_string(py, e)))
}

/// Convert a host value to a native pointer, stored in `out` on success.
/// On failure `out` is left untouched.
pub fn from_host(type_id: &str, value: &Bound<'_, PyAny>, out: &mut *mut c_void) -> BridgeResult<()> {
    let wrapper = lookup(type_id)?;
    let ptr = (wrapper.from_host)(value)
        .map_err(|e| BridgeError::conversion(type_id, pyerr_to_string(value.py(), e)))?;
    *out = ptr;
    Ok(())
}

/// [`to_host`] keyed by a type encoding instead of an identifier.
///
/// # Safety
/// Same contract as [`to_host`].
pub unsafe fn to_host_for_signature(
    py: Python<'_>,
    signature: &str,
    ptr: *mut c_void,
) -> BridgeResult<Py<PyAny>> {
    let type_id = encoding::pointer_type_identifier(signature)
        .ok_or_else(|| BridgeError::UnknownType(signature.to_owned()))?;
    unsafe { to_host(py, type_id, ptr) }
}

/// [`from_host`] keyed by a type encoding instead of an identifier.
pub fn from_host_for_signature(
    signature: &str,
    value: &Bound<'_, PyAny>,
    out: &mut *mut c_void,
) -> BridgeResult<()> {
    let type_id = encoding::pointer_type_identifier(signature)
        .ok_or_else(|| BridgeError::UnknownType(signature.to_owned()))?;
    from_host(type_id, value, out)
}

/// Display name of the wrapper for a pointer encoding, or `None` if the
/// encoding is not wrappable or nothing is registered for it.
pub fn describe(signature: &str) -> Option<String> {
    let type_id = encoding::pointer_type_identifier(signature)?;
    lookup(type_id).ok().map(|wrapper| wrapper.name.clone())
}

/// All registered identifiers, sorted.
pub fn registered_types() -> BridgeResult<Vec<String>> {
    let guard = WRAPPERS.read().map_err(|_| BridgeError::Poisoned)?;
    let mut ids: Vec<String> = guard
        .as_ref()
        .map(|table| table.keys().cloned().collect())
        .unwrap_or_default();
    ids.sort();
    Ok(ids)
}
