//! Bridge error type and the thread-local last-error slot used at the C ABI.
//!
//! Rust callers get a [`BridgeError`] from every fallible operation. The
//! `pnb_*` exports flatten that into a sentinel return value plus a message
//! stored here; retrieve it with `pnb_last_error()` and clear it with
//! `pnb_last_error_clear()`.
//!
//! **Ownership rules:**
//! - `pnb_last_error()` returns a pointer owned by TLS — do NOT free it.
//! - `pnb_pointer_describe()` returns a pointer into a TLS buffer (see `convert`).

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use thiserror::Error;

/// Everything that can go wrong while crossing the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The native runtime could not allocate storage for a new object.
    #[error("native allocation failed for {0}")]
    AllocationFailed(&'static str),

    /// A host value was required but the null sentinel was passed.
    #[error("host value must not be NULL")]
    NullHostValue,

    /// The type identifier is already present in the pointer registry.
    #[error("pointer wrapper for '{0}' is already registered")]
    DuplicateWrapper(String),

    /// Empty identifiers and the like are refused before touching the table.
    #[error("invalid pointer type identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Lookup miss in the pointer registry.
    #[error("no pointer wrapper registered for '{0}'")]
    UnknownType(String),

    /// A converter reported failure; the message carries the host traceback.
    #[error("cannot convert '{type_id}': {message}")]
    Conversion { type_id: String, message: String },

    /// The backing host value of a proxy does not behave like a mutable set.
    #[error("{operation} on foreign set failed: {message}")]
    ContractViolation {
        operation: &'static str,
        message: String,
    },

    /// A registry lock was poisoned by a panicking writer.
    #[error("pointer registry lock poisoned")]
    Poisoned,

    /// Bad argument at the C ABI (null pointer, invalid UTF-8, ...).
    #[error("{0}")]
    InvalidArgument(String),
}

impl BridgeError {
    pub(crate) fn contract(operation: &'static str, message: impl Into<String>) -> Self {
        BridgeError::ContractViolation {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn conversion(type_id: &str, message: impl Into<String>) -> Self {
        BridgeError::Conversion {
            type_id: type_id.to_owned(),
            message: message.into(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message in thread-local storage.
pub fn set_last_error(msg: impl ToString) {
    let msg = msg.to_string();
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the thread-local error.
pub fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Copy of the current thread-local error, for Rust-side inspection.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|s| s.to_string_lossy().into_owned())
    })
}

/// Get a pointer to the last error message, or null if none.
///
/// The returned pointer is valid until the next `pnb_*` call on this thread.
/// Do NOT free this pointer.
#[no_mangle]
pub extern "C" fn pnb_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |s| s.as_ptr())
    })
}

/// Clear the last error message.
#[no_mangle]
pub extern "C" fn pnb_last_error_clear() {
    clear_last_error();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_roundtrips_through_tls() {
        clear_last_error();
        assert!(pnb_last_error().is_null());

        set_last_error(BridgeError::UnknownType("Missing".into()));
        assert_eq!(
            last_error_message().as_deref(),
            Some("no pointer wrapper registered for 'Missing'")
        );
        assert!(!pnb_last_error().is_null());

        pnb_last_error_clear();
        assert!(last_error_message().is_none());
    }

    #[test]
    fn interior_nul_drops_message() {
        set_last_error("bad\0message");
        assert!(last_error_message().is_none());
    }

    #[test]
    fn contract_violation_names_operation() {
        let err = BridgeError::contract("add", "AttributeError: 'list' object has no attribute 'add'");
        assert_eq!(
            err.to_string(),
            "add on foreign set failed: AttributeError: 'list' object has no attribute 'add'"
        );
    }
}
