//! C string helpers, host error formatting and the TLS string buffer for FFI returns.
//!
//! String-returning FFI functions (`pnb_pointer_describe`) use a thread-local
//! buffer so callers never free anything. The pointer is valid until the next
//! call that writes the buffer on the same thread.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use pyo3::prelude::*;

use crate::error::BridgeError;

// ==================== TLS String Buffer ====================

thread_local! {
    /// Reusable buffer for returning C strings from FFI functions.
    static RETURN_BUF: RefCell<CString> = RefCell::new(CString::default());
}

/// Store a string in the TLS buffer and return a pointer to it.
///
/// Strings with an interior NUL are truncated at the first NUL.
pub fn set_return_str(s: &str) -> *const c_char {
    let visible = s.split('\0').next().unwrap_or_default();
    RETURN_BUF.with(|cell| {
        *cell.borrow_mut() = CString::new(visible).unwrap_or_default();
        cell.borrow().as_ptr()
    })
}

// ==================== C String Helpers ====================

/// Safely convert a `*const c_char` to `&str`.
///
/// # Safety
/// The pointer must be null or valid and null-terminated for `'a`.
pub unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Result<&'a str, BridgeError> {
    if ptr.is_null() {
        return Err(BridgeError::InvalidArgument("Null string pointer".into()));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| BridgeError::InvalidArgument(format!("Invalid UTF-8: {e}")))
}

// ==================== Host Error Formatting ====================

/// Convert a `PyErr` into a human-readable error string,
/// including traceback if available.
pub fn pyerr_to_string(py: Python<'_>, err: PyErr) -> String {
    let msg = format!("{err}");
    if let Some(tb) = err.traceback(py) {
        if let Ok(formatted) = tb.format() {
            return format!("{formatted}{msg}");
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_buffer_is_reused() {
        let first = set_return_str("NSZone");
        assert_eq!(unsafe { CStr::from_ptr(first) }.to_str(), Ok("NSZone"));
        let second = set_return_str("CFAllocatorRef");
        assert_eq!(
            unsafe { CStr::from_ptr(second) }.to_str(),
            Ok("CFAllocatorRef")
        );
    }

    #[test]
    fn return_buffer_truncates_at_nul() {
        let ptr = set_return_str("head\0tail");
        assert_eq!(unsafe { CStr::from_ptr(ptr) }.to_str(), Ok("head"));
    }

    #[test]
    fn null_cstr_is_rejected() {
        let err = unsafe { cstr_to_str(std::ptr::null()) }.unwrap_err();
        assert_eq!(err, BridgeError::InvalidArgument("Null string pointer".into()));
    }

    #[test]
    fn valid_cstr_is_borrowed() {
        let owned = CString::new("__CFString").unwrap();
        assert_eq!(unsafe { cstr_to_str(owned.as_ptr()) }, Ok("__CFString"));
    }
}
