//! Values exchanged between native code and host containers.
//!
//! Scalars cross by value. Host sets cross as [`ForeignSet`] proxies and come
//! back as the very same host object. Everything else stays a host reference.

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyFloat, PyInt, PySet, PyString};

use crate::error::{BridgeError, BridgeResult};
use crate::object::ObjRef;
use crate::set_proxy::ForeignSet;

#[derive(Debug)]
pub enum NativeValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A native set whose storage is a host set.
    Set(ObjRef<ForeignSet>),
    /// Any other host object, passed through untouched.
    Host(Py<PyAny>),
}

impl NativeValue {
    /// Host representation of this value.
    ///
    /// A `Set` yields its backing host value, not a copy, so host code gets
    /// back the same object it handed over.
    pub fn to_host<'py>(&self, py: Python<'py>) -> BridgeResult<Bound<'py, PyAny>> {
        let obj = match self {
            NativeValue::Nil => py.None().into_bound(py),
            NativeValue::Bool(b) => PyBool::new(py, *b).to_owned().into_any(),
            NativeValue::Int(i) => (*i)
                .into_pyobject(py)
                .map_err(|e| BridgeError::InvalidArgument(format!("into_pyobject: {e}")))?
                .into_any(),
            NativeValue::Float(f) => (*f)
                .into_pyobject(py)
                .map_err(|e| BridgeError::InvalidArgument(format!("into_pyobject: {e}")))?
                .into_any(),
            NativeValue::Str(s) => s
                .as_str()
                .into_pyobject(py)
                .map_err(|e| BridgeError::InvalidArgument(format!("into_pyobject: {e}")))?
                .into_any(),
            NativeValue::Set(set) => set.host_value().bind(py).clone(),
            NativeValue::Host(obj) => obj.bind(py).clone(),
        };
        Ok(obj)
    }

    /// Native representation of a host object.
    ///
    /// `bool` is tested before `int` because it is a subclass. Integers that
    /// do not fit in `i64` and strings that are not valid UTF-8 stay host
    /// references.
    pub fn from_host(obj: &Bound<'_, PyAny>) -> BridgeResult<Self> {
        if obj.is_none() {
            return Ok(NativeValue::Nil);
        }
        if let Ok(b) = obj.downcast::<PyBool>() {
            return Ok(NativeValue::Bool(b.is_true()));
        }
        if obj.is_instance_of::<PyInt>() {
            if let Ok(i) = obj.extract::<i64>() {
                return Ok(NativeValue::Int(i));
            }
        } else if obj.is_instance_of::<PyFloat>() {
            if let Ok(f) = obj.extract::<f64>() {
                return Ok(NativeValue::Float(f));
            }
        } else if obj.is_instance_of::<PyString>() {
            if let Ok(s) = obj.extract::<String>() {
                return Ok(NativeValue::Str(s));
            }
        } else if obj.is_instance_of::<PySet>() {
            let proxy = ForeignSet::with_host_value(obj.clone().unbind())?;
            return Ok(NativeValue::Set(proxy));
        }
        Ok(NativeValue::Host(obj.clone().unbind()))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            NativeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for NativeValue {
    fn from(value: i64) -> Self {
        NativeValue::Int(value)
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        NativeValue::Bool(value)
    }
}

impl From<f64> for NativeValue {
    fn from(value: f64) -> Self {
        NativeValue::Float(value)
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        NativeValue::Str(value.to_owned())
    }
}

impl From<Py<PyAny>> for NativeValue {
    fn from(value: Py<PyAny>) -> Self {
        NativeValue::Host(value)
    }
}
