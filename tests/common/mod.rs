use std::sync::Once;

use pyo3::prelude::*;
use pyo3::types::PyDict;

static INIT: Once = Once::new();

/// Start the embedded interpreter and install the built-in wrappers.
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        pyo3::prepare_freethreaded_python();
        pynative::registry::initialize().expect("built-in wrappers");
    });
}

/// Evaluate `expr` with `s` bound to `value`.
#[allow(dead_code)]
pub fn eval_with<'py>(
    py: Python<'py>,
    expr: &std::ffi::CStr,
    value: &Bound<'py, PyAny>,
) -> PyResult<Bound<'py, PyAny>> {
    let locals = PyDict::new(py);
    locals.set_item("s", value)?;
    py.eval(expr, None, Some(&locals))
}
