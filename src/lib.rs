//! pynative: the type-bridging core between CPython and a reference-counted
//! native object runtime.
//!
//! This crate builds a `cdylib` loaded by the native runtime. It embeds a
//! Python interpreter using PyO3 and provides:
//!
//! - Foreign set proxies: native mutable sets whose storage is a Python set
//!   (`set_proxy`)
//! - The pointer wrapper registry: converters between opaque native pointer
//!   types and Python objects, keyed by type identifiers derived from type
//!   encodings (`registry`, `encoding`, `opaque`)
//! - The native object heap those pointers and proxies live on (`object`)
//! - C ABI exports for all of the above (`ffi`), with the thread-local
//!   last-error pattern (`error`)

pub mod convert;
pub mod encoding;
pub mod error;
pub mod ffi;
pub mod object;
pub mod opaque;
pub mod registry;
pub mod set_proxy;
pub mod value;

pub use error::{BridgeError, BridgeResult};
pub use object::{Allocation, NativeClass, ObjRef};
pub use opaque::{OpaquePointer, RetainRelease};
pub use set_proxy::{ForeignSet, ForeignSetCursor, ForeignSetIter};
pub use value::NativeValue;
