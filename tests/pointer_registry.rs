mod common;

use std::ffi::c_void;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;

use pynative::object::{pnb_object_new, pnb_object_release, pnb_object_retain_count};
use pynative::{encoding, registry, BridgeError, OpaquePointer};

/// Converters mapping a pointer to its address as a host `int`.
fn register_address_type(type_id: &str, name: &str) -> Result<(), BridgeError> {
    registry::register(
        type_id,
        name,
        |py, ptr| Ok((ptr as usize).into_pyobject(py).unwrap().into_any().unbind()),
        |obj| Ok(obj.extract::<usize>()? as *mut c_void),
    )
}

#[test]
fn registered_type_converts_and_unknown_type_misses() {
    common::init();
    Python::with_gil(|py| {
        register_address_type("MyHandle", "MyHandleRef").unwrap();
        let ptr = 0xbeef as *mut c_void;

        let obj = unsafe { registry::to_host(py, "MyHandle", ptr) }.unwrap();
        assert_eq!(obj.extract::<usize>(py).unwrap(), 0xbeef);

        let miss = unsafe { registry::to_host(py, "Unknown", ptr) }.unwrap_err();
        assert_eq!(miss, BridgeError::UnknownType("Unknown".into()));
    });
}

#[test]
fn duplicate_registration_keeps_the_first_entry() {
    common::init();
    Python::with_gil(|py| {
        register_address_type("_DuplicateThing", "First").unwrap();

        let err = registry::register(
            "_DuplicateThing",
            "Second",
            |py, _ptr| Ok("second".into_pyobject(py).unwrap().into_any().unbind()),
            |_obj| Ok(ptr::null_mut()),
        )
        .unwrap_err();
        assert_eq!(err, BridgeError::DuplicateWrapper("_DuplicateThing".into()));

        let obj = unsafe { registry::to_host(py, "_DuplicateThing", 7 as *mut c_void) }.unwrap();
        assert_eq!(obj.extract::<usize>(py).unwrap(), 7);
        assert_eq!(
            registry::describe(&encoding::pointer_encoding("_DuplicateThing")).as_deref(),
            Some("First")
        );
    });
}

#[test]
fn specialised_paths_reject_duplicates_too() {
    common::init();
    registry::register_reference_counted("_SharedName", "SharedRef").unwrap();
    assert!(matches!(
        registry::register_opaque("_SharedName", "Other"),
        Err(BridgeError::DuplicateWrapper(_))
    ));
    assert!(matches!(
        registry::register_cf_style("_SharedName"),
        Err(BridgeError::DuplicateWrapper(_))
    ));
}

#[test]
fn empty_identifier_is_invalid() {
    common::init();
    assert_eq!(
        registry::register_opaque("", "Nothing"),
        Err(BridgeError::InvalidIdentifier(String::new()))
    );
    assert!(!registry::have_wrapper(""));
}

#[test]
fn opaque_pointers_round_trip() {
    common::init();
    Python::with_gil(|py| {
        registry::register_opaque("_RoundTrip", "RoundTripRef").unwrap();
        let ptr = 0x1234 as *mut c_void;

        let obj = unsafe { registry::to_host(py, "_RoundTrip", ptr) }.unwrap();
        let wrapper = obj.bind(py).downcast::<OpaquePointer>().unwrap();
        assert_eq!(wrapper.get().as_ptr(), ptr);
        let repr = obj.bind(py).repr().unwrap().to_string();
        assert_eq!(repr, "<RoundTripRef at 0x1234>");

        let mut out = ptr::null_mut();
        registry::from_host("_RoundTrip", obj.bind(py), &mut out).unwrap();
        assert_eq!(out, ptr);

        let again = unsafe { registry::to_host(py, "_RoundTrip", ptr) }.unwrap();
        assert!(obj.bind(py).eq(again.bind(py)).unwrap());
    });
}

#[test]
fn null_pointers_cross_as_none() {
    common::init();
    Python::with_gil(|py| {
        registry::register_opaque("_Nullable", "NullableRef").unwrap();
        let obj = unsafe { registry::to_host(py, "_Nullable", ptr::null_mut()) }.unwrap();
        assert!(obj.is_none(py));

        let mut out = 0x10 as *mut c_void;
        registry::from_host("_Nullable", obj.bind(py), &mut out).unwrap();
        assert!(out.is_null());
    });
}

#[test]
fn converter_failure_leaves_output_untouched() {
    common::init();
    Python::with_gil(|py| {
        registry::register_opaque("_Strict", "StrictRef").unwrap();
        registry::register_opaque("_OtherStrict", "OtherStrictRef").unwrap();
        let sentinel = 0x99 as *mut c_void;
        let mut out = sentinel;

        let number = 5i32.into_pyobject(py).unwrap().into_any();
        let err = registry::from_host("_Strict", &number, &mut out).unwrap_err();
        assert!(matches!(err, BridgeError::Conversion { .. }));
        assert_eq!(out, sentinel);

        let other = unsafe { registry::to_host(py, "_OtherStrict", 0x50 as *mut c_void) }.unwrap();
        let err = registry::from_host("_Strict", other.bind(py), &mut out).unwrap_err();
        match err {
            BridgeError::Conversion { type_id, message } => {
                assert_eq!(type_id, "_Strict");
                assert!(message.contains("expecting _Strict pointer"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(out, sentinel);
    });
}

#[test]
fn failing_to_host_converter_reports_conversion_error() {
    common::init();
    Python::with_gil(|py| {
        registry::register(
            "_Broken",
            "BrokenRef",
            |_py, _ptr| Err(PyTypeError::new_err("cannot wrap")),
            |_obj| Ok(ptr::null_mut()),
        )
        .unwrap();
        let err = unsafe { registry::to_host(py, "_Broken", 1 as *mut c_void) }.unwrap_err();
        match err {
            BridgeError::Conversion { message, .. } => assert!(message.contains("cannot wrap")),
            other => panic!("unexpected error {other:?}"),
        }
    });
}

#[test]
fn reference_counted_handles_retain_and_release_once() {
    common::init();
    Python::with_gil(|py| {
        registry::register_reference_counted("_CountedThing", "CountedThingRef").unwrap();
        let handle = pnb_object_new();
        unsafe {
            assert_eq!(pnb_object_retain_count(handle), 1);

            let obj = registry::to_host(py, "_CountedThing", handle).unwrap();
            assert_eq!(pnb_object_retain_count(handle), 2);

            let mut out = ptr::null_mut();
            registry::from_host("_CountedThing", obj.bind(py), &mut out).unwrap();
            assert_eq!(out, handle);
            assert_eq!(pnb_object_retain_count(handle), 2);

            drop(obj);
            assert_eq!(pnb_object_retain_count(handle), 1);
            pnb_object_release(handle);
        }
    });
}

#[cfg(not(target_vendor = "apple"))]
#[test]
fn cf_style_handles_use_the_well_known_pair() {
    common::init();
    Python::with_gil(|py| {
        registry::register_cf_style("__CFTestThing").unwrap();
        assert_eq!(
            registry::describe("^{__CFTestThing=}").as_deref(),
            Some("CFTestThingRef")
        );

        let handle = pnb_object_new();
        unsafe {
            let obj = registry::to_host_for_signature(py, "r^{__CFTestThing=}", handle).unwrap();
            assert_eq!(pnb_object_retain_count(handle), 2);
            drop(obj);
            assert_eq!(pnb_object_retain_count(handle), 1);
            pnb_object_release(handle);
        }
    });
}

#[test]
fn queries_do_not_mutate_the_registry() {
    common::init();
    registry::register_opaque("_Queried", "QueriedRef").unwrap();

    for _ in 0..3 {
        assert!(registry::have_wrapper("_Queried"));
        assert!(!registry::have_wrapper("_Querie"));
        assert!(!registry::have_wrapper("_Queried2"));
        assert!(!registry::have_wrapper("_NeverRegistered"));
        assert_eq!(registry::describe("^{_Queried=}").as_deref(), Some("QueriedRef"));
        assert_eq!(registry::describe("^{_NeverRegistered=}"), None);
        assert_eq!(registry::describe("^v"), None);
        assert_eq!(registry::describe("_Queried"), None);
    }

    // The table is shared with the other tests; only look at our own names.
    let ours: Vec<String> = registry::registered_types()
        .unwrap()
        .into_iter()
        .filter(|id| id.starts_with("_Quer") || id.starts_with("_Never"))
        .collect();
    assert_eq!(ours, vec!["_Queried".to_string()]);
}

#[test]
fn initialize_is_idempotent() {
    common::init();
    registry::initialize().unwrap();
    registry::initialize().unwrap();

    assert!(registry::have_wrapper("_object"));
    assert!(registry::have_wrapper("_NSZone"));
    assert!(registry::have_wrapper("__CFAllocator"));
    assert_eq!(registry::describe("^{_NSZone=}").as_deref(), Some("NSZone"));
    assert_eq!(
        registry::describe("^{__CFAllocator=}").as_deref(),
        Some("CFAllocatorRef")
    );
}

#[test]
fn host_object_pointers_keep_identity() {
    common::init();
    Python::with_gil(|py| {
        let value = py.eval(c"object()", None, None).unwrap();
        let before = value.get_refcnt();

        let obj = unsafe { registry::to_host(py, "_object", value.as_ptr().cast()) }.unwrap();
        assert!(obj.bind(py).is(&value));
        assert_eq!(value.get_refcnt(), before + 1);

        let mut out = ptr::null_mut();
        registry::from_host_for_signature("^{_object=}", obj.bind(py), &mut out).unwrap();
        assert_eq!(out, value.as_ptr().cast::<c_void>());

        drop(obj);
        assert_eq!(value.get_refcnt(), before);
    });
}

#[test]
fn concurrent_readers_never_see_partial_registrations() {
    common::init();
    const WRITERS: usize = 4;
    const READERS: usize = 3;
    let ids: Vec<String> = (0..64).map(|i| format!("_Concurrent{i}")).collect();
    let deadline = Instant::now() + Duration::from_secs(60);

    thread::scope(|scope| {
        for writer in 0..WRITERS {
            let ids = &ids;
            scope.spawn(move || {
                for id in ids.iter().skip(writer).step_by(WRITERS) {
                    registry::register_opaque(id, &format!("{id}Ref")).unwrap();
                }
            });
        }
        for _ in 0..READERS {
            let ids = &ids;
            scope.spawn(move || {
                let mut seen = vec![false; ids.len()];
                while seen.contains(&false) {
                    assert!(Instant::now() < deadline, "registrations never became visible");
                    for (i, id) in ids.iter().enumerate() {
                        if !seen[i] && !registry::have_wrapper(id) {
                            continue;
                        }
                        // Once visible, an entry is complete and stays usable.
                        seen[i] = true;
                        assert!(registry::have_wrapper(id));
                        assert_eq!(
                            registry::describe(&encoding::pointer_encoding(id)),
                            Some(format!("{id}Ref"))
                        );
                        Python::with_gil(|py| {
                            let obj =
                                unsafe { registry::to_host(py, id, 0x40 as *mut c_void) }.unwrap();
                            let wrapper = obj.bind(py).downcast::<OpaquePointer>().unwrap();
                            assert_eq!(wrapper.get().as_ptr() as usize, 0x40);
                        });
                    }
                    thread::yield_now();
                }
            });
        }
    });
}
