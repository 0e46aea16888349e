//! Reference-counted native object heap.
//!
//! Every native object is a single heap block: an [`ObjectHeader`] (retain
//! count, class identity, destructor) followed by the payload. C callers see
//! the address of the header and use `pnb_object_retain` /
//! `pnb_object_release`; Rust callers hold an [`ObjRef<T>`].
//!
//! Allocation is split from initialization the same way the native runtime
//! does it: [`Allocation::new`] reserves storage (and may fail), then
//! [`Allocation::init`] moves the payload in and hands out the first
//! reference. Dropping an allocation that was never initialized frees the
//! storage without touching the payload.

use std::alloc::{alloc, dealloc, Layout};
use std::any::TypeId;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicUsize, Ordering};

/// A payload type that can live on the native heap.
pub trait NativeClass: 'static {
    /// Class name reported for diagnostics.
    const CLASS_NAME: &'static str;
}

/// Plain native object without payload. Used for opaque handles.
#[derive(Debug, Default)]
pub struct PlainObject;

impl NativeClass for PlainObject {
    const CLASS_NAME: &'static str = "Object";
}

#[repr(C)]
pub struct ObjectHeader {
    retain_count: AtomicUsize,
    class: TypeId,
    class_name: &'static str,
    destroy: unsafe fn(NonNull<ObjectHeader>),
}

#[repr(C)]
struct ObjectBox<T> {
    header: ObjectHeader,
    value: T,
}

unsafe fn destroy_box<T>(header: NonNull<ObjectHeader>) {
    let boxed = header.cast::<ObjectBox<T>>().as_ptr();
    unsafe {
        ptr::drop_in_place(ptr::addr_of_mut!((*boxed).value));
        dealloc(boxed.cast(), Layout::new::<ObjectBox<T>>());
    }
}

// ==================== Allocation ====================

/// Uninitialized storage for one native object.
pub struct Allocation<T: NativeClass> {
    ptr: NonNull<ObjectBox<T>>,
}

impl<T: NativeClass> Allocation<T> {
    /// Reserve storage. `None` when the allocator is out of memory.
    pub fn new() -> Option<Self> {
        let raw = unsafe { alloc(Layout::new::<ObjectBox<T>>()) };
        NonNull::new(raw.cast::<ObjectBox<T>>()).map(|ptr| Allocation { ptr })
    }

    /// Move `value` into the storage. The returned reference is the only one.
    pub fn init(self, value: T) -> ObjRef<T> {
        let boxed = self.ptr.as_ptr();
        unsafe {
            ptr::write(
                ptr::addr_of_mut!((*boxed).header),
                ObjectHeader {
                    retain_count: AtomicUsize::new(1),
                    class: TypeId::of::<T>(),
                    class_name: T::CLASS_NAME,
                    destroy: destroy_box::<T>,
                },
            );
            ptr::write(ptr::addr_of_mut!((*boxed).value), value);
        }
        let ptr = self.ptr;
        std::mem::forget(self);
        ObjRef {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Hand the storage to C. Pair with [`Allocation::from_raw`].
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr().cast();
        std::mem::forget(self);
        ptr
    }

    /// # Safety
    /// `ptr` must come from [`Allocation::into_raw`] for the same `T` and must
    /// not have been initialized or reclaimed since.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr.cast::<ObjectBox<T>>()).map(|ptr| Allocation { ptr })
    }
}

impl<T: NativeClass> Drop for Allocation<T> {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr().cast(), Layout::new::<ObjectBox<T>>()) };
    }
}

// ==================== Strong references ====================

/// Owned strong reference to a native object.
///
/// `Clone` retains, `Drop` releases; the payload is dropped and the storage
/// freed when the last reference goes away.
pub struct ObjRef<T: NativeClass> {
    ptr: NonNull<ObjectBox<T>>,
    _marker: PhantomData<ObjectBox<T>>,
}

unsafe impl<T: NativeClass + Send + Sync> Send for ObjRef<T> {}
unsafe impl<T: NativeClass + Send + Sync> Sync for ObjRef<T> {}

impl<T: NativeClass> ObjRef<T> {
    fn header(&self) -> &ObjectHeader {
        unsafe { &(*self.ptr.as_ptr()).header }
    }

    /// Allocate and initialize in one step.
    pub fn try_new(value: T) -> Option<Self> {
        Allocation::new().map(|allocation| allocation.init(value))
    }

    pub fn retain_count(this: &Self) -> usize {
        this.header().retain_count.load(Ordering::Acquire)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Address of the object as seen by C.
    pub fn as_ptr(this: &Self) -> *mut c_void {
        this.ptr.as_ptr().cast()
    }

    /// Give up this reference without releasing it.
    pub fn into_raw(this: Self) -> *mut c_void {
        let ptr = Self::as_ptr(&this);
        std::mem::forget(this);
        ptr
    }

    /// Adopt a reference previously leaked with [`ObjRef::into_raw`] or
    /// obtained from `pnb_object_retain`. Returns `None` for null or for an
    /// object of another class.
    ///
    /// # Safety
    /// `ptr` must be null or point to a live native object, and the caller
    /// must own one reference to it which is transferred to the result.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        let header = NonNull::new(ptr.cast::<ObjectHeader>())?;
        if unsafe { header.as_ref() }.class != TypeId::of::<T>() {
            return None;
        }
        Some(ObjRef {
            ptr: header.cast(),
            _marker: PhantomData,
        })
    }

    /// Borrow the payload of a raw object if it is a `T`.
    ///
    /// # Safety
    /// `ptr` must be null or point to a native object that stays alive for `'a`.
    pub unsafe fn borrow_raw<'a>(ptr: *mut c_void) -> Option<&'a T> {
        let header = NonNull::new(ptr.cast::<ObjectHeader>())?;
        if unsafe { header.as_ref() }.class != TypeId::of::<T>() {
            return None;
        }
        Some(unsafe { &(*header.cast::<ObjectBox<T>>().as_ptr()).value })
    }
}

impl<T: NativeClass> Deref for ObjRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &(*self.ptr.as_ptr()).value }
    }
}

impl<T: NativeClass> Clone for ObjRef<T> {
    fn clone(&self) -> Self {
        self.header().retain_count.fetch_add(1, Ordering::Relaxed);
        ObjRef {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: NativeClass> Drop for ObjRef<T> {
    fn drop(&mut self) {
        unsafe { release_header(self.ptr.cast()) };
    }
}

impl<T: NativeClass> fmt::Debug for ObjRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} at {:p} retain_count={}>",
            T::CLASS_NAME,
            self.ptr,
            Self::retain_count(self)
        )
    }
}

unsafe fn release_header(header: NonNull<ObjectHeader>) {
    let head = unsafe { header.as_ref() };
    if head.retain_count.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    fence(Ordering::Acquire);
    let destroy = head.destroy;
    unsafe { destroy(header) };
}

// ==================== Raw object API ====================

/// Class name of a raw native object, `None` for null.
///
/// # Safety
/// `ptr` must be null or point to a live native object.
pub unsafe fn class_name(ptr: *const c_void) -> Option<&'static str> {
    NonNull::new(ptr as *mut ObjectHeader).map(|h| unsafe { h.as_ref() }.class_name)
}

/// Whether a raw native object carries a `T` payload.
///
/// # Safety
/// `ptr` must be null or point to a live native object.
pub unsafe fn is_instance<T: NativeClass>(ptr: *const c_void) -> bool {
    NonNull::new(ptr as *mut ObjectHeader)
        .is_some_and(|h| unsafe { h.as_ref() }.class == TypeId::of::<T>())
}

/// Create a payload-less native object with retain count 1.
///
/// Returns null if allocation fails.
#[no_mangle]
pub extern "C" fn pnb_object_new() -> *mut c_void {
    ObjRef::try_new(PlainObject).map_or(ptr::null_mut(), ObjRef::into_raw)
}

/// Increment the retain count. Null is passed through.
///
/// # Safety
/// `ptr` must be null or point to a live native object.
#[no_mangle]
pub unsafe extern "C" fn pnb_object_retain(ptr: *const c_void) -> *const c_void {
    if let Some(header) = NonNull::new(ptr as *mut ObjectHeader) {
        unsafe { header.as_ref() }
            .retain_count
            .fetch_add(1, Ordering::Relaxed);
    }
    ptr
}

/// Decrement the retain count, destroying the object when it reaches zero.
///
/// # Safety
/// `ptr` must be null or point to a live native object on which the caller
/// owns a reference.
#[no_mangle]
pub unsafe extern "C" fn pnb_object_release(ptr: *const c_void) {
    if let Some(header) = NonNull::new(ptr as *mut ObjectHeader) {
        unsafe { release_header(header) };
    }
}

/// Current retain count, `0` for null.
///
/// # Safety
/// `ptr` must be null or point to a live native object.
#[no_mangle]
pub unsafe extern "C" fn pnb_object_retain_count(ptr: *const c_void) -> usize {
    NonNull::new(ptr as *mut ObjectHeader).map_or(0, |h| {
        unsafe { h.as_ref() }.retain_count.load(Ordering::Acquire)
    })
}
