//! Loader handles and the per-category object factories that issue them.
//!
//! A loader handle is the address of an [Object] record: the driver-native handle plus the
//! dispatch tables of the driver that produced it. Records live in an append-only arena, so a
//! handle stays valid for the life of the process.

use std::{
    alloc::{self, Layout},
    collections::{HashMap, TryReserveError},
    ffi::c_void,
    num::NonZeroUsize,
    ptr::null_mut,
    sync::Arc,
};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use stable_vec::StableVec;
use tracing::trace;

use crate::{ddi::DriverDdi, LoaderError, LoaderErrorKind};

/// An opaque handle type that crosses the C boundary.
pub trait LoaderHandle: Copy + Send + Sync + 'static {
    /// Name of the object category, for diagnostics.
    const CATEGORY: &'static str;

    fn from_raw(raw: *mut c_void) -> Self;

    fn as_raw(self) -> *mut c_void;

    fn is_null(self) -> bool {
        self.as_raw().is_null()
    }

    fn null() -> Self {
        Self::from_raw(null_mut())
    }

    /// The process-wide factory for this category.
    fn factory() -> &'static ObjectFactory<Self>;
}

macro_rules! loader_handles {
    ($( $(#[$meta:meta])* $name:ident => $label:literal; )*) => {
        $(
            $(#[$meta])*
            #[repr(transparent)]
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(pub *mut c_void);

            // Safety: handles are opaque tokens. The loader never dereferences a driver-native
            // handle, and loader-issued handles point at immutable arena records.
            unsafe impl Send for $name {}
            unsafe impl Sync for $name {}

            impl LoaderHandle for $name {
                const CATEGORY: &'static str = $label;

                fn from_raw(raw: *mut c_void) -> Self {
                    Self(raw)
                }

                fn as_raw(self) -> *mut c_void {
                    self.0
                }

                fn factory() -> &'static ObjectFactory<Self> {
                    static FACTORY: Lazy<ObjectFactory<$name>> = Lazy::new(|| ObjectFactory::new(None));
                    &FACTORY
                }
            }
        )*
    };
}

loader_handles! {
    ZeDriverHandle => "driver";
    ZeDeviceHandle => "device";
    ZesDriverHandle => "sysman driver";
    ZesDeviceHandle => "sysman device";
    ZesPwrHandle => "power domain";
    ZesEngineHandle => "engine group";
    ZesMemHandle => "memory module";
    ZesFreqHandle => "frequency domain";
    ZesFabricPortHandle => "fabric port";
    ZesRasHandle => "ras error set";
}

/// The record a loader handle points at.
#[repr(C)]
#[derive(Debug)]
pub struct Object<H> {
    handle: H,
    ddi: Arc<DriverDdi>,
}

impl<H: LoaderHandle> Object<H> {
    /// The driver-native handle.
    pub fn handle(&self) -> H {
        self.handle
    }

    /// The dispatch tables of the driver that owns the native handle.
    pub fn ddi(&self) -> &Arc<DriverDdi> {
        &self.ddi
    }
}

type ObjectKey = (usize, usize);

fn key_of<H: LoaderHandle>(raw: H, ddi: &Arc<DriverDdi>) -> ObjectKey {
    (raw.as_raw() as usize, Arc::as_ptr(ddi) as usize)
}

struct FactoryInner<H> {
    objects: StableVec<Box<Object<H>>>,
    index: HashMap<ObjectKey, usize>,
}

/// Issues loader handles for one object category. Wrapping the same (native handle, driver
/// tables) pair twice yields the same loader handle.
pub struct ObjectFactory<H> {
    inner: Mutex<FactoryInner<H>>,
    max: Option<NonZeroUsize>,
}

impl<H: LoaderHandle> ObjectFactory<H> {
    /// Construct a factory. Wrapping fails with out-of-host-memory when an allocation fails or,
    /// with `max` set, once that many records are live.
    pub fn new(max: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(FactoryInner {
                objects: StableVec::new(),
                index: HashMap::new(),
            }),
            max: max.and_then(NonZeroUsize::new),
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.inner.lock().objects.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Returns the loader handle and, if a record was created, its arena index.
    fn insert(
        inner: &mut FactoryInner<H>,
        max: Option<NonZeroUsize>,
        raw: H,
        ddi: &Arc<DriverDdi>,
    ) -> Result<(H, Option<usize>), LoaderError> {
        let key = key_of(raw, ddi);
        if let Some(obj) = inner.index.get(&key).and_then(|idx| inner.objects.get(*idx)) {
            return Ok((H::from_raw(record_addr(obj)), None));
        }

        let oom = || {
            LoaderError::new(LoaderErrorKind::OutOfHostMemory {
                category: H::CATEGORY,
            })
        };
        if max.is_some_and(|max| inner.objects.num_elements() >= max.get()) {
            return Err(oom());
        }
        inner.index.try_reserve(1).map_err(|_| oom())?;
        try_grow(&mut inner.objects).map_err(|_| oom())?;
        let obj = try_box(Object {
            handle: raw,
            ddi: ddi.clone(),
        })
        .ok_or_else(oom)?;
        let addr = record_addr(&obj);
        let idx = inner.objects.push(obj);
        inner.index.insert(key, idx);
        trace!("wrap {} {:p} -> {:p}", H::CATEGORY, raw.as_raw(), addr);
        Ok((H::from_raw(addr), Some(idx)))
    }

    /// Wrap one native handle. A null handle stays null.
    pub fn wrap(&self, raw: H, ddi: &Arc<DriverDdi>) -> Result<H, LoaderError> {
        if raw.is_null() {
            return Ok(raw);
        }
        let mut inner = self.inner.lock();
        Self::insert(&mut inner, self.max, raw, ddi).map(|(h, _)| h)
    }

    /// Wrap every native handle in `handles` in place. On failure no record created by this call
    /// survives and every element of `handles` is nulled.
    pub fn wrap_all(&self, handles: &mut [H], ddi: &Arc<DriverDdi>) -> Result<(), LoaderError> {
        let mut inner = self.inner.lock();
        let mut fresh = vec![];
        for i in 0..handles.len() {
            if handles[i].is_null() {
                continue;
            }
            match Self::insert(&mut inner, self.max, handles[i], ddi) {
                Ok((h, created)) => {
                    handles[i] = h;
                    fresh.extend(created);
                }
                Err(e) => {
                    trace!(
                        "rolling back {} {} handles after {} of {}",
                        fresh.len(),
                        H::CATEGORY,
                        i,
                        handles.len()
                    );
                    for idx in fresh {
                        if let Some(obj) = inner.objects.remove(idx) {
                            inner.index.remove(&key_of(obj.handle, &obj.ddi));
                        }
                    }
                    handles.fill(H::null());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Recover the record behind a loader handle. Returns None for a null handle.
    ///
    /// # Safety
    /// `handle` must be null or have been returned by [ObjectFactory::wrap] or
    /// [ObjectFactory::wrap_all] on this factory.
    pub unsafe fn unwrap(&self, handle: H) -> Option<&Object<H>> {
        let ptr = handle.as_raw() as *const Object<H>;
        unsafe { ptr.as_ref() }
    }
}

// StableVec has no fallible reserve. Grow it only after an allocation of the grown size
// succeeded.
fn try_grow<T>(objects: &mut StableVec<T>) -> Result<(), TryReserveError> {
    if objects.next_push_index() < objects.capacity() {
        return Ok(());
    }
    let additional = objects.capacity().max(8);
    Vec::<T>::new().try_reserve_exact(objects.capacity() + additional)?;
    objects.reserve_exact(additional);
    Ok(())
}

fn try_box<T>(value: T) -> Option<Box<T>> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Some(Box::new(value));
    }
    let ptr = unsafe { alloc::alloc(layout) }.cast::<T>();
    if ptr.is_null() {
        return None;
    }
    // Safety: `ptr` is a fresh allocation with `T`'s layout, which is what Box expects.
    unsafe {
        ptr.write(value);
        Some(Box::from_raw(ptr))
    }
}

fn record_addr<H>(obj: &Object<H>) -> *mut c_void {
    obj as *const Object<H> as *mut c_void
}
