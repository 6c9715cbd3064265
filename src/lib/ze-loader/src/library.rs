//! Loaded components: vendor drivers and interception layers.

use std::{
    ffi::c_void,
    fmt::{Debug, Display},
    path::{Path, PathBuf},
    ptr::NonNull,
    sync::Arc,
};

use tracing::{debug, trace};

use crate::{LoaderError, LoaderErrorKind};

/// The address of an exported symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawSymbol(NonNull<c_void>);

// Safety: a symbol address is immutable code, valid for as long as the library that exported it
// stays loaded, which the owning DriverLibrary guarantees.
unsafe impl Send for RawSymbol {}
unsafe impl Sync for RawSymbol {}

impl RawSymbol {
    pub fn new(ptr: *const c_void) -> Option<Self> {
        NonNull::new(ptr as *mut c_void).map(Self)
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Reinterpret the symbol as a function pointer of type `F`.
    ///
    /// # Safety
    /// `F` must be a function pointer type whose signature matches the exported symbol.
    pub unsafe fn cast<F: Copy>(self) -> F {
        static_assertions::assert_eq_size!(*const c_void, fn());
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
        unsafe { std::mem::transmute_copy(&self.0.as_ptr()) }
    }
}

/// A loaded component that exports symbols by name. Drivers, the validation layer, and the
/// tracing layer are all reached through this trait.
pub trait DriverLibrary: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Look up an exported symbol. Absence is not an error at this level; the caller decides
    /// whether the symbol was required.
    fn lookup(&self, symbol: &str) -> Option<RawSymbol>;
}

/// Identity of a loaded library, used to release each library exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryId(usize);

impl LibraryId {
    pub fn of(lib: &Arc<dyn DriverLibrary>) -> Self {
        Self(Arc::as_ptr(lib) as *const () as usize)
    }
}

/// A shared object opened with the platform dynamic loader.
pub struct SharedLibrary {
    name: String,
    lib: libloading::Library,
}

impl SharedLibrary {
    /// Open a library by file name, resolved inside `search_dir` when one is given and through
    /// the platform search path otherwise.
    pub fn open(name: &str, search_dir: Option<&Path>) -> Result<Self, LoaderError> {
        let path = match search_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        };
        debug!("opening {}", path.display());
        let lib = unsafe { libloading::Library::new(&path) }.map_err(|e| {
            LoaderError::new(LoaderErrorKind::LibraryLoadFail {
                library: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        Ok(Self {
            name: name.to_string(),
            lib,
        })
    }
}

impl Debug for SharedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLibrary")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Display for SharedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl DriverLibrary for SharedLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, symbol: &str) -> Option<RawSymbol> {
        let sym = unsafe {
            self.lib
                .get::<unsafe extern "C" fn()>(symbol.as_bytes())
                .ok()?
        };
        let raw = RawSymbol::new(*sym as *const c_void);
        trace!("{}: lookup {} -> {:?}", self.name, symbol, raw);
        raw
    }
}


#[cfg(test)]
mod tests {
    use super::{mock::MockLibrary, *};

    extern "C" fn answer() -> u32 {
        42
    }

    #[test]
    fn cast_symbol() {
        let lib = MockLibrary::new("libmock.so").export("answer", answer as *const c_void);
        let sym = lib.lookup("answer").unwrap();
        let f: extern "C" fn() -> u32 = unsafe { sym.cast() };
        assert_eq!(f(), 42);
        assert!(lib.lookup("missing").is_none());
        assert_eq!(lib.lookups(), 2);
    }

    #[test]
    fn library_identity() {
        let a: Arc<dyn DriverLibrary> = Arc::new(MockLibrary::new("a"));
        let b: Arc<dyn DriverLibrary> = Arc::new(MockLibrary::new("a"));
        assert_eq!(LibraryId::of(&a), LibraryId::of(&a.clone()));
        assert_ne!(LibraryId::of(&a), LibraryId::of(&b));
    }

    #[test]
    fn open_missing_library() {
        let err = SharedLibrary::open("libdefinitely_not_here.so.9", None).unwrap_err();
        assert!(matches!(
            err.kind,
            LoaderErrorKind::LibraryLoadFail { .. }
        ));
    }
}
