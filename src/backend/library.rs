//! Lazily loaded accelerator kernels libraries
//!
//! A [`LibraryCache`] holds at most one [`LibraryHandle`] per backend. The first
//! request loads the library under a write lock; later requests only take the read
//! lock to clone the cached handle. Handles are never evicted, so entry points
//! resolved from them stay valid for the life of the process.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::array::Backend;
use crate::error::{KernelError, KernelResult};
use super::registry::{BackendDescriptor, BackendMode};

/// `{prefix}{code}_alloc`: returns a block of `length` elements, or null on failure
pub type AllocFn = unsafe extern "C" fn(length: i64) -> *mut c_void;

/// `{prefix}{code}_dealloc`: releases a block returned by the matching alloc routine
pub type DeallocFn = unsafe extern "C" fn(ptr: *mut c_void);

/// Exported-symbol lookup for an opened library
pub trait SymbolSource: Send + Sync {
    /// Address of the exported symbol `name`
    fn lookup(&self, name: &str) -> Result<*mut c_void, String>;
}

/// Opens kernels libraries
pub trait LibraryLoader: Send + Sync {
    fn open(&self, path: &Path) -> KernelResult<Box<dyn SymbolSource>>;
}

/// Loader backed by the platform dynamic linker
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

struct DylibSource {
    library: libloading::Library,
}

impl SymbolSource for DylibSource {
    fn lookup(&self, name: &str) -> Result<*mut c_void, String> {
        unsafe {
            let symbol: libloading::Symbol<*mut c_void> =
                self.library.get(name.as_bytes()).map_err(|e| e.to_string())?;
            Ok(*symbol)
        }
    }
}

impl LibraryLoader for DylibLoader {
    fn open(&self, path: &Path) -> KernelResult<Box<dyn SymbolSource>> {
        // SAFETY: runs the library's initializers; the path comes from configuration.
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| KernelError::load_error(path, e))?;
        Ok(Box::new(DylibSource { library }))
    }
}

/// Connection to a loaded kernels library
pub struct LibraryHandle {
    backend: Backend,
    path: PathBuf,
    source: Box<dyn SymbolSource>,
}

impl LibraryHandle {
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a named entry point; absent or null symbols are errors
    pub fn resolve_symbol(&self, name: &str) -> KernelResult<EntryPoint> {
        let address = self
            .source
            .lookup(name)
            .map_err(|reason| KernelError::symbol_error(name, reason))?;
        let address = NonNull::new(address)
            .ok_or_else(|| KernelError::symbol_error(name, "symbol resolved to a null address"))?;

        tracing::trace!(symbol = name, library = %self.path.display(), "resolved entry point");
        Ok(EntryPoint {
            name: name.to_string(),
            address,
        })
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .finish()
    }
}

/// A resolved, non-null exported function
#[derive(Debug, Clone)]
pub struct EntryPoint {
    name: String,
    address: NonNull<c_void>,
}

impl EntryPoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> NonNull<c_void> {
        self.address
    }

    /// # Safety
    /// The symbol must have the [`AllocFn`] signature, and its library must still be loaded
    /// when the function is called.
    pub unsafe fn as_alloc(&self) -> AllocFn {
        std::mem::transmute::<*mut c_void, AllocFn>(self.address.as_ptr())
    }

    /// # Safety
    /// The symbol must have the [`DeallocFn`] signature, and its library must still be loaded
    /// when the function is called.
    pub unsafe fn as_dealloc(&self) -> DeallocFn {
        std::mem::transmute::<*mut c_void, DeallocFn>(self.address.as_ptr())
    }
}

/// Process-wide cache of loaded kernels libraries, one per backend
pub struct LibraryCache {
    loader: Arc<dyn LibraryLoader>,
    handles: RwLock<HashMap<Backend, Arc<LibraryHandle>>>,
    loads: AtomicUsize,
}

impl LibraryCache {
    pub fn new(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            loader,
            handles: RwLock::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_dylib_loader() -> Self {
        Self::new(Arc::new(DylibLoader))
    }

    /// Return the cached handle for the descriptor's backend, loading it on first use.
    ///
    /// A failed load leaves the cache empty so the next call tries again.
    pub fn get_or_load(&self, descriptor: &BackendDescriptor) -> KernelResult<Arc<LibraryHandle>> {
        let path = match &descriptor.mode {
            BackendMode::DynamicLibrary { path, .. } => path,
            BackendMode::Direct => {
                return Err(KernelError::configuration_error(format!(
                    "{} backend has no support library",
                    descriptor.backend
                )))
            }
        };

        if let Some(handle) = self.handles.read().get(&descriptor.backend) {
            return Ok(Self::checked(handle, path));
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&descriptor.backend) {
            return Ok(Self::checked(handle, path));
        }

        let source = self.loader.open(path).map_err(|e| {
            tracing::error!(library = %path.display(), error = %e, "failed to load kernels library");
            e
        })?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        tracing::info!(backend = %descriptor.backend, library = %path.display(), "loaded kernels library");

        let handle = Arc::new(LibraryHandle {
            backend: descriptor.backend,
            path: path.clone(),
            source,
        });
        handles.insert(descriptor.backend, handle.clone());
        Ok(handle)
    }

    fn checked(handle: &Arc<LibraryHandle>, requested: &Path) -> Arc<LibraryHandle> {
        if handle.path != requested {
            tracing::warn!(
                cached = %handle.path.display(),
                requested = %requested.display(),
                "kernels library already loaded from a different path; reusing it"
            );
        }
        handle.clone()
    }

    /// Cached handle, if the backend's library has been loaded
    pub fn get(&self, backend: Backend) -> Option<Arc<LibraryHandle>> {
        self.handles.read().get(&backend).cloned()
    }

    /// Number of successful library loads performed by this cache
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LibraryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryCache")
            .field("handles", &*self.handles.read())
            .field("loads", &self.load_count())
            .finish()
    }
}

lazy_static! {
    static ref GLOBAL_LIBRARIES: Arc<LibraryCache> = Arc::new(LibraryCache::with_dylib_loader());
}

/// The process-wide library cache used by default allocators
pub fn global_libraries() -> Arc<LibraryCache> {
    GLOBAL_LIBRARIES.clone()
}
