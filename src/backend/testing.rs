//! In-process stand-in for an accelerator kernels library

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::array::{Backend, Element, ElementType};
use crate::error::{KernelError, KernelResult};
use super::accelerator::{symbol_name, SymbolKind};
use super::library::{LibraryLoader, SymbolSource};
use super::registry::{BackendDescriptor, BackendMode};

pub(crate) const FAKE_LIBRARY: &str = "/fake/kernels/libawkward-cuda-kernels.so";
pub(crate) const FAKE_PREFIX: &str = "awkward_cuda_ptr";

lazy_static! {
    // (address, element type) of every block passed to a fake dealloc routine
    static ref FREED: Mutex<Vec<(usize, ElementType)>> = Mutex::new(Vec::new());
}

extern "C" fn fake_alloc<T: Element>(length: i64) -> *mut c_void {
    if length <= 0 {
        return std::ptr::null_mut();
    }
    unsafe { libc::calloc(length as libc::size_t, std::mem::size_of::<T>()) }
}

// Blocks are quarantined instead of freed so addresses stay unique across tests.
extern "C" fn fake_dealloc<T: Element>(ptr: *mut c_void) {
    FREED.lock().push((ptr as usize, T::TYPE));
}

pub(crate) extern "C" fn null_alloc(_length: i64) -> *mut c_void {
    std::ptr::null_mut()
}

/// How many times the block at `address` went through the `dtype` dealloc routine
pub(crate) fn freed_count(address: usize, dtype: ElementType) -> usize {
    FREED.lock().iter().filter(|&&(a, t)| a == address && t == dtype).count()
}

/// How many times the block at `address` went through any dealloc routine
pub(crate) fn freed_total(address: usize) -> usize {
    FREED.lock().iter().filter(|&&(a, _)| a == address).count()
}

#[derive(Clone)]
pub(crate) struct FakeSymbols {
    symbols: HashMap<String, usize>,
}

impl FakeSymbols {
    /// Alloc and dealloc routines for all eight element types
    pub(crate) fn complete(prefix: &str) -> Self {
        let mut fake = Self { symbols: HashMap::new() };
        fake.register::<i8>(prefix);
        fake.register::<u8>(prefix);
        fake.register::<i32>(prefix);
        fake.register::<u32>(prefix);
        fake.register::<i64>(prefix);
        fake.register::<f32>(prefix);
        fake.register::<f64>(prefix);
        fake.register::<bool>(prefix);
        fake
    }

    fn register<T: Element>(&mut self, prefix: &str) {
        let alloc: extern "C" fn(i64) -> *mut c_void = fake_alloc::<T>;
        let dealloc: extern "C" fn(*mut c_void) = fake_dealloc::<T>;
        self.symbols.insert(symbol_name(prefix, T::TYPE, SymbolKind::Alloc), alloc as usize);
        self.symbols.insert(symbol_name(prefix, T::TYPE, SymbolKind::Dealloc), dealloc as usize);
    }

    pub(crate) fn without(mut self, name: &str) -> Self {
        self.symbols.remove(name);
        self
    }

    pub(crate) fn with_address(mut self, name: &str, address: usize) -> Self {
        self.symbols.insert(name.to_string(), address);
        self
    }
}

impl SymbolSource for FakeSymbols {
    fn lookup(&self, name: &str) -> Result<*mut c_void, String> {
        self.symbols
            .get(name)
            .map(|&address| address as *mut c_void)
            .ok_or_else(|| format!("undefined symbol: {}", name))
    }
}

pub(crate) struct FakeLoader {
    symbols: FakeSymbols,
    opens: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl FakeLoader {
    pub(crate) fn new() -> Self {
        Self {
            symbols: FakeSymbols::complete(FAKE_PREFIX),
            opens: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_symbols(mut self, symbols: FakeSymbols) -> Self {
        self.symbols = symbols;
        self
    }

    pub(crate) fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Open attempts, successful or not
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl LibraryLoader for FakeLoader {
    fn open(&self, path: &Path) -> KernelResult<Box<dyn SymbolSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(KernelError::load_error(path, "simulated dlopen failure"));
        }
        Ok(Box::new(self.symbols.clone()))
    }
}

pub(crate) fn accelerator_descriptor() -> BackendDescriptor {
    BackendDescriptor {
        backend: Backend::Accelerator,
        mode: BackendMode::DynamicLibrary {
            path: PathBuf::from(FAKE_LIBRARY),
            symbol_prefix: FAKE_PREFIX.to_string(),
        },
    }
}
