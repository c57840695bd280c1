//! Typed allocator: obtains element blocks and binds their release action

use std::fmt;
use std::sync::Arc;

use crate::backend::{
    dangling_for, global_libraries, AcceleratorBackend, BackendMode, BackendRegistry, BackendStats, HostBackend,
    KernelBackend, LibraryCache,
};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::memory::DeletionStrategy;
use super::devices::Backend;
use super::dtype::{Element, ElementType};
use super::storage::{AnyBuffer, OwnedBuffer};

/// Allocates [`OwnedBuffer`]s on any configured backend
pub struct TypedAllocator {
    registry: BackendRegistry,
    host: Arc<HostBackend>,
    accelerator: Option<Arc<AcceleratorBackend>>,
}

impl TypedAllocator {
    pub fn new(registry: BackendRegistry, libraries: Arc<LibraryCache>) -> Self {
        let accelerator = registry
            .resolve(Backend::Accelerator)
            .and_then(|descriptor| AcceleratorBackend::new(descriptor, libraries))
            .map(Arc::new)
            .ok();

        Self {
            registry,
            host: Arc::new(HostBackend::new()),
            accelerator,
        }
    }

    /// Allocator sharing the process-wide library cache
    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(BackendRegistry::new(&config.accelerator), global_libraries())
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn host_stats(&self) -> BackendStats {
        self.host.stats()
    }

    /// `None` when no accelerator library is configured
    pub fn accelerator_stats(&self) -> Option<BackendStats> {
        self.accelerator.as_ref().map(|a| a.stats())
    }

    fn provider(&self, backend: Backend) -> KernelResult<Arc<dyn KernelBackend>> {
        let descriptor = self.registry.resolve(backend)?;
        match descriptor.mode {
            BackendMode::Direct => Ok(self.host.clone()),
            BackendMode::DynamicLibrary { .. } => self
                .accelerator
                .clone()
                .map(|a| a as Arc<dyn KernelBackend>)
                .ok_or_else(|| KernelError::configuration_error(format!("{} backend is not configured", backend))),
        }
    }

    /// Allocate `length` elements of `T` on `backend`.
    ///
    /// Negative lengths fail before any backend is consulted. Zero-length buffers
    /// allocate nothing, but the backend is still prepared so a missing library or
    /// entry point is reported.
    pub fn allocate<T: Element>(&self, length: i64, backend: Backend) -> KernelResult<OwnedBuffer<T>> {
        if length < 0 {
            return Err(KernelError::invalid_length(length, T::TYPE.name(), backend.name(), "negative length"));
        }
        let count = usize::try_from(length).map_err(|_| {
            KernelError::invalid_length(length, T::TYPE.name(), backend.name(), "length exceeds the address space")
        })?;

        let provider = self.provider(backend)?;
        let ptr = if count == 0 {
            provider.prepare(T::TYPE)?;
            dangling_for(T::TYPE)
        } else {
            provider.allocate(T::TYPE, count)?
        };

        Ok(OwnedBuffer::bind(ptr.cast::<T>(), count, DeletionStrategy::bind(provider)))
    }

    /// Allocate with the element type selected at runtime
    pub fn allocate_dyn(&self, length: i64, dtype: ElementType, backend: Backend) -> KernelResult<AnyBuffer> {
        Ok(match dtype {
            ElementType::Int8 => AnyBuffer::Int8(self.allocate(length, backend)?),
            ElementType::UInt8 => AnyBuffer::UInt8(self.allocate(length, backend)?),
            ElementType::Int32 => AnyBuffer::Int32(self.allocate(length, backend)?),
            ElementType::UInt32 => AnyBuffer::UInt32(self.allocate(length, backend)?),
            ElementType::Int64 => AnyBuffer::Int64(self.allocate(length, backend)?),
            ElementType::Float32 => AnyBuffer::Float32(self.allocate(length, backend)?),
            ElementType::Float64 => AnyBuffer::Float64(self.allocate(length, backend)?),
            ElementType::Bool => AnyBuffer::Bool(self.allocate(length, backend)?),
        })
    }

    /// Allocate from textual identifiers, e.g. `("float32", "cuda")`
    pub fn allocate_named(&self, length: i64, dtype: &str, backend: &str) -> KernelResult<AnyBuffer> {
        let backend: Backend = backend.parse()?;
        let dtype: ElementType = dtype.parse()?;
        self.allocate_dyn(length, dtype, backend)
    }
}

impl fmt::Debug for TypedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedAllocator")
            .field("registry", &self.registry)
            .field("host", &self.host)
            .field("accelerator", &self.accelerator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{freed_count, FakeLoader, FakeSymbols, FAKE_LIBRARY, FAKE_PREFIX};
    use crate::config::{AcceleratorConfig, ConfigBuilder};
    use crate::error::AllocationFailure;
    use std::sync::Barrier;
    use std::time::Duration;

    fn fake_allocator(loader: FakeLoader) -> (TypedAllocator, Arc<LibraryCache>, Arc<FakeLoader>) {
        let loader = Arc::new(loader);
        let cache = Arc::new(LibraryCache::new(loader.clone()));
        let config = ConfigBuilder::new().library_path(FAKE_LIBRARY).build();
        let allocator = TypedAllocator::new(BackendRegistry::new(&config.accelerator), cache.clone());
        (allocator, cache, loader)
    }

    fn unconfigured_allocator() -> (TypedAllocator, Arc<FakeLoader>) {
        let loader = Arc::new(FakeLoader::new());
        let config = AcceleratorConfig {
            library_env: "KERNELMEM_TEST_ALLOCATOR_UNSET".to_string(),
            ..AcceleratorConfig::default()
        };
        let allocator = TypedAllocator::new(BackendRegistry::new(&config), Arc::new(LibraryCache::new(loader.clone())));
        (allocator, loader)
    }

    #[test]
    fn test_every_type_on_every_backend() {
        let (allocator, _cache, _loader) = fake_allocator(FakeLoader::new());
        for backend in Backend::ALL {
            for dtype in ElementType::ALL {
                for length in [0i64, 1, 37] {
                    let buffer = allocator.allocate_dyn(length, dtype, backend).unwrap();
                    assert_eq!(buffer.length(), length as usize);
                    assert_eq!(buffer.backend(), backend);
                    assert_eq!(buffer.element_type(), dtype);

                    let address = buffer.as_raw_ptr() as usize;
                    drop(buffer);
                    if backend == Backend::Accelerator && length > 0 {
                        assert_eq!(freed_count(address, dtype), 1, "{} x {}", length, dtype);
                    }
                }
            }
        }
        let host = allocator.host_stats();
        assert_eq!(host.allocations, host.releases);
        assert_eq!(host.live_bytes, 0);
        let accel = allocator.accelerator_stats().unwrap();
        assert_eq!(accel.allocations, 16);
        assert_eq!(accel.releases, 16);
    }

    #[test]
    fn test_negative_length_rejected_before_backend() {
        let (allocator, cache, loader) = fake_allocator(FakeLoader::new());
        for backend in Backend::ALL {
            let err = allocator.allocate::<f64>(-1, backend).unwrap_err();
            assert!(matches!(err, KernelError::AllocationError { kind: AllocationFailure::InvalidLength, .. }));
            assert!(!err.is_recoverable());
        }
        assert_eq!(loader.opens(), 0);
        assert_eq!(cache.load_count(), 0);
        assert_eq!(allocator.host_stats().allocations, 0);
    }

    #[test]
    fn test_host_release_never_touches_accelerator() {
        let (allocator, cache, loader) = fake_allocator(FakeLoader::new());
        let buffer = allocator.allocate::<i64>(100, Backend::Host).unwrap();
        let copy = buffer.clone();
        drop(buffer);
        drop(copy);

        let stats = allocator.host_stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(loader.opens(), 0);
        assert_eq!(cache.load_count(), 0);
    }

    #[test]
    fn test_accelerator_release_uses_matching_symbol_once() {
        let (allocator, cache, _loader) = fake_allocator(FakeLoader::new());
        let buffer = allocator.allocate::<u32>(10, Backend::Accelerator).unwrap();
        let address = buffer.as_ptr() as usize;

        let copies: Vec<_> = (0..3).map(|_| buffer.clone()).collect();
        assert_eq!(buffer.owners(), 4);
        drop(copies);
        assert_eq!(buffer.owners(), 1);
        assert_eq!(freed_count(address, ElementType::UInt32), 0);

        drop(buffer);
        assert_eq!(freed_count(address, ElementType::UInt32), 1);
        assert_eq!(freed_count(address, ElementType::Int32), 0);
        assert_eq!(cache.load_count(), 1);
    }

    #[test]
    fn test_concurrent_first_use_loads_library_once() {
        let (allocator, cache, loader) = fake_allocator(FakeLoader::new().with_delay(Duration::from_millis(10)));
        let barrier = Barrier::new(100);

        std::thread::scope(|s| {
            for _ in 0..100 {
                s.spawn(|| {
                    barrier.wait();
                    let buffer = allocator.allocate::<f32>(8, Backend::Accelerator).unwrap();
                    assert_eq!(buffer.length(), 8);
                });
            }
        });

        assert_eq!(cache.load_count(), 1);
        assert_eq!(loader.opens(), 1);
        let stats = allocator.accelerator_stats().unwrap();
        assert_eq!(stats.allocations, 100);
        assert_eq!(stats.releases, 100);
    }

    #[test]
    fn test_unknown_backend_identifier() {
        let (allocator, cache, loader) = fake_allocator(FakeLoader::new());
        let err = allocator.allocate_named(16, "int32", "tpu").unwrap_err();
        assert!(matches!(err, KernelError::ConfigurationError(_)));
        assert_eq!(allocator.host_stats().allocations, 0);
        assert_eq!(loader.opens(), 0);
        assert_eq!(cache.load_count(), 0);
    }

    #[test]
    fn test_allocate_named() {
        let (allocator, _cache, _loader) = fake_allocator(FakeLoader::new());
        let buffer = allocator.allocate_named(5, "bool", "cpu").unwrap();
        assert_eq!(buffer.element_type(), ElementType::Bool);
        assert_eq!(buffer.backend(), Backend::Host);
        assert!(buffer.as_typed::<bool>().is_some());
    }

    #[test]
    fn test_unconfigured_accelerator() {
        let (allocator, loader) = unconfigured_allocator();
        let err = allocator.allocate::<u8>(4, Backend::Accelerator).unwrap_err();
        assert!(matches!(err, KernelError::ConfigurationError(_)));
        assert!(allocator.accelerator_stats().is_none());
        assert_eq!(loader.opens(), 0);

        assert!(allocator.allocate::<u8>(4, Backend::Host).is_ok());
    }

    #[test]
    fn test_load_failure_surfaces_and_retries() {
        let (allocator, cache, _loader) = fake_allocator(FakeLoader::new().failing_first(1));
        let err = allocator.allocate::<i8>(4, Backend::Accelerator).unwrap_err();
        assert!(matches!(err, KernelError::LoadError { .. }));
        assert!(err.is_recoverable());

        let buffer = allocator.allocate::<i8>(4, Backend::Accelerator).unwrap();
        assert_eq!(buffer.backend(), Backend::Accelerator);
        assert_eq!(cache.load_count(), 1);
    }

    #[test]
    fn test_zero_length_accelerator_buffer() {
        let (allocator, cache, loader) = fake_allocator(FakeLoader::new());
        let buffer = allocator.allocate::<f64>(0, Backend::Accelerator).unwrap();
        assert!(buffer.is_empty());
        assert!(!buffer.as_ptr().is_null());
        let address = buffer.as_ptr() as usize;
        drop(buffer);

        assert_eq!(loader.opens(), 1);
        assert_eq!(cache.load_count(), 1);
        assert_eq!(freed_count(address, ElementType::Float64), 0);
        let stats = allocator.accelerator_stats().unwrap();
        assert_eq!(stats.allocations, 0);
        assert_eq!(stats.releases, 0);
    }

    #[test]
    fn test_zero_length_accelerator_buffer_reports_load_failure() {
        let (allocator, cache, _loader) = fake_allocator(FakeLoader::new().failing_first(usize::MAX));
        let err = allocator.allocate::<i32>(0, Backend::Accelerator).unwrap_err();
        assert!(matches!(err, KernelError::LoadError { ref path, .. } if path.to_str() == Some(FAKE_LIBRARY)));
        assert_eq!(cache.load_count(), 0);
    }

    #[test]
    fn test_zero_length_accelerator_buffer_reports_missing_entry_point() {
        let symbols = FakeSymbols::complete(FAKE_PREFIX).without("awkward_cuda_ptriU32_alloc");
        let (allocator, _cache, _loader) = fake_allocator(FakeLoader::new().with_symbols(symbols));
        let err = allocator.allocate::<u32>(0, Backend::Accelerator).unwrap_err();
        assert!(matches!(err, KernelError::SymbolResolutionError { ref symbol, .. } if symbol == "awkward_cuda_ptriU32_alloc"));

        let symbols = FakeSymbols::complete(FAKE_PREFIX).without("awkward_cuda_ptri8_dealloc");
        let (allocator, _cache, _loader) = fake_allocator(FakeLoader::new().with_symbols(symbols));
        let err = allocator.allocate::<i8>(0, Backend::Accelerator).unwrap_err();
        assert!(matches!(err, KernelError::SymbolResolutionError { ref symbol, .. } if symbol == "awkward_cuda_ptri8_dealloc"));
    }

    #[test]
    fn test_missing_dealloc_entry_point_does_not_panic() {
        let symbols = FakeSymbols::complete(FAKE_PREFIX).without("awkward_cuda_ptrb_dealloc");
        let (allocator, _cache, _loader) = fake_allocator(FakeLoader::new().with_symbols(symbols));

        let buffer = allocator.allocate::<bool>(3, Backend::Accelerator).unwrap();
        let address = buffer.as_ptr() as usize;
        drop(buffer);

        assert_eq!(freed_count(address, ElementType::Bool), 0);
        let stats = allocator.accelerator_stats().unwrap();
        assert_eq!(stats.failed_releases, 1);
        assert_eq!(stats.releases, 0);
    }

    #[test]
    fn test_strategy_matches_allocation() {
        let (allocator, _cache, _loader) = fake_allocator(FakeLoader::new());
        let buffer = allocator.allocate::<u8>(2, Backend::Accelerator).unwrap();
        assert_eq!(buffer.deleter().backend(), Backend::Accelerator);
        assert_eq!(buffer.deleter().element_type(), ElementType::UInt8);
    }
}
