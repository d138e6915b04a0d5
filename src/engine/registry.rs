//! Provider registry and engine lifecycle management.
//!
//! Hosts register named providers with a priority; a session asks the
//! [`EngineLifecycleManager`] for a (transform, downmix) pair. Resolution
//! tries the requested name first, then every registered provider in
//! priority order, mirroring how the surrounding pipeline picks capability
//! modules. Pair acquisition is atomic: if the second engine cannot be
//! bound, the first is released before the error is returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::engine::scratch::AlignedBuf;
use crate::engine::{DownmixEngine, EngineError, EngineHandle, EnginePair, TransformEngine};

/// Factory for a named transform engine.
pub trait TransformProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Higher wins when no exact name is requested.
    fn priority(&self) -> u32;
    fn instantiate(&self) -> Result<Box<dyn TransformEngine>, EngineError>;
}

/// Factory for a named downmix engine.
pub trait DownmixProvider: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> u32;
    fn instantiate(&self) -> Result<Box<dyn DownmixEngine>, EngineError>;
}

/// Table of registered capability providers.
#[derive(Default)]
pub struct EngineRegistry {
    transforms: Vec<Arc<dyn TransformProvider>>,
    downmixes: Vec<Arc<dyn DownmixProvider>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transform(&mut self, provider: Arc<dyn TransformProvider>) {
        debug!(
            "registered transform provider `{}` (priority {})",
            provider.name(),
            provider.priority()
        );
        self.transforms.push(provider);
    }

    pub fn register_downmix(&mut self, provider: Arc<dyn DownmixProvider>) {
        debug!(
            "registered downmix provider `{}` (priority {})",
            provider.name(),
            provider.priority()
        );
        self.downmixes.push(provider);
    }

    /// Candidates in trial order: the requested name first (when registered),
    /// then the rest by descending priority.
    fn transform_candidates(&self, requested: Option<&str>) -> Vec<Arc<dyn TransformProvider>> {
        let mut first = None;
        let mut rest = Vec::new();
        for provider in &self.transforms {
            if first.is_none() && requested == Some(provider.name()) {
                first = Some(provider.clone());
            } else {
                rest.push(provider.clone());
            }
        }
        if let (Some(name), None) = (requested, &first) {
            warn!("requested transform engine `{name}` is not registered, falling back by priority");
        }
        rest.sort_by(|a, b| b.priority().cmp(&a.priority()));
        let mut out = Vec::with_capacity(self.transforms.len());
        out.extend(first);
        out.extend(rest);
        out
    }

    fn downmix_candidates(&self, requested: Option<&str>) -> Vec<Arc<dyn DownmixProvider>> {
        let mut first = None;
        let mut rest = Vec::new();
        for provider in &self.downmixes {
            if first.is_none() && requested == Some(provider.name()) {
                first = Some(provider.clone());
            } else {
                rest.push(provider.clone());
            }
        }
        if let (Some(name), None) = (requested, &first) {
            warn!("requested downmix engine `{name}` is not registered, falling back by priority");
        }
        rest.sort_by(|a, b| b.priority().cmp(&a.priority()));
        let mut out = Vec::with_capacity(self.downmixes.len());
        out.extend(first);
        out.extend(rest);
        out
    }
}

/// Acquires and releases engine pairs against a shared registry, tracking
/// how many handles are currently bound.
pub struct EngineLifecycleManager {
    registry: Arc<EngineRegistry>,
    bound: Arc<AtomicUsize>,
}

impl EngineLifecycleManager {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self {
            registry,
            bound: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of engine handles currently bound through this manager.
    pub fn bound_count(&self) -> usize {
        self.bound.load(Ordering::Acquire)
    }

    /// Bind a (transform, downmix) pair atomically.
    ///
    /// The downmix engine is acquired first, then the transform engine; if
    /// the second acquisition fails the first handle is released before the
    /// error is returned, so no handle stays bound on partial failure.
    pub fn acquire_pair(
        &self,
        transform_pref: Option<&str>,
        downmix_pref: Option<&str>,
    ) -> Result<EnginePair, EngineError> {
        let downmix = self.acquire_downmix(downmix_pref)?;
        let transform = match self.acquire_transform(transform_pref) {
            Ok(handle) => handle,
            Err(err) => {
                drop(downmix);
                return Err(err);
            }
        };
        Ok(EnginePair { transform, downmix })
    }

    /// Release both engines, transform first, then downmix: the reverse of
    /// acquisition order. Scratch buffers inside each handle are freed
    /// before the engine itself.
    pub fn release_pair(&self, pair: EnginePair) {
        drop(pair);
        debug!("engine pair released, {} still bound", self.bound_count());
    }

    fn acquire_transform(
        &self,
        requested: Option<&str>,
    ) -> Result<EngineHandle<dyn TransformEngine>, EngineError> {
        for provider in self.registry.transform_candidates(requested) {
            let engine = match provider.instantiate() {
                Ok(engine) => engine,
                Err(err) => {
                    warn!("transform provider `{}` rejected: {err}", provider.name());
                    continue;
                }
            };
            let scratch = alloc_scratch(engine.scratch_words())?;
            return Ok(EngineHandle::bind(
                engine,
                scratch,
                provider.name().to_owned(),
                "transform",
                self.bound.clone(),
            ));
        }
        Err(EngineError::NoSuitableProvider("transform"))
    }

    fn acquire_downmix(
        &self,
        requested: Option<&str>,
    ) -> Result<EngineHandle<dyn DownmixEngine>, EngineError> {
        for provider in self.registry.downmix_candidates(requested) {
            let engine = match provider.instantiate() {
                Ok(engine) => engine,
                Err(err) => {
                    warn!("downmix provider `{}` rejected: {err}", provider.name());
                    continue;
                }
            };
            let scratch = alloc_scratch(engine.scratch_words())?;
            return Ok(EngineHandle::bind(
                engine,
                scratch,
                provider.name().to_owned(),
                "downmix",
                self.bound.clone(),
            ));
        }
        Err(EngineError::NoSuitableProvider("downmix"))
    }
}

/// Scratch allocation failure is fatal for the whole acquisition, not a
/// reason to try the next provider.
fn alloc_scratch(words: &[usize]) -> Result<Vec<AlignedBuf>, EngineError> {
    words.iter().map(|&w| AlignedBuf::zeroed(w)).collect()
}
