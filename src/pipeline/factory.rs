use crate::cache::CacheResource;
use crate::errors::BackendError;
use crate::pipeline::PipelineConfigKey;

/// Graphics backend capable of turning a [`PipelineConfigKey`] into a native
/// pipeline object.
///
/// Implementations must be callable from several threads at once: cache
/// misses for different keys create concurrently, and precompilation runs
/// creations on a blocking worker pool.
pub trait PipelineObjectFactory: Send + Sync + 'static {
    type Handle: CacheResource;

    fn create(&self, key: &PipelineConfigKey) -> Result<Self::Handle, BackendError>;
}

impl<F: PipelineObjectFactory> PipelineObjectFactory for std::sync::Arc<F> {
    type Handle = F::Handle;

    fn create(&self, key: &PipelineConfigKey) -> Result<Self::Handle, BackendError> {
        (**self).create(key)
    }
}
