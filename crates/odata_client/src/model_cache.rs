//! Per-version client model cache.

use odata_protocol::ProtocolVersion;
use odata_tracking::{ClientModel, TrackingResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type ModelBuilder = Box<dyn Fn(ProtocolVersion) -> TrackingResult<ClientModel> + Send + Sync>;

/// Lazily built client models, one per protocol version.
///
/// Owned by whatever constructs clients; contexts created from the same
/// cache share the model of their ceiling.
pub struct ModelCache {
    builder: ModelBuilder,
    models: RwLock<HashMap<ProtocolVersion, Arc<ClientModel>>>,
}

impl ModelCache {
    /// Creates a cache that builds models with `builder` on first use.
    pub fn new<F>(builder: F) -> Self
    where
        F: Fn(ProtocolVersion) -> TrackingResult<ClientModel> + Send + Sync + 'static,
    {
        Self {
            builder: Box::new(builder),
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the model for `version`, building it if needed.
    ///
    /// A failed build is not cached.
    pub fn get(&self, version: ProtocolVersion) -> TrackingResult<Arc<ClientModel>> {
        if let Some(model) = self.models.read().get(&version) {
            return Ok(model.clone());
        }

        let mut models = self.models.write();
        if let Some(model) = models.get(&version) {
            return Ok(model.clone());
        }
        let model = Arc::new((self.builder)(version)?);
        debug!(%version, types = model.type_count(), "built client model");
        models.insert(version, model.clone());
        Ok(model)
    }

    /// Number of cached models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Returns true if nothing has been built yet.
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let versions: Vec<ProtocolVersion> = self.models.read().keys().copied().collect();
        f.debug_struct("ModelCache")
            .field("versions", &versions)
            .finish()
    }
}
