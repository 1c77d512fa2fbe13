use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ViewConfig;
use crate::data::aggregate::{aggregate, Group, GroupKey, Metric};
use crate::data::filter::{filter, FilterSpec, ViewResult};
use crate::data::loader::load_file;
use crate::data::model::Dataset;
use crate::error::{LoadResult, QueryResult};

// ---------------------------------------------------------------------------
// ViewEngine
// ---------------------------------------------------------------------------

/// Owns a loaded dataset and answers queries against it.
///
/// The dataset never changes after construction, so the engine can be
/// shared across threads and queried concurrently. When caching is on,
/// filter results are memoized by [`FilterSpec::canonical_key`]; entries are
/// never evicted.
pub struct ViewEngine {
    dataset: Arc<Dataset>,
    cache: Option<RwLock<HashMap<String, Arc<[usize]>>>>,
}

impl ViewEngine {
    /// Load `path` and wrap it in an engine.
    pub fn open(path: &Path, config: &ViewConfig) -> LoadResult<Self> {
        let dataset = load_file(path, config)?;
        Ok(Self::from_dataset(dataset, config.cache))
    }

    pub fn from_dataset(dataset: impl Into<Arc<Dataset>>, cache: bool) -> Self {
        Self {
            dataset: dataset.into(),
            cache: cache.then(|| RwLock::new(HashMap::new())),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// A handle to the dataset that outlives the engine.
    pub fn shared_dataset(&self) -> Arc<Dataset> {
        Arc::clone(&self.dataset)
    }

    /// [`filter`] through the memo cache. Errors are never cached.
    pub fn filter(&self, spec: &FilterSpec) -> QueryResult<ViewResult<'_>> {
        let Some(cache) = &self.cache else {
            return filter(&self.dataset, spec);
        };

        let key = spec.canonical_key();
        if let Some(rows) = cache.read().get(&key) {
            log::debug!("filter cache hit: {key}");
            return Ok(ViewResult::from_rows(&self.dataset, Arc::clone(rows)));
        }

        let view = filter(&self.dataset, spec)?;
        log::debug!("filter cache miss: {key} ({} rows)", view.len());
        cache.write().entry(key).or_insert_with(|| view.shared_rows());
        Ok(view)
    }

    /// Filter, then group and aggregate.
    pub fn aggregate(
        &self,
        spec: &FilterSpec,
        group_by: &GroupKey,
        metric: &Metric,
    ) -> QueryResult<Vec<Group>> {
        let view = self.filter(spec)?;
        aggregate(&view, group_by, metric)
    }

    /// Number of memoized filter results.
    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.read().len())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.write().clear();
        }
    }
}
