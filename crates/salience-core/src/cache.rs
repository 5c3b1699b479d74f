//! One cache instance: every component wired over a shared store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use salience_store::{Clock, KvStore, ScoredMember, SurrealKvStore, TimeoutStore};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anticipated::AnticipatedList;
use crate::attention::AttentionWindow;
use crate::collaborators::{ConsolidationTransform, Extractor, PatternDetector};
use crate::config::SalienceConfig;
use crate::context_frame::{ContextFrame, ContextFrameStore};
use crate::engram::PatternHashStore;
use crate::error::Result;
use crate::four_w::{FourWFrame, FourWHistory};
use crate::frequency::FrequencyTracker;
use crate::hot_cache::{HotFields, HotMemoryCache};
use crate::orchestrator::{AttentionOrchestrator, CycleOutcome};
use crate::rolling::RollingContextWindows;
use crate::shared::Shared;

/// Everything currently relevant to a user, read in one go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relevance {
    pub attended: Vec<ScoredMember>,
    pub anticipated: Vec<String>,
    pub context: Option<ContextFrame>,
    pub four_w: FourWHistory,
    pub generated_at: DateTime<Utc>,
}

pub struct SalienceCacheBuilder {
    store: Arc<dyn KvStore>,
    config: SalienceConfig,
    clock: Option<Arc<dyn Clock>>,
    extractor: Option<Arc<dyn Extractor>>,
    detector: Option<Arc<dyn PatternDetector>>,
    transform: Option<Arc<dyn ConsolidationTransform>>,
}

impl SalienceCacheBuilder {
    pub fn config(mut self, config: SalienceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn PatternDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn transform(mut self, transform: Arc<dyn ConsolidationTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Validate the config and wire the components.
    pub fn build(self) -> Result<SalienceCache> {
        self.config.validate()?;
        let mut shared = Shared::new(self.store, self.config);
        if let Some(clock) = self.clock {
            shared = shared.with_clock(clock);
        }

        let mut orchestrator = AttentionOrchestrator::new(shared.clone());
        if let Some(extractor) = self.extractor {
            orchestrator = orchestrator.with_extractor(extractor);
        }
        if let Some(detector) = self.detector {
            orchestrator = orchestrator.with_detector(detector);
        }
        if let Some(transform) = self.transform {
            orchestrator = orchestrator.with_transform(transform);
        }

        Ok(SalienceCache {
            attention: AttentionWindow::new(shared.clone()),
            hot: HotMemoryCache::new(shared.clone()),
            frequency: FrequencyTracker::new(shared.clone()),
            windows: RollingContextWindows::new(shared.clone()),
            four_w: FourWFrame::new(shared.clone()),
            engrams: PatternHashStore::new(shared.clone()),
            anticipated: AnticipatedList::new(shared.clone()),
            context: ContextFrameStore::new(shared.clone()),
            orchestrator,
            shared,
        })
    }
}

pub struct SalienceCache {
    shared: Shared,
    attention: AttentionWindow,
    hot: HotMemoryCache,
    frequency: FrequencyTracker,
    windows: RollingContextWindows,
    four_w: FourWFrame,
    engrams: PatternHashStore,
    anticipated: AnticipatedList,
    context: ContextFrameStore,
    orchestrator: AttentionOrchestrator,
}

impl SalienceCache {
    pub fn builder(store: Arc<dyn KvStore>) -> SalienceCacheBuilder {
        SalienceCacheBuilder {
            store,
            config: SalienceConfig::default(),
            clock: None,
            extractor: None,
            detector: None,
            transform: None,
        }
    }

    /// Cache over `store` with default collaborators and the system clock.
    pub fn new(store: Arc<dyn KvStore>, config: SalienceConfig) -> Result<Self> {
        Self::builder(store).config(config).build()
    }

    /// Connect to the store named by the environment (see
    /// [`SurrealKvStore::from_env`]) with every operation bounded by the
    /// configured timeout.
    pub async fn connect(config: SalienceConfig) -> Result<Self> {
        config.validate()?;
        let surreal = SurrealKvStore::from_env(config.connect_timeout()).await?;
        let store = TimeoutStore::new(surreal, config.op_timeout());
        info!(op_timeout_ms = config.op_timeout_ms, "salience cache connected");
        Self::new(Arc::new(store), config)
    }

    pub fn config(&self) -> &SalienceConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.shared.store
    }

    pub fn attention(&self) -> &AttentionWindow {
        &self.attention
    }

    pub fn hot_cache(&self) -> &HotMemoryCache {
        &self.hot
    }

    pub fn frequency(&self) -> &FrequencyTracker {
        &self.frequency
    }

    pub fn windows(&self) -> &RollingContextWindows {
        &self.windows
    }

    pub fn four_w(&self) -> &FourWFrame {
        &self.four_w
    }

    pub fn engrams(&self) -> &PatternHashStore {
        &self.engrams
    }

    pub fn anticipated(&self) -> &AnticipatedList {
        &self.anticipated
    }

    pub fn context(&self) -> &ContextFrameStore {
        &self.context
    }

    pub fn orchestrator(&self) -> &AttentionOrchestrator {
        &self.orchestrator
    }

    /// Offer `item` for attention. When it is attended, its content (if
    /// given) goes to the hot tier and the access is counted. Returns whether
    /// the item is attended.
    pub async fn attend(
        &self,
        user: &str,
        item: &str,
        score: f64,
        fields: Option<&HotFields>,
    ) -> Result<bool> {
        if !self.attention.add(user, item, score).await? {
            return Ok(false);
        }
        if let Some(fields) = fields {
            self.hot.put(user, item, fields).await?;
        }
        self.frequency.record_access(item).await?;
        Ok(true)
    }

    /// Hot-tier read that counts a hit as an access.
    pub async fn recall(&self, user: &str, item: &str) -> Result<Option<HotFields>> {
        let fields = self.hot.get(user, item).await?;
        if fields.is_some() {
            self.frequency.record_access(item).await?;
        }
        Ok(fields)
    }

    /// Run one processing cycle for `raw_input`.
    pub async fn process(&self, user: &str, raw_input: &str) -> Result<CycleOutcome> {
        self.orchestrator.process(user, raw_input).await
    }

    /// Top attended items, prefetch hints, context frame and 4W histories.
    pub async fn whats_relevant(&self, user: &str, limit: usize) -> Result<Relevance> {
        let (attended, anticipated, context, four_w) = futures::try_join!(
            self.attention.top_with_scores(user, limit),
            self.anticipated.get(user),
            self.context.get(user),
            self.four_w.get(user),
        )?;
        Ok(Relevance {
            attended,
            anticipated,
            context,
            four_w,
            generated_at: self.shared.clock.now(),
        })
    }
}
