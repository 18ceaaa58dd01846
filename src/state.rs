use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::db::DatabaseProxy;
use crate::services::achievements::CatalogCache;
use crate::services::marketing::MarketingNotifier;
use crate::services::rewards::{DbRewardOrchestrator, RewardPolicy};

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    db_proxy: Option<Arc<DatabaseProxy>>,
    catalog_cache: Arc<CatalogCache>,
    reward_policy: RewardPolicy,
    orchestrator: Arc<DbRewardOrchestrator>,
    marketing: Arc<MarketingNotifier>,
}

impl AppState {
    pub fn new(db_proxy: Option<Arc<DatabaseProxy>>, reward_policy: RewardPolicy) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            db_proxy,
            catalog_cache: Arc::new(CatalogCache::default()),
            orchestrator: Arc::new(DbRewardOrchestrator::new(reward_policy.clone())),
            reward_policy,
            marketing: Arc::new(MarketingNotifier::from_env()),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    pub fn catalog_cache(&self) -> &CatalogCache {
        &self.catalog_cache
    }

    pub fn reward_policy(&self) -> &RewardPolicy {
        &self.reward_policy
    }

    pub fn orchestrator(&self) -> Arc<DbRewardOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn marketing(&self) -> Arc<MarketingNotifier> {
        Arc::clone(&self.marketing)
    }
}
