// =============================================================================
// Services — process-wide wiring
// =============================================================================
//
// An explicit, construct-once `Services` built from `Config` at startup and
// threaded through the CLI, the scheduler, and the API router via `Arc`.
// Nothing here is mutated after construction except through the `Scheduler`
// handle and the `EventBus`, both of which already guard their own state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::AgentRegistry;
use crate::config::Config;
use crate::events::EventBus;
use crate::ledger::AccountRegistry;
use crate::market_snapshot::SnapshotCache;
use crate::model::registry::{self, ModelKeys};
use crate::model::ModelClient;
use crate::pipeline::PipelineContext;
use crate::scheduler::Scheduler;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::venue::binance_futures::BinanceFuturesClient;
use crate::venue::mock::MockVenue;
use crate::venue::VenueClient;

pub struct Services {
    pub config: Config,
    pub agents: Arc<AgentRegistry>,
    pub accounts: Arc<AccountRegistry>,
    pub venue: Arc<dyn VenueClient>,
    pub snapshots: Arc<SnapshotCache>,
    pub store: Arc<dyn Store>,
    pub events: Arc<EventBus>,
    pub models: HashMap<String, Arc<dyn ModelClient>>,
}

impl Services {
    /// Builds every long-lived dependency from `config`. Reads API keys and
    /// the database path from the environment rather than the config file,
    /// keeping secrets out of the on-disk configuration entirely.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let agents = AgentRegistry::from_config(&config);
        if agents.is_empty() {
            anyhow::bail!("no agents configured");
        }

        let starting_balances: HashMap<String, rust_decimal::Decimal> = config
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.starting_balance))
            .collect();
        let accounts = Arc::new(AccountRegistry::from_agents(&agents, &starting_balances));

        let venue: Arc<dyn VenueClient> = if config.demo_mode {
            let mock = Arc::new(MockVenue::new());
            for symbol in &config.symbols {
                mock.set_price(symbol, rust_decimal_macros::dec!(100));
            }
            mock
        } else {
            let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
            let secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
            Arc::new(BinanceFuturesClient::new(api_key, secret))
        };
        venue.assert_one_way_mode().await?;

        let snapshots = Arc::new(SnapshotCache::new(
            venue.clone(),
            std::time::Duration::from_secs(config.snapshot_ttl_secs),
            config.indicator_interval.clone(),
            config.indicator_lookback,
        ));

        let database_path = config
            .database_path
            .clone()
            .unwrap_or_else(|| "trading_arena.db".to_string());
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&database_path).await?);

        let events = Arc::new(EventBus::new());

        let model_keys = ModelKeys {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_compatible_base_url: std::env::var("OPENAI_COMPATIBLE_BASE_URL").ok(),
        };
        let models = registry::build_registry(&agents, &model_keys);

        Ok(Self {
            config,
            agents: Arc::new(agents),
            accounts,
            venue,
            snapshots,
            store,
            events,
            models,
        })
    }

    /// Builds the pipeline's shared context. All fields are `Arc` clones of
    /// `Services`' own state, so every call shares the same `AccountRegistry`
    /// — account state persists across cycles rather than resetting.
    pub fn pipeline_context(&self) -> Arc<PipelineContext> {
        Arc::new(PipelineContext {
            agents: self.agents.clone(),
            accounts: self.accounts.clone(),
            models: self.models.clone(),
            venue: self.venue.clone(),
            snapshots: self.snapshots.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
        })
    }

    pub fn spawn_scheduler(&self, ctx: Arc<PipelineContext>) -> Scheduler {
        Scheduler::spawn(ctx, std::time::Duration::from_secs(self.config.cycle_period_secs))
    }
}
