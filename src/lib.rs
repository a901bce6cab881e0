pub mod bus;
pub mod cache;
pub mod config;
mod directory;
mod error;
pub mod logging;
pub mod model;
mod projection;
pub mod repository;
mod service;

pub use cache::{CacheError, CacheStore, CachedRepository, InMemoryCache};
pub use config::{BrokerConfig, CacheConfig, Config, ConfigError};
pub use directory::{Directory, Stores};
pub use error::{ServiceError, ServiceResult};
pub use model::{
    Account, AccountCriteria, AccountPatch, AccountWithAgents, Agent, AgentCriteria, AgentPatch,
    EntityKind, NewAccount, NewAgent, Region,
};
pub use projection::{RegionalProjection, RegionalView, VipProjection, VipView};
pub use repository::{Entity, InMemoryRepository, Repository, RepositoryError};
pub use service::{AccountService, AgentService, ComplianceCommand, ComplianceHandler};
