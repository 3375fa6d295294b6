pub mod aggregator;
pub mod clock;
pub mod condition;
pub mod contract;
pub mod gate;
pub mod history;
pub mod processor;
pub mod redis_store;
pub mod resolver;
pub mod retry;
pub mod router;
pub mod store;

pub use aggregator::{BatchAggregator, InterruptPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{Aggregation, AggregationCondition, ConditionSet, Logic, Operator};
pub use contract::{EmptyResultPolicy, Evaluation};
pub use gate::{GateConfig, GateDecision, NotificationGate};
pub use history::AlertHistory;
pub use processor::{Notice, ProbeProcessor, ProbeSource, ProbeSpec};
pub use redis_store::RedisStore;
pub use resolver::LevelResolver;
pub use retry::{DeliveryOutcome, RetryPolicy};
pub use router::{ChannelRouter, EnvSecrets, MapSecrets, Route, SecretSource};
pub use store::{MemoryStore, StateStore};
