pub mod aggregator;
pub mod comparator;
pub mod engine;
pub mod executor;
pub mod filter;
pub mod planner;
pub mod resolver;
pub mod scanner;
pub mod strategy;

pub use aggregator::{ErrorAggregator, FD_LIMIT_WARNING};
pub use comparator::{compare_objects, DiffResult, ObjectPair};
pub use engine::{SyncEngine, SyncOptions, SyncReport};
pub use executor::{ExecStats, Executor};
pub use filter::{Ineligible, SkipFilter};
pub use planner::{CommandFlags, PlanEntry, PlanSummary, Planner};
pub use resolver::{is_batch, resolve_destination};
pub use scanner::{destination_listing_url, ObjectScanner};
pub use strategy::{SkipReason, SyncStrategy};
