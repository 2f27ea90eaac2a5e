//! Pull-based query execution over `bedrock` tables: operators,
//! predicates, aggregation and selectivity statistics.

pub mod aggregate_executor;
pub mod executor;
pub mod optimizer;
pub mod predicate;

pub use aggregate_executor::{AggOp, Aggregate, Aggregator, IntegerAggregator, StringAggregator};
pub use executor::{Cursor, Delete, Executor, Filter, Insert, Project, SeqScan, TupleIterator};
pub use optimizer::{IntHistogram, StatsRegistry, StringHistogram, TableStats};
pub use predicate::{JoinPredicate, Predicate};
