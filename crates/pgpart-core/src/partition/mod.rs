//! Partitioned sibling creation, monthly partition layout, and cutover.

mod cutover;
mod descriptor;
mod table;

pub use cutover::Cutover;
pub use descriptor::{monthly_partitions, PartitionDescriptor, CATCH_ALL_SUFFIX};
pub use table::TableManager;
