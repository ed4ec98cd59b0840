//! Index, foreign key and uniqueness management for partitioned tables.

mod foreign_key;
mod index;
mod partitioned_foreign_key;
mod uniqueness;

pub use foreign_key::{concurrent_foreign_key_name, ForeignKeyHelpers};
pub use index::IndexHelpers;
pub use partitioned_foreign_key::{PartitionedForeignKey, Validator};
pub use uniqueness::UniquenessHelpers;
