//! # entiq - statement-oriented entity store and query layer
//!
//! entiq stores knowledge about real-world entities as atomic, immutable
//! statements and reassembles them into entity views at query time. One
//! entity's facts may arrive from many datasets and ingestion runs;
//! statements keep the provenance, assembly merges the picture.
//!
//! ## Core Concepts
//!
//! - **Statement**: one (entity, property, value) fact with provenance
//!   and a deterministic content-hash id
//! - **Entity**: the query-time projection of all statements sharing a
//!   canonical id
//! - **Query**: an immutable, additively built filter/sort/page/aggregate
//!   specification with a flat wire form
//! - **Store / Writer / View**: backend selection, the single write path,
//!   and the read-only query surface
//!
//! ## Usage
//!
//! ```
//! use entiq::{get_store, Entity, Query};
//!
//! # fn main() -> entiq::EntiqResult<()> {
//! let store = get_store("memory://", None, None)?;
//!
//! let mut writer = store.writer();
//! let mut person = Entity::new("p-1", "Person");
//! person.add("name", "Jane Doe");
//! person.add("country", "de");
//! writer.add_entity(&person, "crawl")?;
//! writer.close()?;
//!
//! let view = store.default_view();
//! let query = Query::default()
//!     .filter("schema", "Person")?
//!     .filter("country", "de")?;
//! assert_eq!(view.count(&query)?, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod assemble;
pub mod entity;
pub mod error;
pub mod query;
pub mod resolver;
pub mod schema;
pub mod statement;
pub mod stats;
pub mod store;
pub mod util;

// Re-export primary types at crate root for convenience
pub use aggregate::{AggFunc, AggregationResult, AggregationSpec, AggValue, Aggregator};
pub use assemble::{assemble, AssembleIter, AssembleStreamError};
pub use entity::Entity;
pub use error::{EntiqError, EntiqResult, SchemaConflict, StoreError, ValidationError};
pub use query::{Comparator, Field, Filter, FilterValue, Query, Sort};
pub use resolver::{MemoryResolver, Resolver};
pub use schema::{PropertySpec, PropertyType, SchemaRegistry, SchemaSpec};
pub use statement::{Statement, DEFAULT_DATASET, DEFAULT_ORIGIN};
pub use stats::{Collector, DatasetStats};
pub use store::{get_store, EntityIter, Scope, StatementBackend, Store, View, Writer};
