//! Statement storage.
//!
//! The store splits into three roles: [`Store`] selects a backend and a
//! scope, [`Writer`] is the only write path (buffered, single-owner),
//! and [`View`] is the read path (stateless, reentrant). All of them are
//! thin shells over an object-safe [`StatementBackend`].
//!
//! # Examples
//!
//! ```
//! use entiq::{get_store, Entity, Query};
//!
//! # fn main() -> entiq::EntiqResult<()> {
//! let store = get_store("memory://", None, None)?;
//! let mut writer = store.writer();
//! let mut org = Entity::new("org-1", "Company");
//! org.add("name", "ACME Inc.");
//! writer.add_entity(&org, "crawl")?;
//! writer.close()?;
//!
//! let view = store.default_view();
//! assert!(view.has_entity("org-1")?);
//! let hits = view.query(&Query::default().filter("schema", "Company")?)?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod lake;
pub mod memory;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "redb")]
pub mod kv;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "sql")]
pub mod sql;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{AggregationResult, Aggregator};
use crate::assemble::{AssembleIter, AssembleStreamError};
use crate::entity::Entity;
use crate::error::{EntiqError, EntiqResult, StoreError};
use crate::query::{Comparator, Field, FilterValue, Query};
use crate::resolver::Resolver;
use crate::schema::SchemaRegistry;
use crate::statement::Statement;
use crate::stats::{Collector, DatasetStats};

/// A lazily produced, canonical-id-ascending statement stream.
pub type StatementStream = Box<dyn Iterator<Item = Result<Statement, StoreError>> + Send>;

/// Contract every storage backend implements.
///
/// Backends store statements, never entities. All iteration is
/// canonical-id ascending so that entity assembly can run in a single
/// streaming pass; implementations fetch in bounded chunks and hold no
/// read transaction across yields.
pub trait StatementBackend: Send + Sync {
    /// Persists a batch of statements. Re-writing an already stored
    /// statement id is a no-op, never a duplicate.
    fn write_batch(&self, statements: &[Statement]) -> Result<(), StoreError>;

    /// All statements filed under one canonical id.
    fn get_statements(&self, canonical_id: &str) -> Result<Vec<Statement>, StoreError>;

    /// Statements of the given datasets (all datasets when empty),
    /// canonical-id ascending.
    fn iter_statements(&self, datasets: &BTreeSet<String>) -> StatementStream;

    /// Removes every statement filed under one entity id.
    fn delete_entity(&self, entity_id: &str) -> Result<(), StoreError>;

    /// Removes every statement of one dataset.
    fn delete_dataset(&self, dataset: &str) -> Result<(), StoreError>;

    /// Distinct dataset names present in the backend.
    fn dataset_names(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Distinct origin tags present in the backend.
    fn origin_names(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Preferred write batch size.
    fn batch_size(&self) -> usize {
        10_000
    }
}

/// A named set of datasets a store or view is restricted to.
///
/// Scopes are hierarchical by construction: a catalog scope is the union
/// of its members' leaf dataset names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scope {
    /// Display name of the scope.
    pub name: String,
    /// Leaf dataset names; empty means unrestricted.
    pub datasets: BTreeSet<String>,
}

impl Scope {
    /// Scope over a single dataset.
    #[must_use]
    pub fn dataset(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            datasets: std::iter::once(name.clone()).collect(),
            name,
        }
    }

    /// Scope over the union of member scopes' datasets.
    #[must_use]
    pub fn catalog(name: impl Into<String>, members: impl IntoIterator<Item = Scope>) -> Self {
        let mut datasets = BTreeSet::new();
        for member in members {
            datasets.extend(member.datasets);
        }
        Self {
            name: name.into(),
            datasets,
        }
    }

    /// An unrestricted scope: every dataset the backend holds.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns true if the scope does not restrict datasets.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Returns true if the dataset falls inside the scope.
    #[must_use]
    pub fn contains(&self, dataset: &str) -> bool {
        self.is_unrestricted() || self.datasets.contains(dataset)
    }
}

/// A backend-polymorphic statement store.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StatementBackend>,
    registry: Arc<SchemaRegistry>,
    resolver: Option<Arc<dyn Resolver>>,
    scope: Option<Scope>,
    downgrade: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("scope", &self.scope)
            .field("downgrade", &self.downgrade)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates a store over a backend with the built-in registry, no fixed
    /// scope and no resolver.
    #[must_use]
    pub fn new(backend: Arc<dyn StatementBackend>) -> Self {
        Self {
            backend,
            registry: SchemaRegistry::builtin(),
            resolver: None,
            scope: None,
            downgrade: false,
        }
    }

    /// Replaces the schema registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Attaches an identity resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Fixes the store to a dataset scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Permits assembly to downgrade incomparable schemas to their
    /// nearest shared ancestor instead of failing with a conflict.
    #[must_use]
    pub fn with_downgrade(mut self) -> Self {
        self.downgrade = true;
        self
    }

    /// The schema registry entities assemble against.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The single write path into the store.
    #[must_use]
    pub fn writer(&self) -> Writer {
        Writer {
            backend: self.backend.clone(),
            resolver: self.resolver.clone(),
            buffer: Vec::new(),
            batch_size: self.backend.batch_size(),
            closed: false,
        }
    }

    /// A view over the store's own scope.
    #[must_use]
    pub fn default_view(&self) -> View {
        self.view(self.scope.clone().unwrap_or_default())
    }

    /// A view restricted to the given scope.
    #[must_use]
    pub fn view(&self, scope: Scope) -> View {
        View {
            backend: self.backend.clone(),
            registry: self.registry.clone(),
            resolver: self.resolver.clone(),
            scope,
            downgrade: self.downgrade,
        }
    }

    /// Lazily iterates all assembled entities, canonical-id ascending.
    /// Each call restarts from the beginning.
    #[must_use]
    pub fn iterate(&self, dataset: Option<&str>) -> EntityIter {
        let datasets: BTreeSet<String> = match dataset {
            Some(name) => std::iter::once(name.to_string()).collect(),
            None => self
                .scope
                .as_ref()
                .map(|s| s.datasets.clone())
                .unwrap_or_default(),
        };
        EntityIter::new(
            self.registry.clone(),
            self.backend.iter_statements(&datasets),
            self.downgrade,
        )
    }

    /// The fixed scope, or a scope introspected from the backend's
    /// dataset names.
    pub fn get_scope(&self) -> Result<Scope, StoreError> {
        if let Some(scope) = &self.scope {
            return Ok(scope.clone());
        }
        Ok(Scope {
            name: String::new(),
            datasets: self.backend.dataset_names()?,
        })
    }

    /// Distinct origin tags across all stored statements.
    pub fn get_origins(&self) -> Result<BTreeSet<String>, StoreError> {
        self.backend.origin_names()
    }
}

/// Buffered, single-owner write handle.
///
/// Statements buffer up to the backend's batch size and flush as one
/// batch. A flush failure aborts only the in-flight batch; the buffer is
/// kept so the flush can be retried.
pub struct Writer {
    backend: Arc<dyn StatementBackend>,
    resolver: Option<Arc<dyn Resolver>>,
    buffer: Vec<Statement>,
    batch_size: usize,
    closed: bool,
}

impl Writer {
    /// Buffers one statement, canonicalizing its id through the resolver.
    pub fn add_statement(&mut self, statement: Statement) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::ClosedWriter);
        }
        let statement = match &self.resolver {
            Some(resolver) => {
                let canonical = resolver.canonicalize(&statement.entity_id);
                statement.with_canonical_id(canonical)
            }
            None => statement,
        };
        self.buffer.push(statement);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Decomposes an entity into origin-tagged statements and buffers
    /// them. Returns the number of statements produced.
    pub fn add_entity(&mut self, entity: &Entity, origin: &str) -> Result<usize, StoreError> {
        let statements = entity.to_statements(origin);
        let count = statements.len();
        for statement in statements {
            self.add_statement(statement)?;
        }
        Ok(count)
    }

    /// Writes the buffered batch. Idempotent on an empty buffer.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        debug!(count = self.buffer.len(), "flushing statement batch");
        self.backend.write_batch(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Flushes and consumes the writer.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }

    /// Removes every statement filed under one entity id.
    pub fn delete_entity(&mut self, entity_id: &str) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::ClosedWriter);
        }
        self.flush()?;
        self.backend.delete_entity(entity_id)
    }

    /// Removes every statement of one dataset.
    pub fn delete_dataset(&mut self, dataset: &str) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::ClosedWriter);
        }
        self.flush()?;
        self.backend.delete_dataset(dataset)
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.closed && !self.buffer.is_empty() {
            if let Err(err) = self.flush() {
                warn!(error = %err, "dropped writer with unflushed statements");
            }
        }
    }
}

/// Lazily assembled entity stream over a statement iterator.
pub struct EntityIter {
    inner: AssembleIter<StatementStream>,
}

impl EntityIter {
    fn new(registry: Arc<SchemaRegistry>, statements: StatementStream, downgrade: bool) -> Self {
        Self {
            inner: AssembleIter::new(registry, statements, downgrade),
        }
    }
}

impl Iterator for EntityIter {
    type Item = EntiqResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(entity) => Some(Ok(entity)),
            Err(AssembleStreamError::Source(err)) => Some(Err(EntiqError::Store(err))),
            Err(AssembleStreamError::Conflict(conflict)) => {
                Some(Err(EntiqError::Conflict(conflict)))
            }
        }
    }
}

/// Read-only query surface over a scoped backend.
#[derive(Clone)]
pub struct View {
    backend: Arc<dyn StatementBackend>,
    registry: Arc<SchemaRegistry>,
    resolver: Option<Arc<dyn Resolver>>,
    scope: Scope,
    downgrade: bool,
}

impl View {
    /// The dataset scope this view reads within.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Fetches one assembled entity. Missing and out-of-scope ids both
    /// come back as `None`, never as an error.
    pub fn get_entity(&self, entity_id: &str) -> EntiqResult<Option<Entity>> {
        let canonical = match &self.resolver {
            Some(resolver) => resolver.canonicalize(entity_id),
            None => entity_id.to_string(),
        };
        let statements: Vec<Statement> = self
            .backend
            .get_statements(&canonical)
            .map_err(EntiqError::Store)?
            .into_iter()
            .filter(|s| self.scope.contains(&s.dataset))
            .collect();
        let entity = crate::assemble::assemble(&self.registry, statements, self.downgrade)?;
        Ok(entity)
    }

    /// Returns true if the entity exists in scope.
    pub fn has_entity(&self, entity_id: &str) -> EntiqResult<bool> {
        Ok(self.get_entity(entity_id)?.is_some())
    }

    /// All assembled entities in scope, canonical-id ascending.
    #[must_use]
    pub fn entities(&self) -> EntityIter {
        EntityIter::new(
            self.registry.clone(),
            self.backend.iter_statements(&self.scope.datasets),
            self.downgrade,
        )
    }

    /// Runs a query: filter, sort, paginate.
    ///
    /// A `canonical_id` equality clause short-circuits to a point lookup.
    /// The `reverse` adjacency clause is a linear scan over the scope.
    pub fn query(&self, query: &Query) -> EntiqResult<Vec<Entity>> {
        if let Some(id) = point_lookup_id(query) {
            let hit = self
                .get_entity(&id)?
                .filter(|entity| query.matches(entity));
            let mut hits: Vec<Entity> = hit.into_iter().skip(query.offset).collect();
            if let Some(limit) = query.limit {
                hits.truncate(limit);
            }
            return Ok(hits);
        }

        let Some(datasets) = self.iteration_datasets(query) else {
            return Ok(Vec::new());
        };
        let mut matched = Vec::new();
        let unsorted_cap = if query.sorts.is_empty() {
            query.limit.map(|limit| limit + query.offset)
        } else {
            None
        };
        for entity in EntityIter::new(
            self.registry.clone(),
            self.backend.iter_statements(&datasets),
            self.downgrade,
        ) {
            let entity = entity?;
            if query.matches(&entity) {
                matched.push(entity);
                if let Some(cap) = unsorted_cap {
                    if matched.len() >= cap {
                        break;
                    }
                }
            }
        }
        query.sort_entities(&mut matched);
        let mut out: Vec<Entity> = matched.into_iter().skip(query.offset).collect();
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Cardinality of the filtered, unpaginated result set. Entities are
    /// never materialized beyond the one being tested.
    pub fn count(&self, query: &Query) -> EntiqResult<usize> {
        let mut count = 0;
        self.for_each_match(query, |_| count += 1)?;
        Ok(count)
    }

    /// Runs the query's aggregations over the filtered, unpaginated
    /// result set.
    pub fn aggregations(&self, query: &Query) -> EntiqResult<AggregationResult> {
        let mut aggregator = Aggregator::new(self.registry.clone(), query.aggregations.clone());
        self.for_each_match(query, |entity| aggregator.collect(entity))?;
        Ok(aggregator.finish())
    }

    /// Collects dataset stats over the filtered, unpaginated result set.
    pub fn stats(&self, query: &Query) -> EntiqResult<DatasetStats> {
        let mut collector = Collector::new(self.registry.clone());
        self.for_each_match(query, |entity| collector.collect(entity))?;
        Ok(collector.finish())
    }

    /// Resolver-ranked duplicate candidates of an entity, as assembled
    /// entities with their similarity scores, best first.
    pub fn similar(&self, entity_id: &str) -> EntiqResult<Vec<(Entity, f64)>> {
        let Some(resolver) = &self.resolver else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (candidate, score) in resolver.candidates(entity_id) {
            if let Some(entity) = self.get_entity(&candidate)? {
                out.push((entity, score));
            }
        }
        Ok(out)
    }

    fn for_each_match(
        &self,
        query: &Query,
        mut f: impl FnMut(&Entity),
    ) -> EntiqResult<()> {
        let Some(datasets) = self.iteration_datasets(query) else {
            return Ok(());
        };
        for entity in EntityIter::new(
            self.registry.clone(),
            self.backend.iter_statements(&datasets),
            self.downgrade,
        ) {
            let entity = entity?;
            if query.matches(&entity) {
                f(&entity);
            }
        }
        Ok(())
    }

    /// Dataset set to iterate for a query: the view scope narrowed by the
    /// query's dataset clauses. `None` means the intersection is provably
    /// empty and nothing can match.
    fn iteration_datasets(&self, query: &Query) -> Option<BTreeSet<String>> {
        let from_query = query.dataset_names();
        if from_query.is_empty() {
            return Some(self.scope.datasets.clone());
        }
        if self.scope.is_unrestricted() {
            return Some(from_query);
        }
        let narrowed: BTreeSet<String> = self
            .scope
            .datasets
            .intersection(&from_query)
            .cloned()
            .collect();
        if narrowed.is_empty() {
            None
        } else {
            Some(narrowed)
        }
    }
}

fn point_lookup_id(query: &Query) -> Option<String> {
    query.filters().find_map(|clause| {
        match (&clause.field, clause.comparator, &clause.value) {
            (Field::CanonicalId, Comparator::Eq, FilterValue::One(id)) => Some(id.clone()),
            _ => None,
        }
    })
}

/// Opens a store from a URI.
///
/// Recognized schemes: `memory://`, `lake+file://<path>`, any scheme
/// containing `sql` (the URI is the connection string), `redb://<path>`,
/// `redis://…` and `http(s)+catalog://<dataset>[:<api-key>]@<host>`.
/// Schemes whose backend was compiled out fail with
/// [`StoreError::BackendUnavailable`]; anything unrecognized fails with
/// [`StoreError::UnsupportedScheme`]. Both are raised here, at
/// construction, never at first use.
pub fn get_store(
    uri: &str,
    scope: Option<Scope>,
    resolver: Option<Arc<dyn Resolver>>,
) -> Result<Store, StoreError> {
    debug!(uri, "opening store");
    let backend = open_backend(uri)?;
    let mut store = Store::new(backend);
    if let Some(scope) = scope {
        store = store.with_scope(scope);
    }
    if let Some(resolver) = resolver {
        store = store.with_resolver(resolver);
    }
    Ok(store)
}

fn open_backend(uri: &str) -> Result<Arc<dyn StatementBackend>, StoreError> {
    if uri == "memory://" || uri == "memory" {
        return Ok(Arc::new(memory::MemoryBackend::new()));
    }
    if let Some(rest) = uri.strip_prefix("lake+") {
        let path = rest
            .strip_prefix("file://")
            .unwrap_or(rest);
        return Ok(Arc::new(lake::LakeBackend::open(path)?));
    }
    let scheme = uri.split("://").next().unwrap_or(uri);
    if scheme.contains("sql") {
        #[cfg(feature = "sql")]
        {
            return Ok(Arc::new(sql::SqlBackend::open(uri)?));
        }
        #[cfg(not(feature = "sql"))]
        {
            return Err(StoreError::BackendUnavailable {
                scheme: scheme.to_string(),
                feature: "sql",
            });
        }
    }
    if scheme == "redb" {
        #[cfg(feature = "redb")]
        {
            let path = uri.strip_prefix("redb://").unwrap_or(uri);
            return Ok(Arc::new(kv::RedbBackend::open(path)?));
        }
        #[cfg(not(feature = "redb"))]
        {
            return Err(StoreError::BackendUnavailable {
                scheme: scheme.to_string(),
                feature: "redb",
            });
        }
    }
    if scheme == "redis" || scheme == "rediss" {
        #[cfg(feature = "redis")]
        {
            return Ok(Arc::new(redis::RedisBackend::open(uri)?));
        }
        #[cfg(not(feature = "redis"))]
        {
            return Err(StoreError::BackendUnavailable {
                scheme: scheme.to_string(),
                feature: "redis",
            });
        }
    }
    if scheme == "http+catalog" || scheme == "https+catalog" {
        #[cfg(feature = "http")]
        {
            return Ok(Arc::new(http::CatalogBackend::open(uri)?));
        }
        #[cfg(not(feature = "http"))]
        {
            return Err(StoreError::BackendUnavailable {
                scheme: scheme.to_string(),
                feature: "http",
            });
        }
    }
    Err(StoreError::UnsupportedScheme(uri.to_string()))
}
