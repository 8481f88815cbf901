//! Fluent queries over one annotation level.
//!
//! ```rust,ignore
//! let rows = corpus
//!     .query("phone")
//!     .filter(Filter::eq("phone.label", "k"))
//!     .column("phone.word.label", "word_label")
//!     .all()?;
//! ```
//!
//! A [`QueryBuilder`] only records state; nothing is resolved until a
//! terminal (`all`, `count`, `aggregate`, `compile`, ...) runs, and every
//! path is validated against the schema before a statement reaches the store.

pub mod compile;
pub mod hydrate;
pub mod path;

use crate::collab::{TokenTrack, TrackKey, TrackStore};
use crate::corpus::Corpus;
use crate::model::{PropertyMap, Value};
use crate::storage::StorageBackend;
use crate::{Error, Result};

pub use compile::{compile, ColumnInfo, CompiledQuery, Projection, QuerySpec};
pub use hydrate::Row;
pub use path::{resolve, resolve_steps, ResolvedPath, Step};

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Bound as a parameter, never inlined.
    Value(Value),
    /// Another attribute path of the same query.
    Path(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Regex,
}

/// One conjunct of a query's WHERE.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare { path: String, op: Comparison, rhs: Operand },
    /// Membership of the nodes `path` addresses in a registered subset.
    Subset { path: String, subset: String, negated: bool },
}

impl Filter {
    pub fn compare(path: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Filter::Compare { path: path.into(), op, rhs: Operand::Value(value.into()) }
    }

    /// Compare two paths: `phone.begin == phone.word.begin`.
    pub fn paths(path: impl Into<String>, op: Comparison, other: impl Into<String>) -> Self {
        Filter::Compare { path: path.into(), op, rhs: Operand::Path(other.into()) }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparison::Eq, value)
    }

    pub fn neq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparison::Neq, value)
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparison::Lt, value)
    }

    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparison::Lte, value)
    }

    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparison::Gt, value)
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparison::Gte, value)
    }

    pub fn is_in<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let list = Value::List(values.into_iter().map(Into::into).collect());
        Self::compare(path, Comparison::In, list)
    }

    pub fn not_in<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let list = Value::List(values.into_iter().map(Into::into).collect());
        Self::compare(path, Comparison::NotIn, list)
    }

    /// Full-match regex, as Cypher's `=~`.
    pub fn regex(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(path, Comparison::Regex, Value::String(pattern.into()))
    }

    pub fn in_subset(path: impl Into<String>, subset: impl Into<String>) -> Self {
        Filter::Subset { path: path.into(), subset: subset.into(), negated: false }
    }

    pub fn not_in_subset(path: impl Into<String>, subset: impl Into<String>) -> Self {
        Filter::Subset { path: path.into(), subset: subset.into(), negated: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFunction {
    Count,
    Min,
    Max,
    Average,
    Median,
    Quantile(f64),
    StdDev,
    Sum,
}

impl AggregateFunction {
    fn prefix(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Average => "average",
            AggregateFunction::Median => "median",
            AggregateFunction::Quantile(_) => "quantile",
            AggregateFunction::StdDev => "stdev",
            AggregateFunction::Sum => "sum",
        }
    }
}

/// An aggregate output column.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// `None` counts the bound tokens themselves.
    pub path: Option<String>,
    pub name: String,
}

impl Aggregate {
    /// Aggregate over `path`, named `<function>_<path with dots as underscores>`.
    pub fn over(function: AggregateFunction, path: impl Into<String>) -> Self {
        let path = path.into();
        let name = format!("{}_{}", function.prefix(), path.replace('.', "_"));
        Self { function, path: Some(path), name }
    }

    pub fn count() -> Self {
        Self { function: AggregateFunction::Count, path: None, name: "count".into() }
    }

    pub fn min(path: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Min, path)
    }

    pub fn max(path: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Max, path)
    }

    pub fn average(path: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Average, path)
    }

    pub fn median(path: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Median, path)
    }

    pub fn quantile(path: impl Into<String>, q: f64) -> Self {
        Self::over(AggregateFunction::Quantile(q), path)
    }

    pub fn std_dev(path: impl Into<String>) -> Self {
        Self::over(AggregateFunction::StdDev, path)
    }

    pub fn sum(path: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Sum, path)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Query under construction, bound to one level of a corpus.
pub struct QueryBuilder<'c, B: StorageBackend> {
    corpus: &'c Corpus<B>,
    spec: QuerySpec,
}

impl<'c, B: StorageBackend> QueryBuilder<'c, B> {
    pub(crate) fn new(corpus: &'c Corpus<B>, level: impl Into<String>) -> Self {
        Self { corpus, spec: QuerySpec { level: level.into(), ..QuerySpec::default() } }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Add a conjunct. Filters are ANDed in declaration order.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.spec.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.spec.filters.extend(filters);
        self
    }

    pub fn column(mut self, path: impl Into<String>, name: impl Into<String>) -> Self {
        self.spec.columns.push((path.into(), name.into()));
        self
    }

    /// Group by a declared column.
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.spec.group_by.push(column.into());
        self
    }

    /// Order by a declared column name or by a path.
    pub fn order_by(mut self, key: impl Into<String>) -> Self {
        self.spec.order_by.push((key.into(), false));
        self
    }

    pub fn order_by_desc(mut self, key: impl Into<String>) -> Self {
        self.spec.order_by.push((key.into(), true));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.spec.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.spec.offset = Some(n);
        self
    }

    pub fn compile(&self, projection: &Projection) -> Result<CompiledQuery> {
        let hierarchy = self.corpus.hierarchy()?;
        compile::compile(&hierarchy, &self.spec, projection)
    }

    /// The row statement as Cypher text.
    pub fn to_cypher(&self) -> Result<String> {
        Ok(self.compile(&Projection::Rows)?.to_cypher())
    }

    fn run(&self, projection: &Projection) -> Result<Vec<Row>> {
        let compiled = self.compile(projection)?;
        let result = self.corpus.read(&compiled.statement, &compiled.params)?;
        hydrate::hydrate(result, &compiled.columns, self.corpus.ordered_collections())
    }

    pub fn all(&self) -> Result<Vec<Row>> {
        self.run(&Projection::Rows)
    }

    /// Number of matching tokens. Use [`Self::aggregate`] with
    /// [`Aggregate::count`] for per-group counts.
    pub fn count(&self) -> Result<u64> {
        if !self.spec.group_by.is_empty() {
            return Err(Error::InvalidQuery("count() is ungrouped; aggregate with Aggregate::count() instead".into()));
        }
        let mut spec = self.spec.clone();
        spec.columns.clear();
        spec.order_by.clear();
        let builder = QueryBuilder { corpus: self.corpus, spec };
        let rows = builder.run(&Projection::Count)?;
        let count = rows.first().map(|r| r.get_as::<i64>("count")).transpose()?.unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub fn aggregate(&self, aggregates: impl IntoIterator<Item = Aggregate>) -> Result<Vec<Row>> {
        self.run(&Projection::Aggregate(aggregates.into_iter().collect()))
    }

    /// Ids of the matching tokens, in match order.
    pub fn ids(&self) -> Result<Vec<String>> {
        self.run(&Projection::Ids)?.iter().map(|r| r.get_as::<String>("id")).collect()
    }

    /// Tag every matching token with the token subset `name`, registering
    /// the subset first. Returns the number of tokens tagged.
    pub fn create_subset(&self, name: &str) -> Result<usize> {
        let ids = self.ids()?;
        self.corpus.tag_tokens(&self.spec.level, name, &ids)
    }

    /// Set `properties` on every matching token, registering any new ones
    /// as token properties. Returns the number of tokens updated.
    pub fn set_properties(&self, properties: PropertyMap) -> Result<usize> {
        let ids = self.ids()?;
        self.corpus.set_token_properties(&self.spec.level, &ids, properties)
    }

    /// Slice `channel` of `store` to each matching token's interval.
    pub fn tracks<S: TrackStore + ?Sized>(&self, store: &S, channel: &str) -> Result<Vec<TokenTrack>> {
        let level = self.spec.level.clone();
        let mut spec = self.spec.clone();
        spec.columns = ["id", "discourse", "speaker", "begin", "end"]
            .iter()
            .map(|c| (format!("{level}.{c}"), (*c).to_owned()))
            .collect();
        spec.group_by.clear();
        let rows = QueryBuilder { corpus: self.corpus, spec }.all()?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let discourse: String = row.get_as("discourse")?;
            let speaker: String = row.get_as("speaker")?;
            let begin: f64 = row.get_as("begin")?;
            let end: f64 = row.get_as("end")?;
            let key = TrackKey::new(discourse, speaker, channel);
            let samples = store.samples(&key, begin, end)?;
            out.push(TokenTrack { id: row.get_as("id")?, key, begin, end, samples });
        }
        Ok(out)
    }
}
