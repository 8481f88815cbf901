//! Query compilation: builder state → Cypher AST plus bound parameters.
//!
//! Every path is resolved first. Hops needed by a filter go into the one
//! required MATCH; hops only a column needs get their own OPTIONAL MATCH,
//! so a missing neighbour yields null instead of dropping the row. Paths
//! sharing a prefix share its aliases. Multi-valued paths become pattern
//! comprehensions hanging off their last single-valued node.

use std::collections::{HashMap, HashSet};

use super::path::{resolve, Endpoint, HopKind, PropertySite, ResolvedPath, Terminal};
use super::{Aggregate, AggregateFunction, Comparison, Filter, Operand};
use crate::cypher::ast::*;
use crate::model::{PropertyMap, Value};
use crate::schema::{Hierarchy, SubsetKind, ValueType};
use crate::{Error, Result};

/// Alias of the bound level's token node.
pub const ROOT: &str = "n";

/// Columns returned when a row query declares none.
pub const DEFAULT_COLUMNS: &[&str] = &["id", "label", "begin", "end", "discourse", "speaker"];

/// Builder state, independent of any corpus handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub level: String,
    pub filters: Vec<Filter>,
    /// (path, output name)
    pub columns: Vec<(String, String)>,
    pub group_by: Vec<String>,
    /// (column name or path, descending)
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// What the statement returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Rows,
    Count,
    Aggregate(Vec<Aggregate>),
    /// Only the ids of matching tokens.
    Ids,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Rendered as a list of `[order_key, value]` pairs.
    pub multi: bool,
    pub value_type: Option<ValueType>,
}

/// A rendered-ready statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub statement: Statement,
    pub params: PropertyMap,
    pub columns: Vec<ColumnInfo>,
}

impl CompiledQuery {
    pub fn to_cypher(&self) -> String {
        crate::cypher::render::render(&self.statement)
    }
}

pub fn compile(hierarchy: &Hierarchy, spec: &QuerySpec, projection: &Projection) -> Result<CompiledQuery> {
    let mut c = Compiler::new(hierarchy, &spec.level)?;

    let mut predicates = Vec::new();
    for filter in &spec.filters {
        predicates.push(c.filter(filter)?);
    }

    let declared: Vec<(String, String)> = if spec.columns.is_empty() && *projection == Projection::Rows {
        DEFAULT_COLUMNS
            .iter()
            .map(|p| (format!("{}.{p}", spec.level), (*p).to_owned()))
            .collect()
    } else {
        spec.columns.clone()
    };
    let mut columns = Vec::with_capacity(declared.len());
    for (path, name) in &declared {
        if columns.iter().any(|(_, info): &(ReturnItem, ColumnInfo)| info.name == *name) {
            return Err(Error::InvalidQuery(format!("column name '{name}' is declared twice")));
        }
        columns.push(c.column(path, name)?);
    }

    for key in &spec.group_by {
        if !columns.iter().any(|(_, info)| info.name == *key) {
            return Err(Error::InvalidQuery(format!("group key '{key}' is not a declared column")));
        }
    }

    let grouped = |columns: &[(ReturnItem, ColumnInfo)]| -> Result<Vec<(ReturnItem, ColumnInfo)>> {
        for (_, info) in columns {
            if !spec.group_by.contains(&info.name) {
                return Err(Error::InvalidQuery(format!(
                    "column '{}' must be a group key in a grouped query",
                    info.name
                )));
            }
        }
        Ok(columns.to_vec())
    };

    let (mut items, distinct) = match projection {
        Projection::Rows => {
            if spec.group_by.is_empty() {
                (columns, false)
            } else if spec.columns.is_empty() {
                // Default columns: keep only the keys.
                let keys = columns.into_iter().filter(|(_, info)| spec.group_by.contains(&info.name)).collect();
                (keys, true)
            } else {
                (grouped(&columns)?, true)
            }
        }
        Projection::Count => {
            let mut items = grouped(&columns)?;
            items.push((
                ReturnItem { expr: Expr::call("count", vec![Expr::var(ROOT)]), alias: "count".into() },
                ColumnInfo { name: "count".into(), multi: false, value_type: Some(ValueType::Integer) },
            ));
            (items, false)
        }
        Projection::Aggregate(aggregates) => {
            if aggregates.is_empty() {
                return Err(Error::InvalidQuery("aggregate query needs at least one aggregate".into()));
            }
            let mut items = grouped(&columns)?;
            for aggregate in aggregates {
                if items.iter().any(|(_, info)| info.name == aggregate.name) {
                    return Err(Error::InvalidQuery(format!("output name '{}' is used twice", aggregate.name)));
                }
                items.push(c.aggregate(aggregate)?);
            }
            (items, false)
        }
        Projection::Ids => (
            vec![(
                ReturnItem { expr: Expr::prop(ROOT, "id"), alias: "id".into() },
                ColumnInfo { name: "id".into(), multi: false, value_type: Some(ValueType::String) },
            )],
            true,
        ),
    };

    let mut order_by = Vec::new();
    if *projection != Projection::Ids {
        for (key, descending) in &spec.order_by {
            let expr = if items.iter().any(|(item, _)| item.alias == *key) {
                Expr::var(key.as_str())
            } else if matches!(projection, Projection::Rows) && spec.group_by.is_empty() {
                c.order_expr(key)?
            } else {
                return Err(Error::InvalidQuery(format!(
                    "cannot order a grouped query by '{key}', which is not an output column"
                )));
            };
            order_by.push(OrderExpr { expr, ascending: !descending });
        }
    }

    let skip = spec.offset.map(|n| c.bind(Value::from(n)));
    let limit = spec.limit.map(|n| c.bind(Value::from(n)));

    let columns: Vec<ColumnInfo> = items.iter().map(|(_, info)| info.clone()).collect();
    let return_items: Vec<ReturnItem> = items.drain(..).map(|(item, _)| item).collect();

    let mut matches = vec![MatchClause::new(c.required).filter(Expr::and_all(c.required_where.into_iter().chain(predicates)))];
    matches.extend(c.optional);

    Ok(CompiledQuery {
        statement: Statement::Query(Query {
            matches,
            return_clause: ReturnClause { distinct, items: return_items },
            order_by,
            skip,
            limit,
        }),
        params: c.params,
        columns,
    })
}

struct Compiler<'h> {
    hierarchy: &'h Hierarchy,
    corpus: &'h str,
    level: &'h str,
    params: PropertyMap,
    aliases: HashMap<String, String>,
    taken: HashSet<String>,
    required: Vec<Pattern>,
    required_where: Vec<Expr>,
    required_keys: HashSet<String>,
    optional: Vec<MatchClause>,
}

fn node(alias: &str, label: &str, corpus: &str) -> NodePattern {
    NodePattern::new(alias).label(label).label(corpus)
}

fn type_alias(alias: &str) -> String {
    format!("{alias}_type")
}

fn sanitize(name: &str) -> String {
    let mut s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if s.is_empty() || s.starts_with(|c: char| c.is_ascii_digit()) {
        s.insert(0, '_');
    }
    s
}

fn comparison_op(op: Comparison) -> Option<BinaryOp> {
    Some(match op {
        Comparison::Eq => BinaryOp::Eq,
        Comparison::Neq => BinaryOp::Neq,
        Comparison::Lt => BinaryOp::Lt,
        Comparison::Lte => BinaryOp::Lte,
        Comparison::Gt => BinaryOp::Gt,
        Comparison::Gte => BinaryOp::Gte,
        Comparison::Regex => BinaryOp::RegexMatch,
        Comparison::In | Comparison::NotIn => return None,
    })
}

/// `left <op> right` for one comparison.
fn predicate(left: Expr, op: Comparison, right: Expr) -> Expr {
    match op {
        Comparison::In => Expr::in_list(left, right),
        Comparison::NotIn => Expr::not(Expr::in_list(left, right)),
        other => match comparison_op(other) {
            Some(bin) => Expr::binary(left, bin, right),
            None => Expr::in_list(left, right),
        },
    }
}

fn property_expr(alias: &str, site: PropertySite, name: &str) -> Expr {
    match site {
        PropertySite::Node => Expr::prop(alias, name),
        PropertySite::TypeNode => Expr::prop(type_alias(alias), name),
        PropertySite::Duration => Expr::binary(Expr::prop(alias, "end"), BinaryOp::Sub, Expr::prop(alias, "begin")),
    }
}

/// What a comprehension projects.
enum Yield {
    /// `[order_key, value]` pairs, for columns.
    Pairs,
    /// Bare values, for filters.
    Values,
    /// The endpoint node, or its type node for type subsets.
    Node { type_node: bool },
}

impl<'h> Compiler<'h> {
    fn new(hierarchy: &'h Hierarchy, level: &'h str) -> Result<Self> {
        if !hierarchy.has_level(level) {
            return Err(Error::Schema(format!("no level '{level}' in corpus '{}'", hierarchy.corpus())));
        }
        let corpus = hierarchy.corpus();
        let mut taken = HashSet::new();
        taken.insert(ROOT.to_owned());
        taken.insert(type_alias(ROOT));
        Ok(Self {
            hierarchy,
            corpus,
            level,
            params: PropertyMap::new(),
            aliases: HashMap::new(),
            taken,
            required: vec![Pattern::node(node(ROOT, level, corpus)).rel(
                "is_a",
                PatternDirection::Right,
                node(&type_alias(ROOT), &Hierarchy::type_label(level), corpus),
            )],
            required_where: Vec::new(),
            required_keys: HashSet::new(),
            optional: Vec::new(),
        })
    }

    fn resolve(&self, path: &str) -> Result<ResolvedPath> {
        resolve(self.hierarchy, self.level, path)
    }

    fn bind(&mut self, value: Value) -> Expr {
        let name = format!("p{}", self.params.len());
        self.params.insert(name.clone(), value);
        Expr::param(name)
    }

    fn alias_for(&mut self, key: &str, hop: &super::path::Hop) -> String {
        if let Some(a) = self.aliases.get(key) {
            return a.clone();
        }
        let base = sanitize(&match (&hop.kind, &hop.target) {
            (HopKind::Previous, t) => format!("prev_{t}"),
            (HopKind::Following, t) => format!("next_{t}"),
            (HopKind::Speaker, _) => "speaker".to_owned(),
            (HopKind::Discourse, _) => "discourse".to_owned(),
            (_, t) => t.to_string(),
        });
        let mut candidate = base.clone();
        let mut n = 1;
        while self.taken.contains(&candidate) || self.taken.contains(&type_alias(&candidate)) {
            n += 1;
            candidate = format!("{base}{n}");
        }
        self.taken.insert(candidate.clone());
        self.taken.insert(type_alias(&candidate));
        self.aliases.insert(key.to_owned(), candidate.clone());
        candidate
    }

    /// Pattern from `from` across `hop` to `to`, plus any extra condition.
    fn hop_pattern(&self, start: Pattern, from: &str, hop: &super::path::Hop, to: &str, with_type: bool) -> (Pattern, Option<Expr>) {
        let corpus = self.corpus;
        let level_node = |level: &str| node(to, level, corpus);
        let typed = |p: Pattern, level: &str| {
            if with_type {
                p.rel("is_a", PatternDirection::Right, node(&type_alias(to), &Hierarchy::type_label(level), corpus))
            } else {
                p
            }
        };
        let distinct = || Some(Expr::binary(Expr::prop(to, "id"), BinaryOp::Neq, Expr::prop(from, "id")));
        match (&hop.kind, &hop.target) {
            (HopKind::Parent, Endpoint::Level(l)) => {
                (typed(start.rel("contained_by", PatternDirection::Right, level_node(l)), l), None)
            }
            (HopKind::Children, Endpoint::Level(l)) => {
                (typed(start.rel("contained_by", PatternDirection::Left, level_node(l)), l), None)
            }
            (HopKind::Previous, Endpoint::Level(l)) => {
                let p = start
                    .rel("starts_at", PatternDirection::Right, NodePattern::anonymous().label("anchor"))
                    .rel("ends_at", PatternDirection::Left, level_node(l));
                (typed(p, l), distinct())
            }
            (HopKind::Following, Endpoint::Level(l)) => {
                let p = start
                    .rel("ends_at", PatternDirection::Right, NodePattern::anonymous().label("anchor"))
                    .rel("starts_at", PatternDirection::Left, level_node(l));
                (typed(p, l), distinct())
            }
            (HopKind::Subannotation, Endpoint::Subannotation(s)) => {
                (start.rel("annotates", PatternDirection::Left, node(to, s, corpus)), None)
            }
            (HopKind::Speaker, _) => (
                Pattern::node(node(to, "Speaker", corpus).property("name", Expr::prop(from, "speaker"))),
                None,
            ),
            (HopKind::Discourse, _) => (
                Pattern::node(node(to, "Discourse", corpus).property("name", Expr::prop(from, "discourse"))),
                None,
            ),
            // The resolver never pairs a hop with another endpoint kind.
            (_, _) => (start, None),
        }
    }

    /// Bind the first `upto` (single-valued) hops of `path`; returns the
    /// alias of the node reached.
    fn single(&mut self, path: &ResolvedPath, upto: usize, required: bool) -> String {
        let mut from = ROOT.to_owned();
        for i in 0..upto {
            let hop = &path.hops[i];
            let key = path.key(i + 1);
            let known = self.aliases.contains_key(&key);
            let alias = self.alias_for(&key, hop);
            let already = if required { self.required_keys.contains(&key) } else { known };
            if !already {
                let with_type = matches!(hop.target, Endpoint::Level(_));
                let (pattern, cond) = self.hop_pattern(Pattern::node(NodePattern::new(from.as_str())), &from, hop, &alias, with_type);
                if required {
                    self.required.push(pattern);
                    self.required_where.extend(cond);
                    self.required_keys.insert(key);
                } else {
                    self.optional.push(MatchClause::optional(vec![pattern]).filter(cond));
                }
            }
            from = alias;
        }
        from
    }

    /// A pattern comprehension over the multi-valued tail of `path`.
    fn comprehension(&mut self, path: &ResolvedPath, required: bool, yields: Yield) -> Expr {
        let first = path.first_multi().unwrap_or(path.hops.len());
        let prefix = self.single(path, first, required);

        let site = match &path.terminal {
            Terminal::Property(p) => Some(p.site),
            Terminal::Node => None,
        };
        let wants_type = matches!(yields, Yield::Node { type_node: true })
            || (!matches!(yields, Yield::Node { .. }) && site == Some(PropertySite::TypeNode));

        let mut pattern = Pattern::node(NodePattern::new(prefix.as_str()));
        let mut conds = Vec::new();
        let mut from = prefix;
        let mut order_aliases = Vec::new();
        let tail = &path.hops[first..];
        for (i, hop) in tail.iter().enumerate() {
            let alias = format!("_m{i}");
            let last = i + 1 == tail.len();
            let with_type = last && wants_type;
            let (p, cond) = self.hop_pattern(pattern, &from, hop, &alias, with_type);
            pattern = p;
            conds.extend(cond);
            if hop.kind.is_multi() {
                order_aliases.push(alias.clone());
            }
            from = alias;
        }
        let value = match (&yields, &path.terminal) {
            (Yield::Node { type_node: true }, _) => Expr::var(type_alias(&from)),
            (Yield::Node { type_node: false }, _) | (_, Terminal::Node) => Expr::var(from.as_str()),
            (_, Terminal::Property(p)) => property_expr(&from, p.site, &p.name),
        };
        let projection = match yields {
            // Key on the begin of every multi-valued hop, outermost first,
            // so nested children sort by container then by their own time.
            Yield::Pairs => {
                let key = Expr::List(order_aliases.iter().map(|a| Expr::prop(a.as_str(), "begin")).collect());
                Expr::List(vec![key, value])
            }
            _ => value,
        };
        Expr::PatternComprehension {
            pattern: Box::new(pattern),
            where_clause: Expr::and_all(conds).map(Box::new),
            projection: Box::new(projection),
        }
    }

    /// Expression for a single-valued property path.
    fn value(&mut self, path: &ResolvedPath, required: bool) -> Result<Expr> {
        let Terminal::Property(p) = &path.terminal else {
            return Err(Error::InvalidQuery(format!("path '{}' does not end in a property", path.text)));
        };
        let alias = self.single(path, path.hops.len(), required);
        Ok(property_expr(&alias, p.site, &p.name))
    }

    fn filter(&mut self, filter: &Filter) -> Result<Expr> {
        match filter {
            Filter::Compare { path, op, rhs } => {
                let left = self.resolve(path)?;
                let Some(value_type) = left.value_type() else {
                    return Err(Error::InvalidQuery(format!("cannot compare '{path}', which addresses nodes")));
                };
                let right = match rhs {
                    Operand::Value(v) => {
                        check_operand(path, value_type, *op, v)?;
                        if v.is_null() && matches!(op, Comparison::Eq | Comparison::Neq) {
                            let (subject, scope) = self.subject(&left)?;
                            let test = Expr::IsNull { expr: Box::new(subject), negated: *op == Comparison::Neq };
                            return Ok(scope.wrap(test));
                        }
                        self.bind(v.clone())
                    }
                    Operand::Path(other) => {
                        let other = self.resolve(other)?;
                        if other.is_multi() {
                            return Err(Error::InvalidQuery(format!(
                                "right-hand path '{}' is multi-valued",
                                other.text
                            )));
                        }
                        self.value(&other, true)?
                    }
                };
                let (subject, scope) = self.subject(&left)?;
                Ok(scope.wrap(predicate(subject, *op, right)))
            }
            Filter::Subset { path, subset, negated } => {
                let resolved = self.resolve(path)?;
                if resolved.terminal != Terminal::Node {
                    return Err(Error::InvalidQuery(format!("subset filter needs a node path, got '{path}'")));
                }
                let Endpoint::Level(level) = resolved.endpoint() else {
                    return Err(Error::InvalidQuery(format!("'{path}' does not address tokens")));
                };
                let kind = self.hierarchy.subset_kind(&level, subset).ok_or_else(|| {
                    Error::Schema(format!("no subset '{subset}' on level '{level}'"))
                })?;
                let type_node = kind == SubsetKind::Type;
                let test = if resolved.is_multi() {
                    let list = self.comprehension(&resolved, true, Yield::Node { type_node });
                    Expr::Quantifier {
                        kind: QuantifierKind::Any,
                        variable: "_v".into(),
                        list: Box::new(list),
                        predicate: Box::new(Expr::has_label(Expr::var("_v"), subset.as_str())),
                    }
                } else {
                    let alias = self.single(&resolved, resolved.hops.len(), true);
                    let target = if type_node { type_alias(&alias) } else { alias };
                    Expr::has_label(Expr::var(target), subset.as_str())
                };
                Ok(if *negated { Expr::not(test) } else { test })
            }
        }
    }

    /// The filtered expression and how to wrap a predicate over it.
    fn subject(&mut self, path: &ResolvedPath) -> Result<(Expr, Scope)> {
        if path.is_multi() {
            let list = self.comprehension(path, true, Yield::Values);
            Ok((Expr::var("_v"), Scope::Any(list)))
        } else {
            Ok((self.value(path, true)?, Scope::Row))
        }
    }

    fn column(&mut self, path: &str, name: &str) -> Result<(ReturnItem, ColumnInfo)> {
        let resolved = self.resolve(path)?;
        let Some(value_type) = resolved.value_type() else {
            return Err(Error::InvalidQuery(format!("column '{name}': path '{path}' does not end in a property")));
        };
        let multi = resolved.is_multi();
        let expr = if multi {
            self.comprehension(&resolved, false, Yield::Pairs)
        } else {
            self.value(&resolved, false)?
        };
        Ok((
            ReturnItem { expr, alias: name.to_owned() },
            ColumnInfo { name: name.to_owned(), multi, value_type: Some(value_type) },
        ))
    }

    fn order_expr(&mut self, key: &str) -> Result<Expr> {
        let resolved = self.resolve(key)?;
        if resolved.is_multi() {
            return Err(Error::InvalidQuery(format!("cannot order by multi-valued path '{key}'")));
        }
        self.value(&resolved, false)
    }

    fn aggregate(&mut self, aggregate: &Aggregate) -> Result<(ReturnItem, ColumnInfo)> {
        if aggregate.function != AggregateFunction::Count && aggregate.path.is_none() {
            return Err(Error::InvalidQuery(format!("aggregate '{}' needs a property path", aggregate.name)));
        }
        let (arg, value_type) = match &aggregate.path {
            None => (Expr::var(ROOT), None),
            Some(path) => {
                let resolved = self.resolve(path)?;
                if resolved.is_multi() {
                    return Err(Error::InvalidQuery(format!("cannot aggregate multi-valued path '{path}'")));
                }
                let vt = resolved.value_type();
                (self.value(&resolved, false)?, vt)
            }
        };
        let numeric = matches!(value_type, Some(ValueType::Integer | ValueType::Float));
        let needs_number = |what: &str| -> Result<()> {
            if numeric {
                Ok(())
            } else {
                Err(Error::InvalidQuery(format!("{what} of '{}' needs a numeric property", aggregate.name)))
            }
        };
        let (expr, out_type) = match aggregate.function {
            AggregateFunction::Count => (Expr::call("count", vec![arg]), Some(ValueType::Integer)),
            AggregateFunction::Min => (Expr::call("min", vec![arg]), value_type),
            AggregateFunction::Max => (Expr::call("max", vec![arg]), value_type),
            AggregateFunction::Sum => {
                needs_number("sum")?;
                (Expr::call("sum", vec![arg]), value_type)
            }
            AggregateFunction::Average => {
                needs_number("average")?;
                (Expr::call("avg", vec![arg]), Some(ValueType::Float))
            }
            AggregateFunction::StdDev => {
                needs_number("standard deviation")?;
                (Expr::call("stDev", vec![arg]), Some(ValueType::Float))
            }
            AggregateFunction::Median => {
                needs_number("median")?;
                let half = Expr::Literal(Literal::Float(0.5));
                (Expr::call("percentileCont", vec![arg, half]), Some(ValueType::Float))
            }
            AggregateFunction::Quantile(q) => {
                needs_number("quantile")?;
                if !(0.0..=1.0).contains(&q) {
                    return Err(Error::InvalidQuery(format!("quantile {q} is outside [0, 1]")));
                }
                let q = self.bind(Value::Float(q));
                (Expr::call("percentileCont", vec![arg, q]), Some(ValueType::Float))
            }
        };
        Ok((
            ReturnItem { expr, alias: aggregate.name.clone() },
            ColumnInfo { name: aggregate.name.clone(), multi: false, value_type: out_type },
        ))
    }
}

/// Whether a predicate applies to the row or to any element of a list.
enum Scope {
    Row,
    Any(Expr),
}

impl Scope {
    fn wrap(self, test: Expr) -> Expr {
        match self {
            Scope::Row => test,
            Scope::Any(list) => Expr::Quantifier {
                kind: QuantifierKind::Any,
                variable: "_v".into(),
                list: Box::new(list),
                predicate: Box::new(test),
            },
        }
    }
}

fn check_operand(path: &str, value_type: ValueType, op: Comparison, value: &Value) -> Result<()> {
    let mismatch = |v: &Value| {
        Error::InvalidQuery(format!("'{path}' is {value_type}, cannot compare with {} value", v.type_name()))
    };
    match (op, value) {
        (Comparison::In | Comparison::NotIn, Value::List(items)) => {
            match items.iter().find(|v| !value_type.accepts(v)) {
                Some(v) => Err(mismatch(v)),
                None => Ok(()),
            }
        }
        (Comparison::In | Comparison::NotIn, other) => Err(Error::InvalidQuery(format!(
            "'in' on '{path}' needs a list, got {}",
            other.type_name()
        ))),
        (Comparison::Regex, Value::String(pattern)) => {
            if value_type != ValueType::String {
                return Err(Error::InvalidQuery(format!("regex on '{path}', which is {value_type}")));
            }
            regex::Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| Error::InvalidQuery(format!("invalid regex for '{path}': {e}")))
        }
        (Comparison::Regex, other) => Err(mismatch(other)),
        (_, Value::Null) if matches!(op, Comparison::Eq | Comparison::Neq) => Ok(()),
        (_, v) if value_type.accepts(v) && !v.is_null() => Ok(()),
        (_, v) => Err(mismatch(v)),
    }
}
