//! Cypher AST (Abstract Syntax Tree)
//!
//! These types represent the statements tiergraph sends to a graph store.
//! They are pure data plus a few constructors; rendering lives in
//! [`super::render`] and interpretation in [`crate::execution`].
//!
//! Every user-supplied value reaches a statement as `Expr::Parameter`;
//! `Literal` is reserved for constants chosen by the compiler itself.

use crate::storage::ConstraintType;

/// A complete Cypher statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read-only query: MATCH ... RETURN ...
    Query(Query),
    /// Write pipeline: [UNWIND ...] MATCH/MERGE/CREATE/SET/REMOVE/DELETE ...
    Write(WriteQuery),
    /// Schema commands
    Schema(SchemaCommand),
}

impl Statement {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Query(_))
    }
}

/// A read query (MATCH + RETURN).
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub matches: Vec<MatchClause>,
    pub return_clause: ReturnClause,
    pub order_by: Vec<OrderExpr>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

/// MATCH clause with patterns and its own WHERE.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<Expr>,
}

impl MatchClause {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { optional: false, patterns, where_clause: None }
    }

    pub fn optional(patterns: Vec<Pattern>) -> Self {
        Self { optional: true, patterns, where_clause: None }
    }

    pub fn filter(mut self, predicate: Option<Expr>) -> Self {
        self.where_clause = predicate;
        self
    }
}

/// A pattern: (a:phone)-[:contained_by]->(b:word)
///
/// Elements alternate node, relationship, node, ...
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub elements: Vec<PatternElement>,
}

impl Pattern {
    pub fn node(node: NodePattern) -> Self {
        Self { elements: vec![PatternElement::Node(node)] }
    }

    /// Append `-[:rel_type]->(node)` (or `<-`, `-`, depending on `direction`).
    pub fn rel(mut self, rel_type: &str, direction: PatternDirection, node: NodePattern) -> Self {
        self.elements.push(PatternElement::Relationship(RelPattern {
            alias: None,
            rel_types: vec![rel_type.to_owned()],
            direction,
        }));
        self.elements.push(PatternElement::Node(node));
        self
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodePattern> {
        self.elements.iter().filter_map(|e| match e {
            PatternElement::Node(n) => Some(n),
            PatternElement::Relationship(_) => None,
        })
    }

    pub fn first_node(&self) -> Option<&NodePattern> {
        self.nodes().next()
    }

    pub fn last_node(&self) -> Option<&NodePattern> {
        self.nodes().last()
    }

    /// The same pattern read from the other end.
    pub fn reversed(&self) -> Self {
        let elements = self
            .elements
            .iter()
            .rev()
            .map(|e| match e {
                PatternElement::Node(n) => PatternElement::Node(n.clone()),
                PatternElement::Relationship(r) => PatternElement::Relationship(RelPattern {
                    direction: r.direction.reverse(),
                    ..r.clone()
                }),
            })
            .collect();
        Self { elements }
    }
}

/// Element of a pattern: a node or a relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternElement {
    Node(NodePattern),
    Relationship(RelPattern),
}

/// Node pattern: (alias:Label1:Label2 {prop: value})
///
/// Properties keep declaration order so rendering is stable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

impl NodePattern {
    pub fn new(alias: impl Into<String>) -> Self {
        Self { alias: Some(alias.into()), ..Self::default() }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: Expr) -> Self {
        self.properties.push((key.into(), value));
        self
    }
}

/// Relationship pattern: -[alias:TYPE]->
#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub alias: Option<String>,
    pub rel_types: Vec<String>,
    pub direction: PatternDirection,
}

/// Pattern direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// ->
    Right,
    /// <-
    Left,
    /// - (undirected)
    Both,
}

impl PatternDirection {
    pub fn reverse(self) -> Self {
        match self {
            PatternDirection::Right => PatternDirection::Left,
            PatternDirection::Left => PatternDirection::Right,
            PatternDirection::Both => PatternDirection::Both,
        }
    }
}

/// RETURN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
}

/// Single item in RETURN. Items are always named.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expr: Expr,
    pub alias: String,
}

/// ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderExpr {
    pub expr: Expr,
    pub ascending: bool,
}

// ============================================================================
// Expressions
// ============================================================================

/// Expression in Cypher.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Literal(Literal),
    /// Variable reference: `n`, `row`
    Variable(String),
    /// Property access: `n.label`
    Property { expr: Box<Expr>, key: String },
    /// Parameter: `$p0`
    Parameter(String),
    /// Function call: `count(n)`, `avg(x)`, `percentileCont(x, $p1)`
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    /// Binary operation: `a - b`, `a = b`, `a AND b`
    BinaryOp { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    /// Unary operation: `NOT a`, `-a`
    UnaryOp { op: UnaryOp, expr: Box<Expr> },
    /// List: `[a, b]`
    List(Vec<Expr>),
    /// Map: `{name: $p0}`
    MapLiteral(Vec<(String, Expr)>),
    /// Pattern predicate: `exists((n)<-[:is_a]-())`
    Exists(Box<Pattern>),
    /// Pattern comprehension: `[(w)<-[:contained_by]-(c:phone) WHERE ... | c.begin]`
    PatternComprehension {
        pattern: Box<Pattern>,
        where_clause: Option<Box<Expr>>,
        projection: Box<Expr>,
    },
    /// List quantifier: `any(x IN list WHERE predicate)`
    Quantifier {
        kind: QuantifierKind,
        variable: String,
        list: Box<Expr>,
        predicate: Box<Expr>,
    },
    /// IN predicate: `x IN $p0`
    In { expr: Box<Expr>, list: Box<Expr> },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// Label check: `n:sibilant`
    HasLabel { expr: Box<Expr>, label: String },
    /// String operations: STARTS WITH, ENDS WITH, CONTAINS
    StringOp { left: Box<Expr>, op: StringOp, right: Box<Expr> },
    /// Wildcard: `*` (in `count(*)`)
    Star,
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(name.into())
    }

    /// `alias.key`
    pub fn prop(alias: impl Into<String>, key: impl Into<String>) -> Self {
        Expr::Property { expr: Box::new(Expr::Variable(alias.into())), key: key.into() }
    }

    pub fn int(i: i64) -> Self {
        Expr::Literal(Literal::Int(i))
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) }
    }

    pub fn not(expr: Expr) -> Self {
        Expr::UnaryOp { op: UnaryOp::Not, expr: Box::new(expr) }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall { name: name.into(), args, distinct: false }
    }

    pub fn has_label(expr: Expr, label: impl Into<String>) -> Self {
        Expr::HasLabel { expr: Box::new(expr), label: label.into() }
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull { expr: Box::new(expr), negated: false }
    }

    pub fn in_list(expr: Expr, list: Expr) -> Self {
        Expr::In { expr: Box::new(expr), list: Box::new(list) }
    }

    /// Conjunction of predicates in order; `None` when empty.
    pub fn and_all(predicates: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        predicates
            .into_iter()
            .reduce(|acc, p| Expr::binary(acc, BinaryOp::And, p))
    }

    /// Whether this expression contains an aggregate function call at any depth.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::FunctionCall { name, args, .. } => {
                is_aggregate_function(name) || args.iter().any(Expr::contains_aggregate)
            }
            Expr::Property { expr, .. }
            | Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::HasLabel { expr, .. } => expr.contains_aggregate(),
            Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::In { expr, list } => expr.contains_aggregate() || list.contains_aggregate(),
            Expr::List(items) => items.iter().any(Expr::contains_aggregate),
            Expr::MapLiteral(items) => items.iter().any(|(_, e)| e.contains_aggregate()),
            _ => false,
        }
    }
}

/// Aggregate functions understood by the executor and renderer.
pub const AGGREGATE_FUNCTIONS: &[&str] = &[
    "count", "sum", "avg", "min", "max", "collect",
    "stDev", "percentileCont", "percentileDisc",
];

pub fn is_aggregate_function(name: &str) -> bool {
    AGGREGATE_FUNCTIONS.contains(&name)
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add, Sub, Mul, Div,
    // Comparison
    Eq, Neq, Lt, Lte, Gt, Gte,
    // Logical
    And, Or, Xor,
    // String
    RegexMatch,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// String-specific operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
}

/// List quantifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    Any,
    All,
    None,
}

// ============================================================================
// Write clauses
// ============================================================================

/// A write pipeline. With `unwind`, every clause runs once per list element.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteQuery {
    pub unwind: Option<Unwind>,
    pub clauses: Vec<WriteClause>,
}

/// UNWIND $rows AS row
#[derive(Debug, Clone, PartialEq)]
pub struct Unwind {
    pub expr: Expr,
    pub alias: String,
}

/// One clause of a write pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteClause {
    Match(MatchClause),
    Merge(MergeClause),
    Create(CreateClause),
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete(DeleteClause),
}

/// MERGE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub pattern: Pattern,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

/// CREATE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateClause {
    pub patterns: Vec<Pattern>,
}

/// DELETE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteClause {
    pub variables: Vec<String>,
    pub detach: bool,
}

/// Single SET item.
#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// SET n.prop = expr
    Property { variable: String, key: String, value: Expr },
    /// SET n += {map}
    MergeProperties { variable: String, value: Expr },
    /// SET n:Label
    Label { variable: String, label: String },
}

/// Single REMOVE item.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    /// REMOVE n.prop
    Property { variable: String, key: String },
    /// REMOVE n:Label
    Label { variable: String, label: String },
}

/// Schema commands (constraints and indexes).
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaCommand {
    CreateIndex { label: String, property: String },
    DropIndex { label: String, property: String },
    CreateConstraint { label: String, property: String, constraint_type: ConstraintType },
    DropConstraint { label: String, property: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_pattern_flips_directions() {
        let p = Pattern::node(NodePattern::new("c").label("phone"))
            .rel("contained_by", PatternDirection::Right, NodePattern::new("w"));
        let r = p.reversed();
        assert_eq!(r.first_node().and_then(|n| n.alias.as_deref()), Some("w"));
        match &r.elements[1] {
            PatternElement::Relationship(rel) => assert_eq!(rel.direction, PatternDirection::Left),
            other => panic!("expected relationship, got {other:?}"),
        }
    }

    #[test]
    fn test_and_all_keeps_order() {
        let e = Expr::and_all(vec![Expr::var("a"), Expr::var("b")]).unwrap();
        assert_eq!(e, Expr::binary(Expr::var("a"), BinaryOp::And, Expr::var("b")));
        assert!(Expr::and_all(Vec::new()).is_none());
    }

    #[test]
    fn test_contains_aggregate() {
        assert!(Expr::call("count", vec![Expr::Star]).contains_aggregate());
        assert!(!Expr::call("size", vec![Expr::var("x")]).contains_aggregate());
    }
}
