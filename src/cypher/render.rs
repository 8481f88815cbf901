//! Cypher renderer: AST to query text.
//!
//! Rendering never inlines user data: parameters stay `$name` references
//! and identifiers (labels, property keys, aliases) are backtick-quoted
//! whenever they are not plain identifiers.

use std::fmt::Write;

use super::ast::*;
use crate::storage::ConstraintType;

/// Render a statement to Cypher text.
pub fn render(stmt: &Statement) -> String {
    let mut out = String::new();
    match stmt {
        Statement::Query(q) => render_query(&mut out, q),
        Statement::Write(w) => render_write(&mut out, w),
        Statement::Schema(s) => render_schema(&mut out, s),
    }
    out
}

/// Quote an identifier if it is not `[A-Za-z_][A-Za-z0-9_]*`.
pub fn ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if plain {
        name.to_owned()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

// ============================================================================
// Statements
// ============================================================================

fn render_query(out: &mut String, q: &Query) {
    let mut first = true;
    for m in &q.matches {
        if !first {
            out.push(' ');
        }
        first = false;
        render_match(out, m);
    }
    out.push_str(" RETURN ");
    if q.return_clause.distinct {
        out.push_str("DISTINCT ");
    }
    for (i, item) in q.return_clause.items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        render_expr(out, &item.expr);
        let _ = write!(out, " AS {}", ident(&item.alias));
    }
    if !q.order_by.is_empty() {
        out.push_str(" ORDER BY ");
        for (i, o) in q.order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            render_expr(out, &o.expr);
            if !o.ascending {
                out.push_str(" DESC");
            }
        }
    }
    if let Some(skip) = &q.skip {
        out.push_str(" SKIP ");
        render_expr(out, skip);
    }
    if let Some(limit) = &q.limit {
        out.push_str(" LIMIT ");
        render_expr(out, limit);
    }
}

fn render_match(out: &mut String, m: &MatchClause) {
    out.push_str(if m.optional { "OPTIONAL MATCH " } else { "MATCH " });
    render_patterns(out, &m.patterns);
    if let Some(w) = &m.where_clause {
        out.push_str(" WHERE ");
        render_expr(out, w);
    }
}

fn render_write(out: &mut String, w: &WriteQuery) {
    let mut parts: Vec<String> = Vec::new();
    if let Some(u) = &w.unwind {
        let mut s = String::from("UNWIND ");
        render_expr(&mut s, &u.expr);
        let _ = write!(s, " AS {}", ident(&u.alias));
        parts.push(s);
    }
    for clause in &w.clauses {
        let mut s = String::new();
        match clause {
            WriteClause::Match(m) => render_match(&mut s, m),
            WriteClause::Merge(m) => {
                s.push_str("MERGE ");
                render_pattern(&mut s, &m.pattern);
                if !m.on_create.is_empty() {
                    s.push_str(" ON CREATE SET ");
                    render_set_items(&mut s, &m.on_create);
                }
                if !m.on_match.is_empty() {
                    s.push_str(" ON MATCH SET ");
                    render_set_items(&mut s, &m.on_match);
                }
            }
            WriteClause::Create(c) => {
                s.push_str("CREATE ");
                render_patterns(&mut s, &c.patterns);
            }
            WriteClause::Set(items) => {
                s.push_str("SET ");
                render_set_items(&mut s, items);
            }
            WriteClause::Remove(items) => {
                s.push_str("REMOVE ");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        s.push_str(", ");
                    }
                    match item {
                        RemoveItem::Property { variable, key } => {
                            let _ = write!(s, "{}.{}", ident(variable), ident(key));
                        }
                        RemoveItem::Label { variable, label } => {
                            let _ = write!(s, "{}:{}", ident(variable), ident(label));
                        }
                    }
                }
            }
            WriteClause::Delete(d) => {
                s.push_str(if d.detach { "DETACH DELETE " } else { "DELETE " });
                let vars: Vec<String> = d.variables.iter().map(|v| ident(v)).collect();
                s.push_str(&vars.join(", "));
            }
        }
        parts.push(s);
    }
    out.push_str(&parts.join(" "));
}

fn render_schema(out: &mut String, s: &SchemaCommand) {
    match s {
        SchemaCommand::CreateIndex { label, property } => {
            let _ = write!(out, "CREATE INDEX IF NOT EXISTS FOR (n:{}) ON (n.{})", ident(label), ident(property));
        }
        SchemaCommand::DropIndex { label, property } => {
            let _ = write!(out, "DROP INDEX ON :{}({})", ident(label), ident(property));
        }
        SchemaCommand::CreateConstraint { label, property, constraint_type } => {
            let requirement = match constraint_type {
                ConstraintType::Unique => "IS UNIQUE",
                ConstraintType::Exists => "IS NOT NULL",
            };
            let _ = write!(
                out,
                "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{}) REQUIRE n.{} {}",
                ident(label), ident(property), requirement,
            );
        }
        SchemaCommand::DropConstraint { label, property } => {
            let _ = write!(out, "DROP CONSTRAINT ON (n:{}) ASSERT n.{} IS UNIQUE", ident(label), ident(property));
        }
    }
}

// ============================================================================
// Patterns
// ============================================================================

fn render_patterns(out: &mut String, patterns: &[Pattern]) {
    for (i, p) in patterns.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        render_pattern(out, p);
    }
}

fn render_pattern(out: &mut String, p: &Pattern) {
    for element in &p.elements {
        match element {
            PatternElement::Node(n) => render_node(out, n),
            PatternElement::Relationship(r) => render_rel(out, r),
        }
    }
}

fn render_node(out: &mut String, n: &NodePattern) {
    out.push('(');
    if let Some(alias) = &n.alias {
        out.push_str(&ident(alias));
    }
    for label in &n.labels {
        out.push(':');
        out.push_str(&ident(label));
    }
    if !n.properties.is_empty() {
        out.push_str(" {");
        for (i, (k, v)) in n.properties.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}: ", ident(k));
            render_expr(out, v);
        }
        out.push('}');
    }
    out.push(')');
}

fn render_rel(out: &mut String, r: &RelPattern) {
    let mut inner = String::new();
    if let Some(alias) = &r.alias {
        inner.push_str(&ident(alias));
    }
    if !r.rel_types.is_empty() {
        inner.push(':');
        let types: Vec<String> = r.rel_types.iter().map(|t| ident(t)).collect();
        inner.push_str(&types.join("|"));
    }
    let body = if inner.is_empty() { String::new() } else { format!("[{inner}]") };
    match r.direction {
        PatternDirection::Right => { let _ = write!(out, "-{body}->"); }
        PatternDirection::Left => { let _ = write!(out, "<-{body}-"); }
        PatternDirection::Both => { let _ = write!(out, "-{body}-"); }
    }
}

fn render_set_items(out: &mut String, items: &[SetItem]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match item {
            SetItem::Property { variable, key, value } => {
                let _ = write!(out, "{}.{} = ", ident(variable), ident(key));
                render_expr(out, value);
            }
            SetItem::MergeProperties { variable, value } => {
                let _ = write!(out, "{} += ", ident(variable));
                render_expr(out, value);
            }
            SetItem::Label { variable, label } => {
                let _ = write!(out, "{}:{}", ident(variable), ident(label));
            }
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

fn render_expr(out: &mut String, e: &Expr) {
    match e {
        Expr::Literal(l) => render_literal(out, l),
        Expr::Variable(v) => out.push_str(&ident(v)),
        Expr::Property { expr, key } => {
            render_operand(out, expr);
            let _ = write!(out, ".{}", ident(key));
        }
        Expr::Parameter(p) => { let _ = write!(out, "${}", ident(p)); }
        Expr::FunctionCall { name, args, distinct } => {
            let _ = write!(out, "{name}(");
            if *distinct {
                out.push_str("DISTINCT ");
            }
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_expr(out, a);
            }
            out.push(')');
        }
        Expr::BinaryOp { left, op, right } => {
            render_operand(out, left);
            let _ = write!(out, " {} ", binary_op(*op));
            render_operand(out, right);
        }
        Expr::UnaryOp { op, expr } => {
            match op {
                UnaryOp::Not => out.push_str("NOT "),
                UnaryOp::Negate => out.push('-'),
            }
            render_operand(out, expr);
        }
        Expr::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_expr(out, item);
            }
            out.push(']');
        }
        Expr::MapLiteral(items) => {
            out.push('{');
            for (i, (k, v)) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: ", ident(k));
                render_expr(out, v);
            }
            out.push('}');
        }
        Expr::Exists(pattern) => {
            out.push_str("exists(");
            render_pattern(out, pattern);
            out.push(')');
        }
        Expr::PatternComprehension { pattern, where_clause, projection } => {
            out.push('[');
            render_pattern(out, pattern);
            if let Some(w) = where_clause {
                out.push_str(" WHERE ");
                render_expr(out, w);
            }
            out.push_str(" | ");
            render_expr(out, projection);
            out.push(']');
        }
        Expr::Quantifier { kind, variable, list, predicate } => {
            let name = match kind {
                QuantifierKind::Any => "any",
                QuantifierKind::All => "all",
                QuantifierKind::None => "none",
            };
            let _ = write!(out, "{name}({} IN ", ident(variable));
            render_expr(out, list);
            out.push_str(" WHERE ");
            render_expr(out, predicate);
            out.push(')');
        }
        Expr::In { expr, list } => {
            render_operand(out, expr);
            out.push_str(" IN ");
            render_operand(out, list);
        }
        Expr::IsNull { expr, negated } => {
            render_operand(out, expr);
            out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Expr::HasLabel { expr, label } => {
            render_operand(out, expr);
            let _ = write!(out, ":{}", ident(label));
        }
        Expr::StringOp { left, op, right } => {
            render_operand(out, left);
            out.push_str(match op {
                StringOp::StartsWith => " STARTS WITH ",
                StringOp::EndsWith => " ENDS WITH ",
                StringOp::Contains => " CONTAINS ",
            });
            render_operand(out, right);
        }
        Expr::Star => out.push('*'),
    }
}

/// Compound operands get parentheses; atoms render bare.
fn render_operand(out: &mut String, e: &Expr) {
    let compound = matches!(
        e,
        Expr::BinaryOp { .. }
            | Expr::UnaryOp { .. }
            | Expr::In { .. }
            | Expr::IsNull { .. }
            | Expr::StringOp { .. }
            | Expr::HasLabel { .. }
    );
    if compound {
        out.push('(');
        render_expr(out, e);
        out.push(')');
    } else {
        render_expr(out, e);
    }
}

fn render_literal(out: &mut String, l: &Literal) {
    match l {
        Literal::Null => out.push_str("null"),
        Literal::Bool(b) => { let _ = write!(out, "{b}"); }
        Literal::Int(i) => { let _ = write!(out, "{i}"); }
        Literal::Float(f) => { let _ = write!(out, "{f:?}"); }
        Literal::String(s) => {
            let _ = write!(out, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"));
        }
    }
}

fn binary_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Eq => "=",
        BinaryOp::Neq => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Xor => "XOR",
        BinaryOp::RegexMatch => "=~",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_quoting() {
        assert_eq!(ident("phone"), "phone");
        assert_eq!(ident("my corpus"), "`my corpus`");
        assert_eq!(ident("2nd"), "`2nd`");
        assert_eq!(ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_render_query_with_parameters() {
        let q = Query {
            matches: vec![MatchClause::new(vec![
                Pattern::node(NodePattern::new("n").label("phone").label("demo"))
                    .rel("is_a", PatternDirection::Right, NodePattern::new("n_type").label("phone_type")),
            ])
            .filter(Some(Expr::binary(Expr::prop("n_type", "label"), BinaryOp::Eq, Expr::param("p0"))))],
            return_clause: ReturnClause {
                distinct: false,
                items: vec![ReturnItem { expr: Expr::prop("n", "begin"), alias: "begin".into() }],
            },
            order_by: vec![OrderExpr { expr: Expr::var("begin"), ascending: false }],
            skip: None,
            limit: Some(Expr::param("limit")),
        };
        assert_eq!(
            render(&Statement::Query(q)),
            "MATCH (n:phone:demo)-[:is_a]->(n_type:phone_type) WHERE n_type.label = $p0 \
             RETURN n.begin AS begin ORDER BY begin DESC LIMIT $limit"
        );
    }

    #[test]
    fn test_render_unwind_merge() {
        let w = WriteQuery {
            unwind: Some(Unwind { expr: Expr::param("rows"), alias: "row".into() }),
            clauses: vec![WriteClause::Merge(MergeClause {
                pattern: Pattern::node(
                    NodePattern::new("t").label("word_type").property("id", Expr::prop("row", "type_key")),
                ),
                on_create: vec![SetItem::Property {
                    variable: "t".into(),
                    key: "label".into(),
                    value: Expr::prop("row", "label"),
                }],
                on_match: vec![],
            })],
        };
        assert_eq!(
            render(&Statement::Write(w)),
            "UNWIND $rows AS row MERGE (t:word_type {id: row.type_key}) ON CREATE SET t.label = row.label"
        );
    }

    #[test]
    fn test_render_comprehension_and_quantifier() {
        let comp = Expr::PatternComprehension {
            pattern: Box::new(
                Pattern::node(NodePattern::new("w"))
                    .rel("contained_by", PatternDirection::Left, NodePattern::new("c").label("phone")),
            ),
            where_clause: None,
            projection: Box::new(Expr::List(vec![Expr::prop("c", "begin"), Expr::prop("c", "id")])),
        };
        let any = Expr::Quantifier {
            kind: QuantifierKind::Any,
            variable: "x".into(),
            list: Box::new(comp.clone()),
            predicate: Box::new(Expr::binary(Expr::var("x"), BinaryOp::Gt, Expr::param("p1"))),
        };
        let mut s = String::new();
        render_expr(&mut s, &any);
        assert_eq!(
            s,
            "any(x IN [(w)<-[:contained_by]-(c:phone) | [c.begin, c.id]] WHERE x > $p1)"
        );
    }
}
