//! Predicate expressions.
//!
//! Expressions are plain data until a query renders them. Criteria queries
//! refer to entity attributes by name (`Expr::Attribute`); statement builders
//! refer to raw columns (`Expr::Column`).

use minorm_core::{Dialect, Error, Result, Value};

/// Which entity of a criteria query an attribute belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The query root.
    Root,
    /// The n-th join, in the order joins were added.
    Join(usize),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// SQL spelling.
    pub const fn as_sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// A SQL expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// An unqualified column.
    Column(String),
    /// A named attribute of a query source, resolved at render time.
    Attribute {
        /// Owning source.
        source: Source,
        /// Field or relationship name.
        name: String,
    },
    /// A bound parameter.
    Value(Value),
    /// `left op right`.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `expr [NOT] LIKE pattern`.
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
    },
    /// `expr IS [NOT] NULL`.
    IsNull { expr: Box<Expr>, negated: bool },
    /// `NOT expr`.
    Not(Box<Expr>),
    /// Emptiness test on a collection-valued relationship.
    Empty {
        source: Source,
        relationship: String,
        negated: bool,
    },
}

/// Resolves attribute names against the entities of a query.
pub(crate) trait Scope {
    /// Qualified column for `source.name`.
    fn attribute(&self, dialect: Dialect, source: Source, name: &str) -> Result<String>;

    /// `SELECT 1 ...` subquery matching the members of `source.relationship`.
    fn members(&self, dialect: Dialect, source: Source, relationship: &str) -> Result<String>;
}

/// Scope for statement builders: only raw columns are allowed.
pub(crate) struct Unscoped;

impl Scope for Unscoped {
    fn attribute(&self, _dialect: Dialect, _source: Source, name: &str) -> Result<String> {
        Err(Error::Custom(format!(
            "attribute `{name}` can only be used inside a criteria query"
        )))
    }

    fn members(&self, _dialect: Dialect, _source: Source, relationship: &str) -> Result<String> {
        Err(Error::Custom(format!(
            "collection `{relationship}` can only be tested inside a criteria query"
        )))
    }
}

impl Expr {
    /// A raw column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// A bound value.
    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Value(value.into())
    }

    fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    /// `self = value`
    pub fn eq(self, value: impl Into<Value>) -> Self {
        self.binary(BinaryOp::Eq, Expr::value(value))
    }

    /// `self <> value`
    pub fn ne(self, value: impl Into<Value>) -> Self {
        self.binary(BinaryOp::Ne, Expr::value(value))
    }

    /// `self < value`
    pub fn lt(self, value: impl Into<Value>) -> Self {
        self.binary(BinaryOp::Lt, Expr::value(value))
    }

    /// `self <= value`
    pub fn le(self, value: impl Into<Value>) -> Self {
        self.binary(BinaryOp::Le, Expr::value(value))
    }

    /// `self > value`
    pub fn gt(self, value: impl Into<Value>) -> Self {
        self.binary(BinaryOp::Gt, Expr::value(value))
    }

    /// `self >= value`
    pub fn ge(self, value: impl Into<Value>) -> Self {
        self.binary(BinaryOp::Ge, Expr::value(value))
    }

    /// `self = other` for two expressions.
    pub fn eq_expr(self, other: Expr) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self LIKE pattern`
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
        }
    }

    /// `self NOT LIKE pattern`
    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
        }
    }

    /// `self IS NULL`
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `self AND other`
    pub fn and(self, other: Expr) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// `self OR other`
    pub fn or(self, other: Expr) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// `NOT self`
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub(crate) fn render(
        &self,
        scope: &dyn Scope,
        dialect: Dialect,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        match self {
            Expr::Column(name) => Ok(dialect.quote_ident(name)),
            Expr::Attribute { source, name } => scope.attribute(dialect, *source, name),
            Expr::Value(value) => {
                params.push(value.clone());
                Ok(dialect.placeholder(params.len()))
            }
            Expr::Binary { left, op, right } => {
                let l = left.render(scope, dialect, params)?;
                let r = right.render(scope, dialect, params)?;
                Ok(format!("({l} {} {r})", op.as_sql()))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let e = expr.render(scope, dialect, params)?;
                params.push(Value::Text(pattern.clone()));
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{e} {not}LIKE {}", dialect.placeholder(params.len())))
            }
            Expr::IsNull { expr, negated } => {
                let e = expr.render(scope, dialect, params)?;
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{e} IS {not}NULL"))
            }
            Expr::Not(inner) => Ok(format!("NOT ({})", inner.render(scope, dialect, params)?)),
            Expr::Empty {
                source,
                relationship,
                negated,
            } => {
                let members = scope.members(dialect, *source, relationship)?;
                let exists = if *negated { "EXISTS" } else { "NOT EXISTS" };
                Ok(format!("{exists} ({members})"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(expr: &Expr) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = expr
            .render(&Unscoped, Dialect::Sqlite, &mut params)
            .expect("render");
        (sql, params)
    }

    #[test]
    fn test_comparison_binds_parameters_in_order() {
        let expr = Expr::col("id").ge(10001_i64).and(Expr::col("id").lt(10003_i64));
        let (sql, params) = render(&expr);
        assert_eq!(sql, r#"(("id" >= ?1) AND ("id" < ?2))"#);
        assert_eq!(params, vec![Value::BigInt(10001), Value::BigInt(10003)]);
    }

    #[test]
    fn test_like_and_null_tests() {
        let (sql, params) = render(&Expr::col("name").like("%100 Steps"));
        assert_eq!(sql, r#""name" LIKE ?1"#);
        assert_eq!(params, vec![Value::Text("%100 Steps".into())]);

        let (sql, _) = render(&Expr::col("course_id").is_not_null().not());
        assert_eq!(sql, r#"NOT ("course_id" IS NOT NULL)"#);
    }

    #[test]
    fn test_attributes_require_a_scope() {
        let expr = Expr::Attribute {
            source: Source::Root,
            name: "name".into(),
        };
        let mut params = Vec::new();
        assert!(expr.render(&Unscoped, Dialect::Sqlite, &mut params).is_err());
    }
}
