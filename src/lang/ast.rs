//! Expression tree nodes for KaRL.
//!
//! The tree is a closed sum type: every construct the parser can produce is
//! a [`Node`] variant, and evaluation pattern-matches over it. Nodes are
//! immutable once built; evaluation against a knowledge state is the only
//! operation with side effects.

/// A variable name, possibly composed from literal fragments and embedded
/// sub-expressions (`agent{.i}.state`). Dynamic fragments are expanded to a
/// concrete key at evaluation time, before the read or write happens.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableName {
    /// Ordered name pieces; a single literal for ordinary variables.
    pub fragments: Vec<NameFragment>,
}

/// One piece of a variable name.
#[derive(Debug, Clone, PartialEq)]
pub enum NameFragment {
    /// A literal run of name characters.
    Literal(String),
    /// A `{...}` sub-expression whose value is rendered into the name.
    Expr(Box<Node>),
}

impl VariableName {
    /// A name made of a single literal fragment.
    #[must_use]
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            fragments: vec![NameFragment::Literal(name.into())],
        }
    }

    /// The concrete key if the name has no dynamic fragments.
    #[must_use]
    pub fn as_static(&self) -> Option<&str> {
        match self.fragments.as_slice() {
            [NameFragment::Literal(name)] => Some(name),
            _ => None,
        }
    }

    /// True if any fragment is a sub-expression.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.fragments
            .iter()
            .any(|f| matches!(f, NameFragment::Expr(_)))
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!` logical negation.
    Not,
    /// `-` arithmetic negation.
    Negate,
    /// `++` increment: mutates variables, computes `literal + 1` otherwise.
    Increment,
    /// `--` decrement: mutates variables, computes `literal - 1` otherwise.
    Decrement,
}

/// Binary arithmetic and comparison operators.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// Short-circuiting logical operators.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Assignment flavors. Compound forms read the target first.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

/// The left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// A plain (possibly dynamic) variable.
    Variable(VariableName),
    /// An array element, `name[index]`.
    Index {
        name: VariableName,
        index: Box<Node>,
    },
}

/// An expression tree node.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Integer(i64),
    Double(f64),
    Text(String),
    /// `[a, b, c]` array literal; evaluates to an integer or double array.
    List(Vec<Node>),
    /// Variable read.
    Variable(VariableName),
    /// Array element read, `name[index]`.
    Index {
        name: VariableName,
        index: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `left => right`: evaluate right only when left is true.
    Implies {
        left: Box<Node>,
        right: Box<Node>,
    },
    Assign {
        target: AssignTarget,
        op: AssignOp,
        value: Box<Node>,
    },
    /// `a ; b ; c`: evaluate in order, result is the last operand.
    Sequence(Vec<Node>),
    /// `a ;> b`: evaluate in order, result is the rightmost operand.
    ReturnRight(Vec<Node>),
    /// `a , b`: evaluate in order, result is the leftmost operand.
    CommaJoin(Vec<Node>),
    /// `name[start->end)` / `name[start-step>end]` counted loop.
    ForLoop {
        var: VariableName,
        start: Box<Node>,
        step: Option<Box<Node>>,
        end: Box<Node>,
        /// `]` includes the end value, `)` excludes it.
        inclusive: bool,
        body: Option<Box<Node>>,
    },
    /// `f(a, b, ...)` resolved through the function registry.
    Call {
        name: String,
        args: Vec<Node>,
    },
}

impl Node {
    /// True if the subtree contains no variable or function reference, so
    /// its value can never change between evaluations.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Integer(_) | Self::Double(_) | Self::Text(_) => true,
            Self::List(items) => items.iter().all(Node::is_constant),
            Self::Variable(_)
            | Self::Index { .. }
            | Self::Assign { .. }
            | Self::ForLoop { .. }
            | Self::Call { .. } => false,
            Self::Unary { op, operand } => match op {
                // Increment/decrement of a literal is pure arithmetic.
                UnaryOp::Not | UnaryOp::Negate | UnaryOp::Increment | UnaryOp::Decrement => {
                    operand.is_constant()
                }
            },
            Self::Binary { left, right, .. }
            | Self::Logical { left, right, .. }
            | Self::Implies { left, right } => left.is_constant() && right.is_constant(),
            Self::Sequence(items) | Self::ReturnRight(items) | Self::CommaJoin(items) => {
                items.iter().all(Node::is_constant)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_names() {
        let n = VariableName::simple(".x");
        assert_eq!(n.as_static(), Some(".x"));
        assert!(!n.is_dynamic());

        let dynamic = VariableName {
            fragments: vec![
                NameFragment::Literal("agent".into()),
                NameFragment::Expr(Box::new(Node::Variable(VariableName::simple(".i")))),
            ],
        };
        assert!(dynamic.is_dynamic());
        assert_eq!(dynamic.as_static(), None);
    }

    #[test]
    fn constness() {
        assert!(Node::Integer(1).is_constant());
        assert!(Node::Binary {
            op: BinaryOp::Add,
            left: Box::new(Node::Integer(1)),
            right: Box::new(Node::Double(2.0)),
        }
        .is_constant());
        assert!(!Node::Variable(VariableName::simple("x")).is_constant());
        assert!(!Node::Call {
            name: "f".into(),
            args: vec![],
        }
        .is_constant());
    }
}
