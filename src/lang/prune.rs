//! Constant folding over parsed trees.
//!
//! Any subtree containing no variable or function reference is replaced by
//! its pre-computed literal value. Subtrees that would fail (division by
//! zero) are left unfolded so the failure surfaces at evaluation time, and
//! anything retaining a reference is never folded away.

use crate::context::KnowledgeState;
use crate::lang::ast::{AssignTarget, NameFragment, Node, VariableName};
use crate::lang::eval::evaluate_node;
use crate::record::KnowledgeValue;
use crate::settings::EvalSettings;

/// Folds every constant subtree of `node` into a literal.
#[must_use]
pub fn prune(node: Node) -> Node {
    let node = prune_children(node);
    if !is_literal(&node) && node.is_constant() {
        let mut scratch = KnowledgeState::default();
        if let Ok(record) = evaluate_node(&node, &mut scratch, &EvalSettings::default()) {
            if let Some(folded) = literal_of(record.value) {
                return folded;
            }
        }
    }
    node
}

const fn is_literal(node: &Node) -> bool {
    matches!(node, Node::Integer(_) | Node::Double(_) | Node::Text(_))
}

fn literal_of(value: KnowledgeValue) -> Option<Node> {
    match value {
        KnowledgeValue::Uncreated => Some(Node::Integer(0)),
        KnowledgeValue::Integer(v) => Some(Node::Integer(v)),
        KnowledgeValue::Double(v) => Some(Node::Double(v)),
        KnowledgeValue::String(s) => Some(Node::Text(s)),
        // Arrays and binaries have no literal node; leave the tree alone.
        KnowledgeValue::IntegerArray(_)
        | KnowledgeValue::DoubleArray(_)
        | KnowledgeValue::Binary(_) => None,
    }
}

fn prune_name(name: VariableName) -> VariableName {
    VariableName {
        fragments: name
            .fragments
            .into_iter()
            .map(|fragment| match fragment {
                NameFragment::Literal(text) => NameFragment::Literal(text),
                NameFragment::Expr(expr) => NameFragment::Expr(Box::new(prune(*expr))),
            })
            .collect(),
    }
}

fn prune_children(node: Node) -> Node {
    match node {
        Node::Integer(_) | Node::Double(_) | Node::Text(_) => node,
        Node::List(items) => Node::List(items.into_iter().map(prune).collect()),
        Node::Variable(name) => Node::Variable(prune_name(name)),
        Node::Index { name, index } => Node::Index {
            name: prune_name(name),
            index: Box::new(prune(*index)),
        },
        Node::Unary { op, operand } => Node::Unary {
            op,
            operand: Box::new(prune(*operand)),
        },
        Node::Binary { op, left, right } => Node::Binary {
            op,
            left: Box::new(prune(*left)),
            right: Box::new(prune(*right)),
        },
        Node::Logical { op, left, right } => Node::Logical {
            op,
            left: Box::new(prune(*left)),
            right: Box::new(prune(*right)),
        },
        Node::Implies { left, right } => Node::Implies {
            left: Box::new(prune(*left)),
            right: Box::new(prune(*right)),
        },
        Node::Assign { target, op, value } => Node::Assign {
            target: match target {
                AssignTarget::Variable(name) => AssignTarget::Variable(prune_name(name)),
                AssignTarget::Index { name, index } => AssignTarget::Index {
                    name: prune_name(name),
                    index: Box::new(prune(*index)),
                },
            },
            op,
            value: Box::new(prune(*value)),
        },
        Node::Sequence(items) => Node::Sequence(items.into_iter().map(prune).collect()),
        Node::ReturnRight(items) => Node::ReturnRight(items.into_iter().map(prune).collect()),
        Node::CommaJoin(items) => Node::CommaJoin(items.into_iter().map(prune).collect()),
        Node::ForLoop {
            var,
            start,
            step,
            end,
            inclusive,
            body,
        } => Node::ForLoop {
            var: prune_name(var),
            start: Box::new(prune(*start)),
            step: step.map(|s| Box::new(prune(*s))),
            end: Box::new(prune(*end)),
            inclusive,
            body: body.map(|b| Box::new(prune(*b))),
        },
        Node::Call { name, args } => Node::Call {
            name,
            args: args.into_iter().map(prune).collect(),
        },
    }
}
