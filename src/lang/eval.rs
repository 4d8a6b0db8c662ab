//! Tree evaluation against a knowledge state.
//!
//! Evaluation runs with exclusive access to the [`KnowledgeState`] — the
//! context's mutex is held by the caller — so re-entrancy from function
//! bodies and loop bodies is plain recursion over `&mut` state, not a
//! recursive lock.

use crate::context::KnowledgeState;
use crate::error::{EvalError, KarlResult};
use crate::functions::KarlFunction;
use crate::lang::ast::{
    AssignOp, AssignTarget, BinaryOp, LogicalOp, NameFragment, Node, UnaryOp, VariableName,
};
use crate::record::{KnowledgeRecord, KnowledgeValue};
use crate::settings::EvalSettings;

/// Expands a (possibly dynamic) variable name into a concrete key.
///
/// Embedded `{expr}` fragments are evaluated and their values rendered into
/// the name, so `agent{.i}.state` with `.i == 3` expands to `agent3.state`.
pub fn expand_name(
    name: &VariableName,
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<String> {
    if let Some(key) = name.as_static() {
        return Ok(key.to_string());
    }
    let mut key = String::new();
    for fragment in &name.fragments {
        match fragment {
            NameFragment::Literal(text) => key.push_str(text),
            NameFragment::Expr(expr) => {
                let value = evaluate_node(expr, state, settings)?;
                key.push_str(&value.to_string());
            }
        }
    }
    Ok(key)
}

/// Evaluates one node, reading and writing through the knowledge state.
#[allow(clippy::too_many_lines)]
pub fn evaluate_node(
    node: &Node,
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<KnowledgeRecord> {
    match node {
        Node::Integer(v) => Ok(KnowledgeRecord::from(*v)),
        Node::Double(v) => Ok(KnowledgeRecord::from(*v)),
        Node::Text(s) => Ok(KnowledgeRecord::from(s.as_str())),
        Node::List(items) => evaluate_list(items, state, settings),
        Node::Variable(name) => {
            let key = expand_name(name, state, settings)?;
            Ok(state.get(&key))
        }
        Node::Index { name, index } => {
            let key = expand_name(name, state, settings)?;
            let idx = evaluate_node(index, state, settings)?.as_integer();
            Ok(read_element(&state.get(&key), idx))
        }
        Node::Unary { op, operand } => evaluate_unary(*op, operand, state, settings),
        Node::Binary { op, left, right } => {
            let lhs = evaluate_node(left, state, settings)?;
            let rhs = evaluate_node(right, state, settings)?;
            apply_binary(*op, &lhs.value, &rhs.value)
        }
        Node::Logical { op, left, right } => {
            let lhs = evaluate_node(left, state, settings)?;
            match op {
                // The skipped side's effects must not occur.
                LogicalOp::And => {
                    if !lhs.is_true() {
                        return Ok(KnowledgeRecord::from(0i64));
                    }
                    let rhs = evaluate_node(right, state, settings)?;
                    Ok(KnowledgeRecord::from(i64::from(rhs.is_true())))
                }
                LogicalOp::Or => {
                    if lhs.is_true() {
                        return Ok(KnowledgeRecord::from(1i64));
                    }
                    let rhs = evaluate_node(right, state, settings)?;
                    Ok(KnowledgeRecord::from(i64::from(rhs.is_true())))
                }
            }
        }
        Node::Implies { left, right } => {
            let lhs = evaluate_node(left, state, settings)?;
            if lhs.is_true() {
                evaluate_node(right, state, settings)
            } else {
                Ok(lhs)
            }
        }
        Node::Assign { target, op, value } => {
            let rhs = evaluate_node(value, state, settings)?;
            assign(target, *op, rhs.value, state, settings)
        }
        Node::Sequence(items) | Node::ReturnRight(items) => {
            let mut last = KnowledgeRecord::from(0i64);
            for item in items {
                last = evaluate_node(item, state, settings)?;
            }
            Ok(last)
        }
        Node::CommaJoin(items) => {
            let mut first = None;
            for item in items {
                let value = evaluate_node(item, state, settings)?;
                if first.is_none() {
                    first = Some(value);
                }
            }
            Ok(first.unwrap_or_else(|| KnowledgeRecord::from(0i64)))
        }
        Node::ForLoop {
            var,
            start,
            step,
            end,
            inclusive,
            body,
        } => evaluate_for_loop(
            var,
            start,
            step.as_deref(),
            end,
            *inclusive,
            body.as_deref(),
            state,
            settings,
        ),
        Node::Call { name, args } => evaluate_call(name, args, state, settings),
    }
}

fn evaluate_list(
    items: &[Node],
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<KnowledgeRecord> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        values.push(evaluate_node(item, state, settings)?.value);
    }
    let all_integer = values
        .iter()
        .all(|v| matches!(v, KnowledgeValue::Integer(_) | KnowledgeValue::Uncreated));
    let value = if all_integer {
        KnowledgeValue::IntegerArray(values.iter().map(KnowledgeValue::as_integer).collect())
    } else {
        KnowledgeValue::DoubleArray(values.iter().map(KnowledgeValue::as_double).collect())
    };
    Ok(KnowledgeRecord::new(value))
}

fn evaluate_unary(
    op: UnaryOp,
    operand: &Node,
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<KnowledgeRecord> {
    match op {
        UnaryOp::Not => {
            let value = evaluate_node(operand, state, settings)?;
            Ok(KnowledgeRecord::from(i64::from(!value.is_true())))
        }
        UnaryOp::Negate => {
            let value = evaluate_node(operand, state, settings)?;
            Ok(KnowledgeRecord::new(value.value.negate()))
        }
        UnaryOp::Increment | UnaryOp::Decrement => {
            let delta = KnowledgeValue::Integer(if op == UnaryOp::Increment { 1 } else { -1 });
            // On a variable the new value is written back; on anything else
            // the adjusted value is simply computed.
            if let Node::Variable(name) = operand {
                let key = expand_name(name, state, settings)?;
                let current = state.get(&key);
                let next = current.value.add(&delta);
                state.apply_update(&key, next.clone(), &settings.update)?;
                Ok(KnowledgeRecord::new(next))
            } else {
                let value = evaluate_node(operand, state, settings)?;
                Ok(KnowledgeRecord::new(value.value.add(&delta)))
            }
        }
    }
}

fn apply_binary(
    op: BinaryOp,
    lhs: &KnowledgeValue,
    rhs: &KnowledgeValue,
) -> KarlResult<KnowledgeRecord> {
    let value = match op {
        BinaryOp::Add => lhs.add(rhs),
        BinaryOp::Subtract => lhs.subtract(rhs),
        BinaryOp::Multiply => lhs.multiply(rhs),
        BinaryOp::Divide => lhs.divide(rhs)?,
        BinaryOp::Modulo => lhs.modulo(rhs)?,
        BinaryOp::Equal => KnowledgeValue::from(lhs.loosely_equals(rhs)),
        BinaryOp::NotEqual => KnowledgeValue::from(!lhs.loosely_equals(rhs)),
        BinaryOp::Less => KnowledgeValue::from(lhs.compare(rhs) == std::cmp::Ordering::Less),
        BinaryOp::LessEqual => KnowledgeValue::from(lhs.compare(rhs) != std::cmp::Ordering::Greater),
        BinaryOp::Greater => KnowledgeValue::from(lhs.compare(rhs) == std::cmp::Ordering::Greater),
        BinaryOp::GreaterEqual => KnowledgeValue::from(lhs.compare(rhs) != std::cmp::Ordering::Less),
    };
    Ok(KnowledgeRecord::new(value))
}

fn assign(
    target: &AssignTarget,
    op: AssignOp,
    rhs: KnowledgeValue,
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<KnowledgeRecord> {
    match target {
        AssignTarget::Variable(name) => {
            let key = expand_name(name, state, settings)?;
            let assigned = match op {
                AssignOp::Assign => rhs,
                AssignOp::AddAssign => state.get(&key).value.add(&rhs),
                AssignOp::SubAssign => state.get(&key).value.subtract(&rhs),
                AssignOp::MulAssign => state.get(&key).value.multiply(&rhs),
                AssignOp::DivAssign => state.get(&key).value.divide(&rhs)?,
            };
            state.apply_update(&key, assigned.clone(), &settings.update)?;
            Ok(KnowledgeRecord::new(assigned))
        }
        AssignTarget::Index { name, index } => {
            let key = expand_name(name, state, settings)?;
            let idx = evaluate_node(index, state, settings)?.as_integer();
            let element = match op {
                AssignOp::Assign => rhs,
                AssignOp::AddAssign => read_element(&state.get(&key), idx).value.add(&rhs),
                AssignOp::SubAssign => read_element(&state.get(&key), idx).value.subtract(&rhs),
                AssignOp::MulAssign => read_element(&state.get(&key), idx).value.multiply(&rhs),
                AssignOp::DivAssign => read_element(&state.get(&key), idx).value.divide(&rhs)?,
            };
            write_element(&key, idx, element, state, settings)
        }
    }
}

/// Reads one element of an array record. Index 0 of a scalar reads the
/// scalar itself; anything out of range is uncreated.
fn read_element(record: &KnowledgeRecord, idx: i64) -> KnowledgeRecord {
    if idx < 0 {
        return KnowledgeRecord::uncreated();
    }
    #[allow(clippy::cast_sign_loss)]
    let i = idx as usize;
    match &record.value {
        KnowledgeValue::IntegerArray(vs) => vs
            .get(i)
            .map_or_else(KnowledgeRecord::uncreated, |v| KnowledgeRecord::from(*v)),
        KnowledgeValue::DoubleArray(vs) => vs
            .get(i)
            .map_or_else(KnowledgeRecord::uncreated, |v| KnowledgeRecord::from(*v)),
        KnowledgeValue::Uncreated => KnowledgeRecord::uncreated(),
        other if i == 0 => KnowledgeRecord::new(other.clone()),
        _ => KnowledgeRecord::uncreated(),
    }
}

/// Writes one element of an array record, growing the array with zeros.
/// Assigning a double element promotes an integer array.
fn write_element(
    key: &str,
    idx: i64,
    element: KnowledgeValue,
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<KnowledgeRecord> {
    if idx < 0 {
        return Err(EvalError::InvalidKey {
            key: format!("{key}[{idx}]"),
        }
        .into());
    }
    #[allow(clippy::cast_sign_loss)]
    let i = idx as usize;
    let current = state.get(key);
    let element_is_double = matches!(element, KnowledgeValue::Double(_) | KnowledgeValue::DoubleArray(_));
    let updated = match current.value {
        KnowledgeValue::IntegerArray(mut vs) if !element_is_double => {
            if vs.len() <= i {
                vs.resize(i + 1, 0);
            }
            vs[i] = element.as_integer();
            KnowledgeValue::IntegerArray(vs)
        }
        KnowledgeValue::IntegerArray(vs) => {
            #[allow(clippy::cast_precision_loss)]
            let mut ds: Vec<f64> = vs.iter().map(|v| *v as f64).collect();
            if ds.len() <= i {
                ds.resize(i + 1, 0.0);
            }
            ds[i] = element.as_double();
            KnowledgeValue::DoubleArray(ds)
        }
        KnowledgeValue::DoubleArray(mut vs) => {
            if vs.len() <= i {
                vs.resize(i + 1, 0.0);
            }
            vs[i] = element.as_double();
            KnowledgeValue::DoubleArray(vs)
        }
        _ if element_is_double => {
            let mut vs = vec![0.0; i + 1];
            vs[i] = element.as_double();
            KnowledgeValue::DoubleArray(vs)
        }
        _ => {
            let mut vs = vec![0; i + 1];
            vs[i] = element.as_integer();
            KnowledgeValue::IntegerArray(vs)
        }
    };
    state.apply_update(key, updated, &settings.update)?;
    Ok(KnowledgeRecord::new(element))
}

#[allow(clippy::too_many_arguments)]
fn evaluate_for_loop(
    var: &VariableName,
    start: &Node,
    step: Option<&Node>,
    end: &Node,
    inclusive: bool,
    body: Option<&Node>,
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<KnowledgeRecord> {
    let key = expand_name(var, state, settings)?;
    let start = evaluate_node(start, state, settings)?.as_integer();
    let end = evaluate_node(end, state, settings)?.as_integer();
    let step = match step {
        Some(node) => evaluate_node(node, state, settings)?.as_integer(),
        None => 1,
    };
    if step == 0 {
        return Err(EvalError::ZeroLoopStep.into());
    }

    let mut iterations: i64 = 0;
    let mut i = start;
    loop {
        let in_range = if step > 0 {
            if inclusive {
                i <= end
            } else {
                i < end
            }
        } else if inclusive {
            i >= end
        } else {
            i > end
        };
        if !in_range {
            break;
        }
        state.apply_update(&key, KnowledgeValue::Integer(i), &settings.update)?;
        if let Some(body) = body {
            evaluate_node(body, state, settings)?;
        }
        iterations += 1;
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(KnowledgeRecord::from(iterations))
}

fn evaluate_call(
    name: &str,
    args: &[Node],
    state: &mut KnowledgeState,
    settings: &EvalSettings,
) -> KarlResult<KnowledgeRecord> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(evaluate_node(arg, state, settings)?);
    }
    let Some(function) = state.function(name) else {
        return Err(EvalError::UndefinedFunction {
            name: name.to_string(),
        }
        .into());
    };
    match function {
        KarlFunction::Native(f) => f(&values, state),
        KarlFunction::Expression(compiled) => {
            // Arguments are handed to the body as conventionally named
            // local temporaries.
            state.apply_update(
                ".karl.args",
                KnowledgeValue::Integer(values.len() as i64),
                &settings.update,
            )?;
            for (i, value) in values.iter().enumerate() {
                state.apply_update(
                    &format!(".karl.arg{i}"),
                    value.value.clone(),
                    &settings.update,
                )?;
            }
            evaluate_node(compiled.root(), state, settings)
        }
    }
}
