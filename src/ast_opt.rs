//! AST-level optimization: purity inference and constant/algebraic folding.
//!
//! Grounded on spec.md §4.3 and on `compiler/ast.py`'s per-node `is_pure`
//! methods for the base cases; the call-graph precomputation borrows
//! `call_graph.rs`'s `extract_calls` style without the SCC machinery (the
//! purity fixed point here is a flat worklist, not Tarjan).

use crate::ast::{BinOp, Expr, ExprKind, Func, Identifier, Program};
use std::collections::{HashMap, HashSet};

/// Computes, for each function name, the set of function names it calls
/// directly (ignoring indirect calls through function pointers, which are
/// conservatively treated as impure at every call site).
fn extract_calls(body: &Expr, out: &mut HashSet<String>) {
    match &body.kind {
        ExprKind::Call(callee, args) => {
            if let ExprKind::Ident(Identifier::Function { name, .. }) = &callee.kind {
                out.insert(name.to_string());
            } else {
                out.insert(String::new()); // marker: indirect call present
            }
            for a in args {
                extract_calls(a, out);
            }
        }
        ExprKind::Binary(_, l, r) => {
            extract_calls(l, out);
            extract_calls(r, out);
        }
        ExprKind::AddrOf(e) | ExprKind::Deref(e) => extract_calls(e, out),
        ExprKind::Copy { target, value } => {
            extract_calls(target, out);
            extract_calls(value, out);
        }
        ExprKind::Comma(a, b) => {
            extract_calls(a, out);
            extract_calls(b, out);
        }
        ExprKind::Loop { cond, body } => {
            extract_calls(cond, out);
            extract_calls(body, out);
        }
        ExprKind::Return(Some(e)) => extract_calls(e, out),
        ExprKind::Return(None) | ExprKind::Nop | ExprKind::Number(..) | ExprKind::StringLit(_) | ExprKind::Ident(_) => {}
    }
}

/// Monotone fixed point over the flat function list: a function is pure iff
/// every expression it contains is pure, where a `Call` is pure iff its
/// callee is (so far) known pure. Iterates until no new function is decided,
/// matching spec.md's description exactly — no SCC detection is needed
/// because the worklist simply reruns until stable; self-recursive and
/// mutually-recursive functions default to impure unless proven otherwise,
/// which is conservative but sound.
pub fn infer_purity(program: &mut Program) {
    let callees: HashMap<String, HashSet<String>> = program
        .funcs
        .iter()
        .map(|f| {
            let mut calls = HashSet::new();
            extract_calls(&f.body, &mut calls);
            (f.name.to_string(), calls)
        })
        .collect();

    let mut pure: HashMap<String, bool> = program.funcs.iter().map(|f| (f.name.to_string(), false)).collect();

    loop {
        let mut changed = false;
        for f in &program.funcs {
            if pure[f.name.as_ref()] {
                continue;
            }
            let calls = &callees[f.name.as_ref()];
            let has_indirect = calls.contains("");
            let all_callees_pure = !has_indirect
                && calls.iter().filter(|c| !c.is_empty()).all(|c| pure.get(c).copied().unwrap_or(false));
            let body_locally_pure = is_locally_pure(&f.body);
            if body_locally_pure && all_callees_pure {
                pure.insert(f.name.to_string(), true);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for f in &mut program.funcs {
        annotate_purity(&mut f.body, &pure);
    }
}

/// Purity ignoring calls (handled separately via the fixed point): only
/// writes through `Copy` to a non-local identifier, or any `Deref`-as-lvalue
/// write, make an expression impure by itself.
fn is_locally_pure(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Nop | ExprKind::Number(..) | ExprKind::StringLit(_) | ExprKind::Ident(_) => true,
        ExprKind::Binary(_, l, r) => is_locally_pure(l) && is_locally_pure(r),
        ExprKind::AddrOf(e) => is_locally_pure(e),
        ExprKind::Deref(e) => is_locally_pure(e),
        ExprKind::Call(_, args) => args.iter().all(is_locally_pure),
        ExprKind::Copy { target, value } => is_locally_pure(value) && matches!(target.kind, ExprKind::Ident(Identifier::Local { .. })),
        ExprKind::Comma(a, b) => is_locally_pure(a) && is_locally_pure(b),
        ExprKind::Loop { .. } => false,
        ExprKind::Return(_) => false,
    }
}

fn annotate_purity(e: &mut Expr, pure: &HashMap<String, bool>) {
    let self_pure = match &e.kind {
        ExprKind::Call(callee, args) => {
            let callee_pure = match &callee.kind {
                ExprKind::Ident(Identifier::Function { name, .. }) => pure.get(name.as_ref()).copied().unwrap_or(false),
                _ => false,
            };
            callee_pure && args.iter().all(is_locally_pure)
        }
        _ => is_locally_pure(e),
    };
    e.pure = Some(self_pure);
    match &mut e.kind {
        ExprKind::Binary(_, l, r) | ExprKind::Copy { target: l, value: r } => {
            annotate_purity(l, pure);
            annotate_purity(r, pure);
        }
        ExprKind::Comma(a, b) => {
            annotate_purity(a, pure);
            annotate_purity(b, pure);
        }
        ExprKind::Loop { cond, body } => {
            annotate_purity(cond, pure);
            annotate_purity(body, pure);
        }
        ExprKind::AddrOf(inner) | ExprKind::Deref(inner) => annotate_purity(inner, pure),
        ExprKind::Call(callee, args) => {
            annotate_purity(callee, pure);
            for a in args {
                annotate_purity(a, pure);
            }
        }
        ExprKind::Return(Some(inner)) => annotate_purity(inner, pure),
        _ => {}
    }
}

/// Constant and algebraic folding: `Number op Number` evaluates immediately;
/// `x*1`, `x+0`, `x&&1`/`1&&x` style identities collapse when the other
/// operand is a pure expression that may still need evaluating for its
/// side effects — so folding never discards a side-effecting operand.
pub fn fold(program: &mut Program) {
    for f in &mut program.funcs {
        fold_expr(&mut f.body);
    }
}

fn fold_expr(e: &mut Expr) {
    match &mut e.kind {
        ExprKind::Binary(op, l, r) => {
            fold_expr(l);
            fold_expr(r);
            if let (ExprKind::Number(a, ta), ExprKind::Number(b, _)) = (&l.kind, &r.kind) {
                if let Some(v) = eval_const(op, *a, *b) {
                    e.kind = ExprKind::Number(v, ta.clone());
                    return;
                }
            }
            apply_identities(e);
        }
        ExprKind::AddrOf(inner) | ExprKind::Deref(inner) => fold_expr(inner),
        ExprKind::Copy { target, value } => {
            fold_expr(target);
            fold_expr(value);
        }
        ExprKind::Comma(a, b) => {
            fold_expr(a);
            fold_expr(b);
            // A pure, discarded left side of a Comma can be dropped entirely.
            if matches!(a.pure, Some(true)) || is_locally_pure(a) {
                if matches!(a.kind, ExprKind::Nop | ExprKind::Number(..)) {
                    let rhs = std::mem::replace(&mut **b, Expr::new(ExprKind::Nop, a.ty.clone(), a.loc));
                    *e = rhs;
                }
            }
        }
        ExprKind::Loop { cond, body } => {
            fold_expr(cond);
            fold_expr(body);
        }
        ExprKind::Call(callee, args) => {
            fold_expr(callee);
            for a in args {
                fold_expr(a);
            }
        }
        ExprKind::Return(Some(inner)) => fold_expr(inner),
        _ => {}
    }
}

fn eval_const(op: &BinOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::Xor => a ^ b,
        BinOp::And => ((a != 0) && (b != 0)) as i64,
        BinOp::Or => ((a != 0) || (b != 0)) as i64,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::Shr => a.wrapping_shr(b as u32),
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
    })
}

/// `x * 1 == x`, `x + 0 == x`, `0 + x == x` — identities that never need to
/// inspect or discard the non-constant operand's side effects since it is
/// always kept.
fn apply_identities(e: &mut Expr) {
    let (op, l, r) = match &mut e.kind {
        ExprKind::Binary(op, l, r) => (op.clone(), l, r),
        _ => return,
    };
    let l_zero = matches!(l.kind, ExprKind::Number(0, _));
    let r_zero = matches!(r.kind, ExprKind::Number(0, _));
    let r_one = matches!(r.kind, ExprKind::Number(1, _));
    let l_one = matches!(l.kind, ExprKind::Number(1, _));

    match op {
        BinOp::Add if l_zero => {
            let rhs = std::mem::replace(&mut **r, Expr::new(ExprKind::Nop, r.ty.clone(), r.loc));
            *e = rhs;
        }
        BinOp::Add | BinOp::Sub if r_zero => {
            let lhs = std::mem::replace(&mut **l, Expr::new(ExprKind::Nop, l.ty.clone(), l.loc));
            *e = lhs;
        }
        BinOp::Mul if r_one => {
            let lhs = std::mem::replace(&mut **l, Expr::new(ExprKind::Nop, l.ty.clone(), l.loc));
            *e = lhs;
        }
        BinOp::Mul if l_one => {
            let rhs = std::mem::replace(&mut **r, Expr::new(ExprKind::Nop, r.ty.clone(), r.loc));
            *e = rhs;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceLoc;
    use crate::types::Type;

    fn num(v: i64) -> Expr {
        Expr::new(ExprKind::Number(v, Type::int16(true)), Type::int16(true), SourceLoc::new(1, 1))
    }

    #[test]
    fn folds_constant_addition() {
        let mut e = Expr::new(
            ExprKind::Binary(BinOp::Add, Box::new(num(2)), Box::new(num(3))),
            Type::int16(true),
            SourceLoc::new(1, 1),
        );
        fold_expr(&mut e);
        assert!(matches!(e.kind, ExprKind::Number(5, _)));
    }

    #[test]
    fn does_not_fold_division_by_zero() {
        let mut e = Expr::new(
            ExprKind::Binary(BinOp::Div, Box::new(num(2)), Box::new(num(0))),
            Type::int16(true),
            SourceLoc::new(1, 1),
        );
        fold_expr(&mut e);
        assert!(matches!(e.kind, ExprKind::Binary(..)));
    }

    #[test]
    fn mul_by_one_collapses_to_lhs() {
        let mut e = Expr::new(
            ExprKind::Binary(BinOp::Mul, Box::new(num(7)), Box::new(num(1))),
            Type::int16(true),
            SourceLoc::new(1, 1),
        );
        fold_expr(&mut e);
        assert!(matches!(e.kind, ExprKind::Number(7, _)));
    }

    #[test]
    fn bitwise_and_is_not_confused_with_logical_and() {
        // 2 & 1 == 0 (bitwise), but 2 && 1 == 1 (both truthy).
        let mut bitwise = Expr::new(
            ExprKind::Binary(BinOp::BitAnd, Box::new(num(2)), Box::new(num(1))),
            Type::int16(true),
            SourceLoc::new(1, 1),
        );
        fold_expr(&mut bitwise);
        assert!(matches!(bitwise.kind, ExprKind::Number(0, _)));

        let mut logical = Expr::new(
            ExprKind::Binary(BinOp::And, Box::new(num(2)), Box::new(num(1))),
            Type::int16(true),
            SourceLoc::new(1, 1),
        );
        fold_expr(&mut logical);
        assert!(matches!(logical.kind, ExprKind::Number(1, _)));
    }
}
