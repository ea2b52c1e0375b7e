//! Intermediate representation: a register-numbered instruction graph.
//!
//! Grounded directly on `compiler/ir.py`: each function owns an arena of
//! instructions; control flow is expressed through `next`/`branch` indices
//! rather than pointers (DESIGN NOTES §9 — the Python original uses
//! intrusive, cyclable object references, which does not translate cleanly
//! to owned Rust values, so an index-addressed `Vec<Inst>` arena replaces
//! it). Lowering rules for `&&`/`||` (the diamond shape) and `Copy`/`Call`
//! follow `_compile_binary`/`_compile_copy`/`_compile_call` exactly.

use crate::ast::{BinOp, Expr, ExprKind, Func, Identifier, Program};
use std::collections::HashMap;
use std::rc::Rc;

pub type Reg = u32;
pub type InstId = usize;

#[derive(Debug, Clone)]
pub enum CallTarget {
    Direct(Rc<str>),
    Indirect(Reg),
}

#[derive(Debug, Clone)]
pub enum Inst {
    Nop,
    Const { dst: Reg, value: i64 },
    /// Address of a named symbol (global or string literal) plus a constant
    /// offset; also used for function addresses taken as values.
    SymAddr { dst: Reg, symbol: Rc<str>, offset: i64 },
    /// Address of a spill-eligible local's frame slot (the local is
    /// address-taken, so the backend must give it a memory home).
    FrameAddr { dst: Reg, local: u32 },
    Copy { dst: Reg, src: Reg },
    /// `signed` reflects whether either source operand was a signed `Int`
    /// in the AST, so codegen can pick `MLI`/`DVI`/`MDI` over `MUL`/`DIV`/`MOD`
    /// for `*`/`/`/`%` — plain registers carry no type of their own.
    Binary { op: BinOp, dst: Reg, lhs: Reg, rhs: Reg, signed: bool },
    Load { dst: Reg, addr: Reg },
    Store { addr: Reg, value: Reg },
    /// Reads a parameter/local virtual register that already holds its
    /// value (parameters are pre-seeded into their home registers by the
    /// backend's prologue).
    Call { dst: Option<Reg>, target: CallTarget, args: Vec<Reg> },
    /// Branches to `branch` (an instruction id) when `cond` is nonzero;
    /// otherwise falls through to `next`.
    Ifnz { cond: Reg, branch: InstId },
    Return { value: Option<Reg> },
}

/// One instruction plus its control-flow edges. `next` is `None` only for a
/// terminal `Return`.
#[derive(Debug, Clone)]
pub struct Node {
    pub inst: Inst,
    pub next: Option<InstId>,
    pub branch: Option<InstId>,
}

/// A function's lowered body: an arena of nodes plus the entry point and the
/// local-variable-to-register mapping (locals that are never address-taken
/// live directly in their home register; address-taken locals additionally
/// get a frame slot reachable via `FrameAddr`).
#[derive(Debug, Clone)]
pub struct IrFunc {
    pub name: Rc<str>,
    pub nodes: Vec<Node>,
    pub entry: InstId,
    pub param_count: u32,
    pub local_regs: Vec<Reg>,
    pub next_reg: Reg,
    pub addr_taken_locals: Vec<u32>,
    pub callconv: crate::types::CallConv,
}

#[derive(Debug, Clone)]
pub struct IrGlobal {
    pub name: Rc<str>,
    pub words: u32,
    pub exported: bool,
}

pub struct IrProgram {
    pub funcs: Vec<IrFunc>,
    pub globals: Vec<IrGlobal>,
}

struct Lowerer {
    nodes: Vec<Node>,
    next_reg: Reg,
    local_regs: Vec<Reg>,
    addr_taken_locals: Vec<u32>,
}

impl Lowerer {
    fn new(locals: usize) -> Self {
        let mut next_reg = 0;
        let local_regs: Vec<Reg> = (0..locals)
            .map(|_| {
                let r = next_reg;
                next_reg += 1;
                r
            })
            .collect();
        Lowerer { nodes: Vec::new(), next_reg, local_regs, addr_taken_locals: Vec::new() }
    }

    fn fresh_reg(&mut self) -> Reg {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    fn push(&mut self, inst: Inst) -> InstId {
        let id = self.nodes.len();
        self.nodes.push(Node { inst, next: None, branch: None });
        id
    }

    /// Appends `node_id` as the fallthrough successor of `from`, unless
    /// `from` is `None` (first instruction of the function).
    fn link(&mut self, from: Option<InstId>, to: InstId) {
        if let Some(f) = from {
            self.nodes[f].next = Some(to);
        }
    }

    /// Lowers `e`, emitting a chain starting after `pred` (the last emitted
    /// instruction so far, or `None` at function entry). Returns the
    /// register holding the expression's value (if any) and the id of the
    /// last instruction emitted, so the caller can keep chaining.
    fn lower_expr(&mut self, e: &Expr, pred: Option<InstId>) -> (Option<Reg>, Option<InstId>) {
        match &e.kind {
            ExprKind::Nop => (None, pred),
            ExprKind::Number(v, _) => {
                let dst = self.fresh_reg();
                let id = self.push(Inst::Const { dst, value: *v });
                self.link(pred, id);
                (Some(dst), Some(id))
            }
            ExprKind::StringLit(s) => {
                let dst = self.fresh_reg();
                let sym: Rc<str> = format!("$str{:x}", string_tag(s)).into();
                let id = self.push(Inst::SymAddr { dst, symbol: sym, offset: 0 });
                self.link(pred, id);
                (Some(dst), Some(id))
            }
            ExprKind::Ident(ident) => self.lower_ident_read(ident, pred),
            ExprKind::AddrOf(inner) => self.lower_addrof(inner, pred),
            ExprKind::Deref(inner) => {
                let (addr, last) = self.lower_expr(inner, pred);
                let addr = addr.expect("deref of non-value expression");
                let dst = self.fresh_reg();
                let id = self.push(Inst::Load { dst, addr });
                self.link(last, id);
                (Some(dst), Some(id))
            }
            ExprKind::Binary(BinOp::And, l, r) => self.lower_and(l, r, pred, e),
            ExprKind::Binary(BinOp::Or, l, r) => self.lower_or(l, r, pred, e),
            ExprKind::Binary(op, l, r) => {
                let signed = is_signed_int(&l.ty) || is_signed_int(&r.ty);
                let (lv, last1) = self.lower_expr(l, pred);
                let (rv, last2) = self.lower_expr(r, last1);
                let dst = self.fresh_reg();
                let id = self.push(Inst::Binary {
                    op: op.clone(),
                    dst,
                    lhs: lv.expect("lhs must produce a value"),
                    rhs: rv.expect("rhs must produce a value"),
                    signed,
                });
                self.link(last2, id);
                (Some(dst), Some(id))
            }
            ExprKind::Call(callee, args) => self.lower_call(callee, args, pred),
            ExprKind::Copy { target, value } => self.lower_copy(target, value, pred),
            ExprKind::Comma(a, b) => {
                let (_, last1) = self.lower_expr(a, pred);
                self.lower_expr(b, last1)
            }
            ExprKind::Loop { cond, body } => self.lower_loop(cond, body, pred),
            ExprKind::Return(value) => {
                let (v, last) = match value {
                    Some(inner) => self.lower_expr(inner, pred),
                    None => (None, pred),
                };
                let id = self.push(Inst::Return { value: v });
                self.link(last, id);
                (None, Some(id))
            }
        }
    }

    fn lower_ident_read(&mut self, ident: &Identifier, pred: Option<InstId>) -> (Option<Reg>, Option<InstId>) {
        match ident {
            Identifier::Local { slot, .. } => (Some(self.local_regs[*slot as usize]), pred),
            Identifier::Global { name, .. } => {
                let addr = self.fresh_reg();
                let id1 = self.push(Inst::SymAddr { dst: addr, symbol: name.clone(), offset: 0 });
                self.link(pred, id1);
                let dst = self.fresh_reg();
                let id2 = self.push(Inst::Load { dst, addr });
                self.link(Some(id1), id2);
                (Some(dst), Some(id2))
            }
            Identifier::Function { name, .. } => {
                let dst = self.fresh_reg();
                let id = self.push(Inst::SymAddr { dst, symbol: name.clone(), offset: 0 });
                self.link(pred, id);
                (Some(dst), Some(id))
            }
        }
    }

    fn lower_addrof(&mut self, inner: &Expr, pred: Option<InstId>) -> (Option<Reg>, Option<InstId>) {
        match &inner.kind {
            ExprKind::Ident(Identifier::Local { slot, .. }) => {
                self.addr_taken_locals.push(*slot);
                let dst = self.fresh_reg();
                let id = self.push(Inst::FrameAddr { dst, local: *slot });
                self.link(pred, id);
                (Some(dst), Some(id))
            }
            ExprKind::Ident(Identifier::Global { name, .. }) => {
                let dst = self.fresh_reg();
                let id = self.push(Inst::SymAddr { dst, symbol: name.clone(), offset: 0 });
                self.link(pred, id);
                (Some(dst), Some(id))
            }
            ExprKind::Deref(base) => self.lower_expr(base, pred),
            _ => panic!("address-of a non-lvalue reached IR lowering"),
        }
    }

    fn lower_and(&mut self, l: &Expr, r: &Expr, pred: Option<InstId>, e: &Expr) -> (Option<Reg>, Option<InstId>) {
        // Diamond shape per `compiler/ir.py::_compile_binary` for `&&`:
        // evaluate l; if zero, short-circuit to a Const 0 merge; else
        // evaluate r and use its (boolean-normalized) value.
        let (lv, last1) = self.lower_expr(l, pred);
        let lv = lv.expect("lhs of && must produce a value");
        let result = self.fresh_reg();
        let branch_id = self.push(Inst::Ifnz { cond: lv, branch: 0 });
        self.link(last1, branch_id);

        // Fallthrough (lhs was zero): result = 0.
        let zero_id = self.push(Inst::Const { dst: result, value: 0 });
        self.link(Some(branch_id), zero_id);
        let merge_nop = self.push(Inst::Nop);
        self.link(Some(zero_id), merge_nop);

        // Taken branch (lhs nonzero): evaluate rhs, copy into result.
        let rhs_start = self.nodes.len();
        let (rv, last2) = self.lower_expr(r, None);
        let copy_id = self.push(Inst::Copy { dst: result, src: rv.expect("rhs of && must produce a value") });
        self.link(last2, copy_id);
        self.nodes[copy_id].next = Some(merge_nop);
        self.nodes[branch_id].branch = Some(if last2.is_some() { rhs_start } else { copy_id });
        let _ = e;
        (Some(result), Some(merge_nop))
    }

    fn lower_or(&mut self, l: &Expr, r: &Expr, pred: Option<InstId>, e: &Expr) -> (Option<Reg>, Option<InstId>) {
        let (lv, last1) = self.lower_expr(l, pred);
        let lv = lv.expect("lhs of || must produce a value");
        let result = self.fresh_reg();
        let branch_id = self.push(Inst::Ifnz { cond: lv, branch: 0 });
        self.link(last1, branch_id);

        // Fallthrough (lhs was zero): evaluate rhs.
        let (rv, last2) = self.lower_expr(r, Some(branch_id));
        let copy_id = self.push(Inst::Copy { dst: result, src: rv.expect("rhs of || must produce a value") });
        self.link(last2, copy_id);
        let merge_nop = self.push(Inst::Nop);
        self.nodes[copy_id].next = Some(merge_nop);

        // Taken branch (lhs nonzero): result = lhs value directly.
        let taken_id = self.push(Inst::Copy { dst: result, src: lv });
        self.nodes[branch_id].branch = Some(taken_id);
        self.nodes[taken_id].next = Some(merge_nop);
        let _ = e;
        (Some(result), Some(merge_nop))
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr], pred: Option<InstId>) -> (Option<Reg>, Option<InstId>) {
        let (target, mut last) = match &callee.kind {
            ExprKind::Ident(Identifier::Function { name, .. }) => (CallTarget::Direct(name.clone()), pred),
            _ => {
                let (r, l) = self.lower_expr(callee, pred);
                (CallTarget::Indirect(r.expect("callee must produce a value")), l)
            }
        };
        let mut arg_regs = Vec::with_capacity(args.len());
        for a in args {
            let (v, l) = self.lower_expr(a, last);
            arg_regs.push(v.expect("argument must produce a value"));
            last = l;
        }
        let dst = self.fresh_reg();
        let id = self.push(Inst::Call { dst: Some(dst), target, args: arg_regs });
        self.link(last, id);
        (Some(dst), Some(id))
    }

    fn lower_copy(&mut self, target: &Expr, value: &Expr, pred: Option<InstId>) -> (Option<Reg>, Option<InstId>) {
        let (v, last1) = self.lower_expr(value, pred);
        let v = v.expect("rhs of assignment must produce a value");
        match &target.kind {
            ExprKind::Ident(Identifier::Local { slot, .. }) => {
                let dst = self.local_regs[*slot as usize];
                let id = self.push(Inst::Copy { dst, src: v });
                self.link(last1, id);
                (Some(dst), Some(id))
            }
            ExprKind::Ident(Identifier::Global { name, .. }) => {
                let addr = self.fresh_reg();
                let id1 = self.push(Inst::SymAddr { dst: addr, symbol: name.clone(), offset: 0 });
                self.link(last1, id1);
                let id2 = self.push(Inst::Store { addr, value: v });
                self.link(Some(id1), id2);
                (Some(v), Some(id2))
            }
            ExprKind::Deref(inner) => {
                let (addr, last2) = self.lower_expr(inner, last1);
                let id = self.push(Inst::Store { addr: addr.expect("store target must be an address"), value: v });
                self.link(last2, id);
                (Some(v), Some(id))
            }
            _ => panic!("assignment to a non-lvalue reached IR lowering"),
        }
    }

    /// `while (cond) body`: a head that re-evaluates `cond` every iteration,
    /// an `Ifnz` that falls through to `after` when false and branches into
    /// `body` when true, with the body's tail linked back to the head.
    /// Matches `compiler/ir.py`'s loop shape (condition re-tested at the
    /// top, not the bottom, so `for`/`while` never run the body once before
    /// the first check — `do...while` gets that via the first-iteration
    /// flag folded into `cond` at parse time, see `parser.rs`).
    fn lower_loop(&mut self, cond: &Expr, body: &Expr, pred: Option<InstId>) -> (Option<Reg>, Option<InstId>) {
        let head_nop = self.push(Inst::Nop);
        self.link(pred, head_nop);

        let (cv, last_cond) = self.lower_expr(cond, Some(head_nop));
        let cv = cv.expect("loop condition must produce a value");
        let branch_id = self.push(Inst::Ifnz { cond: cv, branch: 0 });
        self.link(last_cond, branch_id);

        let body_start = self.nodes.len();
        let (_, last_body) = self.lower_expr(body, None);
        self.nodes[branch_id].branch = Some(body_start);
        if let Some(lb) = last_body {
            self.nodes[lb].next = Some(head_nop);
        } else {
            // Empty body: the branch target is itself the head.
            self.nodes[branch_id].branch = Some(head_nop);
        }

        let after = self.push(Inst::Nop);
        self.nodes[branch_id].next = Some(after);
        (None, Some(after))
    }
}

fn is_signed_int(ty: &crate::types::Type) -> bool {
    matches!(ty, crate::types::Type::Int { signed: true, .. })
}

fn string_tag(s: &str) -> u64 {
    let mut h: u64 = 1469598103934665603;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

pub fn lower_program(program: &Program) -> IrProgram {
    let funcs = program.funcs.iter().map(lower_func).collect();
    let globals = program
        .globals
        .iter()
        .map(|g| IrGlobal {
            name: g.name.clone(),
            words: g.ty.sizeof().unwrap_or(1),
            exported: !matches!(g.storage, crate::ast::StorageClass::Static),
        })
        .collect();
    IrProgram { funcs, globals }
}

fn lower_func(f: &Func) -> IrFunc {
    let mut lowerer = Lowerer::new(f.locals.len());
    // The parser always appends a signature-correct implicit return
    // (`Return(0)` for non-void, a valueless `Return` for `void`) to every
    // function body, so unlike a body that merely falls off the end with no
    // terminator, lowering never needs to synthesize one here.
    let (_, _last) = lowerer.lower_expr(&f.body, None);
    let entry = 0;
    IrFunc {
        name: f.name.clone(),
        nodes: lowerer.nodes,
        entry,
        param_count: f.param_count,
        local_regs: lowerer.local_regs,
        next_reg: lowerer.next_reg,
        addr_taken_locals: lowerer.addr_taken_locals,
        callconv: f.sig.callconv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StorageClass;
    use crate::diagnostics::SourceLoc;
    use crate::types::{CallConv, FuncSig, Type};

    fn simple_return_func() -> Func {
        let loc = SourceLoc::new(1, 1);
        Func {
            name: "f".into(),
            sig: FuncSig { ret: Box::new(Type::int16(true)), params: vec![], callconv: CallConv::StackCall },
            param_count: 0,
            locals: vec![],
            body: Expr::new(
                ExprKind::Return(Some(Box::new(Expr::new(ExprKind::Number(42, Type::int16(true)), Type::int16(true), loc)))),
                Type::Void,
                loc,
            ),
            storage: StorageClass::Auto,
        }
    }

    #[test]
    fn lowers_return_constant() {
        let f = simple_return_func();
        let ir = lower_func(&f);
        assert!(ir.nodes.iter().any(|n| matches!(n.inst, Inst::Const { value: 42, .. })));
        assert!(ir.nodes.iter().any(|n| matches!(n.inst, Inst::Return { .. })));
    }

    #[test]
    fn every_node_but_returns_has_a_successor_or_branch() {
        let f = simple_return_func();
        let ir = lower_func(&f);
        for n in &ir.nodes {
            if !matches!(n.inst, Inst::Return { .. }) {
                assert!(n.next.is_some() || n.branch.is_some());
            }
        }
    }
}
