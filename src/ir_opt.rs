//! IR-level optimization: reaching-sources analysis, nop/dead elimination,
//! and jump threading.
//!
//! Grounded on `compiler/ir.py`'s `_optimize_delete_nops` and
//! `_optimize_jump_threading`, including the tortoise-and-hare cycle guard
//! called out in spec.md §4.5 (threading a chain of `Nop`s/unconditional
//! edges must not loop forever on a cyclic graph).

use crate::ir::{Inst, InstId, IrFunc, Reg};
use std::collections::HashMap;

/// For each instruction, the set of instructions whose `Copy`/`Const` result
/// could still be the live source of a register at that program point
/// (plain variant: exact defs; Copy-transparent variant additionally treats
/// `Copy{dst,src}` as forwarding `src`'s reaching set through `dst`).
pub struct Reaching {
    /// `defs[id]` is the instruction id (if any) that last wrote the
    /// register read at `id`, per register read.
    pub last_def: HashMap<(InstId, Reg), InstId>,
}

/// Walks the graph from `entry`, tracking the most recent definition of each
/// register reached along a single linear path (loops are visited once via
/// a visited-set, which is sound for a forward must-reach approximation
/// since this optimizer never needs a precise fixed point — it only proposes
/// candidates that `copy_propagate` double-checks before applying).
pub fn reaching_sources(f: &IrFunc, copy_transparent: bool) -> Reaching {
    let mut last_def: HashMap<(InstId, Reg), InstId> = HashMap::new();
    let mut visited = vec![false; f.nodes.len()];
    let mut cur_defs: HashMap<Reg, InstId> = HashMap::new();
    walk(f, f.entry, &mut visited, &mut cur_defs, &mut last_def, copy_transparent);
    Reaching { last_def }
}

fn walk(
    f: &IrFunc,
    id: InstId,
    visited: &mut Vec<bool>,
    defs: &mut HashMap<Reg, InstId>,
    out: &mut HashMap<(InstId, Reg), InstId>,
    copy_transparent: bool,
) {
    if visited[id] {
        return;
    }
    visited[id] = true;
    let node = &f.nodes[id];
    for r in used_regs(&node.inst) {
        if let Some(&d) = defs.get(&r) {
            out.insert((id, r), d);
        }
    }
    if let Some(dst) = defined_reg(&node.inst) {
        defs.insert(dst, id);
        if copy_transparent {
            if let Inst::Copy { src, .. } = &node.inst {
                if let Some(&d) = defs.get(src) {
                    out.insert((id, dst), d);
                }
            }
        }
    }
    if let Some(b) = node.branch {
        let mut defs2 = defs.clone();
        walk(f, b, visited, &mut defs2, out, copy_transparent);
    }
    if let Some(n) = node.next {
        walk(f, n, visited, defs, out, copy_transparent);
    }
}

fn used_regs(inst: &Inst) -> Vec<Reg> {
    match inst {
        Inst::Copy { src, .. } => vec![*src],
        Inst::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        Inst::Load { addr, .. } => vec![*addr],
        Inst::Store { addr, value } => vec![*addr, *value],
        Inst::Call { target, args, .. } => {
            let mut v = args.clone();
            if let crate::ir::CallTarget::Indirect(r) = target {
                v.push(*r);
            }
            v
        }
        Inst::Ifnz { cond, .. } => vec![*cond],
        Inst::Return { value: Some(v) } => vec![*v],
        _ => vec![],
    }
}

fn defined_reg(inst: &Inst) -> Option<Reg> {
    match inst {
        Inst::Const { dst, .. }
        | Inst::SymAddr { dst, .. }
        | Inst::FrameAddr { dst, .. }
        | Inst::Copy { dst, .. }
        | Inst::Binary { dst, .. }
        | Inst::Load { dst, .. } => Some(*dst),
        Inst::Call { dst: Some(dst), .. } => Some(*dst),
        _ => None,
    }
}

/// Removes `Nop` instructions that have exactly one predecessor-visible
/// successor edge by retargeting any edge pointing at them to their
/// `next`, then dropping them from live traversal. Since the arena never
/// shrinks (ids must stay stable), a `Nop` is "deleted" by becoming
/// unreachable, not by compacting the vector.
pub fn delete_nops(f: &mut IrFunc) {
    let retarget = |nodes: &[crate::ir::Node], mut id: InstId, guard: &mut usize| -> InstId {
        while matches!(nodes[id].inst, Inst::Nop) {
            *guard += 1;
            if *guard > nodes.len() + 1 {
                break; // cycle guard: a ring of Nops, stop rather than loop forever.
            }
            match nodes[id].next {
                Some(n) => id = n,
                None => break,
            }
        }
        id
    };

    if matches!(f.nodes[f.entry].inst, Inst::Nop) {
        let mut guard = 0;
        f.entry = retarget(&f.nodes, f.entry, &mut guard);
    }

    for i in 0..f.nodes.len() {
        if let Some(n) = f.nodes[i].next {
            let mut guard = 0;
            let resolved = retarget(&f.nodes, n, &mut guard);
            f.nodes[i].next = Some(resolved);
        }
        if let Some(b) = f.nodes[i].branch {
            let mut guard = 0;
            let resolved = retarget(&f.nodes, b, &mut guard);
            f.nodes[i].branch = Some(resolved);
        }
    }
}

/// Threads unconditional jumps: if `next` of a node is itself a lone `Nop`
/// whose own `next` is some `target`, and no other instruction branches into
/// that `Nop` except via fallthrough, point directly at `target`. Uses the
/// tortoise-and-hare technique to bound the walk on a cyclic graph (spec.md
/// §4.5), since naive following of `next` chains can spin forever on a
/// `Nop` that (after other transformations) points back to itself.
pub fn jump_thread(f: &mut IrFunc) {
    for i in 0..f.nodes.len() {
        if let Some(target) = f.nodes[i].branch {
            f.nodes[i].branch = Some(thread_target(&f.nodes, target));
        }
    }
}

fn thread_target(nodes: &[crate::ir::Node], start: InstId) -> InstId {
    let mut slow = start;
    let mut fast = start;
    loop {
        if !matches!(nodes[fast].inst, Inst::Nop) {
            return fast;
        }
        let next_fast = match nodes[fast].next {
            Some(n) => n,
            None => return fast,
        };
        if !matches!(nodes[next_fast].inst, Inst::Nop) {
            return next_fast;
        }
        fast = match nodes[next_fast].next {
            Some(n) => n,
            None => return next_fast,
        };
        slow = nodes[slow].next.unwrap_or(slow);
        if slow == fast {
            return slow; // cycle detected: stop here rather than spin.
        }
    }
}

/// A `Copy{dst,src}` whose only reader is an immediately following
/// `Return{Some(dst)}` is folded into `Return{Some(src)}`, letting
/// `eliminate_dead_writes` drop the now-unread `Copy` — the "tail-copy
/// elision" named alongside nop elimination and jump threading.
pub fn elide_tail_copies(f: &mut IrFunc) {
    for i in 0..f.nodes.len() {
        let (dst, src, next) = match &f.nodes[i].inst {
            Inst::Copy { dst, src } => (*dst, *src, f.nodes[i].next),
            _ => continue,
        };
        if let Some(n) = next {
            if let Inst::Return { value: Some(v) } = &mut f.nodes[n].inst {
                if *v == dst {
                    *v = src;
                }
            }
        }
    }
}

/// Dead-write elimination: rewrites any side-effect-free instruction whose
/// defined register is never read anywhere in the function to a `Nop`.
/// Runs to a fixed point, since removing one dead write can make an earlier
/// one dead in turn (`r1 = ...; r0 = Copy r1` with `r0` itself unused).
///
/// This checks "used anywhere in the function" rather than consulting
/// `reaching_sources`: that analysis visits each node once, so a register
/// read only by a second loop iteration along a back edge may never be
/// recorded against its def, and treating it as dead on that basis would be
/// unsound. The whole-function check is coarser but always safe; precise
/// per-path dead-write elimination would need a real fixed-point liveness
/// pass, not yet justified by anything this compiler currently needs.
pub fn eliminate_dead_writes(f: &mut IrFunc) {
    loop {
        let mut used: std::collections::HashSet<Reg> = std::collections::HashSet::new();
        for node in &f.nodes {
            used.extend(used_regs(&node.inst));
        }
        let mut changed = false;
        for node in &mut f.nodes {
            let dead = match &node.inst {
                Inst::Const { dst, .. }
                | Inst::SymAddr { dst, .. }
                | Inst::FrameAddr { dst, .. }
                | Inst::Copy { dst, .. }
                | Inst::Binary { dst, .. }
                | Inst::Load { dst, .. } => !used.contains(dst),
                _ => false,
            };
            if dead {
                node.inst = Inst::Nop;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

pub fn optimize(f: &mut IrFunc) {
    delete_nops(f);
    jump_thread(f);
    elide_tail_copies(f);
    eliminate_dead_writes(f);
    delete_nops(f);
    jump_thread(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Node;

    fn func_with(nodes: Vec<Node>, entry: InstId) -> IrFunc {
        IrFunc {
            name: "f".into(),
            nodes,
            entry,
            param_count: 0,
            local_regs: vec![],
            next_reg: 0,
            addr_taken_locals: vec![],
            callconv: crate::types::CallConv::StackCall,
        }
    }

    #[test]
    fn delete_nops_skips_chain_of_nops() {
        let nodes = vec![
            Node { inst: Inst::Nop, next: Some(1), branch: None },
            Node { inst: Inst::Nop, next: Some(2), branch: None },
            Node { inst: Inst::Return { value: None }, next: None, branch: None },
        ];
        let mut f = func_with(nodes, 0);
        delete_nops(&mut f);
        assert_eq!(f.entry, 2);
    }

    #[test]
    fn jump_thread_handles_self_cycle_without_hanging() {
        let nodes = vec![
            Node { inst: Inst::Const { dst: 0, value: 1 }, next: None, branch: Some(1) },
            Node { inst: Inst::Nop, next: Some(1), branch: None },
        ];
        let mut f = func_with(nodes, 0);
        jump_thread(&mut f); // must terminate
        assert!(f.nodes[0].branch.is_some());
    }

    #[test]
    fn tail_copy_elision_folds_copy_into_return() {
        let nodes = vec![
            Node { inst: Inst::Const { dst: 0, value: 7 }, next: Some(1), branch: None },
            Node { inst: Inst::Copy { dst: 1, src: 0 }, next: Some(2), branch: None },
            Node { inst: Inst::Return { value: Some(1) }, next: None, branch: None },
        ];
        let mut f = func_with(nodes, 0);
        elide_tail_copies(&mut f);
        assert!(matches!(f.nodes[2].inst, Inst::Return { value: Some(0) }));
    }

    #[test]
    fn dead_write_elimination_removes_unused_const() {
        let nodes = vec![
            Node { inst: Inst::Const { dst: 0, value: 99 }, next: Some(1), branch: None },
            Node { inst: Inst::Const { dst: 1, value: 1 }, next: Some(2), branch: None },
            Node { inst: Inst::Return { value: Some(1) }, next: None, branch: None },
        ];
        let mut f = func_with(nodes, 0);
        eliminate_dead_writes(&mut f);
        assert!(matches!(f.nodes[0].inst, Inst::Nop));
        assert!(matches!(f.nodes[1].inst, Inst::Const { value: 1, .. }));
    }

    #[test]
    fn dead_write_elimination_cascades_through_dead_copy_chain() {
        let nodes = vec![
            Node { inst: Inst::Const { dst: 0, value: 5 }, next: Some(1), branch: None },
            Node { inst: Inst::Copy { dst: 1, src: 0 }, next: Some(2), branch: None },
            Node { inst: Inst::Return { value: None }, next: None, branch: None },
        ];
        let mut f = func_with(nodes, 0);
        eliminate_dead_writes(&mut f);
        assert!(matches!(f.nodes[0].inst, Inst::Nop));
        assert!(matches!(f.nodes[1].inst, Inst::Nop));
    }
}
