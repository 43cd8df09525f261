#![deny(warnings)]
//! repair: makes a single Boolean literal true by nudging the arithmetic
//! variables its atom depends on.
//! - `repair` tries a nonlinear move, then the same search with tabu
//!   relaxed, then falls back to resetting every nonlinear factor.
//! - `repair_up`/`repair_down` re-evaluate or invert a single definition
//!   node, used by the engine when walking a variable's dependency chain.

use atoms::{AtomTable, RelOp};
use ctx_api::{AtomId, Ctx, ExprRef, Lit};
use num::Num;
use std::collections::HashMap;
use term_dag::{OpKind, Store, VarDef, VarId};

pub struct RepairParams {
    pub tabu_tenure: u64,
    pub max_candidates: usize,
    pub cb: f64,
}

impl Default for RepairParams {
    fn default() -> Self {
        RepairParams { tabu_tenure: 10, max_candidates: 8, cb: 2.0 }
    }
}

fn holds_value<N: Num>(op: RelOp, v: N) -> bool {
    match op {
        RelOp::Le => v.sign() <= 0,
        RelOp::Lt => v.sign() < 0,
        RelOp::Eq => v.is_zero(),
    }
}

/// Whether atom `aid` is wanted true given the surrounding Boolean
/// assignment, falling back to its own current truth if it has no
/// registered Boolean variable (e.g. an atom built only for lookahead).
fn wanted_truth<N: Num, C: Ctx<N>>(ctx: &C, atoms: &AtomTable<N>, aid: AtomId) -> bool {
    match atoms.bool_var_of(aid) {
        Some(bv) => ctx.is_true(Lit::positive(bv)),
        None => atoms.atom(aid).holds(),
    }
}

fn count_make_break<N: Num, C: Ctx<N>>(
    ctx: &C,
    atoms: &AtomTable<N>,
    deltas: &[(AtomId, N)],
) -> (u64, u64) {
    let mut make = 0u64;
    let mut breaks = 0u64;
    for (aid, val) in deltas {
        let atom = atoms.atom(*aid);
        let old_holds = atom.holds();
        let new_holds = holds_value(atom.op, val.clone());
        let want = wanted_truth(ctx, atoms, *aid);
        if new_holds == want && old_holds != want {
            make += 1;
        }
        if new_holds != want && old_holds == want {
            breaks += 1;
        }
    }
    (make, breaks)
}

fn breaks_tabu_protected_unit<N: Num, C: Ctx<N>>(ctx: &C, atoms: &AtomTable<N>, deltas: &[(AtomId, N)]) -> bool {
    deltas.iter().any(|(aid, val)| {
        let Some(bv) = atoms.bool_var_of(*aid) else { return false };
        if !ctx.is_unit(Lit::positive(bv)) {
            return false;
        }
        let atom = atoms.atom(*aid);
        atom.holds() && !holds_value(atom.op, val.clone())
    })
}

/// One RAII scope: disables tabu for its lifetime, restoring the prior
/// value on drop.
pub struct TabuScope<'a> {
    flag: &'a mut bool,
    prev: bool,
}

impl<'a> Drop for TabuScope<'a> {
    fn drop(&mut self) {
        *self.flag = self.prev;
    }
}

pub fn disable_tabu(flag: &mut bool) -> TabuScope<'_> {
    let prev = *flag;
    *flag = false;
    TabuScope { flag, prev }
}

/// Build candidate `(variable, new_value, score)` triples for every
/// nonlinear factor of `atom_id`, scored by how many other atoms they'd
/// make/break.
pub fn find_nl_moves<N: Num, C: Ctx<N>>(
    store: &Store<N>,
    atoms: &AtomTable<N>,
    ctx: &C,
    atom_id: AtomId,
    step: u64,
    tabu_enabled: bool,
    params: &RepairParams,
) -> Vec<(VarId, N, f64)> {
    let atom = atoms.atom(atom_id).clone();
    let mut candidates = Vec::new();
    for (factor, _group) in &atom.nonlinear {
        let proposals = if let Some(coeff) = moves::is_linear(store, &atom, *factor) {
            moves::find_linear_moves(store, &atom, *factor, coeff)
        } else if moves::is_quadratic(store, &atom, *factor).is_some() {
            moves::find_quadratic_moves(store, &atom, *factor)
        } else {
            Vec::new()
        };
        for new_value in proposals {
            let Some(clamped) = moves::is_permitted_update(store, *factor, new_value, step, tabu_enabled) else {
                continue;
            };
            if clamped == store.var(*factor).value {
                continue;
            }
            let Ok(deltas) = propagate::update_num(store, atoms, *factor, clamped.clone()) else {
                continue;
            };
            let (make, breaks) = count_make_break(ctx, atoms, &deltas);
            let protected = breaks_tabu_protected_unit(ctx, atoms, &deltas);
            let score = moves::compute_score(make, breaks, params.cb, protected);
            candidates.push((*factor, clamped, score));
        }
    }
    candidates
}

fn try_repair<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    expr_of: &HashMap<VarId, ExprRef>,
    atom_id: AtomId,
    step: u64,
    tabu_enabled: bool,
    params: &RepairParams,
) -> bool {
    let candidates = find_nl_moves(store, atoms, ctx, atom_id, step, tabu_enabled, params);
    let Some((v, new_value)) = moves::apply_update(store, candidates, params.max_candidates, step, params.tabu_tenure, ctx) else {
        return false;
    };
    propagate::update(store, atoms, ctx, v, new_value, expr_of).is_ok() && atoms.atom(atom_id).holds()
}

/// Reset every nonlinear factor of `atom_id` to a fresh random value in its
/// admissible range, clearing tabu. The fallback of last resort: always
/// makes progress, though it may not satisfy the atom.
pub fn find_reset_moves<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    expr_of: &HashMap<VarId, ExprRef>,
    atom_id: AtomId,
    step: u64,
) -> bool {
    let factors: Vec<VarId> = atoms.atom(atom_id).nonlinear.iter().map(|(f, _)| *f).collect();
    for f in factors {
        let new_value = moves::add_reset_update(store, f, ctx);
        let _ = propagate::update(store, atoms, ctx, f, new_value, expr_of);
        let _ = step;
    }
    atoms.atom(atom_id).holds()
}

/// Try to make `lit` true: a nonlinear move, then the same search with
/// tabu relaxed, then a reset of every nonlinear factor as last resort.
pub fn repair<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    expr_of: &HashMap<VarId, ExprRef>,
    lit: Lit,
    step: u64,
    tabu_enabled: &mut bool,
    params: &RepairParams,
) -> bool {
    let Some(atom_id) = ctx.atom(lit.var) else { return false };

    if try_repair(store, atoms, ctx, expr_of, atom_id, step, *tabu_enabled, params) {
        return true;
    }

    let relaxed = {
        let _scope = disable_tabu(tabu_enabled);
        try_repair(store, atoms, ctx, expr_of, atom_id, step, false, params)
    };
    if relaxed {
        return true;
    }

    find_reset_moves(store, atoms, ctx, expr_of, atom_id, step)
}

/// Recompute `v`'s value from its definition node's current children.
/// No-op for free (undefined) variables.
pub fn repair_up<N: Num>(store: &mut Store<N>, v: VarId) {
    let new_value = match store.var(v).def {
        VarDef::None => return,
        VarDef::Sum(sid) => {
            let node = store.sums[sid.0].clone();
            node.args
                .iter()
                .try_fold(node.coeff.clone(), |acc, (c, a)| {
                    acc.checked_add(c.clone().checked_mul(store.var(*a).value.clone()).ok()?).ok()
                })
                .unwrap_or(node.coeff)
        }
        VarDef::Product(mid) => {
            let node = store.muls[mid.0].clone();
            node.monomial
                .iter()
                .try_fold(N::one(), |acc, (a, p)| {
                    acc.checked_mul(store.var(*a).value.clone().checked_power_of(*p).ok()?).ok()
                })
                .unwrap_or(N::zero())
        }
        VarDef::Unary(oid) => {
            let node = store.ops[oid.0];
            store.eval_op(node.kind, node.arg1, node.arg2)
        }
    };
    store.var_mut(v).value = new_value;
}

/// Invert a unary/binary op node: given the value `v` should end up with,
/// return the child variable and the value it should be set to, or `None`
/// if the node can't be inverted for this target. `Power` is an
/// unsupported operator per the engine's fatal-contract list.
pub fn repair_down<N: Num>(store: &Store<N>, v: VarId, target: N) -> Option<(VarId, N)> {
    let VarDef::Unary(oid) = store.var(v).def else { return None };
    let node = store.ops[oid.0];
    match node.kind {
        OpKind::Abs => {
            if target.sign() < 0 {
                return None;
            }
            let cur = store.var(node.arg1).value.clone();
            let new_arg1 = if cur.sign() < 0 { target.checked_neg().ok()? } else { target };
            Some((node.arg1, new_arg1))
        }
        OpKind::ToInt | OpKind::ToReal => Some((node.arg1, target)),
        OpKind::Mod => {
            let arg2 = node.arg2?;
            let b = store.var(arg2).value.clone();
            if b.is_zero() {
                return None;
            }
            let cur_mod = store.eval_op(OpKind::Mod, node.arg1, Some(arg2));
            let delta = target.checked_sub(cur_mod).ok()?;
            let new_arg1 = store.var(node.arg1).value.clone().checked_add(delta).ok()?;
            Some((node.arg1, new_arg1))
        }
        OpKind::Div => {
            let arg2 = node.arg2?;
            let b = store.var(arg2).value.clone();
            if b.is_zero() {
                return None;
            }
            let new_arg1 = target.checked_mul(b).ok()?;
            Some((node.arg1, new_arg1))
        }
        OpKind::Rem | OpKind::Idiv => {
            // "Bail": these targets aren't inverted, the node is simply
            // re-evaluated from its existing children.
            None
        }
        OpKind::Power => unreachable!("not implemented: power repair"),
    }
}

/// Whether a unary/binary op node's stored value still matches what its
/// children would evaluate to. `Power`, `ToInt`, and `ToReal` have no
/// defined correctness check and are fatal if reached here.
pub fn eval_is_correct<N: Num>(store: &Store<N>, v: VarId) -> bool {
    let VarDef::Unary(oid) = store.var(v).def else { return true };
    let node = store.ops[oid.0];
    match node.kind {
        OpKind::Power => unreachable!("not implemented: power correctness check"),
        OpKind::ToInt | OpKind::ToReal => unreachable!("not implemented: to_int/to_real correctness check"),
        _ => store.eval_op(node.kind, node.arg1, node.arg2) == store.var(v).value,
    }
}
