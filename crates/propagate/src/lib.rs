#![deny(warnings)]
//! propagate: pushes a committed variable value through its sum/product
//! parent chain and reconciles every atom that disagrees afterward.
//! Deep DAGs are walked with an explicit work stack (`simulate`'s `stack`
//! field below), not native recursion, since the parent chain depth is
//! bounded only by the input problem's nesting, not by this crate.

use atoms::AtomTable;
use ctx_api::{AtomId, Ctx, ExprRef, Lit};
use num::Num;
use std::collections::HashMap;
use term_dag::{Store, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFailed {
    OutOfRange,
    OutOfBounds,
    Overflow,
}

struct Propagated<N> {
    var: VarId,
    old: N,
    new: N,
}

/// Walk the transitive closure of sum/product parents reachable from
/// `origin` once it takes `new_value`, recomputing every affected parent's
/// value against an override map without touching `store`. Returns the set
/// of vars whose value actually changes, or `Overflow` at the first
/// arithmetic failure encountered anywhere in the cascade -- this is the
/// "pre-flight dry run" that makes `update` atomic: nothing commits unless
/// the whole cascade is known to be overflow-free.
fn simulate<N: Num>(store: &Store<N>, origin: VarId, new_value: N) -> Result<Vec<Propagated<N>>, UpdateFailed> {
    let mut overrides: HashMap<VarId, N> = HashMap::new();
    overrides.insert(origin, new_value);
    let mut stack: Vec<VarId> = vec![origin];

    while let Some(cur) = stack.pop() {
        for mid in store.var(cur).mul_occurs.clone() {
            let mnode = &store.muls[mid.0];
            let mut acc = N::one();
            let mut overflowed = false;
            for (fv, p) in &mnode.monomial {
                let base = overrides.get(fv).cloned().unwrap_or(store.var(*fv).value.clone());
                match base.checked_power_of(*p).and_then(|b| acc.clone().checked_mul(b)) {
                    Ok(v) => acc = v,
                    Err(_) => {
                        overflowed = true;
                        break;
                    }
                }
            }
            if overflowed {
                return Err(UpdateFailed::Overflow);
            }
            let pvar = mnode.var;
            let current = overrides.get(&pvar).cloned().unwrap_or(store.var(pvar).value.clone());
            if current != acc {
                overrides.insert(pvar, acc);
                stack.push(pvar);
            }
        }

        for sid in store.var(cur).sum_occurs.clone() {
            let snode = &store.sums[sid.0];
            let mut acc = snode.coeff.clone();
            let mut overflowed = false;
            for (c, av) in &snode.args {
                let base = overrides.get(av).cloned().unwrap_or(store.var(*av).value.clone());
                match c.clone().checked_mul(base).and_then(|p| acc.clone().checked_add(p)) {
                    Ok(v) => acc = v,
                    Err(_) => {
                        overflowed = true;
                        break;
                    }
                }
            }
            if overflowed {
                return Err(UpdateFailed::Overflow);
            }
            let pvar = snode.var;
            let current = overrides.get(&pvar).cloned().unwrap_or(store.var(pvar).value.clone());
            if current != acc {
                overrides.insert(pvar, acc);
                stack.push(pvar);
            }
        }
    }

    let mut touched: Vec<VarId> = overrides.keys().copied().collect();
    touched.sort_by_key(|v| v.0);
    Ok(touched
        .into_iter()
        .map(|v| Propagated { var: v, old: store.var(v).value.clone(), new: overrides[&v].clone() })
        .collect())
}

/// Commit `new_value` on `v`, propagating through every affected parent and
/// flipping every Boolean atom whose truth now disagrees. `expr_of` maps a
/// variable back to the surrounding context's AST node, for `new_value_eh`;
/// variables with no such mapping (purely internal ones) are skipped.
pub fn update<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    v: VarId,
    new_value: N,
    expr_of: &HashMap<VarId, ExprRef>,
) -> Result<(), UpdateFailed> {
    let old = store.var(v).value.clone();
    if new_value == old {
        return Ok(());
    }
    {
        let var_ref = store.var(v);
        if let Some((lo, hi)) = var_ref.range.clone() {
            if new_value < lo || new_value > hi {
                return Err(UpdateFailed::OutOfRange);
            }
        }
        if var_ref.in_bounds(old) && !var_ref.in_bounds(new_value.clone()) {
            return Err(UpdateFailed::OutOfBounds);
        }
    }

    let propagated = simulate(store, v, new_value)?;

    let mut queued: Vec<ctx_api::BoolVar> = Vec::new();
    for p in &propagated {
        let delta = match p.new.clone().checked_sub(p.old.clone()) {
            Ok(d) => d,
            Err(_) => return Err(UpdateFailed::Overflow),
        };
        for (coeff, bv) in store.var(p.var).linear_occurs.clone() {
            let Some(atom_id) = atoms.atom_of(bv) else { continue };
            if let Ok(inc) = coeff.checked_mul(delta.clone()) {
                let atom = atoms.atom_mut(atom_id);
                atom.args_value = atom.args_value.clone().checked_add(inc).unwrap_or(atom.args_value.clone());
            }
            let now_holds = atoms.atom(atom_id).holds();
            if now_holds != ctx.is_true(Lit::positive(bv)) {
                queued.push(bv);
            }
        }
    }

    for p in &propagated {
        store.var_mut(p.var).value = p.new.clone();
        if let Some(e) = expr_of.get(&p.var) {
            ctx.new_value_eh(*e);
        }
    }

    for bv in queued {
        if let Some(atom_id) = atoms.atom_of(bv) {
            if atoms.atom(atom_id).holds() != ctx.is_true(Lit::positive(bv)) {
                ctx.flip(bv);
            }
        }
    }

    Ok(())
}

/// Speculative variant of `update`: same propagation math, no commit.
/// Returns, for every atom whose `args_value` would change, its
/// hypothetical new value -- used by move proposers to score a candidate
/// before deciding whether to actually apply it.
pub fn update_num<N: Num>(
    store: &Store<N>,
    atoms: &AtomTable<N>,
    v: VarId,
    new_value: N,
) -> Result<Vec<(AtomId, N)>, UpdateFailed> {
    let propagated = simulate(store, v, new_value)?;
    let mut deltas: HashMap<AtomId, N> = HashMap::new();
    for p in &propagated {
        let delta = match p.new.clone().checked_sub(p.old.clone()) {
            Ok(d) => d,
            Err(_) => return Err(UpdateFailed::Overflow),
        };
        for (coeff, bv) in &store.var(p.var).linear_occurs {
            let Some(atom_id) = atoms.atom_of(*bv) else { continue };
            if let Ok(inc) = coeff.clone().checked_mul(delta.clone()) {
                let base = deltas.get(&atom_id).cloned().unwrap_or(N::zero());
                deltas.insert(atom_id, base.clone().checked_add(inc).unwrap_or(base));
            }
        }
    }
    Ok(deltas
        .into_iter()
        .map(|(id, d)| {
            let args_value = atoms.atom(id).args_value.clone();
            (id, args_value.clone().checked_add(d).unwrap_or(args_value))
        })
        .collect())
}

/// Downward-only half of `update_num`: only the atoms directly containing
/// `v` (no cascading through sum/product parents), O(affected atoms). Used
/// to cheaply score a single-variable linear move.
pub fn update_args_value<N: Num>(store: &Store<N>, atoms: &AtomTable<N>, v: VarId, delta: N) -> Vec<(AtomId, N)> {
    let mut out = Vec::new();
    for (coeff, bv) in &store.var(v).linear_occurs {
        let Some(atom_id) = atoms.atom_of(*bv) else { continue };
        if let Ok(inc) = coeff.clone().checked_mul(delta.clone()) {
            if let Ok(new_val) = atoms.atom(atom_id).args_value.clone().checked_add(inc) {
                out.push((atom_id, new_val));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use atoms::RelOp;
    use num::Checked64;
    use term_dag::{AstTerm, Sort};

    fn n(v: i64) -> Checked64 {
        Checked64::from_i64(v)
    }

    struct StubCtx {
        truth: HashMap<ctx_api::BoolVar, bool>,
        flips: Vec<ctx_api::BoolVar>,
        notified: Vec<ExprRef>,
    }

    impl StubCtx {
        fn new() -> Self {
            StubCtx { truth: HashMap::new(), flips: Vec::new(), notified: Vec::new() }
        }
    }

    impl Ctx<Checked64> for StubCtx {
        fn atom(&self, _bv: ctx_api::BoolVar) -> Option<AtomId> {
            None
        }
        fn atom2bool_var(&self, _e: ExprRef) -> Option<ctx_api::BoolVar> {
            None
        }
        fn is_true(&self, lit: Lit) -> bool {
            let base = *self.truth.get(&lit.var).unwrap_or(&false);
            base == lit.sign
        }
        fn get_value(&self, _e: ExprRef) -> Option<Checked64> {
            None
        }
        fn is_unit(&self, _lit: Lit) -> bool {
            false
        }
        fn unit_literals(&self) -> Vec<Lit> {
            Vec::new()
        }
        fn input_assertions(&self) -> Vec<ExprRef> {
            Vec::new()
        }
        fn subterms(&self) -> Vec<ExprRef> {
            Vec::new()
        }
        fn parents(&self, _e: ExprRef) -> Vec<ExprRef> {
            Vec::new()
        }
        fn clauses(&self) -> usize {
            0
        }
        fn get_clause(&self, _i: usize) -> Vec<Lit> {
            Vec::new()
        }
        fn unsat(&self) -> bool {
            false
        }
        fn num_bool_vars(&self) -> usize {
            0
        }
        fn rand(&mut self) -> u64 {
            0
        }
        fn rand_below(&mut self, _n: u64) -> u64 {
            0
        }
        fn inc(&self) -> bool {
            true
        }
        fn new_value_eh(&mut self, e: ExprRef) {
            self.notified.push(e);
        }
        fn flip(&mut self, bv: ctx_api::BoolVar) {
            let cur = *self.truth.get(&bv).unwrap_or(&false);
            self.truth.insert(bv, !cur);
            self.flips.push(bv);
        }
        fn add_new_term(&mut self, e: ExprRef) -> ExprRef {
            e
        }
        fn assign_eval(&mut self, _lit: Lit) {}
        fn assign_propagate(&mut self, _lit: Lit, _clause: usize) {}
    }

    #[test]
    fn update_is_noop_on_same_value() {
        let mut store: Store<Checked64> = Store::new();
        let mut table = AtomTable::new();
        let mut ctx = StubCtx::new();
        let x = store.mk_var(Sort::Int, n(5));
        let map = HashMap::new();
        assert_eq!(update(&mut store, &mut table, &mut ctx, x, n(5), &map), Ok(()));
    }

    #[test]
    fn update_rejects_out_of_range() {
        let mut store: Store<Checked64> = Store::new();
        let mut table = AtomTable::new();
        let mut ctx = StubCtx::new();
        let x = store.mk_var(Sort::Int, n(5));
        store.var_mut(x).range = Some((n(0), n(10)));
        let map = HashMap::new();
        assert_eq!(update(&mut store, &mut table, &mut ctx, x, n(20), &map), Err(UpdateFailed::OutOfRange));
    }

    #[test]
    fn update_propagates_into_linear_atom_and_flips_disagreeing_bool_var() {
        let mut store: Store<Checked64> = Store::new();
        let mut table = AtomTable::new();
        let mut ctx = StubCtx::new();
        let x = store.mk_var(Sort::Int, n(3));
        let bv = ctx_api::BoolVar(0);
        // atom: x - 10 <= 0, currently true (3 - 10 = -7 <= 0)
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-10))]);
        table.init_bool_var(&mut store, bv, RelOp::Le, &term);
        ctx.truth.insert(bv, true);

        let map = HashMap::new();
        update(&mut store, &mut table, &mut ctx, x, n(50), &map).unwrap();

        let atom_id = table.atom_of(bv).unwrap();
        assert_eq!(table.atom(atom_id).args_value, n(40));
        assert!(!table.atom(atom_id).holds());
        assert!(ctx.flips.contains(&bv));
    }

    #[test]
    fn update_cascades_through_sum_parent() {
        let mut store: Store<Checked64> = Store::new();
        let mut table = AtomTable::new();
        let mut ctx = StubCtx::new();
        let x = store.mk_var(Sort::Int, n(1));
        let y = store.mk_var(Sort::Int, n(2));
        let sum = store.add_args(&AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Var(y)]), n(1));
        assert_eq!(store.var(sum).value, n(3));

        let map = HashMap::new();
        update(&mut store, &mut table, &mut ctx, x, n(10), &map).unwrap();
        assert_eq!(store.var(sum).value, n(12));
    }

    #[test]
    fn update_num_does_not_mutate_store() {
        let mut store: Store<Checked64> = Store::new();
        let mut table = AtomTable::new();
        let x = store.mk_var(Sort::Int, n(3));
        let bv = ctx_api::BoolVar(0);
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-10))]);
        table.init_bool_var(&mut store, bv, RelOp::Le, &term);

        let result = update_num(&store, &table, x, n(50)).unwrap();
        assert_eq!(store.var(x).value, n(3));
        let atom_id = table.atom_of(bv).unwrap();
        assert!(result.iter().any(|(id, v)| *id == atom_id && *v == n(40)));
    }

    #[test]
    fn update_args_value_only_touches_direct_atoms() {
        let mut store: Store<Checked64> = Store::new();
        let mut table = AtomTable::new();
        let x = store.mk_var(Sort::Int, n(3));
        let bv = ctx_api::BoolVar(0);
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-10))]);
        table.init_bool_var(&mut store, bv, RelOp::Le, &term);

        let result = update_args_value(&store, &table, x, n(5));
        let atom_id = table.atom_of(bv).unwrap();
        assert_eq!(result, vec![(atom_id, n(-2))]);
    }
}
