#![deny(warnings)]
//! moves: candidate-delta generation for the local search -- linear and
//! quadratic move proposers, tabu-aware admission, and the weighted
//! candidate-selection step that actually commits a move.

use atoms::{Atom, NlTerm, RelOp};
use ctx_api::Ctx;
use num::Num;
use std::cell::RefCell;
use std::collections::HashMap;
use term_dag::{Sort, Store, VarDef, VarId};

/// Default half-width of the window a reset move picks a fresh value from
/// when a variable has no explicit bound.
const RESET_WINDOW: i64 = 1000;

/// How far (in `args_value` units) an atom is from holding with the given
/// polarity; zero if it already does.
pub fn dtt<N: Num>(sign: bool, atom: &Atom<N>) -> N {
    let v = atom.args_value.clone();
    match (atom.op, sign) {
        (RelOp::Le, true) => if v.sign() <= 0 { N::zero() } else { v },
        (RelOp::Le, false) => {
            if v.sign() > 0 {
                N::zero()
            } else {
                N::one().checked_sub(v).unwrap_or(N::one())
            }
        }
        (RelOp::Lt, true) => {
            if v.sign() < 0 {
                N::zero()
            } else {
                v.clone().checked_add(N::one()).unwrap_or(v)
            }
        }
        (RelOp::Lt, false) => {
            if v.sign() >= 0 {
                N::zero()
            } else {
                v.clone().checked_neg().unwrap_or(v)
            }
        }
        (RelOp::Eq, true) => v.clone().checked_abs().unwrap_or(v),
        (RelOp::Eq, false) => if !v.is_zero() { N::zero() } else { N::one() },
    }
}

/// O(1) variant of `dtt`: what the distance would be if `v`'s value changed
/// from `old_value` to `new_value`, without touching the atom or the store.
pub fn dtt_after<N: Num>(sign: bool, atom: &Atom<N>, v: VarId, old_value: N, new_value: N) -> N {
    let coeff = atom.args.iter().find(|(_, av)| *av == v).map(|(c, _)| c.clone()).unwrap_or(N::zero());
    let delta = new_value.checked_sub(old_value).unwrap_or(N::zero());
    let inc = coeff.checked_mul(delta).unwrap_or(N::zero());
    let mut hypothetical = atom.clone();
    hypothetical.args_value = atom.args_value.clone().checked_add(inc).unwrap_or(atom.args_value.clone());
    dtt(sign, &hypothetical)
}

/// Candidate new values for a single linear variable `v` (coefficient
/// `coeff` in `atom`): when the atom currently holds, propose values right
/// at and adjacent to the boundary; when it doesn't, propose the minimal
/// value that crosses it.
pub fn find_linear_moves<N: Num>(store: &Store<N>, atom: &Atom<N>, v: VarId, coeff: N) -> Vec<N> {
    if coeff.is_zero() {
        return Vec::new();
    }
    let cur_value = store.var(v).value.clone();
    let is_int = store.var(v).sort == Sort::Int;
    let base = atom
        .args_value
        .clone()
        .checked_sub(coeff.clone().checked_mul(cur_value.clone()).unwrap_or(N::zero()))
        .unwrap_or(atom.args_value.clone());
    // boundary: base + coeff*v == 0  =>  v == -base / coeff
    let Ok(boundary) = N::zero().checked_sub(base).and_then(|n| n.checked_divide(coeff, is_int)) else {
        return Vec::new();
    };

    let mut candidates = vec![boundary.clone()];
    if atom.holds() {
        if let Ok(plus) = boundary.clone().checked_add(N::one()) {
            candidates.push(plus);
        }
        if let Ok(minus) = boundary.checked_sub(N::one()) {
            candidates.push(minus);
        }
    }
    candidates.retain(|c| *c != cur_value);
    candidates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    candidates.dedup();
    candidates
}

enum GroupShape<N> {
    Linear(N),
    Quadratic { a: N, b: N },
    Unsupported,
}

/// The value of the product `outer` is defined by, excluding `factor`'s own
/// contribution -- i.e. the product of every *other* factor in the
/// monomial, raised to its own power. For a non-product (plain linear)
/// `outer`, the "other factors" value is vacuously 1.
fn mul_value_without<N: Num>(store: &Store<N>, outer: VarId, factor: VarId) -> N {
    match store.var(outer).def {
        VarDef::Product(mid) => store.muls[mid.0]
            .monomial
            .iter()
            .filter(|(f, _)| *f != factor)
            .try_fold(N::one(), |acc, (f, p)| {
                acc.checked_mul(store.var(*f).value.clone().checked_power_of(*p).ok()?).ok()
            })
            .unwrap_or(N::zero()),
        _ => N::one(),
    }
}

fn classify_group<N: Num>(store: &Store<N>, factor: VarId, group: &[NlTerm<N>]) -> GroupShape<N> {
    let mut a = N::zero();
    let mut b = N::zero();
    let mut unsupported = false;
    for t in group {
        let others = mul_value_without(store, t.outer, factor);
        let contrib = t.coeff.clone().checked_mul(others).unwrap_or(N::zero());
        match t.power {
            1 => b = b.clone().checked_add(contrib).unwrap_or(b),
            2 => a = a.clone().checked_add(contrib).unwrap_or(a),
            _ => unsupported = true,
        }
    }
    if unsupported {
        GroupShape::Unsupported
    } else if a.is_zero() {
        GroupShape::Linear(b)
    } else {
        GroupShape::Quadratic { a, b }
    }
}

/// Is `x` (grouped by its `nonlinear` entry) a purely linear factor of
/// `atom`? Returns the effective coefficient if so.
pub fn is_linear<N: Num>(store: &Store<N>, atom: &Atom<N>, x: VarId) -> Option<N> {
    let group = atom.nonlinear.iter().find(|(f, _)| *f == x).map(|(_, g)| g.as_slice())?;
    match classify_group(store, x, group) {
        GroupShape::Linear(b) => Some(b),
        _ => None,
    }
}

/// Is `x` a quadratic factor of `atom` (appears squared somewhere)?
/// Returns `(a, b)` for the `a*x^2 + b*x` contribution of `x` to the atom.
pub fn is_quadratic<N: Num>(store: &Store<N>, atom: &Atom<N>, x: VarId) -> Option<(N, N)> {
    let group = atom.nonlinear.iter().find(|(f, _)| *f == x).map(|(_, g)| g.as_slice())?;
    match classify_group(store, x, group) {
        GroupShape::Quadratic { a, b } => Some((a, b)),
        _ => None,
    }
}

/// Candidate new values for a quadratic factor `x`, solving
/// `a*x^2 + b*x + c == 0` for the atom's boundary, where `c` folds in every
/// other argument's current contribution.
pub fn find_quadratic_moves<N: Num>(store: &Store<N>, atom: &Atom<N>, x: VarId) -> Vec<N> {
    let Some((a, b)) = is_quadratic(store, atom, x) else {
        return Vec::new();
    };
    if a.is_zero() {
        return Vec::new();
    }
    let cur = store.var(x).value.clone();
    let own = a.clone().checked_mul(cur.clone().checked_power_of(2).unwrap_or(N::zero())).unwrap_or(N::zero());
    let own = own.clone().checked_add(b.clone().checked_mul(cur.clone()).unwrap_or(N::zero())).unwrap_or(own);
    let c = atom.args_value.clone().checked_sub(own).unwrap_or(atom.args_value.clone());

    let four_ac = N::from_i64(4).checked_mul(a.clone()).and_then(|v| v.checked_mul(c));
    let Ok(four_ac) = four_ac else { return Vec::new() };
    let Ok(d) = b.clone().checked_power_of(2).and_then(|bb| bb.checked_sub(four_ac)) else {
        return Vec::new();
    };
    if d.sign() < 0 {
        return Vec::new();
    }
    let sqrt_d = d.isqrt();
    let two_a = a.clone().checked_add(a.clone()).unwrap_or(a);
    let is_int = store.var(x).sort == Sort::Int;

    let mut roots = Vec::new();
    for s in [sqrt_d.clone(), sqrt_d.clone().checked_neg().unwrap_or(sqrt_d)] {
        if let Ok(num) = b.clone().checked_neg().and_then(|nb| nb.checked_add(s)) {
            if let Ok(r) = num.checked_divide(two_a.clone(), is_int) {
                roots.push(r.clone());
                if let Ok(adj) = r.clone().checked_add(N::one()) {
                    roots.push(adj);
                }
                if let Ok(adj) = r.checked_sub(N::one()) {
                    roots.push(adj);
                }
            }
        }
    }
    roots.retain(|r| *r != cur);
    roots.sort_by(|p, q| p.partial_cmp(q).unwrap_or(std::cmp::Ordering::Equal));
    roots.dedup();
    roots
}

/// Reject tabu-protected variables; otherwise clamp the proposed value into
/// `range`/`lower`/`upper`.
pub fn is_permitted_update<N: Num>(store: &Store<N>, v: VarId, new_value: N, step: u64, tabu_enabled: bool) -> Option<N> {
    let var = store.var(v);
    if tabu_enabled && var.is_tabu(step) {
        return None;
    }
    let mut nv = new_value;
    if let Some((lo, hi)) = var.range.clone() {
        if nv < lo {
            nv = lo;
        }
        if nv > hi {
            nv = hi;
        }
    }
    if let Some(b) = &var.lower {
        if nv < b.value || (b.strict && nv == b.value) {
            nv = b.value.clone();
        }
    }
    if let Some(b) = &var.upper {
        if nv > b.value || (b.strict && nv == b.value) {
            nv = b.value.clone();
        }
    }
    Some(nv)
}

/// Pick a fresh value for `v` uniformly within its admissible window,
/// clearing its tabu ban. Does not recurse into `v`'s own definition
/// children -- callers that need to reset a whole nonlinear group do so
/// termwise.
pub fn add_reset_update<N: Num, C: Ctx<N>>(store: &mut Store<N>, v: VarId, ctx: &mut C) -> N {
    let (lo, hi) = {
        let var = store.var(v);
        let range = var.range.clone().unwrap_or((N::from_i64(-RESET_WINDOW), N::from_i64(RESET_WINDOW)));
        let lo = var
            .lower
            .as_ref()
            .map(|b| b.value.clone())
            .map(|l| if l > range.0 { l } else { range.0.clone() })
            .unwrap_or_else(|| range.0.clone());
        let hi = var
            .upper
            .as_ref()
            .map(|b| b.value.clone())
            .map(|h| if h < range.1 { h } else { range.1.clone() })
            .unwrap_or_else(|| range.1.clone());
        (lo, hi)
    };
    let span = hi.checked_sub(lo.clone()).unwrap_or(N::zero());
    let offset = if span.sign() > 0 {
        let width = span.to_f64().max(0.0) as u64 + 1;
        N::from_i64(ctx.rand_below(width.max(1)) as i64)
    } else {
        N::zero()
    };
    let value = lo.clone().checked_add(offset).unwrap_or(lo);
    store.var_mut(v).ban_until_step = 0;
    value
}

/// Local-search score contribution for a candidate that makes `make` atoms
/// true while breaking `breaks` currently-true ones.
pub fn compute_score(make: u64, breaks: u64, cb: f64, breaks_tabu_protected_unit: bool) -> f64 {
    if breaks_tabu_protected_unit {
        return 0.0;
    }
    let result = make as f64 - breaks as f64;
    if result < 0.0 {
        1e-7
    } else if result == 0.0 {
        2e-6
    } else {
        cb.powi(-(breaks as i32))
    }
}

/// Memoizes `cb^-breaks` since it is recomputed for every candidate sharing
/// the same break count within a single search step.
pub struct ProbBreakTable {
    cb: f64,
    cache: RefCell<HashMap<u64, f64>>,
}

impl ProbBreakTable {
    pub fn new(cb: f64) -> Self {
        ProbBreakTable { cb, cache: RefCell::new(HashMap::new()) }
    }

    pub fn get(&self, breaks: u64) -> f64 {
        if let Some(v) = self.cache.borrow().get(&breaks) {
            return *v;
        }
        let v = self.cb.powi(-(breaks as i32));
        self.cache.borrow_mut().insert(breaks, v);
        v
    }
}

/// Cap the candidate pool to `max_size` by randomly dropping the excess,
/// then pick one weighted by its score. Records tabu bookkeeping on the
/// chosen variable.
pub fn apply_update<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    mut candidates: Vec<(VarId, N, f64)>,
    max_size: usize,
    step: u64,
    tabu_tenure: u64,
    ctx: &mut C,
) -> Option<(VarId, N)> {
    while candidates.len() > max_size {
        let idx = ctx.rand_below(candidates.len() as u64) as usize;
        candidates.remove(idx);
    }
    if candidates.is_empty() {
        return None;
    }
    let total: f64 = candidates.iter().map(|(_, _, s)| s.max(0.0)).sum();
    let chosen = if total <= 0.0 {
        let idx = ctx.rand_below(candidates.len() as u64) as usize;
        candidates[idx].clone()
    } else {
        let mut r = (ctx.rand() as f64 / u64::MAX as f64) * total;
        let mut picked = candidates.last().unwrap().clone();
        for c in &candidates {
            let w = c.2.max(0.0);
            if r < w {
                picked = c.clone();
                break;
            }
            r -= w;
        }
        picked
    };

    let (v, val, _) = chosen;
    let old = store.var(v).value.clone();
    let delta = val.clone().checked_sub(old).unwrap_or(N::zero());
    {
        let var = store.var_mut(v);
        var.last_delta = Some(delta);
        var.last_step = step;
        var.ban_until_step = step + tabu_tenure;
    }
    Some((v, val))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num::Checked64;
    use term_dag::AstTerm;

    fn n(v: i64) -> Checked64 {
        Checked64::from_i64(v)
    }

    fn le_atom(store: &mut Store<Checked64>, x: VarId, offset: i64) -> Atom<Checked64> {
        let mut table = atoms::AtomTable::new();
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(offset))]);
        let id = table.init_bool_var(store, ctx_api::BoolVar(0), RelOp::Le, &term);
        table.atom(id).clone()
    }

    #[test]
    fn dtt_is_zero_when_already_true() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(1));
        let atom = le_atom(&mut s, x, -5);
        assert_eq!(dtt(true, &atom), n(0));
    }

    #[test]
    fn dtt_is_positive_when_false() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(10));
        let atom = le_atom(&mut s, x, -5);
        assert!(dtt(true, &atom).0 > 0);
    }

    #[test]
    fn find_linear_moves_solves_boundary() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(10));
        let atom = le_atom(&mut s, x, -5);
        let moves = find_linear_moves(&s, &atom, x, n(1));
        assert!(moves.contains(&n(5)));
    }

    #[test]
    fn is_permitted_update_blocks_tabu_variable() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(0));
        s.var_mut(x).ban_until_step = 10;
        assert_eq!(is_permitted_update(&s, x, n(5), 3, true), None);
        assert_eq!(is_permitted_update(&s, x, n(5), 20, true), Some(n(5)));
    }

    #[test]
    fn is_permitted_update_clamps_to_bounds() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(0));
        s.var_mut(x).range = Some((n(-10), n(10)));
        assert_eq!(is_permitted_update(&s, x, n(50), 0, false), Some(n(10)));
    }

    #[test]
    fn compute_score_zero_when_breaking_protected_unit() {
        assert_eq!(compute_score(5, 0, 2.0, true), 0.0);
    }

    #[test]
    fn compute_score_prefers_more_make_fewer_breaks() {
        let good = compute_score(3, 0, 2.0, false);
        let bad = compute_score(0, 3, 2.0, false);
        assert!(good > bad);
    }

    #[test]
    fn prob_break_table_caches_values() {
        let t = ProbBreakTable::new(0.5);
        let a = t.get(3);
        let b = t.get(3);
        assert_eq!(a, b);
        assert!((a - 8.0).abs() < 1e-9);
    }

    #[test]
    fn mul_value_without_excludes_named_factor() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(3));
        let y = s.mk_var(Sort::Int, n(4));
        let z = s.mk_var(Sort::Int, n(5));
        let p = s.mk_mul(vec![(x, 1), (y, 1), (z, 1)]);
        assert_eq!(mul_value_without(&s, p, x), n(20));
        assert_eq!(mul_value_without(&s, p, y), n(15));
    }

    #[test]
    fn apply_update_sets_tabu_bookkeeping_on_commit() {
        struct NoRand;
        impl Ctx<Checked64> for NoRand {
            fn atom(&self, _b: ctx_api::BoolVar) -> Option<ctx_api::AtomId> { None }
            fn atom2bool_var(&self, _e: ctx_api::ExprRef) -> Option<ctx_api::BoolVar> { None }
            fn is_true(&self, _l: ctx_api::Lit) -> bool { false }
            fn get_value(&self, _e: ctx_api::ExprRef) -> Option<Checked64> { None }
            fn is_unit(&self, _l: ctx_api::Lit) -> bool { false }
            fn unit_literals(&self) -> Vec<ctx_api::Lit> { Vec::new() }
            fn input_assertions(&self) -> Vec<ctx_api::ExprRef> { Vec::new() }
            fn subterms(&self) -> Vec<ctx_api::ExprRef> { Vec::new() }
            fn parents(&self, _e: ctx_api::ExprRef) -> Vec<ctx_api::ExprRef> { Vec::new() }
            fn clauses(&self) -> usize { 0 }
            fn get_clause(&self, _i: usize) -> Vec<ctx_api::Lit> { Vec::new() }
            fn unsat(&self) -> bool { false }
            fn num_bool_vars(&self) -> usize { 0 }
            fn rand(&mut self) -> u64 { 0 }
            fn rand_below(&mut self, _n: u64) -> u64 { 0 }
            fn inc(&self) -> bool { true }
            fn new_value_eh(&mut self, _e: ctx_api::ExprRef) {}
            fn flip(&mut self, _bv: ctx_api::BoolVar) {}
            fn add_new_term(&mut self, e: ctx_api::ExprRef) -> ctx_api::ExprRef { e }
            fn assign_eval(&mut self, _l: ctx_api::Lit) {}
            fn assign_propagate(&mut self, _l: ctx_api::Lit, _c: usize) {}
        }
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(0));
        let mut ctx = NoRand;
        let chosen = apply_update(&mut s, vec![(x, n(7), 1.0)], 5, 42, 3, &mut ctx);
        assert_eq!(chosen, Some((x, n(7))));
        assert_eq!(s.var(x).last_delta, Some(n(7)));
        assert_eq!(s.var(x).ban_until_step, 45);
    }
}
