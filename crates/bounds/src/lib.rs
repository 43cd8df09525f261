#![deny(warnings)]
//! bounds: three passes that narrow every variable's admissible range
//! before the search loop starts.
//! - `propagate_bounds`: one forward pass of interval arithmetic through
//!   every sum/product/op definition (children always have a lower
//!   `VarId` than their parent, so construction order is already a valid
//!   topological order).
//! - `install_unit_bounds`: turns single-variable unit-literal atoms into
//!   `lower`/`upper` bounds, applying the integer strict-to-non-strict ±1
//!   conversion.
//! - `install_finite_domains`: turns a clause that is entirely `x =
//!   numeral` disjuncts over one variable into a `finite_domain` list.
//!
//! Every combination step only ever narrows an existing bound, never
//! widens it -- the same "meet, don't override" rule as a three-valued
//! truth lattice, generalized from `{True,False,Unknown}` to an interval.

use atoms::{AtomTable, RelOp};
use ctx_api::Ctx;
use num::Num;
use term_dag::{Bound, OpKind, Sort, Store, VarDef, VarId};

#[derive(Debug, Clone, Copy)]
pub struct Interval<N> {
    pub lo: Option<Bound<N>>,
    pub hi: Option<Bound<N>>,
}

impl<N: Num> Interval<N> {
    pub fn unbounded() -> Self {
        Interval { lo: None, hi: None }
    }

    pub fn point(v: N) -> Self {
        Interval { lo: Some(Bound { strict: false, value: v.clone() }), hi: Some(Bound { strict: false, value: v }) }
    }

    /// Intersect in place: only ever tightens, never widens.
    pub fn narrow(&mut self, other: &Interval<N>) {
        self.lo = tighter_lo(self.lo.clone(), other.lo.clone());
        self.hi = tighter_hi(self.hi.clone(), other.hi.clone());
    }
}

fn tighter_lo<N: Num>(a: Option<Bound<N>>, b: Option<Bound<N>>) -> Option<Bound<N>> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(x), Some(y)) => Some(if y.value > x.value || (y.value == x.value && y.strict && !x.strict) { y } else { x }),
    }
}

fn tighter_hi<N: Num>(a: Option<Bound<N>>, b: Option<Bound<N>>) -> Option<Bound<N>> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(x), Some(y)) => Some(if y.value < x.value || (y.value == x.value && y.strict && !x.strict) { y } else { x }),
    }
}

fn interval_of<N: Num>(store: &Store<N>, v: VarId) -> Interval<N> {
    Interval { lo: store.var(v).lower.clone(), hi: store.var(v).upper.clone() }
}

fn scale<N: Num>(c: N, iv: Interval<N>) -> Interval<N> {
    if c.is_zero() {
        return Interval::point(N::zero());
    }
    let map = |b: Bound<N>| Bound { strict: b.strict, value: c.clone().checked_mul(b.value.clone()).unwrap_or(b.value) };
    if c.sign() > 0 {
        Interval { lo: iv.lo.map(map), hi: iv.hi.map(map) }
    } else {
        Interval { lo: iv.hi.map(map), hi: iv.lo.map(map) }
    }
}

fn add_intervals<N: Num>(a: Interval<N>, b: Interval<N>) -> Interval<N> {
    let combine = |x: Option<Bound<N>>, y: Option<Bound<N>>| match (x, y) {
        (Some(x), Some(y)) => {
            Some(Bound { strict: x.strict || y.strict, value: x.value.clone().checked_add(y.value).unwrap_or(x.value) })
        }
        _ => None,
    };
    Interval { lo: combine(a.lo, b.lo), hi: combine(a.hi, b.hi) }
}

fn mul_intervals<N: Num>(a: Interval<N>, b: Interval<N>) -> Interval<N> {
    let (Some(alo), Some(ahi), Some(blo), Some(bhi)) = (a.lo, a.hi, b.lo, b.hi) else {
        return Interval::unbounded();
    };
    let corners = [
        alo.value.clone().checked_mul(blo.value.clone()),
        alo.value.checked_mul(bhi.value.clone()),
        ahi.value.clone().checked_mul(blo.value),
        ahi.value.checked_mul(bhi.value),
    ];
    if corners.iter().any(|c| c.is_err()) {
        return Interval::unbounded();
    }
    let vals: Vec<N> = corners.into_iter().map(Result::unwrap).collect();
    let lo = vals.iter().cloned().fold(vals[0].clone(), |acc, v| if v < acc { v } else { acc });
    let hi = vals.iter().cloned().fold(vals[0].clone(), |acc, v| if v > acc { v } else { acc });
    Interval { lo: Some(Bound { strict: false, value: lo }), hi: Some(Bound { strict: false, value: hi }) }
}

fn abs_interval<N: Num>(a: Interval<N>) -> Interval<N> {
    match (a.lo, a.hi) {
        (Some(lo), Some(hi)) if lo.value.sign() >= 0 => Interval { lo: Some(lo), hi: Some(hi) },
        (Some(lo), Some(hi)) if hi.value.sign() <= 0 => Interval {
            lo: Some(Bound { strict: hi.strict, value: hi.value.clone().checked_neg().unwrap_or(hi.value) }),
            hi: Some(Bound { strict: lo.strict, value: lo.value.clone().checked_neg().unwrap_or(lo.value) }),
        },
        (Some(lo), Some(hi)) => {
            let neg_lo = lo.value.clone().checked_neg().unwrap_or(lo.value);
            let top = if neg_lo > hi.value { neg_lo } else { hi.value };
            Interval { lo: Some(Bound { strict: false, value: N::zero() }), hi: Some(Bound { strict: false, value: top }) }
        }
        _ => Interval { lo: Some(Bound { strict: false, value: N::zero() }), hi: None },
    }
}

fn max_abs_bound<N: Num>(iv: Interval<N>) -> Option<N> {
    let (lo, hi) = (iv.lo?.value, iv.hi?.value);
    let m1 = lo.clone().checked_abs().unwrap_or(lo);
    let m2 = hi.clone().checked_abs().unwrap_or(hi);
    Some(if m1 > m2 { m1 } else { m2 })
}

fn mod_interval<N: Num>(b: Interval<N>) -> Interval<N> {
    match max_abs_bound(b) {
        Some(maxabs) if !maxabs.is_zero() => {
            let upper = maxabs.clone().checked_sub(N::one()).unwrap_or(maxabs);
            Interval { lo: Some(Bound { strict: false, value: N::zero() }), hi: Some(Bound { strict: false, value: upper }) }
        }
        _ => Interval::unbounded(),
    }
}

fn rem_interval<N: Num>(b: Interval<N>) -> Interval<N> {
    match max_abs_bound(b) {
        Some(maxabs) if !maxabs.is_zero() => {
            let bound = maxabs.clone().checked_sub(N::one()).unwrap_or(maxabs);
            let neg = bound.clone().checked_neg().unwrap_or(bound.clone());
            Interval { lo: Some(Bound { strict: false, value: neg }), hi: Some(Bound { strict: false, value: bound }) }
        }
        _ => Interval::unbounded(),
    }
}

fn div_interval<N: Num>(a: Interval<N>, b: Interval<N>, is_int: bool) -> Interval<N> {
    let (Some(blo), Some(bhi)) = (b.lo, b.hi) else { return Interval::unbounded() };
    if blo.value.sign() <= 0 && bhi.value.sign() >= 0 {
        return Interval::unbounded(); // divisor interval straddles zero
    }
    let (Some(alo), Some(ahi)) = (a.lo, a.hi) else { return Interval::unbounded() };
    let corners = [
        alo.value.clone().divide_floor(blo.value.clone(), is_int),
        alo.value.divide_floor(bhi.value.clone(), is_int),
        ahi.value.clone().divide_floor(blo.value, is_int),
        ahi.value.divide_floor(bhi.value, is_int),
    ];
    let lo = corners.iter().cloned().fold(corners[0].clone(), |acc, v| if v < acc { v } else { acc });
    let hi = corners.iter().cloned().fold(corners[0].clone(), |acc, v| if v > acc { v } else { acc });
    Interval { lo: Some(Bound { strict: false, value: lo }), hi: Some(Bound { strict: false, value: hi }) }
}

/// One forward pass, narrowing every defined variable's interval from its
/// children's current intervals. Leaves (`VarDef::None`) are untouched
/// here; they only gain bounds from `install_unit_bounds`.
pub fn propagate_bounds<N: Num>(store: &mut Store<N>) {
    for i in 0..store.vars.len() {
        let v = VarId(i);
        let computed = match store.var(v).def {
            VarDef::None => continue,
            VarDef::Sum(sid) => {
                let node = store.sums[sid.0].clone();
                node.args
                    .iter()
                    .fold(Interval::point(node.coeff), |acc, (c, a)| add_intervals(acc, scale(c.clone(), interval_of(store, *a))))
            }
            VarDef::Product(mid) => {
                let node = store.muls[mid.0].clone();
                node.monomial.iter().fold(Interval::point(N::one()), |acc, (a, p)| {
                    let base = interval_of(store, *a);
                    (0..*p).fold(acc, |acc2, _| mul_intervals(acc2, base.clone()))
                })
            }
            VarDef::Unary(oid) => {
                let node = store.ops[oid.0];
                let a_iv = interval_of(store, node.arg1);
                match node.kind {
                    OpKind::Abs => abs_interval(a_iv),
                    OpKind::ToInt | OpKind::ToReal => a_iv,
                    OpKind::Mod => node.arg2.map(|a2| mod_interval(interval_of(store, a2))).unwrap_or_else(Interval::unbounded),
                    OpKind::Rem => node.arg2.map(|a2| rem_interval(interval_of(store, a2))).unwrap_or_else(Interval::unbounded),
                    OpKind::Idiv => node.arg2.map(|a2| div_interval(a_iv, interval_of(store, a2), true)).unwrap_or_else(Interval::unbounded),
                    OpKind::Div => node.arg2.map(|a2| div_interval(a_iv, interval_of(store, a2), false)).unwrap_or_else(Interval::unbounded),
                    OpKind::Power => unreachable!("not implemented: power bound propagation"),
                }
            }
        };
        let mut iv = interval_of(store, v);
        iv.narrow(&computed);
        store.var_mut(v).lower = iv.lo;
        store.var_mut(v).upper = iv.hi;
    }
}

fn install_half<N: Num>(store: &mut Store<N>, v: VarId, half: Interval<N>) {
    let mut iv = interval_of(store, v);
    iv.narrow(&half);
    store.var_mut(v).lower = iv.lo;
    store.var_mut(v).upper = iv.hi;
}

/// Install a `≤/</=` bound on `v` from a single-variable atom
/// `coeff + c*v OP 0`, honoring `sign` (the literal's polarity) and
/// applying the integer strict-to-non-strict ±1 conversion.
fn install_one<N: Num>(store: &mut Store<N>, op: RelOp, coeff: N, c: N, v: VarId, sign: bool) {
    if c.is_zero() {
        return;
    }
    let is_int = store.var(v).sort == Sort::Int;
    let Ok(boundary) = N::zero().checked_sub(coeff).and_then(|n| n.checked_div(c.clone())) else { return };
    let c_pos = c.sign() > 0;

    let upper = |strict: bool, value: N| Interval { lo: None, hi: Some(Bound { strict, value }) };
    let lower = |strict: bool, value: N| Interval { lo: Some(Bound { strict, value }), hi: None };

    let half = match (op, sign, c_pos) {
        (RelOp::Eq, true, _) => Interval::point(boundary),
        (RelOp::Eq, false, _) => return, // "x != boundary" has no interval representation
        (RelOp::Le, true, true) => upper(false, boundary),
        (RelOp::Lt, true, true) => {
            if is_int {
                upper(false, boundary.clone().checked_sub(N::one()).unwrap_or(boundary))
            } else {
                upper(true, boundary)
            }
        }
        (RelOp::Le, true, false) => lower(false, boundary),
        (RelOp::Lt, true, false) => {
            if is_int {
                lower(false, boundary.clone().checked_add(N::one()).unwrap_or(boundary))
            } else {
                lower(true, boundary)
            }
        }
        (RelOp::Le, false, true) => {
            if is_int {
                lower(false, boundary.clone().checked_add(N::one()).unwrap_or(boundary))
            } else {
                lower(true, boundary)
            }
        }
        (RelOp::Lt, false, true) => lower(false, boundary),
        (RelOp::Le, false, false) => {
            if is_int {
                upper(false, boundary.clone().checked_sub(N::one()).unwrap_or(boundary))
            } else {
                upper(true, boundary)
            }
        }
        (RelOp::Lt, false, false) => upper(false, boundary),
    };
    install_half(store, v, half);
}

/// Every unit literal whose atom is a single-variable linear atom installs
/// a `lower`/`upper` bound on that variable.
pub fn install_unit_bounds<N: Num, C: Ctx<N>>(store: &mut Store<N>, atoms: &AtomTable<N>, ctx: &C) {
    for lit in ctx.unit_literals() {
        let Some(aid) = ctx.atom(lit.var) else { continue };
        let atom = atoms.atom(aid);
        if !atom.is_linear || atom.args.len() != 1 {
            continue;
        }
        let (c, v) = atom.args[0].clone();
        install_one(store, atom.op, atom.coeff.clone(), c, v, lit.sign);
    }
}

/// A clause consisting entirely of positive `x = numeral` literals over the
/// same variable `x` installs a `finite_domain` on `x`.
pub fn install_finite_domains<N: Num, C: Ctx<N>>(store: &mut Store<N>, atoms: &AtomTable<N>, ctx: &C) {
    for i in 0..ctx.clauses() {
        let clause = ctx.get_clause(i);
        if clause.len() < 2 {
            continue;
        }
        let mut var: Option<VarId> = None;
        let mut values: Vec<N> = Vec::new();
        let mut ok = true;
        for lit in &clause {
            if !lit.sign {
                ok = false;
                break;
            }
            let Some(aid) = ctx.atom(lit.var) else { ok = false; break };
            let atom = atoms.atom(aid);
            if atom.op != RelOp::Eq || atom.args.len() != 1 {
                ok = false;
                break;
            }
            let (c, v) = atom.args[0].clone();
            if c.is_zero() {
                ok = false;
                break;
            }
            match var {
                None => var = Some(v),
                Some(existing) if existing == v => {}
                _ => {
                    ok = false;
                    break;
                }
            }
            let Ok(value) = N::zero().checked_sub(atom.coeff.clone()).and_then(|n| n.checked_div(c)) else {
                ok = false;
                break;
            };
            values.push(value);
        }
        if ok {
            if let Some(v) = var {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                values.dedup();
                store.var_mut(v).finite_domain = Some(values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atoms::AtomTable;
    use ctx_api::{AtomId, BoolVar, ExprRef, Lit};
    use num::Checked64;
    use std::collections::HashMap;
    use term_dag::AstTerm;

    fn n(v: i64) -> Checked64 {
        Checked64::from_i64(v)
    }

    #[test]
    fn propagate_bounds_narrows_sum_from_bounded_children() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(0));
        s.var_mut(x).lower = Some(Bound { strict: false, value: n(1) });
        s.var_mut(x).upper = Some(Bound { strict: false, value: n(5) });
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(10))]);
        let sum = s.add_args(&term, n(1));
        propagate_bounds(&mut s);
        assert_eq!(s.var(sum).lower.unwrap().value, n(11));
        assert_eq!(s.var(sum).upper.unwrap().value, n(15));
    }

    #[test]
    fn propagate_bounds_abs_of_straddling_interval_starts_at_zero() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(0));
        s.var_mut(x).lower = Some(Bound { strict: false, value: n(-3) });
        s.var_mut(x).upper = Some(Bound { strict: false, value: n(7) });
        let abs = s.mk_op(OpKind::Abs, x, None);
        propagate_bounds(&mut s);
        assert_eq!(s.var(abs).lower.unwrap().value, n(0));
        assert_eq!(s.var(abs).upper.unwrap().value, n(7));
    }

    struct StubCtx {
        units: Vec<Lit>,
        atom_of: HashMap<BoolVar, AtomId>,
        clauses: Vec<Vec<Lit>>,
    }

    impl Ctx<Checked64> for StubCtx {
        fn atom(&self, bv: BoolVar) -> Option<AtomId> {
            self.atom_of.get(&bv).copied()
        }
        fn atom2bool_var(&self, _e: ExprRef) -> Option<BoolVar> {
            None
        }
        fn is_true(&self, _l: Lit) -> bool {
            false
        }
        fn get_value(&self, _e: ExprRef) -> Option<Checked64> {
            None
        }
        fn is_unit(&self, _l: Lit) -> bool {
            false
        }
        fn unit_literals(&self) -> Vec<Lit> {
            self.units.clone()
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
            self.clauses.len()
        }
        fn get_clause(&self, i: usize) -> Vec<Lit> {
            self.clauses[i].clone()
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
        fn new_value_eh(&mut self, _e: ExprRef) {}
        fn flip(&mut self, _bv: BoolVar) {}
        fn add_new_term(&mut self, e: ExprRef) -> ExprRef {
            e
        }
        fn assign_eval(&mut self, _lit: Lit) {}
        fn assign_propagate(&mut self, _lit: Lit, _clause: usize) {}
    }

    #[test]
    fn install_unit_bounds_installs_upper_bound_for_le() {
        let mut s: Store<Checked64> = Store::new();
        let mut table: AtomTable<Checked64> = AtomTable::new();
        let x = s.mk_var(Sort::Int, n(0));
        // x - 5 <= 0  =>  x <= 5
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-5))]);
        let bv = BoolVar(0);
        let id = table.init_bool_var(&mut s, bv, RelOp::Le, &term);
        let mut atom_of = HashMap::new();
        atom_of.insert(bv, id);
        let ctx = StubCtx { units: vec![Lit::positive(bv)], atom_of, clauses: Vec::new() };
        install_unit_bounds(&mut s, &table, &ctx);
        assert_eq!(s.var(x).upper.unwrap().value, n(5));
        assert!(!s.var(x).upper.unwrap().strict);
    }

    #[test]
    fn install_finite_domains_collects_equality_disjunction() {
        let mut s: Store<Checked64> = Store::new();
        let mut table: AtomTable<Checked64> = AtomTable::new();
        let x = s.mk_var(Sort::Int, n(0));
        let t1 = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-1))]);
        let t2 = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-2))]);
        let bv1 = BoolVar(0);
        let bv2 = BoolVar(1);
        let id1 = table.init_bool_var(&mut s, bv1, RelOp::Eq, &t1);
        let id2 = table.init_bool_var(&mut s, bv2, RelOp::Eq, &t2);
        let mut atom_of = HashMap::new();
        atom_of.insert(bv1, id1);
        atom_of.insert(bv2, id2);
        let clause = vec![Lit::positive(bv1), Lit::positive(bv2)];
        let ctx = StubCtx { units: Vec::new(), atom_of, clauses: vec![clause] };
        install_finite_domains(&mut s, &table, &ctx);
        assert_eq!(s.var(x).finite_domain, Some(vec![n(1), n(2)]));
    }
}
