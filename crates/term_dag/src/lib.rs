#![deny(warnings)]
//! term_dag: arena of numeric variables together with the sum/product/
//! unary-op definitions that relate them.
//! - `Var`/`VarId`: a numeric value slot, optionally defined in terms of
//!   others; undefined slots are the search's free variables.
//! - `Store<N>` holds every `Var`, `SumNode`, `MulNode`, `OpNode` in flat
//!   arenas and hash-conses `SumNode`/`MulNode`/`OpNode` construction the
//!   way a symbolic expression kernel hash-conses `Add`/`Mul` nodes, except
//!   the identity here is the *numeric relation*, not structural equality
//!   of a symbolic tree.
//! - `update`/`update_num`/`update_args_value` live in the `propagate`
//!   crate, which borrows `&mut Store` to walk these arenas; `Store` itself
//!   only ever constructs and reads.

use ctx_api::BoolVar;
use num::Num;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SumId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MulId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Int,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Mod,
    Rem,
    Idiv,
    Div,
    Power,
    Abs,
    ToInt,
    ToReal,
}

/// A unary or binary arithmetic operator constraint: `arg2` is `None` for
/// the strictly-unary operators (`Abs`, `ToInt`, `ToReal`).
#[derive(Debug, Clone, Copy)]
pub struct Bound<N> {
    pub strict: bool,
    pub value: N,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarDef {
    None,
    Sum(SumId),
    Product(MulId),
    Unary(OpId),
}

/// `value(var) = coeff + sum(c_i * value(arg_i))`, args sorted by `VarId`
/// with duplicates folded and zero-coefficient terms dropped.
#[derive(Debug, Clone)]
pub struct SumNode<N> {
    pub var: VarId,
    pub coeff: N,
    pub args: Vec<(N, VarId)>,
}

/// `value(var) = product(value(w_j)^p_j)`, monomial sorted by `VarId` with
/// like variables merged.
#[derive(Debug, Clone)]
pub struct MulNode {
    pub var: VarId,
    pub monomial: Vec<(VarId, u32)>,
}

#[derive(Debug, Clone, Copy)]
pub struct OpNode {
    pub var: VarId,
    pub kind: OpKind,
    pub arg1: VarId,
    pub arg2: Option<VarId>,
}

pub struct Var<N> {
    pub sort: Sort,
    pub value: N,
    pub best_value: N,
    pub lower: Option<Bound<N>>,
    pub upper: Option<Bound<N>>,
    /// Admissible window narrower than `[lower, upper]`, e.g. after a
    /// reset-move clamp; `None` means unrestricted.
    pub range: Option<(N, N)>,
    pub def: VarDef,
    pub finite_domain: Option<Vec<N>>,
    /// Parent occurrence lists, populated as sums/products/ops are built
    /// that reference this variable as a child.
    pub sum_occurs: Vec<SumId>,
    pub mul_occurs: Vec<MulId>,
    pub op_occurs: Vec<OpId>,
    /// `(coeff, bool_var)` back-references installed by `atoms::init_ineq`
    /// for every linear atom this variable appears in.
    pub linear_occurs: Vec<(N, BoolVar)>,
    pub last_step: u64,
    pub ban_until_step: u64,
    pub last_delta: Option<N>,
}

impl<N: Num> Var<N> {
    fn fresh(sort: Sort, initial_value: N) -> Self {
        Var {
            sort,
            value: initial_value.clone(),
            best_value: initial_value,
            lower: None,
            upper: None,
            range: None,
            def: VarDef::None,
            finite_domain: None,
            sum_occurs: Vec::new(),
            mul_occurs: Vec::new(),
            op_occurs: Vec::new(),
            linear_occurs: Vec::new(),
            last_step: 0,
            ban_until_step: 0,
            last_delta: None,
        }
    }

    pub fn is_tabu(&self, current_step: u64) -> bool {
        current_step < self.ban_until_step
    }

    pub fn in_bounds(&self, v: N) -> bool {
        let lo_ok = match &self.lower {
            Some(b) if b.strict => v > b.value,
            Some(b) => v >= b.value,
            None => true,
        };
        let hi_ok = match &self.upper {
            Some(b) if b.strict => v < b.value,
            Some(b) => v <= b.value,
            None => true,
        };
        let range_ok = match &self.range {
            Some((lo, hi)) => v >= *lo && v <= *hi,
            None => true,
        };
        lo_ok && hi_ok && range_ok
    }
}

/// A flattened input expression, as handed to `Store::add_args`. Built by
/// the caller from the surrounding context's own AST (`ctx_api::ExprRef`
/// subterms resolved down to numerals and already-registered variables).
#[derive(Debug, Clone)]
pub enum AstTerm<N> {
    Num(N),
    Var(VarId),
    Add(Vec<AstTerm<N>>),
    Mul(Vec<AstTerm<N>>),
    Neg(Box<AstTerm<N>>),
}

pub struct Store<N: Num> {
    pub vars: Vec<Var<N>>,
    pub sums: Vec<SumNode<N>>,
    pub muls: Vec<MulNode>,
    pub ops: Vec<OpNode>,
    mul_interner: HashMap<Vec<(VarId, u32)>, MulId>,
    op_interner: HashMap<(OpKind, VarId, Option<VarId>), OpId>,
}

impl<N: Num> Default for Store<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Num> Store<N> {
    pub fn new() -> Self {
        Store {
            vars: Vec::new(),
            sums: Vec::new(),
            muls: Vec::new(),
            ops: Vec::new(),
            mul_interner: HashMap::new(),
            op_interner: HashMap::new(),
        }
    }

    pub fn var(&self, v: VarId) -> &Var<N> {
        &self.vars[v.0]
    }
    pub fn var_mut(&mut self, v: VarId) -> &mut Var<N> {
        &mut self.vars[v.0]
    }

    /// Allocate a fresh value slot with no definition.
    pub fn mk_var(&mut self, sort: Sort, initial_value: N) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Var::fresh(sort, initial_value));
        id
    }

    /// Walk `term` once, distributing `coeff`, flattening nested
    /// additions, folding numeric literals into the running coefficient,
    /// and returning a variable whose value equals `coeff * term`.
    pub fn add_args(&mut self, term: &AstTerm<N>, coeff: N) -> VarId {
        let mut constant = N::zero();
        let mut linear: Vec<(N, VarId)> = Vec::new();
        self.flatten_add(term, coeff, &mut constant, &mut linear);
        self.mk_sum(constant, linear)
    }

    fn flatten_add(&mut self, term: &AstTerm<N>, coeff: N, constant: &mut N, linear: &mut Vec<(N, VarId)>) {
        match term {
            AstTerm::Num(n) => {
                *constant = constant
                    .clone()
                    .checked_add(coeff.checked_mul(n.clone()).unwrap_or(N::zero()))
                    .unwrap_or(constant.clone());
            }
            AstTerm::Var(v) => {
                linear.push((coeff, *v));
            }
            AstTerm::Neg(inner) => {
                let neg_coeff = coeff.clone().checked_neg().unwrap_or(coeff);
                self.flatten_add(inner, neg_coeff, constant, linear);
            }
            AstTerm::Add(terms) => {
                for t in terms {
                    self.flatten_add(t, coeff.clone(), constant, linear);
                }
            }
            AstTerm::Mul(factors) => {
                // c*(a+b) distribution only applies when every factor but
                // one is numeric; otherwise this multiplication becomes a
                // genuine product node and is folded into a single linear
                // term via `mk_mul`.
                let mut running_coeff = coeff;
                let mut non_numeric: Vec<&AstTerm<N>> = Vec::new();
                for f in factors {
                    if let AstTerm::Num(n) = f {
                        running_coeff = running_coeff.clone().checked_mul(n.clone()).unwrap_or(running_coeff);
                    } else {
                        non_numeric.push(f);
                    }
                }
                match non_numeric.len() {
                    0 => {
                        *constant = constant
                            .clone()
                            .checked_add(running_coeff)
                            .unwrap_or(constant.clone())
                    }
                    1 => self.flatten_add(non_numeric[0], running_coeff, constant, linear),
                    _ => {
                        let factor_ids: Vec<VarId> = non_numeric
                            .iter()
                            .map(|t| self.materialize(t))
                            .collect();
                        let monomial: Vec<(VarId, u32)> = factor_ids.into_iter().map(|v| (v, 1)).collect();
                        let v = self.mk_mul(monomial);
                        linear.push((running_coeff, v));
                    }
                }
            }
        }
    }

    /// Materialize an `AstTerm` that is not itself the top-level sum being
    /// flattened (used for nested product factors).
    fn materialize(&mut self, term: &AstTerm<N>) -> VarId {
        match term {
            AstTerm::Var(v) => *v,
            AstTerm::Num(n) => self.mk_var(Sort::Int, n.clone()),
            _ => self.add_args(term, N::one()),
        }
    }

    fn mk_sum(&mut self, coeff: N, mut args: Vec<(N, VarId)>) -> VarId {
        args.sort_by_key(|(_, v)| v.0);
        let mut folded: Vec<(N, VarId)> = Vec::new();
        for (c, v) in args {
            if let Some(last) = folded.last_mut() {
                if last.1 == v {
                    last.0 = last.0.clone().checked_add(c).unwrap_or(last.0.clone());
                    continue;
                }
            }
            folded.push((c, v));
        }
        folded.retain(|(c, _)| !c.is_zero());

        if folded.is_empty() {
            return self.mk_var(Sort::Int, coeff);
        }
        if folded.len() == 1 && folded[0].0 == N::one() && coeff.is_zero() {
            return folded[0].1;
        }

        let value = folded
            .iter()
            .try_fold(coeff.clone(), |acc, (c, v)| {
                acc.checked_add(c.clone().checked_mul(self.var(*v).value.clone())?)
            })
            .unwrap_or(coeff.clone());
        let sort = if folded.iter().all(|(_, v)| self.var(*v).sort == Sort::Int) && coeff.is_integer_value() {
            Sort::Int
        } else {
            Sort::Real
        };
        let sum_id = SumId(self.sums.len());
        let var_id = self.mk_var(sort, value);
        self.sums.push(SumNode { var: var_id, coeff, args: folded.clone() });
        self.var_mut(var_id).def = VarDef::Sum(sum_id);
        for (_, v) in &folded {
            self.var_mut(*v).sum_occurs.push(sum_id);
        }
        var_id
    }

    /// Sort and merge a monomial's factors, hash-consing the `MulNode`.
    pub fn mk_mul(&mut self, factors: Vec<(VarId, u32)>) -> VarId {
        let mut merged: Vec<(VarId, u32)> = Vec::new();
        let mut sorted = factors;
        sorted.sort_by_key(|(v, _)| v.0);
        for (v, p) in sorted {
            if let Some(last) = merged.last_mut() {
                if last.0 == v {
                    last.1 += p;
                    continue;
                }
            }
            merged.push((v, p));
        }
        merged.retain(|(_, p)| *p != 0);

        if merged.is_empty() {
            return self.mk_var(Sort::Int, N::one());
        }
        if merged.len() == 1 && merged[0].1 == 1 {
            return merged[0].0;
        }

        if let Some(existing) = self.mul_interner.get(&merged) {
            return self.muls[existing.0].var;
        }

        let value = merged.iter().try_fold(N::one(), |acc, (v, p)| {
            acc.checked_mul(self.var(*v).value.clone().checked_power_of(*p).ok()?).ok()
        });
        let value = value.unwrap_or(N::zero());
        let sort = if merged.iter().all(|(v, _)| self.var(*v).sort == Sort::Int) {
            Sort::Int
        } else {
            Sort::Real
        };
        let mul_id = MulId(self.muls.len());
        let var_id = self.mk_var(sort, value);
        self.muls.push(MulNode { var: var_id, monomial: merged.clone() });
        self.var_mut(var_id).def = VarDef::Product(mul_id);
        for (v, _) in &merged {
            self.var_mut(*v).mul_occurs.push(mul_id);
        }
        self.mul_interner.insert(merged, mul_id);
        var_id
    }

    /// Build (or reuse, via hash-consing) a unary/binary op node. Division
    /// and modulo by zero evaluate to zero rather than erroring, per the
    /// engine's op semantics table.
    pub fn mk_op(&mut self, kind: OpKind, arg1: VarId, arg2: Option<VarId>) -> VarId {
        if let Some(existing) = self.op_interner.get(&(kind, arg1, arg2)) {
            return self.ops[existing.0].var;
        }
        let value = self.eval_op(kind, arg1, arg2);
        let sort = match kind {
            OpKind::ToReal => Sort::Real,
            OpKind::ToInt => Sort::Int,
            OpKind::Div => Sort::Real,
            _ => self.var(arg1).sort,
        };
        let op_id = OpId(self.ops.len());
        let var_id = self.mk_var(sort, value);
        self.ops.push(OpNode { var: var_id, kind, arg1, arg2 });
        self.var_mut(var_id).def = VarDef::Unary(op_id);
        self.var_mut(arg1).op_occurs.push(op_id);
        if let Some(a2) = arg2 {
            self.var_mut(a2).op_occurs.push(op_id);
        }
        self.op_interner.insert((kind, arg1, arg2), op_id);
        var_id
    }

    /// Evaluate an op node's current value from its children's current
    /// values; used both at construction time and by `propagate::update`
    /// after a child changes.
    pub fn eval_op(&self, kind: OpKind, arg1: VarId, arg2: Option<VarId>) -> N {
        let a = self.var(arg1).value.clone();
        let is_int = self.var(arg1).sort == Sort::Int;
        match kind {
            OpKind::Abs => a.checked_abs().unwrap_or(N::zero()),
            OpKind::ToInt => N::from_i64(a.to_f64().floor() as i64),
            OpKind::ToReal => a,
            OpKind::Mod | OpKind::Rem | OpKind::Idiv | OpKind::Div => {
                let b = arg2.map(|v| self.var(v).value.clone()).unwrap_or(N::zero());
                if b.is_zero() {
                    return N::zero();
                }
                match kind {
                    OpKind::Mod => a.checked_mod(b),
                    OpKind::Rem => a.checked_rem(b),
                    OpKind::Idiv => a.divide_floor(b, true),
                    OpKind::Div => a.checked_div(b).unwrap_or(N::zero()),
                    _ => unreachable!(),
                }
            }
            OpKind::Power => {
                let _ = is_int;
                unreachable!("not implemented: POWER op evaluation")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num::Checked64;

    fn n(v: i64) -> Checked64 {
        Checked64::from_i64(v)
    }

    #[test]
    fn mk_var_allocates_fresh_undefined_slot() {
        let mut s: Store<Checked64> = Store::new();
        let v = s.mk_var(Sort::Int, n(5));
        assert_eq!(s.var(v).value, n(5));
        assert_eq!(s.var(v).def, VarDef::None);
    }

    #[test]
    fn add_args_builds_sum_with_sorted_folded_args() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(2));
        let y = s.mk_var(Sort::Int, n(3));
        let term = AstTerm::Add(vec![
            AstTerm::Var(y),
            AstTerm::Var(x),
            AstTerm::Var(x),
            AstTerm::Num(n(10)),
        ]);
        let sum = s.add_args(&term, n(1));
        match s.var(sum).def {
            VarDef::Sum(sid) => {
                let node = &s.sums[sid.0];
                assert_eq!(node.coeff, n(10));
                assert_eq!(node.args, vec![(n(2), x), (n(1), y)]);
            }
            _ => panic!("expected sum node"),
        }
        assert_eq!(s.var(sum).value, n(2 * 2 + 3 + 10));
    }

    #[test]
    fn add_args_drops_zero_coefficient_terms() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(4));
        let y = s.mk_var(Sort::Int, n(1));
        // x - x + y => folds to just y
        let term = AstTerm::Add(vec![
            AstTerm::Var(x),
            AstTerm::Neg(Box::new(AstTerm::Var(x))),
            AstTerm::Var(y),
        ]);
        let sum = s.add_args(&term, n(0));
        assert_eq!(sum, y);
    }

    #[test]
    fn mk_mul_merges_repeated_factors_into_power() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(3));
        let p = s.mk_mul(vec![(x, 1), (x, 2)]);
        match s.var(p).def {
            VarDef::Product(mid) => assert_eq!(s.muls[mid.0].monomial, vec![(x, 3)]),
            _ => panic!("expected product node"),
        }
        assert_eq!(s.var(p).value, n(27));
    }

    #[test]
    fn mk_mul_is_hash_consed() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(2));
        let y = s.mk_var(Sort::Int, n(5));
        let p1 = s.mk_mul(vec![(x, 1), (y, 1)]);
        let p2 = s.mk_mul(vec![(y, 1), (x, 1)]);
        assert_eq!(p1, p2);
        assert_eq!(s.muls.len(), 1);
    }

    #[test]
    fn mk_mul_single_factor_power_one_is_identity() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(7));
        let p = s.mk_mul(vec![(x, 1)]);
        assert_eq!(p, x);
        assert_eq!(s.muls.len(), 0);
    }

    #[test]
    fn mk_op_mod_by_zero_is_zero() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(7));
        let z = s.mk_var(Sort::Int, n(0));
        let m = s.mk_op(OpKind::Mod, x, Some(z));
        assert_eq!(s.var(m).value, n(0));
    }

    #[test]
    fn mk_op_is_hash_consed() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(9));
        let y = s.mk_var(Sort::Int, n(4));
        let a = s.mk_op(OpKind::Mod, x, Some(y));
        let b = s.mk_op(OpKind::Mod, x, Some(y));
        assert_eq!(a, b);
        assert_eq!(s.ops.len(), 1);
    }

    #[test]
    fn mk_op_abs_and_idiv() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(-9));
        let abs = s.mk_op(OpKind::Abs, x, None);
        assert_eq!(s.var(abs).value, n(9));
        let y = s.mk_var(Sort::Int, n(2));
        let idiv = s.mk_op(OpKind::Idiv, x, Some(y));
        assert_eq!(s.var(idiv).value, n(-5));
    }

    #[test]
    fn var_bounds_respect_strictness() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(5));
        s.var_mut(x).upper = Some(Bound { strict: true, value: n(5) });
        assert!(!s.var(x).in_bounds(n(5)));
        assert!(s.var(x).in_bounds(n(4)));
    }

    #[test]
    #[should_panic(expected = "not implemented")]
    fn mk_op_power_is_fatal() {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(2));
        let y = s.mk_var(Sort::Int, n(3));
        s.mk_op(OpKind::Power, x, Some(y));
    }
}
