use atoms::{AtomTable, RelOp};
use bounds::{install_unit_bounds, propagate_bounds};
use ctx_api::{AtomId, BoolVar, Ctx, ExprRef, Lit};
use num::{Checked64, Num};
use proptest::prelude::*;
use std::collections::HashMap;
use term_dag::{AstTerm, Bound, OpKind, Sort, Store};

fn n(v: i64) -> Checked64 {
    Checked64::from_i64(v)
}

struct StubCtx {
    units: Vec<Lit>,
    atom_of: HashMap<BoolVar, AtomId>,
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
    fn new_value_eh(&mut self, _e: ExprRef) {}
    fn flip(&mut self, _bv: BoolVar) {}
    fn add_new_term(&mut self, e: ExprRef) -> ExprRef {
        e
    }
    fn assign_eval(&mut self, _lit: Lit) {}
    fn assign_propagate(&mut self, _lit: Lit, _clause: usize) {}
}

proptest! {
    #[test]
    fn abs_interval_lower_bound_is_never_negative(lo in -500i64..500, width in 0i64..500) {
        let mut s: Store<Checked64> = Store::new();
        let x = s.mk_var(Sort::Int, n(lo));
        s.var_mut(x).lower = Some(Bound { strict: false, value: n(lo) });
        s.var_mut(x).upper = Some(Bound { strict: false, value: n(lo + width) });
        let abs = s.mk_op(OpKind::Abs, x, None);
        propagate_bounds(&mut s);
        if let Some(b) = s.var(abs).lower {
            prop_assert!(b.value.sign() >= 0);
        }
    }

    #[test]
    fn install_unit_bounds_upper_satisfies_le_boundary(offset in -500i64..500) {
        let mut s: Store<Checked64> = Store::new();
        let mut table: AtomTable<Checked64> = AtomTable::new();
        let x = s.mk_var(Sort::Int, n(0));
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(offset))]);
        let bv = BoolVar(0);
        let id = table.init_bool_var(&mut s, bv, RelOp::Le, &term);
        let mut atom_of = HashMap::new();
        atom_of.insert(bv, id);
        let ctx = StubCtx { units: vec![Lit::positive(bv)], atom_of };
        install_unit_bounds(&mut s, &table, &ctx);
        let upper = s.var(x).upper.expect("Le unit literal installs an upper bound");
        prop_assert_eq!(upper.value, n(-offset));
    }
}
