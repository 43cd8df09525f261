use atoms::RelOp;
use ctx_api::{AtomId, BoolVar, Ctx, ExprRef, Lit};
use engine::Engine;
use num::{Checked64, Num};
use proptest::prelude::*;
use repair::RepairParams;
use search::Params;
use std::collections::HashMap;
use term_dag::{AstTerm, Sort};

fn n(v: i64) -> Checked64 {
    Checked64::from_i64(v)
}

struct StubCtx {
    atom_of: HashMap<BoolVar, AtomId>,
    truth: HashMap<BoolVar, bool>,
    rng: u64,
}

impl StubCtx {
    fn new(seed: u64) -> Self {
        StubCtx { atom_of: HashMap::new(), truth: HashMap::new(), rng: seed.max(1) }
    }
    fn next(&mut self) -> u64 {
        self.rng = self.rng.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.rng
    }
}

impl Ctx<Checked64> for StubCtx {
    fn atom(&self, bv: BoolVar) -> Option<AtomId> {
        self.atom_of.get(&bv).copied()
    }
    fn atom2bool_var(&self, _e: ExprRef) -> Option<BoolVar> {
        None
    }
    fn is_true(&self, lit: Lit) -> bool {
        self.truth.get(&lit.var).copied().unwrap_or(lit.sign)
    }
    fn get_value(&self, _e: ExprRef) -> Option<Checked64> {
        None
    }
    fn is_unit(&self, _l: Lit) -> bool {
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
        self.atom_of.len()
    }
    fn rand(&mut self) -> u64 {
        self.next()
    }
    fn rand_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.next() % n
        }
    }
    fn inc(&self) -> bool {
        true
    }
    fn new_value_eh(&mut self, _e: ExprRef) {}
    fn flip(&mut self, bv: BoolVar) {
        let cur = self.truth.get(&bv).copied().unwrap_or(true);
        self.truth.insert(bv, !cur);
    }
    fn add_new_term(&mut self, e: ExprRef) -> ExprRef {
        e
    }
    fn assign_eval(&mut self, _lit: Lit) {}
    fn assign_propagate(&mut self, _lit: Lit, _clause: usize) {}
}

proptest! {
    #[test]
    fn set_value_round_trips_through_get_value(init in -1000i64..1000, target in -1000i64..1000) {
        let mut e = Engine::<Checked64>::new(Params::default(), RepairParams::default());
        e.register_term(ExprRef(0), Sort::Int, None, n(init));
        let mut ctx = StubCtx::new(1);
        prop_assert!(e.set_value(&mut ctx, ExprRef(0), n(target)));
        prop_assert_eq!(e.get_value(ExprRef(0)), Some(n(target)));
    }

    #[test]
    fn repair_literal_preserves_invariants(offset in -50i64..50, init in -50i64..50) {
        let mut e = Engine::<Checked64>::new(Params::default(), RepairParams::default());
        let x = e.register_term(ExprRef(0), Sort::Int, None, n(init));
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(offset))]);
        let bv = BoolVar(0);
        let aid = e.init_bool_var(bv, RelOp::Le, &term);
        let mut ctx = StubCtx::new(offset.unsigned_abs() + 1);
        ctx.atom_of.insert(bv, aid);
        ctx.truth.insert(bv, true);
        let _ = e.repair_literal(&mut ctx, Lit::positive(bv));
        prop_assert!(e.check_invariants().is_ok());
    }
}
