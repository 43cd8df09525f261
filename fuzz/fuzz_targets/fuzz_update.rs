#![no_main]

use ctx_api::{AtomId, BoolVar, Ctx, ExprRef, Lit};
use engine::Engine;
use libfuzzer_sys::fuzz_target;
use num::Checked64;
use repair::RepairParams;
use search::Params;
use std::collections::HashMap;
use term_dag::{AstTerm, Sort};

fn n(v: i64) -> Checked64 {
    Checked64::from_i64(v)
}

struct FuzzCtx {
    rng: u64,
}

impl FuzzCtx {
    fn next_u64(&mut self) -> u64 {
        self.rng = self.rng.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.rng;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

impl Ctx<Checked64> for FuzzCtx {
    fn atom(&self, _bv: BoolVar) -> Option<AtomId> {
        None
    }
    fn atom2bool_var(&self, _e: ExprRef) -> Option<BoolVar> {
        None
    }
    fn is_true(&self, lit: Lit) -> bool {
        lit.sign
    }
    fn get_value(&self, _e: ExprRef) -> Option<Checked64> {
        None
    }
    fn is_unit(&self, _lit: Lit) -> bool {
        true
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
        self.next_u64()
    }
    fn rand_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.next_u64() % n
        }
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

// Builds a small sum/product parent chain, then replays a stream of
// `set_value` calls from the fuzz bytes against it. Every call -- accepted
// or overflow-rejected -- must leave `check_invariants` satisfied; this is
// the property that makes the pre-flight dry run in `propagate::update`
// correct.
fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let mut idx = 0;
    let mut next = || {
        let b = data.get(idx).copied().unwrap_or(0);
        idx += 1;
        b
    };

    let mut engine = Engine::<Checked64>::new(Params::default(), RepairParams::default());
    let mut ctx = FuzzCtx { rng: (next() as u64).max(1) };

    let x = engine.register_term(ExprRef(0), Sort::Int, None, n(next() as i64));
    let y = engine.register_term(ExprRef(1), Sort::Int, None, n(next() as i64));
    let sum = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Var(y)]);
    engine.register_term(ExprRef(2), Sort::Int, Some(&sum), n(0));
    let product = AstTerm::Mul(vec![AstTerm::Var(x), AstTerm::Var(y)]);
    engine.register_term(ExprRef(3), Sort::Int, Some(&product), n(0));

    while idx + 3 <= data.len() {
        let which = if next() % 2 == 0 { ExprRef(0) } else { ExprRef(1) };
        let lo = next();
        let hi = next();
        let v = ((hi as i64) << 8) | lo as i64;
        let v = ((v << 48) >> 48) as i64; // sign-extend from 16 bits
        let _ = engine.set_value(&mut ctx, which, n(v));
        assert!(engine.check_invariants().is_ok(), "invariant violated after set_value");
    }
});
