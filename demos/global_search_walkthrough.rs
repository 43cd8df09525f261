//! Drives the global lookahead loop (`Engine::start_propagation`) over two
//! simultaneously-false atoms instead of repairing them one at a time,
//! showing the UCB-selected hillclimb/random-walk loop converge to a
//! jointly-satisfying assignment.

use atoms::RelOp;
use ctx_api::{AtomId, BoolVar, Ctx, ExprRef, Lit};
use engine::Engine;
use num::{Checked64, Num};
use repair::RepairParams;
use search::Params;
use std::collections::HashMap;
use term_dag::{AstTerm, Sort};

fn n(v: i64) -> Checked64 {
    Checked64::from_i64(v)
}

struct DemoCtx {
    atom_of: HashMap<BoolVar, AtomId>,
    rng: u64,
}

impl DemoCtx {
    fn new(seed: u64) -> Self {
        DemoCtx { atom_of: HashMap::new(), rng: seed.max(1) }
    }
    fn next_u64(&mut self) -> u64 {
        self.rng = self.rng.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.rng;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

impl Ctx<Checked64> for DemoCtx {
    fn atom(&self, bv: BoolVar) -> Option<AtomId> {
        self.atom_of.get(&bv).copied()
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
        self.atom_of.keys().map(|bv| Lit::positive(*bv)).collect()
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

fn main() {
    let mut engine = Engine::<Checked64>::new(Params::default(), RepairParams::default());
    let mut ctx = DemoCtx::new(4);

    let x = engine.register_term(ExprRef(0), Sort::Int, None, n(3));
    let y = engine.register_term(ExprRef(1), Sort::Int, None, n(2));
    let linear = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Var(y)]);
    let linear_bv = BoolVar(0);
    let linear_atom = engine.init_bool_var(linear_bv, RelOp::Le, &linear);
    ctx.atom_of.insert(linear_bv, linear_atom);

    let p = engine.register_term(ExprRef(2), Sort::Int, None, n(2));
    let q = engine.register_term(ExprRef(3), Sort::Int, None, n(2));
    let product = AstTerm::Add(vec![
        AstTerm::Num(n(10)),
        AstTerm::Neg(Box::new(AstTerm::Mul(vec![AstTerm::Var(p), AstTerm::Var(q)]))),
    ]);
    let product_bv = BoolVar(1);
    let product_atom = engine.init_bool_var(product_bv, RelOp::Le, &product);
    ctx.atom_of.insert(product_bv, product_atom);

    engine.initialize(&ctx);
    println!("before global_search: {}", engine.is_sat(&ctx));

    let outcome = engine.start_propagation(&mut ctx);
    println!("outcome: {outcome:?}");
    println!("after global_search: {}", engine.is_sat(&ctx));

    let mut stats = engine::Statistics::default();
    engine.collect_statistics(&mut stats);
    println!("{stats:?}");
    debug_assert!(engine.check_invariants().is_ok());
}
