#![no_main]

use atoms::RelOp;
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
    atom_of: HashMap<BoolVar, AtomId>,
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

// Builds a single atom `coeff_0*v_0 + coeff_1*v_1 + coeff_2*v_2 + const OP 0`
// from the fuzz bytes, repairs it, and checks the engine never panics and
// never leaves a cached value out of sync with its recomputation.
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
    let mut ctx = FuzzCtx { atom_of: HashMap::new(), rng: (next() as u64).max(1) };

    let num_vars = 1 + (next() % 3) as usize;
    let mut vars = Vec::new();
    let mut summands = Vec::new();
    for i in 0..num_vars {
        let init = (next() as i8) as i64;
        let coeff = 1 + (next() % 5) as i64;
        let v = engine.register_term(ExprRef(i as u32), Sort::Int, None, n(init));
        vars.push(v);
        summands.push(AstTerm::Mul(vec![AstTerm::Num(n(coeff)), AstTerm::Var(v)]));
    }
    let constant = (next() as i8) as i64;
    summands.push(AstTerm::Num(n(constant)));
    let term = AstTerm::Add(summands);

    let op = match next() % 3 {
        0 => RelOp::Le,
        1 => RelOp::Lt,
        _ => RelOp::Eq,
    };
    let bv = BoolVar(0);
    let aid = engine.init_bool_var(bv, op, &term);
    ctx.atom_of.insert(bv, aid);

    let _ = engine.repair_literal(&mut ctx, Lit::positive(bv));
    assert!(engine.check_invariants().is_ok(), "invariant violated after repair");
});
