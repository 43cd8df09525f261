#![deny(warnings)]
//! search: the global lookahead loop. Picks a currently-unsatisfied atom
//! (UCB-weighted, falling back to uniform when UCB is disabled), tries a
//! hillclimb step over every candidate in its dependency cone, and falls
//! back to a random diversification move with PAWS weight recalibration
//! when hillclimbing finds nothing better.

use atoms::{Atom, AtomTable};
use ctx_api::{AtomId, Ctx, ExprRef, Lit};
use num::Num;
use std::collections::HashMap;
use term_dag::{Store, VarDef, VarId};

/// Caps the magnitude used when shaping an unsatisfied atom's score; values
/// with `|args_value|` beyond this are treated as maximally unsatisfied.
pub const MAX_VALUE: f64 = 1000.0;

#[derive(Debug, Clone, Copy)]
pub struct Params {
    pub paws_init: u32,
    pub paws_sp: u32,
    pub wp: u32,
    pub restart_base: u64,
    pub max_moves_base: u64,
    pub arith_use_lookahead: bool,
    pub cb: f64,
    pub ucb_constant: f64,
    pub ucb_noise: f64,
    pub ucb_forget: f64,
    pub ucb_enabled: bool,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            paws_init: 40,
            paws_sp: 52,
            wp: 50,
            restart_base: 1000,
            max_moves_base: 100_000,
            arith_use_lookahead: true,
            cb: 2.0,
            ucb_constant: 4.0,
            ucb_noise: 1e-4,
            ucb_forget: 0.99,
            ucb_enabled: true,
        }
    }
}

/// Per-atom visit counters for UCB selection.
#[derive(Default)]
pub struct UcbState {
    touched: HashMap<AtomId, f64>,
    touched_total: f64,
}

impl UcbState {
    pub fn new() -> Self {
        UcbState::default()
    }

    fn touch(&mut self, a: AtomId) {
        let e = self.touched.entry(a).or_insert(1.0);
        *e += 1.0;
        self.touched_total += 1.0;
    }

    fn touched_of(&self, a: AtomId) -> f64 {
        self.touched.get(&a).copied().unwrap_or(1.0)
    }

    fn forget(&mut self, forget: f64) {
        for v in self.touched.values_mut() {
            *v = 1.0 + (*v - 1.0) * forget;
        }
    }
}

/// Per-atom PAWS weight table; weight never drops below 1.
#[derive(Default)]
pub struct PawsState {
    weight: HashMap<AtomId, u32>,
    init: u32,
}

impl PawsState {
    pub fn new(init: u32) -> Self {
        PawsState { weight: HashMap::new(), init: init.max(1) }
    }

    pub fn weight_of(&self, a: AtomId) -> u32 {
        self.weight.get(&a).copied().unwrap_or(self.init)
    }

    fn decrement(&mut self, a: AtomId) {
        let w = self.weight.entry(a).or_insert(self.init);
        if *w > 1 {
            *w -= 1;
        }
    }

    fn increment(&mut self, a: AtomId) {
        let w = self.weight.entry(a).or_insert(self.init);
        *w += 1;
    }
}

/// Doubling-ish restart cadence: `next += base` on odd restarts, `next +=
/// 2*(k/2)*base` on even ones.
pub struct RestartSchedule {
    pub step: u64,
    pub next: u64,
    pub base: u64,
    pub k: u64,
}

impl RestartSchedule {
    pub fn new(base: u64) -> Self {
        RestartSchedule { step: 0, next: base, base, k: 0 }
    }

    fn advance(&mut self) {
        self.k += 1;
        if self.k % 2 == 1 {
            self.next += self.base;
        } else {
            self.next += 2 * (self.k / 2) * self.base;
        }
    }
}

pub struct SearchState {
    pub params: Params,
    pub ucb: UcbState,
    pub paws: PawsState,
    pub restart: RestartSchedule,
    pub step: u64,
    pub tabu_enabled: bool,
}

impl SearchState {
    pub fn new(params: Params) -> Self {
        let paws = PawsState::new(params.paws_init);
        let restart = RestartSchedule::new(params.restart_base);
        SearchState { params, ucb: UcbState::new(), paws, restart, step: 0, tabu_enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Sat,
    Exhausted,
    Cancelled,
}

fn score_value<N: Num>(op: atoms::RelOp, value: N, max_value: f64) -> f64 {
    let holds = match op {
        atoms::RelOp::Le => value.sign() <= 0,
        atoms::RelOp::Lt => value.sign() < 0,
        atoms::RelOp::Eq => value.is_zero(),
    };
    if holds {
        1.0
    } else {
        let ratio = (value.to_f64() / max_value).clamp(-1.0, 1.0);
        (1.0 - ratio * ratio).max(0.0)
    }
}

/// `1` when the atom already holds; otherwise a sigmoidal shaping of how
/// far `args_value` is from the boundary, scaled by `MAX_VALUE`.
pub fn score<N: Num>(atom: &Atom<N>) -> f64 {
    score_value(atom.op, atom.args_value.clone(), MAX_VALUE)
}

/// `Σ weight(a)·score(a)` over every registered atom.
pub fn top_score<N: Num>(atoms: &AtomTable<N>, paws: &PawsState) -> f64 {
    atoms
        .atoms
        .iter()
        .enumerate()
        .map(|(i, a)| paws.weight_of(AtomId(i as u32)) as f64 * score(a))
        .sum()
}

fn wanted_truth<N: Num, C: Ctx<N>>(ctx: &C, atoms: &AtomTable<N>, aid: AtomId) -> Option<bool> {
    atoms.bool_var_of(aid).map(|bv| ctx.is_true(Lit::positive(bv)))
}

/// Pick an atom whose current truth disagrees with its assigned Boolean
/// variable, weighted by UCB when enabled, uniformly otherwise.
pub fn pick_false_atom<N: Num, C: Ctx<N>>(
    atoms: &AtomTable<N>,
    ctx: &mut C,
    state: &mut SearchState,
) -> Option<AtomId> {
    let false_atoms: Vec<AtomId> = (0..atoms.atoms.len())
        .map(|i| AtomId(i as u32))
        .filter(|aid| wanted_truth(ctx, atoms, *aid).map(|w| w != atoms.atom(*aid).holds()).unwrap_or(false))
        .collect();
    if false_atoms.is_empty() {
        return None;
    }
    let chosen = if state.params.ucb_enabled {
        let ln_total = state.ucb.touched_total.max(1.0).ln().max(0.0);
        let mut best = false_atoms[0];
        let mut best_score = f64::NEG_INFINITY;
        for aid in &false_atoms {
            let bonus = state.params.ucb_constant * (ln_total / state.ucb.touched_of(*aid)).sqrt();
            let noise = state.params.ucb_noise * (ctx.rand() as f64 / u64::MAX as f64);
            let s = score(atoms.atom(*aid)) + bonus + noise;
            if s > best_score {
                best_score = s;
                best = *aid;
            }
        }
        best
    } else {
        let idx = ctx.rand_below(false_atoms.len() as u64) as usize;
        false_atoms[idx]
    };
    state.ucb.touch(chosen);
    Some(chosen)
}

/// Every free variable reachable from `atom`'s arguments by walking
/// sum/product/unary-op definitions down to their leaves.
pub fn fixable_exprs<N: Num>(store: &Store<N>, atom: &Atom<N>) -> Vec<VarId> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut stack: Vec<VarId> = atom.args.iter().map(|(_, v)| *v).collect();
    while let Some(v) = stack.pop() {
        if !seen.insert(v) {
            continue;
        }
        match store.var(v).def {
            VarDef::None => out.push(v),
            VarDef::Sum(sid) => {
                for (_, a) in &store.sums[sid.0].args {
                    stack.push(*a);
                }
            }
            VarDef::Product(mid) => {
                for (a, _) in &store.muls[mid.0].monomial {
                    stack.push(*a);
                }
            }
            VarDef::Unary(oid) => {
                let node = store.ops[oid.0];
                stack.push(node.arg1);
                if let Some(a2) = node.arg2 {
                    stack.push(a2);
                }
            }
        }
    }
    out
}

fn hypothetical_top<N: Num>(atoms: &AtomTable<N>, paws: &PawsState, base: f64, deltas: &[(AtomId, N)]) -> f64 {
    deltas.iter().fold(base, |acc, (aid, val)| {
        let atom = atoms.atom(*aid);
        let w = paws.weight_of(*aid) as f64;
        acc - w * score(atom) + w * score_value(atom.op, val.clone(), MAX_VALUE)
    })
}

/// Evaluate every `(v, Δ)` candidate reachable from `atom_id`'s dependency
/// cone; commit the first strict improvement over `top_score`, by
/// enumeration order, among ties.
pub fn hillclimb<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    expr_of: &HashMap<VarId, ExprRef>,
    atom_id: AtomId,
    fixable: &[VarId],
    state: &mut SearchState,
) -> bool {
    let base = top_score(atoms, &state.paws);
    let atom = atoms.atom(atom_id).clone();
    let mut best: Option<(VarId, N, f64)> = None;
    for v in fixable {
        let linear_coeff = atom.args.iter().find(|(_, a)| a == v).map(|(c, _)| c.clone());
        let proposals: Vec<N> = if let Some(c) = linear_coeff {
            moves::find_linear_moves(store, &atom, *v, c)
        } else if let Some(b) = moves::is_linear(store, &atom, *v) {
            moves::find_linear_moves(store, &atom, *v, b)
        } else if moves::is_quadratic(store, &atom, *v).is_some() {
            moves::find_quadratic_moves(store, &atom, *v)
        } else {
            let cur = store.var(*v).value.clone();
            [cur.clone().checked_add(N::one()), cur.checked_sub(N::one())].into_iter().filter_map(Result::ok).collect()
        };
        for new_value in proposals {
            let Some(clamped) = moves::is_permitted_update(store, *v, new_value, state.step, state.tabu_enabled) else {
                continue;
            };
            if clamped == store.var(*v).value {
                continue;
            }
            let Ok(deltas) = propagate::update_num(store, atoms, *v, clamped.clone()) else {
                continue;
            };
            let candidate_top = hypothetical_top(atoms, &state.paws, base, &deltas);
            if best.as_ref().map(|(_, _, s)| candidate_top > *s).unwrap_or(true) {
                best = Some((*v, clamped, candidate_top));
            }
        }
    }
    match best {
        Some((v, val, new_top)) if new_top > base => propagate::update(store, atoms, ctx, v, val, expr_of).is_ok(),
        _ => false,
    }
}

/// Diversification move: nudge a uniformly random fixable variable by ±1
/// (ints) regardless of whether it improves `top_score`.
pub fn random_inc_dec<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    expr_of: &HashMap<VarId, ExprRef>,
    fixable: &[VarId],
) {
    if fixable.is_empty() {
        return;
    }
    let idx = ctx.rand_below(fixable.len() as u64) as usize;
    let v = fixable[idx];
    let cur = store.var(v).value.clone();
    let delta = if ctx.rand_below(2) == 0 { N::one() } else { N::zero().checked_sub(N::one()).unwrap_or(N::one()) };
    if let Ok(new_value) = cur.checked_add(delta) {
        let _ = propagate::update(store, atoms, ctx, v, new_value, expr_of);
    }
}

/// Diversification move: a full random reset of a uniformly random fixable
/// variable.
pub fn random_update<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    expr_of: &HashMap<VarId, ExprRef>,
    fixable: &[VarId],
) {
    if fixable.is_empty() {
        return;
    }
    let idx = ctx.rand_below(fixable.len() as u64) as usize;
    let v = fixable[idx];
    let new_value = moves::add_reset_update(store, v, ctx);
    let _ = propagate::update(store, atoms, ctx, v, new_value, expr_of);
}

/// PAWS recalibration: with probability `paws_sp/2048`, decrement a
/// currently-satisfied atom's weight; otherwise increment an unsatisfied
/// one's.
pub fn paws_recalibrate<N: Num, C: Ctx<N>>(atoms: &AtomTable<N>, ctx: &mut C, state: &mut SearchState) {
    for i in 0..atoms.atoms.len() {
        let aid = AtomId(i as u32);
        let holds = atoms.atom(aid).holds();
        let roll = ctx.rand_below(2048);
        if holds {
            if roll < state.params.paws_sp as u64 {
                state.paws.decrement(aid);
            }
        } else if roll >= state.params.paws_sp as u64 {
            state.paws.increment(aid);
        }
    }
}

fn check_restart<N: Num>(atoms: &AtomTable<N>, state: &mut SearchState) {
    let _ = atoms;
    if state.restart.step != 0 && state.restart.step % state.params.restart_base == 0 {
        state.ucb.forget(state.params.ucb_forget);
    }
    if state.restart.step >= state.restart.next {
        state.restart.advance();
    }
}

/// Drive the loop for up to `max_moves` iterations, or until satisfied /
/// cancelled via `ctx.inc()`.
pub fn global_search<N: Num, C: Ctx<N>>(
    store: &mut Store<N>,
    atoms: &mut AtomTable<N>,
    ctx: &mut C,
    expr_of: &HashMap<VarId, ExprRef>,
    state: &mut SearchState,
    max_moves: u64,
) -> SearchOutcome {
    for _ in 0..max_moves {
        if !ctx.inc() {
            return SearchOutcome::Cancelled;
        }
        check_restart(atoms, state);
        let Some(atom_id) = pick_false_atom(atoms, ctx, state) else {
            return SearchOutcome::Sat;
        };
        let fixable = fixable_exprs(store, atoms.atom(atom_id));
        let roll = ctx.rand_below(2048);
        if roll < state.params.wp as u64 {
            random_inc_dec(store, atoms, ctx, expr_of, &fixable);
        } else {
            let improved = hillclimb(store, atoms, ctx, expr_of, atom_id, &fixable, state);
            if !improved {
                random_update(store, atoms, ctx, expr_of, &fixable);
                paws_recalibrate(atoms, ctx, state);
            }
        }
        state.step += 1;
        state.restart.step += 1;
    }
    SearchOutcome::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use atoms::RelOp;
    use ctx_api::BoolVar;
    use num::Checked64;
    use std::collections::HashMap as Map;
    use term_dag::{AstTerm, Sort};

    fn n(v: i64) -> Checked64 {
        Checked64::from_i64(v)
    }

    struct StubCtx {
        truth: Map<BoolVar, bool>,
        atom_of: Map<BoolVar, AtomId>,
        seed: u64,
    }

    impl Ctx<Checked64> for StubCtx {
        fn atom(&self, bv: BoolVar) -> Option<AtomId> {
            self.atom_of.get(&bv).copied()
        }
        fn atom2bool_var(&self, _e: ExprRef) -> Option<BoolVar> {
            None
        }
        fn is_true(&self, lit: Lit) -> bool {
            let base = self.truth.get(&lit.var).copied().unwrap_or(false);
            if lit.sign {
                base
            } else {
                !base
            }
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
            self.seed = self.seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            self.seed
        }
        fn rand_below(&mut self, n: u64) -> u64 {
            if n == 0 {
                0
            } else {
                self.rand() % n
            }
        }
        fn inc(&self) -> bool {
            true
        }
        fn new_value_eh(&mut self, _e: ExprRef) {}
        fn flip(&mut self, bv: BoolVar) {
            let cur = self.truth.get(&bv).copied().unwrap_or(false);
            self.truth.insert(bv, !cur);
        }
        fn add_new_term(&mut self, e: ExprRef) -> ExprRef {
            e
        }
        fn assign_eval(&mut self, _lit: Lit) {}
        fn assign_propagate(&mut self, _lit: Lit, _clause: usize) {}
    }

    #[test]
    fn score_is_one_when_atom_holds() {
        let mut s: Store<Checked64> = Store::new();
        let mut table: AtomTable<Checked64> = AtomTable::new();
        let x = s.mk_var(Sort::Int, n(1));
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-5))]);
        let id = table.init_bool_var(&mut s, BoolVar(0), RelOp::Le, &term);
        assert_eq!(score(table.atom(id)), 1.0);
    }

    #[test]
    fn score_decreases_as_value_moves_away_from_boundary() {
        let mut s: Store<Checked64> = Store::new();
        let mut table: AtomTable<Checked64> = AtomTable::new();
        let x = s.mk_var(Sort::Int, n(10));
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(0))]);
        let near = table.init_bool_var(&mut s, BoolVar(0), RelOp::Le, &term);

        let y = s.mk_var(Sort::Int, n(900));
        let term2 = AstTerm::Add(vec![AstTerm::Var(y), AstTerm::Num(n(0))]);
        let far = table.init_bool_var(&mut s, BoolVar(1), RelOp::Le, &term2);

        assert!(score(table.atom(near)) > score(table.atom(far)));
    }

    #[test]
    fn fixable_exprs_reaches_sum_and_product_leaves() {
        let mut s: Store<Checked64> = Store::new();
        let mut table: AtomTable<Checked64> = AtomTable::new();
        let x = s.mk_var(Sort::Int, n(2));
        let y = s.mk_var(Sort::Int, n(3));
        let p = s.mk_mul(vec![(x, 1), (y, 1)]);
        let z = s.mk_var(Sort::Int, n(4));
        let term = AstTerm::Add(vec![AstTerm::Var(p), AstTerm::Var(z)]);
        let id = table.init_bool_var(&mut s, BoolVar(0), RelOp::Eq, &term);
        let leaves = fixable_exprs(&s, table.atom(id));
        assert!(leaves.contains(&x));
        assert!(leaves.contains(&y));
        assert!(leaves.contains(&z));
    }

    #[test]
    fn paws_weight_clamped_to_floor_of_one() {
        let mut paws = PawsState::new(1);
        paws.decrement(AtomId(0));
        assert_eq!(paws.weight_of(AtomId(0)), 1);
    }

    #[test]
    fn restart_schedule_advances_alternating_increments() {
        let mut sched = RestartSchedule::new(10);
        assert_eq!(sched.next, 10);
        sched.advance();
        assert_eq!(sched.next, 20); // odd restart: +base
        sched.advance();
        assert_eq!(sched.next, 40); // even restart: +2*(k/2)*base = +20
    }

    #[test]
    fn pick_false_atom_returns_none_when_all_satisfied() {
        let mut s: Store<Checked64> = Store::new();
        let mut table: AtomTable<Checked64> = AtomTable::new();
        let x = s.mk_var(Sort::Int, n(1));
        let term = AstTerm::Add(vec![AstTerm::Var(x), AstTerm::Num(n(-5))]);
        let id = table.init_bool_var(&mut s, BoolVar(0), RelOp::Le, &term);
        let mut atom_of = Map::new();
        atom_of.insert(BoolVar(0), id);
        let mut truth = Map::new();
        truth.insert(BoolVar(0), true);
        let mut ctx = StubCtx { truth, atom_of, seed: 7 };
        let mut state = SearchState::new(Params::default());
        assert_eq!(pick_false_atom(&table, &mut ctx, &mut state), None);
    }
}
