#![deny(warnings)]
//! engine: the composition root. Owns every arena (`term_dag::Store`,
//! `atoms::AtomTable`), the global-search state (PAWS weights, UCB
//! counters, restart schedule, tabu toggle) and the repair parameter set
//! -- no global mutable state outside this struct. The surrounding SMT
//! context is never stored; every operation that needs it takes a `Ctx`
//! reference as a parameter, the same narrow-capability pattern used by
//! every sibling crate (`propagate::update`, `repair::repair`,
//! `search::global_search`).
//!
//! `register_term`/`add_args` create term DAG nodes lazily and the DAG is
//! never destroyed (spec §3's "term DAG lifecycle"); this crate adds the
//! bidirectional `ExprRef <-> VarId` maps that let the other 17
//! operations translate between the context's own AST nodes and this
//! engine's internal variables.

use atoms::{AtomTable, RelOp};
use ctx_api::{AtomId, BoolVar, Ctx, ExprRef, Lit};
use num::Num;
use repair::RepairParams;
use search::{Params, SearchOutcome, SearchState, UcbState};
use std::collections::HashMap;
use term_dag::{AstTerm, OpKind, Sort, Store, VarDef};

/// Diagnostic counters surfaced to the owning solver. Zeroed by
/// `reset_statistics`, snapshotted by `collect_statistics`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Statistics {
    pub moves: u64,
    pub repairs_ok: u64,
    pub repairs_failed: u64,
    pub restarts: u64,
    pub overflow_aborts: u64,
}

pub struct Engine<N: Num> {
    store: Store<N>,
    atoms: AtomTable<N>,
    /// This engine's variable for every context `ExprRef` it has registered.
    var_of: HashMap<ExprRef, term_dag::VarId>,
    /// Inverse of `var_of`; translates a variable back to the context's own
    /// AST node for `new_value_eh` and for `repair_down`'s return value.
    expr_of: HashMap<term_dag::VarId, ExprRef>,
    search: SearchState,
    repair_params: RepairParams,
    max_moves: u64,
    stats: Statistics,
}

impl<N: Num> Engine<N> {
    pub fn new(params: Params, repair_params: RepairParams) -> Self {
        let max_moves = params.max_moves_base;
        Engine {
            store: Store::new(),
            atoms: AtomTable::new(),
            var_of: HashMap::new(),
            expr_of: HashMap::new(),
            search: SearchState::new(params),
            repair_params,
            max_moves,
            stats: Statistics::default(),
        }
    }

    /// Register a context expression as a tracked numeric variable,
    /// returning the existing one if `e` was already registered. `term`
    /// describes `e`'s structure in terms of already-registered variables
    /// (built via `add_args`); pass `None` to mint a fresh, structure-less
    /// leaf (an uninterpreted subterm that move proposers can still pick).
    pub fn register_term(
        &mut self,
        e: ExprRef,
        sort: Sort,
        term: Option<&AstTerm<N>>,
        initial_value: N,
    ) -> term_dag::VarId {
        if let Some(&v) = self.var_of.get(&e) {
            return v;
        }
        let v = match term {
            Some(t) => self.store.add_args(t, N::one()),
            None => self.store.mk_var(sort, initial_value),
        };
        self.var_of.insert(e, v);
        self.expr_of.insert(v, e);
        v
    }

    /// Build a canonical atom from `term OP 0` and register it against `bv`.
    pub fn init_bool_var(&mut self, bv: BoolVar, op: RelOp, term: &AstTerm<N>) -> AtomId {
        self.atoms.init_bool_var(&mut self.store, bv, op, term)
    }

    /// Compute interval bounds (single forward pass), then install unit and
    /// finite-domain bounds read from the context.
    pub fn initialize<C: Ctx<N>>(&mut self, ctx: &C) {
        bounds::propagate_bounds(&mut self.store);
        bounds::install_unit_bounds(&mut self.store, &self.atoms, ctx);
        bounds::install_finite_domains(&mut self.store, &self.atoms, ctx);
    }

    /// Run the global lookahead loop for up to the current move budget. A
    /// no-op (returns `SearchOutcome::Cancelled`, nothing attempted) when
    /// `arith_use_lookahead` is off. On exhaustion the move budget grows by
    /// 100, matching `max_moves_base`'s documented growth-on-exhaustion.
    pub fn start_propagation<C: Ctx<N>>(&mut self, ctx: &mut C) -> SearchOutcome {
        if !self.search.params.arith_use_lookahead {
            return SearchOutcome::Cancelled;
        }
        let outcome = search::global_search(
            &mut self.store,
            &mut self.atoms,
            ctx,
            &self.expr_of,
            &mut self.search,
            self.max_moves,
        );
        if outcome == SearchOutcome::Exhausted {
            self.max_moves += 100;
        }
        outcome
    }

    /// Cheap consistency check: does `lit`'s atom already hold under `lit`'s
    /// polarity? No mutation, no search -- see `repair_literal` for that.
    pub fn propagate_literal<C: Ctx<N>>(&self, ctx: &C, lit: Lit) -> bool {
        let _ = ctx;
        match self.atoms.atom_of(lit.var) {
            Some(aid) => moves::dtt(lit.sign, self.atoms.atom(aid)).is_zero(),
            None => false,
        }
    }

    /// Try to make `lit` true via `repair::repair`'s nonlinear-move / tabu-
    /// relaxed / reset cascade.
    pub fn repair_literal<C: Ctx<N>>(&mut self, ctx: &mut C, lit: Lit) -> bool {
        let ok = repair::repair(
            &mut self.store,
            &mut self.atoms,
            ctx,
            &self.expr_of,
            lit,
            self.search.step,
            &mut self.search.tabu_enabled,
            &self.repair_params,
        );
        if ok {
            self.stats.repairs_ok += 1;
        } else {
            self.stats.repairs_failed += 1;
        }
        ok
    }

    /// Theory-combination entry point; always a no-op here (Non-goal:
    /// "theory combination logic beyond notifying the context of value
    /// changes", spec §1).
    pub fn propagate(&self) -> bool {
        false
    }

    /// Re-evaluate `e`'s value from its definition node's current children.
    pub fn repair_up(&mut self, e: ExprRef) {
        if let Some(&v) = self.var_of.get(&e) {
            repair::repair_up(&mut self.store, v);
        }
    }

    /// Invert `e`'s definition node so it would evaluate to `target`,
    /// returning the context expression and value to assign, or `None` if
    /// `e` isn't a registered unary-op node, isn't invertible (`Rem`/`Idiv`
    /// bail), or its child has no back-mapping to the context.
    pub fn repair_down(&self, e: ExprRef, target: N) -> Option<(ExprRef, N)> {
        let &v = self.var_of.get(&e)?;
        let (child, val) = repair::repair_down(&self.store, v, target)?;
        let child_expr = *self.expr_of.get(&child)?;
        Some((child_expr, val))
    }

    /// Commit `v` on `e` through the value-update engine. `false` on
    /// overflow, out-of-range/bounds, or an unregistered `e`.
    pub fn set_value<C: Ctx<N>>(&mut self, ctx: &mut C, e: ExprRef, v: N) -> bool {
        let Some(&var) = self.var_of.get(&e) else { return false };
        match propagate::update(&mut self.store, &mut self.atoms, ctx, var, v, &self.expr_of) {
            Ok(()) => {
                self.stats.moves += 1;
                true
            }
            Err(propagate::UpdateFailed::Overflow) => {
                self.stats.overflow_aborts += 1;
                false
            }
            Err(_) => false,
        }
    }

    pub fn get_value(&self, e: ExprRef) -> Option<N> {
        self.var_of.get(&e).map(|&v| self.store.var(v).value.clone())
    }

    /// Write `e`'s value into `out` and return `true` iff `e` is registered
    /// and pinned to a single possible value (a singleton finite domain, or
    /// equal non-strict lower/upper bounds).
    pub fn is_fixed(&self, e: ExprRef, out: &mut N) -> bool {
        let Some(&v) = self.var_of.get(&e) else { return false };
        let var = self.store.var(v);
        if let Some(dom) = &var.finite_domain {
            if dom.len() == 1 {
                *out = dom[0].clone();
                return true;
            }
        }
        if let (Some(lo), Some(hi)) = (&var.lower, &var.upper) {
            if !lo.strict && !hi.strict && lo.value == hi.value {
                *out = lo.value.clone();
                return true;
            }
        }
        false
    }

    /// Every atom with a registered Boolean variable agrees with its
    /// context-assigned truth.
    pub fn is_sat<C: Ctx<N>>(&self, ctx: &C) -> bool {
        (0..self.atoms.atoms.len()).map(|i| AtomId(i as u32)).all(|aid| match self.atoms.bool_var_of(aid) {
            Some(bv) => ctx.is_true(Lit::positive(bv)) == self.atoms.atom(aid).holds(),
            None => true,
        })
    }

    pub fn save_best_values(&mut self) {
        for var in self.store.vars.iter_mut() {
            var.best_value = var.value.clone();
        }
    }

    /// Fresh search state (PAWS weights, UCB counters, restart schedule)
    /// under the same `Params`, mirroring a full restart of the owning
    /// CDCL search.
    pub fn on_restart(&mut self) {
        self.search = SearchState::new(self.search.params);
        self.stats.restarts += 1;
    }

    /// Forget UCB visit counts and clear per-variable tabu bookkeeping,
    /// without discarding PAWS weights -- lighter than a full restart.
    pub fn on_rescale(&mut self) {
        self.search.ucb = UcbState::new();
        for var in self.store.vars.iter_mut() {
            var.ban_until_step = 0;
            var.last_delta = None;
        }
    }

    pub fn collect_statistics(&self, out: &mut Statistics) {
        *out = self.stats;
    }

    pub fn reset_statistics(&mut self) {
        self.stats = Statistics::default();
    }

    /// Fatal-path invariant check (spec §7 "invariant violation"): every
    /// cached `args_value` and every sum/product/op node's stored value
    /// must match a from-scratch recomputation. `Power` nodes are skipped
    /// -- recomputing them would hit the same `unreachable!` their own
    /// evaluator does.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (i, atom) in self.atoms.atoms.iter().enumerate() {
            let recomputed = atom.recompute_args_value(&self.store);
            if recomputed != atom.args_value {
                return Err(format!("atom {i}: cached args_value disagrees with recomputation"));
            }
        }
        for (i, var) in self.store.vars.iter().enumerate() {
            match var.def {
                VarDef::None => {}
                VarDef::Sum(sid) => {
                    let node = &self.store.sums[sid.0];
                    let recomputed = node
                        .args
                        .iter()
                        .try_fold(node.coeff.clone(), |acc, (c, a)| {
                            acc.checked_add(c.clone().checked_mul(self.store.var(*a).value.clone()).ok()?).ok()
                        })
                        .unwrap_or_else(|| node.coeff.clone());
                    if recomputed != var.value {
                        return Err(format!("var {i}: sum value disagrees with recomputation"));
                    }
                }
                VarDef::Product(mid) => {
                    let node = &self.store.muls[mid.0];
                    let recomputed = node
                        .monomial
                        .iter()
                        .try_fold(N::one(), |acc, (a, p)| {
                            acc.checked_mul(self.store.var(*a).value.clone().checked_power_of(*p).ok()?).ok()
                        })
                        .unwrap_or(N::zero());
                    if recomputed != var.value {
                        return Err(format!("var {i}: product value disagrees with recomputation"));
                    }
                }
                VarDef::Unary(oid) => {
                    let node = self.store.ops[oid.0];
                    if node.kind == OpKind::Power {
                        continue;
                    }
                    let recomputed = self.store.eval_op(node.kind, node.arg1, node.arg2);
                    if recomputed != var.value {
                        return Err(format!("var {i}: op value disagrees with recomputation"));
                    }
                }
            }
        }
        Ok(())
    }
}
