#![deny(warnings)]
//! atoms: canonical arithmetic (in)equalities over `term_dag` variables.
//! - `init_bool_var` turns a Boolean variable plus a relational kind and an
//!   arithmetic term into a registered `Atom`, applying the integer
//!   strict-to-non-strict rewrite (`x < c` becomes `x <= c-1` for integers).
//! - `init_ineq` sorts/folds the atom's linear part, groups every factor of
//!   every nonlinear argument into `nonlinear` for `repair`'s local-move
//!   search, and installs `linear_occurs` back-references on each variable.

use ctx_api::{AtomId, BoolVar};
use num::Num;
use std::collections::{BTreeMap, HashMap};
use term_dag::{AstTerm, Sort, Store, VarDef, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Le,
    Lt,
    Eq,
}

/// One factor of a nonlinear argument: `coeff * outer` contributes `power`
/// copies of `inner` (the grouping key) to the product `outer` is defined by.
#[derive(Debug, Clone, Copy)]
pub struct NlTerm<N> {
    pub outer: VarId,
    pub coeff: N,
    pub power: u32,
}

#[derive(Debug, Clone)]
pub struct Atom<N> {
    pub op: RelOp,
    pub coeff: N,
    pub args: Vec<(N, VarId)>,
    /// Parallel to `args`: `Some(monomial)` when that argument variable is
    /// itself a product, `None` for a plain linear variable.
    pub monomials: Vec<Option<Vec<(VarId, u32)>>>,
    /// Grouped by inner factor variable, for nonlinear local moves.
    pub nonlinear: Vec<(VarId, Vec<NlTerm<N>>)>,
    pub args_value: N,
    pub is_linear: bool,
}

impl<N: Num> Atom<N> {
    /// `coeff + sum(c_i * value(arg_i))`, the quantity the relational
    /// operator compares against zero.
    pub fn recompute_args_value(&self, store: &Store<N>) -> N {
        self.args
            .iter()
            .try_fold(self.coeff.clone(), |acc, (c, v)| {
                acc.checked_add(c.clone().checked_mul(store.var(*v).value.clone())?)
            })
            .unwrap_or(self.coeff.clone())
    }

    pub fn holds(&self) -> bool {
        match self.op {
            RelOp::Le => self.args_value.sign() <= 0,
            RelOp::Lt => self.args_value.sign() < 0,
            RelOp::Eq => self.args_value.is_zero(),
        }
    }
}

#[derive(Default)]
pub struct AtomTable<N> {
    pub atoms: Vec<Atom<N>>,
    bool_to_atom: HashMap<BoolVar, AtomId>,
    atom_to_bool: HashMap<AtomId, BoolVar>,
}

impl<N: Num> AtomTable<N> {
    pub fn new() -> Self {
        AtomTable { atoms: Vec::new(), bool_to_atom: HashMap::new(), atom_to_bool: HashMap::new() }
    }

    pub fn atom(&self, a: AtomId) -> &Atom<N> {
        &self.atoms[a.0 as usize]
    }
    pub fn atom_mut(&mut self, a: AtomId) -> &mut Atom<N> {
        &mut self.atoms[a.0 as usize]
    }
    pub fn bool_var_of(&self, a: AtomId) -> Option<BoolVar> {
        self.atom_to_bool.get(&a).copied()
    }
    pub fn atom_of(&self, bv: BoolVar) -> Option<AtomId> {
        self.bool_to_atom.get(&bv).copied()
    }

    /// Build a canonical atom from `term OP 0` and register it against `bv`.
    /// `sort` drives the integer strict-to-non-strict rewrite.
    pub fn init_bool_var(
        &mut self,
        store: &mut Store<N>,
        bv: BoolVar,
        op: RelOp,
        term: &AstTerm<N>,
    ) -> AtomId {
        let v = store.add_args(term, N::one());
        let (coeff, args) = match store.var(v).def {
            VarDef::Sum(sid) => {
                let node = &store.sums[sid.0];
                (node.coeff.clone(), node.args.clone())
            }
            _ => (N::zero(), vec![(N::one(), v)]),
        };
        let all_int = args.iter().all(|(_, a)| store.var(*a).sort == Sort::Int) && coeff.is_integer_value();
        let (op, coeff) = if all_int && op == RelOp::Lt {
            (RelOp::Le, coeff.clone().checked_add(N::one()).unwrap_or(coeff))
        } else {
            (op, coeff)
        };
        let atom_id = AtomId(self.atoms.len() as u32);
        self.atoms.push(Atom {
            op,
            coeff: coeff.clone(),
            args,
            monomials: Vec::new(),
            nonlinear: Vec::new(),
            args_value: coeff,
            is_linear: true,
        });
        self.init_ineq(store, atom_id, bv);
        self.bool_to_atom.insert(bv, atom_id);
        self.atom_to_bool.insert(atom_id, bv);
        atom_id
    }

    fn init_ineq(&mut self, store: &mut Store<N>, atom_id: AtomId, bv: BoolVar) {
        let coeff = self.atoms[atom_id.0 as usize].coeff.clone();
        let mut args = std::mem::take(&mut self.atoms[atom_id.0 as usize].args);
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

        let mut monomials = Vec::with_capacity(folded.len());
        let mut groups: BTreeMap<VarId, Vec<NlTerm<N>>> = BTreeMap::new();
        let mut is_linear = true;
        for (c, v) in &folded {
            match store.var(*v).def {
                VarDef::Product(mid) => {
                    is_linear = false;
                    let monomial = store.muls[mid.0].monomial.clone();
                    for (factor, power) in &monomial {
                        groups
                            .entry(*factor)
                            .or_default()
                            .push(NlTerm { outer: *v, coeff: c.clone(), power: *power });
                    }
                    monomials.push(Some(monomial));
                }
                _ => {
                    groups.entry(*v).or_default().push(NlTerm { outer: *v, coeff: c.clone(), power: 1 });
                    monomials.push(None);
                }
            }
        }

        let args_value = folded
            .iter()
            .try_fold(coeff.clone(), |acc, (c, v)| {
                acc.checked_add(c.clone().checked_mul(store.var(*v).value.clone())?)
            })
            .unwrap_or(coeff);

        for (c, v) in &folded {
            store.var_mut(*v).linear_occurs.push((c.clone(), bv));
        }

        let atom = &mut self.atoms[atom_id.0 as usize];
        atom.args = folded;
        atom.monomials = monomials;
        atom.nonlinear = groups.into_iter().collect();
        atom.args_value = args_value;
        atom.is_linear = is_linear;
    }
}
