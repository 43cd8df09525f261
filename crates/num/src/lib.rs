//! num: numeric backends for the SLS arithmetic engine.
//! - `Num` trait: the operations the engine needs (checked arithmetic, integer
//!   division family, power, integer root) with overflow modelled as `Result`
//!   rather than panics or silent wraparound.
//! - `Rational`: arbitrary-precision rational built on `num_bigint::BigInt`,
//!   gcd-reduced with a positive denominator (mirrors the normalized-tuple
//!   convention of a small-rational `Q` newtype, scaled to big integers).
//! - `Checked64`: i64 wrapped so every operation goes through `checked_*`;
//!   overflow becomes `NumError::Overflow` instead of wraparound or panic.

#![deny(warnings)]

use num_bigint::{BigInt, Sign};
use std::fmt;

/// Failure modes for numeric operations. Overflow is recoverable (the caller
/// treats the attempted move as not applicable); division by zero is only
/// raised by the raw arithmetic entry points used by move proposers, never by
/// unary-op evaluation (which defines division-by-zero to be 0, see the term
/// DAG's op evaluator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumError {
    Overflow,
    DivisionByZero,
}

impl fmt::Display for NumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumError::Overflow => write!(f, "numeric overflow"),
            NumError::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

impl std::error::Error for NumError {}

pub type NumResult<T> = Result<T, NumError>;

/// Abstracted signed arithmetic backend. `is_int` parameters reflect the
/// *variable's* sort (INT vs REAL), not a property of the backend itself: a
/// `Rational` value can represent either sort, while `Checked64` only makes
/// sense for INT-sorted problems (its "real" division truncates toward zero,
/// since it cannot represent a fraction).
pub trait Num: Clone + fmt::Debug + PartialEq + PartialOrd {
    fn zero() -> Self;
    fn one() -> Self;
    fn from_i64(v: i64) -> Self;

    /// -1, 0, or 1.
    fn sign(&self) -> i32;
    fn is_zero(&self) -> bool {
        self.sign() == 0
    }
    /// Best-effort float view, used only for scoring shaping and as a seed
    /// for `root_of`'s Newton iteration -- never for correctness-critical
    /// comparisons.
    fn to_f64(&self) -> f64;
    /// True when the value is exactly representable as an integer (always
    /// true for `Checked64`; for `Rational`, denominator == 1).
    fn is_integer_value(&self) -> bool;

    fn checked_add(self, rhs: Self) -> NumResult<Self>;
    fn checked_sub(self, rhs: Self) -> NumResult<Self>;
    fn checked_mul(self, rhs: Self) -> NumResult<Self>;
    /// Plain field/truncating division; `Err(DivisionByZero)` iff `rhs` is zero.
    fn checked_div(self, rhs: Self) -> NumResult<Self>;

    /// Floor division. `is_int == false` just forwards to `checked_div`
    /// (division is exact over the reals, nothing to floor).
    fn divide_floor(self, rhs: Self, is_int: bool) -> Self;
    /// Ceiling division. `is_int == false` just forwards to `checked_div`.
    fn divide_ceil(self, rhs: Self, is_int: bool) -> Self;

    fn checked_neg(self) -> NumResult<Self> {
        Self::zero().checked_sub(self)
    }
    fn checked_abs(self) -> NumResult<Self> {
        if self.sign() < 0 {
            self.checked_neg()
        } else {
            Ok(self)
        }
    }

    /// The `divide` operator of the numeric-backend contract: rounds toward
    /// zero for reals (delegates to `checked_div`); for integers, returns the
    /// smallest-in-absolute-value integer that still pushes `a` strictly past
    /// zero in the direction carried by `b`'s sign, computed as
    /// `div(a + |b| - 1, b)` via floor division.
    fn checked_divide(self, rhs: Self, is_int: bool) -> NumResult<Self> {
        if rhs.is_zero() {
            return Err(NumError::DivisionByZero);
        }
        if !is_int {
            return self.checked_div(rhs);
        }
        let abs_b = rhs.clone().checked_abs()?;
        let numerator = self.checked_add(abs_b)?.checked_sub(Self::one())?;
        Ok(numerator.divide_floor(rhs, true))
    }

    /// Truncation toward zero, via floor (non-negative) or ceil (negative).
    fn trunc(self) -> Self {
        if self.sign() >= 0 {
            self.divide_floor(Self::one(), true)
        } else {
            self.divide_ceil(Self::one(), true)
        }
    }

    /// Integer floor-mod; 0 when `rhs == 0` (§6 table: MOD).
    fn checked_mod(self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Self::zero();
        }
        let q = self.clone().divide_floor(rhs.clone(), true);
        rhs.checked_mul(q).and_then(|p| self.checked_sub(p)).unwrap_or_else(|_| Self::zero())
    }

    /// Target-language (truncating) remainder; 0 when `rhs == 0` (§6 table: REM).
    fn checked_rem(self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Self::zero();
        }
        match self.clone().checked_div(rhs.clone()) {
            Ok(q) => {
                let qt = q.trunc();
                rhs.checked_mul(qt).and_then(|p| self.checked_sub(p)).unwrap_or_else(|_| Self::zero())
            }
            Err(_) => Self::zero(),
        }
    }

    /// `self^k` by binary exponentiation.
    fn checked_power_of(self, k: u32) -> NumResult<Self> {
        if k == 0 {
            return Ok(Self::one());
        }
        let mut base = self;
        let mut exp = k;
        let mut acc = Self::one();
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.checked_mul(base.clone())?;
            }
            exp >>= 1;
            if exp > 0 {
                base = base.clone().checked_mul(base)?;
            }
        }
        Ok(acc)
    }

    /// Exact integer square root via `2*isqrt(d/4) + {0,1}` recursive
    /// refinement. Requires `self >= 0`; returns 0 for negative input.
    fn isqrt(self) -> Self {
        if self.sign() <= 0 {
            return Self::zero();
        }
        if self == Self::one() {
            return Self::one();
        }
        let four = Self::from_i64(4);
        let d4 = self.clone().divide_floor(four, true);
        let r = d4.isqrt();
        let two = Self::from_i64(2);
        let cand_hi = match r.clone().checked_mul(two.clone()).and_then(|v| v.checked_add(Self::one())) {
            Ok(v) => v,
            Err(_) => return r.clone().checked_mul(two).unwrap_or(r),
        };
        match cand_hi.clone().checked_mul(cand_hi.clone()) {
            Ok(sq) if sq <= self => cand_hi,
            _ => r.clone().checked_mul(two).unwrap_or(r),
        }
    }

    /// Integer k-th root via Newton iteration:
    /// `x_{n+1} = ((k-1)*x_n + a/x_n^{k-1}) / k`, halted when non-decreasing.
    /// Requires `self >= 0`.
    fn root_of(self, k: u32) -> Self {
        if k == 0 || self.sign() <= 0 {
            return if self.is_zero() { Self::zero() } else { Self::one() };
        }
        if k == 1 || self == Self::one() {
            return self;
        }
        if k == 2 {
            return self.isqrt();
        }
        let approx = self.to_f64().max(1.0).powf(1.0 / k as f64);
        let mut x = Self::from_i64((approx.round() as i64).max(1));
        let k_num = Self::from_i64(k as i64);
        loop {
            let x_pow = match x.clone().checked_power_of(k - 1) {
                Ok(v) if !v.is_zero() => v,
                _ => Self::one(),
            };
            let term = self.clone().divide_floor(x_pow, true);
            let next = match Self::from_i64((k - 1) as i64)
                .checked_mul(x.clone())
                .and_then(|v| v.checked_add(term))
            {
                Ok(sum) => sum.divide_floor(k_num.clone(), true),
                Err(_) => break,
            };
            if next >= x {
                break;
            }
            x = next;
        }
        x
    }
}

// ---------------------------------------------------------------------
// Checked64: overflow-checked 64-bit integer backend.
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checked64(pub i64);

impl fmt::Display for Checked64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn floor_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

fn ceil_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) == (b < 0) {
        q + 1
    } else {
        q
    }
}

impl Num for Checked64 {
    fn zero() -> Self {
        Checked64(0)
    }
    fn one() -> Self {
        Checked64(1)
    }
    fn from_i64(v: i64) -> Self {
        Checked64(v)
    }
    fn sign(&self) -> i32 {
        self.0.signum() as i32
    }
    fn to_f64(&self) -> f64 {
        self.0 as f64
    }
    fn is_integer_value(&self) -> bool {
        true
    }

    fn checked_add(self, rhs: Self) -> NumResult<Self> {
        self.0.checked_add(rhs.0).map(Checked64).ok_or(NumError::Overflow)
    }
    fn checked_sub(self, rhs: Self) -> NumResult<Self> {
        self.0.checked_sub(rhs.0).map(Checked64).ok_or(NumError::Overflow)
    }
    fn checked_mul(self, rhs: Self) -> NumResult<Self> {
        self.0.checked_mul(rhs.0).map(Checked64).ok_or(NumError::Overflow)
    }
    fn checked_div(self, rhs: Self) -> NumResult<Self> {
        if rhs.0 == 0 {
            return Err(NumError::DivisionByZero);
        }
        // Checked64 cannot represent a fraction; "real" division truncates
        // toward zero the way integer division already does.
        self.0.checked_div(rhs.0).map(Checked64).ok_or(NumError::Overflow)
    }
    fn divide_floor(self, rhs: Self, is_int: bool) -> Self {
        if rhs.0 == 0 {
            return Self::zero();
        }
        if !is_int {
            return self.checked_div(rhs).unwrap_or(Self::zero());
        }
        Checked64(floor_div_i64(self.0, rhs.0))
    }
    fn divide_ceil(self, rhs: Self, is_int: bool) -> Self {
        if rhs.0 == 0 {
            return Self::zero();
        }
        if !is_int {
            return self.checked_div(rhs).unwrap_or(Self::zero());
        }
        Checked64(ceil_div_i64(self.0, rhs.0))
    }
}

// ---------------------------------------------------------------------
// Rational: arbitrary-precision rational over BigInt.
// ---------------------------------------------------------------------

/// Normalized fraction: `den > 0`, `gcd(|num|, den) == 1`, `0` represented as
/// `0/1`. Mirrors the `(num, den)` normalization convention of a small
/// rational newtype, scaled up to arbitrary-precision integers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rational {
    num: BigInt,
    den: BigInt,
}

fn big_is_zero(n: &BigInt) -> bool {
    n.sign() == Sign::NoSign
}

fn gcd_big(a: &BigInt, b: &BigInt) -> BigInt {
    let mut a = if a.sign() == Sign::Minus { -a.clone() } else { a.clone() };
    let mut b = if b.sign() == Sign::Minus { -b.clone() } else { b.clone() };
    while !big_is_zero(&b) {
        let t = &a % &b;
        a = b;
        b = t;
    }
    a
}

fn floor_div_big(n: &BigInt, d: &BigInt) -> BigInt {
    let q = n / d;
    let r = n - &q * d;
    if !big_is_zero(&r) && (r.sign() == Sign::Minus) != (d.sign() == Sign::Minus) {
        q - 1
    } else {
        q
    }
}

fn ceil_div_big(n: &BigInt, d: &BigInt) -> BigInt {
    let q = n / d;
    let r = n - &q * d;
    if !big_is_zero(&r) && (r.sign() == Sign::Minus) == (d.sign() == Sign::Minus) {
        q + 1
    } else {
        q
    }
}

fn bigint_to_f64(n: &BigInt) -> f64 {
    n.to_string().parse::<f64>().unwrap_or(if n.sign() == Sign::Minus {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    })
}

impl Rational {
    pub fn new(num: impl Into<BigInt>, den: impl Into<BigInt>) -> Self {
        let num = num.into();
        let den = den.into();
        assert!(!big_is_zero(&den), "zero denominator");
        Self::normalize(num, den)
    }

    fn normalize(mut num: BigInt, mut den: BigInt) -> Self {
        if den.sign() == Sign::Minus {
            num = -num;
            den = -den;
        }
        if big_is_zero(&num) {
            return Rational { num: BigInt::from(0), den: BigInt::from(1) };
        }
        let g = gcd_big(&num, &den);
        if g != BigInt::from(1) && !big_is_zero(&g) {
            num /= &g;
            den /= &g;
        }
        Rational { num, den }
    }

    pub fn numer(&self) -> &BigInt {
        &self.num
    }
    pub fn denom(&self) -> &BigInt {
        &self.den
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == BigInt::from(1) {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        // den > 0 on both sides by construction, so cross-multiplication
        // preserves order.
        Some((&self.num * &other.den).cmp(&(&other.num * &self.den)))
    }
}

impl Num for Rational {
    fn zero() -> Self {
        Rational { num: BigInt::from(0), den: BigInt::from(1) }
    }
    fn one() -> Self {
        Rational { num: BigInt::from(1), den: BigInt::from(1) }
    }
    fn from_i64(v: i64) -> Self {
        Rational { num: BigInt::from(v), den: BigInt::from(1) }
    }
    fn sign(&self) -> i32 {
        match self.num.sign() {
            Sign::Minus => -1,
            Sign::NoSign => 0,
            Sign::Plus => 1,
        }
    }
    fn to_f64(&self) -> f64 {
        bigint_to_f64(&self.num) / bigint_to_f64(&self.den)
    }
    fn is_integer_value(&self) -> bool {
        self.den == BigInt::from(1)
    }

    fn checked_add(self, rhs: Self) -> NumResult<Self> {
        let num = &self.num * &rhs.den + &rhs.num * &self.den;
        let den = &self.den * &rhs.den;
        Ok(Rational::normalize(num, den))
    }
    fn checked_sub(self, rhs: Self) -> NumResult<Self> {
        let num = &self.num * &rhs.den - &rhs.num * &self.den;
        let den = &self.den * &rhs.den;
        Ok(Rational::normalize(num, den))
    }
    fn checked_mul(self, rhs: Self) -> NumResult<Self> {
        Ok(Rational::normalize(&self.num * &rhs.num, &self.den * &rhs.den))
    }
    fn checked_div(self, rhs: Self) -> NumResult<Self> {
        if big_is_zero(&rhs.num) {
            return Err(NumError::DivisionByZero);
        }
        Ok(Rational::normalize(&self.num * &rhs.den, &self.den * &rhs.num))
    }
    fn divide_floor(self, rhs: Self, is_int: bool) -> Self {
        if big_is_zero(&rhs.num) {
            return Self::zero();
        }
        if !is_int {
            return self.checked_div(rhs).unwrap_or_else(|_| Self::zero());
        }
        let n = &self.num * &rhs.den;
        let d = &self.den * &rhs.num;
        Rational { num: floor_div_big(&n, &d), den: BigInt::from(1) }
    }
    fn divide_ceil(self, rhs: Self, is_int: bool) -> Self {
        if big_is_zero(&rhs.num) {
            return Self::zero();
        }
        if !is_int {
            return self.checked_div(rhs).unwrap_or_else(|_| Self::zero());
        }
        let n = &self.num * &rhs.den;
        let d = &self.den * &rhs.num;
        Rational { num: ceil_div_big(&n, &d), den: BigInt::from(1) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked64_overflow_detected() {
        let a = Checked64(i64::MAX);
        let b = Checked64(1);
        assert_eq!(a.checked_add(b), Err(NumError::Overflow));
    }

    #[test]
    fn checked64_floor_ceil_match_reference() {
        // divide_floor(v, a, b) * b <= a < (divide_floor(v,a,b)+1)*b
        for a in -20i64..=20 {
            for b in [-7i64, -3, -1, 1, 3, 7] {
                let q = Checked64::from_i64(a).divide_floor(Checked64::from_i64(b), true).0;
                assert!(q * b <= a && a < (q + 1) * b, "a={a} b={b} q={q}");
            }
        }
    }

    #[test]
    fn checked64_mod_matches_floor_semantics() {
        assert_eq!(Checked64(-7).checked_mod(Checked64(3)).0, 2);
        assert_eq!(Checked64(7).checked_mod(Checked64(-3)).0, -2);
        assert_eq!(Checked64(7).checked_mod(Checked64(0)).0, 0);
    }

    #[test]
    fn checked64_rem_matches_truncating_semantics() {
        assert_eq!(Checked64(-7).checked_rem(Checked64(3)).0, -1);
        assert_eq!(Checked64(7).checked_rem(Checked64(-3)).0, 1);
        assert_eq!(Checked64(7).checked_rem(Checked64(0)).0, 0);
    }

    #[test]
    fn checked64_divide_rule() {
        // divide(v, a, b): smallest-abs-value result pushing a past zero.
        assert_eq!(Checked64(7).checked_divide(Checked64(2), true).unwrap().0, 4);
        assert_eq!(Checked64(-7).checked_divide(Checked64(2), true).unwrap().0, -3);
        assert_eq!(Checked64(6).checked_divide(Checked64(3), true).unwrap().0, 2);
    }

    #[test]
    fn checked64_isqrt_exact_bounds() {
        for d in 0i64..2000 {
            let r = Checked64::from_i64(d).isqrt().0;
            assert!(r * r <= d && d < (r + 1) * (r + 1), "d={d} r={r}");
        }
    }

    #[test]
    fn checked64_root_of_cube() {
        for a in 0i64..=5000 {
            let r = Checked64::from_i64(a).root_of(3).0;
            assert!(r.pow(3) <= a, "a={a} r={r}");
            assert!(a < (r + 1).pow(3), "a={a} r={r}");
        }
    }

    #[test]
    fn rational_normalizes_on_construction() {
        let r = Rational::new(4, 8);
        assert_eq!(r.numer(), &BigInt::from(1));
        assert_eq!(r.denom(), &BigInt::from(2));
        let r2 = Rational::new(3, -6);
        assert_eq!(r2.numer(), &BigInt::from(-1));
        assert_eq!(r2.denom(), &BigInt::from(2));
    }

    #[test]
    fn rational_arithmetic() {
        let half = Rational::new(1, 2);
        let third = Rational::new(1, 3);
        assert_eq!(half.clone().checked_add(third.clone()).unwrap(), Rational::new(5, 6));
        assert_eq!(half.clone().checked_sub(third.clone()).unwrap(), Rational::new(1, 6));
        assert_eq!(half.clone().checked_mul(third.clone()).unwrap(), Rational::new(1, 6));
        assert_eq!(half.checked_div(third).unwrap(), Rational::new(3, 2));
    }

    #[test]
    fn rational_division_by_zero() {
        let a = Rational::new(1, 1);
        let z = Rational::zero();
        assert_eq!(a.checked_div(z), Err(NumError::DivisionByZero));
    }

    #[test]
    fn rational_floor_ceil_on_integers() {
        let a = Rational::from_i64(7);
        let b = Rational::from_i64(2);
        assert_eq!(a.clone().divide_floor(b.clone(), true), Rational::from_i64(3));
        assert_eq!(a.divide_ceil(b, true), Rational::from_i64(4));
    }

    #[test]
    fn rational_isqrt_exact_bounds() {
        for d in 0i64..500 {
            let r = Rational::from_i64(d).isqrt();
            let rr = r.clone().checked_mul(r.clone()).unwrap();
            let next = r.clone().checked_add(Rational::one()).unwrap();
            let next_sq = next.clone().checked_mul(next).unwrap();
            assert!(rr <= Rational::from_i64(d));
            assert!(Rational::from_i64(d) < next_sq);
        }
    }

    #[test]
    fn rational_power_of() {
        let two = Rational::from_i64(2);
        assert_eq!(two.checked_power_of(10).unwrap(), Rational::from_i64(1024));
    }
}
