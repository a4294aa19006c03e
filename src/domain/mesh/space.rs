use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Index, Mul, Neg, Sub};

use json::{object, JsonValue};

#[derive(Clone, Copy, Debug, PartialEq)]
/// 2D vector in Real or Parametric Space
pub struct V2D {
    inner: [f64; 2],
}

impl V2D {
    pub const fn from([x, y]: [f64; 2]) -> Self {
        Self { inner: [x, y] }
    }

    pub const fn zero() -> Self {
        Self { inner: [0.0; 2] }
    }

    pub fn x(&self) -> f64 {
        self.inner[0]
    }

    pub fn y(&self) -> f64 {
        self.inner[1]
    }

    pub fn dot_with(&self, other: &Self) -> f64 {
        self[0] * other[0] + self[1] * other[1]
    }

    pub fn norm(&self) -> f64 {
        self.dot_with(self).sqrt()
    }
}

impl Default for V2D {
    fn default() -> Self {
        Self::zero()
    }
}

impl Index<usize> for V2D {
    type Output = f64;
    fn index(&self, index: usize) -> &Self::Output {
        &self.inner[index]
    }
}

impl Add for V2D {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self::from([self[0] + other[0], self[1] + other[1]])
    }
}

impl Sub for V2D {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self::from([self[0] - other[0], self[1] - other[1]])
    }
}

impl Neg for V2D {
    type Output = Self;
    fn neg(self) -> Self {
        Self::from([-self[0], -self[1]])
    }
}

impl Div<f64> for V2D {
    type Output = Self;
    fn div(self, divisor: f64) -> Self {
        Self::from([self[0] / divisor, self[1] / divisor])
    }
}

impl Mul<f64> for V2D {
    type Output = Self;
    fn mul(self, coefficient: f64) -> Self {
        Self::from([self[0] * coefficient, self[1] * coefficient])
    }
}

/*
    | [dx/du, dx/dv] |
    | [dy/du, dy/dv] |
*/

#[derive(Clone, Copy, Debug)]
/// 2 by 2 Matrix. Used to represent transformations in/into Parametric space
pub struct M2D {
    pub u: V2D,
    pub v: V2D,
}

impl M2D {
    pub const fn from(r0: [f64; 2], r1: [f64; 2]) -> Self {
        Self {
            u: V2D::from(r0),
            v: V2D::from(r1),
        }
    }

    #[inline]
    pub fn det(&self) -> f64 {
        self.u[0] * self.v[1] - self.u[1] * self.v[0]
    }

    pub fn inverse(&self) -> Self {
        Self {
            u: V2D::from([self.v[1], -1.0 * self.u[1]]),
            v: V2D::from([-1.0 * self.v[0], self.u[0]]),
        } / self.det()
    }
}

impl Div<f64> for M2D {
    type Output = Self;
    fn div(self, divisor: f64) -> Self {
        Self {
            u: self.u / divisor,
            v: self.v / divisor,
        }
    }
}

impl Mul<V2D> for M2D {
    type Output = V2D;
    fn mul(self, v: V2D) -> V2D {
        V2D::from([self.u.dot_with(&v), self.v.dot_with(&v)])
    }
}

impl fmt::Display for M2D {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "u: [{:.5}, {:.5}]  v: [{:.5}, {:.5}]",
            self.u[0], self.u[1], self.v[0], self.v[1]
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Parametric Coordinate Directions
pub enum ParaDir {
    U,
    V,
}

impl From<ParaDir> for JsonValue {
    fn from(dir: ParaDir) -> Self {
        match dir {
            ParaDir::U => JsonValue::from("U-Dir"),
            ParaDir::V => JsonValue::from("V-Dir"),
        }
    }
}

const POINT_UNIQUENESS_ACCURACY: f64 = 1e-12;

#[derive(Clone, Copy, Debug)]
/// Point in 2D Space
pub struct Point {
    pub x: f64,
    pub y: f64,
    x_cmp: FloatRep,
    y_cmp: FloatRep,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            x_cmp: FloatRep::from(x),
            y_cmp: FloatRep::from(y),
        }
    }

    pub fn x_order(&self, other: &Self) -> Ordering {
        self.x_cmp.cmp(&other.x_cmp)
    }

    pub fn y_order(&self, other: &Self) -> Ordering {
        self.y_cmp.cmp(&other.y_cmp)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Div<f64> for Point {
    type Output = Self;

    fn div(self, divis: f64) -> Self {
        Self::new(self.x / divis, self.y / divis)
    }
}

impl Hash for Point {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x_cmp.hash(state);
        self.y_cmp.hash(state);
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.x_cmp.eq(&other.x_cmp) && self.y_cmp.eq(&other.y_cmp)
    }
}

impl Eq for Point {}

impl From<Point> for JsonValue {
    fn from(point: Point) -> Self {
        object! {
            "x": point.x,
            "y": point.y,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(x: {:.10}, y: {:.10})", self.x, self.y)
    }
}

/// Rounded representation of a coordinate. Coordinates closer than 1e-12 compare equal.
#[derive(Hash, PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) struct FloatRep {
    sign: bool,
    bits: u64,
}

impl FloatRep {
    pub fn from(value: f64) -> Self {
        let integer_part = value.abs().trunc();
        let fractional_rounded =
            (value.abs().fract() / POINT_UNIQUENESS_ACCURACY).round() * POINT_UNIQUENESS_ACCURACY;
        let total_rounded = integer_part + fractional_rounded;

        Self {
            // -0.0 and 0.0 share a representation
            sign: value.is_sign_positive() || total_rounded == 0.0,
            bits: total_rounded.to_bits(),
        }
    }
}

impl Ord for FloatRep {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.sign, other.sign) {
            (true, true) => self.bits.cmp(&other.bits),
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, false) => self.bits.cmp(&other.bits).reverse(),
        }
    }
}

impl PartialOrd for FloatRep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_rep_ordering() {
        let mut reps: Vec<FloatRep> = [0.5, -1.25, 3.0, -0.0, 0.0, -2.5e-3]
            .iter()
            .map(|v| FloatRep::from(*v))
            .collect();
        reps.sort();

        let expected: Vec<FloatRep> = [-1.25, -2.5e-3, 0.0, 0.0, 0.5, 3.0]
            .iter()
            .map(|v| FloatRep::from(*v))
            .collect();
        assert_eq!(reps, expected);
    }

    #[test]
    fn nearby_points_are_equal() {
        let a = Point::new(0.2, 0.6);
        let b = Point::new(0.1 + 0.1, 0.2 * 3.0);

        assert_eq!(a, b);
        assert_eq!(a.x_order(&b), Ordering::Equal);
        assert_ne!(a, Point::new(0.2, 0.6 + 1e-9));
    }

    #[test]
    fn diagonal_mapping_inverse() {
        let m = M2D::from([0.25, 0.0], [0.0, 0.5]);
        let mi = m.inverse();

        assert!((m.det() - 0.125).abs() < 1e-15);
        assert!((mi.u[0] - 4.0).abs() < 1e-15);
        assert!((mi.v[1] - 2.0).abs() < 1e-15);

        let w = mi * V2D::from([1.0, 1.0]);
        assert!((w.x() - 4.0).abs() < 1e-15 && (w.y() - 2.0).abs() < 1e-15);
    }
}
