use super::ShapeFn;

/// Monomial based Hierarchical Shape Functions
///
/// * `power(n)`: x^n
/// * `poly(0)` and `poly(1)`: 1 - x and 1 + x
/// * `poly(n)` for n >= 2: x^n - 1 (even n) or x^n - x (odd n)
///
/// Simple to evaluate, but the projection systems they produce become poorly conditioned above order 4 or so.
#[derive(Clone, Debug)]
pub struct KOLShapeFn {
    pows: Vec<Vec<f64>>,
    polys: Vec<Vec<f64>>,
}

impl ShapeFn for KOLShapeFn {
    fn with(n_max: usize, points: &[f64]) -> Self {
        let mut pows: Vec<Vec<f64>> = Vec::with_capacity(n_max + 1);
        let mut polys: Vec<Vec<f64>> = Vec::with_capacity(n_max + 1);

        let num_points = points.len();

        for n in 0..=n_max {
            match n {
                0 => {
                    polys.push(points.iter().map(|x| 1.0 - x).collect());
                    pows.push(vec![1.0; num_points]);
                }
                1 => {
                    polys.push(points.iter().map(|x| 1.0 + x).collect());
                    pows.push(points.to_vec());
                }
                _ => {
                    pows.push(
                        pows[n - 1]
                            .iter()
                            .zip(points.iter())
                            .map(|(pow_prev, x)| pow_prev * x)
                            .collect(),
                    );

                    if n % 2 == 0 {
                        polys.push(pows[n].iter().map(|pow| pow - 1.0).collect());
                    } else {
                        polys.push(
                            pows[n]
                                .iter()
                                .zip(points.iter())
                                .map(|(pow, x)| pow - x)
                                .collect(),
                        );
                    }
                }
            }
        }

        Self { pows, polys }
    }

    fn power(&self, n: usize, p: usize) -> f64 {
        self.pows[n][p]
    }

    fn poly(&self, n: usize, p: usize) -> f64 {
        self.polys[n][p]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kol_values() {
        let points = [-1.0, 0.5, 1.0];
        let sf = KOLShapeFn::with(3, &points);

        assert!((sf.power(3, 1) - 0.125).abs() < 1e-15);
        assert!((sf.poly(0, 1) - 0.5).abs() < 1e-15);
        assert!((sf.poly(1, 1) - 1.5).abs() < 1e-15);
        assert!((sf.poly(2, 1) + 0.75).abs() < 1e-15);
        assert!((sf.poly(3, 1) + 0.375).abs() < 1e-15);

        for n in 2..=3 {
            assert!(sf.poly(n, 0).abs() < 1e-15);
            assert!(sf.poly(n, 2).abs() < 1e-15);
        }
    }
}
