use super::ShapeFn;

/// Hierarchical Shape Functions built from Legendre Polynomials.
///
/// * `power(n)`: the Legendre Polynomial of order n
/// * `poly(0)` and `poly(1)`: the linear functions (1 - x) / 2 and (1 + x) / 2
/// * `poly(n)` for n >= 2: the integrated Legendre (Lobatto) bubble (L_n - L_{n-2}) / sqrt(2(2n - 1)), which vanishes at +/- 1
///
/// The bubbles are mutually orthogonal in H1-seminorm, which keeps projection systems well conditioned at high orders.
#[derive(Clone, Debug)]
pub struct LobattoShapeFn {
    legendre: Vec<Vec<f64>>,
    lobatto: Vec<Vec<f64>>,
}

impl LobattoShapeFn {
    fn legendre_table(n_max: usize, points: &[f64]) -> Vec<Vec<f64>> {
        let mut legendre: Vec<Vec<f64>> = Vec::with_capacity(n_max + 1);

        for n in 0..=n_max {
            let row = match n {
                0 => vec![1.0; points.len()],
                1 => points.to_vec(),
                _ => {
                    let n_ = (n - 1) as f64;
                    points
                        .iter()
                        .enumerate()
                        .map(|(p, x)| {
                            ((2.0 * n_ + 1.0) * x * legendre[n - 1][p] - n_ * legendre[n - 2][p])
                                / (n_ + 1.0)
                        })
                        .collect()
                }
            };
            legendre.push(row);
        }

        legendre
    }
}

impl ShapeFn for LobattoShapeFn {
    fn with(n_max: usize, points: &[f64]) -> Self {
        let legendre = Self::legendre_table(n_max.max(1), points);

        let lobatto = (0..=n_max)
            .map(|n| match n {
                0 => points.iter().map(|x| (1.0 - x) / 2.0).collect(),
                1 => points.iter().map(|x| (1.0 + x) / 2.0).collect(),
                _ => {
                    let norm = (2.0 * (2.0 * n as f64 - 1.0)).sqrt();
                    legendre[n]
                        .iter()
                        .zip(legendre[n - 2].iter())
                        .map(|(l_n, l_n2)| (l_n - l_n2) / norm)
                        .collect()
                }
            })
            .collect();

        Self { legendre, lobatto }
    }

    fn power(&self, n: usize, p: usize) -> f64 {
        self.legendre[n][p]
    }

    fn poly(&self, n: usize, p: usize) -> f64 {
        self.lobatto[n][p]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legendre_values() {
        let points = [-1.0, -0.5, 0.0, 0.5, 1.0];
        let sf = LobattoShapeFn::with(4, &points);

        // P_2(0.5) = -0.125, P_3(0.5) = -0.4375, P_4(0.5) = -0.2890625
        assert!((sf.power(2, 3) + 0.125).abs() < 1e-15);
        assert!((sf.power(3, 3) + 0.4375).abs() < 1e-15);
        assert!((sf.power(4, 3) + 0.2890625).abs() < 1e-15);

        for n in 0..=4 {
            assert!((sf.power(n, 4) - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn bubbles_vanish_at_endpoints() {
        let points = [-1.0, 1.0];
        let sf = LobattoShapeFn::with(8, &points);

        assert!((sf.poly(0, 0) - 1.0).abs() < 1e-15);
        assert!(sf.poly(0, 1).abs() < 1e-15);
        assert!(sf.poly(1, 0).abs() < 1e-15);
        assert!((sf.poly(1, 1) - 1.0).abs() < 1e-15);

        for n in 2..=8 {
            assert!(sf.poly(n, 0).abs() < 1e-14);
            assert!(sf.poly(n, 1).abs() < 1e-14);
        }
    }

    #[test]
    fn first_bubble_is_scaled_parabola() {
        let points = [0.0, 0.5];
        let sf = LobattoShapeFn::with(2, &points);
        let norm = 6.0_f64.sqrt();

        // (P_2 - P_0) / sqrt(6) = 1.5 (x^2 - 1) / sqrt(6)
        assert!((sf.poly(2, 0) + 1.5 / norm).abs() < 1e-15);
        assert!((sf.poly(2, 1) - 1.5 * (0.25 - 1.0) / norm).abs() < 1e-15);
    }
}
