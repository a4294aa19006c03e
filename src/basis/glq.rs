use nalgebra::{DMatrix, SymmetricEigen};

/// A set of Gauss-Legendre quadrature points and weights defined over (-1.0, +1.0)
#[derive(Clone, Debug)]
pub struct GaussRule {
    pub points: Vec<f64>,
    pub weights: Vec<f64>,
}

impl GaussRule {
    pub fn new(n: usize) -> Self {
        let (points, weights) = gauss_quadrature_points(n);
        Self { points, weights }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points mapped onto (min, max) along with the scaling factor applied to the weights
    pub fn scaled(&self, min: f64, max: f64) -> (f64, Vec<f64>) {
        scale_gauss_quad_points(&self.points, min, max)
    }
}

/// Gauss-Legendre rules for every point count up to some maximum, computed once and shared
#[derive(Clone, Debug)]
pub struct GaussRules {
    rules: Vec<GaussRule>,
}

impl GaussRules {
    /// Compute rules with 1 to `max_points` points
    pub fn up_to(max_points: usize) -> Self {
        Self {
            rules: (1..=max_points.max(1)).map(GaussRule::new).collect(),
        }
    }

    /// The rule with `n` points (clamped to the largest available rule)
    pub fn get(&self, n: usize) -> &GaussRule {
        let idx = n.clamp(1, self.rules.len()) - 1;
        &self.rules[idx]
    }

    /// The rule which exactly integrates polynomials of degree `order`
    pub fn for_order(&self, order: usize) -> &GaussRule {
        self.get(points_for_order(order))
    }
}

/// Number of points needed to exactly integrate a polynomial of degree `order` (2n - 1 >= order)
pub fn points_for_order(order: usize) -> usize {
    order / 2 + 1
}

// https://en.wikipedia.org/wiki/Gaussian_quadrature#Gauss%E2%80%93Legendre_quadrature
// https://www.mathworks.com/matlabcentral/mlc-downloads/downloads/submissions/23972/versions/22/previews/chebfun/examples/quad/html/GaussQuad.html
pub fn gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    let betas: Vec<f64> = (1..n)
        .map(|i| 0.5 / (1.0 - (2.0 * i as f64).powi(-2)).sqrt())
        .collect();

    let polymat: DMatrix<f64> = DMatrix::from_fn(n, n, |r, c| {
        if r == c + 1 {
            betas[r - 1]
        } else if c == r + 1 {
            betas[c - 1]
        } else {
            0.0
        }
    });

    let eigen_decomp = SymmetricEigen::new(polymat);

    let mut xw: Vec<(f64, f64)> = eigen_decomp
        .eigenvalues
        .iter()
        .cloned()
        .zip(
            eigen_decomp
                .eigenvectors
                .row(0)
                .iter()
                .map(|weight| (*weight).powi(2) * 2.0),
        )
        .collect();

    xw.sort_by(|a, b| a.0.total_cmp(&b.0));

    xw.into_iter().unzip()
}

pub fn scale_gauss_quad_points(points: &[f64], min: f64, max: f64) -> (f64, Vec<f64>) {
    let scale_factor = (max - min) / 2.0;
    let offset = (max + min) / 2.0;

    (
        scale_factor,
        points
            .iter()
            .map(|x| x * scale_factor + offset)
            .collect::<Vec<f64>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLQ_ACCURACY: f64 = 1e-9;

    const X_20: [f64; 20] = [
        -0.993128599,
        -0.963971927,
        -0.912234428,
        -0.839116972,
        -0.746331906,
        -0.636053681,
        -0.510867002,
        -0.373706089,
        -0.227785851,
        -0.076526521,
        0.076526521,
        0.227785851,
        0.373706089,
        0.510867002,
        0.636053681,
        0.746331906,
        0.839116972,
        0.912234428,
        0.963971927,
        0.993128599,
    ];
    const W_20: [f64; 20] = [
        0.017614007,
        0.04060143,
        0.062672048,
        0.083276742,
        0.10193012,
        0.118194532,
        0.131688638,
        0.142096109,
        0.149172986,
        0.152753387,
        0.152753387,
        0.149172986,
        0.142096109,
        0.131688638,
        0.118194532,
        0.10193012,
        0.083276742,
        0.062672048,
        0.04060143,
        0.017614007,
    ];

    #[test]
    fn glq_point_generation_and_scaling() {
        let (glq_points, glq_weights) = gauss_quadrature_points(20);

        for (glq_ref, glq_test) in X_20.iter().zip(glq_points.iter()) {
            assert!((glq_ref - glq_test).abs() < GLQ_ACCURACY);
        }

        for (glq_w_ref, glq_w_test) in W_20.iter().zip(glq_weights.iter()) {
            assert!((glq_w_ref - glq_w_test).abs() < GLQ_ACCURACY);
        }

        let (glq_scale, glq_scaled_points) = scale_gauss_quad_points(&glq_points, 0.25, 0.5);

        assert!((glq_scale - 0.125).abs() < 1e-14);
        for (glq_ref, glq_s_test) in X_20.iter().zip(glq_scaled_points.iter()) {
            assert!((glq_ref * 0.125 + 0.375 - glq_s_test).abs() < GLQ_ACCURACY);
        }
    }

    #[test]
    fn single_point_rule() {
        let rule = GaussRule::new(1);
        assert_eq!(rule.len(), 1);
        assert!(rule.points[0].abs() < 1e-15);
        assert!((rule.weights[0] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn rules_integrate_polynomials_exactly() {
        let rules = GaussRules::up_to(8);

        for order in 0..=14 {
            let rule = rules.for_order(order);
            let integral: f64 = rule
                .points
                .iter()
                .zip(rule.weights.iter())
                .map(|(x, w)| w * x.powi(order as i32))
                .sum();
            let exact = if order % 2 == 0 {
                2.0 / (order as f64 + 1.0)
            } else {
                0.0
            };
            assert!((integral - exact).abs() < 1e-13, "order {}", order);
        }

        assert_eq!(rules.get(40).len(), 8);
    }
}
