use nalgebra::{DMatrix, DVector};

use crate::error::TrainingError;

#[derive(Debug, Clone, PartialEq)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub r_squared: f64,
    pub n_observations: usize,
}

/// Ordinary least squares through the SVD.  A rank deficient design gets
/// the minimum norm solution.  Needs more observations than features.
pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Result<OlsFit, TrainingError> {
    let n = x.len();
    let f = x.first().map_or(0, |row| row.len());
    if n <= f || f == 0 {
        return Err(TrainingError::NotEnoughData {
            observations: n,
            features: f,
        });
    }
    if y.len() != n || x.iter().any(|row| row.len() != f) {
        return Err(TrainingError::Solve(format!(
            "design matrix is ragged or has {} targets for {} rows",
            y.len(),
            n
        )));
    }

    let design = DMatrix::<f64>::from_fn(n, f, |i, j| x[i][j]);
    let target = DVector::<f64>::from_column_slice(y);
    let svd = design.clone().svd(true, true);
    let eps = svd.singular_values.max() * (n.max(f) as f64) * f64::EPSILON;
    let beta = svd
        .solve(&target, eps)
        .map_err(|e| TrainingError::Solve(e.to_string()))?;

    let fitted = &design * &beta;
    let mean = target.mean();
    let ss_res = (&target - &fitted).norm_squared();
    let ss_tot = target.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

    Ok(OlsFit {
        coefficients: beta.iter().copied().collect(),
        r_squared,
        n_observations: n,
    })
}

pub fn predict(coefficients: &[f64], x: &[f64]) -> f64 {
    coefficients.iter().zip(x).map(|(b, v)| b * v).sum()
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    #[test]
    fn exact_fit() -> Result<(), Box<dyn Error>> {
        // y = 2 + 3 x
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..6).map(|i| 2.0 + 3.0 * i as f64).collect();
        let ols = fit(&x, &y)?;
        assert!(close(ols.coefficients[0], 2.0));
        assert!(close(ols.coefficients[1], 3.0));
        assert!(close(ols.r_squared, 1.0));
        assert_eq!(ols.n_observations, 6);
        assert!(close(predict(&ols.coefficients, &[1.0, 10.0]), 32.0));
        Ok(())
    }

    #[test]
    fn rank_deficient_design() -> Result<(), Box<dyn Error>> {
        // two identical columns, the weight is split between them
        let x = vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]];
        let y = vec![2.0, 4.0, 6.0];
        let ols = fit(&x, &y)?;
        assert!(close(ols.coefficients[0], 1.0));
        assert!(close(ols.coefficients[1], 1.0));
        Ok(())
    }

    #[test]
    fn not_enough_data() {
        let x = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert!(matches!(
            fit(&x, &[1.0, 2.0]),
            Err(TrainingError::NotEnoughData {
                observations: 2,
                features: 2
            })
        ));
        assert!(matches!(
            fit(&[], &[]),
            Err(TrainingError::NotEnoughData { .. })
        ));
    }
}
