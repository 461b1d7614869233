//! Small dense linear algebra over `ndarray` for posterior covariances.
//!
//! Matrices here are the size of the context vector (or 2-3 for Bayesian
//! A/B), so plain Cholesky is enough and avoids a LAPACK dependency.

use bandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2};

/// Lower-triangular Cholesky factor `L` with `A = L·Lᵀ`.
pub fn cholesky(a: &Array2<f64>) -> BanditResult<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(BanditError::Numerical(format!(
            "Cholesky needs a square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return Err(BanditError::Numerical(
                        "matrix is not positive definite".to_string(),
                    ));
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// Solve `A·x = b` for symmetric positive definite `A`.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> BanditResult<Array1<f64>> {
    let l = cholesky(a)?;
    Ok(solve_factored(&l, b))
}

/// Inverse of a symmetric positive definite matrix.
pub fn invert_spd(a: &Array2<f64>) -> BanditResult<Array2<f64>> {
    let l = cholesky(a)?;
    let n = a.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[col] = 1.0;
        let x = solve_factored(&l, &e);
        inv.column_mut(col).assign(&x);
    }
    symmetrize(&mut inv);
    Ok(inv)
}

/// `xᵀ·M·x`.
pub fn quad_form(x: &Array1<f64>, m: &Array2<f64>) -> f64 {
    x.dot(&m.dot(x))
}

pub fn to_array2(rows: &[Vec<f64>]) -> BanditResult<Array2<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat)
        .map_err(|e| BanditError::Numerical(format!("ragged matrix: {e}")))
}

pub fn to_rows(m: &Array2<f64>) -> Vec<Vec<f64>> {
    m.rows().into_iter().map(|r| r.to_vec()).collect()
}

// Forward then backward substitution with the Cholesky factor.
fn solve_factored(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

fn symmetrize(m: &mut Array2<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
            m[[i, j]] = avg;
            m[[j, i]] = avg;
        }
    }
}
