//! Curvature and smoothness measures built from field derivatives.
//!
//! The Gaussian-curvature term uses the bordered-Hessian determinant formula
//! for implicit surfaces: append the gradient as an extra column and row
//! (zero corner) to the Hessian and take `-det / (|grad|^2 + eps)`. The
//! squared norm in the denominator is contractual; curvature values are never
//! clamped, so near-flat gradients produce large but finite values.

use tch::{Kind, Tensor};

use crate::eikonal::NORM_EPS;

/// Per-point squared gradient 2-norm. [batch, N, d] -> [batch, N]
fn squared_grad_norm(grad: &Tensor) -> Tensor {
    grad.pow_tensor_scalar(2)
        .sum_dim_intlist([-1i64].as_slice(), false, None::<Kind>)
}

/// Bordered matrix: Hessian with the gradient appended as last column and
/// last row, zero corner. [batch, N, d, d] -> [batch, N, d+1, d+1]
fn bordered_hessian(hessian: &Tensor, grad: &Tensor) -> Tensor {
    let with_col = Tensor::cat(&[hessian, &grad.unsqueeze(-1)], -1);

    let size = grad.size();
    let corner = Tensor::zeros([size[0], size[1], 1, 1], (grad.kind(), grad.device()));
    let bottom_row = Tensor::cat(&[&grad.unsqueeze(-2), &corner], -1);

    Tensor::cat(&[&with_col, &bottom_row], -2)
}

/// Per-point Gaussian curvature approximation.
/// [batch, N, d, d] x [batch, N, d] -> [batch, N]
fn gaussian_curvature_values(hessian: &Tensor, grad: &Tensor) -> Tensor {
    let bordered = bordered_hessian(hessian, grad);
    bordered.det() * -1.0 / (squared_grad_norm(grad) + NORM_EPS)
}

/// Gaussian-curvature morse term: mean absolute curvature, optionally
/// weighted per point before reduction.
///
/// Inputs:
/// - hessian: [batch, N, d, d]
/// - grad: [batch, N, d]
/// - weights: optional [batch, N], typically `exp(-10 |f|)` to concentrate
///   the penalty near the zero level-set
///
/// Output: scalar
pub fn gaussian_curvature(hessian: &Tensor, grad: &Tensor, weights: Option<&Tensor>) -> Tensor {
    let curvature = gaussian_curvature_values(hessian, grad).abs();
    let curvature = match weights {
        Some(w) => w * curvature,
        None => curvature,
    };
    curvature.mean(None::<Kind>)
}

/// Relaxed Gaussian-curvature term: curvature below `max` goes unpenalized,
/// the excess is reduced as in [`gaussian_curvature`].
pub fn relax_gaussian_curvature(
    hessian: &Tensor,
    grad: &Tensor,
    weights: Option<&Tensor>,
    max: f64,
) -> Tensor {
    let excess = (gaussian_curvature_values(hessian, grad).abs() - max).relu();
    let excess = match weights {
        Some(w) => w * excess,
        None => excess,
    };
    excess.mean(None::<Kind>)
}

/// Mean-curvature term from the implicit-function formula
/// `(grad^T H grad - |grad|^2 tr H) / (2 |grad|^2 + eps)`, reduced by mean
/// absolute value.
///
/// Inputs: hessian [batch, N, d, d], grad [batch, N, d]. Output: scalar.
pub fn mean_curvature(hessian: &Tensor, grad: &Tensor) -> Tensor {
    let quadratic_form = grad
        .unsqueeze(-2)
        .matmul(hessian)
        .matmul(&grad.unsqueeze(-1))
        .squeeze_dim(-1)
        .squeeze_dim(-1);

    let trace = hessian
        .diagonal(0, -2, -1)
        .sum_dim_intlist([-1i64].as_slice(), false, None::<Kind>);
    let norm_sq = squared_grad_norm(grad);

    let km = (quadratic_form - &norm_sq * trace) / (norm_sq * 2.0 + NORM_EPS);
    km.abs().mean(None::<Kind>)
}

/// Dirichlet smoothing energy: mean per-point gradient 2-norm over both
/// point sets.
///
/// Inputs: gradients of shape [batch, N, d]. Output: scalar.
pub fn dirichlet_energy(nonmnfld_grad: &Tensor, mnfld_grad: &Tensor) -> Tensor {
    let all_grads = Tensor::cat(&[nonmnfld_grad, mnfld_grad], -2);
    let term = all_grads
        .pow_tensor_scalar(2)
        .sum_dim_intlist([-1i64].as_slice(), false, None::<Kind>)
        .sqrt()
        + NORM_EPS;
    term.abs().mean(None::<Kind>)
}

/// Hessian smoothing energy: mean per-point Frobenius norm over both point
/// sets.
///
/// Inputs: Hessians of shape [batch, N, d, d]. Output: scalar.
pub fn hessian_energy(nonmnfld_hessian: &Tensor, mnfld_hessian: &Tensor) -> Tensor {
    let all_hessians = Tensor::cat(&[nonmnfld_hessian, mnfld_hessian], -3);
    let term = all_hessians
        .pow_tensor_scalar(2)
        .sum_dim_intlist([-2i64, -1].as_slice(), false, None::<Kind>)
        .sqrt()
        + NORM_EPS;
    term.abs().mean(None::<Kind>)
}

/// Hessian smoothing energy with the entrywise 1-norm instead of Frobenius.
pub fn hessian_l1_energy(nonmnfld_hessian: &Tensor, mnfld_hessian: &Tensor) -> Tensor {
    let all_hessians = Tensor::cat(&[nonmnfld_hessian, mnfld_hessian], -3);
    let term = all_hessians
        .abs()
        .sum_dim_intlist([-2i64, -1].as_slice(), false, None::<Kind>)
        + NORM_EPS;
    term.abs().mean(None::<Kind>)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identity Hessians [1, n, 3, 3] and the given gradients [1, n, 3].
    fn identity_hessians(n: i64, device: tch::Device) -> Tensor {
        Tensor::eye(3, (Kind::Float, device)).view([1, 1, 3, 3]).repeat([1, n, 1, 1])
    }

    fn grads(rows: &[[f32; 3]]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_slice(&flat).view([1, rows.len() as i64, 3])
    }

    #[test]
    fn test_bordered_determinant_identity_hessian() {
        // H = I, g arbitrary: det of the bordered matrix is -|g|^2, so the
        // curvature value is |g|^2 / (|g|^2 + eps) = 1.
        let g = grads(&[[1.0, 2.0, 3.0], [0.5, 0.0, -1.0]]);
        let h = identity_hessians(2, g.device());

        let term = gaussian_curvature(&h, &g, None).double_value(&[]);
        assert!((term - 1.0).abs() < 1e-5, "got {term}");
    }

    #[test]
    fn test_gaussian_curvature_weights_scale_term() {
        let g = grads(&[[1.0, 0.0, 0.0]]);
        let h = identity_hessians(1, g.device());
        let w = Tensor::from_slice(&[0.25f32]).view([1, 1]);

        let unweighted = gaussian_curvature(&h, &g, None).double_value(&[]);
        let weighted = gaussian_curvature(&h, &g, Some(&w)).double_value(&[]);
        assert!((weighted - 0.25 * unweighted).abs() < 1e-6);
    }

    #[test]
    fn test_relaxed_term_ignores_curvature_below_threshold() {
        let g = grads(&[[1.0, 0.0, 0.0]]);
        let h = identity_hessians(1, g.device());

        // |K| = 1 here, so a threshold above 1 silences the term
        let silent = relax_gaussian_curvature(&h, &g, None, 1.5).double_value(&[]);
        let active = relax_gaussian_curvature(&h, &g, None, 0.25).double_value(&[]);
        assert!(silent.abs() < 1e-6);
        assert!((active - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_mean_curvature_identity_hessian() {
        // g^T H g = |g|^2 and tr H = 3, so KM = (|g|^2 - 3 |g|^2) / (2 |g|^2) = -1.
        let g = grads(&[[0.0, 2.0, 0.0]]);
        let h = identity_hessians(1, g.device());

        let km = mean_curvature(&h, &g).double_value(&[]);
        assert!((km - 1.0).abs() < 1e-5, "got {km}");
    }

    #[test]
    fn test_dirichlet_energy_of_unit_gradients() {
        let off = grads(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let on = grads(&[[0.0, 0.0, 1.0]]);
        let e = dirichlet_energy(&off, &on).double_value(&[]);
        assert!((e - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_hessian_energies() {
        let h_off = identity_hessians(2, tch::Device::Cpu);
        let h_on = identity_hessians(1, tch::Device::Cpu);

        // Frobenius norm of I3 is sqrt(3), entrywise 1-norm is 3
        let frob = hessian_energy(&h_off, &h_on).double_value(&[]);
        let l1 = hessian_l1_energy(&h_off, &h_on).double_value(&[]);
        assert!((frob - 3.0f64.sqrt()).abs() < 1e-5, "got {frob}");
        assert!((l1 - 3.0).abs() < 1e-5, "got {l1}");
    }
}
