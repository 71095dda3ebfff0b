//! Eikonal regularizers: penalize gradient norms away from 1.

use tch::{Kind, Tensor};

use crate::config::EikonalNorm;
use crate::error::{LossError, Result};

/// Fixed damping added to norm-derived quantities before comparisons and
/// divisions. Part of the contract, not tunable per call.
pub(crate) const NORM_EPS: f64 = 1e-12;

/// Per-point gradient 2-norms of the supplied sets, concatenated along the
/// point axis. At least one set must be present.
fn stacked_norms(
    nonmnfld_grad: Option<&Tensor>,
    mnfld_grad: Option<&Tensor>,
) -> Result<Tensor> {
    let all_grads = match (nonmnfld_grad, mnfld_grad) {
        (Some(off), Some(on)) => Tensor::cat(&[off, on], -2),
        (Some(off), None) => off.shallow_clone(),
        (None, Some(on)) => on.shallow_clone(),
        (None, None) => {
            return Err(LossError::MissingInput(
                "eikonal loss needs at least one gradient set",
            ))
        }
    };
    Ok(all_grads
        .pow_tensor_scalar(2)
        .sum_dim_intlist([-1i64].as_slice(), false, None::<Kind>)
        .sqrt())
}

/// Eikonal loss over the supplied gradient sets.
///
/// Inputs: gradients of shape [batch, N, d]; either set may be omitted but
/// not both. Output: scalar, the mean absolute (or squared) deviation of the
/// per-point norm from 1.
pub fn eikonal_loss(
    nonmnfld_grad: Option<&Tensor>,
    mnfld_grad: Option<&Tensor>,
    norm: EikonalNorm,
) -> Result<Tensor> {
    let deviation = stacked_norms(nonmnfld_grad, mnfld_grad)? - 1.0;
    let term = match norm {
        EikonalNorm::Abs => deviation.abs(),
        EikonalNorm::Square => deviation.square(),
    };
    Ok(term.mean(None::<Kind>))
}

/// Relaxed Eikonal loss penalizing only a one-sided violation.
///
/// Signed fields rectify `min − ‖∇f‖` (norms are allowed to exceed `min`);
/// unsigned-distance fields rectify `‖∇f‖ − max` instead. The damped norm
/// (`+ 1e-12`) enters the rectification, so exactly-zero gradients still
/// register as violations of the signed bound.
pub fn relax_eikonal_loss(
    nonmnfld_grad: Option<&Tensor>,
    mnfld_grad: Option<&Tensor>,
    min: f64,
    max: f64,
    norm: EikonalNorm,
    unsigned_field: bool,
) -> Result<Tensor> {
    let grad_norm = stacked_norms(nonmnfld_grad, mnfld_grad)? + NORM_EPS;
    let violation = if unsigned_field {
        (grad_norm - max).relu()
    } else {
        (grad_norm * -1.0 + min).relu()
    };
    let term = match norm {
        EikonalNorm::Abs => violation.abs(),
        EikonalNorm::Square => violation.square(),
    };
    Ok(term.mean(None::<Kind>))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grads(rows: &[[f32; 3]]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_slice(&flat).view([1, rows.len() as i64, 3])
    }

    #[test]
    fn test_unit_norms_give_zero() {
        let g = grads(&[[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.6, 0.8, 0.0]]);
        for norm in [EikonalNorm::Abs, EikonalNorm::Square] {
            let loss = eikonal_loss(Some(&g), None, norm).unwrap();
            let v = loss.double_value(&[]);
            assert!(v.abs() < 1e-6, "expected zero, got {v}");
        }
    }

    #[test]
    fn test_nonunit_norms_penalized() {
        let g = grads(&[[2.0, 0.0, 0.0]]);
        let abs = eikonal_loss(Some(&g), None, EikonalNorm::Abs)
            .unwrap()
            .double_value(&[]);
        let sq = eikonal_loss(Some(&g), None, EikonalNorm::Square)
            .unwrap()
            .double_value(&[]);
        assert!((abs - 1.0).abs() < 1e-6);
        assert!((sq - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_both_sets_concatenated() {
        let off = grads(&[[3.0, 0.0, 0.0]]);
        let on = grads(&[[1.0, 0.0, 0.0]]);
        let v = eikonal_loss(Some(&off), Some(&on), EikonalNorm::Abs)
            .unwrap()
            .double_value(&[]);
        // mean(|3 - 1|, |1 - 1|) = 1
        assert!((v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_gradients_is_contract_violation() {
        let err = eikonal_loss(None, None, EikonalNorm::Abs).unwrap_err();
        assert!(matches!(err, LossError::MissingInput(_)));
    }

    #[test]
    fn test_relax_zero_inside_band() {
        let g = grads(&[[0.9, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let signed = relax_eikonal_loss(Some(&g), None, 0.8, 1.2, EikonalNorm::Abs, false)
            .unwrap()
            .double_value(&[]);
        let unsigned = relax_eikonal_loss(Some(&g), None, 0.8, 1.2, EikonalNorm::Abs, true)
            .unwrap()
            .double_value(&[]);
        assert!(signed.abs() < 1e-6, "signed violation inside band: {signed}");
        assert!(unsigned.abs() < 1e-6, "unsigned violation inside band: {unsigned}");
    }

    #[test]
    fn test_relax_one_sided() {
        let small = grads(&[[0.5, 0.0, 0.0]]);
        let large = grads(&[[2.0, 0.0, 0.0]]);

        // Signed fields penalize only the lower bound
        let below = relax_eikonal_loss(Some(&small), None, 0.8, 1.2, EikonalNorm::Abs, false)
            .unwrap()
            .double_value(&[]);
        let above = relax_eikonal_loss(Some(&large), None, 0.8, 1.2, EikonalNorm::Abs, false)
            .unwrap()
            .double_value(&[]);
        assert!((below - 0.3).abs() < 1e-6);
        assert!(above.abs() < 1e-6);

        // Unsigned fields penalize only the upper bound
        let below = relax_eikonal_loss(Some(&small), None, 0.8, 1.2, EikonalNorm::Abs, true)
            .unwrap()
            .double_value(&[]);
        let above = relax_eikonal_loss(Some(&large), None, 0.8, 1.2, EikonalNorm::Abs, true)
            .unwrap()
            .double_value(&[]);
        assert!(below.abs() < 1e-6);
        assert!((above - 0.8).abs() < 1e-6);
    }
}
