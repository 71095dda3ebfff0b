//! Gradient and Hessian extraction through reverse-mode autodiff.
//!
//! Derivatives are taken with respect to the input points, not the network
//! parameters, so the caller must keep the points attached to the forward
//! graph (`requires_grad` set before the forward pass). Every pass keeps and
//! creates the graph, which makes the returned tensors differentiable again;
//! the Hessian relies on this by differentiating the gradient once per
//! coordinate.

use tch::{Kind, Tensor};

use crate::error::{LossError, Result};

/// Spatial gradient of a scalar-per-point prediction.
///
/// Inputs:
/// - points: [batch, N, d] with `requires_grad`
/// - preds: [batch, N] scalar field values, graph-linked to `points`
///
/// Output: [batch, N, d]
///
/// The backward pass is seeded with ones (one unit seed per output scalar),
/// and both `keep_graph` and `create_graph` are set so repeated calls against
/// the same prediction and further differentiation of the result are valid.
pub fn gradient(points: &Tensor, preds: &Tensor) -> Result<Tensor> {
    if !points.requires_grad() {
        return Err(LossError::InvalidComputationGraph(
            "points do not require grad; call set_requires_grad(true) before the forward pass"
                .to_string(),
        ));
    }
    if !preds.requires_grad() {
        return Err(LossError::InvalidComputationGraph(
            "predictions are detached from the computation graph".to_string(),
        ));
    }

    // Summing applies the unit per-output seed in a single backward pass.
    let seed = preds.sum(None::<Kind>);
    let mut grads = Tensor::f_run_backward(&[&seed], &[points], true, true)
        .map_err(|e| LossError::InvalidComputationGraph(e.to_string()))?;
    Ok(grads.remove(0))
}

/// Hessian assembled from an already computed gradient.
///
/// Inputs:
/// - points: [batch, N, d] with `requires_grad`
/// - grad: [batch, N, d] as returned by [`gradient`]
///
/// Output: [batch, N, d, d] with `H[.., i, j] = d(grad_j)/d(x_i)`
///
/// One independent differentiation pass per gradient coordinate, stacked on
/// the last axis. Symmetric in exact arithmetic; numerical asymmetry is
/// tolerated, never corrected.
pub fn hessian_of_gradient(points: &Tensor, grad: &Tensor) -> Result<Tensor> {
    let dims = *grad
        .size()
        .last()
        .ok_or_else(|| LossError::InvalidComputationGraph("gradient tensor has no dims".to_string()))?;

    let mut columns = Vec::with_capacity(dims as usize);
    for j in 0..dims {
        let coord = grad.select(-1, j);
        columns.push(gradient(points, &coord)?);
    }
    Ok(Tensor::stack(&columns, -1))
}

/// Gradient and Hessian of a scalar-per-point prediction in one call.
///
/// Output: `([batch, N, d], [batch, N, d, d])`
pub fn hessian(points: &Tensor, preds: &Tensor) -> Result<(Tensor, Tensor)> {
    let grad = gradient(points, preds)?;
    let hess = hessian_of_gradient(points, &grad)?;
    Ok((grad, hess))
}
