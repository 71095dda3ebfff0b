//! Differentiable geometric loss engine for implicit neural surface
//! reconstruction.
//!
//! The engine turns raw network outputs over an unoriented point cloud into
//! a scalar training signal with three goals: fit the zero level-set to the
//! sampled surface, keep the field's gradient unit-norm off the surface
//! (Eikonal regularization), and penalize differential-geometric
//! irregularity (Gaussian / mean curvature, Hessian smoothness) so the
//! reconstructed surface stays developable where possible.
//!
//! First- and second-order spatial derivatives are taken through LibTorch
//! reverse-mode autodiff with a retained graph, so the loss itself remains
//! differentiable for back-propagation. The network forward pass, the
//! optimizer loop, and point-cloud I/O are external collaborators; the
//! engine consumes graph-linked point and prediction tensors and returns a
//! scalar loss, a per-term breakdown, and the on-surface gradient.

pub mod config;
pub mod curvature;
pub mod diff_ops;
pub mod eikonal;
pub mod error;
pub mod morse;
pub mod schedule;

pub use config::{
    CurvatureNorm, DecayMode, EikonalNorm, EikonalSample, LossKind, LossWeights, MorseLossConfig,
    Smoothing,
};
pub use diff_ops::{gradient, hessian, hessian_of_gradient};
pub use error::{LossError, Result};
pub use morse::{FieldPrediction, LossOutput, LossTerms, MorseLoss};
pub use schedule::DecaySchedule;
