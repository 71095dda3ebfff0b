//! The loss aggregator: composes the per-step training scalar from the
//! configured recipe's terms.

use tch::{Kind, Tensor};

use crate::config::{
    CurvatureNorm, EikonalNorm, EikonalSample, LossWeights, MorseLossConfig, Smoothing,
};
use crate::curvature::{
    dirichlet_energy, gaussian_curvature, hessian_energy, hessian_l1_energy, mean_curvature,
};
use crate::diff_ops::{gradient, hessian_of_gradient};
use crate::eikonal::{eikonal_loss, relax_eikonal_loss};
use crate::error::{LossError, Result};
use crate::schedule::DecaySchedule;

/// Sharpness of the inter term's indicator `exp(-100 |f|)`.
const INTER_SHARPNESS: f64 = 1e2;
/// Sharpness of the near-surface curvature weighting `exp(-10 |f|)`.
const CURVATURE_WEIGHT_SHARPNESS: f64 = 1e1;
/// Width of the min-surface kernel.
const MIN_SURF_TAU: f64 = 0.5;

/// Per-step network outputs, graph-linked to their originating points.
#[derive(Debug)]
pub struct FieldPrediction {
    /// Scalar field values at on-surface points. [batch, N]
    pub manifold_pred: Tensor,
    /// Scalar field values at domain points. [batch, M]
    pub nonmanifold_pred: Tensor,
    /// Scalar field values at near-surface points, when sampled. [batch, K]
    pub near_pred: Option<Tensor>,
    /// Per-sample latent regularizer, when the network learns multiple
    /// shapes. Its weighted term is always added when present.
    pub latent_reg: Option<Tensor>,
}

/// Scalar breakdown of every named sub-term, for logging and telemetry.
/// Terms not used by the active recipe stay zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct LossTerms {
    /// The weighted total.
    pub total: f64,
    /// Surface-fit term `mean |f|`.
    pub sdf: f64,
    /// Thin-band indicator term `mean exp(-100 |f|)`.
    pub inter: f64,
    /// Normal-alignment term.
    pub normals: f64,
    /// Eikonal term.
    pub eikonal: f64,
    /// Divergence slot. Inert: the divergence recipes sum a zero here.
    pub div: f64,
    /// Gaussian-curvature morse term.
    pub morse: f64,
    /// Dirichlet / Hessian smoothing energy.
    pub smooth: f64,
    /// Mean-curvature companion term.
    pub mean_curv: f64,
    /// Min-surface term.
    pub min_surf: f64,
    /// Latent regularization term.
    pub latent_reg: f64,
}

impl std::fmt::Display for LossTerms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={:.4} (sdf={:.4} inter={:.4} normals={:.4} eikonal={:.4} morse={:.4} \
             smooth={:.4} mean_curv={:.4} min_surf={:.4} latent={:.4})",
            self.total,
            self.sdf,
            self.inter,
            self.normals,
            self.eikonal,
            self.morse,
            self.smooth,
            self.mean_curv,
            self.min_surf,
            self.latent_reg,
        )
    }
}

/// Result of one loss evaluation.
#[derive(Debug)]
pub struct LossOutput {
    /// The weighted total, differentiable for back-propagation.
    pub loss: Tensor,
    /// Scalar breakdown for logging.
    pub terms: LossTerms,
    /// Gradient at the on-surface points, for downstream metrics.
    pub mnfld_grad: Tensor,
}

/// The configurable loss engine.
///
/// Construction validates the configuration and builds the annealing
/// schedule eagerly, so misconfiguration fails before any training work.
/// Evaluation is a pure function of its inputs: per-step weights come from
/// [`weights_for_step`](MorseLoss::weights_for_step) and are threaded in
/// explicitly rather than mutated in place.
pub struct MorseLoss {
    config: MorseLossConfig,
    schedule: Option<DecaySchedule>,
}

impl MorseLoss {
    /// Build the engine from a validated configuration.
    pub fn new(config: MorseLossConfig) -> Result<Self> {
        config.validate()?;
        let schedule = match config.decay {
            crate::config::DecayMode::None => None,
            mode => Some(DecaySchedule::from_flat(mode, &config.decay_params)?),
        };
        tracing::info!(
            kind = %config.kind,
            decay = %config.decay,
            curvature_norm = ?config.curvature_norm,
            bidirectional = config.bidirectional_curvature,
            "loss engine configured"
        );
        Ok(Self { config, schedule })
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &MorseLossConfig {
        &self.config
    }

    /// The eagerly built annealing schedule, when one is configured.
    pub fn schedule(&self) -> Option<&DecaySchedule> {
        self.schedule.as_ref()
    }

    /// Per-step weights: the base configuration with the annealed morse
    /// coefficient and the recipe's zeroing applied. Pure; nothing is
    /// mutated on the engine.
    pub fn weights_for_step(&self, current_step: usize, total_steps: usize) -> LossWeights {
        let mut w = self.config.weights;
        if let Some(schedule) = &self.schedule {
            w.morse = schedule.weight_at(current_step, total_steps);
        }
        self.config.kind.apply_zeroing(&mut w);
        w
    }

    /// Evaluate the loss for one training step.
    ///
    /// Inputs:
    /// - pred: network outputs, graph-linked to the point tensors
    /// - mnfld_points: on-surface points [batch, N, d] with `requires_grad`
    /// - nonmnfld_points: domain points [batch, M, d] with `requires_grad`
    /// - near_points: optional near-surface points [batch, K, d]
    /// - mnfld_normals: optional ground-truth normals [batch, N, d]
    /// - weights: per-step weights from `weights_for_step`
    pub fn evaluate(
        &self,
        pred: &FieldPrediction,
        mnfld_points: &Tensor,
        nonmnfld_points: &Tensor,
        near_points: Option<&Tensor>,
        mnfld_normals: Option<&Tensor>,
        weights: &LossWeights,
    ) -> Result<LossOutput> {
        check_pair(mnfld_points, &pred.manifold_pred, "manifold")?;
        check_pair(nonmnfld_points, &pred.nonmanifold_pred, "non-manifold")?;
        if let (Some(p), Some(f)) = (near_points, pred.near_pred.as_ref()) {
            check_pair(p, f, "near-surface")?;
        }

        let kind = self.config.kind;

        let mnfld_grad = gradient(mnfld_points, &pred.manifold_pred)?;
        let nonmnfld_grad = gradient(nonmnfld_points, &pred.nonmanifold_pred)?;

        // Curvature terms sample the near-surface points when supplied and
        // fall back to the domain points otherwise.
        let (site_points, site_pred) = match (near_points, pred.near_pred.as_ref()) {
            (Some(p), Some(f)) => (p, f),
            _ => (nonmnfld_points, &pred.nonmanifold_pred),
        };

        let needs_site_grad = kind.needs_hessian()
            || (kind.uses_eikonal()
                && self.config.eikonal_sample == EikonalSample::NearSurfaceAndManifold);

        let mut site_grad = None;
        let mut site_hessian = None;
        let mut mnfld_hessian = None;
        if needs_site_grad {
            let g = gradient(site_points, site_pred)?;
            if kind.needs_hessian() {
                site_hessian = Some(hessian_of_gradient(site_points, &g)?);
                mnfld_hessian = Some(hessian_of_gradient(mnfld_points, &mnfld_grad)?);
            }
            site_grad = Some(g);
        }

        let sdf_term = pred.manifold_pred.abs().mean(None::<Kind>);
        let inter_term = kind.uses_inter().then(|| {
            (pred.nonmanifold_pred.abs() * -INTER_SHARPNESS)
                .exp()
                .mean(None::<Kind>)
        });

        let morse_term = match (&site_grad, &site_hessian, &mnfld_hessian) {
            (Some(g), Some(hs), Some(hm)) if kind.uses_morse() => {
                Some(self.morse_term(g, hs, &mnfld_grad, hm, site_pred))
            }
            _ => None,
        };

        let mean_curv_term = match (&site_grad, &site_hessian) {
            (Some(g), Some(h)) if kind.uses_mean_curvature() => Some(mean_curvature(h, g)),
            _ => None,
        };

        let smooth_term = match (kind.smoothing(), &site_hessian, &mnfld_hessian) {
            (Some(Smoothing::Dirichlet), _, _) => {
                Some(dirichlet_energy(&nonmnfld_grad, &mnfld_grad))
            }
            (Some(Smoothing::Hessian), Some(hs), Some(hm)) => Some(hessian_energy(hs, hm)),
            (Some(Smoothing::HessianL1), Some(hs), Some(hm)) => Some(hessian_l1_energy(hs, hm)),
            _ => None,
        };

        let eikonal_term = if kind.uses_eikonal() {
            let off_grad = match self.config.eikonal_sample {
                EikonalSample::DomainAndManifold => Some(&nonmnfld_grad),
                EikonalSample::NearSurfaceAndManifold => site_grad.as_ref(),
                EikonalSample::ManifoldOnly => None,
            };
            let term = if self.config.unsigned_field {
                relax_eikonal_loss(
                    off_grad,
                    Some(&mnfld_grad),
                    self.config.relax_min_norm,
                    self.config.relax_max_norm,
                    EikonalNorm::Abs,
                    true,
                )?
            } else {
                eikonal_loss(off_grad, Some(&mnfld_grad), EikonalNorm::Abs)?
            };
            Some(term)
        } else {
            None
        };

        let normal_term = if kind.uses_normals() {
            mnfld_normals.map(|normals| {
                if kind.igr_normal_form() {
                    let diff = (&mnfld_grad - normals).abs();
                    diff.pow_tensor_scalar(2)
                        .sum_dim_intlist([1i64].as_slice(), false, None::<Kind>)
                        .sqrt()
                        .mean(None::<Kind>)
                } else {
                    (1.0 - mnfld_grad.cosine_similarity(normals, -1, 1e-8).abs())
                        .mean(None::<Kind>)
                }
            })
        } else {
            None
        };

        let min_surf_term = if kind.uses_min_surface() {
            let near = pred.near_pred.as_ref().ok_or(LossError::MissingInput(
                "min-surface recipe requires near-surface predictions",
            ))?;
            let kernel = (near.square() + MIN_SURF_TAU * MIN_SURF_TAU).reciprocal()
                * (0.5 / std::f64::consts::PI);
            Some(kernel.mean(None::<Kind>))
        } else {
            None
        };

        let latent_term = pred.latent_reg.as_ref().map(|l| l.mean(None::<Kind>));

        // Weighted sum per the active recipe
        let mut loss = &sdf_term * weights.sdf;
        if let Some(t) = &inter_term {
            loss = loss + t * weights.inter;
        }
        if let Some(t) = &normal_term {
            loss = loss + t * weights.normal;
        }
        if let Some(t) = &eikonal_term {
            loss = loss + t * weights.eikonal;
        }
        if let Some(t) = &morse_term {
            loss = loss + t * kind.morse_weight(weights);
        }
        if let Some(t) = &smooth_term {
            loss = loss + t * weights.morse;
        }
        if let Some(t) = &mean_curv_term {
            loss = loss + t * weights.div;
        }
        if let Some(t) = &min_surf_term {
            loss = loss + t * weights.normal;
        }
        if let Some(t) = &latent_term {
            loss = loss + t * weights.latent;
        }

        let scalar = |t: &Option<Tensor>| t.as_ref().map_or(0.0, |t| t.double_value(&[]));
        let terms = LossTerms {
            total: loss.double_value(&[]),
            sdf: sdf_term.double_value(&[]),
            inter: scalar(&inter_term),
            normals: scalar(&normal_term),
            eikonal: scalar(&eikonal_term),
            div: 0.0,
            morse: scalar(&morse_term),
            smooth: scalar(&smooth_term),
            mean_curv: scalar(&mean_curv_term),
            min_surf: scalar(&min_surf_term),
            latent_reg: scalar(&latent_term),
        };
        tracing::debug!(%terms, kind = %kind, "loss evaluated");

        Ok(LossOutput {
            loss,
            terms,
            mnfld_grad,
        })
    }

    /// The Gaussian-curvature morse term over the curvature site, averaged
    /// against the on-surface side when bidirectional and halved otherwise.
    fn morse_term(
        &self,
        site_grad: &Tensor,
        site_hessian: &Tensor,
        mnfld_grad: &Tensor,
        mnfld_hessian: &Tensor,
        site_pred: &Tensor,
    ) -> Tensor {
        let site_weights = if self.config.weight_curvature_near_surface {
            Some((site_pred.abs() * -CURVATURE_WEIGHT_SHARPNESS).exp())
        } else {
            None
        };

        match self.config.curvature_norm {
            CurvatureNorm::L1 => {
                let off = gaussian_curvature(site_hessian, site_grad, site_weights.as_ref());
                if self.config.bidirectional_curvature {
                    (off + gaussian_curvature(mnfld_hessian, mnfld_grad, None)) * 0.5
                } else {
                    off * 0.5
                }
            }
            CurvatureNorm::L2 => {
                let off = site_hessian.det().square().mean(None::<Kind>);
                if self.config.bidirectional_curvature {
                    (off + mnfld_hessian.det().square().mean(None::<Kind>)) * 0.5
                } else {
                    off * 0.5
                }
            }
        }
    }
}

/// Points must be [batch, N, d] with d in {2, 3} and predictions [batch, N].
fn check_pair(points: &Tensor, preds: &Tensor, what: &'static str) -> Result<()> {
    let p = points.size();
    let f = preds.size();
    if p.len() != 3 || f.len() != 2 || p[0] != f[0] || p[1] != f[1] {
        return Err(LossError::ShapeMismatch {
            expected: format!("{what} points [batch, N, d] with predictions [batch, N]"),
            got: format!("points {p:?} with predictions {f:?}"),
        });
    }
    if p[2] != 2 && p[2] != 3 {
        return Err(LossError::ShapeMismatch {
            expected: format!("{what} points with d in {{2, 3}}"),
            got: format!("d = {}", p[2]),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecayMode, LossKind};

    #[test]
    fn test_weights_for_step_applies_schedule_then_zeroing() {
        let config = MorseLossConfig {
            kind: LossKind::SirenNoNormalsWithMorse,
            decay: DecayMode::Linear,
            decay_params: vec![100.0, 0.5, 100.0, 0.75, 0.0, 1.0, 0.0],
            ..Default::default()
        };
        let loss = MorseLoss::new(config).unwrap();

        let w = loss.weights_for_step(625, 1000);
        assert!((w.morse - 50.0).abs() < 1e-9);
        assert_eq!(w.normal, 0.0, "recipe zeroing must apply");
        assert_eq!(w.sdf, LossWeights::default().sdf);
    }

    #[test]
    fn test_weights_for_step_is_pure() {
        let loss = MorseLoss::new(MorseLossConfig::default()).unwrap();
        let a = loss.weights_for_step(10, 100);
        let b = loss.weights_for_step(10, 100);
        assert_eq!(a, b);
        // The engine's base configuration is untouched
        assert_eq!(loss.config().weights, LossWeights::default());
    }

    #[test]
    fn test_malformed_schedule_fails_at_construction() {
        let config = MorseLossConfig {
            decay: DecayMode::Linear,
            decay_params: vec![100.0],
            ..Default::default()
        };
        assert!(matches!(
            MorseLoss::new(config),
            Err(LossError::MalformedSchedule(_))
        ));
    }

    #[test]
    fn test_no_schedule_without_decay() {
        let loss = MorseLoss::new(MorseLossConfig::default()).unwrap();
        assert!(loss.schedule().is_none());
        let w = loss.weights_for_step(500, 1000);
        assert_eq!(w.morse, LossWeights::default().morse);
    }
}
