//! Configuration for the loss engine: term weights, the closed set of loss
//! recipes, and the annealing / curvature knobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LossError;

/// The seven term coefficients, in their positional order
/// {sdf, inter, normal, eikonal, div, morse, latent}.
///
/// This is an immutable base configuration. Per-step values (annealed morse
/// weight, recipe zeroing) are derived from it as a pure function and passed
/// explicitly into each evaluation; nothing mutates the base in place.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    /// Surface-fit term weight (index 0).
    pub sdf: f64,
    /// Inter (thin near-zero band) term weight (index 1).
    pub inter: f64,
    /// Normal-alignment term weight (index 2).
    pub normal: f64,
    /// Eikonal term weight (index 3).
    pub eikonal: f64,
    /// Divergence / companion-curvature slot (index 4).
    pub div: f64,
    /// Morse (curvature or smoothing) term weight (index 5).
    pub morse: f64,
    /// Latent-regularization term weight (index 6).
    pub latent: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self::from_array([3e3, 1e2, 1e2, 5e1, 1e2, 1e1, 1e-3])
    }
}

impl LossWeights {
    /// Build from the positional 7-entry form.
    pub fn from_array(w: [f64; 7]) -> Self {
        Self {
            sdf: w[0],
            inter: w[1],
            normal: w[2],
            eikonal: w[3],
            div: w[4],
            morse: w[5],
            latent: w[6],
        }
    }

    /// The positional 7-entry form.
    pub fn to_array(&self) -> [f64; 7] {
        [
            self.sdf,
            self.inter,
            self.normal,
            self.eikonal,
            self.div,
            self.morse,
            self.latent,
        ]
    }
}

/// The closed set of loss recipes.
///
/// Each variant fixes which terms enter the weighted sum, which weight slot
/// each term reads, and which weight slots are zeroed as a side effect of
/// selecting the recipe. The serialized names are the recipe strings accepted
/// from job configs. Two positional quirks are intentional and load-bearing:
/// `SirenWithMorse` weighs its morse term with the `div` slot while every
/// other morse recipe uses the `morse` slot, and the annealing schedule
/// always drives the `morse` slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    /// `w.sdf·sdf + w.inter·inter + w.normal·normal + w.eikonal·eikonal`
    #[serde(rename = "siren")]
    Siren,
    /// `Siren + w.div·morse` (morse weighed by the div slot)
    #[serde(rename = "siren_w_morse")]
    SirenWithMorse,
    /// Zeroes `normal`; `w.sdf·sdf + w.inter·inter + w.eikonal·eikonal`
    #[serde(rename = "siren_wo_n")]
    SirenNoNormals,
    /// Zeroes `normal`; `SirenNoNormals + w.morse·morse`
    #[serde(rename = "siren_wo_n_w_morse")]
    SirenNoNormalsWithMorse,
    /// `w.sdf·sdf + w.inter·inter`
    #[serde(rename = "siren_wo_n_wo_e_wo_morse")]
    SirenNoNormalsNoEikonalNoMorse,
    /// Zeroes `inter`; `w.sdf·sdf + w.normal·normal + w.eikonal·eikonal`
    #[serde(rename = "igr")]
    Igr,
    /// Zeroes `inter`, `normal`; `w.sdf·sdf + w.eikonal·eikonal`
    #[serde(rename = "igr_wo_n")]
    IgrNoNormals,
    /// Zeroes `inter`, `normal`; `IgrNoNormals + w.morse·morse`
    #[serde(rename = "igr_wo_n_w_morse")]
    IgrNoNormalsWithMorse,
    /// `Siren + w.div·divergence` (divergence is inert, see `LossTerms::div`)
    #[serde(rename = "siren_w_div")]
    SirenWithDivergence,
    /// Zeroes `eikonal`, `div`;
    /// `w.sdf·sdf + w.inter·inter + w.normal·normal + w.morse·morse`
    #[serde(rename = "siren_wo_e_w_morse")]
    SirenNoEikonalWithMorse,
    /// Zeroes `normal`, `eikonal`, `div`;
    /// `w.sdf·sdf + w.inter·inter + w.morse·morse`
    #[serde(rename = "siren_wo_e_wo_n_w_morse")]
    SirenNoEikonalNoNormalsWithMorse,
    /// `w.sdf·sdf + w.inter·inter + w.eikonal·eikonal + w.div·divergence`
    #[serde(rename = "siren_wo_n_w_div")]
    SirenNoNormalsWithDivergence,
    /// Zeroes `normal`; `SirenNoNormals + w.morse·dirichlet_energy`
    #[serde(rename = "siren_wo_n_w_Dirichlet")]
    SirenNoNormalsDirichlet,
    /// Zeroes `normal`; `SirenNoNormals + w.morse·hessian_energy`
    #[serde(rename = "siren_wo_n_w_Hessian_no_morse")]
    SirenNoNormalsHessian,
    /// Zeroes `normal`; `SirenNoNormals + w.morse·hessian_l1_energy`
    #[serde(rename = "siren_wo_n_w_HessianL1_no_morse")]
    SirenNoNormalsHessianL1,
    /// Zeroes `normal`;
    /// `SirenNoNormals + w.morse·morse + w.div·mean_curvature`
    #[serde(rename = "siren_wo_n_w_morse_w_meanCurvature")]
    SirenNoNormalsMorseMeanCurvature,
    /// `SirenNoNormals + w.morse·morse + w.normal·min_surface`
    /// (min-surface weighed by the normal slot; requires near-surface
    /// predictions)
    #[serde(rename = "siren_wo_n_w_morse_w_minsurf")]
    SirenNoNormalsMorseMinSurf,
}

impl LossKind {
    /// The recipe string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::Siren => "siren",
            LossKind::SirenWithMorse => "siren_w_morse",
            LossKind::SirenNoNormals => "siren_wo_n",
            LossKind::SirenNoNormalsWithMorse => "siren_wo_n_w_morse",
            LossKind::SirenNoNormalsNoEikonalNoMorse => "siren_wo_n_wo_e_wo_morse",
            LossKind::Igr => "igr",
            LossKind::IgrNoNormals => "igr_wo_n",
            LossKind::IgrNoNormalsWithMorse => "igr_wo_n_w_morse",
            LossKind::SirenWithDivergence => "siren_w_div",
            LossKind::SirenNoEikonalWithMorse => "siren_wo_e_w_morse",
            LossKind::SirenNoEikonalNoNormalsWithMorse => "siren_wo_e_wo_n_w_morse",
            LossKind::SirenNoNormalsWithDivergence => "siren_wo_n_w_div",
            LossKind::SirenNoNormalsDirichlet => "siren_wo_n_w_Dirichlet",
            LossKind::SirenNoNormalsHessian => "siren_wo_n_w_Hessian_no_morse",
            LossKind::SirenNoNormalsHessianL1 => "siren_wo_n_w_HessianL1_no_morse",
            LossKind::SirenNoNormalsMorseMeanCurvature => "siren_wo_n_w_morse_w_meanCurvature",
            LossKind::SirenNoNormalsMorseMinSurf => "siren_wo_n_w_morse_w_minsurf",
        }
    }

    /// Zero the weight slots this recipe disables, in place.
    pub fn apply_zeroing(&self, w: &mut LossWeights) {
        match self {
            LossKind::SirenNoNormals
            | LossKind::SirenNoNormalsWithMorse
            | LossKind::SirenNoNormalsDirichlet
            | LossKind::SirenNoNormalsHessian
            | LossKind::SirenNoNormalsHessianL1
            | LossKind::SirenNoNormalsMorseMeanCurvature => {
                w.normal = 0.0;
            }
            LossKind::Igr => {
                w.inter = 0.0;
            }
            LossKind::IgrNoNormals | LossKind::IgrNoNormalsWithMorse => {
                w.inter = 0.0;
                w.normal = 0.0;
            }
            LossKind::SirenNoEikonalWithMorse => {
                w.eikonal = 0.0;
                w.div = 0.0;
            }
            LossKind::SirenNoEikonalNoNormalsWithMorse => {
                w.normal = 0.0;
                w.eikonal = 0.0;
                w.div = 0.0;
            }
            LossKind::Siren
            | LossKind::SirenWithMorse
            | LossKind::SirenNoNormalsNoEikonalNoMorse
            | LossKind::SirenWithDivergence
            | LossKind::SirenNoNormalsWithDivergence
            | LossKind::SirenNoNormalsMorseMinSurf => {}
        }
    }

    /// Whether the recipe's sum carries a normal-alignment term.
    pub fn uses_normals(&self) -> bool {
        matches!(
            self,
            LossKind::Siren
                | LossKind::SirenWithMorse
                | LossKind::Igr
                | LossKind::SirenWithDivergence
                | LossKind::SirenNoEikonalWithMorse
        )
    }

    /// Whether the recipe's sum carries the inter term. The IGR recipes omit
    /// it (and zero its weight slot as well).
    pub fn uses_inter(&self) -> bool {
        !matches!(
            self,
            LossKind::Igr | LossKind::IgrNoNormals | LossKind::IgrNoNormalsWithMorse
        )
    }

    /// The weight slot the morse term reads under this recipe.
    /// `SirenWithMorse` historically reads the `div` slot; every other morse
    /// recipe reads the `morse` slot (which is also the slot the annealing
    /// schedule drives).
    pub fn morse_weight(&self, w: &LossWeights) -> f64 {
        match self {
            LossKind::SirenWithMorse => w.div,
            _ => w.morse,
        }
    }

    /// Whether the recipe's sum carries an Eikonal term.
    pub fn uses_eikonal(&self) -> bool {
        !matches!(
            self,
            LossKind::SirenNoNormalsNoEikonalNoMorse
                | LossKind::SirenNoEikonalWithMorse
                | LossKind::SirenNoEikonalNoNormalsWithMorse
        )
    }

    /// Whether the recipe's sum carries the Gaussian-curvature morse term.
    pub fn uses_morse(&self) -> bool {
        matches!(
            self,
            LossKind::SirenWithMorse
                | LossKind::SirenNoNormalsWithMorse
                | LossKind::IgrNoNormalsWithMorse
                | LossKind::SirenNoEikonalWithMorse
                | LossKind::SirenNoEikonalNoNormalsWithMorse
                | LossKind::SirenNoNormalsMorseMeanCurvature
                | LossKind::SirenNoNormalsMorseMinSurf
        )
    }

    /// The smoothing energy this recipe carries instead of (or beside) the
    /// morse term, if any.
    pub fn smoothing(&self) -> Option<Smoothing> {
        match self {
            LossKind::SirenNoNormalsDirichlet => Some(Smoothing::Dirichlet),
            LossKind::SirenNoNormalsHessian => Some(Smoothing::Hessian),
            LossKind::SirenNoNormalsHessianL1 => Some(Smoothing::HessianL1),
            _ => None,
        }
    }

    /// Whether the recipe's sum carries the mean-curvature companion term.
    pub fn uses_mean_curvature(&self) -> bool {
        matches!(self, LossKind::SirenNoNormalsMorseMeanCurvature)
    }

    /// Whether the recipe's sum carries the min-surface term.
    pub fn uses_min_surface(&self) -> bool {
        matches!(self, LossKind::SirenNoNormalsMorseMinSurf)
    }

    /// Whether evaluation needs second derivatives at all.
    pub fn needs_hessian(&self) -> bool {
        self.uses_morse()
            || self.uses_mean_curvature()
            || matches!(
                self.smoothing(),
                Some(Smoothing::Hessian) | Some(Smoothing::HessianL1)
            )
    }

    /// Whether the normal term uses the IGR distance form rather than the
    /// cosine form.
    pub fn igr_normal_form(&self) -> bool {
        matches!(
            self,
            LossKind::Igr | LossKind::IgrNoNormals | LossKind::IgrNoNormalsWithMorse
        )
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossKind {
    type Err = LossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "siren" => Ok(LossKind::Siren),
            "siren_w_morse" => Ok(LossKind::SirenWithMorse),
            "siren_wo_n" => Ok(LossKind::SirenNoNormals),
            "siren_wo_n_w_morse" => Ok(LossKind::SirenNoNormalsWithMorse),
            "siren_wo_n_wo_e_wo_morse" => Ok(LossKind::SirenNoNormalsNoEikonalNoMorse),
            "igr" => Ok(LossKind::Igr),
            "igr_wo_n" => Ok(LossKind::IgrNoNormals),
            "igr_wo_n_w_morse" => Ok(LossKind::IgrNoNormalsWithMorse),
            "siren_w_div" => Ok(LossKind::SirenWithDivergence),
            "siren_wo_e_w_morse" => Ok(LossKind::SirenNoEikonalWithMorse),
            "siren_wo_e_wo_n_w_morse" => Ok(LossKind::SirenNoEikonalNoNormalsWithMorse),
            "siren_wo_n_w_div" => Ok(LossKind::SirenNoNormalsWithDivergence),
            "siren_wo_n_w_Dirichlet" => Ok(LossKind::SirenNoNormalsDirichlet),
            "siren_wo_n_w_Hessian_no_morse" => Ok(LossKind::SirenNoNormalsHessian),
            "siren_wo_n_w_HessianL1_no_morse" => Ok(LossKind::SirenNoNormalsHessianL1),
            "siren_wo_n_w_morse_w_meanCurvature" => Ok(LossKind::SirenNoNormalsMorseMeanCurvature),
            "siren_wo_n_w_morse_w_minsurf" => Ok(LossKind::SirenNoNormalsMorseMinSurf),
            other => Err(LossError::UnrecognizedConfiguration(other.to_string())),
        }
    }
}

/// Smoothing energies selectable by the `SirenNoNormals{Dirichlet,Hessian,
/// HessianL1}` recipes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Smoothing {
    /// Mean per-point gradient 2-norm.
    Dirichlet,
    /// Mean per-point Hessian Frobenius norm.
    Hessian,
    /// Mean per-point Hessian entrywise 1-norm.
    HessianL1,
}

/// Reduction applied to the norm-deviation term of the Eikonal family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EikonalNorm {
    /// Mean absolute deviation from 1.
    Abs,
    /// Mean squared deviation from 1.
    Square,
}

/// Which gradient sets feed the Eikonal term.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EikonalSample {
    /// Domain gradients concatenated with surface gradients.
    #[default]
    #[serde(rename = "domain")]
    DomainAndManifold,
    /// Curvature-site gradients (near-surface when supplied) concatenated
    /// with surface gradients.
    #[serde(rename = "near_surface")]
    NearSurfaceAndManifold,
    /// Surface gradients only.
    #[serde(rename = "manifold_only")]
    ManifoldOnly,
}

/// Reduction applied to the curvature morse term.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurvatureNorm {
    /// Mean absolute Gaussian curvature via the bordered-Hessian determinant.
    #[default]
    #[serde(rename = "l1")]
    L1,
    /// Mean squared Hessian determinant.
    #[serde(rename = "l2")]
    L2,
}

/// How the annealing schedule interpolates between control points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayMode {
    /// The schedule never modifies the coefficient.
    #[default]
    None,
    /// Linear interpolation between bracketing control points.
    Linear,
    /// Quintic ease-out: `w0 + (we − w0)·(1 − (1 − r)⁵)`.
    Quintic,
    /// Hold, then jump at the segment start.
    Step,
}

impl DecayMode {
    /// The mode string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecayMode::None => "none",
            DecayMode::Linear => "linear",
            DecayMode::Quintic => "quintic",
            DecayMode::Step => "step",
        }
    }
}

impl fmt::Display for DecayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecayMode {
    type Err = LossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DecayMode::None),
            "linear" => Ok(DecayMode::Linear),
            "quintic" => Ok(DecayMode::Quintic),
            "step" => Ok(DecayMode::Step),
            other => Err(LossError::UnsupportedDecayMode(other.to_string())),
        }
    }
}

/// Construction-time configuration for [`MorseLoss`](crate::MorseLoss).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MorseLossConfig {
    /// Base term weights.
    pub weights: LossWeights,
    /// The loss recipe.
    pub kind: LossKind,
    /// Annealing mode for the morse weight.
    pub decay: DecayMode,
    /// Flat control-point list `(w0, [t1, w1, ...], wN)` for the annealing
    /// schedule. Ignored when `decay` is `None`.
    pub decay_params: Vec<f64>,
    /// Reduction for the curvature morse term.
    pub curvature_norm: CurvatureNorm,
    /// Apply the curvature term on both point sets instead of averaging a
    /// single side against zero.
    pub bidirectional_curvature: bool,
    /// The field is an unsigned distance field; the Eikonal term switches to
    /// the one-sided relaxed form penalizing norms above `relax_max_norm`.
    pub unsigned_field: bool,
    /// Lower norm bound for the relaxed Eikonal term (signed fields).
    pub relax_min_norm: f64,
    /// Upper norm bound for the relaxed Eikonal term (unsigned fields).
    pub relax_max_norm: f64,
    /// Weight per-point curvature by `exp(−10·|f|)` so the penalty
    /// concentrates near the zero level-set.
    pub weight_curvature_near_surface: bool,
    /// Which gradient sets feed the Eikonal term.
    pub eikonal_sample: EikonalSample,
}

impl Default for MorseLossConfig {
    fn default() -> Self {
        Self {
            weights: LossWeights::default(),
            kind: LossKind::SirenNoNormalsWithMorse,
            decay: DecayMode::None,
            decay_params: Vec::new(),
            curvature_norm: CurvatureNorm::L1,
            bidirectional_curvature: true,
            unsigned_field: false,
            relax_min_norm: 0.8,
            relax_max_norm: 1.0,
            weight_curvature_near_surface: false,
            eikonal_sample: EikonalSample::DomainAndManifold,
        }
    }
}

impl MorseLossConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.relax_min_norm <= 0.0 || self.relax_max_norm <= 0.0 {
            return Err(LossError::InvalidConfiguration(
                "relax norm bounds must be positive".to_string(),
            ));
        }
        for w in self.weights.to_array() {
            if !w.is_finite() {
                return Err(LossError::InvalidConfiguration(
                    "loss weights must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        let kinds = [
            LossKind::Siren,
            LossKind::SirenNoNormalsWithMorse,
            LossKind::SirenNoNormalsHessianL1,
            LossKind::SirenNoNormalsMorseMeanCurvature,
            LossKind::IgrNoNormalsWithMorse,
        ];
        for kind in kinds {
            let parsed: LossKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let err = "siren_with_typo".parse::<LossKind>().unwrap_err();
        assert!(matches!(
            err,
            crate::error::LossError::UnrecognizedConfiguration(_)
        ));
    }

    #[test]
    fn test_unknown_decay_mode_is_fatal() {
        let err = "exponential".parse::<DecayMode>().unwrap_err();
        assert!(matches!(
            err,
            crate::error::LossError::UnsupportedDecayMode(_)
        ));
    }

    #[test]
    fn test_zeroing_is_positional() {
        let mut w = LossWeights::default();
        LossKind::SirenNoEikonalNoNormalsWithMorse.apply_zeroing(&mut w);
        assert_eq!(w.normal, 0.0);
        assert_eq!(w.eikonal, 0.0);
        assert_eq!(w.div, 0.0);
        assert!(w.sdf > 0.0);
        assert!(w.morse > 0.0);
    }

    #[test]
    fn test_hessian_needed_only_for_second_order_recipes() {
        assert!(LossKind::SirenNoNormalsWithMorse.needs_hessian());
        assert!(LossKind::SirenNoNormalsHessian.needs_hessian());
        assert!(!LossKind::SirenNoNormalsDirichlet.needs_hessian());
        assert!(!LossKind::Siren.needs_hessian());
        assert!(!LossKind::SirenNoNormalsNoEikonalNoMorse.needs_hessian());
    }

    #[test]
    fn test_weights_positional_roundtrip() {
        let w = LossWeights::from_array([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(w.to_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(w.normal, 3.0);
        assert_eq!(w.morse, 6.0);
    }
}
