use serde::{Deserialize, Serialize};

use crate::gpu;

/// Strategy used to compute a path's survival probability.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum SurvivalProbOption {
    /// Probability starts at `rrProbStartValue` and decays by
    /// `rrProbReductionFactor` per bounce.
    #[default]
    Default,

    /// Probability derived from the path's expected contribution, as
    /// estimated by one of the caches.
    ExpectedContribution,

    /// Adjoint-driven weight window: expected contribution relative to the
    /// pixel's measurement estimate.
    #[serde(rename = "ADRRS")]
    Adrrs,
}

/// Cache estimating a path vertex's outgoing radiance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathContribEstimate {
    HashCache,
    NeuralCache,
}

/// Source of the pixel measurement estimate used by ADRRS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelMeasurementEstimate {
    /// Reads the optional reference image.
    Reference,
    HashCache,
    NeuralCache,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RussianRouletteOptions {
    pub enabled: bool,
    pub survival_prob_option: SurvivalProbOption,
    pub path_contrib_estimate: Option<PathContribEstimate>,
    pub pixel_measurement_estimate: Option<PixelMeasurementEstimate>,
    pub prob_start_value: f32,
    pub prob_reduction_factor: f32,
}

impl Default for RussianRouletteOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            survival_prob_option: SurvivalProbOption::Default,
            path_contrib_estimate: None,
            pixel_measurement_estimate: None,
            prob_start_value: 1.2,
            prob_reduction_factor: 0.9,
        }
    }
}

/// Resolved Russian-roulette policy.
///
/// Estimator sources which the selected strategy doesn't consult are
/// dropped, and missing ones are replaced with safe defaults, so that every
/// policy maps onto a well-formed bit pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RussianRoulette {
    survival: SurvivalProbOption,
    path_contrib: Option<PathContribEstimate>,
    pixel_measurement: Option<PixelMeasurementEstimate>,
}

impl RussianRoulette {
    pub const DEFAULT_PATH_CONTRIB: PathContribEstimate =
        PathContribEstimate::HashCache;

    pub const DEFAULT_PIXEL_MEASUREMENT: PixelMeasurementEstimate =
        PixelMeasurementEstimate::Reference;

    pub fn new(options: &RussianRouletteOptions) -> Self {
        let survival = if options.enabled {
            options.survival_prob_option
        } else {
            SurvivalProbOption::Default
        };

        let path_contrib = match survival {
            SurvivalProbOption::Default => None,
            _ => Some(
                options
                    .path_contrib_estimate
                    .unwrap_or(Self::DEFAULT_PATH_CONTRIB),
            ),
        };

        let pixel_measurement = match survival {
            SurvivalProbOption::Adrrs => Some(
                options
                    .pixel_measurement_estimate
                    .unwrap_or(Self::DEFAULT_PIXEL_MEASUREMENT),
            ),
            _ => None,
        };

        Self {
            survival,
            path_contrib,
            pixel_measurement,
        }
    }

    pub fn survival(&self) -> SurvivalProbOption {
        self.survival
    }

    pub fn path_contrib_estimate(&self) -> Option<PathContribEstimate> {
        self.path_contrib
    }

    pub fn pixel_measurement_estimate(
        &self,
    ) -> Option<PixelMeasurementEstimate> {
        self.pixel_measurement
    }

    pub fn requires_hash_cache(&self) -> bool {
        self.path_contrib == Some(PathContribEstimate::HashCache)
            || self.pixel_measurement
                == Some(PixelMeasurementEstimate::HashCache)
    }

    pub fn requires_neural_cache(&self) -> bool {
        self.path_contrib == Some(PathContribEstimate::NeuralCache)
            || self.pixel_measurement
                == Some(PixelMeasurementEstimate::NeuralCache)
    }

    pub fn requires_reference_image(&self) -> bool {
        self.pixel_measurement == Some(PixelMeasurementEstimate::Reference)
    }

    /// Encodes the policy as `RR_OPTION_BITS` (see: [`gpu::RR_SURVIVAL_MASK`]).
    pub fn option_bits(&self) -> u32 {
        let survival = match self.survival {
            SurvivalProbOption::Default => 0,
            SurvivalProbOption::ExpectedContribution => {
                gpu::RR_SURVIVAL_EXPECTED_CONTRIBUTION
            }
            SurvivalProbOption::Adrrs => gpu::RR_SURVIVAL_ADRRS,
        };

        let path_contrib = match self.path_contrib {
            None => 0,
            Some(PathContribEstimate::HashCache) => gpu::RR_CONTRIB_HASH_CACHE,
            Some(PathContribEstimate::NeuralCache) => {
                gpu::RR_CONTRIB_NEURAL_CACHE
            }
        };

        let pixel_measurement = match self.pixel_measurement {
            None => 0,
            Some(PixelMeasurementEstimate::Reference) => {
                gpu::RR_MEASUREMENT_REFERENCE
            }
            Some(PixelMeasurementEstimate::HashCache) => {
                gpu::RR_MEASUREMENT_HASH_CACHE
            }
            Some(PixelMeasurementEstimate::NeuralCache) => {
                gpu::RR_MEASUREMENT_NEURAL_CACHE
            }
        };

        survival | path_contrib | pixel_measurement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(
        survival: SurvivalProbOption,
        path_contrib: Option<PathContribEstimate>,
        pixel_measurement: Option<PixelMeasurementEstimate>,
    ) -> RussianRoulette {
        RussianRoulette::new(&RussianRouletteOptions {
            survival_prob_option: survival,
            path_contrib_estimate: path_contrib,
            pixel_measurement_estimate: pixel_measurement,
            ..Default::default()
        })
    }

    #[test]
    fn expected_contribution_from_neural_cache() {
        let target = policy(
            SurvivalProbOption::ExpectedContribution,
            Some(PathContribEstimate::NeuralCache),
            None,
        );

        assert!(target.requires_neural_cache());
        assert!(!target.requires_hash_cache());

        let bits = target.option_bits();

        assert_eq!(
            gpu::RR_SURVIVAL_EXPECTED_CONTRIBUTION
                | gpu::RR_CONTRIB_NEURAL_CACHE,
            bits
        );
        assert_eq!(0, bits & gpu::RR_MEASUREMENT_MASK);
    }

    #[test]
    fn default_survival_requires_nothing() {
        let target = policy(
            SurvivalProbOption::Default,
            Some(PathContribEstimate::NeuralCache),
            Some(PixelMeasurementEstimate::HashCache),
        );

        assert!(!target.requires_hash_cache());
        assert!(!target.requires_neural_cache());
        assert_eq!(0, target.option_bits());
    }

    #[test]
    fn disabled_rr_requires_nothing() {
        let target = RussianRoulette::new(&RussianRouletteOptions {
            enabled: false,
            survival_prob_option: SurvivalProbOption::Adrrs,
            path_contrib_estimate: Some(PathContribEstimate::HashCache),
            pixel_measurement_estimate: Some(
                PixelMeasurementEstimate::NeuralCache,
            ),
            ..Default::default()
        });

        assert_eq!(SurvivalProbOption::Default, target.survival());
        assert!(!target.requires_hash_cache());
        assert!(!target.requires_neural_cache());
        assert_eq!(0, target.option_bits());
    }

    #[test]
    fn adrrs_without_estimators_falls_back() {
        let target = policy(SurvivalProbOption::Adrrs, None, None);

        assert_eq!(
            Some(PathContribEstimate::HashCache),
            target.path_contrib_estimate()
        );
        assert_eq!(
            Some(PixelMeasurementEstimate::Reference),
            target.pixel_measurement_estimate()
        );
        assert!(target.requires_reference_image());
        assert_eq!(
            gpu::RR_SURVIVAL_ADRRS
                | gpu::RR_CONTRIB_HASH_CACHE
                | gpu::RR_MEASUREMENT_REFERENCE,
            target.option_bits()
        );
    }

    #[test]
    fn adrrs_mixing_both_caches() {
        let target = policy(
            SurvivalProbOption::Adrrs,
            Some(PathContribEstimate::HashCache),
            Some(PixelMeasurementEstimate::NeuralCache),
        );

        assert!(target.requires_hash_cache());
        assert!(target.requires_neural_cache());
        assert!(!target.requires_reference_image());
    }

    #[test]
    fn bits_are_well_formed() {
        let survivals = [
            SurvivalProbOption::Default,
            SurvivalProbOption::ExpectedContribution,
            SurvivalProbOption::Adrrs,
        ];

        let path_contribs = [
            None,
            Some(PathContribEstimate::HashCache),
            Some(PathContribEstimate::NeuralCache),
        ];

        let pixel_measurements = [
            None,
            Some(PixelMeasurementEstimate::Reference),
            Some(PixelMeasurementEstimate::HashCache),
            Some(PixelMeasurementEstimate::NeuralCache),
        ];

        for survival in survivals {
            for path_contrib in path_contribs {
                for pixel_measurement in pixel_measurements {
                    let bits = policy(survival, path_contrib, pixel_measurement)
                        .option_bits();

                    let survival_bits = bits & gpu::RR_SURVIVAL_MASK;
                    let contrib_bits = bits & gpu::RR_CONTRIB_MASK;
                    let measurement_bits = bits & gpu::RR_MEASUREMENT_MASK;

                    assert!(survival_bits.count_ones() <= 1);

                    if survival_bits == 0 {
                        assert_eq!(0, bits);
                    } else {
                        assert_eq!(1, contrib_bits.count_ones());
                    }

                    if survival_bits == gpu::RR_SURVIVAL_ADRRS {
                        assert_eq!(1, measurement_bits.count_ones());
                    } else {
                        assert_eq!(0, measurement_bits);
                    }
                }
            }
        }
    }
}
