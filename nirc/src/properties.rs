//! Flat, string-keyed view of [`Config`], as exchanged with render-graph
//! scripts and UIs.

use log::warn;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::Config;

pub type Properties = serde_json::Map<String, Value>;

impl Config {
    pub fn to_properties(&self) -> Properties {
        let rr = &self.russian_roulette;
        let hc = &self.hash_cache;
        let nn = &self.neural_cache;
        let fg = &nn.feature_grid;
        let dbg = &self.debug;

        [
            ("lowerBounceCount", json!(self.lower_bounce_count)),
            ("upperBounceCount", json!(self.upper_bounce_count)),
            ("useImportanceSampling", json!(self.use_importance_sampling)),
            ("useNEE", json!(self.use_nee)),
            ("useMIS", json!(self.use_mis)),
            ("misUsePowerHeuristic", json!(self.mis_use_power_heuristic)),
            ("useRR", json!(rr.enabled)),
            ("rrSurvivalProbOption", json!(rr.survival_prob_option)),
            ("rrPathContribEstimateOption", json!(rr.path_contrib_estimate)),
            (
                "rrPixelMeasurementEstimateOption",
                json!(rr.pixel_measurement_estimate),
            ),
            ("rrProbStartValue", json!(rr.prob_start_value)),
            ("rrProbReductionFactor", json!(rr.prob_reduction_factor)),
            ("hashMapSizeExponent", json!(hc.map_size_exponent)),
            ("hashMapProbingSize", json!(hc.probing_size)),
            ("injectRadianceRR", json!(hc.inject_radiance_rr)),
            ("injectRadianceSpread", json!(hc.inject_radiance_spread)),
            ("debugColor", json!(dbg.debug_color)),
            ("debugVoxels", json!(dbg.debug_voxels)),
            ("debugLevels", json!(dbg.debug_levels)),
            ("debugPathLength", json!(dbg.debug_path_length)),
            ("nnDebugOutput", json!(dbg.nn_debug_output)),
            ("nnTrain", json!(nn.train)),
            ("nnLayerWidth", json!(nn.layer_width)),
            ("nnLayerCounts", json!(nn.layer_counts)),
            ("nnFilterAlpha", json!(nn.filter_alpha)),
            ("nnWeightInitBound", json!(nn.weight_init_bound)),
            ("nnTrainingBounces", json!(nn.training_bounces)),
            ("nnOptimizer", json!(nn.optimizer)),
            ("nnResetSeed", json!(nn.reset_seed)),
            ("featureHashMapSize", json!(fg.size)),
            ("featureHashMapPlacesPerElement", json!(fg.places_per_element)),
            ("featureHashMapProbingSize", json!(fg.probing_size)),
            ("nircDebug", json!(dbg.nirc_debug)),
            ("nircDebugMlpIndex", json!(dbg.nirc_debug_mlp_index)),
            (
                "nircDebugShowTransmission",
                json!(dbg.nirc_debug_show_transmission),
            ),
            ("nircDebugApplyBsdf", json!(dbg.nirc_debug_apply_bsdf)),
            ("hashCacheDebugVis", json!(dbg.hash_cache_debug_vis)),
            ("lightBVHOptions", json!(self.light_bvh_options)),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
    }

    /// Updates fields named by `props`.
    ///
    /// Unknown keys and values of a wrong type are logged and skipped; the
    /// remaining keys are still applied.
    pub fn set_properties(&mut self, props: &Properties) {
        for (key, value) in props {
            self.set_property(key, value);
        }
    }

    fn set_property(&mut self, key: &str, value: &Value) {
        let rr = &mut self.russian_roulette;
        let hc = &mut self.hash_cache;
        let nn = &mut self.neural_cache;
        let dbg = &mut self.debug;

        match key {
            "lowerBounceCount" => {
                assign(key, value, &mut self.lower_bounce_count)
            }
            "upperBounceCount" => {
                assign(key, value, &mut self.upper_bounce_count)
            }
            "useImportanceSampling" => {
                assign(key, value, &mut self.use_importance_sampling)
            }
            "useNEE" => assign(key, value, &mut self.use_nee),
            "useMIS" => assign(key, value, &mut self.use_mis),
            "misUsePowerHeuristic" => {
                assign(key, value, &mut self.mis_use_power_heuristic)
            }
            "useRR" => assign(key, value, &mut rr.enabled),
            "rrSurvivalProbOption" => {
                assign(key, value, &mut rr.survival_prob_option)
            }
            "rrPathContribEstimateOption" => {
                assign(key, value, &mut rr.path_contrib_estimate)
            }
            "rrPixelMeasurementEstimateOption" => {
                assign(key, value, &mut rr.pixel_measurement_estimate)
            }
            "rrProbStartValue" => {
                assign(key, value, &mut rr.prob_start_value)
            }
            "rrProbReductionFactor" => {
                assign(key, value, &mut rr.prob_reduction_factor)
            }
            "hashMapSizeExponent" => {
                assign(key, value, &mut hc.map_size_exponent)
            }
            "hashMapProbingSize" => assign(key, value, &mut hc.probing_size),
            "injectRadianceRR" => {
                assign(key, value, &mut hc.inject_radiance_rr)
            }
            "injectRadianceSpread" => {
                assign(key, value, &mut hc.inject_radiance_spread)
            }
            "debugColor" => assign(key, value, &mut dbg.debug_color),
            "debugVoxels" => assign(key, value, &mut dbg.debug_voxels),
            "debugLevels" => assign(key, value, &mut dbg.debug_levels),
            "debugPathLength" => {
                assign(key, value, &mut dbg.debug_path_length)
            }
            "nnDebugOutput" => assign(key, value, &mut dbg.nn_debug_output),
            "nnTrain" => assign(key, value, &mut nn.train),
            "nnLayerWidth" => assign(key, value, &mut nn.layer_width),
            "nnLayerCounts" => assign(key, value, &mut nn.layer_counts),
            "nnFilterAlpha" => assign(key, value, &mut nn.filter_alpha),
            "nnWeightInitBound" => {
                assign(key, value, &mut nn.weight_init_bound)
            }
            "nnTrainingBounces" => {
                assign(key, value, &mut nn.training_bounces)
            }
            "nnOptimizer" => assign(key, value, &mut nn.optimizer),
            "nnResetSeed" => assign(key, value, &mut nn.reset_seed),
            "featureHashMapSize" => {
                assign(key, value, &mut nn.feature_grid.size)
            }
            "featureHashMapPlacesPerElement" => {
                assign(key, value, &mut nn.feature_grid.places_per_element)
            }
            "featureHashMapProbingSize" => {
                assign(key, value, &mut nn.feature_grid.probing_size)
            }
            "nircDebug" => assign(key, value, &mut dbg.nirc_debug),
            "nircDebugMlpIndex" => {
                assign(key, value, &mut dbg.nirc_debug_mlp_index)
            }
            "nircDebugShowTransmission" => {
                assign(key, value, &mut dbg.nirc_debug_show_transmission)
            }
            "nircDebugApplyBsdf" => {
                assign(key, value, &mut dbg.nirc_debug_apply_bsdf)
            }
            "hashCacheDebugVis" => {
                assign(key, value, &mut dbg.hash_cache_debug_vis)
            }
            "lightBVHOptions" => {
                assign(key, value, &mut self.light_bvh_options)
            }
            _ => {
                warn!("Unknown property `{key}`; ignoring it");
            }
        }
    }
}

fn assign<T>(key: &str, value: &Value, slot: &mut T)
where
    T: DeserializeOwned,
{
    match T::deserialize(value) {
        Ok(value) => *slot = value,
        Err(err) => {
            warn!("Invalid value for property `{key}` ({value}): {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{Optimizer, PathContribEstimate, SurvivalProbOption};

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(props) => props,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn round_trip() {
        let mut config = Config::default();

        config.hash_cache.map_size_exponent = 12;
        config.russian_roulette.survival_prob_option =
            SurvivalProbOption::ExpectedContribution;
        config.russian_roulette.path_contrib_estimate =
            Some(PathContribEstimate::NeuralCache);
        config.neural_cache.optimizer = Optimizer::default_sgd();
        config.neural_cache.layer_counts = vec![2, 3];
        config
            .light_bvh_options
            .insert("maxTriangleCountPerLeaf".into(), 10.into());

        let mut target = Config::default();

        target.set_properties(&config.to_properties());

        assert_eq!(config, target);
    }

    #[test]
    fn partial_update() {
        let mut target = Config::default();

        target.set_properties(&props(json!({
            "useRR": false,
            "nnFilterAlpha": 0.5,
            "rrSurvivalProbOption": "ADRRS",
            "rrPixelMeasurementEstimateOption": "NeuralCache"
        })));

        assert!(!target.russian_roulette.enabled);
        assert_relative_eq!(0.5, target.neural_cache.filter_alpha);
        assert_eq!(
            SurvivalProbOption::Adrrs,
            target.russian_roulette.survival_prob_option
        );
        assert_eq!(
            Some(crate::PixelMeasurementEstimate::NeuralCache),
            target.russian_roulette.pixel_measurement_estimate
        );
    }

    #[test]
    fn unknown_and_invalid_properties_are_skipped() {
        let mut target = Config::default();

        target.set_properties(&props(json!({
            "someFutureOption": 123,
            "hashMapSizeExponent": "twelve",
            "upperBounceCount": 8
        })));

        let mut expected = Config::default();

        expected.upper_bounce_count = 8;

        assert_eq!(expected, target);
    }

    #[test]
    fn optimizer_property() {
        let mut target = Config::default();

        target.set_properties(&props(json!({
            "nnOptimizer": {
                "type": "Sgd",
                "learning_rate": 0.1,
                "momentum": 0.5,
                "dampening": 0.25
            }
        })));

        assert_eq!(
            Optimizer::Sgd {
                learning_rate: 0.1,
                momentum: 0.5,
                dampening: 0.25,
            },
            target.neural_cache.optimizer
        );
    }
}
