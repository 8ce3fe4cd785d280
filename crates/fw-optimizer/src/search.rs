//! Search space definitions and seeded random search.

use fw_types::{validation_error, ConfigMap, FwError, FwResult};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::sampler::{Choice, FloatRange, IntRange, LogUniform, RandomSampler};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Trainer option name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
///
/// Each variant wraps a sampler that validated its domain when it was
/// built or deserialized, so a `ParameterKind` can always be sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange(FloatRange),
    /// Integer range [low, high] inclusive.
    IntRange(IntRange),
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform(LogUniform),
    /// Categorical choices.
    Choice(Choice<serde_json::Value>),
}

impl ParameterKind {
    pub fn float(low: f64, high: f64) -> FwResult<Self> {
        FloatRange::new(low, high).map(Self::FloatRange)
    }

    pub fn int(low: i64, high: i64) -> FwResult<Self> {
        IntRange::new(low, high).map(Self::IntRange)
    }

    pub fn log_uniform(low: f64, high: f64) -> FwResult<Self> {
        LogUniform::new(low, high).map(Self::LogUniform)
    }

    pub fn choice(values: Vec<serde_json::Value>) -> FwResult<Self> {
        Choice::new(values).map(Self::Choice)
    }
}

impl RandomSampler<ParameterValue> for ParameterKind {
    fn sample(&self, rng: &mut dyn RngCore) -> ParameterValue {
        match self {
            Self::FloatRange(range) => ParameterValue::Float(range.sample(rng)),
            Self::IntRange(range) => ParameterValue::Int(range.sample(rng)),
            Self::LogUniform(range) => ParameterValue::Float(range.sample(rng)),
            Self::Choice(choice) => ParameterValue::Json(choice.sample(rng)),
        }
    }
}

/// A concrete parameter value produced by a sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<ParameterValue> for serde_json::Value {
    fn from(value: ParameterValue) -> Self {
        match value {
            ParameterValue::Float(v) => serde_json::json!(v),
            ParameterValue::Int(v) => serde_json::json!(v),
            ParameterValue::Json(v) => v,
        }
    }
}

/// One candidate: a value per dimension, keyed by parameter name.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// Overlay a candidate on top of base trainer options.
pub fn apply_parameters(base: &ConfigMap, params: &ParameterSet) -> ConfigMap {
    let mut merged = base.clone();
    for (name, value) in params {
        merged.insert(name.clone(), value.clone().into());
    }
    merged
}

#[derive(Deserialize)]
struct SearchSpaceDefs {
    parameters: Vec<ParameterDef>,
}

/// The full search space: an ordered list of parameter definitions.
///
/// Parameter names are unique; that holds for spaces built with `add*` and
/// for spaces deserialized from a worker payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SearchSpaceDefs")]
pub struct SearchSpace {
    parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    /// Parse a transported space.
    pub fn from_json(json: &str) -> FwResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn parameters(&self) -> &[ParameterDef] {
        &self.parameters
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn add(mut self, name: impl Into<String>, kind: ParameterKind) -> FwResult<Self> {
        let name = name.into();
        if self.parameters.iter().any(|p| p.name == name) {
            return Err(validation_error!("duplicate parameter: {name}"));
        }
        self.parameters.push(ParameterDef { name, kind });
        Ok(self)
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> FwResult<Self> {
        let name = name.into();
        let kind = with_name(&name, ParameterKind::float(low, high))?;
        self.add(name, kind)
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> FwResult<Self> {
        let name = name.into();
        let kind = with_name(&name, ParameterKind::int(low, high))?;
        self.add(name, kind)
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> FwResult<Self> {
        let name = name.into();
        let kind = with_name(&name, ParameterKind::log_uniform(low, high))?;
        self.add(name, kind)
    }

    pub fn add_choice(
        self,
        name: impl Into<String>,
        values: Vec<serde_json::Value>,
    ) -> FwResult<Self> {
        let name = name.into();
        let kind = with_name(&name, ParameterKind::choice(values))?;
        self.add(name, kind)
    }
}

fn with_name(name: &str, kind: FwResult<ParameterKind>) -> FwResult<ParameterKind> {
    kind.map_err(|e| validation_error!("parameter {name}: {e}"))
}

impl TryFrom<SearchSpaceDefs> for SearchSpace {
    type Error = FwError;

    fn try_from(defs: SearchSpaceDefs) -> FwResult<Self> {
        defs.parameters
            .into_iter()
            .try_fold(Self::new(), |space, def| space.add(def.name, def.kind))
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Draws one value per dimension, in declaration order.
impl RandomSampler<ParameterSet> for SearchSpace {
    fn sample(&self, rng: &mut dyn RngCore) -> ParameterSet {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), param.kind.sample(rng)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Random search
// ---------------------------------------------------------------------------

/// Independent random sampling across the search space.
///
/// Candidate `n` is drawn from its own ChaCha stream derived from `seed`, so
/// any worker holding the space and the seed can replay a single candidate
/// without replaying the ones before it.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    seed: u64,
    cursor: u64,
}

impl RandomSearch {
    /// A search over `space`; a space without parameters is rejected.
    pub fn new(space: SearchSpace, seed: u64) -> FwResult<Self> {
        if space.is_empty() {
            return Err(validation_error!("search space has no parameters"));
        }
        Ok(Self {
            space,
            seed,
            cursor: 0,
        })
    }

    /// RNG dedicated to one trial of a seeded search.
    pub fn trial_rng(seed: u64, trial: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(trial);
        rng
    }

    /// Replay candidate `trial` without touching the cursor.
    pub fn candidate(&self, trial: u64) -> ParameterSet {
        let mut rng = Self::trial_rng(self.seed, trial);
        self.space.sample(&mut rng)
    }

    /// Generate the next batch of candidates.
    pub fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let start = self.cursor;
        let batch: Vec<ParameterSet> = (start..start + count as u64)
            .map(|trial| self.candidate(trial))
            .collect();
        self.cursor += count as u64;
        debug!(
            "Suggested {} candidates (trials {}..{}) from seed {}",
            batch.len(),
            start,
            self.cursor,
            self.seed
        );
        batch
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("passes", 1, 10)
            .unwrap()
            .add_float("power_t", 0.0, 1.0)
            .unwrap()
            .add_log_uniform("learning_rate", 1e-4, 10.0)
            .unwrap()
            .add_choice("loss_function", vec![json!("squared"), json!("logistic")])
            .unwrap()
    }

    #[test]
    fn space_sample_covers_every_dimension() {
        let space = sample_space();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let params = space.sample(&mut rng);
        assert_eq!(params.len(), 4);

        match params.get("passes") {
            Some(ParameterValue::Int(v)) => assert!((1..=10).contains(v)),
            other => panic!("unexpected passes value: {other:?}"),
        }
        match params.get("learning_rate") {
            Some(ParameterValue::Float(v)) => assert!(*v >= 1e-4 && *v <= 10.0),
            other => panic!("unexpected learning_rate value: {other:?}"),
        }
        match params.get("loss_function") {
            Some(ParameterValue::Json(v)) => {
                let s = v.as_str().unwrap();
                assert!(["squared", "logistic"].contains(&s));
            }
            other => panic!("unexpected loss_function value: {other:?}"),
        }
    }

    #[test]
    fn seeded_search_is_reproducible() {
        let mut a = RandomSearch::new(sample_space(), 42).unwrap();
        let mut b = RandomSearch::new(sample_space(), 42).unwrap();
        assert_eq!(a.suggest(20), b.suggest(20));
    }

    #[test]
    fn different_seeds_give_different_candidates() {
        let mut a = RandomSearch::new(sample_space(), 1).unwrap();
        let mut b = RandomSearch::new(sample_space(), 2).unwrap();
        assert_ne!(a.suggest(20), b.suggest(20));
    }

    #[test]
    fn batching_does_not_change_the_sequence() {
        let mut whole = RandomSearch::new(sample_space(), 9).unwrap();
        let all = whole.suggest(10);

        let mut split = RandomSearch::new(sample_space(), 9).unwrap();
        let mut pieces = split.suggest(3);
        pieces.extend(split.suggest(7));
        assert_eq!(all, pieces);

        // a worker can replay one trial in isolation
        assert_eq!(whole.candidate(6), all[6]);
    }

    #[test]
    fn builder_rejects_malformed_domains() {
        assert!(SearchSpace::new().add_float("x", 1.0, 0.0).is_err());
        assert!(SearchSpace::new().add_log_uniform("lr", 0.0, 1.0).is_err());
        assert!(SearchSpace::new().add_choice("c", Vec::new()).is_err());
        assert!(SearchSpace::new()
            .add_int("a", 1, 2)
            .unwrap()
            .add_int("a", 3, 4)
            .is_err());
    }

    #[test]
    fn transported_space_round_trips_and_revalidates() {
        let space = sample_space();
        let json = serde_json::to_string(&space).unwrap();
        let back = SearchSpace::from_json(&json).unwrap();
        assert_eq!(space, back);

        let broken = r#"{"parameters":[{"name":"x","kind":{"IntRange":{"low":5,"high":1}}}]}"#;
        assert!(SearchSpace::from_json(broken).is_err());
    }

    #[test]
    fn transported_domains_are_checked_on_arrival() {
        let empty_choice = r#"{"parameters":[{"name":"c","kind":{"Choice":{"values":[]}}}]}"#;
        assert!(serde_json::from_str::<SearchSpace>(empty_choice).is_err());

        let inverted: Result<ParameterKind, _> =
            serde_json::from_str(r#"{"IntRange":{"low":5,"high":1}}"#);
        assert!(inverted.is_err());

        let overflowing = r#"{"parameters":[{"name":"x","kind":{"FloatRange":{"low":-1.7976931348623157e308,"high":1.7976931348623157e308}}}]}"#;
        assert!(SearchSpace::from_json(overflowing).is_err());

        let duplicated = r#"{"parameters":[
            {"name":"a","kind":{"IntRange":{"low":1,"high":2}}},
            {"name":"a","kind":{"IntRange":{"low":3,"high":4}}}
        ]}"#;
        assert!(SearchSpace::from_json(duplicated).is_err());
    }

    #[test]
    fn kinds_cannot_be_built_unsampleable() {
        assert!(ParameterKind::int(5, 1).is_err());
        assert!(ParameterKind::choice(Vec::new()).is_err());
        assert!(ParameterKind::float(-f64::MAX, f64::MAX).is_err());
        assert!(ParameterKind::log_uniform(0.0, 1.0).is_err());

        let kind = ParameterKind::int(3, 3).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(kind.sample(&mut rng), ParameterValue::Int(3));
    }

    #[test]
    fn search_requires_at_least_one_parameter() {
        assert!(RandomSearch::new(SearchSpace::new(), 1).is_err());

        let space = SearchSpace::from_json(
            r#"{"parameters":[{"name":"cb","kind":{"Choice":{"values":[2,4]}}}]}"#,
        )
        .unwrap();
        let mut search = RandomSearch::new(space, 5).unwrap();
        for candidate in search.suggest(8) {
            let value = serde_json::Value::from(candidate["cb"].clone());
            assert!(value == json!(2) || value == json!(4));
        }
    }

    #[test]
    fn candidates_overlay_base_options() {
        let mut base = ConfigMap::new();
        base.insert("b".into(), json!(18));
        base.insert("passes".into(), json!(1));

        let mut params = ParameterSet::new();
        params.insert("passes".into(), ParameterValue::Int(5));
        params.insert("power_t".into(), ParameterValue::Float(0.5));

        let merged = apply_parameters(&base, &params);
        assert_eq!(merged["b"], json!(18));
        assert_eq!(merged["passes"], json!(5));
        assert_eq!(merged["power_t"], json!(0.5));
    }

    #[test]
    fn parameter_value_display() {
        assert_eq!(ParameterValue::Int(3).to_string(), "3");
        assert_eq!(ParameterValue::Float(0.5).to_string(), "0.5");
        assert_eq!(ParameterValue::Json(json!("adam")).to_string(), "\"adam\"");
    }
}
