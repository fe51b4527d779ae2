//! Core types for oodsearch.
//!
//! Everything here is plain data: strategy configurations, the result records
//! the runner produces, and the group labels used for worst-group accuracy.
//! Records are created once and never mutated; a newer record under the same
//! strategy name supersedes the old one in the store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SearchError};

/// Serde helpers that write NaN as `null` and read `null` back as NaN.
///
/// AUC is undefined on single-class evaluation sets; JSON has no NaN literal.
mod nan_as_null {
    use super::*;

    pub fn serialize<S>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<f64> = Option::deserialize(deserializer)?;
        Ok(opt.unwrap_or(f64::NAN))
    }
}

/// Class-balancing mode for the classifier loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassWeight {
    #[default]
    None,
    /// Weight each class by `n / (2 * n_class)`.
    Balanced,
}

/// Serialized as `null` or `"balanced"`, the way the record format stores it.
mod class_weight_field {
    use super::*;

    pub fn serialize<S>(value: &ClassWeight, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            ClassWeight::None => serializer.serialize_none(),
            ClassWeight::Balanced => serializer.serialize_some("balanced"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<ClassWeight, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("none") | Some("") => Ok(ClassWeight::None),
            Some("balanced") => Ok(ClassWeight::Balanced),
            Some(other) => Err(serde::de::Error::custom(format!(
                "unknown class_weight '{}', expected null or \"balanced\"",
                other
            ))),
        }
    }
}

/// Regularization strength label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegStrength {
    #[default]
    Normal,
    /// Divides the effective C by 10.
    Strong,
}

impl RegStrength {
    /// Multiplier applied to `l2_C` when training.
    pub fn c_multiplier(self) -> f64 {
        match self {
            RegStrength::Normal => 1.0,
            RegStrength::Strong => 0.1,
        }
    }
}

/// One training strategy. The `name` is the storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default, with = "class_weight_field")]
    pub class_weight: ClassWeight,
    /// Inverse regularization strength (larger = weaker penalty)
    #[serde(rename = "l2_C", default = "default_l2_c")]
    pub l2_c: f64,
    /// Fraction of training rows kept, in (0, 1]
    #[serde(default = "default_sample_frac")]
    pub sample_frac: f64,
    #[serde(default)]
    pub undersample_majority: bool,
    #[serde(default)]
    pub reg_strength: RegStrength,
    #[serde(default)]
    pub use_group_dro: bool,
}

fn default_l2_c() -> f64 {
    1.0
}

fn default_sample_frac() -> f64 {
    1.0
}

impl StrategyConfig {
    /// A default strategy with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_weight: ClassWeight::None,
            l2_c: default_l2_c(),
            sample_frac: default_sample_frac(),
            undersample_majority: false,
            reg_strength: RegStrength::Normal,
            use_group_dro: false,
        }
    }

    pub fn with_class_weight(mut self, class_weight: ClassWeight) -> Self {
        self.class_weight = class_weight;
        self
    }

    pub fn with_l2_c(mut self, l2_c: f64) -> Self {
        self.l2_c = l2_c;
        self
    }

    pub fn with_sample_frac(mut self, sample_frac: f64) -> Self {
        self.sample_frac = sample_frac;
        self
    }

    pub fn with_undersampling(mut self, enabled: bool) -> Self {
        self.undersample_majority = enabled;
        self
    }

    pub fn with_reg_strength(mut self, reg_strength: RegStrength) -> Self {
        self.reg_strength = reg_strength;
        self
    }

    pub fn with_group_dro(mut self, enabled: bool) -> Self {
        self.use_group_dro = enabled;
        self
    }

    /// Check field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SearchError::InvalidConfig("name must not be empty".into()));
        }
        if !(self.l2_c.is_finite() && self.l2_c > 0.0) {
            return Err(SearchError::InvalidConfig(format!(
                "{}: l2_C must be a positive number, got {}",
                self.name, self.l2_c
            )));
        }
        if !(self.sample_frac > 0.0 && self.sample_frac <= 1.0) {
            return Err(SearchError::InvalidConfig(format!(
                "{}: sample_frac must be in (0, 1], got {}",
                self.name, self.sample_frac
            )));
        }
        Ok(())
    }

    /// C actually handed to the trainer.
    pub fn effective_c(&self) -> f64 {
        self.l2_c * self.reg_strength.c_multiplier()
    }

    /// Compact one-line description for logs and tables.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("C={:.4}", self.l2_c)];
        if self.class_weight == ClassWeight::Balanced {
            parts.push("balanced".to_string());
        }
        if self.sample_frac < 1.0 {
            parts.push(format!("frac={:.2}", self.sample_frac));
        }
        if self.undersample_majority {
            parts.push("undersample".to_string());
        }
        if self.reg_strength == RegStrength::Strong {
            parts.push("strong-reg".to_string());
        }
        if self.use_group_dro {
            parts.push("group-dro".to_string());
        }
        format!("{} [{}]", self.name, parts.join(" "))
    }
}

/// Protected-group label for one row.
///
/// Sentinel variants mark rows whose attributes are missing or invalid; they
/// take part in training weights and group tables but never in worst-group
/// accuracy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum GroupId {
    Known(String),
    /// An attribute is missing
    Unknown,
    /// An attribute has a value outside the expected set
    Invalid,
}

impl GroupId {
    pub const UNKNOWN: &'static str = "Unknown";
    pub const INVALID: &'static str = "Invalid";

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, GroupId::Known(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            GroupId::Known(name) => name,
            GroupId::Unknown => Self::UNKNOWN,
            GroupId::Invalid => Self::INVALID,
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<GroupId> for String {
    fn from(group: GroupId) -> Self {
        match group {
            GroupId::Known(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl From<String> for GroupId {
    fn from(name: String) -> Self {
        match name.as_str() {
            GroupId::UNKNOWN => GroupId::Unknown,
            GroupId::INVALID => GroupId::Invalid,
            _ => GroupId::Known(name),
        }
    }
}

/// Metrics on the in-distribution test partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdMetrics {
    #[serde(with = "nan_as_null")]
    pub accuracy: f64,
    #[serde(with = "nan_as_null")]
    pub auc: f64,
}

/// Metrics on the out-of-distribution test partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OodMetrics {
    #[serde(with = "nan_as_null")]
    pub accuracy: f64,
    #[serde(with = "nan_as_null")]
    pub auc: f64,
    #[serde(default)]
    pub group_accuracy: BTreeMap<GroupId, f64>,
    /// Minimum over non-sentinel groups; `None` when no such group was observed
    #[serde(default)]
    pub worst_group_accuracy: Option<f64>,
}

/// Group attributes of one evaluation row (no features).
pub type MetaRow = BTreeMap<String, serde_json::Value>;

/// Outcome of one experiment, persisted as `run_<name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub config: StrategyConfig,
    pub id: IdMetrics,
    pub ood: OodMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_id: Option<Vec<MetaRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_ood: Option<Vec<MetaRow>>,
}

impl ResultRecord {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Absolute ID/OOD accuracy gap.
    pub fn gap(&self) -> f64 {
        (self.id.accuracy - self.ood.accuracy).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_partial_json() {
        let cfg: StrategyConfig = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(cfg, StrategyConfig::new("x"));
    }

    #[test]
    fn test_config_field_names() {
        let cfg = StrategyConfig::new("bal")
            .with_class_weight(ClassWeight::Balanced)
            .with_l2_c(0.5);
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["l2_C"], 0.5);
        assert_eq!(json["class_weight"], "balanced");
        assert_eq!(json["reg_strength"], "normal");

        let plain = serde_json::to_value(StrategyConfig::new("plain")).unwrap();
        assert!(plain["class_weight"].is_null());
    }

    #[test]
    fn test_config_validation() {
        assert!(StrategyConfig::new("ok").validate().is_ok());
        assert!(StrategyConfig::new("c").with_l2_c(0.0).validate().is_err());
        assert!(StrategyConfig::new("c").with_l2_c(-1.0).validate().is_err());
        assert!(StrategyConfig::new("f").with_sample_frac(0.0).validate().is_err());
        assert!(StrategyConfig::new("f").with_sample_frac(1.5).validate().is_err());
        assert!(StrategyConfig::new("f").with_sample_frac(1.0).validate().is_ok());
        assert!(StrategyConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_effective_c() {
        let cfg = StrategyConfig::new("s")
            .with_l2_c(2.0)
            .with_reg_strength(RegStrength::Strong);
        assert!((cfg.effective_c() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_group_id_string_mapping() {
        assert_eq!(GroupId::from("Unknown".to_string()), GroupId::Unknown);
        assert_eq!(GroupId::from("Invalid".to_string()), GroupId::Invalid);
        assert_eq!(
            GroupId::from("Male_ER".to_string()),
            GroupId::Known("Male_ER".to_string())
        );
        assert!(GroupId::Unknown.is_sentinel());
        assert!(!GroupId::Known("a".into()).is_sentinel());
    }

    #[test]
    fn test_nan_auc_written_as_null() {
        let id = IdMetrics { accuracy: 0.7, auc: f64::NAN };
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains("null"));

        let back: IdMetrics = serde_json::from_str(&json).unwrap();
        assert!(back.auc.is_nan());
        assert_eq!(back.accuracy, 0.7);
    }

    #[test]
    fn test_group_accuracy_keys_are_strings() {
        let mut groups = BTreeMap::new();
        groups.insert(GroupId::Known("Female_ER".into()), 0.6);
        groups.insert(GroupId::Unknown, 1.0);
        let ood = OodMetrics {
            accuracy: 0.6,
            auc: 0.65,
            group_accuracy: groups,
            worst_group_accuracy: Some(0.6),
        };
        let json = serde_json::to_value(&ood).unwrap();
        assert_eq!(json["group_accuracy"]["Female_ER"], 0.6);
        assert_eq!(json["group_accuracy"]["Unknown"], 1.0);

        let back: OodMetrics = serde_json::from_value(json).unwrap();
        assert_eq!(back, ood);
    }
}
