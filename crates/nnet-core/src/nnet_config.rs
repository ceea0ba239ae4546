//! ネットワーク構成（TOML）
//!
//! ```toml
//! [input]
//! name = "input"
//! dim = 4
//!
//! [[component]]
//! name = "affine1"
//! type = "affine"
//! input_dim = 4
//! output_dim = 3
//! learning_rate = 0.01
//! max_change = 0.75
//!
//! [[component]]
//! name = "logsoftmax"
//! type = "log_softmax"
//! dim = 3
//!
//! [[output]]
//! name = "output"
//! objective = "linear"
//! ```

use crate::components::{
    AffineComponent, Component, DropoutComponent, LogSoftmaxComponent, RectifiedLinearComponent,
};
use crate::error::{NnetError, NnetResult};
use crate::nnet::{InputNode, Nnet, ObjectiveType, OutputNode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_input_name")]
    pub name: String,
    pub dim: usize,
}

fn default_input_name() -> String {
    "input".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// 非線形コンポーネントの次元
    pub dim: Option<usize>,
    pub input_dim: Option<usize>,
    pub output_dim: Option<usize>,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// 0 以下ならコンポーネント単位の max-change は無効
    #[serde(default)]
    pub max_change: f32,
    #[serde(default)]
    pub natural_gradient: bool,
    /// dropout 率
    #[serde(default)]
    pub proportion: f32,
}

fn default_learning_rate() -> f32 {
    0.001
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_name")]
    pub name: String,
    /// "linear" / "quadratic"
    pub objective: String,
    /// 未指定なら最後のコンポーネントの出力
    pub tap: Option<usize>,
}

fn default_output_name() -> String {
    "output".to_string()
}

/// ネットワーク構成
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NnetConfig {
    pub input: InputConfig,
    #[serde(rename = "component")]
    pub components: Vec<ComponentConfig>,
    #[serde(rename = "output")]
    pub outputs: Vec<OutputConfig>,
}

impl NnetConfig {
    pub fn from_toml_str(s: &str) -> NnetResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> NnetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

fn required(value: Option<usize>, field: &str, component: &str) -> NnetResult<usize> {
    value.ok_or_else(|| {
        NnetError::InvalidConfig(format!("component '{component}' requires '{field}'"))
    })
}

fn build_component<R: Rng>(cfg: &ComponentConfig, rng: &mut R) -> NnetResult<Box<dyn Component>> {
    let c: Box<dyn Component> = match cfg.kind.as_str() {
        "affine" => Box::new(AffineComponent::new_random(
            required(cfg.input_dim, "input_dim", &cfg.name)?,
            required(cfg.output_dim, "output_dim", &cfg.name)?,
            cfg.learning_rate,
            cfg.max_change,
            cfg.natural_gradient,
            rng,
        )),
        "relu" | "rectified_linear" => {
            Box::new(RectifiedLinearComponent::new(required(cfg.dim, "dim", &cfg.name)?))
        }
        "log_softmax" => Box::new(LogSoftmaxComponent::new(required(cfg.dim, "dim", &cfg.name)?)),
        "dropout" => Box::new(DropoutComponent::new(
            required(cfg.dim, "dim", &cfg.name)?,
            cfg.proportion,
            rng.random(),
        )),
        other => return Err(NnetError::UnknownComponent(other.to_string())),
    };
    Ok(c)
}

impl Nnet {
    /// 構成からネットワークを作成（パラメータは `rng` で初期化）
    pub fn from_config<R: Rng>(cfg: &NnetConfig, rng: &mut R) -> NnetResult<Self> {
        let components = cfg
            .components
            .iter()
            .map(|c| Ok((c.name.clone(), build_component(c, rng)?)))
            .collect::<NnetResult<Vec<_>>>()?;
        let num_components = components.len();
        let outputs = cfg
            .outputs
            .iter()
            .map(|o| {
                Ok(OutputNode {
                    name: o.name.clone(),
                    objective_type: o.objective.parse::<ObjectiveType>()?,
                    tap: o.tap.unwrap_or(num_components),
                })
            })
            .collect::<NnetResult<Vec<_>>>()?;
        Nnet::new(
            InputNode {
                name: cfg.input.name.clone(),
                dim: cfg.input.dim,
            },
            components,
            outputs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    const CONFIG: &str = r#"
[input]
dim = 4

[[component]]
name = "affine1"
type = "affine"
input_dim = 4
output_dim = 6
max_change = 0.75
natural_gradient = true

[[component]]
name = "relu1"
type = "relu"
dim = 6

[[component]]
name = "affine2"
type = "affine"
input_dim = 6
output_dim = 3

[[component]]
name = "logsoftmax"
type = "log_softmax"
dim = 3

[[output]]
objective = "linear"
"#;

    #[test]
    fn test_build_from_toml() {
        let cfg = NnetConfig::from_toml_str(CONFIG).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let nnet = Nnet::from_config(&cfg, &mut rng).unwrap();
        assert_eq!(nnet.num_components(), 4);
        assert_eq!(nnet.num_updatable_components(), 2);
        assert_eq!(nnet.output_node("output").unwrap().tap, 4);
        assert!(nnet.is_input_node("input"));
    }

    #[test]
    fn test_unknown_objective_rejected() {
        let text = CONFIG.replace("objective = \"linear\"", "objective = \"hinge\"");
        let cfg = NnetConfig::from_toml_str(&text).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let err = Nnet::from_config(&cfg, &mut rng).unwrap_err();
        assert!(matches!(err, NnetError::UnsupportedObjective(_)));
    }

    #[test]
    fn test_unknown_component_rejected() {
        let text = CONFIG.replace("type = \"relu\"", "type = \"lstm\"");
        let cfg = NnetConfig::from_toml_str(&text).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let err = Nnet::from_config(&cfg, &mut rng).unwrap_err();
        assert!(matches!(err, NnetError::UnknownComponent(_)));
    }
}
