//! ネットワーク
//!
//! 1 つの入力ノード、名前付きコンポーネントの連鎖、連鎖の途中（または末尾）を
//! 参照する 1 つ以上の出力ノードからなる。

use crate::components::{Component, UpdatableComponent};
use crate::error::{NnetError, NnetResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 出力ノードの目的関数の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveType {
    /// 線形（出力が対数確率のときの交差エントロピー）: `tr(x yᵀ)`
    Linear,
    /// 二乗誤差: `-0.5 |x - y|²`
    Quadratic,
}

impl ObjectiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Quadratic => "quadratic",
        }
    }
}

impl fmt::Display for ObjectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ObjectiveType {
    type Err = NnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "quadratic" => Ok(Self::Quadratic),
            _ => Err(NnetError::UnsupportedObjective(s.to_string())),
        }
    }
}

/// ノード種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Input { dim: usize },
    Output { dim: usize, objective_type: ObjectiveType },
}

/// 入力ノード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputNode {
    pub name: String,
    pub dim: usize,
}

/// 出力ノード
///
/// `tap` は出力が何個目のコンポーネントの後から取り出されるか（1 以上）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    pub name: String,
    pub objective_type: ObjectiveType,
    pub tap: usize,
}

#[derive(Debug, Clone)]
struct NamedComponent {
    name: String,
    component: Box<dyn Component>,
}

/// ネットワーク本体
///
/// `Clone` がディープコピーに相当する。
#[derive(Debug, Clone)]
pub struct Nnet {
    input: InputNode,
    components: Vec<NamedComponent>,
    outputs: Vec<OutputNode>,
}

impl Nnet {
    /// ネットワークを構築（次元の連鎖・ノード名の一意性を検証）
    pub fn new(
        input: InputNode,
        components: Vec<(String, Box<dyn Component>)>,
        outputs: Vec<OutputNode>,
    ) -> NnetResult<Self> {
        if components.is_empty() {
            return Err(NnetError::InvalidConfig("nnet has no components".into()));
        }
        if outputs.is_empty() {
            return Err(NnetError::InvalidConfig("nnet has no output nodes".into()));
        }

        let mut dim = input.dim;
        for (name, c) in &components {
            if c.input_dim() != dim {
                return Err(NnetError::DimensionMismatch {
                    name: name.clone(),
                    expected: dim,
                    actual: c.input_dim(),
                });
            }
            dim = c.output_dim();
        }

        let mut seen = vec![input.name.as_str()];
        for o in &outputs {
            if o.tap == 0 || o.tap > components.len() {
                return Err(NnetError::InvalidConfig(format!(
                    "output '{}' taps component {} of {}",
                    o.name,
                    o.tap,
                    components.len()
                )));
            }
            if seen.contains(&o.name.as_str()) {
                return Err(NnetError::InvalidConfig(format!("duplicate node name '{}'", o.name)));
            }
            seen.push(o.name.as_str());
        }

        let components = components
            .into_iter()
            .map(|(name, component)| NamedComponent { name, component })
            .collect();
        Ok(Self {
            input,
            components,
            outputs,
        })
    }

    // ------------------------------------------------------------------
    // ノード
    // ------------------------------------------------------------------

    pub fn input_node(&self) -> &InputNode {
        &self.input
    }

    pub fn output_nodes(&self) -> &[OutputNode] {
        &self.outputs
    }

    pub fn output_node(&self, name: &str) -> Option<&OutputNode> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// ノード名から種別を取得（存在しなければ `None`）
    pub fn node_kind(&self, name: &str) -> Option<NodeKind> {
        if self.input.name == name {
            return Some(NodeKind::Input {
                dim: self.input.dim,
            });
        }
        self.output_node(name).map(|o| NodeKind::Output {
            dim: self.components[o.tap - 1].component.output_dim(),
            objective_type: o.objective_type,
        })
    }

    pub fn is_input_node(&self, name: &str) -> bool {
        matches!(self.node_kind(name), Some(NodeKind::Input { .. }))
    }

    pub fn is_output_node(&self, name: &str) -> bool {
        matches!(self.node_kind(name), Some(NodeKind::Output { .. }))
    }

    // ------------------------------------------------------------------
    // コンポーネント
    // ------------------------------------------------------------------

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn component(&self, index: usize) -> &dyn Component {
        self.components[index].component.as_ref()
    }

    pub fn component_mut(&mut self, index: usize) -> &mut dyn Component {
        self.components[index].component.as_mut()
    }

    pub fn component_name(&self, index: usize) -> &str {
        &self.components[index].name
    }

    /// 更新可能コンポーネントを (名前, 参照) で列挙
    pub fn updatable_components(&self) -> impl Iterator<Item = (&str, &dyn UpdatableComponent)> {
        self.components
            .iter()
            .filter_map(|c| c.component.as_updatable().map(|u| (c.name.as_str(), u)))
    }

    pub fn num_updatable_components(&self) -> usize {
        self.updatable_components().count()
    }

    /// 更新可能パラメータの総数
    pub fn num_parameters(&self) -> usize {
        self.updatable_components().map(|(_, u)| u.params().len()).sum()
    }

    // ------------------------------------------------------------------
    // ネットワーク全体の操作
    // ------------------------------------------------------------------

    /// 全コンポーネントのパラメータ・統計を `alpha` 倍
    pub fn scale(&mut self, alpha: f32) {
        for c in &mut self.components {
            c.component.scale(alpha);
        }
    }

    /// natural gradient の統計更新を凍結/解除
    pub fn freeze_natural_gradient(&mut self, freeze: bool) {
        for c in &mut self.components {
            c.component.freeze_natural_gradient(freeze);
        }
    }

    /// いずれかのコンポーネントで natural gradient が凍結中か
    pub fn is_natural_gradient_frozen(&self) -> bool {
        self.components
            .iter()
            .any(|c| c.component.is_natural_gradient_frozen())
    }

    /// 蓄積済みのコンポーネント統計をゼロにする
    pub fn zero_component_stats(&mut self) {
        for c in &mut self.components {
            c.component.zero_stats();
        }
    }

    /// 確率的コンポーネントの生成器を再シード
    pub fn reset_generators(&mut self, seed: u64) {
        for (i, c) in self.components.iter_mut().enumerate() {
            c.component.reset_generator(seed.wrapping_add(i as u64));
        }
    }

    /// 構造を一意に表す文字列（計算キャッシュの互換性判定用）
    pub fn signature(&self) -> String {
        let mut s = format!("{}:{}", self.input.name, self.input.dim);
        for c in &self.components {
            s.push_str(&format!(
                "|{}:{}({}->{})",
                c.name,
                c.component.type_name(),
                c.component.input_dim(),
                c.component.output_dim()
            ));
        }
        for o in &self.outputs {
            s.push_str(&format!("|{}@{}:{}", o.name, o.tap, o.objective_type));
        }
        s
    }
}
