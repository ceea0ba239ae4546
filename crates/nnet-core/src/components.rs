//! ネットワークのコンポーネント
//!
//! 更新可能かどうかは型の同一性ではなく [`Component::as_updatable`] による
//! ケイパビリティ問い合わせで判定する。

use crate::matrix::Matrix;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::cell::RefCell;
use std::fmt::Debug;

/// コンポーネント共通インターフェイス
pub trait Component: Debug {
    /// 種別名（ログ・シグネチャ用）
    fn type_name(&self) -> &'static str;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// 順伝播
    ///
    /// 逆伝播で必要なメモ（dropout のマスク等）があれば 2 番目に返す。
    fn propagate(&self, input: &Matrix) -> (Matrix, Option<Matrix>);

    /// 逆伝播（入力側の微分を返す）
    fn backprop(
        &self,
        input: &Matrix,
        output: &Matrix,
        memo: Option<&Matrix>,
        out_deriv: &Matrix,
    ) -> Matrix;

    /// 勾配の蓄積先として呼ばれる（`self` は delta 側のコンポーネント）
    fn update_from(&mut self, _input: &Matrix, _out_deriv: &Matrix) {}

    /// 順伝播の統計を蓄積
    fn store_stats(&mut self, _output: &Matrix) {}

    /// 蓄積済み統計をゼロにする
    fn zero_stats(&mut self) {}

    /// 統計（非更新コンポーネント）の参照
    fn stats(&self) -> Option<&ComponentStats> {
        None
    }

    /// パラメータ（更新可能）または統計を `alpha` 倍
    fn scale(&mut self, alpha: f32);

    /// `self += alpha * other`（パラメータまたは統計）
    fn add(&mut self, alpha: f32, other: &dyn Component);

    /// natural gradient の統計更新を凍結/解除
    fn freeze_natural_gradient(&mut self, _freeze: bool) {}

    /// natural gradient の統計が凍結中か
    fn is_natural_gradient_frozen(&self) -> bool {
        false
    }

    /// 乱数生成器を再シード
    fn reset_generator(&mut self, _seed: u64) {}

    fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        None
    }

    fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        None
    }

    fn box_clone(&self) -> Box<dyn Component>;
}

impl Clone for Box<dyn Component> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// 更新可能コンポーネントのケイパビリティ
///
/// パラメータは 1 本の連続領域として公開する。
pub trait UpdatableComponent {
    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    /// コンポーネント単位の max-change（0 以下なら無効）
    fn max_change(&self) -> f32;

    /// パラメータの内積
    fn dot_product(&self, other: &dyn UpdatableComponent) -> f32 {
        self.params()
            .iter()
            .zip(other.params())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// `params += alpha * other.params`
    fn add_params(&mut self, alpha: f32, other: &dyn UpdatableComponent) {
        debug_assert_eq!(self.params().len(), other.params().len());
        for (p, o) in self.params_mut().iter_mut().zip(other.params()) {
            *p += alpha * o;
        }
    }

    fn scale_params(&mut self, alpha: f32) {
        if alpha == 0.0 {
            self.params_mut().fill(0.0);
        } else {
            self.params_mut().iter_mut().for_each(|p| *p *= alpha);
        }
    }
}

/// 非線形コンポーネントの活性統計
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComponentStats {
    /// 蓄積したフレーム数
    pub count: f64,
    /// 次元ごとの出力値の和
    pub value_sum: Vec<f64>,
}

impl ComponentStats {
    fn new(dim: usize) -> Self {
        Self {
            count: 0.0,
            value_sum: vec![0.0; dim],
        }
    }

    fn scale(&mut self, alpha: f32) {
        if alpha == 0.0 {
            self.count = 0.0;
            self.value_sum.fill(0.0);
            return;
        }
        let alpha = alpha as f64;
        self.count *= alpha;
        self.value_sum.iter_mut().for_each(|v| *v *= alpha);
    }

    fn add(&mut self, alpha: f32, other: &ComponentStats) {
        let alpha = alpha as f64;
        self.count += alpha * other.count;
        for (v, o) in self.value_sum.iter_mut().zip(&other.value_sum) {
            *v += alpha * o;
        }
    }
}

// ============================================================================
// AffineComponent
// ============================================================================

/// 行単位の natural gradient 風前処理
///
/// 出力行ごとに勾配の二乗平均の移動平均を持ち、行ごとのスケールを平均 1 に
/// 正規化して掛ける。凍結中は統計を更新せず、直前の統計で前処理する。
#[derive(Debug, Clone, PartialEq)]
struct RowPreconditioner {
    rms: Vec<f32>,
    initialized: bool,
    frozen: bool,
}

impl RowPreconditioner {
    const DECAY: f32 = 0.9;
    const EPSILON: f32 = 1e-10;

    fn new(rows: usize) -> Self {
        Self {
            rms: vec![0.0; rows],
            initialized: false,
            frozen: false,
        }
    }

    fn precondition(&mut self, grad: &mut Matrix) {
        let cols = grad.num_cols().max(1) as f32;
        if !self.frozen {
            for (r, rms) in self.rms.iter_mut().enumerate() {
                let sq = grad.row(r).iter().map(|x| x * x).sum::<f32>() / cols;
                *rms = if self.initialized {
                    Self::DECAY * *rms + (1.0 - Self::DECAY) * sq
                } else {
                    sq
                };
            }
            self.initialized = true;
        }
        if !self.initialized {
            return;
        }
        let factors: Vec<f32> = self
            .rms
            .iter()
            .map(|&v| 1.0 / (v + Self::EPSILON).sqrt())
            .collect();
        let mean = factors.iter().sum::<f32>() / factors.len().max(1) as f32;
        if !(mean.is_finite() && mean > 0.0) {
            return;
        }
        for (r, f) in factors.iter().enumerate() {
            let s = f / mean;
            grad.row_mut(r).iter_mut().for_each(|x| *x *= s);
        }
    }
}

/// 全結合層 `y = x Wᵀ + b`
///
/// パラメータは `[W (out × in, 行優先), b (out)]` の連続領域。
#[derive(Debug, Clone, PartialEq)]
pub struct AffineComponent {
    input_dim: usize,
    output_dim: usize,
    params: Vec<f32>,
    learning_rate: f32,
    max_change: f32,
    preconditioner: Option<RowPreconditioner>,
}

impl AffineComponent {
    /// 正規分布（標準偏差 1/sqrt(input_dim)）で初期化
    pub fn new_random<R: Rng>(
        input_dim: usize,
        output_dim: usize,
        learning_rate: f32,
        max_change: f32,
        natural_gradient: bool,
        rng: &mut R,
    ) -> Self {
        let stddev = 1.0 / (input_dim.max(1) as f32).sqrt();
        let mut params = vec![0.0; output_dim * input_dim + output_dim];
        for p in params.iter_mut().take(output_dim * input_dim) {
            // Box-Muller
            let u1: f32 = rng.random_range(f32::EPSILON..1.0);
            let u2: f32 = rng.random();
            *p = stddev * (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
        }
        Self::from_params(input_dim, output_dim, params, learning_rate, max_change, natural_gradient)
    }

    /// 既知のパラメータから作成（`params.len()` は `out * in + out`）
    pub fn from_params(
        input_dim: usize,
        output_dim: usize,
        params: Vec<f32>,
        learning_rate: f32,
        max_change: f32,
        natural_gradient: bool,
    ) -> Self {
        debug_assert_eq!(params.len(), output_dim * input_dim + output_dim);
        Self {
            input_dim,
            output_dim,
            params,
            learning_rate,
            max_change,
            preconditioner: natural_gradient.then(|| RowPreconditioner::new(output_dim)),
        }
    }

    fn weight_len(&self) -> usize {
        self.input_dim * self.output_dim
    }

    /// 重み行列 W (out × in)
    pub fn linear_params(&self) -> Matrix {
        let w = self.params[..self.weight_len()].to_vec();
        Matrix::from_vec(self.output_dim, self.input_dim, w).unwrap_or_default()
    }

    pub fn bias_params(&self) -> &[f32] {
        &self.params[self.weight_len()..]
    }
}

impl Component for AffineComponent {
    fn type_name(&self) -> &'static str {
        "Affine"
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn propagate(&self, input: &Matrix) -> (Matrix, Option<Matrix>) {
        let mut out = input.matmul_trans(&self.linear_params());
        let bias = self.bias_params();
        for r in 0..out.num_rows() {
            for (o, b) in out.row_mut(r).iter_mut().zip(bias) {
                *o += b;
            }
        }
        (out, None)
    }

    fn backprop(
        &self,
        _input: &Matrix,
        _output: &Matrix,
        _memo: Option<&Matrix>,
        out_deriv: &Matrix,
    ) -> Matrix {
        out_deriv.matmul(&self.linear_params())
    }

    fn update_from(&mut self, input: &Matrix, out_deriv: &Matrix) {
        let mut grad_w = out_deriv.trans_matmul(input);
        if let Some(p) = self.preconditioner.as_mut() {
            p.precondition(&mut grad_w);
        }
        let grad_b = out_deriv.column_sums();
        let lr = self.learning_rate;
        let wl = self.weight_len();
        for (p, g) in self.params[..wl].iter_mut().zip(grad_w.as_slice()) {
            *p += lr * g;
        }
        for (p, g) in self.params[wl..].iter_mut().zip(&grad_b) {
            *p += lr * g;
        }
    }

    fn scale(&mut self, alpha: f32) {
        self.scale_params(alpha);
    }

    fn add(&mut self, alpha: f32, other: &dyn Component) {
        if let Some(o) = other.as_updatable() {
            self.add_params(alpha, o);
        }
    }

    fn freeze_natural_gradient(&mut self, freeze: bool) {
        if let Some(p) = self.preconditioner.as_mut() {
            p.frozen = freeze;
        }
    }

    fn is_natural_gradient_frozen(&self) -> bool {
        self.preconditioner.as_ref().is_some_and(|p| p.frozen)
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        Some(self)
    }

    fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        Some(self)
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

impl UpdatableComponent for AffineComponent {
    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn max_change(&self) -> f32 {
        self.max_change
    }
}

// ============================================================================
// 非線形コンポーネント
// ============================================================================

/// ReLU（活性統計を蓄積できる）
#[derive(Debug, Clone, PartialEq)]
pub struct RectifiedLinearComponent {
    dim: usize,
    stats: ComponentStats,
}

impl RectifiedLinearComponent {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            stats: ComponentStats::new(dim),
        }
    }
}

impl Component for RectifiedLinearComponent {
    fn type_name(&self) -> &'static str {
        "RectifiedLinear"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: &Matrix) -> (Matrix, Option<Matrix>) {
        let mut out = input.clone();
        out.as_mut_slice().iter_mut().for_each(|x| *x = x.max(0.0));
        (out, None)
    }

    fn backprop(
        &self,
        _input: &Matrix,
        output: &Matrix,
        _memo: Option<&Matrix>,
        out_deriv: &Matrix,
    ) -> Matrix {
        let mut d = out_deriv.clone();
        for (g, y) in d.as_mut_slice().iter_mut().zip(output.as_slice()) {
            if *y <= 0.0 {
                *g = 0.0;
            }
        }
        d
    }

    fn store_stats(&mut self, output: &Matrix) {
        self.stats.count += output.num_rows() as f64;
        for (s, v) in self.stats.value_sum.iter_mut().zip(output.column_sums()) {
            *s += v as f64;
        }
    }

    fn zero_stats(&mut self) {
        self.stats = ComponentStats::new(self.dim);
    }

    fn stats(&self) -> Option<&ComponentStats> {
        Some(&self.stats)
    }

    fn scale(&mut self, alpha: f32) {
        self.stats.scale(alpha);
    }

    fn add(&mut self, alpha: f32, other: &dyn Component) {
        if let Some(s) = other.stats() {
            self.stats.add(alpha, s);
        }
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

/// 行ごとの log-softmax
#[derive(Debug, Clone, PartialEq)]
pub struct LogSoftmaxComponent {
    dim: usize,
}

impl LogSoftmaxComponent {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Component for LogSoftmaxComponent {
    fn type_name(&self) -> &'static str {
        "LogSoftmax"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: &Matrix) -> (Matrix, Option<Matrix>) {
        let mut out = input.clone();
        for r in 0..out.num_rows() {
            let row = out.row_mut(r);
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let lse = max + row.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
            row.iter_mut().for_each(|x| *x -= lse);
        }
        (out, None)
    }

    fn backprop(
        &self,
        _input: &Matrix,
        output: &Matrix,
        _memo: Option<&Matrix>,
        out_deriv: &Matrix,
    ) -> Matrix {
        // dx = dy - softmax(x) * sum(dy)
        let mut d = out_deriv.clone();
        for r in 0..d.num_rows() {
            let total: f32 = out_deriv.row(r).iter().sum();
            for (g, y) in d.row_mut(r).iter_mut().zip(output.row(r)) {
                *g -= y.exp() * total;
            }
        }
        d
    }

    fn scale(&mut self, _alpha: f32) {}

    fn add(&mut self, _alpha: f32, _other: &dyn Component) {}

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

/// Dropout（inverted dropout）
///
/// 生成器はコンポーネント内部に持ち、`reset_generator` で再シードできる。
#[derive(Debug, Clone)]
pub struct DropoutComponent {
    dim: usize,
    proportion: f32,
    rng: RefCell<Xoshiro256PlusPlus>,
}

impl DropoutComponent {
    pub fn new(dim: usize, proportion: f32, seed: u64) -> Self {
        Self {
            dim,
            proportion: proportion.clamp(0.0, 0.99),
            rng: RefCell::new(Xoshiro256PlusPlus::seed_from_u64(seed)),
        }
    }
}

impl Component for DropoutComponent {
    fn type_name(&self) -> &'static str {
        "Dropout"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: &Matrix) -> (Matrix, Option<Matrix>) {
        let keep = 1.0 - self.proportion;
        let mut mask = Matrix::zeros(input.num_rows(), input.num_cols());
        {
            let mut rng = self.rng.borrow_mut();
            for m in mask.as_mut_slice() {
                *m = if rng.random::<f32>() < keep { 1.0 / keep } else { 0.0 };
            }
        }
        let mut out = input.clone();
        for (o, m) in out.as_mut_slice().iter_mut().zip(mask.as_slice()) {
            *o *= m;
        }
        (out, Some(mask))
    }

    fn backprop(
        &self,
        _input: &Matrix,
        _output: &Matrix,
        memo: Option<&Matrix>,
        out_deriv: &Matrix,
    ) -> Matrix {
        let mut d = out_deriv.clone();
        if let Some(mask) = memo {
            for (g, m) in d.as_mut_slice().iter_mut().zip(mask.as_slice()) {
                *g *= m;
            }
        }
        d
    }

    fn scale(&mut self, _alpha: f32) {}

    fn add(&mut self, _alpha: f32, _other: &dyn Component) {}

    fn reset_generator(&mut self, seed: u64) {
        *self.rng.get_mut() = Xoshiro256PlusPlus::seed_from_u64(seed);
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affine_2x2() -> AffineComponent {
        // W = [[1, 2], [3, 4]], b = [0.5, -0.5]
        AffineComponent::from_params(2, 2, vec![1.0, 2.0, 3.0, 4.0, 0.5, -0.5], 1.0, 0.0, false)
    }

    #[test]
    fn test_affine_propagate() {
        let a = affine_2x2();
        let x = Matrix::from_rows(&[vec![1.0, 1.0]]).unwrap();
        let (y, memo) = a.propagate(&x);
        assert!(memo.is_none());
        assert_eq!(y.row(0), &[3.5, 6.5]);
    }

    #[test]
    fn test_affine_update_accumulates_gradient() {
        let mut delta = affine_2x2();
        delta.scale(0.0);
        let x = Matrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let dy = Matrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        delta.update_from(&x, &dy);
        // grad W = dyᵀ x, grad b = dy
        assert_eq!(delta.params(), &[1.0, 2.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_updatable_capability_query() {
        let a = affine_2x2();
        let r = RectifiedLinearComponent::new(2);
        assert!(a.as_updatable().is_some());
        assert!(r.as_updatable().is_none());
        assert!((a.dot_product(&a) - (1.0 + 4.0 + 9.0 + 16.0 + 0.25 + 0.25)).abs() < 1e-6);
    }

    #[test]
    fn test_frozen_preconditioner_keeps_stats() {
        let mut a = AffineComponent::from_params(1, 2, vec![0.0; 4], 1.0, 0.0, true);
        let x = Matrix::from_rows(&[vec![1.0]]).unwrap();
        a.update_from(&x, &Matrix::from_rows(&[vec![1.0, 2.0]]).unwrap());
        let before = a.preconditioner.clone();

        a.freeze_natural_gradient(true);
        assert!(a.is_natural_gradient_frozen());
        a.update_from(&x, &Matrix::from_rows(&[vec![10.0, -3.0]]).unwrap());
        assert_eq!(a.preconditioner.as_ref().unwrap().rms, before.unwrap().rms);

        a.freeze_natural_gradient(false);
        assert!(!a.is_natural_gradient_frozen());
    }

    #[test]
    fn test_log_softmax_rows_normalized() {
        let c = LogSoftmaxComponent::new(3);
        let x = Matrix::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        let (y, _) = c.propagate(&x);
        let total: f32 = y.row(0).iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_relu_stats_scale_and_add() {
        let mut r = RectifiedLinearComponent::new(2);
        r.store_stats(&Matrix::from_rows(&[vec![1.0, 0.0], vec![3.0, 2.0]]).unwrap());
        assert_eq!(r.stats().unwrap().count, 2.0);
        assert_eq!(r.stats().unwrap().value_sum, vec![4.0, 2.0]);

        let mut dest = RectifiedLinearComponent::new(2);
        dest.add(0.5, &r);
        assert_eq!(dest.stats().unwrap().count, 1.0);

        r.scale(0.0);
        assert_eq!(r.stats().unwrap().value_sum, vec![0.0, 0.0]);
    }

    #[test]
    fn test_dropout_reset_generator_is_deterministic() {
        let mut d = DropoutComponent::new(8, 0.5, 1);
        let x = Matrix::from_vec(4, 8, vec![1.0; 32]).unwrap();
        d.reset_generator(42);
        let (_, m1) = d.propagate(&x);
        d.reset_generator(42);
        let (_, m2) = d.propagate(&x);
        assert_eq!(m1, m2);
        // 再シードしなければ別のマスクになる
        let (_, m3) = d.propagate(&x);
        assert_ne!(m2, m3);
    }
}
