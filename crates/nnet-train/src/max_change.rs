//! max-change 付きのパラメータ更新
//!
//! delta の大きさをコンポーネント単位、続いて全体で制限しながら
//! `nnet += scale_adding * delta` を行う。delta 自体は変更しない。

use nnet_core::Nnet;

/// max-change の適用回数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaxChangeStats {
    /// 更新可能コンポーネントごとの適用回数（`Nnet::updatable_components` 順）
    pub per_component: Vec<u64>,
    /// 全体の max-change の適用回数
    pub global: u64,
    /// 更新を試みた回数（backstitch では 1 ミニバッチで 2 回数える）
    pub num_updates: u64,
}

impl MaxChangeStats {
    pub fn new(num_updatable_components: usize) -> Self {
        Self {
            per_component: vec![0; num_updatable_components],
            global: 0,
            num_updates: 0,
        }
    }

    fn percent(&self, count: u64) -> f64 {
        if self.num_updates == 0 {
            0.0
        } else {
            100.0 * count as f64 / self.num_updates as f64
        }
    }

    /// コンポーネントごとの適用率（%）
    pub fn per_component_percent(&self) -> Vec<f64> {
        self.per_component.iter().map(|&c| self.percent(c)).collect()
    }

    /// 全体の適用率（%）
    pub fn global_percent(&self) -> f64 {
        self.percent(self.global)
    }

    /// 適用率をログに出力
    pub fn print(&self, nnet: &Nnet) {
        for ((name, _), &count) in nnet.updatable_components().zip(&self.per_component) {
            if count > 0 {
                log::info!(
                    "For {name}, per-component max-change was enforced {:.2} % of the time.",
                    self.percent(count)
                );
            }
        }
        if self.global > 0 {
            log::info!(
                "The global max-change was enforced {:.2} % of the time.",
                self.global_percent()
            );
        }
    }
}

/// `nnet += scale_adding * delta` を max-change 付きで行う
///
/// 1. 更新可能コンポーネントごとに `|delta_c| * |scale_adding|` が
///    `max_change_c * max_change_scale` を超えたら係数で抑える（`max_change_c <= 0` は無効）。
/// 2. 抑えた後の全体ノルムが `max_param_change * max_change_scale` を超えたら
///    全体を一様に抑える（`max_param_change == 0` は無効）。
///
/// 統計だけを持つコンポーネントは全体の係数のみで加算する。
/// ノルムが有限でない場合は加算せず `false` を返す。呼び出し側はそのとき delta を
/// 破棄し、成功時は momentum 等の係数で delta を縮小する。
pub fn update_nnet_with_max_change(
    delta: &Nnet,
    max_param_change: f32,
    max_change_scale: f32,
    scale_adding: f32,
    nnet: &mut Nnet,
    stats: &mut MaxChangeStats,
) -> bool {
    stats.num_updates += 1;
    let num_updatable = delta.num_updatable_components();
    if stats.per_component.len() != num_updatable {
        stats.per_component.resize(num_updatable, 0);
    }

    let abs_scale = scale_adding.abs() as f64;
    let max_change_scale = max_change_scale as f64;
    let mut scale_factors = vec![1.0f64; num_updatable];
    let mut param_delta_squared = 0.0f64;
    let mut num_component_clipped = 0;
    for (u, (name, c)) in delta.updatable_components().enumerate() {
        let dot = c.dot_product(c) as f64;
        let param_delta = dot.sqrt() * abs_scale;
        if !param_delta.is_finite() {
            log::warn!("Parameter change for component {name} is not finite, will not apply.");
            return false;
        }
        let max_change = c.max_change() as f64;
        if max_change > 0.0 && param_delta > max_change * max_change_scale {
            scale_factors[u] = max_change * max_change_scale / param_delta;
            num_component_clipped += 1;
        }
        param_delta_squared += scale_factors[u] * scale_factors[u] * dot;
    }

    let param_delta = param_delta_squared.sqrt() * abs_scale;
    if !param_delta.is_finite() {
        log::warn!("Infinite parameter change, will not apply.");
        return false;
    }
    // 加算が確定してから数える
    for (count, &f) in stats.per_component.iter_mut().zip(&scale_factors) {
        if f != 1.0 {
            *count += 1;
        }
    }
    let mut scale = 1.0f64;
    let bound = max_param_change as f64 * max_change_scale;
    if max_param_change != 0.0 && param_delta > bound {
        scale = bound / param_delta;
        stats.global += 1;
    }
    if scale != 1.0 || num_component_clipped > 0 {
        log::debug!(
            "Global max-change factor was {scale} while per-component max-change factors were {:?}",
            scale_factors
        );
    }

    let mut u = 0;
    for i in 0..delta.num_components() {
        let src = delta.component(i);
        if src.as_updatable().is_some() {
            let alpha = (scale_factors[u] * scale * scale_adding as f64) as f32;
            if alpha != 0.0 {
                nnet.component_mut(i).add(alpha, src);
            }
            u += 1;
        } else {
            nnet.component_mut(i).add(scale as f32, src);
        }
    }
    true
}
