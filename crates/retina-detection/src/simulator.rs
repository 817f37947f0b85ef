//! 本地模拟检测
//!
//! 远程服务不可用时给出形式完整的结论，模型版本固定为
//! [`SIMULATED_MODEL_VERSION`]，不具备临床意义。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use retina_core::{DrStage, SIMULATED_MODEL_VERSION};
use std::sync::Mutex;

use crate::delegate::Verdict;

/// 有病变的概率
const DR_PROBABILITY: f64 = 0.3;
const MACULAR_EDEMA_PROBABILITY: f64 = 0.4;
const HEMORRHAGES_PROBABILITY: f64 = 0.6;
const EXUDATES_PROBABILITY: f64 = 0.5;
const MICROANEURYSMS_PROBABILITY: f64 = 0.7;

/// 模拟检测器
pub struct Simulator {
    rng: Mutex<StdRng>,
}

impl Simulator {
    /// 以系统随机源作为种子
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 固定种子，结果可复现
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn model_version(&self) -> &'static str {
        SIMULATED_MODEL_VERSION
    }

    pub fn simulate(&self) -> Verdict {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        simulate_with(&mut *rng)
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// 使用给定随机源生成一次结论
pub fn simulate_with<R: Rng>(rng: &mut R) -> Verdict {
    let has_dr = rng.gen_bool(DR_PROBABILITY);

    if !has_dr {
        return Verdict {
            has_dr: false,
            dr_stage: DrStage::NoDr,
            confidence: rng.gen_range(0.8..=1.0),
            has_macular_edema: false,
            has_hemorrhages: false,
            has_exudates: false,
            has_microaneurysms: false,
        };
    }

    let dr_stage = DrStage::POSITIVE[rng.gen_range(0..DrStage::POSITIVE.len())];
    Verdict {
        has_dr: true,
        dr_stage,
        confidence: rng.gen_range(0.7..=1.0),
        has_macular_edema: rng.gen_bool(MACULAR_EDEMA_PROBABILITY),
        has_hemorrhages: rng.gen_bool(HEMORRHAGES_PROBABILITY),
        has_exudates: rng.gen_bool(EXUDATES_PROBABILITY),
        has_microaneurysms: rng.gen_bool(MICROANEURYSMS_PROBABILITY),
    }
}
