//! MMD 物理配置
//!
//! 所有参数扁平化。宿主可以直接修改默认值，也可以用 JSON 覆盖其中一部分。

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::{ConfigError, Result};

/// 物理配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    // ========== 重力 ==========
    /// 重力 Y 分量（负数向下），默认 -98.0（MMD 标准）
    pub gravity_y: f32,

    // ========== 模拟参数 ==========
    /// 固定子步长（秒），默认 1/65
    pub unit_step: f32,
    /// 每次 step 最多执行的子步数，默认 3，超出的时间直接丢弃
    pub max_sub_step_count: u32,
    /// 求解器迭代次数，默认 4
    pub solver_iterations: usize,
    /// 内部 PGS 迭代次数，默认 1
    pub pgs_iterations: usize,

    // ========== 刚体 ==========
    /// 线性阻尼缩放（乘以模型原值），默认 1.0
    pub linear_damping_scale: f32,
    /// 角速度阻尼缩放（乘以模型原值），默认 1.0
    pub angular_damping_scale: f32,
    /// 质量缩放（乘以模型原值），默认 1.0
    pub mass_scale: f32,

    // ========== 弹簧 ==========
    /// 线性弹簧刚度缩放，默认 1.0
    pub linear_spring_stiffness_scale: f32,
    /// 角度弹簧刚度缩放，默认 1.0
    pub angular_spring_stiffness_scale: f32,
    /// 线性弹簧阻尼系数，阻尼 = sqrt(刚度 * 此值)，默认 0.1
    pub linear_spring_damping_factor: f32,
    /// 角度弹簧阻尼系数，阻尼 = sqrt(刚度 * 此值)，默认 0.1
    pub angular_spring_damping_factor: f32,

    // ========== 速度限制 ==========
    /// 每次 step 之后的最大线速度，默认 1000.0
    pub max_linear_velocity: f32,
    /// 每次 step 之后的最大角速度（弧度/秒），默认 100.0
    pub max_angular_velocity: f32,

    // ========== 调试 ==========
    /// 是否启用关节，默认 true
    pub joints_enabled: bool,
    /// 是否输出逐刚体调试日志，默认 false
    pub debug_log: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity_y: -98.0,

            // 65 Hz 子步，一帧最多 3 步
            unit_step: 1.0 / 65.0,
            max_sub_step_count: 3,
            solver_iterations: 4,
            pgs_iterations: 1,

            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,
            mass_scale: 1.0,

            linear_spring_stiffness_scale: 1.0,
            angular_spring_stiffness_scale: 1.0,
            linear_spring_damping_factor: 0.1,
            angular_spring_damping_factor: 0.1,

            // 只用来防止穿透后弹飞，正常运动不会触及
            max_linear_velocity: 1000.0,
            max_angular_velocity: 100.0,

            joints_enabled: true,
            debug_log: false,
        }
    }
}

impl PhysicsConfig {
    /// 从 JSON 读取，缺省字段使用默认值
    pub fn from_json(text: &str) -> Result<Self> {
        let config: PhysicsConfig = serde_json::from_str(text).map_err(ConfigError::Json)?;
        if config.unit_step.is_nan() || config.unit_step <= 0.0 {
            return Err(ConfigError::InvalidUnitStep(config.unit_step).into());
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self).map_err(ConfigError::Json)?)
    }
}

/// 全局配置实例
static PHYSICS_CONFIG: Lazy<RwLock<PhysicsConfig>> =
    Lazy::new(|| RwLock::new(PhysicsConfig::default()));

/// 获取当前配置（只读）
pub fn get_config() -> PhysicsConfig {
    PHYSICS_CONFIG
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: PhysicsConfig) {
    *PHYSICS_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(PhysicsConfig::default());
}
