//! MMD Engine - Rust 实现的 MMD 动作与物理运行时
//!
//! 提供：
//! - VMD 动作 / PMX、PMD 模型结构数据的二进制解析
//! - 复刻 MMD 逐轴三次贝塞尔插值的关键帧引擎
//! - 轨道绑定（部分失败可报告）与多片段序列
//! - 骨骼 ⇄ 刚体双向同步的物理桥（临时数学对象走对象池）

pub mod animation;
pub mod binary;
pub mod model;
pub mod morph;
pub mod physics;
pub mod skeleton;

pub use animation::{
    decode_vmd, encode_vmd, AnimationSequence, BindInfo, BindResult, BindTarget, BindWarning,
    Clip, ClipInstance, MotionDecodeTask, RawMotion, Track,
};
pub use model::{decode_model, ModelDecodeTask, ModelRuntime, MotionModel};
pub use morph::MorphWeights;
pub use physics::{PhysicsBridge, PhysicsConfig, ResourcePool};
pub use skeleton::{GrantSolver, IkSolver, Skeleton};

use thiserror::Error;

/// 二进制解析失败的具体原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorReason {
    #[error("bad magic header")]
    BadMagic,

    #[error("unsupported version {0}")]
    UnsupportedVersion(String),

    #[error("truncated record: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("length {0} out of range")]
    LengthOutOfRange(i64),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// 二进制解析错误，带出错位置的字节偏移
#[derive(Error, Debug, Clone, PartialEq)]
#[error("parse error at byte offset {offset}: {reason}")]
pub struct ParseError {
    pub offset: usize,
    pub reason: ParseErrorReason,
}

impl ParseError {
    pub fn new(offset: usize, reason: ParseErrorReason) -> Self {
        Self { offset, reason }
    }
}

/// 物理桥构建失败（数据损坏，不可逐帧恢复）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsConfigError {
    #[error("rigid body {body} has invalid shape: {reason}")]
    InvalidShape { body: usize, reason: String },

    #[error("rigid body {body} has invalid mass {mass}")]
    InvalidMass { body: usize, mass: f32 },

    #[error("constraint {constraint} references missing rigid body {body}")]
    InvalidBodyReference { constraint: usize, body: usize },
}

/// 物理配置文档无效
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("physics config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("physics config: unit_step must be positive, got {0}")]
    InvalidUnitStep(f32),
}

#[derive(Error, Debug)]
pub enum MmdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    PhysicsConfig(#[from] PhysicsConfigError),

    #[error(transparent)]
    Track(#[from] animation::TrackError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Container error: {0}")]
    Container(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
