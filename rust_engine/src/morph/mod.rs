//! Morph 变形系统
//!
//! 解码得到的 Morph 定义与运行时权重。顶点 / UV / 材质偏移只保存数据，
//! 由外部蒙皮与渲染阶段消费；骨骼 Morph 与组 Morph 在运行时内生效。

mod manager;

pub use manager::MorphWeights;

use glam::{Quat, Vec3, Vec4};

/// 组 / 翻转 Morph 的成员
#[derive(Clone, Debug, PartialEq)]
pub struct GroupOffset {
    pub morph: usize,
    pub ratio: f32,
}

/// 顶点 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct VertexOffset {
    pub vertex: u32,
    pub offset: Vec3,
}

/// 骨骼 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct BoneOffset {
    pub bone: usize,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// UV Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct UvOffset {
    pub vertex: u32,
    pub offset: Vec4,
}

/// 材质 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialOffset {
    /// `None` 表示作用于全部材质
    pub material: Option<usize>,
    /// 0 乘算，1 加算
    pub operation: u8,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_strength: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_tint: Vec4,
    pub environment_tint: Vec4,
    pub toon_tint: Vec4,
}

/// 冲量 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct ImpulseOffset {
    pub rigid_body: usize,
    pub local: bool,
    pub velocity: Vec3,
    pub torque: Vec3,
}

/// 按类型区分的偏移表
#[derive(Clone, Debug, PartialEq)]
pub enum MorphOffsets {
    Group(Vec<GroupOffset>),
    Vertex(Vec<VertexOffset>),
    Bone(Vec<BoneOffset>),
    /// `channel` 0 为基础 UV，1..=4 为追加 UV
    Uv { channel: u8, offsets: Vec<UvOffset> },
    Material(Vec<MaterialOffset>),
    Flip(Vec<GroupOffset>),
    Impulse(Vec<ImpulseOffset>),
}

impl MorphOffsets {
    pub fn len(&self) -> usize {
        match self {
            MorphOffsets::Group(v) | MorphOffsets::Flip(v) => v.len(),
            MorphOffsets::Vertex(v) => v.len(),
            MorphOffsets::Bone(v) => v.len(),
            MorphOffsets::Uv { offsets, .. } => offsets.len(),
            MorphOffsets::Material(v) => v.len(),
            MorphOffsets::Impulse(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Morph 定义
#[derive(Clone, Debug, PartialEq)]
pub struct MorphDef {
    pub name: String,
    pub name_en: String,
    /// 操作面板（PMD 的眉 / 目 / 口 / 其他，PMX 同义）
    pub panel: u8,
    pub offsets: MorphOffsets,
}
