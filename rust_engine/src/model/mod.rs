//! 模型结构数据
//!
//! PMX / PMD 解码得到的骨骼、Morph、刚体与关节定义。所有位置与旋转在解码时
//! 已转换为右手坐标系。

mod loader;
mod pmd;
mod pmx;
mod runtime;

pub use loader::{decode_model, ModelDecodeTask};
pub use runtime::{ModelRuntime, ModelState};

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use crate::morph::MorphDef;

/// 源文件格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelFormat {
    /// PMX 2.0 / 2.1
    Pmx(f32),
    Pmd,
}

/// PMX 骨骼标志位
pub mod bone_flags {
    pub const TAIL_IS_BONE: u16 = 0x0001;
    pub const ROTATABLE: u16 = 0x0002;
    pub const MOVABLE: u16 = 0x0004;
    pub const VISIBLE: u16 = 0x0008;
    pub const OPERABLE: u16 = 0x0010;
    pub const IK: u16 = 0x0020;
    pub const LOCAL_GRANT: u16 = 0x0080;
    pub const ROTATION_GRANT: u16 = 0x0100;
    pub const POSITION_GRANT: u16 = 0x0200;
    pub const FIXED_AXIS: u16 = 0x0400;
    pub const LOCAL_AXES: u16 = 0x0800;
    pub const AFTER_PHYSICS: u16 = 0x1000;
    pub const EXTERNAL_PARENT: u16 = 0x2000;
}

/// 付与（追加变换）参数
#[derive(Debug, Clone, PartialEq)]
pub struct GrantParam {
    pub target_bone: usize,
    pub source_bone: usize,
    pub ratio: f32,
    pub is_local: bool,
    pub affect_rotation: bool,
    pub affect_position: bool,
}

/// IK 链节
#[derive(Debug, Clone, PartialEq)]
pub struct IkLink {
    pub bone: usize,
    /// 角度限制 (下限, 上限)，已转换坐标系
    pub limits: Option<(Vec3, Vec3)>,
}

/// IK 参数
#[derive(Debug, Clone, PartialEq)]
pub struct IkParam {
    /// 末端效应骨骼
    pub target_bone: usize,
    pub iterations: u32,
    pub limit_angle: f32,
    pub links: Vec<IkLink>,
}

/// 骨骼定义
#[derive(Debug, Clone, PartialEq)]
pub struct BoneDef {
    pub index: usize,
    pub name: String,
    pub name_en: String,
    pub parent: Option<usize>,
    /// 模型空间位置
    pub position: Vec3,
    /// 相对父骨骼的静止偏移
    pub rest_local_offset: Vec3,
    pub transform_level: i32,
    pub flags: u16,
    pub grant: Option<GrantParam>,
    pub ik: Option<IkParam>,
    pub fixed_axis: Option<Vec3>,
}

impl BoneDef {
    pub fn new(index: usize, name: impl Into<String>, position: Vec3) -> Self {
        Self {
            index,
            name: name.into(),
            name_en: String::new(),
            parent: None,
            position,
            rest_local_offset: position,
            transform_level: 0,
            flags: bone_flags::ROTATABLE | bone_flags::VISIBLE | bone_flags::OPERABLE,
            grant: None,
            ik: None,
            fixed_axis: None,
        }
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn after_physics(&self) -> bool {
        self.has_flag(bone_flags::AFTER_PHYSICS)
    }
}

/// 刚体形状
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RigidBodyShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    /// `height` 为圆柱部分的全长
    Capsule { radius: f32, height: f32 },
}

/// 刚体物理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyKind {
    /// 跟随骨骼
    Kinematic,
    /// 完全由物理驱动
    Dynamic,
    /// 物理驱动旋转，位置对齐骨骼
    DynamicAligned,
}

impl RigidBodyKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RigidBodyKind::Kinematic),
            1 => Some(RigidBodyKind::Dynamic),
            2 => Some(RigidBodyKind::DynamicAligned),
            _ => None,
        }
    }
}

/// 平移 + 旋转
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl RigidTransform {
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self { translation, rotation }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    pub fn from_matrix(m: Mat4) -> Self {
        let (_, rotation, translation) = m.to_scale_rotation_translation();
        Self { translation, rotation }
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            translation: rotation * -self.translation,
            rotation,
        }
    }

    /// self ∘ other
    pub fn mul(&self, other: &RigidTransform) -> Self {
        Self {
            translation: self.translation + self.rotation * other.translation,
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }
}

/// 刚体定义
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyDef {
    pub name: String,
    pub bone: Option<usize>,
    pub shape: RigidBodyShape,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub friction: f32,
    pub restitution: f32,
    pub kind: RigidBodyKind,
    pub collision_group: u8,
    /// 位为 1 表示与该组碰撞
    pub collision_mask: u16,
    /// 模型空间位置与旋转
    pub position: Vec3,
    pub rotation: Quat,
    /// 相对骨骼静止世界变换的偏移
    pub local_offset: RigidTransform,
}

/// 6DOF 弹簧关节定义
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDef {
    pub name: String,
    pub body_a: usize,
    pub body_b: usize,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub spring_position: Vec3,
    pub spring_rotation: Vec3,
}

/// 解码后的模型
#[derive(Debug, Clone)]
pub struct MotionModel {
    pub format: ModelFormat,
    pub name: String,
    pub name_en: String,
    pub comment: String,
    pub vertex_count: usize,
    pub face_count: usize,
    pub texture_paths: Vec<String>,
    pub material_names: Vec<String>,
    pub bones: Vec<BoneDef>,
    pub morphs: Vec<MorphDef>,
    pub rigid_bodies: Vec<RigidBodyDef>,
    pub constraints: Vec<ConstraintDef>,
    /// 付与的应用顺序（GrantParam 列表，源骨骼先于目标骨骼）
    pub grant_order: Vec<GrantParam>,
    bone_index: HashMap<String, usize>,
    morph_index: HashMap<String, usize>,
}

impl MotionModel {
    pub fn new(format: ModelFormat, name: impl Into<String>) -> Self {
        Self {
            format,
            name: name.into(),
            name_en: String::new(),
            comment: String::new(),
            vertex_count: 0,
            face_count: 0,
            texture_paths: Vec::new(),
            material_names: Vec::new(),
            bones: Vec::new(),
            morphs: Vec::new(),
            rigid_bodies: Vec::new(),
            constraints: Vec::new(),
            grant_order: Vec::new(),
            bone_index: HashMap::new(),
            morph_index: HashMap::new(),
        }
    }

    /// 重建名称索引（同名时保留第一个）
    pub fn rebuild_index(&mut self) {
        self.bone_index.clear();
        for (i, bone) in self.bones.iter().enumerate() {
            self.bone_index.entry(bone.name.clone()).or_insert(i);
        }
        self.morph_index.clear();
        for (i, morph) in self.morphs.iter().enumerate() {
            self.morph_index.entry(morph.name.clone()).or_insert(i);
        }
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bone_index.get(name).copied()
    }

    pub fn find_morph(&self, name: &str) -> Option<usize> {
        self.morph_index.get(name).copied()
    }

    /// 骨骼静止时的世界变换（仅平移）
    pub fn bone_rest_transform(&self, bone: usize) -> RigidTransform {
        self.bones
            .get(bone)
            .map(|b| RigidTransform::new(b.position, Quat::IDENTITY))
            .unwrap_or_default()
    }
}

/// 左手 → 右手：翻转 Z 轴
pub(crate) fn flip_z(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.y, -v.z)
}

/// 左手旋转 → 右手旋转（等价于 `S * R * S`，S = diag(1, 1, -1)）
pub(crate) fn flip_rotation(q: Quat) -> Quat {
    Quat::from_xyzw(-q.x, -q.y, q.z, q.w)
}
