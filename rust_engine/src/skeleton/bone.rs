//! 骨骼节点

use glam::{Mat4, Quat, Vec3};

use crate::model::BoneDef;

/// 运行时骨骼
#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub transform_level: i32,
    pub after_physics: bool,

    /// 相对父骨骼的静止偏移
    pub rest_offset: Vec3,
    /// 逆绑定矩阵
    pub inverse_bind: Mat4,

    // 动画状态
    pub animation_translate: Vec3,
    pub animation_rotate: Quat,
    pub scale: Vec3,
    pub ik_enabled: bool,

    // 变换结果
    pub local_transform: Mat4,
    pub world_transform: Mat4,
}

impl Bone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            transform_level: 0,
            after_physics: false,
            rest_offset: Vec3::ZERO,
            inverse_bind: Mat4::IDENTITY,
            animation_translate: Vec3::ZERO,
            animation_rotate: Quat::IDENTITY,
            scale: Vec3::ONE,
            ik_enabled: true,
            local_transform: Mat4::IDENTITY,
            world_transform: Mat4::IDENTITY,
        }
    }

    pub fn from_def(def: &BoneDef) -> Self {
        let mut bone = Self::new(def.name.clone());
        bone.parent = def.parent;
        bone.transform_level = def.transform_level;
        bone.after_physics = def.after_physics();
        bone.rest_offset = def.rest_local_offset;
        // 静止时世界变换只有平移
        bone.inverse_bind = Mat4::from_translation(-def.position);
        bone.local_transform = Mat4::from_translation(def.rest_local_offset);
        bone.world_transform = Mat4::from_translation(def.position);
        bone
    }

    /// 回到静止姿势
    pub fn reset_animation(&mut self) {
        self.animation_translate = Vec3::ZERO;
        self.animation_rotate = Quat::IDENTITY;
        self.scale = Vec3::ONE;
    }

    /// 平移 = rest_offset + animation_translate
    pub fn update_local_transform(&mut self) {
        self.local_transform = Mat4::from_scale_rotation_translation(
            self.scale,
            self.animation_rotate,
            self.rest_offset + self.animation_translate,
        );
    }

    pub fn world_position(&self) -> Vec3 {
        self.world_transform.w_axis.truncate()
    }

    pub fn world_rotation(&self) -> Quat {
        let (_, rotation, _) = self.world_transform.to_scale_rotation_translation();
        rotation
    }

    /// 蒙皮矩阵 = 当前世界变换 * 逆绑定矩阵
    pub fn skinning_matrix(&self) -> Mat4 {
        self.world_transform * self.inverse_bind
    }
}

impl Default for Bone {
    fn default() -> Self {
        Self::new(String::new())
    }
}
