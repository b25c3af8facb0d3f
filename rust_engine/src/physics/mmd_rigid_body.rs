//! MMD 刚体封装
//!
//! 一个 [`RigidBodyDef`] 对应一个 Rapier 刚体和一个碰撞体，并记录刚体相对骨骼的
//! 固定偏移。骨骼 → 刚体（Kinematic）与刚体 → 骨骼（Dynamic / DynamicAligned）
//! 的同步都在这里完成，临时数学对象全部取自 [`ResourcePool`]。

use glam::{Mat4, Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use crate::model::{RigidBodyDef, RigidBodyKind, RigidBodyShape};
use crate::skeleton::Skeleton;
use crate::PhysicsConfigError;

use super::config::PhysicsConfig;
use super::pool::ResourcePool;

/// MMD 刚体
///
/// 封装 Rapier 的 RigidBody 和 Collider 句柄。
#[derive(Debug, Clone)]
pub struct MMDRigidBody {
    pub name: String,
    /// 在模型刚体表中的索引
    pub index: usize,
    pub bone: usize,
    pub kind: RigidBodyKind,
    pub group: u8,
    pub group_mask: u16,
    pub body_handle: RigidBodyHandle,
    pub collider_handle: ColliderHandle,
    /// 刚体相对于骨骼的偏移
    pub offset: Isometry<Real>,
    pub inv_offset: Isometry<Real>,
}

impl MMDRigidBody {
    /// 形状与质量检查
    pub fn validate(index: usize, def: &RigidBodyDef) -> Result<(), PhysicsConfigError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let reason = match def.shape {
            RigidBodyShape::Sphere { radius } if !positive(radius) => Some(format!("sphere radius {}", radius)),
            RigidBodyShape::Box { half_extents } if !half_extents.to_array().into_iter().all(positive) => {
                Some(format!("box half extents {:?}", half_extents))
            }
            RigidBodyShape::Capsule { radius, height } if !positive(radius) || !height.is_finite() || height < 0.0 => {
                Some(format!("capsule radius {} height {}", radius, height))
            }
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(PhysicsConfigError::InvalidShape { body: index, reason });
        }
        if !def.mass.is_finite() || def.mass < 0.0 {
            return Err(PhysicsConfigError::InvalidMass {
                body: index,
                mass: def.mass,
            });
        }
        Ok(())
    }

    /// 在物理世界中创建刚体与碰撞体
    ///
    /// `bone_world` 为关联骨骼当前的世界变换。
    pub fn create(
        index: usize,
        bone: usize,
        def: &RigidBodyDef,
        bone_world: Mat4,
        config: &PhysicsConfig,
        bodies: &mut RigidBodySet,
        colliders: &mut ColliderSet,
    ) -> Self {
        let offset = to_isometry(def.local_offset.translation, def.local_offset.rotation);
        let initial = mat4_to_isometry(bone_world) * offset;

        let body_type = match def.kind {
            RigidBodyKind::Kinematic => RigidBodyType::KinematicPositionBased,
            RigidBodyKind::Dynamic | RigidBodyKind::DynamicAligned => RigidBodyType::Dynamic,
        };
        let body = RigidBodyBuilder::new(body_type)
            .position(initial)
            .linear_damping(def.linear_damping * config.linear_damping_scale)
            .angular_damping(def.angular_damping * config.angular_damping_scale)
            .ccd_enabled(false)
            .can_sleep(false)
            .build();
        let body_handle = bodies.insert(body);
        let collider_handle =
            colliders.insert_with_parent(Self::build_collider(def, config), body_handle, bodies);

        Self {
            name: def.name.clone(),
            index,
            bone,
            kind: def.kind,
            group: def.collision_group,
            group_mask: def.collision_mask,
            body_handle,
            collider_handle,
            offset,
            inv_offset: offset.inverse(),
        }
    }

    fn build_collider(def: &RigidBodyDef, config: &PhysicsConfig) -> Collider {
        let shape = match def.shape {
            RigidBodyShape::Sphere { radius } => SharedShape::ball(radius),
            RigidBodyShape::Box { half_extents } => {
                SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            // Rapier 胶囊沿 Y 轴：半高 + 半径
            RigidBodyShape::Capsule { radius, height } => SharedShape::capsule_y(height / 2.0, radius),
        };

        // 组号为 0..15，掩码位为 1 表示与该组碰撞
        let groups = InteractionGroups::new(
            Group::from_bits_truncate(1 << (def.collision_group as u32 & 15)),
            Group::from_bits_truncate(def.collision_mask as u32),
        );

        let builder = ColliderBuilder::new(shape)
            .restitution(def.restitution)
            .friction(def.friction)
            .collision_groups(groups)
            .solver_groups(groups);
        let builder = if def.kind == RigidBodyKind::Kinematic || def.mass == 0.0 {
            builder.density(0.0)
        } else {
            builder.mass(def.mass * config.mass_scale)
        };
        builder.build()
    }

    /// 骨骼 → 刚体，仅 Kinematic 刚体，在物理步进之前调用
    ///
    /// 刚体原点立即移到目标位置，子步数为 0 的帧也能跟随骨骼。
    pub fn update_from_bone(&self, bodies: &mut RigidBodySet, skeleton: &Skeleton, pool: &ResourcePool) {
        if self.kind != RigidBodyKind::Kinematic {
            return;
        }
        let mut position = pool.vectors.alloc();
        let mut rotation = pool.quats.alloc();
        let mut scale = pool.vectors.alloc();
        let (s, r, t) = skeleton.world_transform(self.bone).to_scale_rotation_translation();
        *scale = s;
        *rotation = r;
        *position = t;

        let mut target = pool.transforms.alloc();
        *target = to_isometry(*position, *rotation) * self.offset;
        if let Some(body) = bodies.get_mut(self.body_handle) {
            body.set_position(*target, true);
            body.set_next_kinematic_position(*target);
        }
    }

    /// 刚体 → 骨骼，仅 Dynamic / DynamicAligned 刚体，在物理步进之后调用
    ///
    /// 由刚体变换和逆偏移得到骨骼应有的世界变换，旋转总是写回；Dynamic 同时写回
    /// 位置，DynamicAligned 则把刚体位置拉回骨骼。写回后刷新骨骼子树。
    pub fn update_bone(&self, bodies: &mut RigidBodySet, skeleton: &mut Skeleton, pool: &ResourcePool) {
        if self.kind == RigidBodyKind::Kinematic {
            return;
        }
        let Some(body) = bodies.get(self.body_handle) else {
            return;
        };
        let mut implied = pool.transforms.alloc();
        *implied = body.position() * self.inv_offset;

        let mut rotation = pool.quats.alloc();
        *rotation = rotation_to_quat(&implied.rotation).normalize();
        let mut position = pool.vectors.alloc();
        *position = match self.kind {
            RigidBodyKind::Dynamic => {
                let t = implied.translation.vector;
                Vec3::new(t.x, t.y, t.z)
            }
            _ => skeleton.world_position(self.bone),
        };
        skeleton.set_world_transform(self.bone, Mat4::from_rotation_translation(*rotation, *position));

        if self.kind == RigidBodyKind::DynamicAligned {
            let mut snapped = pool.transforms.alloc();
            *snapped = mat4_to_isometry(skeleton.world_transform(self.bone)) * self.offset;
            if let Some(body) = bodies.get_mut(self.body_handle) {
                body.set_translation(snapped.translation.vector, true);
            }
        }
    }

    /// 回到骨骼驱动的位置并清零速度
    pub fn reset(&self, bodies: &mut RigidBodySet, skeleton: &Skeleton, pool: &ResourcePool) {
        let mut target = pool.transforms.alloc();
        *target = mat4_to_isometry(skeleton.world_transform(self.bone)) * self.offset;
        if let Some(body) = bodies.get_mut(self.body_handle) {
            body.set_position(*target, true);
            body.set_linvel(Vector::zeros(), true);
            body.set_angvel(Vector::zeros(), true);
        }
    }
}

pub fn to_isometry(translation: Vec3, rotation: Quat) -> Isometry<Real> {
    Isometry::from_parts(
        Translation3::new(translation.x, translation.y, translation.z),
        UnitQuaternion::new_normalize(Quaternion::new(rotation.w, rotation.x, rotation.y, rotation.z)),
    )
}

/// 忽略缩放
pub fn mat4_to_isometry(mat: Mat4) -> Isometry<Real> {
    let (_, rotation, translation) = mat.to_scale_rotation_translation();
    to_isometry(translation, rotation)
}

pub fn isometry_to_mat4(iso: &Isometry<Real>) -> Mat4 {
    let t = iso.translation.vector;
    Mat4::from_rotation_translation(rotation_to_quat(&iso.rotation), Vec3::new(t.x, t.y, t.z))
}

pub fn rotation_to_quat(rotation: &UnitQuaternion<Real>) -> Quat {
    Quat::from_xyzw(rotation.i, rotation.j, rotation.k, rotation.w)
}
