//! 骨骼 ⇄ 刚体物理桥
//!
//! 每次 `step`：Kinematic 刚体跟随骨骼 → 固定子步长推进物理世界 →
//! 动态刚体写回骨骼。整个桥只能在单线程中使用。

use std::num::NonZeroUsize;

use rapier3d::prelude::*;

use crate::model::{MotionModel, RigidBodyKind};
use crate::skeleton::Skeleton;
use crate::PhysicsConfigError;

use super::config::PhysicsConfig;
use super::mmd_joint::{describe_limits, MMDJoint};
use super::mmd_rigid_body::MMDRigidBody;
use super::pool::{ResourcePool, ResourcePoolStats};

/// 物理桥
///
/// 管理 Rapier 物理流水线、刚体 / 碰撞体 / 关节集合以及对象池。
pub struct PhysicsBridge {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    /// 与模型刚体表一一对应，没有骨骼的刚体为 None
    rigid_bodies: Vec<Option<MMDRigidBody>>,
    joints: Vec<MMDJoint>,
    gravity: Vector<Real>,
    config: PhysicsConfig,
    /// 尚未消化的时间
    accumulator: f32,
    pool: ResourcePool,
    disposed: bool,
}

impl PhysicsBridge {
    /// 按模型的刚体与关节定义建立物理世界
    ///
    /// 刚体初始位置取 `skeleton` 当前的骨骼世界变换。
    pub fn new(
        model: &MotionModel,
        skeleton: &Skeleton,
        config: PhysicsConfig,
    ) -> Result<Self, PhysicsConfigError> {
        for (index, def) in model.rigid_bodies.iter().enumerate() {
            MMDRigidBody::validate(index, def)?;
        }
        for (index, def) in model.constraints.iter().enumerate() {
            for body in [def.body_a, def.body_b] {
                if body >= model.rigid_bodies.len() {
                    return Err(PhysicsConfigError::InvalidBodyReference {
                        constraint: index,
                        body,
                    });
                }
            }
        }

        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = config.unit_step;
        if let Some(iterations) = NonZeroUsize::new(config.solver_iterations) {
            integration_parameters.num_solver_iterations = iterations;
        }
        integration_parameters.num_internal_pgs_iterations = config.pgs_iterations.max(1);

        let mut bridge = Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            rigid_bodies: Vec::with_capacity(model.rigid_bodies.len()),
            joints: Vec::new(),
            gravity: vector![0.0, config.gravity_y, 0.0],
            config,
            accumulator: 0.0,
            pool: ResourcePool::new(),
            disposed: false,
        };

        for (index, def) in model.rigid_bodies.iter().enumerate() {
            let Some(bone) = def.bone.filter(|&b| b < skeleton.len()) else {
                log::warn!("[Physics] 刚体 '{}' 没有关联骨骼，已跳过", def.name);
                bridge.rigid_bodies.push(None);
                continue;
            };
            let body = MMDRigidBody::create(
                index,
                bone,
                def,
                skeleton.world_transform(bone),
                &bridge.config,
                &mut bridge.bodies,
                &mut bridge.colliders,
            );
            if bridge.config.debug_log {
                log::debug!(
                    "[Physics] 刚体[{}] '{}': 类型={:?}, 骨骼={}, 质量={}, 组={}, 掩码=0x{:04X}",
                    index,
                    body.name,
                    body.kind,
                    bone,
                    def.mass,
                    body.group,
                    body.group_mask
                );
            }
            bridge.rigid_bodies.push(Some(body));
        }

        if bridge.config.joints_enabled {
            for def in &model.constraints {
                bridge.add_joint(def);
            }
        }

        log::info!(
            "[Physics] 物理世界建立完成: 刚体 {}/{}, 关节 {}/{}",
            bridge.rigid_body_count(),
            model.rigid_bodies.len(),
            bridge.joints.len(),
            model.constraints.len()
        );
        Ok(bridge)
    }

    fn add_joint(&mut self, def: &crate::model::ConstraintDef) {
        let handles = (
            self.rigid_bodies[def.body_a].as_ref().map(|b| b.body_handle),
            self.rigid_bodies[def.body_b].as_ref().map(|b| b.body_handle),
        );
        let (Some(a), Some(b)) = handles else {
            log::warn!("[Physics] 关节 '{}' 连接的刚体被跳过，关节也跳过", def.name);
            return;
        };
        let (Some(body_a), Some(body_b)) = (self.bodies.get(a), self.bodies.get(b)) else {
            return;
        };
        let (frame_a, frame_b) = MMDJoint::local_frames(def, body_a.position(), body_b.position());
        let joint = MMDJoint::build_joint(def, frame_a, frame_b, &self.config);
        let handle = self.impulse_joints.insert(a, b, joint, true);
        if self.config.debug_log {
            log::debug!("[Physics] 关节 '{}': {}", def.name, describe_limits(def));
        }
        self.joints.push(MMDJoint {
            name: def.name.clone(),
            body_a: def.body_a,
            body_b: def.body_b,
            handle,
        });
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// 已创建的刚体数
    pub fn rigid_body_count(&self) -> usize {
        self.rigid_bodies.iter().flatten().count()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn rigid_body(&self, index: usize) -> Option<&MMDRigidBody> {
        self.rigid_bodies.get(index).and_then(Option::as_ref)
    }

    /// 刚体当前的世界变换
    pub fn body_position(&self, index: usize) -> Option<Isometry<Real>> {
        let body = self.rigid_body(index)?;
        self.bodies.get(body.body_handle).map(|b| *b.position())
    }

    pub fn pool_stats(&self) -> ResourcePoolStats {
        self.pool.stats()
    }

    /// 所有 Kinematic 刚体跟随骨骼
    pub fn update_from_bones(&mut self, skeleton: &Skeleton) {
        for body in self.rigid_bodies.iter().flatten() {
            body.update_from_bone(&mut self.bodies, skeleton, &self.pool);
        }
    }

    /// 所有动态刚体写回骨骼
    pub fn update_bones(&mut self, skeleton: &mut Skeleton) {
        for body in self.rigid_bodies.iter().flatten() {
            body.update_bone(&mut self.bodies, skeleton, &self.pool);
        }
    }

    /// 推进物理模拟
    ///
    /// 按 `unit_step` 切分经过的时间，最多执行 `max_sub_step_count` 步，
    /// 不足一步的余量留到下一次，超出上限的时间丢弃。返回实际执行的子步数。
    pub fn step(&mut self, delta: f32, skeleton: &mut Skeleton) -> u32 {
        if self.disposed {
            return 0;
        }
        let unit = self.config.unit_step;
        if unit.is_nan() || unit <= 0.0 {
            return 0;
        }
        self.accumulator += delta.max(0.0);
        let available = (self.accumulator / unit).floor();
        self.accumulator -= available * unit;
        let steps = (available as u32).min(self.config.max_sub_step_count);
        if available as u32 > steps && self.config.debug_log {
            log::debug!("[Physics] 丢弃 {} 个子步", available as u32 - steps);
        }

        self.update_from_bones(skeleton);
        for _ in 0..steps {
            self.step_once(unit);
        }
        if steps > 0 {
            self.clamp_velocities();
        }
        self.update_bones(skeleton);
        steps
    }

    fn step_once(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// 限制动态刚体速度，防止穿透后弹飞
    fn clamp_velocities(&mut self) {
        let max_linear = self.config.max_linear_velocity;
        let max_angular = self.config.max_angular_velocity;
        for body in self.rigid_bodies.iter().flatten() {
            if body.kind == RigidBodyKind::Kinematic {
                continue;
            }
            let Some(rb) = self.bodies.get_mut(body.body_handle) else {
                continue;
            };
            let linvel = *rb.linvel();
            let speed = linvel.norm();
            if speed > max_linear {
                rb.set_linvel(linvel * (max_linear / speed), true);
            }
            let angvel = *rb.angvel();
            let speed = angvel.norm();
            if speed > max_angular {
                rb.set_angvel(angvel * (max_angular / speed), true);
            }
        }
    }

    /// 所有刚体回到骨骼驱动的位置并清零速度
    pub fn reset(&mut self, skeleton: &Skeleton) {
        self.accumulator = 0.0;
        for body in self.rigid_bodies.iter().flatten() {
            body.reset(&mut self.bodies, skeleton, &self.pool);
        }
    }

    /// 移除全部关节、刚体、碰撞体并释放对象池，返回未归还的池对象数
    pub fn dispose(&mut self) -> usize {
        if self.disposed {
            return 0;
        }
        for joint in self.joints.drain(..) {
            self.impulse_joints.remove(joint.handle, false);
        }
        for body in self.rigid_bodies.drain(..).flatten() {
            self.bodies.remove(
                body.body_handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            );
        }
        self.disposed = true;
        let leaked = self.pool.dispose();
        log::info!(
            "[Physics] 物理世界已释放: 剩余刚体 {}, 碰撞体 {}, 关节 {}",
            self.bodies.len(),
            self.colliders.len(),
            self.impulse_joints.len()
        );
        leaked
    }

    /// 物理世界中剩余的 (刚体, 碰撞体, 关节) 数
    pub fn native_counts(&self) -> (usize, usize, usize) {
        (self.bodies.len(), self.colliders.len(), self.impulse_joints.len())
    }
}

impl Drop for PhysicsBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}
