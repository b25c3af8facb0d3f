//! MMD 关节（约束）封装
//!
//! MMD 的 6DOF 弹簧约束用 Rapier 的 GenericJoint 配合 limits 和 motors 实现。

use glam::Vec3;
use rapier3d::prelude::*;

use crate::model::ConstraintDef;

use super::config::PhysicsConfig;
use super::mmd_rigid_body::to_isometry;

const EPSILON: f32 = 0.0001;
/// 上下限相等的角度轴放宽到 ±0.1 弧度
const MIN_ANGULAR_RANGE: f32 = 0.1;

/// MMD 关节
#[derive(Debug, Clone)]
pub struct MMDJoint {
    pub name: String,
    pub body_a: usize,
    pub body_b: usize,
    pub handle: ImpulseJointHandle,
}

impl MMDJoint {
    /// 关节在两个刚体局部空间的坐标系
    pub fn local_frames(
        def: &ConstraintDef,
        body_a: &Isometry<Real>,
        body_b: &Isometry<Real>,
    ) -> (Isometry<Real>, Isometry<Real>) {
        let joint = to_isometry(def.position, def.rotation);
        (body_a.inverse() * joint, body_b.inverse() * joint)
    }

    /// 创建 GenericJoint
    ///
    /// 上下限相等的线性轴锁定；角度轴不锁定，只设置限制和弹簧。
    /// 下限大于上限的轴不加限制。
    pub fn build_joint(
        def: &ConstraintDef,
        frame_a: Isometry<Real>,
        frame_b: Isometry<Real>,
        config: &PhysicsConfig,
    ) -> GenericJoint {
        let linear_axes = [
            (JointAxis::LinX, JointAxesMask::LIN_X),
            (JointAxis::LinY, JointAxesMask::LIN_Y),
            (JointAxis::LinZ, JointAxesMask::LIN_Z),
        ];
        let angular_axes = [JointAxis::AngX, JointAxis::AngY, JointAxis::AngZ];

        let mut locked_axes = JointAxesMask::empty();
        for (i, (_, mask)) in linear_axes.iter().enumerate() {
            if (def.linear_upper[i] - def.linear_lower[i]).abs() < EPSILON {
                locked_axes |= *mask;
            }
        }

        let mut joint = GenericJointBuilder::new(locked_axes)
            .local_frame1(frame_a)
            .local_frame2(frame_b)
            .build();
        // 关节连接的刚体之间不碰撞
        joint.contacts_enabled = false;

        for (i, (axis, mask)) in linear_axes.iter().enumerate() {
            if locked_axes.contains(*mask) {
                continue;
            }
            let (lower, upper) = (def.linear_lower[i], def.linear_upper[i]);
            if lower <= upper {
                joint.set_limits(*axis, [lower, upper]);
            }
            set_spring(
                &mut joint,
                *axis,
                def.spring_position[i] * config.linear_spring_stiffness_scale,
                config.linear_spring_damping_factor,
            );
        }

        for (i, axis) in angular_axes.iter().enumerate() {
            let (lower, upper) = (def.angular_lower[i], def.angular_upper[i]);
            if lower <= upper {
                if upper - lower < EPSILON {
                    joint.set_limits(*axis, [lower - MIN_ANGULAR_RANGE, lower + MIN_ANGULAR_RANGE]);
                } else {
                    joint.set_limits(*axis, [lower, upper]);
                }
            }
            set_spring(
                &mut joint,
                *axis,
                def.spring_rotation[i] * config.angular_spring_stiffness_scale,
                config.angular_spring_damping_factor,
            );
        }
        joint
    }
}

/// 弹簧用目标位置为 0 的电机模拟，阻尼 = sqrt(刚度 * factor)
fn set_spring(joint: &mut GenericJoint, axis: JointAxis, stiffness: f32, damping_factor: f32) {
    if stiffness == 0.0 || !stiffness.is_finite() {
        return;
    }
    let stiffness = stiffness.abs();
    let damping = (stiffness * damping_factor).max(0.0).sqrt();
    joint.set_motor(axis, 0.0, 0.0, stiffness, damping);
}

/// 把约束定义中的向量分量按轴取出，供调试日志使用
pub(crate) fn describe_limits(def: &ConstraintDef) -> String {
    let fmt = |lo: Vec3, hi: Vec3| {
        format!(
            "({:.3}~{:.3}, {:.3}~{:.3}, {:.3}~{:.3})",
            lo.x, hi.x, lo.y, hi.y, lo.z, hi.z
        )
    };
    format!(
        "线性 {} 角度 {}",
        fmt(def.linear_lower, def.linear_upper),
        fmt(def.angular_lower, def.angular_upper)
    )
}

#[cfg(test)]
mod tests {
    use glam::Quat;

    use super::*;

    fn def() -> ConstraintDef {
        ConstraintDef {
            name: "j".into(),
            body_a: 0,
            body_b: 1,
            position: Vec3::new(0.0, 1.0, 0.0),
            rotation: Quat::IDENTITY,
            linear_lower: Vec3::ZERO,
            linear_upper: Vec3::new(0.0, 0.5, 0.0),
            angular_lower: Vec3::new(-0.5, 0.2, 1.0),
            angular_upper: Vec3::new(0.5, 0.2, -1.0),
            spring_position: Vec3::ZERO,
            spring_rotation: Vec3::new(10.0, 0.0, 0.0),
        }
    }

    #[test]
    fn equal_linear_limits_lock_the_axis() {
        let joint = MMDJoint::build_joint(&def(), Isometry::identity(), Isometry::identity(), &PhysicsConfig::default());
        assert!(joint.locked_axes.contains(JointAxesMask::LIN_X));
        assert!(!joint.locked_axes.contains(JointAxesMask::LIN_Y));
        assert!(joint.locked_axes.contains(JointAxesMask::LIN_Z));
        assert!(!joint.locked_axes.contains(JointAxesMask::ANG_X));
        assert!(!joint.contacts_enabled);
    }

    #[test]
    fn collapsed_angular_range_is_widened() {
        let joint = MMDJoint::build_joint(&def(), Isometry::identity(), Isometry::identity(), &PhysicsConfig::default());
        let limits = joint.limits(JointAxis::AngY).map(|l| [l.min, l.max]);
        let [lo, hi] = limits.unwrap();
        assert!((lo - 0.1).abs() < 1e-6 && (hi - 0.3).abs() < 1e-6);
        assert!(joint.limits(JointAxis::AngZ).is_none());
    }

    #[test]
    fn frames_are_relative_to_each_body() {
        let a = Isometry::translation(0.0, 0.0, 0.0);
        let b = Isometry::translation(0.0, 2.0, 0.0);
        let (fa, fb) = MMDJoint::local_frames(&def(), &a, &b);
        assert!((fa.translation.vector.y - 1.0).abs() < 1e-6);
        assert!((fb.translation.vector.y + 1.0).abs() < 1e-6);
    }
}
