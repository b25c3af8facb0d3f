//! 付与（追加旋转）

use glam::Quat;

use crate::model::{GrantParam, MotionModel};

use super::Skeleton;

/// 按加载时计算好的顺序应用付与
#[derive(Debug, Clone, Default)]
pub struct GrantSolver {
    order: Vec<GrantParam>,
}

impl GrantSolver {
    /// 位置付与尚未实现
    pub const SUPPORTS_POSITION_GRANT: bool = false;

    /// `order` 中源骨骼的付与必须排在目标之前
    pub fn new(order: Vec<GrantParam>) -> Self {
        let position_grants = order.iter().filter(|g| g.affect_position).count();
        if position_grants > 0 && !Self::SUPPORTS_POSITION_GRANT {
            log::debug!("[Grant] 忽略 {} 项位置付与", position_grants);
        }
        Self { order }
    }

    pub fn from_model(model: &MotionModel) -> Self {
        Self::new(model.grant_order.clone())
    }

    pub fn order(&self) -> &[GrantParam] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `q = q * slerp(I, q_src, ratio)`
    ///
    /// 源骨骼的旋转已包含它自身的付与。只修改局部旋转，世界变换由调用方刷新。
    pub fn apply_grants(&self, skeleton: &mut Skeleton) {
        for grant in &self.order {
            if !grant.affect_rotation {
                continue;
            }
            let Some(source) = skeleton.bone(grant.source_bone).map(|b| b.animation_rotate) else {
                continue;
            };
            let Some(target) = skeleton.bone_mut(grant.target_bone) else {
                continue;
            };
            let granted = Quat::IDENTITY.slerp(source, grant.ratio);
            target.animation_rotate = (target.animation_rotate * granted).normalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::skeleton::Bone;

    fn grant(target: usize, source: usize, ratio: f32) -> GrantParam {
        GrantParam {
            target_bone: target,
            source_bone: source,
            ratio,
            is_local: false,
            affect_rotation: true,
            affect_position: false,
        }
    }

    #[test]
    fn chained_grants_see_granted_source() {
        let mut skeleton = Skeleton::new((0..3).map(|i| Bone::new(format!("b{}", i))).collect());
        skeleton.bone_mut(0).unwrap().animation_rotate = Quat::from_rotation_y(1.0);
        // 1 跟随 0 的一半，2 跟随 1 的一半
        let solver = GrantSolver::new(vec![grant(1, 0, 0.5), grant(2, 1, 0.5)]);
        solver.apply_grants(&mut skeleton);

        let (axis, angle) = skeleton.bone(2).unwrap().animation_rotate.to_axis_angle();
        assert_relative_eq!(angle, 0.25, epsilon = 1e-5);
        assert_relative_eq!(axis.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn position_only_grant_changes_nothing() {
        let mut skeleton = Skeleton::new((0..2).map(|i| Bone::new(format!("b{}", i))).collect());
        skeleton.bone_mut(0).unwrap().animation_rotate = Quat::from_rotation_x(0.7);
        let mut g = grant(1, 0, 1.0);
        g.affect_rotation = false;
        g.affect_position = true;
        GrantSolver::new(vec![g]).apply_grants(&mut skeleton);
        assert_eq!(skeleton.bone(1).unwrap().animation_rotate, Quat::IDENTITY);
    }
}
