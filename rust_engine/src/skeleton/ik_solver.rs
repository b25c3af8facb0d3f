//! IK 求解接口
//!
//! 运行时只负责按骨骼顺序调度启用了 IK 的骨骼，具体的角度求解由实现方提供。

use crate::model::IkParam;

use super::Skeleton;

/// IK 求解器
///
/// `bone` 为 IK 骨骼索引，调用前骨架世界变换已是最新。实现方修改链节骨骼的
/// `animation_rotate` 后应自行刷新受影响的子树。
pub trait IkSolver {
    fn solve(&mut self, skeleton: &mut Skeleton, bone: usize, ik: &IkParam);
}

/// 不做任何事的求解器
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIkSolver;

impl IkSolver for NoopIkSolver {
    fn solve(&mut self, _skeleton: &mut Skeleton, _bone: usize, _ik: &IkParam) {}
}

impl<F> IkSolver for F
where
    F: FnMut(&mut Skeleton, usize, &IkParam),
{
    fn solve(&mut self, skeleton: &mut Skeleton, bone: usize, ik: &IkParam) {
        self(skeleton, bone, ik)
    }
}
