//! 骨架

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use crate::model::MotionModel;

use super::Bone;

/// 一根骨骼的可动画状态
#[derive(Clone, Copy, Debug, PartialEq)]
struct PoseEntry {
    translate: Vec3,
    rotate: Quat,
    scale: Vec3,
}

/// 骨架：骨骼列表、名称索引、父子关系与父先子后的更新顺序
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    bones: Vec<Bone>,
    name_to_index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    /// 父骨骼总在子骨骼之前
    sorted_indices: Vec<usize>,
    saved_pose: Vec<PoseEntry>,
}

impl Skeleton {
    pub fn new(bones: Vec<Bone>) -> Self {
        let mut skeleton = Self {
            bones,
            ..Default::default()
        };
        skeleton.build_hierarchy();
        skeleton.update_matrix_world();
        skeleton.save_pose();
        skeleton
    }

    pub fn from_model(model: &MotionModel) -> Self {
        Self::new(model.bones.iter().map(Bone::from_def).collect())
    }

    /// 建立名称索引、子骨骼表和更新顺序
    fn build_hierarchy(&mut self) {
        let count = self.bones.len();
        self.name_to_index.clear();
        self.children = vec![Vec::new(); count];
        let mut roots = Vec::new();
        for (i, bone) in self.bones.iter().enumerate() {
            self.name_to_index.entry(bone.name.clone()).or_insert(i);
            match bone.parent.filter(|&p| p < count && p != i) {
                Some(p) => self.children[p].push(i),
                None => roots.push(i),
            }
        }

        // 先序遍历得到父先子后的顺序
        self.sorted_indices = Vec::with_capacity(count);
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(i) = stack.pop() {
            self.sorted_indices.push(i);
            stack.extend(self.children[i].iter().rev());
        }
        if self.sorted_indices.len() != count {
            log::warn!(
                "[Skeleton] {} 根骨骼不可从根到达，已忽略其层级",
                count - self.sorted_indices.len()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bone_mut(&mut self, index: usize) -> Option<&mut Bone> {
        self.bones.get_mut(index)
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn children(&self, index: usize) -> &[usize] {
        self.children.get(index).map_or(&[], Vec::as_slice)
    }

    /// 记录当前姿势
    pub fn save_pose(&mut self) {
        self.saved_pose = self
            .bones
            .iter()
            .map(|b| PoseEntry {
                translate: b.animation_translate,
                rotate: b.animation_rotate,
                scale: b.scale,
            })
            .collect();
    }

    /// 恢复 `save_pose` 记录的姿势，撤销之后的付与、IK 与物理写入
    pub fn restore_pose(&mut self) {
        for (bone, pose) in self.bones.iter_mut().zip(&self.saved_pose) {
            bone.animation_translate = pose.translate;
            bone.animation_rotate = pose.rotate;
            bone.scale = pose.scale;
        }
    }

    /// 所有骨骼回到静止姿势
    pub fn reset_pose(&mut self) {
        for bone in &mut self.bones {
            bone.reset_animation();
        }
        self.update_matrix_world();
    }

    /// 按父先子后顺序更新全部骨骼的世界变换
    pub fn update_matrix_world(&mut self) {
        for k in 0..self.sorted_indices.len() {
            let index = self.sorted_indices[k];
            self.update_single(index);
        }
    }

    /// 更新一根骨骼及其全部子孙的世界变换
    pub fn update_bone_matrix_world(&mut self, index: usize) {
        if index >= self.bones.len() {
            return;
        }
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            self.update_single(i);
            stack.extend(self.children[i].iter().copied());
        }
    }

    fn update_single(&mut self, index: usize) {
        self.bones[index].update_local_transform();
        let parent_world = self.parent_world(index);
        let bone = &mut self.bones[index];
        bone.world_transform = parent_world * bone.local_transform;
    }

    fn parent_world(&self, index: usize) -> Mat4 {
        self.bones[index]
            .parent
            .and_then(|p| self.bones.get(p))
            .map_or(Mat4::IDENTITY, |p| p.world_transform)
    }

    pub fn world_transform(&self, index: usize) -> Mat4 {
        self.bones.get(index).map_or(Mat4::IDENTITY, |b| b.world_transform)
    }

    pub fn world_position(&self, index: usize) -> Vec3 {
        self.bones.get(index).map_or(Vec3::ZERO, Bone::world_position)
    }

    pub fn world_rotation(&self, index: usize) -> Quat {
        self.bones.get(index).map_or(Quat::IDENTITY, Bone::world_rotation)
    }

    /// 设置世界变换，反推局部动画状态并刷新子孙骨骼
    pub fn set_world_transform(&mut self, index: usize, transform: Mat4) {
        if index >= self.bones.len() {
            return;
        }
        let local = self.parent_world(index).inverse() * transform;
        let (_, rotation, translation) = local.to_scale_rotation_translation();
        let bone = &mut self.bones[index];
        bone.animation_rotate = rotation.normalize();
        bone.animation_translate = translation - bone.rest_offset;
        self.update_bone_matrix_world(index);
    }

    /// 蒙皮矩阵
    pub fn skinning_matrices(&self) -> Vec<Mat4> {
        self.bones.iter().map(Bone::skinning_matrix).collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    /// 0 → 1 → 2 沿 Y 轴排列
    fn chain() -> Skeleton {
        let bones = (0..3)
            .map(|i: usize| {
                let mut b = Bone::new(format!("b{}", i));
                b.parent = i.checked_sub(1);
                b.rest_offset = if i == 0 { Vec3::ZERO } else { Vec3::Y };
                b.inverse_bind = Mat4::from_translation(-Vec3::Y * i as f32);
                b
            })
            .collect();
        let mut skeleton = Skeleton::new(bones);
        skeleton.update_matrix_world();
        skeleton
    }

    #[test]
    fn rest_pose_has_identity_skinning() {
        let skeleton = chain();
        for m in skeleton.skinning_matrices() {
            assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-6));
        }
        assert_eq!(skeleton.world_position(2), Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn subtree_update_follows_parent() {
        let mut skeleton = chain();
        skeleton.bone_mut(1).unwrap().animation_rotate = Quat::from_rotation_z(FRAC_PI_2);
        skeleton.update_bone_matrix_world(1);
        let tip = skeleton.world_position(2);
        assert_relative_eq!(tip.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(tip.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn restore_discards_later_writes() {
        let mut skeleton = chain();
        skeleton.bone_mut(0).unwrap().animation_translate = Vec3::X;
        skeleton.save_pose();
        skeleton.bone_mut(0).unwrap().animation_translate = Vec3::Z;
        skeleton.restore_pose();
        assert_eq!(skeleton.bone(0).unwrap().animation_translate, Vec3::X);
    }

    #[test]
    fn world_transform_round_trips_to_local() {
        let mut skeleton = chain();
        let target = Mat4::from_rotation_translation(Quat::from_rotation_x(0.3), Vec3::new(0.5, 1.0, 0.0));
        skeleton.set_world_transform(1, target);
        assert!(skeleton.world_transform(1).abs_diff_eq(target, 1e-5));
        assert_relative_eq!(skeleton.bone(1).unwrap().animation_translate.x, 0.5, epsilon = 1e-5);
    }
}
