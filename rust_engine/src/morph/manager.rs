//! Morph 权重

use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::model::MotionModel;
use crate::skeleton::Skeleton;

use super::{MorphDef, MorphOffsets};

/// 组 Morph 的最大嵌套深度
const MAX_GROUP_DEPTH: usize = 8;

/// 按名称设置的 Morph 权重
///
/// 权重限制在 [0, 1]。组 / 翻转 Morph 在求有效权重时展开到成员上。
#[derive(Clone, Debug, Default)]
pub struct MorphWeights {
    morphs: Vec<MorphDef>,
    name_to_index: HashMap<String, usize>,
    weights: Vec<f32>,
}

impl MorphWeights {
    pub fn new(morphs: Vec<MorphDef>) -> Self {
        let mut name_to_index = HashMap::new();
        for (i, morph) in morphs.iter().enumerate() {
            name_to_index.entry(morph.name.clone()).or_insert(i);
        }
        let weights = vec![0.0; morphs.len()];
        Self {
            morphs,
            name_to_index,
            weights,
        }
    }

    pub fn from_model(model: &MotionModel) -> Self {
        Self::new(model.morphs.clone())
    }

    pub fn len(&self) -> usize {
        self.morphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.morphs.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn morph(&self, index: usize) -> Option<&MorphDef> {
        self.morphs.get(index)
    }

    pub fn weight(&self, index: usize) -> f32 {
        self.weights.get(index).copied().unwrap_or(0.0)
    }

    pub fn set_weight(&mut self, index: usize, weight: f32) {
        if let Some(w) = self.weights.get_mut(index) {
            *w = weight.clamp(0.0, 1.0);
        }
    }

    /// 名称不存在时返回 false
    pub fn set_weight_by_name(&mut self, name: &str, weight: f32) -> bool {
        match self.find(name) {
            Some(index) => {
                self.set_weight(index, weight);
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
    }

    /// 展开组 / 翻转 Morph 后各 Morph 的有效权重
    pub fn effective_weights(&self) -> Vec<f32> {
        let mut result = vec![0.0; self.morphs.len()];
        for (i, &w) in self.weights.iter().enumerate() {
            if w > 0.0 {
                self.accumulate(i, w, 0, &mut result);
            }
        }
        result.iter_mut().for_each(|w| *w = w.clamp(0.0, 1.0));
        result
    }

    fn accumulate(&self, index: usize, weight: f32, depth: usize, out: &mut [f32]) {
        let Some(morph) = self.morphs.get(index) else { return };
        match &morph.offsets {
            MorphOffsets::Group(members) => {
                if depth >= MAX_GROUP_DEPTH {
                    log::warn!("[Morph] 组 Morph '{}' 嵌套过深，已截断", morph.name);
                    return;
                }
                for member in members {
                    self.accumulate(member.morph, weight * member.ratio, depth + 1, out);
                }
            }
            MorphOffsets::Flip(members) => {
                if depth >= MAX_GROUP_DEPTH || members.is_empty() || weight <= 0.0 {
                    return;
                }
                // 权重选择其中一个成员
                let pick = ((weight * members.len() as f32).ceil() as usize).clamp(1, members.len()) - 1;
                let member = &members[pick];
                self.accumulate(member.morph, member.ratio, depth + 1, out);
            }
            _ => out[index] += weight,
        }
    }

    /// 把骨骼 Morph 叠加到骨骼动画状态上
    pub fn apply_bone_morphs(&self, skeleton: &mut Skeleton) {
        for (morph, weight) in self.morphs.iter().zip(self.effective_weights()) {
            let MorphOffsets::Bone(offsets) = &morph.offsets else { continue };
            if weight <= 0.0 {
                continue;
            }
            for offset in offsets {
                if let Some(bone) = skeleton.bone_mut(offset.bone) {
                    bone.animation_translate += offset.translation * weight;
                    let rotation = Quat::IDENTITY.slerp(offset.rotation, weight);
                    bone.animation_rotate = (bone.animation_rotate * rotation).normalize();
                }
            }
        }
    }

    /// 把顶点 Morph 叠加到顶点位置上
    pub fn apply_vertex_morphs(&self, positions: &mut [Vec3]) {
        for (morph, weight) in self.morphs.iter().zip(self.effective_weights()) {
            let MorphOffsets::Vertex(offsets) = &morph.offsets else { continue };
            if weight <= 0.0 {
                continue;
            }
            for offset in offsets {
                if let Some(p) = positions.get_mut(offset.vertex as usize) {
                    *p += offset.offset * weight;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::morph::{BoneOffset, GroupOffset, VertexOffset};
    use crate::skeleton::Bone;

    fn morph(name: &str, offsets: MorphOffsets) -> MorphDef {
        MorphDef {
            name: name.into(),
            name_en: String::new(),
            panel: 4,
            offsets,
        }
    }

    fn weights() -> MorphWeights {
        MorphWeights::new(vec![
            morph(
                "あ",
                MorphOffsets::Vertex(vec![VertexOffset {
                    vertex: 1,
                    offset: Vec3::Y,
                }]),
            ),
            morph(
                "笑い",
                MorphOffsets::Group(vec![GroupOffset { morph: 0, ratio: 0.5 }]),
            ),
            morph(
                "首",
                MorphOffsets::Bone(vec![BoneOffset {
                    bone: 0,
                    translation: Vec3::X,
                    rotation: Quat::from_rotation_z(1.0),
                }]),
            ),
        ])
    }

    #[test]
    fn weights_are_clamped() {
        let mut w = weights();
        assert!(w.set_weight_by_name("あ", 3.0));
        assert_eq!(w.weight(0), 1.0);
        w.set_weight(0, -1.0);
        assert_eq!(w.weight(0), 0.0);
        assert!(!w.set_weight_by_name("missing", 1.0));
    }

    #[test]
    fn group_expands_to_members() {
        let mut w = weights();
        w.set_weight_by_name("笑い", 0.8);
        w.set_weight_by_name("あ", 0.2);
        let effective = w.effective_weights();
        assert_relative_eq!(effective[0], 0.6, epsilon = 1e-6);
        assert_eq!(effective[1], 0.0);

        let mut positions = vec![Vec3::ZERO; 2];
        w.apply_vertex_morphs(&mut positions);
        assert_relative_eq!(positions[1].y, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn bone_morph_scales_offset() {
        let mut w = weights();
        w.set_weight_by_name("首", 0.5);
        let mut skeleton = Skeleton::new(vec![Bone::new("頭")]);
        w.apply_bone_morphs(&mut skeleton);
        let bone = skeleton.bone(0).unwrap();
        assert_relative_eq!(bone.animation_translate.x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(bone.animation_rotate.to_axis_angle().1, 0.5, epsilon = 1e-5);
    }
}
