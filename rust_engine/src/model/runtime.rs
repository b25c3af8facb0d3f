//! 模型运行时
//!
//! 每帧流程：恢复姿势 → 序列求值 → 记录姿势 → 骨骼 Morph → IK → 付与 →
//! 世界矩阵 → 物理。输出的骨骼世界矩阵交给外部蒙皮 / 渲染阶段。

use std::sync::Arc;

use crate::animation::{
    AnimationSequence, BindInfo, BindResult, BindTarget, Clip, RawMotion, SequenceClip, TrackKind,
    VmdClips,
};
use crate::morph::MorphWeights;
use crate::physics::{get_config, PhysicsBridge, PhysicsConfig};
use crate::skeleton::{GrantSolver, IkSolver, NoopIkSolver, Skeleton};
use crate::PhysicsConfigError;

use super::MotionModel;

/// 动画的绑定目标：骨架、Morph 权重与模型可见性
#[derive(Clone, Debug)]
pub struct ModelState {
    pub skeleton: Skeleton,
    pub morphs: MorphWeights,
    pub visible: bool,
}

impl ModelState {
    pub fn from_model(model: &MotionModel) -> Self {
        Self {
            skeleton: Skeleton::from_model(model),
            morphs: MorphWeights::from_model(model),
            visible: true,
        }
    }
}

/// 运行时模型
pub struct ModelRuntime {
    model: Arc<MotionModel>,
    state: ModelState,
    sequence: AnimationSequence<ModelState>,
    grants: GrantSolver,
    ik_solver: Box<dyn IkSolver>,
    /// 带 IK 参数的骨骼，按变形阶层排序
    ik_bones: Vec<usize>,
    physics: Option<PhysicsBridge>,
    physics_enabled: bool,
}

impl ModelRuntime {
    /// 使用全局物理配置创建；模型没有刚体时不建立物理世界
    pub fn new(model: Arc<MotionModel>) -> Result<Self, PhysicsConfigError> {
        Self::with_physics_config(model, get_config())
    }

    pub fn with_physics_config(
        model: Arc<MotionModel>,
        config: PhysicsConfig,
    ) -> Result<Self, PhysicsConfigError> {
        let mut runtime = Self::without_physics(model);
        if !runtime.model.rigid_bodies.is_empty() {
            runtime.physics = Some(PhysicsBridge::new(
                &runtime.model,
                &runtime.state.skeleton,
                config,
            )?);
            runtime.physics_enabled = true;
        } else {
            log::debug!("[Runtime] 模型 '{}' 没有刚体，跳过物理初始化", runtime.model.name);
        }
        Ok(runtime)
    }

    pub fn without_physics(model: Arc<MotionModel>) -> Self {
        let mut ik_bones: Vec<usize> = model
            .bones
            .iter()
            .enumerate()
            .filter(|(_, b)| b.ik.is_some())
            .map(|(i, _)| i)
            .collect();
        ik_bones.sort_by_key(|&i| (model.bones[i].transform_level, i));

        Self {
            state: ModelState::from_model(&model),
            grants: GrantSolver::from_model(&model),
            sequence: AnimationSequence::new(),
            ik_solver: Box::new(NoopIkSolver),
            ik_bones,
            physics: None,
            physics_enabled: false,
            model,
        }
    }

    pub fn model(&self) -> &Arc<MotionModel> {
        &self.model
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.state.skeleton
    }

    pub fn morphs(&self) -> &MorphWeights {
        &self.state.morphs
    }

    pub fn physics(&self) -> Option<&PhysicsBridge> {
        self.physics.as_ref()
    }

    pub fn set_ik_solver(&mut self, solver: impl IkSolver + 'static) {
        self.ik_solver = Box::new(solver);
    }

    // ========== 绑定 ==========

    /// 按名称解析轨道目标
    ///
    /// - `{骨骼}.position` / `{骨骼}.quaternion`：骨骼动画平移 / 旋转
    /// - `visible`：模型可见性
    /// - bool 轨道且名称为 IK 骨骼：IK 开关
    /// - 其余名称为 Morph 时：Morph 权重
    ///
    /// 返回的目标类型按名称决定，与轨道类型不符时由绑定阶段报告。
    pub fn resolve_track(&self, name: &str, kind: TrackKind) -> Option<BindTarget<ModelState>> {
        let skeleton = &self.state.skeleton;
        if let Some(bone) = name.strip_suffix(".position").and_then(|b| skeleton.find_bone(b)) {
            return Some(BindTarget::vector3(move |s: &mut ModelState, v| {
                if let Some(b) = s.skeleton.bone_mut(bone) {
                    b.animation_translate = v;
                }
            }));
        }
        if let Some(bone) = name.strip_suffix(".quaternion").and_then(|b| skeleton.find_bone(b)) {
            return Some(BindTarget::quaternion(move |s: &mut ModelState, q| {
                if let Some(b) = s.skeleton.bone_mut(bone) {
                    b.animation_rotate = q;
                }
            }));
        }
        if name == "visible" {
            return Some(BindTarget::boolean(|s: &mut ModelState, v| s.visible = v));
        }

        let ik_bone = skeleton
            .find_bone(name)
            .filter(|&b| self.model.bones.get(b).is_some_and(|d| d.ik.is_some()));
        let morph = self.state.morphs.find(name);
        match (ik_bone, morph) {
            (Some(bone), m) if kind == TrackKind::Bool || m.is_none() => {
                Some(BindTarget::boolean(move |s: &mut ModelState, v| {
                    if let Some(b) = s.skeleton.bone_mut(bone) {
                        b.ik_enabled = v;
                    }
                }))
            }
            (_, Some(index)) => Some(BindTarget::scalar(move |s: &mut ModelState, w| {
                s.morphs.set_weight(index, w)
            })),
            _ => None,
        }
    }

    /// 为片段的每条轨道生成绑定声明
    pub fn bind_info_for(&self, clip: &Clip) -> BindInfo<ModelState> {
        BindInfo::from_resolver(clip, |name, kind| self.resolve_track(name, kind))
    }

    /// 用给定片段替换当前序列，`start` 为各片段在时间轴上的起点（秒）
    pub fn play(&mut self, clips: Vec<(Arc<Clip>, f64)>) -> BindResult {
        let entries = clips
            .into_iter()
            .map(|(clip, start)| {
                let info = self.bind_info_for(&clip);
                SequenceClip::new(clip, start, vec![info])
            })
            .collect();
        let (sequence, result) = AnimationSequence::try_create_instance(entries);
        self.sequence = sequence;
        result
    }

    /// 播放 VMD 的骨骼、表情与属性片段；相机与照明片段留给宿主
    pub fn play_motion(&mut self, motion: &RawMotion) -> BindResult {
        let clips = VmdClips::from_motion(motion, &motion.model_name);
        let targets = [clips.bone, clips.morph, clips.property];
        let result = self.play(
            targets
                .into_iter()
                .filter(|c| !c.is_empty())
                .map(|c| (c, 0.0))
                .collect(),
        );
        log::info!(
            "[Runtime] 模型 '{}' 绑定动作 '{}': 成功={}, 失败名称 {}",
            self.model.name,
            motion.model_name,
            result.is_bind_success,
            result.failed_track_names().count()
        );
        result
    }

    pub fn duration(&self) -> f64 {
        self.sequence.duration()
    }

    // ========== 每帧更新 ==========

    /// 求值 `frame`（秒）处的动画并推进物理 `delta` 秒
    pub fn update(&mut self, frame: f64, delta: f32) {
        let state = &mut self.state;
        state.skeleton.restore_pose();
        self.sequence.process(frame, state);
        state.skeleton.save_pose();

        state.morphs.apply_bone_morphs(&mut state.skeleton);
        state.skeleton.update_matrix_world();

        for &bone in &self.ik_bones {
            let enabled = state.skeleton.bone(bone).is_some_and(|b| b.ik_enabled);
            if let (true, Some(ik)) = (enabled, self.model.bones[bone].ik.as_ref()) {
                self.ik_solver.solve(&mut state.skeleton, bone, ik);
            }
        }

        self.grants.apply_grants(&mut state.skeleton);
        state.skeleton.update_matrix_world();

        if self.physics_enabled {
            if let Some(physics) = self.physics.as_mut() {
                physics.step(delta, &mut state.skeleton);
            }
        }
    }

    // ========== 物理 ==========

    pub fn set_physics_enabled(&mut self, enabled: bool) {
        self.physics_enabled = enabled;
    }

    pub fn is_physics_enabled(&self) -> bool {
        self.physics_enabled && self.physics.is_some()
    }

    /// 刚体回到当前骨骼姿势
    pub fn reset_physics(&mut self) {
        if let Some(physics) = self.physics.as_mut() {
            physics.reset(&self.state.skeleton);
        }
    }

    /// 释放物理世界，返回未归还的池对象数
    pub fn dispose_physics(&mut self) -> usize {
        self.physics_enabled = false;
        self.physics.take().map_or(0, |mut p| p.dispose())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use glam::{Quat, Vec3};

    use super::*;
    use crate::animation::{Keyframe, Track};
    use crate::model::{BoneDef, GrantParam, IkParam, ModelFormat};
    use crate::morph::{MorphDef, MorphOffsets};

    fn model() -> Arc<MotionModel> {
        let mut model = MotionModel::new(ModelFormat::Pmx(2.0), "m");
        model.bones.push(BoneDef::new(0, "センター", Vec3::ZERO));
        let mut ik = BoneDef::new(1, "足ＩＫ", Vec3::new(0.0, 1.0, 0.0));
        ik.ik = Some(IkParam {
            target_bone: 0,
            iterations: 1,
            limit_angle: 1.0,
            links: Vec::new(),
        });
        model.bones.push(ik);
        let mut follower = BoneDef::new(2, "follower", Vec3::ZERO);
        let grant = GrantParam {
            target_bone: 2,
            source_bone: 0,
            ratio: 1.0,
            is_local: false,
            affect_rotation: true,
            affect_position: false,
        };
        follower.grant = Some(grant.clone());
        model.bones.push(follower);
        model.grant_order = vec![grant];
        model.morphs.push(MorphDef {
            name: "まばたき".into(),
            name_en: String::new(),
            panel: 1,
            offsets: MorphOffsets::Vertex(Vec::new()),
        });
        model.rebuild_index();
        Arc::new(model)
    }

    fn clip() -> Arc<Clip> {
        let turn = Quat::from_rotation_y(0.5);
        Arc::new(
            Clip::new("c")
                .with_track(
                    "センター.quaternion",
                    Track::new(vec![Keyframe::step(0.0, turn)]).unwrap(),
                )
                .with_track("まばたき", Track::new(vec![Keyframe::linear(0.0, 0.0f32), Keyframe::linear(1.0, 1.0)]).unwrap())
                .with_track("足ＩＫ", Track::new(vec![Keyframe::step(0.0, false)]).unwrap())
                .with_track("visible", Track::new(vec![Keyframe::step(0.0, false)]).unwrap())
                .with_track("missing.position", Track::new(vec![Keyframe::step(0.0, Vec3::ONE)]).unwrap()),
        )
    }

    #[test]
    fn tracks_drive_bones_morphs_and_flags() {
        let mut runtime = ModelRuntime::without_physics(model());
        let result = runtime.play(vec![(clip(), 0.0)]);
        assert!(!result.is_bind_success);
        assert_eq!(result.failed_track_names().collect::<Vec<_>>(), vec!["missing.position"]);

        runtime.update(0.5, 1.0 / 30.0);
        let state = runtime.state();
        assert!(!state.visible);
        assert!((state.morphs.weight(0) - 0.5).abs() < 1e-6);
        assert!(!state.skeleton.bone(1).unwrap().ik_enabled);
        let expected = Quat::from_rotation_y(0.5);
        assert!(state.skeleton.world_rotation(0).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn grants_do_not_accumulate_across_frames() {
        let mut runtime = ModelRuntime::without_physics(model());
        runtime.play(vec![(clip(), 0.0)]);
        for frame in 0..5 {
            runtime.update(frame as f64 / 30.0, 1.0 / 30.0);
        }
        let follower = runtime.skeleton().world_rotation(2);
        assert!(follower.abs_diff_eq(Quat::from_rotation_y(0.5), 1e-5));
    }

    #[test]
    fn ik_solver_runs_only_for_enabled_bones() {
        let calls = Rc::new(Cell::new(0));
        let mut runtime = ModelRuntime::without_physics(model());
        let counter = Rc::clone(&calls);
        runtime.set_ik_solver(move |_: &mut Skeleton, bone: usize, _: &IkParam| {
            assert_eq!(bone, 1);
            counter.set(counter.get() + 1);
        });
        runtime.update(0.0, 0.0);
        assert_eq!(calls.get(), 1);

        runtime.play(vec![(clip(), 0.0)]);
        runtime.update(0.0, 0.0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn model_without_bodies_has_no_physics() {
        let runtime = ModelRuntime::new(model()).unwrap();
        assert!(runtime.physics().is_none());
        assert!(!runtime.is_physics_enabled());
    }
}
