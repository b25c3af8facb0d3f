//! 由 VMD 记录构建动画片段
//!
//! 轨道命名：
//! - 骨骼：`{骨骼名}.position`（Vec3，逐轴曲线）、`{骨骼名}.quaternion`
//! - 表情：`{表情名}`（标量，线性）
//! - 属性：`visible`、`{IK 骨骼名}`（bool，阶跃）
//! - 相机：`camera.target` / `camera.rotation` / `camera.distance` / `camera.fov` / `camera.perspective`
//! - 照明：`light.color` / `light.direction` / `shadow.distance`
//!
//! 帧号按 30fps 换算为秒。坐标转换为右手系（Z 取反）。

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Quat, Vec3};

use super::clip::Clip;
use super::keyframe::{Handle, Keyframe, TrackValue};
use super::motion_track::{Track, DEFAULT_FRAME_RATE};
use super::vmd_file::*;

/// 一份 VMD 拆出的全部片段
#[derive(Debug, Clone)]
pub struct VmdClips {
    pub bone: Arc<Clip>,
    pub morph: Arc<Clip>,
    pub property: Arc<Clip>,
    pub camera: Arc<Clip>,
    pub light: Arc<Clip>,
}

impl VmdClips {
    pub fn from_motion(motion: &RawMotion, name: &str) -> Self {
        Self {
            bone: Arc::new(build_bone_clip(motion, &format!("{}.bones", name))),
            morph: Arc::new(build_morph_clip(motion, &format!("{}.morphs", name))),
            property: Arc::new(build_property_clip(motion, &format!("{}.property", name))),
            camera: Arc::new(build_camera_clip(motion, &format!("{}.camera", name))),
            light: Arc::new(build_light_clip(motion, &format!("{}.light", name))),
        }
    }

    /// 含有轨道的片段
    pub fn non_empty(&self) -> impl Iterator<Item = &Arc<Clip>> {
        [&self.bone, &self.morph, &self.property, &self.camera, &self.light]
            .into_iter()
            .filter(|c| !c.is_empty())
    }
}

fn seconds(frame: u32) -> f64 {
    frame as f64 / DEFAULT_FRAME_RATE
}

fn handle(curve: [u8; 4]) -> (Handle, Handle) {
    (Handle::from_vmd(curve[0], curve[1]), Handle::from_vmd(curve[2], curve[3]))
}

/// 按名称分组并保持首次出现顺序
fn group_by_name<'a, R>(records: &'a [R], name: impl Fn(&'a R) -> &'a str) -> Vec<(&'a str, Vec<&'a R>)> {
    let mut order: Vec<(&'a str, Vec<&'a R>)> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    for r in records {
        let n = name(r);
        match index.get(n) {
            Some(&i) => order[i].1.push(r),
            None => {
                index.insert(n, order.len());
                order.push((n, vec![r]));
            }
        }
    }
    order
}

/// 按帧排序（稳定），同帧保留最后一条
fn sorted_unique<'a, R>(mut records: Vec<&'a R>, frame: impl Fn(&R) -> u32) -> Vec<&'a R> {
    records.sort_by_key(|r| frame(*r));
    let mut out: Vec<&'a R> = Vec::with_capacity(records.len());
    for r in records {
        match out.last_mut() {
            Some(last) if frame(*last) == frame(r) => *last = r,
            _ => out.push(r),
        }
    }
    out
}

/// 由逐帧的 (值, 入控制点, 出控制点) 构建三次曲线轨道
///
/// VMD 每条记录携带“从上一帧到本帧”这一段的曲线：x1,y1 属于上一帧的出控制点，
/// x2,y2 属于本帧的入控制点。
fn cubic_track<V: TrackValue>(points: Vec<(u32, V, V::Handle, V::Handle)>) -> Track<V> {
    let mut keys: Vec<Keyframe<V>> = Vec::with_capacity(points.len());
    for (frame, value, p1, p2) in points {
        if let Some(prev) = keys.last_mut() {
            prev.out_handle = p1;
        }
        keys.push(Keyframe::cubic(seconds(frame), value, p2, V::Handle::default()));
    }
    Track::from_unsorted(keys)
}

/// 骨骼片段
pub fn build_bone_clip(motion: &RawMotion, name: &str) -> Clip {
    let mut clip = Clip::new(name);
    for (bone, records) in group_by_name(&motion.bones, |r| r.name.as_str()) {
        let records = sorted_unique(records, |r: &BoneRecord| r.frame);

        let mut positions = Vec::with_capacity(records.len());
        let mut rotations = Vec::with_capacity(records.len());
        for r in records {
            let (x1, x2) = handle(r.curve(0));
            let (y1, y2) = handle(r.curve(1));
            let (z1, z2) = handle(r.curve(2));
            let (r1, r2) = handle(r.curve(3));
            let p = r.position;
            let q = r.rotation;
            positions.push((r.frame, Vec3::new(p.x, p.y, -p.z), [x1, y1, z1], [x2, y2, z2]));
            rotations.push((r.frame, Quat::from_xyzw(q.x, q.y, -q.z, -q.w), r1, r2));
        }
        clip.add_track(format!("{}.position", bone), cubic_track(positions));
        clip.add_track(format!("{}.quaternion", bone), cubic_track(rotations));
    }
    clip
}

/// 表情片段
pub fn build_morph_clip(motion: &RawMotion, name: &str) -> Clip {
    let mut clip = Clip::new(name);
    for (morph, records) in group_by_name(&motion.morphs, |r| r.name.as_str()) {
        let keys = sorted_unique(records, |r: &MorphRecord| r.frame)
            .into_iter()
            .map(|r| Keyframe::linear(seconds(r.frame), r.weight))
            .collect();
        clip.add_track(morph, Track::from_unsorted(keys));
    }
    clip
}

/// 属性片段（显示与 IK 开关）
pub fn build_property_clip(motion: &RawMotion, name: &str) -> Clip {
    let mut clip = Clip::new(name);
    if motion.properties.is_empty() {
        return clip;
    }
    let records = sorted_unique(motion.properties.iter().collect(), |r: &PropertyRecord| r.frame);

    let visible = records
        .iter()
        .map(|r| Keyframe::step(seconds(r.frame), r.visible))
        .collect();
    clip.add_track("visible", Track::from_unsorted(visible));

    let mut ik_keys: Vec<(String, Vec<Keyframe<bool>>)> = Vec::new();
    for r in &records {
        for state in &r.ik_states {
            let key = Keyframe::step(seconds(r.frame), state.enabled);
            match ik_keys.iter_mut().find(|(n, _)| state.name == n.as_str()) {
                Some((_, keys)) => keys.push(key),
                None => ik_keys.push((state.name.to_string(), vec![key])),
            }
        }
    }
    for (ik, keys) in ik_keys {
        clip.add_track(ik, Track::from_unsorted(keys));
    }
    clip
}

/// 相机片段
pub fn build_camera_clip(motion: &RawMotion, name: &str) -> Clip {
    let mut clip = Clip::new(name);
    if motion.cameras.is_empty() {
        return clip;
    }
    let records = sorted_unique(motion.cameras.iter().collect(), |r: &CameraRecord| r.frame);

    let mut targets = Vec::with_capacity(records.len());
    let mut rotations = Vec::with_capacity(records.len());
    let mut distances = Vec::with_capacity(records.len());
    let mut fovs = Vec::with_capacity(records.len());
    let mut perspective = Vec::with_capacity(records.len());
    for r in &records {
        let (tx1, tx2) = handle(r.curve(0));
        let (ty1, ty2) = handle(r.curve(1));
        let (tz1, tz2) = handle(r.curve(2));
        let (r1, r2) = handle(r.curve(3));
        let (d1, d2) = handle(r.curve(4));
        let (f1, f2) = handle(r.curve(5));
        let t = r.target;
        let a = r.rotation;
        targets.push((r.frame, Vec3::new(t.x, t.y, -t.z), [tx1, ty1, tz1], [tx2, ty2, tz2]));
        // 旋转三轴共用一条曲线
        rotations.push((r.frame, Vec3::new(-a.x, -a.y, a.z), [r1; 3], [r2; 3]));
        distances.push((r.frame, -r.distance, d1, d2));
        fovs.push((r.frame, r.fov as f32, f1, f2));
        perspective.push(Keyframe::step(seconds(r.frame), r.perspective == 0));
    }
    clip.add_track("camera.target", cubic_track(targets));
    clip.add_track("camera.rotation", cubic_track(rotations));
    clip.add_track("camera.distance", cubic_track(distances));
    clip.add_track("camera.fov", cubic_track(fovs));
    clip.add_track("camera.perspective", Track::from_unsorted(perspective));
    clip
}

/// 照明与本影片段
pub fn build_light_clip(motion: &RawMotion, name: &str) -> Clip {
    let mut clip = Clip::new(name);
    if !motion.lights.is_empty() {
        let records = sorted_unique(motion.lights.iter().collect(), |r: &LightRecord| r.frame);
        let colors = records
            .iter()
            .map(|r| Keyframe::linear(seconds(r.frame), r.color))
            .collect();
        let directions = records
            .iter()
            .map(|r| {
                let d = r.direction;
                Keyframe::linear(seconds(r.frame), Vec3::new(d.x, d.y, -d.z))
            })
            .collect();
        clip.add_track("light.color", Track::from_unsorted(colors));
        clip.add_track("light.direction", Track::from_unsorted(directions));
    }
    if !motion.shadows.is_empty() {
        let keys = sorted_unique(motion.shadows.iter().collect(), |r: &ShadowRecord| r.frame)
            .into_iter()
            .map(|r| Keyframe::linear(seconds(r.frame), r.distance))
            .collect();
        clip.add_track("shadow.distance", Track::from_unsorted(keys));
    }
    clip
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::clip::AnyTrack;

    fn bone(name: &str, frame: u32, x: f32, curve_x: [u8; 4]) -> BoneRecord {
        let mut interpolation = [0u8; 64];
        interpolation[..8].fill(20);
        interpolation[8..16].fill(107);
        interpolation[0] = curve_x[0];
        interpolation[4] = curve_x[1];
        interpolation[8] = curve_x[2];
        interpolation[12] = curve_x[3];
        BoneRecord {
            name: name.into(),
            frame,
            position: Vec3::new(x, 0.0, 2.0),
            rotation: Quat::IDENTITY,
            interpolation,
        }
    }

    #[test]
    fn bone_records_become_sorted_tracks_with_segment_curves() {
        let mut motion = RawMotion::new("m");
        // 乱序写入，第二条记录携带 0→30 这一段的曲线
        motion.bones.push(bone("センター", 30, 10.0, [127, 0, 127, 0]));
        motion.bones.push(bone("センター", 0, 0.0, [20, 20, 107, 107]));
        motion.bones.push(bone("上半身", 0, 0.0, [20, 20, 107, 107]));

        let clip = build_bone_clip(&motion, "test");
        assert_eq!(
            clip.track_names().collect::<Vec<_>>(),
            vec!["センター.position", "センター.quaternion", "上半身.position", "上半身.quaternion"]
        );
        let Some(AnyTrack::Vector3(track)) = clip.track("センター.position") else {
            panic!("position track missing");
        };
        let keys = track.keyframes();
        assert_eq!(keys.len(), 2);
        assert!((keys[1].frame - 1.0).abs() < 1e-12);
        assert_eq!(keys[0].out_handle[0], Handle::new(1.0, 0.0));
        assert_eq!(keys[1].in_handle[0], Handle::new(1.0, 0.0));
        // Z 取反
        assert_eq!(keys[0].value.z, -2.0);
        // 急加速曲线在中点落后于线性
        assert!(track.sample(0.5).x < 5.0);
    }

    #[test]
    fn duplicate_frames_keep_the_last_record() {
        let mut motion = RawMotion::new("m");
        motion.morphs.push(MorphRecord {
            name: "あ".into(),
            frame: 5,
            weight: 0.2,
        });
        motion.morphs.push(MorphRecord {
            name: "あ".into(),
            frame: 5,
            weight: 0.9,
        });
        let clip = build_morph_clip(&motion, "m");
        let Some(AnyTrack::Scalar(track)) = clip.track("あ") else {
            panic!("morph track missing");
        };
        assert_eq!(track.len(), 1);
        assert_eq!(track.sample(0.0), 0.9);
    }

    #[test]
    fn property_clip_has_visibility_and_ik_tracks() {
        let mut motion = RawMotion::new("m");
        motion.properties.push(PropertyRecord {
            frame: 0,
            visible: true,
            ik_states: vec![IkState {
                name: "左足ＩＫ".into(),
                enabled: true,
            }],
        });
        motion.properties.push(PropertyRecord {
            frame: 30,
            visible: false,
            ik_states: vec![IkState {
                name: "左足ＩＫ".into(),
                enabled: false,
            }],
        });
        let clip = build_property_clip(&motion, "p");
        let Some(AnyTrack::Bool(ik)) = clip.track("左足ＩＫ") else {
            panic!("ik track missing");
        };
        assert!(ik.sample(0.99));
        assert!(!ik.sample(1.0));
        assert!(matches!(clip.track("visible"), Some(AnyTrack::Bool(_))));
    }

    #[test]
    fn camera_values_are_converted() {
        let mut motion = RawMotion::new("m");
        motion.cameras.push(CameraRecord {
            frame: 0,
            distance: -45.0,
            target: Vec3::new(0.0, 10.0, 1.0),
            rotation: Vec3::new(0.1, 0.2, 0.3),
            interpolation: [20, 107, 20, 107].repeat(6).try_into().unwrap(),
            fov: 30,
            perspective: 0,
        });
        let clip = build_camera_clip(&motion, "c");
        let Some(AnyTrack::Scalar(distance)) = clip.track("camera.distance") else {
            panic!("distance track missing");
        };
        assert_eq!(distance.sample(0.0), 45.0);
        let Some(AnyTrack::Vector3(rotation)) = clip.track("camera.rotation") else {
            panic!("rotation track missing");
        };
        assert_eq!(rotation.sample(0.0), Vec3::new(-0.1, -0.2, 0.3));
        assert_eq!(clip.len(), 5);
    }
}
