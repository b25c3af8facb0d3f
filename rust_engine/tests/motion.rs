mod common;

use std::task::Poll;

use approx::assert_relative_eq;
use glam::{Quat, Vec3};
use mmd_engine::animation::{
    decode_container, encode_motion, AnyTrack, BezierCurve, BoneRecord, ContainerContent,
    MorphRecord, VmdClips,
};
use mmd_engine::{decode_vmd, encode_vmd, MotionDecodeTask, ParseErrorReason};

use common::{init_logger, linear_interpolation, sample_motion};

const BONE_COUNT_AT: usize = 50;
const PROPERTY_AT: usize = 453;

fn bone(name: &str, frame: u32, x: f32) -> BoneRecord {
    BoneRecord {
        name: name.into(),
        frame,
        position: Vec3::new(x, 0.0, 0.0),
        rotation: Quat::IDENTITY,
        interpolation: linear_interpolation(),
    }
}

#[test]
fn one_byte_chunks_decode_like_one_shot() {
    init_logger();
    let bytes = encode_vmd(&sample_motion()).unwrap();
    let mut task = MotionDecodeTask::with_budget(2);
    let mut result = None;
    for byte in &bytes {
        task.feed(std::slice::from_ref(byte));
        if let Poll::Ready(r) = task.poll() {
            result = Some(r);
        }
    }
    assert!(result.is_none());
    task.finish();
    let motion = loop {
        if let Poll::Ready(r) = task.poll() {
            break r.unwrap();
        }
    };
    assert_eq!(motion, sample_motion());
    assert_eq!(task.offset(), bytes.len());
}

#[test]
fn truncated_bone_section_reports_the_count_offset() {
    let bytes = encode_vmd(&sample_motion()).unwrap();
    let err = decode_vmd(&bytes[..BONE_COUNT_AT + 4 + 50]).unwrap_err();
    assert_eq!(err.offset, BONE_COUNT_AT);
    assert_eq!(err.reason, ParseErrorReason::LengthOutOfRange(3));
}

#[test]
fn truncated_ik_list_reports_the_ik_count_offset() {
    let bytes = encode_vmd(&sample_motion()).unwrap();
    assert_eq!(bytes.len(), PROPERTY_AT + 30);
    let err = decode_vmd(&bytes[..PROPERTY_AT + 20]).unwrap_err();
    assert_eq!(err.offset, PROPERTY_AT + 5);
    assert_eq!(err.reason, ParseErrorReason::LengthOutOfRange(1));
}

#[test]
fn truncated_header_and_model_name_report_their_offsets() {
    let bytes = encode_vmd(&sample_motion()).unwrap();
    let err = decode_vmd(&bytes[..20]).unwrap_err();
    assert_eq!(err.offset, 0);
    assert!(matches!(err.reason, ParseErrorReason::Truncated { needed: 30, available: 20 }));

    let err = decode_vmd(&bytes[..40]).unwrap_err();
    assert_eq!(err.offset, 30);
    assert!(matches!(err.reason, ParseErrorReason::Truncated { needed: 20, available: 10 }));
}

#[test]
fn unsorted_records_build_sorted_tracks() {
    let mut motion = sample_motion();
    motion.bones = vec![bone("a", 60, 2.0), bone("a", 0, 0.0), bone("a", 30, 1.0), bone("a", 30, 5.0)];
    let clips = VmdClips::from_motion(&motion, "m");
    let Some(AnyTrack::Vector3(track)) = clips.bone.track("a.position") else {
        panic!("position track missing");
    };
    let frames: Vec<f64> = track.keyframes().iter().map(|k| k.frame).collect();
    assert_eq!(frames, vec![0.0, 1.0, 2.0]);
    // 同帧保留后出现的记录
    assert_eq!(track.keyframes()[1].value.x, 5.0);
}

#[test]
fn keys_closer_than_one_and_a_half_frames_do_not_blend() {
    let mut motion = sample_motion();
    motion.morphs = vec![
        MorphRecord { name: "m".into(), frame: 0, weight: 0.0 },
        MorphRecord { name: "m".into(), frame: 1, weight: 1.0 },
        MorphRecord { name: "m".into(), frame: 11, weight: 0.0 },
    ];
    let clips = VmdClips::from_motion(&motion, "m");
    let Some(AnyTrack::Scalar(track)) = clips.morph.track("m") else {
        panic!("morph track missing");
    };
    assert_eq!(track.sample(0.5 / 30.0), 0.0);
    assert_eq!(track.sample(1.0 / 30.0), 1.0);
    assert_relative_eq!(track.sample(6.0 / 30.0), 0.5, epsilon = 1e-5);
}

#[test]
fn bone_curves_follow_the_vmd_bezier() {
    let mut motion = sample_motion();
    let mut eased = linear_interpolation();
    // X 通道：x1=64 y1=0 x2=64 y2=127
    eased[0] = 64;
    eased[4] = 0;
    eased[8] = 64;
    eased[12] = 127;
    motion.bones = vec![bone("a", 0, 0.0), bone("a", 30, 10.0)];
    motion.bones[1].interpolation = eased;
    let clips = VmdClips::from_motion(&motion, "m");
    let Some(AnyTrack::Vector3(track)) = clips.bone.track("a.position") else {
        panic!("position track missing");
    };

    let curve = BezierCurve::new(64.0 / 127.0, 0.0, 64.0 / 127.0, 1.0);
    for w in [0.1f32, 0.25, 0.5, 0.8] {
        let value = track.sample(w as f64);
        assert_relative_eq!(value.x, 10.0 * curve.evaluate(w), epsilon = 1e-3);
        let t = curve.solve(w);
        assert!((curve.x_at(t) - w).abs() < 1e-4);
    }
}

#[test]
fn motion_container_round_trips() {
    let mut motion = sample_motion();
    motion.bones[0].position = Vec3::new(f32::MIN_POSITIVE, -0.0, 1.0e-30);
    let bytes = encode_motion(&motion).unwrap();
    let ContainerContent::Motion(decoded) = decode_container(&bytes).unwrap() else {
        panic!("expected motion container");
    };
    assert_eq!(decoded.bones[0].position.y.to_bits(), (-0.0f32).to_bits());
    assert_eq!(encode_vmd(&decoded).unwrap(), encode_vmd(&motion).unwrap());
}
