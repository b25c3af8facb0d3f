mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use glam::{Quat, Vec3};
use mmd_engine::animation::{BoneRecord, RawMotion};
use mmd_engine::{decode_model, ModelRuntime, MotionModel, PhysicsBridge, PhysicsConfig, Skeleton};
use mmd_engine::PhysicsConfigError;

use common::{hair_model, init_logger, linear_interpolation};

const FRAME: f32 = 1.0 / 30.0;

fn model(joints: bool) -> Arc<MotionModel> {
    let mut pmx = hair_model();
    if !joints {
        pmx.joints.clear();
    }
    Arc::new(decode_model(&pmx.build()).unwrap())
}

fn runtime(joints: bool, config: PhysicsConfig) -> ModelRuntime {
    ModelRuntime::with_physics_config(model(joints), config).unwrap()
}

fn run(runtime: &mut ModelRuntime, frames: usize) {
    for i in 0..frames {
        runtime.update(i as f64 * FRAME as f64, FRAME);
    }
}

#[test]
fn kinematic_body_follows_the_animated_bone() {
    init_logger();
    let mut motion = RawMotion::new("hair");
    motion.bones.push(BoneRecord {
        name: "頭".into(),
        frame: 0,
        position: Vec3::new(5.0, 0.0, 0.0),
        rotation: Quat::IDENTITY,
        interpolation: linear_interpolation(),
    });
    let mut runtime = runtime(true, PhysicsConfig::default());
    assert!(runtime.play_motion(&motion).is_bind_success);

    runtime.update(0.0, FRAME);
    let head = runtime.physics().unwrap().body_position(0).unwrap();
    assert_relative_eq!(head.translation.x, 5.0, epsilon = 1e-4);
    assert_relative_eq!(head.translation.y, 10.0, epsilon = 1e-4);
    assert_relative_eq!(runtime.skeleton().world_position(0).x, 5.0, epsilon = 1e-4);
}

#[test]
fn kinematic_body_follows_at_high_frame_rates() {
    let mut motion = RawMotion::new("hair");
    motion.bones.push(BoneRecord {
        name: "頭".into(),
        frame: 0,
        position: Vec3::new(5.0, 0.0, 0.0),
        rotation: Quat::IDENTITY,
        interpolation: linear_interpolation(),
    });
    let mut runtime = runtime(true, PhysicsConfig::default());
    assert!(runtime.play_motion(&motion).is_bind_success);

    // 1/120 s 不足一个子步
    runtime.update(0.0, 1.0 / 120.0);
    let head = runtime.physics().unwrap().body_position(0).unwrap();
    assert_relative_eq!(head.translation.x, 5.0, epsilon = 1e-4);
    assert_relative_eq!(head.translation.y, 10.0, epsilon = 1e-4);
}

#[test]
fn dynamic_hair_falls_and_drags_its_bone() {
    let mut runtime = runtime(false, PhysicsConfig::default());
    run(&mut runtime, 15);

    let hair = runtime.physics().unwrap().body_position(1).unwrap();
    assert!(hair.translation.y < 7.0, "hair body at {}", hair.translation.y);
    // 骨骼与刚体保持 1 个单位的偏移
    let bone = runtime.skeleton().world_position(1);
    assert_relative_eq!(bone.y - hair.translation.y, 1.0, epsilon = 1e-3);
    // 头部刚体不受重力影响
    let head = runtime.physics().unwrap().body_position(0).unwrap();
    assert_relative_eq!(head.translation.y, 10.0, epsilon = 1e-4);
}

#[test]
fn zero_gravity_from_json_keeps_bodies_still() {
    let config = PhysicsConfig::from_json(r#"{ "gravity_y": 0.0 }"#).unwrap();
    assert_eq!(config.max_sub_step_count, 3);
    let mut runtime = runtime(false, config);
    run(&mut runtime, 30);

    let hair = runtime.physics().unwrap().body_position(1).unwrap();
    assert_relative_eq!(hair.translation.y, 8.0, epsilon = 1e-3);
    assert!(PhysicsConfig::from_json(r#"{ "unit_step": 0.0 }"#).is_err());
}

#[test]
fn disabled_physics_leaves_the_pose_alone() {
    let mut runtime = runtime(false, PhysicsConfig::default());
    runtime.set_physics_enabled(false);
    assert!(!runtime.is_physics_enabled());
    run(&mut runtime, 15);
    assert_relative_eq!(runtime.skeleton().world_position(1).y, 9.0, epsilon = 1e-5);
}

#[test]
fn reset_returns_bodies_to_the_bones() {
    let mut runtime = runtime(false, PhysicsConfig::default());
    run(&mut runtime, 15);

    runtime.set_physics_enabled(false);
    runtime.update(0.0, 0.0);
    runtime.reset_physics();
    let hair = runtime.physics().unwrap().body_position(1).unwrap();
    assert_relative_eq!(hair.translation.y, 8.0, epsilon = 1e-4);

    runtime.set_physics_enabled(true);
    runtime.update(0.0, FRAME);
    let hair = runtime.physics().unwrap().body_position(1).unwrap();
    assert!(hair.translation.y < 8.0 && hair.translation.y > 7.5);
}

#[test]
fn pool_stays_bounded_over_many_frames() {
    let mut runtime = runtime(true, PhysicsConfig::default());
    run(&mut runtime, 5);
    let warm = runtime.physics().unwrap().pool_stats();

    run(&mut runtime, 600);
    let stats = runtime.physics().unwrap().pool_stats();
    assert_eq!(stats.in_flight(), 0);
    assert_eq!(stats.transforms.created, warm.transforms.created);
    assert_eq!(stats.quats.created, warm.quats.created);
    assert_eq!(stats.vectors.created, warm.vectors.created);
    assert!(stats.transforms.created <= 4);
}

#[test]
fn dispose_removes_every_native_object() {
    let model = model(true);
    let skeleton = Skeleton::from_model(&model);
    let mut bridge = PhysicsBridge::new(&model, &skeleton, PhysicsConfig::default()).unwrap();
    assert_eq!(bridge.native_counts(), (2, 2, 1));

    let mut skeleton = skeleton;
    for _ in 0..10 {
        bridge.step(FRAME, &mut skeleton);
    }
    assert_eq!(bridge.dispose(), 0);
    assert_eq!(bridge.native_counts(), (0, 0, 0));
    assert_eq!(bridge.dispose(), 0);
    assert_eq!(bridge.step(FRAME, &mut skeleton), 0);

    let mut runtime = runtime(true, PhysicsConfig::default());
    run(&mut runtime, 3);
    assert_eq!(runtime.dispose_physics(), 0);
    assert!(runtime.physics().is_none());
    run(&mut runtime, 3);
}

#[test]
fn negative_mass_is_a_configuration_error() {
    let mut pmx = hair_model();
    pmx.bodies[1].mass = -1.0;
    let model = Arc::new(decode_model(&pmx.build()).unwrap());
    let err = ModelRuntime::with_physics_config(model, PhysicsConfig::default())
        .err()
        .unwrap();
    assert_eq!(err, PhysicsConfigError::InvalidMass { body: 1, mass: -1.0 });
}
