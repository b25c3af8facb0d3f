//! 动画系统
//!
//! VMD 解析、关键帧插值、片段绑定与序列播放。

pub mod bezier;
pub mod binding;
pub mod clip;
pub mod container;
pub mod keyframe;
pub mod motion_track;
pub mod sequence;
pub mod vmd_animation;
pub mod vmd_file;
pub mod vmd_loader;

pub use bezier::{BezierCurve, ControlPoint};
pub use binding::{BindInfo, BindResult, BindTarget, BindWarning, BindWarningKind, ClipInstance};
pub use clip::{AnyTrack, Clip, TrackKind};
pub use container::{decode_container, encode_model, encode_motion, ContainerContent};
pub use keyframe::{Handle, Interpolation, Keyframe, TrackValue};
pub use motion_track::{Track, TrackError, DEFAULT_FRAME_RATE, SIMULTANEOUS_KEY_GAP};
pub use sequence::{AnimationSequence, SequenceClip};
pub use vmd_animation::VmdClips;
pub use vmd_file::{
    BoneRecord, CameraRecord, IkState, LightRecord, MorphRecord, PropertyRecord, RawMotion,
    ShadowRecord, VmdName,
};
pub use vmd_loader::{decode_vmd, encode_vmd, MotionDecodeTask};
