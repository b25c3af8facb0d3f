//! 轨道绑定
//!
//! 把片段中按名称存在的轨道接到调用方提供的回调上。绑定从不“全有或全无”：
//! 找不到的名称、类型不符的目标、没人认领的轨道都记录到 [`BindResult`]，
//! 其余轨道照常绑定。
//!
//! 回调以 `&mut T` 接收目标上下文（骨架、Morph 权重等），引擎本身不知道
//! 目标代表什么。

use std::fmt;
use std::sync::Arc;

use glam::{Quat, Vec3};
use thiserror::Error;

use super::clip::{AnyTrack, Clip, TrackKind};

type Setter<T, V> = Box<dyn FnMut(&mut T, V)>;

/// 按值类型区分的绑定目标
pub enum BindTarget<T> {
    Scalar(Setter<T, f32>),
    Vector3(Setter<T, Vec3>),
    Quaternion(Setter<T, Quat>),
    Bool(Setter<T, bool>),
}

impl<T> BindTarget<T> {
    pub fn scalar(f: impl FnMut(&mut T, f32) + 'static) -> Self {
        BindTarget::Scalar(Box::new(f))
    }

    pub fn vector3(f: impl FnMut(&mut T, Vec3) + 'static) -> Self {
        BindTarget::Vector3(Box::new(f))
    }

    pub fn quaternion(f: impl FnMut(&mut T, Quat) + 'static) -> Self {
        BindTarget::Quaternion(Box::new(f))
    }

    pub fn boolean(f: impl FnMut(&mut T, bool) + 'static) -> Self {
        BindTarget::Bool(Box::new(f))
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            BindTarget::Scalar(_) => TrackKind::Scalar,
            BindTarget::Vector3(_) => TrackKind::Vector3,
            BindTarget::Quaternion(_) => TrackKind::Quaternion,
            BindTarget::Bool(_) => TrackKind::Bool,
        }
    }
}

impl<T> fmt::Debug for BindTarget<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindTarget::{}", self.kind())
    }
}

/// 一组 (轨道名, 目标) 声明
pub struct BindInfo<T> {
    entries: Vec<(String, BindTarget<T>)>,
}

impl<T> Default for BindInfo<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> BindInfo<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, track_name: impl Into<String>, target: BindTarget<T>) -> &mut Self {
        self.entries.push((track_name.into(), target));
        self
    }

    pub fn with(mut self, track_name: impl Into<String>, target: BindTarget<T>) -> Self {
        self.bind(track_name, target);
        self
    }

    /// 对片段中的每条轨道询问 `resolve`，能解析的才声明绑定
    ///
    /// 解析失败的轨道不会出现在声明中，绑定时作为未认领轨道报告。
    pub fn from_resolver<F>(clip: &Clip, mut resolve: F) -> Self
    where
        F: FnMut(&str, TrackKind) -> Option<BindTarget<T>>,
    {
        let mut info = Self::new();
        for (name, track) in clip.tracks() {
            if let Some(target) = resolve(name, track.kind()) {
                info.bind(name, target);
            }
        }
        info
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

/// 绑定问题分类
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindWarningKind {
    /// 声明的名称在片段中没有轨道
    #[error("no such track")]
    MissingTrack,
    /// 轨道值类型与目标不符
    #[error("target expects {expected} but track is {found}")]
    TypeMismatch { expected: TrackKind, found: TrackKind },
    /// 片段中的轨道没有任何目标认领（例如骨架缺少该骨骼）
    #[error("no target")]
    Unbound,
}

/// 非致命的绑定警告
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("clip '{clip}' track '{track_name}': {kind}")]
pub struct BindWarning {
    pub clip: String,
    pub track_name: String,
    pub kind: BindWarningKind,
}

/// 绑定结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindResult {
    pub is_bind_success: bool,
    /// 每个片段一组失败的名称
    pub per_clip_failed_track_names: Vec<Vec<String>>,
    pub warnings: Vec<BindWarning>,
}

impl BindResult {
    /// 合并另一个结果（序列绑定多个片段时使用）
    pub fn merge(&mut self, other: BindResult) {
        self.is_bind_success = self.is_bind_success && other.is_bind_success;
        self.per_clip_failed_track_names
            .extend(other.per_clip_failed_track_names);
        self.warnings.extend(other.warnings);
    }

    /// 所有失败名称
    pub fn failed_track_names(&self) -> impl Iterator<Item = &str> {
        self.per_clip_failed_track_names
            .iter()
            .flatten()
            .map(String::as_str)
    }

    fn empty_success() -> Self {
        Self {
            is_bind_success: true,
            ..Default::default()
        }
    }
}

struct BoundTrack<T> {
    track_index: usize,
    target: BindTarget<T>,
    cursor: usize,
}

/// 片段实例：共享只读片段，独占自己的播放游标
pub struct ClipInstance<T> {
    clip: Arc<Clip>,
    bound: Vec<BoundTrack<T>>,
}

impl Clip {
    /// 绑定并创建实例
    pub fn try_create_instance<T>(
        self: &Arc<Self>,
        bind_infos: Vec<BindInfo<T>>,
    ) -> (ClipInstance<T>, BindResult) {
        let mut bound = Vec::new();
        let mut claimed = vec![false; self.len()];
        let mut failed: Vec<String> = Vec::new();
        let mut warnings = Vec::new();

        let mut fail = |name: &str, kind: BindWarningKind, failed: &mut Vec<String>| {
            if !failed.iter().any(|n| n == name) {
                failed.push(name.to_string());
            }
            warnings.push(BindWarning {
                clip: self.name().to_string(),
                track_name: name.to_string(),
                kind,
            });
        };

        for info in bind_infos {
            for (name, target) in info.entries {
                let Some(track_index) = self.track_index(&name) else {
                    fail(&name, BindWarningKind::MissingTrack, &mut failed);
                    continue;
                };
                let found = self.track_at(track_index).kind();
                if found != target.kind() {
                    fail(
                        &name,
                        BindWarningKind::TypeMismatch {
                            expected: target.kind(),
                            found,
                        },
                        &mut failed,
                    );
                    continue;
                }
                claimed[track_index] = true;
                bound.push(BoundTrack {
                    track_index,
                    target,
                    cursor: 0,
                });
            }
        }

        for (index, name) in self.track_names().enumerate() {
            if !claimed[index] {
                fail(name, BindWarningKind::Unbound, &mut failed);
            }
        }

        if !failed.is_empty() {
            log::warn!(
                "[绑定] 片段 '{}': {} 条轨道绑定，{} 个名称失败: {:?}",
                self.name(),
                bound.len(),
                failed.len(),
                failed
            );
        }

        let result = BindResult {
            is_bind_success: failed.is_empty(),
            per_clip_failed_track_names: vec![failed],
            warnings,
        };
        let instance = ClipInstance {
            clip: Arc::clone(self),
            bound,
        };
        (instance, result)
    }
}

impl<T> ClipInstance<T> {
    pub fn clip(&self) -> &Arc<Clip> {
        &self.clip
    }

    /// 已绑定的轨道名（按绑定顺序）
    pub fn bound_track_names(&self) -> Vec<&str> {
        self.bound
            .iter()
            .map(|b| self.clip.track_name_at(b.track_index))
            .collect()
    }

    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    /// 在 `frame`（秒）处对所有已绑定轨道求值并调用回调
    pub fn process(&mut self, frame: f64, target: &mut T) {
        let clip = &self.clip;
        for b in &mut self.bound {
            match (clip.track_at(b.track_index), &mut b.target) {
                (AnyTrack::Scalar(t), BindTarget::Scalar(set)) => {
                    set(target, t.sample_with_cursor(frame, &mut b.cursor))
                }
                (AnyTrack::Vector3(t), BindTarget::Vector3(set)) => {
                    set(target, t.sample_with_cursor(frame, &mut b.cursor))
                }
                (AnyTrack::Quaternion(t), BindTarget::Quaternion(set)) => {
                    set(target, t.sample_with_cursor(frame, &mut b.cursor))
                }
                (AnyTrack::Bool(t), BindTarget::Bool(set)) => {
                    set(target, t.sample_with_cursor(frame, &mut b.cursor))
                }
                // 类型在绑定时已校验
                (AnyTrack::Scalar(_), BindTarget::Vector3(_) | BindTarget::Quaternion(_) | BindTarget::Bool(_))
                | (AnyTrack::Vector3(_), BindTarget::Scalar(_) | BindTarget::Quaternion(_) | BindTarget::Bool(_))
                | (AnyTrack::Quaternion(_), BindTarget::Scalar(_) | BindTarget::Vector3(_) | BindTarget::Bool(_))
                | (AnyTrack::Bool(_), BindTarget::Scalar(_) | BindTarget::Vector3(_) | BindTarget::Quaternion(_)) => {
                    debug_assert!(false, "track kind changed after binding");
                }
            }
        }
    }
}

pub(crate) fn success() -> BindResult {
    BindResult::empty_success()
}
