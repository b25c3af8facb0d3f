//! 动画片段
//!
//! 一组共享时间轴的异构轨道，按名称索引。片段在加载时构建，之后只读，
//! 通过 `Arc` 在多个实例之间共享。

use std::collections::HashMap;

use glam::{Quat, Vec3};
use thiserror::Error;

use super::motion_track::Track;

/// 轨道值类型
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    #[error("scalar")]
    Scalar,
    #[error("vector3")]
    Vector3,
    #[error("quaternion")]
    Quaternion,
    #[error("bool")]
    Bool,
}

/// 任意类型的轨道
#[derive(Debug, Clone, PartialEq)]
pub enum AnyTrack {
    Scalar(Track<f32>),
    Vector3(Track<Vec3>),
    Quaternion(Track<Quat>),
    Bool(Track<bool>),
}

impl AnyTrack {
    pub fn kind(&self) -> TrackKind {
        match self {
            AnyTrack::Scalar(_) => TrackKind::Scalar,
            AnyTrack::Vector3(_) => TrackKind::Vector3,
            AnyTrack::Quaternion(_) => TrackKind::Quaternion,
            AnyTrack::Bool(_) => TrackKind::Bool,
        }
    }

    pub fn duration(&self) -> f64 {
        match self {
            AnyTrack::Scalar(t) => t.duration(),
            AnyTrack::Vector3(t) => t.duration(),
            AnyTrack::Quaternion(t) => t.duration(),
            AnyTrack::Bool(t) => t.duration(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AnyTrack::Scalar(t) => t.len(),
            AnyTrack::Vector3(t) => t.len(),
            AnyTrack::Quaternion(t) => t.len(),
            AnyTrack::Bool(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有关键帧位置（测试与诊断用）
    pub fn frames(&self) -> Vec<f64> {
        match self {
            AnyTrack::Scalar(t) => t.keyframes().iter().map(|k| k.frame).collect(),
            AnyTrack::Vector3(t) => t.keyframes().iter().map(|k| k.frame).collect(),
            AnyTrack::Quaternion(t) => t.keyframes().iter().map(|k| k.frame).collect(),
            AnyTrack::Bool(t) => t.keyframes().iter().map(|k| k.frame).collect(),
        }
    }
}

impl From<Track<f32>> for AnyTrack {
    fn from(track: Track<f32>) -> Self {
        AnyTrack::Scalar(track)
    }
}

impl From<Track<Vec3>> for AnyTrack {
    fn from(track: Track<Vec3>) -> Self {
        AnyTrack::Vector3(track)
    }
}

impl From<Track<Quat>> for AnyTrack {
    fn from(track: Track<Quat>) -> Self {
        AnyTrack::Quaternion(track)
    }
}

impl From<Track<bool>> for AnyTrack {
    fn from(track: Track<bool>) -> Self {
        AnyTrack::Bool(track)
    }
}

/// 动画片段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clip {
    name: String,
    tracks: Vec<(String, AnyTrack)>,
    index: HashMap<String, usize>,
}

impl Clip {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 添加轨道，同名轨道被替换（保持原位置）
    pub fn add_track(&mut self, name: impl Into<String>, track: impl Into<AnyTrack>) -> &mut Self {
        let name = name.into();
        let track = track.into();
        match self.index.get(&name) {
            Some(&i) => self.tracks[i].1 = track,
            None => {
                self.index.insert(name.clone(), self.tracks.len());
                self.tracks.push((name, track));
            }
        }
        self
    }

    pub fn with_track(mut self, name: impl Into<String>, track: impl Into<AnyTrack>) -> Self {
        self.add_track(name, track);
        self
    }

    pub fn track(&self, name: &str) -> Option<&AnyTrack> {
        self.index.get(name).map(|&i| &self.tracks[i].1)
    }

    pub(crate) fn track_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn track_at(&self, index: usize) -> &AnyTrack {
        &self.tracks[index].1
    }

    pub(crate) fn track_name_at(&self, index: usize) -> &str {
        &self.tracks[index].0
    }

    /// 按添加顺序遍历
    pub fn tracks(&self) -> impl Iterator<Item = (&str, &AnyTrack)> {
        self.tracks.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn track_names(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 最长轨道的结束时间（秒）
    pub fn duration(&self) -> f64 {
        self.tracks
            .iter()
            .map(|(_, t)| t.duration())
            .fold(0.0, f64::max)
    }
}
