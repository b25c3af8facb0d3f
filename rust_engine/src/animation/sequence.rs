//! 动画序列
//!
//! 多个片段实例按各自的起始时间排列在同一时间轴上，依次求值。
//! 后处理的实例会覆盖先处理的实例对同一目标的写入。

use std::sync::Arc;

use super::binding::{self, BindInfo, BindResult, ClipInstance};
use super::clip::Clip;

struct SequenceEntry<T> {
    instance: ClipInstance<T>,
    start: f64,
}

/// 待绑定的片段声明
pub struct SequenceClip<T> {
    pub clip: Arc<Clip>,
    /// 在序列时间轴上的起始时间（秒）
    pub start: f64,
    pub bind_infos: Vec<BindInfo<T>>,
}

impl<T> SequenceClip<T> {
    pub fn new(clip: Arc<Clip>, start: f64, bind_infos: Vec<BindInfo<T>>) -> Self {
        Self {
            clip,
            start,
            bind_infos,
        }
    }
}

/// 有序的片段实例列表
pub struct AnimationSequence<T> {
    entries: Vec<SequenceEntry<T>>,
}

impl<T> Default for AnimationSequence<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> AnimationSequence<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 逐个绑定片段，结果按片段顺序汇总
    pub fn try_create_instance(clips: Vec<SequenceClip<T>>) -> (Self, BindResult) {
        let mut sequence = Self::new();
        let mut result = binding::success();
        for clip in clips {
            let (instance, clip_result) = clip.clip.try_create_instance(clip.bind_infos);
            result.merge(clip_result);
            sequence.push(instance, clip.start);
        }
        (sequence, result)
    }

    pub fn push(&mut self, instance: ClipInstance<T>, start: f64) -> &mut Self {
        self.entries.push(SequenceEntry { instance, start });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 序列总长（秒）
    pub fn duration(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.start + e.instance.clip().duration())
            .fold(0.0, f64::max)
    }

    /// 在序列时间 `frame` 处求值；尚未开始的实例跳过
    pub fn process(&mut self, frame: f64, target: &mut T) {
        for entry in &mut self.entries {
            if entry.start > frame {
                continue;
            }
            entry.instance.process(frame - entry.start, target);
        }
    }
}
