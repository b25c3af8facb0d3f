//! 动画轨道
//!
//! 有序关键帧序列，二分查找前后帧并按插值方式求值。

use thiserror::Error;

use super::keyframe::{Interpolation, Keyframe, TrackValue};

/// MMD 以 30fps 记录动作；两帧间隔小于 1.5 帧（秒）时视为同时发生，不做插值
pub const SIMULTANEOUS_KEY_GAP: f64 = 1.0 / 30.0 * 1.5;

/// 默认源帧率
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// 轨道构造错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    /// 第 `index` 个关键帧不严格大于前一个
    #[error("keyframe {index} at {frame} is not after its predecessor")]
    NotAscending { index: usize, frame: f64 },
    /// 帧位置不是有限数
    #[error("keyframe {index} has a non-finite frame")]
    NonFiniteFrame { index: usize },
}

/// 关键帧轨道
#[derive(Debug, Clone, PartialEq)]
pub struct Track<V: TrackValue> {
    keyframes: Vec<Keyframe<V>>,
    frame_rate: f64,
}

impl<V: TrackValue> Default for Track<V> {
    fn default() -> Self {
        Self {
            keyframes: Vec::new(),
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

impl<V: TrackValue> Track<V> {
    /// 由已排序的关键帧创建，帧位置必须严格递增
    pub fn new(keyframes: Vec<Keyframe<V>>) -> Result<Self, TrackError> {
        for (index, key) in keyframes.iter().enumerate() {
            if !key.frame.is_finite() {
                return Err(TrackError::NonFiniteFrame { index });
            }
            if index > 0 && key.frame <= keyframes[index - 1].frame {
                return Err(TrackError::NotAscending {
                    index,
                    frame: key.frame,
                });
            }
        }
        Ok(Self {
            keyframes,
            frame_rate: DEFAULT_FRAME_RATE,
        })
    }

    /// 排序并去重（同一帧保留最后出现的关键帧），丢弃非有限帧
    pub fn from_unsorted(mut keyframes: Vec<Keyframe<V>>) -> Self {
        keyframes.retain(|k| k.frame.is_finite());
        // 稳定排序保证同帧关键帧维持输入顺序
        keyframes.sort_by(|a, b| a.frame.total_cmp(&b.frame));
        let mut deduped: Vec<Keyframe<V>> = Vec::with_capacity(keyframes.len());
        for key in keyframes {
            match deduped.last_mut() {
                Some(last) if last.frame == key.frame => *last = key,
                _ => deduped.push(key),
            }
        }
        Self {
            keyframes: deduped,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn keyframes(&self) -> &[Keyframe<V>] {
        &self.keyframes
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// 最后一个关键帧的位置
    pub fn duration(&self) -> f64 {
        self.keyframes.last().map_or(0.0, |k| k.frame)
    }

    /// 在 `frame` 处求值
    pub fn sample(&self, frame: f64) -> V {
        match self.locate(frame) {
            Locate::Empty => V::default(),
            Locate::Clamped(i) => self.keyframes[i].value.clone(),
            Locate::Between(i) => self.blend(i, frame),
        }
    }

    /// 带游标的求值，游标缓存上次所在区间，顺序播放时免去二分
    pub fn sample_with_cursor(&self, frame: f64, cursor: &mut usize) -> V {
        let n = self.keyframes.len();
        if n >= 2 && *cursor + 1 < n {
            let k0 = &self.keyframes[*cursor];
            let k1 = &self.keyframes[*cursor + 1];
            if frame > k0.frame && frame < k1.frame {
                return self.blend(*cursor, frame);
            }
            if *cursor + 2 < n && frame >= k1.frame && frame < self.keyframes[*cursor + 2].frame {
                *cursor += 1;
                return self.blend(*cursor, frame);
            }
        }
        match self.locate(frame) {
            Locate::Empty => V::default(),
            Locate::Clamped(i) => {
                *cursor = i.min(n.saturating_sub(2));
                self.keyframes[i].value.clone()
            }
            Locate::Between(i) => {
                *cursor = i;
                self.blend(i, frame)
            }
        }
    }

    fn locate(&self, frame: f64) -> Locate {
        let keys = &self.keyframes;
        let (first, last) = match (keys.first(), keys.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Locate::Empty,
        };
        // NaN 落到第一帧
        if !(frame > first.frame) {
            return Locate::Clamped(0);
        }
        if frame >= last.frame {
            return Locate::Clamped(keys.len() - 1);
        }
        // 第一个 frame > 目标的关键帧即 k1
        let upper = keys.partition_point(|k| k.frame <= frame);
        Locate::Between(upper - 1)
    }

    /// 在区间 [keyframes[i], keyframes[i + 1]) 内插值
    fn blend(&self, i: usize, frame: f64) -> V {
        let k0 = &self.keyframes[i];
        let k1 = &self.keyframes[i + 1];
        let gap = k1.frame - k0.frame;
        let weight = if gap < SIMULTANEOUS_KEY_GAP {
            0.0
        } else {
            ((frame - k0.frame) / gap) as f32
        };

        match k0.interpolation {
            Interpolation::Step => k0.value.clone(),
            Interpolation::Linear => V::lerp(&k0.value, &k1.value, weight),
            Interpolation::Cubic => V::cubic(&k0.value, &k1.value, weight, &k0.out_handle, &k1.in_handle),
        }
    }
}

enum Locate {
    Empty,
    Clamped(usize),
    Between(usize),
}
