//! VMD 加载器
//!
//! [`MotionDecodeTask`] 是逐记录推进的状态机：调用方分块 `feed` 字节，
//! 每次 `poll` 最多解析固定数量的记录，不完整的记录留在缓冲区等待后续数据。
//! 丢弃任务即取消加载。

use std::task::Poll;

use crate::binary::BinaryCursor;
use crate::{ParseError, ParseErrorReason, Result};

use super::vmd_file::*;

/// 每次 poll 默认处理的记录数
pub const DEFAULT_RECORD_BUDGET: usize = 4096;

/// 已消费字节超过该值时压缩缓冲区
const COMPACT_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Bone,
    Morph,
    Camera,
    Light,
    Shadow,
    Property,
}

impl Section {
    fn next(self) -> Option<Section> {
        match self {
            Section::Bone => Some(Section::Morph),
            Section::Morph => Some(Section::Camera),
            Section::Camera => Some(Section::Light),
            Section::Light => Some(Section::Shadow),
            Section::Shadow => Some(Section::Property),
            Section::Property => None,
        }
    }

    /// 相机之后的段在旧文件中可能整体缺失
    fn is_optional(self) -> bool {
        !matches!(self, Section::Bone | Section::Morph)
    }

    /// 每条记录的最小字节数
    fn min_record_size(self) -> usize {
        match self {
            Section::Bone => BONE_RECORD_SIZE,
            Section::Morph => MORPH_RECORD_SIZE,
            Section::Camera => CAMERA_RECORD_SIZE,
            Section::Light => LIGHT_RECORD_SIZE,
            Section::Shadow => SHADOW_RECORD_SIZE,
            Section::Property => PROPERTY_RECORD_HEAD_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    ModelName(usize),
    Count(Section),
    Records { section: Section, remaining: usize },
    Done,
    Taken,
}

/// 增量 VMD 解码任务
pub struct MotionDecodeTask {
    buffer: Vec<u8>,
    /// 已从缓冲区前部移除的字节数
    base: usize,
    /// 缓冲区内已消费的字节数
    consumed: usize,
    finished: bool,
    stage: Stage,
    budget: usize,
    motion: RawMotion,
}

impl Default for MotionDecodeTask {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionDecodeTask {
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_RECORD_BUDGET)
    }

    pub fn with_budget(budget: usize) -> Self {
        Self {
            buffer: Vec::new(),
            base: 0,
            consumed: 0,
            finished: false,
            stage: Stage::Header,
            budget: budget.max(1),
            motion: RawMotion::default(),
        }
    }

    /// 追加输入字节
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.finished {
            log::warn!("[VMD] finish 之后仍有 {} 字节输入，已忽略", chunk.len());
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// 标记输入结束
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// 当前流内偏移
    pub fn offset(&self) -> usize {
        self.base + self.consumed
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// 推进解析
    ///
    /// 数据不足且尚未 `finish` 时返回 `Pending`；完成后返回一次解码结果。
    pub fn poll(&mut self) -> Poll<std::result::Result<RawMotion, ParseError>> {
        let mut work = 0;
        while work < self.budget {
            match self.step() {
                Ok(Progress::Advanced) => work += 1,
                Ok(Progress::NeedMore) => {
                    self.compact();
                    return Poll::Pending;
                }
                Ok(Progress::Complete) => {
                    self.stage = Stage::Taken;
                    log::info!(
                        "[VMD] 解析完成: 模型 '{}', 骨骼 {}, 表情 {}, 相机 {}, 照明 {}, 阴影 {}, 属性 {}",
                        self.motion.model_name,
                        self.motion.bones.len(),
                        self.motion.morphs.len(),
                        self.motion.cameras.len(),
                        self.motion.lights.len(),
                        self.motion.shadows.len(),
                        self.motion.properties.len()
                    );
                    return Poll::Ready(Ok(std::mem::take(&mut self.motion)));
                }
                Err(e) => {
                    self.stage = Stage::Taken;
                    return Poll::Ready(Err(e));
                }
            }
        }
        self.compact();
        Poll::Pending
    }

    fn step(&mut self) -> std::result::Result<Progress, ParseError> {
        match self.stage {
            Stage::Header => {
                let Some(header) = self.take(HEADER_SIZE)? else {
                    return Ok(Progress::NeedMore);
                };
                let magic = &header[..VMD_HEADER_V1.len()];
                let name_len = if magic == VMD_HEADER_V2 {
                    MODEL_NAME_SIZE
                } else if magic == VMD_HEADER_V1 {
                    MODEL_NAME_SIZE_V1
                } else {
                    return Err(ParseError::new(header.offset, ParseErrorReason::BadMagic));
                };
                self.stage = Stage::ModelName(name_len);
                Ok(Progress::Advanced)
            }
            Stage::ModelName(len) => {
                let Some(name) = self.take(len)? else {
                    return Ok(Progress::NeedMore);
                };
                self.motion.model_name = name
                    .cursor()
                    .read_fixed_sjis(len)
                    .map_err(|e| name.shift(e))?;
                self.stage = Stage::Count(Section::Bone);
                Ok(Progress::Advanced)
            }
            Stage::Count(section) => {
                if section.is_optional() && self.finished && self.available() == 0 {
                    self.stage = Stage::Done;
                    return Ok(Progress::Advanced);
                }
                let at = self.offset();
                let Some(bytes) = self.take(4)? else {
                    return Ok(Progress::NeedMore);
                };
                let count = bytes.cursor().read_u32().map_err(|e| bytes.shift(e))? as usize;
                // 输入已完整时可以立即拒绝放不下的记录数
                if self.finished
                    && (count as u64).saturating_mul(section.min_record_size() as u64)
                        > self.available() as u64
                {
                    return Err(ParseError::new(
                        at,
                        ParseErrorReason::LengthOutOfRange(count as i64),
                    ));
                }
                self.stage = Stage::Records {
                    section,
                    remaining: count,
                };
                Ok(Progress::Advanced)
            }
            Stage::Records {
                section,
                remaining: 0,
            } => {
                self.stage = match section.next() {
                    Some(next) => Stage::Count(next),
                    None => Stage::Done,
                };
                Ok(Progress::Advanced)
            }
            Stage::Records { section, remaining } => {
                let Some(len) = self.record_len(section)? else {
                    return Ok(Progress::NeedMore);
                };
                let Some(record) = self.take(len)? else {
                    return Ok(Progress::NeedMore);
                };
                let mut cursor = record.cursor();
                let motion = &mut self.motion;
                let parsed = match section {
                    Section::Bone => BoneRecord::read(&mut cursor).map(|r| motion.bones.push(r)),
                    Section::Morph => MorphRecord::read(&mut cursor).map(|r| motion.morphs.push(r)),
                    Section::Camera => CameraRecord::read(&mut cursor).map(|r| motion.cameras.push(r)),
                    Section::Light => LightRecord::read(&mut cursor).map(|r| motion.lights.push(r)),
                    Section::Shadow => ShadowRecord::read(&mut cursor).map(|r| motion.shadows.push(r)),
                    Section::Property => {
                        PropertyRecord::read(&mut cursor).map(|r| motion.properties.push(r))
                    }
                };
                parsed.map_err(|e| record.shift(e))?;
                self.stage = Stage::Records {
                    section,
                    remaining: remaining - 1,
                };
                Ok(Progress::Advanced)
            }
            Stage::Done => {
                let trailing = self.available();
                if trailing > 0 && self.finished {
                    log::warn!("[VMD] 忽略文件末尾 {} 字节", trailing);
                } else if !self.finished {
                    // 等待 finish 以确认没有残缺数据
                    return Ok(Progress::NeedMore);
                }
                Ok(Progress::Complete)
            }
            Stage::Taken => Err(ParseError::new(
                self.offset(),
                ParseErrorReason::InvalidValue("decode task already completed".into()),
            )),
        }
    }

    /// 下一条记录的长度，属性记录需要先看到 IK 数量
    fn record_len(&self, section: Section) -> std::result::Result<Option<usize>, ParseError> {
        if section != Section::Property {
            return Ok(Some(section.min_record_size()));
        }
        if self.available() < PROPERTY_RECORD_HEAD_SIZE {
            return self.short(PROPERTY_RECORD_HEAD_SIZE).map(|_| None);
        }
        let head = &self.buffer[self.consumed + 5..self.consumed + 9];
        let ik_count = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as u64;
        let len = ik_count * PROPERTY_IK_SIZE as u64 + PROPERTY_RECORD_HEAD_SIZE as u64;
        if self.finished && len > self.available() as u64 {
            return Err(ParseError::new(
                self.offset() + 5,
                ParseErrorReason::LengthOutOfRange(ik_count as i64),
            ));
        }
        Ok(usize::try_from(len).ok())
    }

    /// 取出 `len` 字节；不足时若输入已结束则报截断
    fn take(&mut self, len: usize) -> std::result::Result<Option<Span>, ParseError> {
        if self.available() < len {
            return self.short(len).map(|_| None);
        }
        let span = Span {
            offset: self.offset(),
            bytes: self.buffer[self.consumed..self.consumed + len].to_vec(),
        };
        self.consumed += len;
        Ok(Some(span))
    }

    fn short(&self, needed: usize) -> std::result::Result<(), ParseError> {
        if self.finished {
            return Err(ParseError::new(
                self.offset(),
                ParseErrorReason::Truncated {
                    needed,
                    available: self.available(),
                },
            ));
        }
        Ok(())
    }

    fn compact(&mut self) {
        if self.consumed >= COMPACT_THRESHOLD {
            self.buffer.drain(..self.consumed);
            self.base += self.consumed;
            self.consumed = 0;
        }
    }
}

enum Progress {
    Advanced,
    NeedMore,
    Complete,
}

/// 从缓冲区切出的完整记录，记住其流内偏移
struct Span {
    offset: usize,
    bytes: Vec<u8>,
}

impl Span {
    fn cursor(&self) -> BinaryCursor<'_> {
        BinaryCursor::new(&self.bytes)
    }

    /// 把记录内偏移换算为流内偏移
    fn shift(&self, e: ParseError) -> ParseError {
        ParseError::new(self.offset + e.offset, e.reason)
    }
}

impl std::ops::Deref for Span {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

/// 一次性解码完整的 VMD 字节
pub fn decode_vmd(bytes: &[u8]) -> std::result::Result<RawMotion, ParseError> {
    let mut task = MotionDecodeTask::new();
    task.feed(bytes);
    task.finish();
    loop {
        if let Poll::Ready(result) = task.poll() {
            return result;
        }
    }
}

/// 写出 VMD（v2 头，所有段都写出）
pub fn encode_vmd(motion: &RawMotion) -> Result<Vec<u8>> {
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    let mut out = Vec::with_capacity(HEADER_SIZE + MODEL_NAME_SIZE + motion.record_count() * 32);
    let mut header = [0u8; HEADER_SIZE];
    header[..VMD_HEADER_V2.len()].copy_from_slice(VMD_HEADER_V2);
    out.write_all(&header)?;
    out.write_all(&crate::binary::encode_shift_jis(&motion.model_name, MODEL_NAME_SIZE))?;

    out.write_u32::<LittleEndian>(motion.bones.len() as u32)?;
    for r in &motion.bones {
        r.write(&mut out)?;
    }
    out.write_u32::<LittleEndian>(motion.morphs.len() as u32)?;
    for r in &motion.morphs {
        r.write(&mut out)?;
    }
    out.write_u32::<LittleEndian>(motion.cameras.len() as u32)?;
    for r in &motion.cameras {
        r.write(&mut out)?;
    }
    out.write_u32::<LittleEndian>(motion.lights.len() as u32)?;
    for r in &motion.lights {
        r.write(&mut out)?;
    }
    out.write_u32::<LittleEndian>(motion.shadows.len() as u32)?;
    for r in &motion.shadows {
        r.write(&mut out)?;
    }
    out.write_u32::<LittleEndian>(motion.properties.len() as u32)?;
    for r in &motion.properties {
        r.write(&mut out)?;
    }
    Ok(out)
}
