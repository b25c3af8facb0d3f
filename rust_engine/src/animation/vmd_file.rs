//! VMD 记录结构
//!
//! 保存文件中的原始值（左手坐标、未归一化），坐标转换在构建片段时进行，
//! 因此 解码 → 编码 可以逐位还原每条记录。

use std::fmt;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use glam::{Quat, Vec3};

use crate::binary::{decode_shift_jis, BinaryCursor};
use crate::ParseError;

/// VMD 文件头（两个版本都只比较前 25 字节）
pub const VMD_HEADER_V1: &[u8] = b"Vocaloid Motion Data file";
pub const VMD_HEADER_V2: &[u8] = b"Vocaloid Motion Data 0002";
pub const HEADER_SIZE: usize = 30;
pub const MODEL_NAME_SIZE: usize = 20;
/// v1 文件的模型名只有 10 字节
pub const MODEL_NAME_SIZE_V1: usize = 10;

pub const BONE_NAME_SIZE: usize = 15;
pub const MORPH_NAME_SIZE: usize = 15;
pub const IK_NAME_SIZE: usize = 20;

pub const BONE_RECORD_SIZE: usize = 111;
pub const MORPH_RECORD_SIZE: usize = 23;
pub const CAMERA_RECORD_SIZE: usize = 61;
pub const LIGHT_RECORD_SIZE: usize = 28;
pub const SHADOW_RECORD_SIZE: usize = 9;
/// 属性记录的固定部分，之后是 `ik_count * 21` 字节
pub const PROPERTY_RECORD_HEAD_SIZE: usize = 9;
pub const PROPERTY_IK_SIZE: usize = 21;

/// 定长 Shift-JIS 名称字段
///
/// 保存字段中第一个 NUL 之前的原始字节，写出时原样写回。
/// 在双字节字符中间被截断的名称解码后带有 U+FFFD，但字节不会丢失。
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct VmdName {
    bytes: Vec<u8>,
    text: String,
}

impl VmdName {
    pub fn from_field(field: &[u8]) -> Self {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let bytes = field[..end].to_vec();
        Self {
            text: decode_shift_jis(&bytes),
            bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// 原始 Shift-JIS 字节（不含填充的 0）
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 写成 `len` 字节的字段，超长截断，不足补 0
    pub fn to_field(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let n = self.bytes.len().min(len);
        out[..n].copy_from_slice(&self.bytes[..n]);
        out
    }

    fn read(cursor: &mut BinaryCursor<'_>, len: usize) -> Result<Self, ParseError> {
        Ok(Self::from_field(cursor.read_bytes(len)?))
    }
}

impl From<&str> for VmdName {
    fn from(text: &str) -> Self {
        let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(text);
        Self {
            bytes: encoded.into_owned(),
            text: text.to_owned(),
        }
    }
}

impl From<String> for VmdName {
    fn from(text: String) -> Self {
        Self::from(text.as_str())
    }
}

impl PartialEq<str> for VmdName {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for VmdName {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

impl fmt::Debug for VmdName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.text, f)
    }
}

impl fmt::Display for VmdName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// 骨骼关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct BoneRecord {
    pub name: VmdName,
    pub frame: u32,
    pub position: Vec3,
    pub rotation: Quat,
    /// 64 字节插值表，前 16 字节有效：X=[0,4,8,12] Y=[1,5,9,13] Z=[2,6,10,14] R=[3,7,11,15]
    pub interpolation: [u8; 64],
}

impl BoneRecord {
    /// 取某一通道的 (x1, y1, x2, y2)，通道 0..4 对应 X/Y/Z/旋转
    pub fn curve(&self, channel: usize) -> [u8; 4] {
        let i = &self.interpolation;
        [i[channel], i[channel + 4], i[channel + 8], i[channel + 12]]
    }

    pub(crate) fn read(cursor: &mut BinaryCursor<'_>) -> Result<Self, ParseError> {
        let name = VmdName::read(cursor, BONE_NAME_SIZE)?;
        let frame = cursor.read_u32()?;
        let position = cursor.read_vec3()?;
        let r = cursor.read_vec4()?;
        let interpolation = cursor.read_array::<64>()?;
        Ok(Self {
            name,
            frame,
            position,
            rotation: Quat::from_xyzw(r.x, r.y, r.z, r.w),
            interpolation,
        })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.name.to_field(BONE_NAME_SIZE))?;
        w.write_u32::<LittleEndian>(self.frame)?;
        write_vec3(w, self.position)?;
        for v in self.rotation.to_array() {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_all(&self.interpolation)
    }
}

/// 表情关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct MorphRecord {
    pub name: VmdName,
    pub frame: u32,
    pub weight: f32,
}

impl MorphRecord {
    pub(crate) fn read(cursor: &mut BinaryCursor<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            name: VmdName::read(cursor, MORPH_NAME_SIZE)?,
            frame: cursor.read_u32()?,
            weight: cursor.read_f32()?,
        })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.name.to_field(MORPH_NAME_SIZE))?;
        w.write_u32::<LittleEndian>(self.frame)?;
        w.write_f32::<LittleEndian>(self.weight)
    }
}

/// 相机关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct CameraRecord {
    pub frame: u32,
    /// 距离（MMD 中为负值表示在目标前方）
    pub distance: f32,
    pub target: Vec3,
    /// 欧拉角（弧度）
    pub rotation: Vec3,
    /// 6 组 x1,x2,y1,y2：目标 X/Y/Z、旋转、距离、视角
    pub interpolation: [u8; 24],
    pub fov: u32,
    /// 0 表示透视投影开启
    pub perspective: u8,
}

impl CameraRecord {
    /// 取第 `group` 组的 (x1, y1, x2, y2)
    pub fn curve(&self, group: usize) -> [u8; 4] {
        let g = &self.interpolation[group * 4..group * 4 + 4];
        [g[0], g[2], g[1], g[3]]
    }

    pub(crate) fn read(cursor: &mut BinaryCursor<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            frame: cursor.read_u32()?,
            distance: cursor.read_f32()?,
            target: cursor.read_vec3()?,
            rotation: cursor.read_vec3()?,
            interpolation: cursor.read_array::<24>()?,
            fov: cursor.read_u32()?,
            perspective: cursor.read_u8()?,
        })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.frame)?;
        w.write_f32::<LittleEndian>(self.distance)?;
        write_vec3(w, self.target)?;
        write_vec3(w, self.rotation)?;
        w.write_all(&self.interpolation)?;
        w.write_u32::<LittleEndian>(self.fov)?;
        w.write_u8(self.perspective)
    }
}

/// 照明关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct LightRecord {
    pub frame: u32,
    pub color: Vec3,
    pub direction: Vec3,
}

impl LightRecord {
    pub(crate) fn read(cursor: &mut BinaryCursor<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            frame: cursor.read_u32()?,
            color: cursor.read_vec3()?,
            direction: cursor.read_vec3()?,
        })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.frame)?;
        write_vec3(w, self.color)?;
        write_vec3(w, self.direction)
    }
}

/// 本影（自阴影）关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowRecord {
    pub frame: u32,
    /// 0 关闭，1 模式一，2 模式二
    pub mode: u8,
    pub distance: f32,
}

impl ShadowRecord {
    pub(crate) fn read(cursor: &mut BinaryCursor<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            frame: cursor.read_u32()?,
            mode: cursor.read_u8()?,
            distance: cursor.read_f32()?,
        })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.frame)?;
        w.write_u8(self.mode)?;
        w.write_f32::<LittleEndian>(self.distance)
    }
}

/// IK 开关
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkState {
    pub name: VmdName,
    pub enabled: bool,
}

/// 模型属性关键帧（显示 + IK 开关）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    pub frame: u32,
    pub visible: bool,
    pub ik_states: Vec<IkState>,
}

impl PropertyRecord {
    pub fn encoded_len(&self) -> usize {
        PROPERTY_RECORD_HEAD_SIZE + PROPERTY_IK_SIZE * self.ik_states.len()
    }

    pub(crate) fn read(cursor: &mut BinaryCursor<'_>) -> Result<Self, ParseError> {
        let frame = cursor.read_u32()?;
        let visible = cursor.read_u8()? != 0;
        let count = cursor.read_count_u32(PROPERTY_IK_SIZE)?;
        let mut ik_states = Vec::new();
        for _ in 0..count {
            let name = VmdName::read(cursor, IK_NAME_SIZE)?;
            let enabled = cursor.read_u8()? != 0;
            ik_states.push(IkState { name, enabled });
        }
        Ok(Self {
            frame,
            visible,
            ik_states,
        })
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.frame)?;
        w.write_u8(self.visible as u8)?;
        w.write_u32::<LittleEndian>(self.ik_states.len() as u32)?;
        for ik in &self.ik_states {
            w.write_all(&ik.name.to_field(IK_NAME_SIZE))?;
            w.write_u8(ik.enabled as u8)?;
        }
        Ok(())
    }
}

/// 解码后的 VMD 内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMotion {
    pub model_name: String,
    pub bones: Vec<BoneRecord>,
    pub morphs: Vec<MorphRecord>,
    pub cameras: Vec<CameraRecord>,
    pub lights: Vec<LightRecord>,
    pub shadows: Vec<ShadowRecord>,
    pub properties: Vec<PropertyRecord>,
}

impl RawMotion {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    /// 最大帧号
    pub fn max_frame(&self) -> u32 {
        let frames = self
            .bones
            .iter()
            .map(|r| r.frame)
            .chain(self.morphs.iter().map(|r| r.frame))
            .chain(self.cameras.iter().map(|r| r.frame))
            .chain(self.lights.iter().map(|r| r.frame))
            .chain(self.shadows.iter().map(|r| r.frame))
            .chain(self.properties.iter().map(|r| r.frame));
        frames.max().unwrap_or(0)
    }

    pub fn record_count(&self) -> usize {
        self.bones.len()
            + self.morphs.len()
            + self.cameras.len()
            + self.lights.len()
            + self.shadows.len()
            + self.properties.len()
    }
}

fn write_vec3<W: Write>(w: &mut W, v: Vec3) -> std::io::Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)?;
    w.write_f32::<LittleEndian>(v.z)
}
