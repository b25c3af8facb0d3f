//! 二进制重载容器
//!
//! 布局：
//! - `MMDC` 魔数 + u32 版本
//! - u32 长度 + JSON 头（种类、名称、各段记录数）
//! - 若干段：4 字节标签 + u32 长度 + 内容
//!
//! 动作段直接存放 VMD 记录字节，浮点数按原始位写出；模型容器内嵌源文件。

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::binary::BinaryCursor;
use crate::model::{decode_model, MotionModel};
use crate::{MmdError, ParseError, Result};

use super::vmd_file::*;

pub const CONTAINER_MAGIC: &[u8; 4] = b"MMDC";
pub const CONTAINER_VERSION: u32 = 1;

const TAG_BONE: [u8; 4] = *b"BONE";
const TAG_MORPH: [u8; 4] = *b"MORF";
const TAG_CAMERA: [u8; 4] = *b"CAMR";
const TAG_LIGHT: [u8; 4] = *b"LGHT";
const TAG_SHADOW: [u8; 4] = *b"SHDW";
const TAG_PROPERTY: [u8; 4] = *b"PROP";
const TAG_SOURCE: [u8; 4] = *b"SRCM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Motion,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SectionInfo {
    tag: String,
    records: u32,
}

/// JSON 头
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ContainerHeader {
    kind: ContainerKind,
    name: String,
    sections: Vec<SectionInfo>,
}

/// 容器内容
#[derive(Debug, Clone)]
pub enum ContainerContent {
    Motion(RawMotion),
    Model(MotionModel),
}

/// 打包动作
pub fn encode_motion(motion: &RawMotion) -> Result<Vec<u8>> {
    let mut sections: Vec<([u8; 4], u32, Vec<u8>)> = Vec::new();

    macro_rules! section {
        ($tag:expr, $records:expr) => {{
            let mut body = Vec::new();
            for r in $records {
                r.write(&mut body)?;
            }
            sections.push(($tag, $records.len() as u32, body));
        }};
    }
    section!(TAG_BONE, &motion.bones);
    section!(TAG_MORPH, &motion.morphs);
    section!(TAG_CAMERA, &motion.cameras);
    section!(TAG_LIGHT, &motion.lights);
    section!(TAG_SHADOW, &motion.shadows);
    section!(TAG_PROPERTY, &motion.properties);

    write_container(ContainerKind::Motion, &motion.model_name, sections)
}

/// 打包模型源文件（先解码一次确认数据有效）
pub fn encode_model(source: &[u8]) -> Result<Vec<u8>> {
    let model = decode_model(source)?;
    let sections = vec![(TAG_SOURCE, 1, source.to_vec())];
    write_container(ContainerKind::Model, &model.name, sections)
}

fn write_container(kind: ContainerKind, name: &str, sections: Vec<([u8; 4], u32, Vec<u8>)>) -> Result<Vec<u8>> {
    let header = ContainerHeader {
        kind,
        name: name.to_string(),
        sections: sections
            .iter()
            .map(|(tag, records, _)| SectionInfo {
                tag: String::from_utf8_lossy(tag).into_owned(),
                records: *records,
            })
            .collect(),
    };
    let json = serde_json::to_vec(&header).map_err(|e| MmdError::Container(e.to_string()))?;

    let body_len: usize = sections.iter().map(|(_, _, b)| b.len() + 8).sum();
    let mut out = Vec::with_capacity(12 + json.len() + body_len);
    out.write_all(CONTAINER_MAGIC)?;
    out.write_u32::<LittleEndian>(CONTAINER_VERSION)?;
    out.write_u32::<LittleEndian>(json.len() as u32)?;
    out.write_all(&json)?;
    for (tag, _, body) in &sections {
        out.write_all(tag)?;
        out.write_u32::<LittleEndian>(body.len() as u32)?;
        out.write_all(body)?;
    }
    Ok(out)
}

/// 解包容器
pub fn decode_container(bytes: &[u8]) -> Result<ContainerContent> {
    let mut cursor = BinaryCursor::new(bytes);
    if cursor.read_array::<4>()? != *CONTAINER_MAGIC {
        return Err(ParseError::new(0, crate::ParseErrorReason::BadMagic).into());
    }
    let version = cursor.read_u32()?;
    if version != CONTAINER_VERSION {
        return Err(cursor
            .error(crate::ParseErrorReason::UnsupportedVersion(version.to_string()))
            .into());
    }
    let header_len = cursor.read_count_u32(1)?;
    let header: ContainerHeader = serde_json::from_slice(cursor.read_bytes(header_len)?)
        .map_err(|e| MmdError::Container(format!("invalid header: {}", e)))?;

    let mut bodies = Vec::with_capacity(header.sections.len());
    for info in &header.sections {
        let tag = cursor.read_array::<4>()?;
        if tag != info.tag.as_bytes() {
            return Err(MmdError::Container(format!(
                "section '{}' expected, found '{}'",
                info.tag,
                String::from_utf8_lossy(&tag)
            )));
        }
        let len = cursor.read_count_u32(1)?;
        let start = cursor.position();
        bodies.push((tag, info.records, start, cursor.read_bytes(len)?));
    }

    match header.kind {
        ContainerKind::Model => {
            let source = bodies
                .iter()
                .find(|(tag, ..)| *tag == TAG_SOURCE)
                .map(|(_, _, _, body)| *body)
                .ok_or_else(|| MmdError::Container("model container without source".into()))?;
            Ok(ContainerContent::Model(decode_model(source)?))
        }
        ContainerKind::Motion => {
            let mut motion = RawMotion::new(header.name);
            for (tag, records, start, body) in bodies {
                let mut c = BinaryCursor::new(body);
                let shift = |e: ParseError| -> MmdError { ParseError::new(start + e.offset, e.reason).into() };
                for _ in 0..records {
                    match tag {
                        TAG_BONE => motion.bones.push(BoneRecord::read(&mut c).map_err(shift)?),
                        TAG_MORPH => motion.morphs.push(MorphRecord::read(&mut c).map_err(shift)?),
                        TAG_CAMERA => motion.cameras.push(CameraRecord::read(&mut c).map_err(shift)?),
                        TAG_LIGHT => motion.lights.push(LightRecord::read(&mut c).map_err(shift)?),
                        TAG_SHADOW => motion.shadows.push(ShadowRecord::read(&mut c).map_err(shift)?),
                        TAG_PROPERTY => motion.properties.push(PropertyRecord::read(&mut c).map_err(shift)?),
                        other => {
                            log::warn!("[容器] 跳过未知段 '{}'", String::from_utf8_lossy(&other));
                            break;
                        }
                    }
                }
                if !c.is_empty() && tag != TAG_SOURCE {
                    return Err(MmdError::Container(format!(
                        "section '{}' has {} trailing bytes",
                        String::from_utf8_lossy(&tag),
                        c.remaining()
                    )));
                }
            }
            Ok(ContainerContent::Motion(motion))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn motion_survives_bit_exactly() {
        let mut motion = RawMotion::new("bits");
        motion.bones.push(BoneRecord {
            name: "腕".into(),
            frame: 7,
            position: Vec3::new(-0.0, f32::MIN_POSITIVE / 2.0, 1.0e-7),
            rotation: Quat::from_xyzw(0.1, 0.2, 0.3, 0.9),
            interpolation: [127; 64],
        });
        motion.shadows.push(ShadowRecord {
            frame: 1,
            mode: 2,
            distance: 0.0875,
        });

        let bytes = encode_motion(&motion).unwrap();
        let ContainerContent::Motion(decoded) = decode_container(&bytes).unwrap() else {
            panic!("expected motion");
        };
        assert_eq!(decoded.model_name, "bits");
        let a = decoded.bones[0].position.to_array().map(f32::to_bits);
        let b = motion.bones[0].position.to_array().map(f32::to_bits);
        assert_eq!(a, b);
        assert_eq!(decoded, motion);
    }

    #[test]
    fn truncated_sjis_names_match_the_vmd_decode() {
        let mut motion = RawMotion::new("cut");
        motion.bones.push(BoneRecord {
            name: "右腕捩れ右腕捩".into(),
            frame: 0,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            interpolation: [20; 64],
        });
        motion.morphs.push(MorphRecord {
            name: "あいうえおかき".into(),
            frame: 0,
            weight: 1.0,
        });
        let mut vmd = crate::animation::encode_vmd(&motion).unwrap();
        // 两个名称字段的第 15 字节都写成双字节字符的前半
        let bone_name_end = HEADER_SIZE + MODEL_NAME_SIZE + 4 + BONE_NAME_SIZE;
        vmd[bone_name_end - 1] = 0x83;
        let morph_name_end = bone_name_end - BONE_NAME_SIZE + BONE_RECORD_SIZE + 4 + MORPH_NAME_SIZE;
        vmd[morph_name_end - 1] = 0x82;

        let from_vmd = crate::animation::decode_vmd(&vmd).unwrap();
        assert!(from_vmd.bones[0].name.as_str().ends_with('\u{FFFD}'));
        assert_eq!(from_vmd.morphs[0].name.as_bytes().len(), MORPH_NAME_SIZE);

        let ContainerContent::Motion(from_container) = decode_container(&encode_motion(&from_vmd).unwrap()).unwrap() else {
            panic!("expected motion");
        };
        assert_eq!(from_container, from_vmd);
        assert_eq!(crate::animation::encode_vmd(&from_container).unwrap(), vmd);
    }

    #[test]
    fn corrupt_magic_and_truncation_fail() {
        assert!(decode_container(b"XXXX").is_err());
        let bytes = encode_motion(&RawMotion::new("m")).unwrap();
        assert!(decode_container(&bytes[..bytes.len() - 3]).is_err());
    }
}
