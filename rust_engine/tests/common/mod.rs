//! 集成测试共用的合成数据
#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use glam::{Quat, Vec3};
use mmd_engine::animation::{BoneRecord, IkState, MorphRecord, PropertyRecord, RawMotion};
use mmd_engine::binary::encode_shift_jis;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 四个通道都是直线的插值表
pub fn linear_interpolation() -> [u8; 64] {
    let mut table = [0u8; 64];
    for channel in 0..4 {
        table[channel] = 20;
        table[channel + 4] = 20;
        table[channel + 8] = 107;
        table[channel + 12] = 107;
    }
    table
}

/// 一段包含骨骼、表情、属性的短动作
pub fn sample_motion() -> RawMotion {
    let mut motion = RawMotion::new("テスト");
    for (frame, x) in [(0u32, 0.0f32), (30, 3.0)] {
        motion.bones.push(BoneRecord {
            name: "センター".into(),
            frame,
            position: Vec3::new(x, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            interpolation: linear_interpolation(),
        });
    }
    motion.bones.push(BoneRecord {
        name: "存在しない".into(),
        frame: 0,
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        interpolation: linear_interpolation(),
    });
    for (frame, weight) in [(0u32, 0.0f32), (30, 1.0)] {
        motion.morphs.push(MorphRecord {
            name: "まばたき".into(),
            frame,
            weight,
        });
    }
    motion.properties.push(PropertyRecord {
        frame: 0,
        visible: true,
        ik_states: vec![IkState {
            name: "右足ＩＫ".into(),
            enabled: false,
        }],
    });
    motion
}

fn write_vec3(out: &mut Vec<u8>, v: Vec3) {
    for c in v.to_array() {
        out.write_f32::<LittleEndian>(c).unwrap();
    }
}

// ========== PMX ==========

pub struct PmxBone {
    pub name: String,
    pub position: Vec3,
    pub parent: i32,
    pub flags: u16,
    /// (源骨骼, 比例)
    pub grant: Option<(i32, f32)>,
    /// (目标骨骼, 链节骨骼)
    pub ik: Option<(i32, Vec<i32>)>,
}

impl PmxBone {
    pub fn new(name: &str, position: Vec3, parent: i32) -> Self {
        Self {
            name: name.into(),
            position,
            parent,
            flags: 0x0002 | 0x0008 | 0x0010,
            grant: None,
            ik: None,
        }
    }

    pub fn granted(mut self, source: i32, ratio: f32) -> Self {
        self.flags |= 0x0100;
        self.grant = Some((source, ratio));
        self
    }

    pub fn with_ik(mut self, target: i32, links: Vec<i32>) -> Self {
        self.flags |= 0x0020;
        self.ik = Some((target, links));
        self
    }
}

pub struct PmxBody {
    pub name: String,
    pub bone: i32,
    pub group: u8,
    pub mask: u16,
    /// 0 球 1 箱 2 胶囊
    pub shape: u8,
    pub size: Vec3,
    pub position: Vec3,
    pub mass: f32,
    pub mode: u8,
}

impl PmxBody {
    pub fn sphere(name: &str, bone: i32, position: Vec3, mode: u8) -> Self {
        Self {
            name: name.into(),
            bone,
            group: 0,
            mask: 0,
            shape: 0,
            size: Vec3::new(0.5, 0.0, 0.0),
            position,
            mass: 1.0,
            mode,
        }
    }
}

pub struct PmxJoint {
    pub name: String,
    pub body_a: i32,
    pub body_b: i32,
    pub position: Vec3,
}

/// 最小 PMX 2.0 文件（UTF-8，索引均为 4 字节）
#[derive(Default)]
pub struct PmxBuilder {
    pub name: String,
    pub bones: Vec<PmxBone>,
    /// (名称, 面板)，均为空顶点 Morph
    pub morphs: Vec<(String, u8)>,
    pub bodies: Vec<PmxBody>,
    pub joints: Vec<PmxJoint>,
}

fn write_text(out: &mut Vec<u8>, text: &str) {
    out.write_i32::<LittleEndian>(text.len() as i32).unwrap();
    out.extend_from_slice(text.as_bytes());
}

impl PmxBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"PMX ");
        out.write_f32::<LittleEndian>(2.0).unwrap();
        out.push(8);
        out.extend_from_slice(&[1, 0, 4, 4, 4, 4, 4, 4]);
        write_text(&mut out, &self.name);
        write_text(&mut out, "");
        write_text(&mut out, "comment");
        write_text(&mut out, "");

        // 顶点、面、纹理、材质
        for _ in 0..4 {
            out.write_i32::<LittleEndian>(0).unwrap();
        }

        out.write_i32::<LittleEndian>(self.bones.len() as i32).unwrap();
        for bone in &self.bones {
            write_text(&mut out, &bone.name);
            write_text(&mut out, "");
            write_vec3(&mut out, bone.position);
            out.write_i32::<LittleEndian>(bone.parent).unwrap();
            out.write_i32::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(bone.flags).unwrap();
            write_vec3(&mut out, Vec3::ZERO);
            if let Some((source, ratio)) = bone.grant {
                out.write_i32::<LittleEndian>(source).unwrap();
                out.write_f32::<LittleEndian>(ratio).unwrap();
            }
            if let Some((target, links)) = &bone.ik {
                out.write_i32::<LittleEndian>(*target).unwrap();
                out.write_i32::<LittleEndian>(40).unwrap();
                out.write_f32::<LittleEndian>(2.0).unwrap();
                out.write_i32::<LittleEndian>(links.len() as i32).unwrap();
                for link in links {
                    out.write_i32::<LittleEndian>(*link).unwrap();
                    out.push(0);
                }
            }
        }

        out.write_i32::<LittleEndian>(self.morphs.len() as i32).unwrap();
        for (name, panel) in &self.morphs {
            write_text(&mut out, name);
            write_text(&mut out, "");
            out.push(*panel);
            out.push(1);
            out.write_i32::<LittleEndian>(0).unwrap();
        }

        // 表示枠
        out.write_i32::<LittleEndian>(0).unwrap();

        out.write_i32::<LittleEndian>(self.bodies.len() as i32).unwrap();
        for body in &self.bodies {
            write_text(&mut out, &body.name);
            write_text(&mut out, "");
            out.write_i32::<LittleEndian>(body.bone).unwrap();
            out.push(body.group);
            out.write_u16::<LittleEndian>(body.mask).unwrap();
            out.push(body.shape);
            write_vec3(&mut out, body.size);
            write_vec3(&mut out, body.position);
            write_vec3(&mut out, Vec3::ZERO);
            for v in [body.mass, 0.5, 0.5, 0.0, 0.5] {
                out.write_f32::<LittleEndian>(v).unwrap();
            }
            out.push(body.mode);
        }

        out.write_i32::<LittleEndian>(self.joints.len() as i32).unwrap();
        for joint in &self.joints {
            write_text(&mut out, &joint.name);
            write_text(&mut out, "");
            out.push(0);
            out.write_i32::<LittleEndian>(joint.body_a).unwrap();
            out.write_i32::<LittleEndian>(joint.body_b).unwrap();
            write_vec3(&mut out, joint.position);
            write_vec3(&mut out, Vec3::ZERO);
            // 线性全锁，角度 ±0.5
            write_vec3(&mut out, Vec3::ZERO);
            write_vec3(&mut out, Vec3::ZERO);
            write_vec3(&mut out, Vec3::splat(-0.5));
            write_vec3(&mut out, Vec3::splat(0.5));
            write_vec3(&mut out, Vec3::ZERO);
            write_vec3(&mut out, Vec3::ZERO);
        }
        out
    }
}

/// 根骨骼 + 一根带物理的头发骨骼
pub fn hair_model() -> PmxBuilder {
    let mut pmx = PmxBuilder::new("hair");
    pmx.bones.push(PmxBone::new("頭", Vec3::new(0.0, 10.0, 0.0), -1));
    pmx.bones.push(PmxBone::new("髪", Vec3::new(0.0, 9.0, 0.0), 0));
    pmx.bodies.push(PmxBody::sphere("頭", 0, Vec3::new(0.0, 10.0, 0.0), 0));
    pmx.bodies.push(PmxBody::sphere("髪", 1, Vec3::new(0.0, 8.0, 0.0), 1));
    pmx.joints.push(PmxJoint {
        name: "髪".into(),
        body_a: 0,
        body_b: 1,
        position: Vec3::new(0.0, 9.0, 0.0),
    });
    pmx
}

// ========== PMD ==========

fn write_sjis(out: &mut Vec<u8>, text: &str, len: usize) {
    out.extend_from_slice(&encode_shift_jis(text, len));
}

/// 最小 PMD：`bones` 为 (名称, 父骨骼, 类型, ik_parent, 位置)
pub struct PmdBuilder {
    pub bones: Vec<(String, u16, u8, u16, Vec3)>,
    /// (名称, 顶点数据)，第一个为基础表情
    pub skins: Vec<(String, u8, Vec<(u32, Vec3)>)>,
    /// (IK 骨骼, 目标骨骼, 链节)
    pub iks: Vec<(u16, u16, Vec<u16>)>,
    pub with_english: bool,
    /// (名称, 骨骼, 相对位置, 模式)
    pub bodies: Vec<(String, u16, Vec3, u8)>,
}

impl PmdBuilder {
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"Pmd");
        out.write_f32::<LittleEndian>(1.0).unwrap();
        write_sjis(&mut out, "ＰＭＤ", 20);
        write_sjis(&mut out, "comment", 256);

        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();

        out.write_u16::<LittleEndian>(self.bones.len() as u16).unwrap();
        for (name, parent, kind, ik_parent, position) in &self.bones {
            write_sjis(&mut out, name, 20);
            out.write_u16::<LittleEndian>(*parent).unwrap();
            out.write_u16::<LittleEndian>(0xFFFF).unwrap();
            out.push(*kind);
            out.write_u16::<LittleEndian>(*ik_parent).unwrap();
            write_vec3(&mut out, *position);
        }

        out.write_u16::<LittleEndian>(self.iks.len() as u16).unwrap();
        for (bone, target, links) in &self.iks {
            out.write_u16::<LittleEndian>(*bone).unwrap();
            out.write_u16::<LittleEndian>(*target).unwrap();
            out.push(links.len() as u8);
            out.write_u16::<LittleEndian>(40).unwrap();
            out.write_f32::<LittleEndian>(0.5).unwrap();
            for link in links {
                out.write_u16::<LittleEndian>(*link).unwrap();
            }
        }

        out.write_u16::<LittleEndian>(self.skins.len() as u16).unwrap();
        for (name, panel, vertices) in &self.skins {
            write_sjis(&mut out, name, 20);
            out.write_u32::<LittleEndian>(vertices.len() as u32).unwrap();
            out.push(*panel);
            for (index, offset) in vertices {
                out.write_u32::<LittleEndian>(*index).unwrap();
                write_vec3(&mut out, *offset);
            }
        }

        // 表情枠、骨骼枠名称、骨骼枠
        out.push(0);
        out.push(0);
        out.write_u32::<LittleEndian>(0).unwrap();

        if !self.with_english && self.bodies.is_empty() {
            return out;
        }
        out.push(self.with_english as u8);
        if self.with_english {
            write_sjis(&mut out, "PMD", 20);
            write_sjis(&mut out, "", 256);
            for i in 0..self.bones.len() {
                write_sjis(&mut out, &format!("bone{}", i), 20);
            }
            for _ in 1..self.skins.len() {
                write_sjis(&mut out, "blink", 20);
            }
        }
        out.extend_from_slice(&[0u8; 1000]);

        out.write_u32::<LittleEndian>(self.bodies.len() as u32).unwrap();
        for (name, bone, relative, mode) in &self.bodies {
            write_sjis(&mut out, name, 20);
            out.write_u16::<LittleEndian>(*bone).unwrap();
            out.push(0);
            out.write_u16::<LittleEndian>(0).unwrap();
            out.push(0);
            write_vec3(&mut out, Vec3::new(0.5, 0.0, 0.0));
            write_vec3(&mut out, *relative);
            write_vec3(&mut out, Vec3::ZERO);
            for v in [1.0f32, 0.5, 0.5, 0.0, 0.5] {
                out.write_f32::<LittleEndian>(v).unwrap();
            }
            out.push(*mode);
        }
        out.write_u32::<LittleEndian>(0).unwrap();
        out
    }
}
