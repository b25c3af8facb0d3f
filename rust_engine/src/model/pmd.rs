//! PMD 解析
//!
//! 固定长度记录，名称为 Shift-JIS。英文名、Toon、刚体、关节段是可选的，
//! 文件可以在任意一段之前结束。

use std::f32::consts::PI;

use glam::Vec3;

use crate::binary::BinaryCursor;
use crate::morph::{MorphDef, MorphOffsets, VertexOffset};
use crate::{ParseError, ParseErrorReason};

use super::pmx::{body_rotation, flip_limits, joint_rotation, read_shape};
use super::*;

pub(crate) const PMD_MAGIC: &[u8; 3] = b"Pmd";

const NAME_SIZE: usize = 20;
const COMMENT_SIZE: usize = 256;
const VERTEX_SIZE: usize = 38;
const MATERIAL_SIZE: usize = 70;
const BONE_SIZE: usize = 39;
const SKIN_VERTEX_SIZE: usize = 16;
const DISPLAY_NAME_SIZE: usize = 50;
const TOON_SIZE: usize = 100;
const TOON_COUNT: usize = 10;
const RIGID_BODY_SIZE: usize = 83;
const JOINT_SIZE: usize = 124;

const NO_BONE: u16 = 0xFFFF;

/// 骨骼类型
mod bone_kind {
    pub const ROTATE_MOVE: u8 = 1;
    pub const IK: u8 = 2;
    pub const ROTATION_AFFECTED: u8 = 5;
    pub const INVISIBLE: u8 = 7;
    pub const ROTATION_LINKED: u8 = 9;
}

fn bone_ref(index: u16) -> Option<usize> {
    (index != NO_BONE).then_some(index as usize)
}

pub(crate) fn decode_pmd(cursor: &mut BinaryCursor<'_>) -> Result<MotionModel, ParseError> {
    if cursor.read_array::<3>()? != *PMD_MAGIC {
        return Err(ParseError::new(0, ParseErrorReason::BadMagic));
    }
    let version = cursor.read_f32()?;
    if version != 1.0 {
        return Err(ParseError::new(
            3,
            ParseErrorReason::UnsupportedVersion(format!("PMD {}", version)),
        ));
    }
    let mut model = MotionModel::new(ModelFormat::Pmd, cursor.read_fixed_sjis(NAME_SIZE)?);
    model.comment = cursor.read_fixed_sjis(COMMENT_SIZE)?;

    model.vertex_count = cursor.read_count_u32(VERTEX_SIZE)?;
    cursor.skip(model.vertex_count * VERTEX_SIZE)?;

    let index_count = cursor.read_count_u32(2)?;
    cursor.skip(index_count * 2)?;
    model.face_count = index_count / 3;

    let material_count = cursor.read_count_u32(MATERIAL_SIZE)?;
    for i in 0..material_count {
        cursor.skip(MATERIAL_SIZE - NAME_SIZE)?;
        let texture = cursor.read_fixed_sjis(NAME_SIZE)?;
        if !texture.is_empty() {
            model.texture_paths.push(texture);
        }
        model.material_names.push(format!("材質{}", i + 1));
    }

    let bone_count = cursor.read_count_u16(BONE_SIZE)?;
    for index in 0..bone_count {
        model.bones.push(read_bone(cursor, index)?);
    }

    let ik_count = cursor.read_count_u16(11)?;
    for _ in 0..ik_count {
        read_ik(cursor, &mut model)?;
    }

    let skin_count = cursor.read_count_u16(NAME_SIZE + 5)?;
    read_skins(cursor, &mut model, skin_count)?;

    // 表情枠、骨骼枠名称、骨骼枠
    let skin_display = cursor.read_u8()? as usize;
    cursor.skip(skin_display * 2)?;
    let display_names = cursor.read_u8()? as usize;
    cursor.skip(display_names * DISPLAY_NAME_SIZE)?;
    let bone_display = cursor.read_count_u32(3)?;
    cursor.skip(bone_display * 3)?;

    if cursor.is_empty() {
        return Ok(model);
    }
    if cursor.read_u8()? != 0 {
        model.name_en = cursor.read_fixed_sjis(NAME_SIZE)?;
        cursor.skip(COMMENT_SIZE)?;
        for bone in model.bones.iter_mut() {
            bone.name_en = cursor.read_fixed_sjis(NAME_SIZE)?;
        }
        // 基础表情没有英文名
        for i in 0..skin_count.saturating_sub(1) {
            let name_en = cursor.read_fixed_sjis(NAME_SIZE)?;
            if let Some(morph) = model.morphs.get_mut(i) {
                morph.name_en = name_en;
            }
        }
        cursor.skip(display_names * DISPLAY_NAME_SIZE)?;
    }

    if cursor.is_empty() {
        return Ok(model);
    }
    cursor.skip(TOON_COUNT * TOON_SIZE)?;

    if cursor.is_empty() {
        return Ok(model);
    }
    let body_count = cursor.read_count_u32(RIGID_BODY_SIZE)?;
    for _ in 0..body_count {
        let body = read_rigid_body(cursor, &model)?;
        model.rigid_bodies.push(body);
    }

    if cursor.is_empty() {
        return Ok(model);
    }
    let joint_count = cursor.read_count_u32(JOINT_SIZE)?;
    for _ in 0..joint_count {
        model.constraints.push(read_joint(cursor)?);
    }
    Ok(model)
}

fn read_bone(cursor: &mut BinaryCursor<'_>, index: usize) -> Result<BoneDef, ParseError> {
    let name = cursor.read_fixed_sjis(NAME_SIZE)?;
    let parent = bone_ref(cursor.read_u16()?);
    let tail = cursor.read_u16()?;
    let kind = cursor.read_u8()?;
    let ik_parent = cursor.read_u16()?;
    let position = flip_z(cursor.read_vec3()?);

    let mut bone = BoneDef::new(index, name, position);
    bone.parent = parent;
    match kind {
        bone_kind::ROTATE_MOVE => bone.flags |= bone_flags::MOVABLE,
        bone_kind::IK => bone.flags |= bone_flags::IK | bone_flags::MOVABLE,
        bone_kind::INVISIBLE => bone.flags &= !bone_flags::VISIBLE,
        _ => {}
    }

    // 回転影響下：跟随 ik_parent 旋转；回転連動：按 ik_parent% 跟随 tail
    let grant = match kind {
        bone_kind::ROTATION_AFFECTED => bone_ref(ik_parent).map(|source| (source, 1.0)),
        bone_kind::ROTATION_LINKED => bone_ref(tail).map(|source| (source, ik_parent as f32 * 0.01)),
        _ => None,
    };
    if let Some((source_bone, ratio)) = grant {
        bone.flags |= bone_flags::ROTATION_GRANT;
        bone.grant = Some(GrantParam {
            target_bone: index,
            source_bone,
            ratio,
            is_local: false,
            affect_rotation: true,
            affect_position: false,
        });
    }
    Ok(bone)
}

fn read_ik(cursor: &mut BinaryCursor<'_>, model: &mut MotionModel) -> Result<(), ParseError> {
    let at = cursor.position();
    let ik_bone = cursor.read_u16()? as usize;
    let target_bone = cursor.read_u16()? as usize;
    let chain_length = cursor.read_u8()? as usize;
    let iterations = cursor.read_u16()? as u32;
    let weight = cursor.read_f32()?;
    let mut links = Vec::with_capacity(chain_length);
    for _ in 0..chain_length {
        let bone = cursor.read_u16()? as usize;
        // 膝盖只允许单向弯曲
        let is_knee = model.bones.get(bone).is_some_and(|b| b.name.contains("ひざ"));
        let limits = is_knee.then(|| (Vec3::new(0.5f32.to_radians(), 0.0, 0.0), Vec3::new(PI, 0.0, 0.0)));
        links.push(IkLink { bone, limits });
    }
    let bone_count = model.bones.len();
    let out_of_range = [ik_bone, target_bone]
        .into_iter()
        .chain(links.iter().map(|l| l.bone))
        .find(|&b| b >= bone_count);
    if let Some(bad) = out_of_range {
        return Err(ParseError::new(
            at,
            ParseErrorReason::InvalidValue(format!("ik bone index {} / {}", bad, bone_count)),
        ));
    }
    let Some(owner) = model.bones.get_mut(ik_bone) else {
        return Err(ParseError::new(
            at,
            ParseErrorReason::InvalidValue(format!("ik bone index {}", ik_bone)),
        ));
    };
    owner.flags |= bone_flags::IK;
    owner.ik = Some(IkParam {
        target_bone,
        iterations,
        limit_angle: weight * 4.0,
        links,
    });
    Ok(())
}

fn read_skins(cursor: &mut BinaryCursor<'_>, model: &mut MotionModel, count: usize) -> Result<(), ParseError> {
    let mut base: Vec<u32> = Vec::new();
    for i in 0..count {
        let name = cursor.read_fixed_sjis(NAME_SIZE)?;
        let vertex_count = cursor.read_count_u32(SKIN_VERTEX_SIZE + 1)?;
        let panel = cursor.read_u8()?;
        let mut offsets = Vec::new();
        for _ in 0..vertex_count {
            let at = cursor.position();
            let index = cursor.read_u32()?;
            let offset = cursor.read_vec3()?;
            if i == 0 {
                // 基础表情：绝对顶点索引
                base.push(index);
                continue;
            }
            let vertex = *base.get(index as usize).ok_or_else(|| {
                ParseError::new(
                    at,
                    ParseErrorReason::InvalidValue(format!("skin '{}' base index {}", name, index)),
                )
            })?;
            offsets.push(VertexOffset {
                vertex,
                offset: flip_z(offset),
            });
        }
        if i == 0 && panel == 0 {
            continue;
        }
        model.morphs.push(MorphDef {
            name,
            name_en: String::new(),
            panel,
            offsets: MorphOffsets::Vertex(offsets),
        });
    }
    Ok(())
}

fn read_rigid_body(cursor: &mut BinaryCursor<'_>, model: &MotionModel) -> Result<RigidBodyDef, ParseError> {
    let name = cursor.read_fixed_sjis(NAME_SIZE)?;
    let bone = bone_ref(cursor.read_u16()?);
    let collision_group = cursor.read_u8()?;
    let collision_mask = cursor.read_u16()?;
    let shape_kind = cursor.read_u8()?;
    let size = cursor.read_vec3()?;
    let shape = read_shape(cursor, shape_kind, size)?;
    // 位置相对于骨骼
    let relative = flip_z(cursor.read_vec3()?);
    let rotation = body_rotation(cursor.read_vec3()?);
    let mass = cursor.read_f32()?;
    let linear_damping = cursor.read_f32()?;
    let angular_damping = cursor.read_f32()?;
    let restitution = cursor.read_f32()?;
    let friction = cursor.read_f32()?;
    let mode = cursor.read_u8()?;
    let kind = RigidBodyKind::from_u8(mode).ok_or_else(|| {
        cursor.error(ParseErrorReason::InvalidValue(format!("rigid body mode {}", mode)))
    })?;

    let bone_position = bone
        .and_then(|b| model.bones.get(b))
        .map_or(Vec3::ZERO, |b| b.position);
    Ok(RigidBodyDef {
        name,
        bone,
        shape,
        mass,
        linear_damping,
        angular_damping,
        friction,
        restitution,
        kind,
        collision_group,
        collision_mask,
        position: bone_position + relative,
        rotation,
        local_offset: RigidTransform::new(relative, rotation),
    })
}

fn read_joint(cursor: &mut BinaryCursor<'_>) -> Result<ConstraintDef, ParseError> {
    let name = cursor.read_fixed_sjis(NAME_SIZE)?;
    let body_a = cursor.read_u32()? as usize;
    let body_b = cursor.read_u32()? as usize;
    let position = flip_z(cursor.read_vec3()?);
    let rotation = joint_rotation(cursor.read_vec3()?);
    let pos_min = cursor.read_vec3()?;
    let pos_max = cursor.read_vec3()?;
    let rot_min = cursor.read_vec3()?;
    let rot_max = cursor.read_vec3()?;
    let [linear_lower, linear_upper, angular_lower, angular_upper] = flip_limits(pos_min, pos_max, rot_min, rot_max);
    Ok(ConstraintDef {
        name,
        body_a,
        body_b,
        position,
        rotation,
        linear_lower,
        linear_upper,
        angular_lower,
        angular_upper,
        spring_position: cursor.read_vec3()?,
        spring_rotation: cursor.read_vec3()?,
    })
}
