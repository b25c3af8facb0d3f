//! PMX 2.0 / 2.1 解析
//!
//! 顶点、面、纹理、材质只计数或保留名称，骨骼、Morph、刚体、关节完整解析。

use glam::{Quat, Vec3};

use crate::binary::{BinaryCursor, TextEncoding};
use crate::morph::*;
use crate::{ParseError, ParseErrorReason};

use super::*;

pub(crate) const PMX_MAGIC: &[u8; 4] = b"PMX ";

/// 全局设置
#[derive(Debug, Clone, Copy)]
struct Globals {
    encoding: TextEncoding,
    additional_uv: u8,
    vertex_index: u8,
    texture_index: u8,
    material_index: u8,
    bone_index: u8,
    morph_index: u8,
    rigid_index: u8,
}

fn invalid(cursor: &BinaryCursor<'_>, what: String) -> ParseError {
    cursor.error(ParseErrorReason::InvalidValue(what))
}

fn check_index_size(cursor: &BinaryCursor<'_>, size: u8, what: &str) -> Result<u8, ParseError> {
    match size {
        1 | 2 | 4 => Ok(size),
        other => Err(invalid(cursor, format!("{} index size {}", what, other))),
    }
}

/// 可选索引：负数表示无
fn optional(index: i32) -> Option<usize> {
    usize::try_from(index).ok()
}

fn read_globals(cursor: &mut BinaryCursor<'_>) -> Result<Globals, ParseError> {
    let count = cursor.read_u8()? as usize;
    if count < 8 {
        return Err(invalid(cursor, format!("globals count {}", count)));
    }
    let at = cursor.position();
    let g = cursor.read_bytes(count)?;
    let encoding = match g[0] {
        0 => TextEncoding::Utf16Le,
        1 => TextEncoding::Utf8,
        other => {
            return Err(ParseError::new(
                at,
                ParseErrorReason::InvalidValue(format!("text encoding {}", other)),
            ))
        }
    };
    if g[1] > 4 {
        return Err(ParseError::new(
            at + 1,
            ParseErrorReason::InvalidValue(format!("additional uv count {}", g[1])),
        ));
    }
    Ok(Globals {
        encoding,
        additional_uv: g[1],
        vertex_index: check_index_size(cursor, g[2], "vertex")?,
        texture_index: check_index_size(cursor, g[3], "texture")?,
        material_index: check_index_size(cursor, g[4], "material")?,
        bone_index: check_index_size(cursor, g[5], "bone")?,
        morph_index: check_index_size(cursor, g[6], "morph")?,
        rigid_index: check_index_size(cursor, g[7], "rigid body")?,
    })
}

pub(crate) fn decode_pmx(cursor: &mut BinaryCursor<'_>) -> Result<MotionModel, ParseError> {
    if cursor.read_array::<4>()? != *PMX_MAGIC {
        return Err(ParseError::new(0, ParseErrorReason::BadMagic));
    }
    let version = cursor.read_f32()?;
    if version != 2.0 && version != 2.1 {
        return Err(ParseError::new(
            4,
            ParseErrorReason::UnsupportedVersion(format!("PMX {}", version)),
        ));
    }
    let g = read_globals(cursor)?;

    let mut model = MotionModel::new(ModelFormat::Pmx(version), cursor.read_text(g.encoding)?);
    model.name_en = cursor.read_text(g.encoding)?;
    model.comment = cursor.read_text(g.encoding)?;
    let _comment_en = cursor.read_text(g.encoding)?;

    model.vertex_count = skip_vertices(cursor, &g)?;
    let index_count = cursor.read_count_i32(g.vertex_index as usize)?;
    cursor.skip(index_count * g.vertex_index as usize)?;
    model.face_count = index_count / 3;

    let texture_count = cursor.read_count_i32(4)?;
    for _ in 0..texture_count {
        model.texture_paths.push(cursor.read_text(g.encoding)?);
    }

    let material_count = cursor.read_count_i32(4)?;
    for _ in 0..material_count {
        model.material_names.push(read_material(cursor, &g)?);
    }

    let bone_count = cursor.read_count_i32(4)?;
    for index in 0..bone_count {
        model.bones.push(read_bone(cursor, &g, index)?);
    }

    let morph_count = cursor.read_count_i32(4)?;
    for _ in 0..morph_count {
        model.morphs.push(read_morph(cursor, &g)?);
    }

    skip_display_frames(cursor, &g)?;

    let body_count = cursor.read_count_i32(4)?;
    for _ in 0..body_count {
        let body = read_rigid_body(cursor, &g)?;
        model.rigid_bodies.push(body);
    }

    let joint_count = cursor.read_count_i32(4)?;
    for _ in 0..joint_count {
        model.constraints.push(read_joint(cursor, &g)?);
    }

    if !cursor.is_empty() {
        log::debug!("[PMX] 关节之后还有 {} 字节（软体等）未解析", cursor.remaining());
    }
    Ok(model)
}

fn skip_vertices(cursor: &mut BinaryCursor<'_>, g: &Globals) -> Result<usize, ParseError> {
    let min_size = 32 + 16 * g.additional_uv as usize + 1 + g.bone_index as usize + 4;
    let count = cursor.read_count_i32(min_size)?;
    let bone = g.bone_index as usize;
    for _ in 0..count {
        // 位置、法线、UV、追加 UV
        cursor.skip(32 + 16 * g.additional_uv as usize)?;
        let weight_type = cursor.read_u8()?;
        let weight_len = match weight_type {
            0 => bone,
            1 => bone * 2 + 4,
            2 | 4 => bone * 4 + 16,
            3 => bone * 2 + 4 + 36,
            other => return Err(invalid(cursor, format!("vertex weight type {}", other))),
        };
        cursor.skip(weight_len + 4)?;
    }
    Ok(count)
}

fn read_material(cursor: &mut BinaryCursor<'_>, g: &Globals) -> Result<String, ParseError> {
    let name = cursor.read_text(g.encoding)?;
    let _name_en = cursor.read_text(g.encoding)?;
    // diffuse4 specular3 strength ambient3 flags edge4 edge_size
    cursor.skip(16 + 12 + 4 + 12 + 1 + 16 + 4)?;
    cursor.read_index(g.texture_index)?;
    cursor.read_index(g.texture_index)?;
    let _env_mode = cursor.read_u8()?;
    match cursor.read_u8()? {
        0 => {
            cursor.read_index(g.texture_index)?;
        }
        1 => {
            cursor.read_u8()?;
        }
        other => return Err(invalid(cursor, format!("toon reference {}", other))),
    }
    let _memo = cursor.read_text(g.encoding)?;
    let _surface_count = cursor.read_i32()?;
    Ok(name)
}

fn read_bone(cursor: &mut BinaryCursor<'_>, g: &Globals, index: usize) -> Result<BoneDef, ParseError> {
    let name = cursor.read_text(g.encoding)?;
    let mut bone = BoneDef::new(index, name, Vec3::ZERO);
    bone.name_en = cursor.read_text(g.encoding)?;
    bone.position = flip_z(cursor.read_vec3()?);
    bone.parent = optional(cursor.read_index(g.bone_index)?);
    bone.transform_level = cursor.read_i32()?;
    bone.flags = cursor.read_u16()?;

    if bone.has_flag(bone_flags::TAIL_IS_BONE) {
        cursor.read_index(g.bone_index)?;
    } else {
        cursor.read_vec3()?;
    }

    let rotation_grant = bone.has_flag(bone_flags::ROTATION_GRANT);
    let position_grant = bone.has_flag(bone_flags::POSITION_GRANT);
    if rotation_grant || position_grant {
        let source = cursor.read_index(g.bone_index)?;
        let ratio = cursor.read_f32()?;
        let is_local = bone.has_flag(bone_flags::LOCAL_GRANT);
        // 源骨骼越界在加载收尾阶段处理
        bone.grant = optional(source).map(|source_bone| GrantParam {
            target_bone: index,
            source_bone,
            ratio,
            is_local,
            affect_rotation: rotation_grant,
            affect_position: position_grant,
        });
    }

    if bone.has_flag(bone_flags::FIXED_AXIS) {
        bone.fixed_axis = Some(flip_z(cursor.read_vec3()?));
    }
    if bone.has_flag(bone_flags::LOCAL_AXES) {
        cursor.skip(24)?;
    }
    if bone.has_flag(bone_flags::EXTERNAL_PARENT) {
        cursor.read_i32()?;
    }

    if bone.has_flag(bone_flags::IK) {
        let target = cursor.read_index(g.bone_index)?;
        let iterations = cursor.read_i32()?.max(0) as u32;
        let limit_angle = cursor.read_f32()?;
        let link_count = cursor.read_count_i32(g.bone_index as usize + 1)?;
        let mut links = Vec::new();
        for _ in 0..link_count {
            let link_bone = cursor.read_index(g.bone_index)?;
            let limits = match cursor.read_u8()? {
                0 => None,
                _ => {
                    let min = cursor.read_vec3()?;
                    let max = cursor.read_vec3()?;
                    // 右手系下所有分量取负并交换上下限
                    Some((-max, -min))
                }
            };
            if let Some(link) = optional(link_bone) {
                links.push(IkLink { bone: link, limits });
            }
        }
        bone.ik = optional(target).map(|target_bone| IkParam {
            target_bone,
            iterations,
            limit_angle,
            links,
        });
    }
    Ok(bone)
}

fn read_morph(cursor: &mut BinaryCursor<'_>, g: &Globals) -> Result<MorphDef, ParseError> {
    let name = cursor.read_text(g.encoding)?;
    let name_en = cursor.read_text(g.encoding)?;
    let panel = cursor.read_u8()?;
    let kind_at = cursor.position();
    let kind = cursor.read_u8()?;
    let count = cursor.read_count_i32(1)?;

    let offsets = match kind {
        0 | 9 => {
            let mut v = Vec::new();
            for _ in 0..count {
                let morph = cursor.read_index(g.morph_index)?;
                let ratio = cursor.read_f32()?;
                if let Some(morph) = optional(morph) {
                    v.push(GroupOffset { morph, ratio });
                }
            }
            if kind == 0 {
                MorphOffsets::Group(v)
            } else {
                MorphOffsets::Flip(v)
            }
        }
        1 => {
            let mut v = Vec::new();
            for _ in 0..count {
                v.push(VertexOffset {
                    vertex: cursor.read_vertex_index(g.vertex_index)?,
                    offset: flip_z(cursor.read_vec3()?),
                });
            }
            MorphOffsets::Vertex(v)
        }
        2 => {
            let mut v = Vec::new();
            for _ in 0..count {
                let bone = cursor.read_index(g.bone_index)?;
                let translation = flip_z(cursor.read_vec3()?);
                let r = cursor.read_vec4()?;
                if let Some(bone) = optional(bone) {
                    v.push(BoneOffset {
                        bone,
                        translation,
                        rotation: flip_rotation(Quat::from_xyzw(r.x, r.y, r.z, r.w)),
                    });
                }
            }
            MorphOffsets::Bone(v)
        }
        3..=7 => {
            let mut v = Vec::new();
            for _ in 0..count {
                v.push(UvOffset {
                    vertex: cursor.read_vertex_index(g.vertex_index)?,
                    offset: cursor.read_vec4()?,
                });
            }
            MorphOffsets::Uv {
                channel: kind - 3,
                offsets: v,
            }
        }
        8 => {
            let mut v = Vec::new();
            for _ in 0..count {
                v.push(MaterialOffset {
                    material: optional(cursor.read_index(g.material_index)?),
                    operation: cursor.read_u8()?,
                    diffuse: cursor.read_vec4()?,
                    specular: cursor.read_vec3()?,
                    specular_strength: cursor.read_f32()?,
                    ambient: cursor.read_vec3()?,
                    edge_color: cursor.read_vec4()?,
                    edge_size: cursor.read_f32()?,
                    texture_tint: cursor.read_vec4()?,
                    environment_tint: cursor.read_vec4()?,
                    toon_tint: cursor.read_vec4()?,
                });
            }
            MorphOffsets::Material(v)
        }
        10 => {
            let mut v = Vec::new();
            for _ in 0..count {
                let body = cursor.read_index(g.rigid_index)?;
                let local = cursor.read_u8()? != 0;
                let velocity = cursor.read_vec3()?;
                let torque = cursor.read_vec3()?;
                if let Some(rigid_body) = optional(body) {
                    v.push(ImpulseOffset {
                        rigid_body,
                        local,
                        velocity,
                        torque,
                    });
                }
            }
            MorphOffsets::Impulse(v)
        }
        other => {
            return Err(ParseError::new(
                kind_at,
                ParseErrorReason::InvalidValue(format!("morph type {}", other)),
            ))
        }
    };

    Ok(MorphDef {
        name,
        name_en,
        panel,
        offsets,
    })
}

fn skip_display_frames(cursor: &mut BinaryCursor<'_>, g: &Globals) -> Result<(), ParseError> {
    let count = cursor.read_count_i32(9)?;
    for _ in 0..count {
        cursor.read_text(g.encoding)?;
        cursor.read_text(g.encoding)?;
        cursor.read_u8()?;
        let elements = cursor.read_count_i32(2)?;
        for _ in 0..elements {
            match cursor.read_u8()? {
                0 => cursor.read_index(g.bone_index)?,
                1 => cursor.read_index(g.morph_index)?,
                other => return Err(invalid(cursor, format!("display element type {}", other))),
            };
        }
    }
    Ok(())
}

/// MMD 欧拉角 (Y-X-Z) → 右手四元数
pub(crate) fn body_rotation(euler: Vec3) -> Quat {
    let q = Quat::from_rotation_y(euler.y) * Quat::from_rotation_x(euler.x) * Quat::from_rotation_z(euler.z);
    flip_rotation(q)
}

/// 关节欧拉角 (Z-Y-X) → 右手四元数
pub(crate) fn joint_rotation(euler: Vec3) -> Quat {
    let q = Quat::from_rotation_z(euler.z) * Quat::from_rotation_y(euler.y) * Quat::from_rotation_x(euler.x);
    flip_rotation(q)
}

pub(crate) fn read_shape(cursor: &BinaryCursor<'_>, kind: u8, size: Vec3) -> Result<RigidBodyShape, ParseError> {
    match kind {
        0 => Ok(RigidBodyShape::Sphere { radius: size.x }),
        1 => Ok(RigidBodyShape::Box { half_extents: size }),
        2 => Ok(RigidBodyShape::Capsule {
            radius: size.x,
            height: size.y,
        }),
        other => Err(invalid(cursor, format!("rigid body shape {}", other))),
    }
}

fn read_rigid_body(cursor: &mut BinaryCursor<'_>, g: &Globals) -> Result<RigidBodyDef, ParseError> {
    let name = cursor.read_text(g.encoding)?;
    let _name_en = cursor.read_text(g.encoding)?;
    let bone = optional(cursor.read_index(g.bone_index)?);
    let collision_group = cursor.read_u8()?;
    let collision_mask = cursor.read_u16()?;
    let shape_kind = cursor.read_u8()?;
    let size = cursor.read_vec3()?;
    let shape = read_shape(cursor, shape_kind, size)?;
    let position = flip_z(cursor.read_vec3()?);
    let rotation = body_rotation(cursor.read_vec3()?);
    let mass = cursor.read_f32()?;
    let linear_damping = cursor.read_f32()?;
    let angular_damping = cursor.read_f32()?;
    let restitution = cursor.read_f32()?;
    let friction = cursor.read_f32()?;
    let mode = cursor.read_u8()?;
    let kind = RigidBodyKind::from_u8(mode)
        .ok_or_else(|| invalid(cursor, format!("rigid body mode {}", mode)))?;

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
        position,
        rotation,
        // 骨骼相对偏移在加载收尾阶段计算
        local_offset: RigidTransform::new(position, rotation),
    })
}

/// 关节限制翻转到右手系
pub(crate) fn flip_limits(pos_min: Vec3, pos_max: Vec3, rot_min: Vec3, rot_max: Vec3) -> [Vec3; 4] {
    [
        Vec3::new(pos_min.x, pos_min.y, -pos_max.z),
        Vec3::new(pos_max.x, pos_max.y, -pos_min.z),
        Vec3::new(-rot_max.x, -rot_max.y, rot_min.z),
        Vec3::new(-rot_min.x, -rot_min.y, rot_max.z),
    ]
}

fn read_joint(cursor: &mut BinaryCursor<'_>, g: &Globals) -> Result<ConstraintDef, ParseError> {
    let name = cursor.read_text(g.encoding)?;
    let _name_en = cursor.read_text(g.encoding)?;
    let kind = cursor.read_u8()?;
    if kind > 5 {
        return Err(invalid(cursor, format!("joint type {}", kind)));
    }
    let at = cursor.position();
    let a = cursor.read_index(g.rigid_index)?;
    let b = cursor.read_index(g.rigid_index)?;
    let (body_a, body_b) = match (optional(a), optional(b)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ParseError::new(
                at,
                ParseErrorReason::InvalidValue(format!("joint '{}' rigid body index {} / {}", name, a, b)),
            ))
        }
    };
    let position = flip_z(cursor.read_vec3()?);
    let rotation = joint_rotation(cursor.read_vec3()?);
    let pos_min = cursor.read_vec3()?;
    let pos_max = cursor.read_vec3()?;
    let rot_min = cursor.read_vec3()?;
    let rot_max = cursor.read_vec3()?;
    let [linear_lower, linear_upper, angular_lower, angular_upper] = flip_limits(pos_min, pos_max, rot_min, rot_max);
    let spring_position = cursor.read_vec3()?;
    let spring_rotation = cursor.read_vec3()?;

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
        spring_position,
        spring_rotation,
    })
}
