//! 模型加载器
//!
//! 按文件头分派到 PMX / PMD 解码，再做一次性的结构修正：
//! 父骨骼环路切断、付与顺序计算、刚体偏移换算与刚体模式重分类。

use std::collections::HashSet;
use std::task::Poll;

use crate::binary::BinaryCursor;
use crate::{ParseError, ParseErrorReason};

use super::pmd::{decode_pmd, PMD_MAGIC};
use super::pmx::{decode_pmx, PMX_MAGIC};
use super::{BoneDef, GrantParam, MotionModel, RigidBodyKind, RigidTransform};

/// 解码 PMX / PMD 模型
pub fn decode_model(bytes: &[u8]) -> Result<MotionModel, ParseError> {
    let mut cursor = BinaryCursor::new(bytes);
    let mut model = if bytes.starts_with(PMX_MAGIC) {
        decode_pmx(&mut cursor)?
    } else if bytes.starts_with(PMD_MAGIC) {
        decode_pmd(&mut cursor)?
    } else {
        return Err(ParseError::new(0, ParseErrorReason::BadMagic));
    };
    if !cursor.is_empty() {
        log::warn!("[Model] 忽略文件末尾 {} 字节", cursor.remaining());
    }

    finalize(&mut model);
    log::info!(
        "[Model] 加载完成: '{}' ({:?}), 顶点 {}, 面 {}, 骨骼 {}, 付与 {}, Morph {}, 刚体 {}, 关节 {}",
        model.name,
        model.format,
        model.vertex_count,
        model.face_count,
        model.bones.len(),
        model.grant_order.len(),
        model.morphs.len(),
        model.rigid_bodies.len(),
        model.constraints.len()
    );
    Ok(model)
}

/// 解码后的结构修正
pub(crate) fn finalize(model: &mut MotionModel) {
    cut_invalid_parents(&mut model.bones);
    for i in 0..model.bones.len() {
        let offset = match model.bones[i].parent {
            Some(p) => model.bones[i].position - model.bones[p].position,
            None => model.bones[i].position,
        };
        model.bones[i].rest_local_offset = offset;
    }
    drop_invalid_grants(&mut model.bones);
    model.grant_order = compute_grant_order(&model.bones);
    resolve_rigid_offsets(model);
    reclassify_rigid_bodies(model);
    model.rebuild_index();
}

/// 越界或成环的父骨骼引用改为 `None`
fn cut_invalid_parents(bones: &mut [BoneDef]) {
    let n = bones.len();
    for bone in bones.iter_mut() {
        if let Some(p) = bone.parent.filter(|&p| p >= n) {
            log::warn!("[Model] 骨骼 '{}' 的父骨骼索引 {} 越界，已切断", bone.name, p);
            bone.parent = None;
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        OnPath,
        Done,
    }
    let mut marks = vec![Mark::New; n];
    for start in 0..n {
        let mut path = Vec::new();
        let mut current = Some(start);
        while let Some(i) = current {
            match marks[i] {
                Mark::Done => break,
                Mark::OnPath => {
                    if let Some(&last) = path.last() {
                        let bone: &mut BoneDef = &mut bones[last];
                        log::warn!("[Model] 骨骼 '{}' 的父骨骼链成环，已切断", bone.name);
                        bone.parent = None;
                    }
                    break;
                }
                Mark::New => {
                    marks[i] = Mark::OnPath;
                    path.push(i);
                    current = bones[i].parent;
                }
            }
        }
        for i in path {
            marks[i] = Mark::Done;
        }
    }
}

fn drop_invalid_grants(bones: &mut [BoneDef]) {
    let n = bones.len();
    for bone in bones.iter_mut() {
        if let Some(grant) = bone.grant.as_ref().filter(|g| g.source_bone >= n) {
            log::warn!(
                "[Model] 骨骼 '{}' 的付与源索引 {} 越界，已忽略",
                bone.name,
                grant.source_bone
            );
            bone.grant = None;
        }
    }
}

/// 付与应用顺序
///
/// 每个带付与的骨骼是森林中的一个节点，源骨骼也带付与时以其为父节点。
/// 先从根节点按索引顺序先序遍历，剩下只构成环的节点从最小索引开始补充，
/// 每个节点只在第一次访问时输出。
pub(crate) fn compute_grant_order(bones: &[BoneDef]) -> Vec<GrantParam> {
    let n = bones.len();
    let mut children = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for (i, bone) in bones.iter().enumerate() {
        let Some(grant) = &bone.grant else { continue };
        match bones.get(grant.source_bone).and_then(|s| s.grant.as_ref()) {
            Some(_) => children[grant.source_bone].push(i),
            None => roots.push(i),
        }
    }

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let granted = bones.iter().enumerate().filter(|(_, b)| b.grant.is_some()).map(|(i, _)| i);
    for start in roots.iter().copied().chain(granted) {
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if !visited.insert(i) {
                continue;
            }
            if let Some(grant) = &bones[i].grant {
                order.push(grant.clone());
            }
            stack.extend(children[i].iter().rev().filter(|c| !visited.contains(*c)));
        }
    }
    order
}

/// 刚体骨骼引用检查，并把模型空间变换换算为相对骨骼静止变换的偏移
fn resolve_rigid_offsets(model: &mut MotionModel) {
    let bone_count = model.bones.len();
    for i in 0..model.rigid_bodies.len() {
        let body = &model.rigid_bodies[i];
        let bone = match body.bone {
            Some(b) if b >= bone_count => {
                log::warn!("[Model] 刚体 '{}' 的骨骼索引 {} 越界，视为无骨骼", body.name, b);
                None
            }
            other => other,
        };
        let world = RigidTransform::new(body.position, body.rotation);
        let local_offset = match bone {
            Some(b) => model.bone_rest_transform(b).inverse().mul(&world),
            None => world,
        };
        let body = &mut model.rigid_bodies[i];
        body.bone = bone;
        body.local_offset = local_offset;
    }
}

/// 关节 A 非 Kinematic、B 为 DynamicAligned，且 B 的骨骼是 A 的骨骼的子骨骼时，
/// B 改为 Dynamic
fn reclassify_rigid_bodies(model: &mut MotionModel) {
    for constraint in &model.constraints {
        let (Some(a), Some(b)) = (
            model.rigid_bodies.get(constraint.body_a),
            model.rigid_bodies.get(constraint.body_b),
        ) else {
            continue;
        };
        if a.kind == RigidBodyKind::Kinematic || b.kind != RigidBodyKind::DynamicAligned {
            continue;
        }
        let (Some(bone_a), Some(bone_b)) = (a.bone, b.bone) else {
            continue;
        };
        if model.bones[bone_b].parent == Some(bone_a) {
            log::debug!("[Model] 刚体 '{}' 重分类为 Dynamic", b.name);
            model.rigid_bodies[constraint.body_b].kind = RigidBodyKind::Dynamic;
        }
    }
}

/// 增量模型解码任务
///
/// 模型文件需要完整数据才能解析，`feed` 只做缓冲，`finish` 之后的第一次
/// `poll` 执行解码。丢弃任务即取消加载。
#[derive(Default)]
pub struct ModelDecodeTask {
    buffer: Vec<u8>,
    finished: bool,
    taken: bool,
}

impl ModelDecodeTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.finished {
            log::warn!("[Model] finish 之后仍有 {} 字节输入，已忽略", chunk.len());
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// 已缓冲的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn poll(&mut self) -> Poll<Result<MotionModel, ParseError>> {
        if self.taken {
            return Poll::Ready(Err(ParseError::new(
                self.buffer.len(),
                ParseErrorReason::InvalidValue("decode task already completed".into()),
            )));
        }
        if !self.finished {
            return Poll::Pending;
        }
        self.taken = true;
        let result = decode_model(&self.buffer);
        self.buffer = Vec::new();
        Poll::Ready(result)
    }
}
