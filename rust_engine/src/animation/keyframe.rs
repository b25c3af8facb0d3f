//! 动画关键帧
//!
//! 关键帧按值类型参数化。每种值类型通过 [`TrackValue`] 声明自己的
//! 贝塞尔控制点形状以及混合方式：
//! - 标量：一对控制点
//! - Vec3：每轴一对，三轴独立插值
//! - 四元数：一对控制点，共享比例做 slerp
//! - bool：无控制点，只做阶跃

use glam::{Quat, Vec3};

use super::bezier::{BezierCurve, ControlPoint};

/// 关键帧之间的插值方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    Step,
    #[default]
    Linear,
    Cubic,
}

/// 可作为轨道值的类型
pub trait TrackValue: Clone + Default {
    /// 贝塞尔控制点形状
    type Handle: Copy + Default + std::fmt::Debug + PartialEq;

    /// 线性混合
    fn lerp(a: &Self, b: &Self, ratio: f32) -> Self;

    /// 三次贝塞尔混合，`p1` 为前一帧出控制点，`p2` 为后一帧入控制点
    fn cubic(a: &Self, b: &Self, weight: f32, p1: &Self::Handle, p2: &Self::Handle) -> Self;
}

/// 单对控制点（默认线性）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Handle(pub ControlPoint);

impl Default for Handle {
    fn default() -> Self {
        Self(ControlPoint::new(20.0 / 127.0, 20.0 / 127.0))
    }
}

impl Handle {
    pub fn new(x: f32, y: f32) -> Self {
        Self(ControlPoint::new(x, y))
    }

    pub fn from_vmd(x: u8, y: u8) -> Self {
        Self(ControlPoint::from_vmd(x, y))
    }

    /// 入控制点的默认值（线性曲线的第二个点）
    pub fn linear_in() -> Self {
        Self(ControlPoint::new(107.0 / 127.0, 107.0 / 127.0))
    }
}

fn ratio_of(weight: f32, p1: &Handle, p2: &Handle) -> f32 {
    BezierCurve::from_points(p1.0, p2.0).evaluate(weight)
}

impl TrackValue for f32 {
    type Handle = Handle;

    fn lerp(a: &Self, b: &Self, ratio: f32) -> Self {
        a * (1.0 - ratio) + b * ratio
    }

    fn cubic(a: &Self, b: &Self, weight: f32, p1: &Handle, p2: &Handle) -> Self {
        <f32 as TrackValue>::lerp(a, b, ratio_of(weight, p1, p2))
    }
}

impl TrackValue for Vec3 {
    type Handle = [Handle; 3];

    fn lerp(a: &Self, b: &Self, ratio: f32) -> Self {
        a.lerp(*b, ratio)
    }

    fn cubic(a: &Self, b: &Self, weight: f32, p1: &[Handle; 3], p2: &[Handle; 3]) -> Self {
        Vec3::new(
            <f32 as TrackValue>::lerp(&a.x, &b.x, ratio_of(weight, &p1[0], &p2[0])),
            <f32 as TrackValue>::lerp(&a.y, &b.y, ratio_of(weight, &p1[1], &p2[1])),
            <f32 as TrackValue>::lerp(&a.z, &b.z, ratio_of(weight, &p1[2], &p2[2])),
        )
    }
}

impl TrackValue for Quat {
    type Handle = Handle;

    fn lerp(a: &Self, b: &Self, ratio: f32) -> Self {
        a.slerp(*b, ratio)
    }

    fn cubic(a: &Self, b: &Self, weight: f32, p1: &Handle, p2: &Handle) -> Self {
        a.slerp(*b, ratio_of(weight, p1, p2))
    }
}

impl TrackValue for bool {
    type Handle = ();

    fn lerp(a: &Self, b: &Self, ratio: f32) -> Self {
        if ratio >= 1.0 {
            *b
        } else {
            *a
        }
    }

    fn cubic(a: &Self, b: &Self, weight: f32, _: &(), _: &()) -> Self {
        Self::lerp(a, b, weight)
    }
}

/// 关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe<V: TrackValue> {
    /// 时间轴位置（秒）
    pub frame: f64,
    pub value: V,
    pub interpolation: Interpolation,
    /// 进入本帧的曲线第二控制点
    pub in_handle: V::Handle,
    /// 离开本帧的曲线第一控制点
    pub out_handle: V::Handle,
}

impl<V: TrackValue> Keyframe<V> {
    pub fn new(frame: f64, value: V, interpolation: Interpolation) -> Self {
        Self {
            frame,
            value,
            interpolation,
            in_handle: V::Handle::default(),
            out_handle: V::Handle::default(),
        }
    }

    pub fn step(frame: f64, value: V) -> Self {
        Self::new(frame, value, Interpolation::Step)
    }

    pub fn linear(frame: f64, value: V) -> Self {
        Self::new(frame, value, Interpolation::Linear)
    }

    pub fn cubic(frame: f64, value: V, in_handle: V::Handle, out_handle: V::Handle) -> Self {
        Self {
            frame,
            value,
            interpolation: Interpolation::Cubic,
            in_handle,
            out_handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_axes_use_independent_curves() {
        let a = Vec3::ZERO;
        let b = Vec3::ONE;
        // x 轴线性，y 轴急加速，z 轴急减速
        let p1 = [Handle::new(0.25, 0.25), Handle::new(1.0, 0.0), Handle::new(0.0, 1.0)];
        let p2 = [Handle::new(0.75, 0.75), Handle::new(1.0, 0.0), Handle::new(0.0, 1.0)];
        let v = Vec3::cubic(&a, &b, 0.5, &p1, &p2);
        assert!((v.x - 0.5).abs() < 1e-3);
        assert!(v.y < 0.5);
        assert!(v.z > 0.5);
    }

    #[test]
    fn bool_only_switches_at_the_next_key() {
        assert!(!bool::lerp(&false, &true, 0.99));
        assert!(bool::lerp(&false, &true, 1.0));
    }
}
