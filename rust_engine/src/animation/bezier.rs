//! 贝塞尔曲线插值
//!
//! MMD 的插值曲线固定端点 (0,0)、(1,1)，两个控制点在 [0,1]² 内。
//! 给定时间权重 w，先解出 x(t) = w 的曲线参数 t，再取 y(t) 作为混合比例。

/// 牛顿迭代上限
const MAX_ITERATIONS: usize = 15;
/// x(t) 与目标权重的容差
const TOLERANCE: f32 = 1e-5;

/// 贝塞尔控制点（已归一化到 [0,1]）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlPoint {
    pub x: f32,
    pub y: f32,
}

impl ControlPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// VMD 插值字节（0..=127）
    pub fn from_vmd(x: u8, y: u8) -> Self {
        Self::new(x as f32 / 127.0, y as f32 / 127.0)
    }
}

/// 单段三次贝塞尔曲线，`p1` 来自前一关键帧的出控制点，`p2` 来自后一关键帧的入控制点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BezierCurve {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Default for BezierCurve {
    fn default() -> Self {
        Self::linear()
    }
}

impl BezierCurve {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_points(p1: ControlPoint, p2: ControlPoint) -> Self {
        Self::new(p1.x, p1.y, p2.x, p2.y)
    }

    /// 线性插值（VMD 默认的 20,20,107,107）
    pub fn linear() -> Self {
        Self::new(20.0 / 127.0, 20.0 / 127.0, 107.0 / 127.0, 107.0 / 127.0)
    }

    /// 由时间权重求混合比例
    pub fn evaluate(&self, weight: f32) -> f32 {
        if weight <= 0.0 {
            return 0.0;
        }
        if weight >= 1.0 {
            return 1.0;
        }
        self.y_at(self.solve(weight))
    }

    /// 求解 x(t) = weight 的 t
    ///
    /// 牛顿法，种子 t = 0.5。同时维护一个包含根的区间，
    /// 牛顿步越出区间或导数退化时改用二分。
    pub fn solve(&self, weight: f32) -> f32 {
        let mut lo = 0.0f32;
        let mut hi = 1.0f32;
        let mut t = 0.5f32;

        for _ in 0..MAX_ITERATIONS {
            let fx = self.x_at(t) - weight;
            if fx.abs() < TOLERANCE {
                break;
            }
            // x(t) 单调不减，据符号收缩区间
            if fx < 0.0 {
                lo = t;
            } else {
                hi = t;
            }

            let dx = self.dx_at(t);
            let newton = if dx.abs() > f32::EPSILON {
                t - fx / dx
            } else {
                f32::NAN
            };
            t = if newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
            t = t.clamp(0.0, 1.0);
        }

        t
    }

    pub fn x_at(&self, t: f32) -> f32 {
        cubic(self.x1, self.x2, t)
    }

    pub fn y_at(&self, t: f32) -> f32 {
        cubic(self.y1, self.y2, t)
    }

    fn dx_at(&self, t: f32) -> f32 {
        let s = 1.0 - t;
        3.0 * s * s * self.x1 + 6.0 * s * t * (self.x2 - self.x1) + 3.0 * t * t * (1.0 - self.x2)
    }
}

#[inline]
fn cubic(p1: f32, p2: f32, t: f32) -> f32 {
    let s = 1.0 - t;
    3.0 * s * s * t * p1 + 3.0 * s * t * t * p2 + t * t * t
}
