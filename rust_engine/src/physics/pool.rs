//! 临时数学对象池
//!
//! 物理桥每帧需要大量临时变换 / 四元数 / 向量。对象从空闲表取出，
//! 由 [`Pooled`] 守卫持有，守卫析构时自动归还，任何退出路径都不会遗漏。
//!
//! 池内部使用 `RefCell` / `Cell`，因此是 `!Sync` 的，只能在单线程中使用。

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::{Deref, DerefMut};

use glam::{Quat, Vec3};
use rapier3d::prelude::{Isometry, Real};

/// 池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 累计构造的对象数
    pub created: usize,
    /// 空闲表长度
    pub free: usize,
    /// 尚未归还的对象数
    pub in_flight: usize,
}

/// 单一类型的空闲表
pub struct Pool<T> {
    free: RefCell<Vec<Box<T>>>,
    created: Cell<usize>,
    in_flight: Cell<usize>,
    make: fn() -> T,
}

impl<T> Pool<T> {
    pub fn new(make: fn() -> T) -> Self {
        Self {
            free: RefCell::new(Vec::new()),
            created: Cell::new(0),
            in_flight: Cell::new(0),
            make,
        }
    }

    /// 取出一个对象，内容重置为初始值
    pub fn alloc(&self) -> Pooled<'_, T> {
        let reused = self.free.borrow_mut().pop();
        let value = match reused {
            Some(mut boxed) => {
                *boxed = (self.make)();
                boxed
            }
            None => {
                self.created.set(self.created.get() + 1);
                Box::new((self.make)())
            }
        };
        self.in_flight.set(self.in_flight.get() + 1);
        Pooled {
            pool: self,
            value: Some(value),
        }
    }

    /// 显式归还，等价于丢弃守卫
    pub fn free(&self, handle: Pooled<'_, T>) {
        drop(handle);
    }

    fn release(&self, value: Box<T>) {
        self.in_flight.set(self.in_flight.get().saturating_sub(1));
        self.free.borrow_mut().push(value);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.get(),
            free: self.free.borrow().len(),
            in_flight: self.in_flight.get(),
        }
    }

    /// 释放空闲表中的全部对象，返回释放前的统计
    pub fn dispose(&self) -> PoolStats {
        let stats = self.stats();
        self.free.borrow_mut().clear();
        stats
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("stats", &self.stats()).finish()
    }
}

/// 池对象守卫，析构时归还
pub struct Pooled<'p, T> {
    pool: &'p Pool<T>,
    /// 只在析构时取走
    value: Option<Box<T>>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled value taken before drop"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled value taken before drop"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

/// 物理桥使用的全部对象池
#[derive(Debug)]
pub struct ResourcePool {
    pub transforms: Pool<Isometry<Real>>,
    pub quats: Pool<Quat>,
    pub vectors: Pool<Vec3>,
}

/// 各池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourcePoolStats {
    pub transforms: PoolStats,
    pub quats: PoolStats,
    pub vectors: PoolStats,
}

impl ResourcePoolStats {
    pub fn in_flight(&self) -> usize {
        self.transforms.in_flight + self.quats.in_flight + self.vectors.in_flight
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcePool {
    pub fn new() -> Self {
        Self {
            transforms: Pool::new(Isometry::identity),
            quats: Pool::new(|| Quat::IDENTITY),
            vectors: Pool::new(|| Vec3::ZERO),
        }
    }

    pub fn stats(&self) -> ResourcePoolStats {
        ResourcePoolStats {
            transforms: self.transforms.stats(),
            quats: self.quats.stats(),
            vectors: self.vectors.stats(),
        }
    }

    /// 释放所有空闲对象，未归还的对象记为泄漏并返回其数量
    pub fn dispose(&self) -> usize {
        let stats = ResourcePoolStats {
            transforms: self.transforms.dispose(),
            quats: self.quats.dispose(),
            vectors: self.vectors.dispose(),
        };
        let leaked = stats.in_flight();
        if leaked > 0 {
            log::warn!("[Pool] dispose 时仍有 {} 个对象未归还: {:?}", leaked, stats);
        }
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn churn_reuses_a_single_object() {
        let pool = ResourcePool::new();
        for i in 0..100_000 {
            let mut t = pool.transforms.alloc();
            t.translation.x = i as Real;
        }
        let stats = pool.stats().transforms;
        assert_eq!(
            stats,
            PoolStats {
                created: 1,
                free: 1,
                in_flight: 0
            }
        );
    }

    #[test]
    fn reused_object_starts_fresh() {
        let pool = Pool::new(|| Vec3::ZERO);
        {
            let mut v = pool.alloc();
            *v = Vec3::ONE;
        }
        assert_eq!(*pool.alloc(), Vec3::ZERO);
    }

    #[test]
    fn guards_return_on_early_exit() {
        fn fails(pool: &ResourcePool) -> Result<(), ()> {
            let _q = pool.quats.alloc();
            let _v = pool.vectors.alloc();
            Err(())
        }
        let pool = ResourcePool::new();
        assert!(fails(&pool).is_err());
        assert_eq!(pool.stats().in_flight(), 0);
        assert_eq!(pool.stats().quats.free, 1);
    }

    #[test]
    fn explicit_free_and_dispose_report_leaks() {
        let pool = ResourcePool::new();
        let a = pool.quats.alloc();
        let b = pool.quats.alloc();
        assert_eq!(pool.stats().quats.in_flight, 2);
        pool.quats.free(a);
        assert_eq!(pool.dispose(), 1);
        drop(b);
        assert_eq!(pool.dispose(), 0);
        assert_eq!(pool.stats().quats.free, 0);
    }
}
