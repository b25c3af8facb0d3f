//! MMD 物理系统模块
//!
//! 使用 Rapier3D 物理引擎实现骨骼与刚体的双向同步。
//!
//! ## 对应关系
//! | MMD | Rapier |
//! |-----|--------|
//! | 物理世界 | PhysicsPipeline + RigidBodySet + ColliderSet |
//! | 刚体 | RigidBody + Collider |
//! | 6DOF 弹簧关节 | GenericJoint with limits/motors |
//! | 球 / 箱 / 胶囊 | ball / cuboid / capsule_y |

pub mod config;
mod mmd_joint;
mod mmd_physics;
mod mmd_rigid_body;
pub mod pool;

pub use config::{get_config, reset_config, set_config, PhysicsConfig};
pub use mmd_joint::MMDJoint;
pub use mmd_physics::PhysicsBridge;
pub use mmd_rigid_body::{isometry_to_mat4, mat4_to_isometry, MMDRigidBody};
pub use pool::{Pool, PoolStats, Pooled, ResourcePool, ResourcePoolStats};
