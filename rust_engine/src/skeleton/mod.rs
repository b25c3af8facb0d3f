//! 骨骼系统、付与与 IK 接口

mod bone;
mod grant;
mod ik_solver;
mod manager;

pub use bone::Bone;
pub use grant::GrantSolver;
pub use ik_solver::{IkSolver, NoopIkSolver};
pub use manager::Skeleton;
