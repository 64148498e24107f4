//! 数据库仓储层

mod order_repo;
mod traits;
mod user_repo;

pub use order_repo::{OrderFilter, OrderRepository};
pub use traits::{OrderRepositoryTrait, UserRepositoryTrait};
pub use user_repo::UserRepository;

#[cfg(test)]
pub use traits::{MockOrderRepositoryTrait, MockUserRepositoryTrait};
