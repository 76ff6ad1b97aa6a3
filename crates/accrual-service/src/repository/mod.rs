mod order_repo;
mod traits;

pub use order_repo::OrderRepository;
pub use traits::OrderRepositoryTrait;

#[cfg(test)]
pub use traits::MockOrderRepositoryTrait;
