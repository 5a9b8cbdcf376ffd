//! Repositories for the engine tables.

pub mod execution_repo;
pub mod task_repo;
pub mod worker_repo;

pub use execution_repo::ExecutionRepo;
pub use task_repo::TaskRepo;
pub use worker_repo::WorkerRepo;
