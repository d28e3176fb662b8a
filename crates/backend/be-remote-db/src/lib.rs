pub mod db;
pub mod error;
mod memory;
pub mod repository;
pub mod types;

pub use db::DatabaseManager;
pub use error::{DbError, DbResult};
pub use memory::MemoryDatabase;
pub use repository::{
    ClientRepository, DeploymentRepository, DeviceRepository, ReleaseRepository, Repositories,
    Repository, UpdateRepository,
};
pub use types::*;
