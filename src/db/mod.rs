pub mod backend;
pub mod connection;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repositories;

pub use backend::PollBackend;
pub use connection::*;
pub use memory::MemoryBackend;
pub use models::*;
pub use postgres::PgBackend;
