// Infrastructure modules
pub mod database;              // Database interface and transaction wrapper
pub mod sqlite_database;       // SQLite implementation
pub mod id_generator;          // Snowflake-style id generation
pub mod monitoring;            // Tracing setup and engine counters

pub use database::{DatabaseInterface, DatabaseTransaction};
pub use id_generator::IdGenerator;
pub use monitoring::{init_tracing, EngineEvent, EngineMetrics, MetricsSnapshot};
pub use sqlite_database::SqliteDatabase;
