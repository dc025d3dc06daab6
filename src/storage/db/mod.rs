//! Database abstraction layer.
//!
//! Currently supports SQLite.
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:data/canline.db").await?;
//! let row = sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::{PoolConfig, SqlitePool, SyncMode, database_path, is_memory_url};
