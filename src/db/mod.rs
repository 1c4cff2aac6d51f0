pub mod postgres;
pub mod redis;
pub mod registry;
pub mod tokens;

pub use postgres::{create_pool, run_migrations};
pub use self::redis::create_redis_client;
pub use self::redis::Cache;
pub use self::redis::CacheKey;
pub use self::redis::CacheWriterHandle;
pub use registry::PgRegistry;
