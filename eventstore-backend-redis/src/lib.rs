mod store_redis;

pub use store_redis::RedisStore;
