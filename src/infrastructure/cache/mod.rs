pub mod redis_presence;
