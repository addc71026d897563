use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

fn lock_generator() -> MutexGuard<'static, Option<SnowflakeIdBucket>> {
    ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initialise the Snowflake generator for this process.
///
/// `machine_id` and `node_id` must each be in `0..32`. Calling this again
/// replaces the generator; IDs issued before stay unique only if the pair
/// differs.
pub fn init(machine_id: i32, node_id: i32) {
    *lock_generator() = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Next Snowflake ID as a decimal string. Falls back to machine/node `1/1`
/// when [`init`] was never called.
pub fn next_id() -> String {
    let mut gen = lock_generator();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}
