use std::sync::Arc;

use sqlx::SqlitePool;

use crate::id::{IdGenerator, UuidGenerator};
use crate::time::{Clock, SystemClock};

/// Handle bundling the connection pool with the injectable clock and ID
/// generator. Cheap to clone; all coordination-core operations hang off it.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Store {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Store { pool, clock, ids }
    }

    pub fn with_system_defaults(pool: SqlitePool) -> Self {
        Store::new(pool, Arc::new(SystemClock), Arc::new(UuidGenerator))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn new_id(&self) -> String {
        self.ids.generate()
    }
}
