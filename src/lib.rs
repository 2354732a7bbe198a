//! Meal-plan coordination core for a household meal-planning backend:
//! ranked-choice plan finalization, grocery-list materialization over a
//! measurement-unit conversion graph, an append-only audit log, a
//! data-privacy aggregator, search-index freshness tracking, and encrypted
//! OAuth2 client tokens, all on SQLite.

pub mod audit;
pub mod conversion;
pub mod crypto;
pub mod db;
pub mod error;
pub mod filter;
pub mod grocery;
pub mod id;
pub mod indexing;
pub mod migrate;
pub mod model;
pub mod plans;
pub mod privacy;
pub mod repo;
pub mod store;
pub mod time;
pub mod tokens;

pub use conversion::ConversionGraph;
pub use crypto::TokenEncryptor;
pub use db::{open_sqlite_pool, wait_until_ready};
pub use error::{CoreError, CoreResult};
pub use filter::{FilteredResult, QueryFilter, SortOrder};
pub use id::{IdGenerator, UuidGenerator};
pub use indexing::IndexableFamily;
pub use migrate::apply_migrations;
pub use privacy::UserDataCollection;
pub use store::Store;
pub use time::{Clock, SystemClock};
