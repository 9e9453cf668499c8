//! Database migrations for sitesync.
//!
//! The only table sitesync owns is its key/value state table; everything else
//! in the site database belongs to the application being synchronized.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_sitesync_state;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2026_10_01_000001_create_sitesync_state::Migration)]
    }
}
