pub use sea_orm_migration::prelude::*;

mod m20250601_000001_initial_schema;
mod m20250612_000001_add_invite_codes;
mod m20250701_000001_add_allowance_adjustments;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_initial_schema::Migration),
            Box::new(m20250612_000001_add_invite_codes::Migration),
            Box::new(m20250701_000001_add_allowance_adjustments::Migration),
        ]
    }
}
