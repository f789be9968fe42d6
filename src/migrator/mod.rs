use sea_orm_migration::prelude::*;

mod m20260201_000001_create_organizations;
mod m20260201_000002_create_users;
mod m20260205_000001_create_source_accounts;
mod m20260205_000002_create_mapping_accounts;
mod m20260210_000001_create_connections;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260201_000001_create_organizations::Migration),
            Box::new(m20260201_000002_create_users::Migration),
            Box::new(m20260205_000001_create_source_accounts::Migration),
            Box::new(m20260205_000002_create_mapping_accounts::Migration),
            Box::new(m20260210_000001_create_connections::Migration),
        ]
    }
}
