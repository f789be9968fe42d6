use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MappingAccounts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(MappingAccounts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(MappingAccounts::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(MappingAccounts::Username).string().not_null())
                    .col(ColumnDef::new(MappingAccounts::AccessToken).text().not_null())
                    .col(ColumnDef::new(MappingAccounts::RefreshToken).text().not_null())
                    .col(ColumnDef::new(MappingAccounts::FeatureServiceUrl).text())
                    .col(
                        ColumnDef::new(MappingAccounts::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(MappingAccounts::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(MappingAccounts::UpdatedAt).date_time().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mapping_accounts_organization")
                            .from(MappingAccounts::Table, MappingAccounts::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One mapping account per organization.
        manager
            .create_index(
                Index::create()
                    .name("idx_mapping_accounts_organization")
                    .table(MappingAccounts::Table)
                    .col(MappingAccounts::OrganizationId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MappingAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MappingAccounts {
    Table,
    Id,
    OrganizationId,
    Username,
    AccessToken,
    RefreshToken,
    FeatureServiceUrl,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}
