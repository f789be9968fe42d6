use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Connections::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Connections::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(Connections::SourceAccountId).uuid().not_null())
                    .col(ColumnDef::new(Connections::DestinationKind).string().not_null())
                    .col(ColumnDef::new(Connections::MappingAccountId).uuid())
                    .col(ColumnDef::new(Connections::LayerIds).text())
                    .col(ColumnDef::new(Connections::RuleNames).text())
                    .col(
                        ColumnDef::new(Connections::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Connections::CreatedAt).date_time().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connections_source_account")
                            .from(Connections::Table, Connections::SourceAccountId)
                            .to(SourceAccounts::Table, SourceAccounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connections_mapping_account")
                            .from(Connections::Table, Connections::MappingAccountId)
                            .to(MappingAccounts::Table, MappingAccounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one connection per (source account, destination kind). The
        // reconciler relies on this to make concurrent enables race-safe.
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_source_destination")
                    .table(Connections::Table)
                    .col(Connections::SourceAccountId)
                    .col(Connections::DestinationKind)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
    OrganizationId,
    SourceAccountId,
    DestinationKind,
    MappingAccountId,
    LayerIds,
    RuleNames,
    Active,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SourceAccounts {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum MappingAccounts {
    Table,
    Id,
}
