use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SourceAccounts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SourceAccounts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SourceAccounts::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(SourceAccounts::Kind).string().not_null())
                    .col(ColumnDef::new(SourceAccounts::Subtype).string().not_null())
                    .col(ColumnDef::new(SourceAccounts::Label).string().not_null())
                    .col(
                        ColumnDef::new(SourceAccounts::OutputAgol)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SourceAccounts::OutputKml)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SourceAccounts::OutputDatabase)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SourceAccounts::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(SourceAccounts::DeletedAt).date_time())
                    .col(ColumnDef::new(SourceAccounts::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(SourceAccounts::UpdatedAt).date_time().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_source_accounts_organization")
                            .from(SourceAccounts::Table, SourceAccounts::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SourceAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SourceAccounts {
    Table,
    Id,
    OrganizationId,
    Kind,
    Subtype,
    Label,
    OutputAgol,
    OutputKml,
    OutputDatabase,
    Active,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}
