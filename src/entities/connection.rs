use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One active output binding between a source account and a destination.
/// Existence of a row is the authoritative "this output is on" signal for its
/// `(source_account_id, destination_kind)` pair; a unique index enforces at
/// most one row per pair.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub source_account_id: Uuid,
    /// One of: agol | kml.
    pub destination_kind: String,
    /// Set for agol connections; kml exports have no mapping credentials.
    pub mapping_account_id: Option<Uuid>,
    /// Comma-joined remote layer/table ids (main layer first). Legacy format,
    /// kept for migration round-trip with existing data.
    #[sea_orm(column_type = "Text", nullable)]
    pub layer_ids: Option<String>,
    /// Comma-joined scheduled-job rule names bound to this connection.
    #[sea_orm(column_type = "Text", nullable)]
    pub rule_names: Option<String>,
    pub active: bool,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::source_account::Entity",
        from = "Column::SourceAccountId",
        to = "super::source_account::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    SourceAccount,
    #[sea_orm(
        belongs_to = "super::mapping_account::Entity",
        from = "Column::MappingAccountId",
        to = "super::mapping_account::Column::Id"
    )]
    MappingAccount,
}

impl Related<super::source_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SourceAccount.def()
    }
}

impl Related<super::mapping_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MappingAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
