use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A producer of tracked records: collar, radio, drive file, custom source or
/// phone network. Output toggles here are the *desired* state; the
/// authoritative "is it on" signal is the existence of a `connection` row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "source_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub organization_id: Uuid,
    /// One of: collar | radio | drive | custom_source | network.
    pub kind: String,
    /// Provider-specific subtype label (e.g. collar vendor), used in rule names.
    pub subtype: String,
    pub label: String,
    pub output_agol: bool,
    pub output_kml: bool,
    pub output_database: bool,
    pub active: bool,
    pub deleted_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrganizationId",
        to = "super::organization::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Organization,
    #[sea_orm(has_many = "super::connection::Entity")]
    Connection,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl Related<super::connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
