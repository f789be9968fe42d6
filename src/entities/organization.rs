use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Short, unique slug embedded in every generated rule name.
    #[sea_orm(unique)]
    pub short_name: String,
    pub timezone: String,
    pub active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::source_account::Entity")]
    SourceAccount,
    #[sea_orm(has_many = "super::mapping_account::Entity")]
    MappingAccount,
    #[sea_orm(has_many = "super::user::Entity")]
    User,
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

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
