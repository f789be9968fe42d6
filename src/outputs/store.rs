use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entities::connection;

/// The two destination kinds a connection row can point at. `database` output
/// is a pass-through flag with no external resource and therefore no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Agol,
    Kml,
}

impl DestinationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DestinationKind::Agol => "agol",
            DestinationKind::Kml => "kml",
        }
    }
}

/// Joins ids/rule names into the legacy comma-joined column format.
pub fn join_list(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(","))
    }
}

/// Splits a comma-joined column back into its parts, dropping empties.
pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub struct NewConnection {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub source_account_id: Uuid,
    pub destination_kind: DestinationKind,
    pub mapping_account_id: Option<Uuid>,
    pub layer_ids: Vec<String>,
    pub rule_names: Vec<String>,
}

/// Persistence seam for connection rows. Absence of a row is the normal
/// "output currently off" state and is always `Ok(None)`, never an error.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get(
        &self,
        source_account_id: Uuid,
        destination: DestinationKind,
    ) -> Result<Option<connection::Model>, DbErr>;

    /// Inserts a new row. The unique (source account, destination kind) index
    /// makes a concurrent duplicate insert fail instead of double-enabling.
    async fn insert(&self, record: NewConnection) -> Result<connection::Model, DbErr>;

    async fn delete(&self, id: Uuid) -> Result<(), DbErr>;

    async fn list_for_source(
        &self,
        source_account_id: Uuid,
    ) -> Result<Vec<connection::Model>, DbErr>;
}

/// sea-orm backed store used by the running server.
pub struct DbConnectionStore {
    db: DatabaseConnection,
}

impl DbConnectionStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionStore for DbConnectionStore {
    async fn get(
        &self,
        source_account_id: Uuid,
        destination: DestinationKind,
    ) -> Result<Option<connection::Model>, DbErr> {
        connection::Entity::find()
            .filter(connection::Column::SourceAccountId.eq(source_account_id))
            .filter(connection::Column::DestinationKind.eq(destination.as_str()))
            .one(&self.db)
            .await
    }

    async fn insert(&self, record: NewConnection) -> Result<connection::Model, DbErr> {
        let row = connection::ActiveModel {
            id: Set(record.id),
            organization_id: Set(record.organization_id),
            source_account_id: Set(record.source_account_id),
            destination_kind: Set(record.destination_kind.as_str().to_string()),
            mapping_account_id: Set(record.mapping_account_id),
            layer_ids: Set(join_list(&record.layer_ids)),
            rule_names: Set(join_list(&record.rule_names)),
            active: Set(true),
            created_at: Set(chrono::Utc::now().naive_utc()),
        };
        row.insert(&self.db).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), DbErr> {
        connection::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn list_for_source(
        &self,
        source_account_id: Uuid,
    ) -> Result<Vec<connection::Model>, DbErr> {
        connection::Entity::find()
            .filter(connection::Column::SourceAccountId.eq(source_account_id))
            .all(&self.db)
            .await
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory store mirroring the unique-index semantics of the real one.
    #[derive(Default)]
    pub struct InMemoryConnectionStore {
        rows: Mutex<HashMap<(Uuid, &'static str), connection::Model>>,
    }

    #[async_trait]
    impl ConnectionStore for InMemoryConnectionStore {
        async fn get(
            &self,
            source_account_id: Uuid,
            destination: DestinationKind,
        ) -> Result<Option<connection::Model>, DbErr> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.get(&(source_account_id, destination.as_str())).cloned())
        }

        async fn insert(&self, record: NewConnection) -> Result<connection::Model, DbErr> {
            let mut rows = self.rows.lock().unwrap();
            let key = (record.source_account_id, record.destination_kind.as_str());
            if rows.contains_key(&key) {
                return Err(DbErr::Custom(
                    "duplicate key value violates unique constraint".to_string(),
                ));
            }
            let model = connection::Model {
                id: record.id,
                organization_id: record.organization_id,
                source_account_id: record.source_account_id,
                destination_kind: record.destination_kind.as_str().to_string(),
                mapping_account_id: record.mapping_account_id,
                layer_ids: join_list(&record.layer_ids),
                rule_names: join_list(&record.rule_names),
                active: true,
                created_at: chrono::Utc::now().naive_utc(),
            };
            rows.insert(key, model.clone());
            Ok(model)
        }

        async fn delete(&self, id: Uuid) -> Result<(), DbErr> {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|_, row| row.id != id);
            Ok(())
        }

        async fn list_for_source(
            &self,
            source_account_id: Uuid,
        ) -> Result<Vec<connection::Model>, DbErr> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .values()
                .filter(|row| row.source_account_id == source_account_id)
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_joined_lists_round_trip() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let joined = join_list(&items);
        assert_eq!(joined.as_deref(), Some("a,b,c"));
        assert_eq!(split_list(joined.as_deref()), items);
    }

    #[test]
    fn empty_list_joins_to_none() {
        assert_eq!(join_list(&[]), None);
        assert!(split_list(None).is_empty());
        assert!(split_list(Some("")).is_empty());
    }
}
