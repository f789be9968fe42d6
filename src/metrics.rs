use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};

use crate::entities::{connection, organization, source_account};

pub async fn init_metrics(db: &DatabaseConnection) {
    let org_count = organization::Entity::find().count(db).await.unwrap_or(0);
    metrics::gauge!("wildtrace_organizations_total").set(org_count as f64);

    let account_count = source_account::Entity::find()
        .filter(source_account::Column::DeletedAt.is_null())
        .count(db)
        .await
        .unwrap_or(0);
    metrics::gauge!("wildtrace_source_accounts_total").set(account_count as f64);

    let connection_count = connection::Entity::find().count(db).await.unwrap_or(0);
    metrics::gauge!("wildtrace_connections_total").set(connection_count as f64);

    for destination in ["agol", "kml"] {
        let count = connection::Entity::find()
            .filter(connection::Column::DestinationKind.eq(destination))
            .count(db)
            .await
            .unwrap_or(0);
        metrics::gauge!("wildtrace_connections_by_destination", "destination" => destination)
            .set(count as f64);
    }

    tracing::info!(
        "Initialized metrics: Organizations={}, SourceAccounts={}, Connections={}",
        org_count,
        account_count,
        connection_count
    );
}
