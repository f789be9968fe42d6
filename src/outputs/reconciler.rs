use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OutputSettings;
use crate::entities::{connection, mapping_account, organization, source_account};
use crate::naming::{generate_rule_name, Destination};
use crate::ports::{MappingPort, SchedulingPort, ServiceHandle};

use super::adapter::{adapter_for, SourceKind, SourceKindAdapter};
use super::error::OutputError;
use super::locks::AccountLocks;
use super::store::{split_list, ConnectionStore, DestinationKind, NewConnection};

/// Desired output flags for one source account, as declared by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesiredOutputs {
    pub agol: bool,
    pub kml: bool,
    pub database: bool,
}

impl DesiredOutputs {
    pub fn from_account(source: &source_account::Model) -> Self {
        Self {
            agol: source.output_agol,
            kml: source.output_kml,
            database: source.output_database,
        }
    }
}

/// Remote resources created so far during one enable attempt. Used to roll
/// the attempt back on failure and to report what was touched.
#[derive(Default)]
struct EnableLog {
    service: Option<ServiceHandle>,
    layer_ids: Vec<String>,
    rule_names: Vec<String>,
}

impl EnableLog {
    fn describe(&self) -> Vec<String> {
        let mut steps = Vec::new();
        if self.service.is_some() {
            steps.push("feature service resolved".to_string());
        }
        for id in &self.layer_ids {
            steps.push(format!("layer created: {}", id));
        }
        for rule in &self.rule_names {
            steps.push(format!("job scheduled: {}", rule));
        }
        steps
    }
}

/// Computes and applies the delta between desired and actual output state for
/// one source account. Each of the three output kinds is an independent
/// two-state toggle; `database` has no external resource and is a pass-through
/// flag. The existence of a connection row is the authoritative "on" signal.
pub struct OutputReconciler {
    scheduling: Arc<dyn SchedulingPort>,
    mapping: Arc<dyn MappingPort>,
    store: Arc<dyn ConnectionStore>,
    settings: OutputSettings,
    locks: AccountLocks,
}

impl OutputReconciler {
    pub fn new(
        scheduling: Arc<dyn SchedulingPort>,
        mapping: Arc<dyn MappingPort>,
        store: Arc<dyn ConnectionStore>,
        settings: OutputSettings,
    ) -> Self {
        Self {
            scheduling,
            mapping,
            store,
            settings,
            locks: AccountLocks::new(),
        }
    }

    /// Entry point for source-account creation. Brings every desired output
    /// kind up; repeated calls with the same flags are no-ops.
    pub async fn schedule_outputs(
        &self,
        desired: DesiredOutputs,
        org: &organization::Model,
        source: &source_account::Model,
        mapping_account: Option<&mapping_account::Model>,
        actor: &str,
    ) -> Result<(), OutputError> {
        info!(source_account = %source.id, actor, "scheduling outputs");
        self.apply(desired, org, source, mapping_account).await
    }

    /// Entry point for flag changes on an existing account. Same diffing
    /// logic as `schedule_outputs`; split out because callers audit the two
    /// differently.
    pub async fn update_outputs(
        &self,
        desired: DesiredOutputs,
        org: &organization::Model,
        source: &source_account::Model,
        mapping_account: Option<&mapping_account::Model>,
        actor: &str,
    ) -> Result<(), OutputError> {
        info!(source_account = %source.id, actor, "updating outputs");
        self.apply(desired, org, source, mapping_account).await
    }

    /// Pushes a changed display label to the remote features of an active
    /// AGOL connection. The provider has no update-by-filter primitive, so
    /// matching features are enumerated first and edited by object id.
    pub async fn propagate_label_change(
        &self,
        source: &source_account::Model,
        new_label: &str,
        mapping_account: Option<&mapping_account::Model>,
    ) -> Result<(), OutputError> {
        let Some(conn) = self.store.get(source.id, DestinationKind::Agol).await? else {
            return Ok(());
        };
        let Some((account, service_url)) =
            mapping_account.and_then(|a| a.feature_service_url.as_deref().map(|u| (a, u)))
        else {
            return Ok(());
        };
        let layer_ids = split_list(conn.layer_ids.as_deref());
        let Some(main_layer) = layer_ids.first() else {
            return Ok(());
        };

        let mut features = self
            .mapping
            .get_features(&source.id.to_string(), main_layer, service_url, account)
            .await
            .map_err(|e| OutputError::from_port(e, Vec::new()))?;
        if features.is_empty() {
            return Ok(());
        }
        for feature in &mut features {
            feature.attributes["label"] = serde_json::json!(new_label);
        }
        let count = features.len();
        self.mapping
            .update_features(features, main_layer, service_url, account)
            .await
            .map_err(|e| OutputError::from_port(e, Vec::new()))?;
        info!(source_account = %source.id, count, "propagated label change to remote features");
        Ok(())
    }

    /// Entry point for account deletion: tears down every active output
    /// before the caller soft-deletes the account row. Teardown first, so the
    /// identifiers needed to reach remote state are never lost.
    pub async fn delete_outputs(
        &self,
        source: &source_account::Model,
        mapping_account: Option<&mapping_account::Model>,
    ) -> Result<(), OutputError> {
        let _guard = self.locks.acquire(source.id).await;
        let connections = self.store.list_for_source(source.id).await?;
        for conn in connections {
            self.disable(conn, source, mapping_account).await?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        desired: DesiredOutputs,
        org: &organization::Model,
        source: &source_account::Model,
        mapping_account: Option<&mapping_account::Model>,
    ) -> Result<(), OutputError> {
        let _guard = self.locks.acquire(source.id).await;
        self.reconcile_kind(desired.agol, DestinationKind::Agol, org, source, mapping_account)
            .await?;
        self.reconcile_kind(desired.kml, DestinationKind::Kml, org, source, mapping_account)
            .await?;
        // `database` output is a pass-through flag stored on the account; no
        // remote resource exists for it.
        Ok(())
    }

    async fn reconcile_kind(
        &self,
        desired: bool,
        destination: DestinationKind,
        org: &organization::Model,
        source: &source_account::Model,
        mapping_account: Option<&mapping_account::Model>,
    ) -> Result<(), OutputError> {
        let current = self.store.get(source.id, destination).await?;
        match (desired, current) {
            // Desired equals actual: skip entirely. This check is what makes
            // repeated calls with the same flags idempotent.
            (true, Some(_)) | (false, None) => Ok(()),
            (true, None) => match destination {
                DestinationKind::Agol => self.enable_agol(org, source, mapping_account).await,
                DestinationKind::Kml => self.enable_kml(org, source).await,
            },
            (false, Some(conn)) => self.disable(conn, source, mapping_account).await,
        }
    }

    async fn enable_agol(
        &self,
        org: &organization::Model,
        source: &source_account::Model,
        mapping_account: Option<&mapping_account::Model>,
    ) -> Result<(), OutputError> {
        // Fail fast, before any external call, so a rejected request leaves
        // no partial state anywhere.
        let account = mapping_account.ok_or_else(|| {
            OutputError::PreconditionFailed(
                "connect a mapping account before enabling AGOL output".to_string(),
            )
        })?;
        let adapter = self.adapter(source)?;

        let mut log = EnableLog::default();
        match self.try_enable_agol(org, source, account, adapter, &mut log).await {
            Ok(()) => {
                metrics::counter!("wildtrace_outputs_enabled_total", "destination" => "agol")
                    .increment(1);
                info!(source_account = %source.id, "agol output enabled");
                Ok(())
            }
            Err(e) => {
                warn!(
                    source_account = %source.id,
                    error = %e,
                    completed = ?log.describe(),
                    "agol enable failed, rolling back partial resources"
                );
                metrics::counter!("wildtrace_output_failures_total", "destination" => "agol")
                    .increment(1);
                self.rollback_enable(&log, Some(account)).await;
                Err(e)
            }
        }
    }

    async fn try_enable_agol(
        &self,
        org: &organization::Model,
        source: &source_account::Model,
        account: &mapping_account::Model,
        adapter: &dyn SourceKindAdapter,
        log: &mut EnableLog,
    ) -> Result<(), OutputError> {
        let service = self
            .mapping
            .get_or_create_feature_service(account, &self.settings.feature_service_name)
            .await
            .map_err(|e| OutputError::from_port(e, log.describe()))?;
        log.service = Some(service.clone());

        for schema in adapter.layer_schemas() {
            let title = format!("{} {}", source.label, schema.title_suffix);
            let id = self
                .mapping
                .create_feature_layer(&title, &schema.fields, &service, account)
                .await
                .map_err(|e| OutputError::from_port(e, log.describe()))?;
            log.layer_ids.push(id);
        }
        for schema in adapter.table_schemas() {
            let title = format!("{} {}", source.label, schema.title_suffix);
            let id = self
                .mapping
                .create_table(&title, &schema.fields, &service, account)
                .await
                .map_err(|e| OutputError::from_port(e, log.describe()))?;
            log.layer_ids.push(id);
        }

        let (kind, subtype, uid) = adapter.naming_components(source);
        let rule_name = generate_rule_name(
            &org.short_name,
            &self.settings.stage,
            &kind,
            &subtype,
            &uid,
            Destination::AgolUpdate,
        )?;

        let function = self
            .scheduling
            .get_function(&self.settings.agol_update_function)
            .await
            .map_err(|e| OutputError::from_port(e, log.describe()))?;

        let connection_id = Uuid::new_v4();
        self.scheduling
            .schedule(
                &function,
                adapter.agol_job_input(connection_id),
                &rule_name,
                self.settings.agol_update_cadence_minutes,
            )
            .await
            .map_err(|e| OutputError::from_port(e, log.describe()))?;
        log.rule_names.push(rule_name.clone());

        // Local record last. A crash before this line leaves an external
        // orphan (cheap to detect and purge) rather than a phantom "on" row
        // that would block re-enabling.
        self.store
            .insert(NewConnection {
                id: connection_id,
                organization_id: org.id,
                source_account_id: source.id,
                destination_kind: DestinationKind::Agol,
                mapping_account_id: Some(account.id),
                layer_ids: log.layer_ids.clone(),
                rule_names: vec![rule_name],
            })
            .await?;
        Ok(())
    }

    async fn enable_kml(
        &self,
        org: &organization::Model,
        source: &source_account::Model,
    ) -> Result<(), OutputError> {
        let adapter = self.adapter(source)?;
        let mut log = EnableLog::default();
        match self.try_enable_kml(org, source, adapter, &mut log).await {
            Ok(()) => {
                metrics::counter!("wildtrace_outputs_enabled_total", "destination" => "kml")
                    .increment(1);
                info!(source_account = %source.id, "kml output enabled");
                Ok(())
            }
            Err(e) => {
                warn!(
                    source_account = %source.id,
                    error = %e,
                    completed = ?log.describe(),
                    "kml enable failed, rolling back scheduled jobs"
                );
                metrics::counter!("wildtrace_output_failures_total", "destination" => "kml")
                    .increment(1);
                self.rollback_enable(&log, None).await;
                Err(e)
            }
        }
    }

    async fn try_enable_kml(
        &self,
        org: &organization::Model,
        source: &source_account::Model,
        adapter: &dyn SourceKindAdapter,
        log: &mut EnableLog,
    ) -> Result<(), OutputError> {
        let function = self
            .scheduling
            .get_function(&self.settings.kml_export_function)
            .await
            .map_err(|e| OutputError::from_port(e, log.describe()))?;

        let (kind, subtype, uid) = adapter.naming_components(source);

        // One scheduled job per look-back window. The connection row is only
        // written once every window is in place; any failure unwinds the jobs
        // scheduled so far, so no partially-successful batch is ever persisted.
        for &period_hours in &self.settings.kml_periods_hours {
            let rule_name = generate_rule_name(
                &org.short_name,
                &self.settings.stage,
                &kind,
                &subtype,
                &uid,
                Destination::KmlUpdate { period_hours },
            )?;
            self.scheduling
                .schedule(
                    &function,
                    adapter.kml_job_input(source, period_hours),
                    &rule_name,
                    self.settings.kml_cadence_minutes(period_hours),
                )
                .await
                .map_err(|e| OutputError::from_port(e, log.describe()))?;
            log.rule_names.push(rule_name);
        }

        self.store
            .insert(NewConnection {
                id: Uuid::new_v4(),
                organization_id: org.id,
                source_account_id: source.id,
                destination_kind: DestinationKind::Kml,
                mapping_account_id: None,
                layer_ids: Vec::new(),
                rule_names: log.rule_names.clone(),
            })
            .await?;
        Ok(())
    }

    /// Undoes a failed enable attempt in reverse creation order. Best-effort:
    /// a rollback failure is logged and leaves an external orphan, which is
    /// preferred over blocking the caller further.
    async fn rollback_enable(&self, log: &EnableLog, account: Option<&mapping_account::Model>) {
        for rule in log.rule_names.iter().rev() {
            if let Err(e) = self.scheduling.unschedule(rule).await {
                warn!(rule_name = %rule, error = %e, "rollback: failed to unschedule job");
            }
        }
        if !log.layer_ids.is_empty() {
            if let (Some(service), Some(account)) = (&log.service, account) {
                if let Err(e) = self
                    .mapping
                    .delete_layers(&log.layer_ids, &service.url, account)
                    .await
                {
                    warn!(error = %e, "rollback: failed to delete remote layers");
                }
            }
        }
    }

    /// Tears one connection down. Remote resources first, local row last,
    /// mirroring enable's "local last" discipline: a failure leaves local
    /// state pointing at something that may still exist remotely, never the
    /// reverse. Every sub-step is best-effort; disable always proceeds to the
    /// row deletion.
    async fn disable(
        &self,
        conn: connection::Model,
        source: &source_account::Model,
        mapping_account: Option<&mapping_account::Model>,
    ) -> Result<(), OutputError> {
        let layer_ids = split_list(conn.layer_ids.as_deref());
        let rule_names = split_list(conn.rule_names.as_deref());

        if conn.destination_kind == DestinationKind::Agol.as_str() && !layer_ids.is_empty() {
            match mapping_account.and_then(|a| a.feature_service_url.as_deref().map(|u| (a, u))) {
                Some((account, service_url)) => {
                    let disconnected_title = format!("{} (disconnected)", source.label);
                    if let Err(e) = self
                        .mapping
                        .rename_layers(&layer_ids, &disconnected_title, service_url, account)
                        .await
                    {
                        warn!(error = %e, "failed to mark layers disconnected, continuing");
                    }
                    if let Err(e) = self
                        .mapping
                        .delete_layers(&layer_ids, service_url, account)
                        .await
                    {
                        warn!(error = %e, "failed to delete remote layers, continuing");
                    }
                }
                None => warn!(
                    connection = %conn.id,
                    "no mapping account resolvable, leaving remote layers in place"
                ),
            }
        }

        for rule in &rule_names {
            if let Err(e) = self.scheduling.unschedule(rule).await {
                warn!(rule_name = %rule, error = %e, "failed to unschedule job, continuing");
            }
        }

        self.store.delete(conn.id).await?;
        metrics::counter!(
            "wildtrace_outputs_disabled_total",
            "destination" => conn.destination_kind.clone()
        )
        .increment(1);
        info!(
            source_account = %source.id,
            destination = %conn.destination_kind,
            "output disabled"
        );
        Ok(())
    }

    fn adapter(
        &self,
        source: &source_account::Model,
    ) -> Result<&'static dyn SourceKindAdapter, OutputError> {
        let kind = SourceKind::parse(&source.kind)
            .ok_or_else(|| OutputError::UnknownSourceKind(source.kind.clone()))?;
        Ok(adapter_for(kind))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::ports::{Feature, FunctionHandle, LayerField, PortError};

    use crate::outputs::store::testing::InMemoryConnectionStore;

    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<String>>,
    }

    impl CallLog {
        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn all(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count_prefixed(&self, prefix: &str) -> usize {
            self.all().iter().filter(|c| c.starts_with(prefix)).count()
        }

        fn index_of(&self, prefix: &str) -> Option<usize> {
            self.all().iter().position(|c| c.starts_with(prefix))
        }
    }

    struct MockScheduler {
        log: Arc<CallLog>,
        schedule_calls: AtomicU32,
        /// 1-based schedule call number that fails with `Unavailable`; 0 never.
        fail_on_schedule: u32,
    }

    impl MockScheduler {
        fn new(log: Arc<CallLog>) -> Self {
            Self {
                log,
                schedule_calls: AtomicU32::new(0),
                fail_on_schedule: 0,
            }
        }

        fn failing_on(log: Arc<CallLog>, nth: u32) -> Self {
            Self {
                fail_on_schedule: nth,
                ..Self::new(log)
            }
        }
    }

    #[async_trait]
    impl SchedulingPort for MockScheduler {
        async fn get_function(&self, name: &str) -> Result<FunctionHandle, PortError> {
            self.log.push(format!("get_function:{}", name));
            Ok(FunctionHandle {
                arn: format!("arn:test:{}", name),
                name: name.to_string(),
            })
        }

        async fn schedule(
            &self,
            _function: &FunctionHandle,
            _input: Value,
            rule_name: &str,
            _cadence_minutes: u32,
        ) -> Result<(), PortError> {
            let n = self.schedule_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_schedule != 0 && n == self.fail_on_schedule {
                return Err(PortError::Unavailable("scheduler timeout".to_string()));
            }
            self.log.push(format!("schedule:{}", rule_name));
            Ok(())
        }

        async fn unschedule(&self, rule_name: &str) -> Result<(), PortError> {
            if rule_name.is_empty() {
                return Ok(());
            }
            self.log.push(format!("unschedule:{}", rule_name));
            Ok(())
        }
    }

    struct MockMapping {
        log: Arc<CallLog>,
        layer_seq: AtomicU32,
    }

    impl MockMapping {
        fn new(log: Arc<CallLog>) -> Self {
            Self {
                log,
                layer_seq: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MappingPort for MockMapping {
        async fn get_or_create_feature_service(
            &self,
            _account: &mapping_account::Model,
            service_name: &str,
        ) -> Result<ServiceHandle, PortError> {
            self.log.push(format!("get_service:{}", service_name));
            Ok(ServiceHandle {
                url: "https://maps.test/rest/services/svc/FeatureServer".to_string(),
                admin_url: "https://maps.test/rest/admin/services/svc/FeatureServer".to_string(),
            })
        }

        async fn create_feature_layer(
            &self,
            title: &str,
            _fields: &[LayerField],
            _service: &ServiceHandle,
            _account: &mapping_account::Model,
        ) -> Result<String, PortError> {
            self.log.push(format!("create_layer:{}", title));
            Ok(self.layer_seq.fetch_add(1, Ordering::SeqCst).to_string())
        }

        async fn create_table(
            &self,
            title: &str,
            _fields: &[LayerField],
            _service: &ServiceHandle,
            _account: &mapping_account::Model,
        ) -> Result<String, PortError> {
            self.log.push(format!("create_table:{}", title));
            Ok(self.layer_seq.fetch_add(1, Ordering::SeqCst).to_string())
        }

        async fn rename_layers(
            &self,
            layer_ids: &[String],
            _title_suffix: &str,
            _service_url: &str,
            _account: &mapping_account::Model,
        ) -> Result<(), PortError> {
            self.log.push(format!("rename_layers:{}", layer_ids.join(",")));
            Ok(())
        }

        async fn delete_layers(
            &self,
            layer_ids: &[String],
            _service_url: &str,
            _account: &mapping_account::Model,
        ) -> Result<(), PortError> {
            self.log.push(format!("delete_layers:{}", layer_ids.join(",")));
            Ok(())
        }

        async fn get_features(
            &self,
            device_id: &str,
            layer_id: &str,
            _service_url: &str,
            _account: &mapping_account::Model,
        ) -> Result<Vec<Feature>, PortError> {
            self.log.push(format!("get_features:{}", layer_id));
            Ok(vec![Feature {
                object_id: 1,
                attributes: serde_json::json!({ "device_id": device_id, "label": "old" }),
            }])
        }

        async fn update_features(
            &self,
            updates: Vec<Feature>,
            layer_id: &str,
            _service_url: &str,
            _account: &mapping_account::Model,
        ) -> Result<(), PortError> {
            self.log
                .push(format!("update_features:{}:{}", layer_id, updates.len()));
            Ok(())
        }

        async fn verify_token_valid(
            &self,
            _account: &mapping_account::Model,
        ) -> Result<bool, PortError> {
            Ok(true)
        }
    }

    /// Store wrapper logging mutations alongside the port calls, so ordering
    /// between remote teardown and row changes is assertable.
    struct RecordingStore {
        log: Arc<CallLog>,
        inner: InMemoryConnectionStore,
    }

    #[async_trait]
    impl ConnectionStore for RecordingStore {
        async fn get(
            &self,
            source_account_id: Uuid,
            destination: DestinationKind,
        ) -> Result<Option<connection::Model>, sea_orm::DbErr> {
            self.inner.get(source_account_id, destination).await
        }

        async fn insert(
            &self,
            record: NewConnection,
        ) -> Result<connection::Model, sea_orm::DbErr> {
            self.log
                .push(format!("store_insert:{}", record.destination_kind.as_str()));
            self.inner.insert(record).await
        }

        async fn delete(&self, id: Uuid) -> Result<(), sea_orm::DbErr> {
            self.log.push("store_delete".to_string());
            self.inner.delete(id).await
        }

        async fn list_for_source(
            &self,
            source_account_id: Uuid,
        ) -> Result<Vec<connection::Model>, sea_orm::DbErr> {
            self.inner.list_for_source(source_account_id).await
        }
    }

    fn settings() -> OutputSettings {
        OutputSettings {
            stage: "test".to_string(),
            agol_update_cadence_minutes: 5,
            kml_periods_hours: vec![24, 72, 168, 720],
            kml_cadence_divisor: 24.0,
            feature_service_name: "tracking".to_string(),
            agol_update_function: "update-agol-layers".to_string(),
            kml_export_function: "export-kml-snapshot".to_string(),
        }
    }

    fn org() -> organization::Model {
        let now = chrono::Utc::now().naive_utc();
        organization::Model {
            id: Uuid::new_v4(),
            short_name: "acme".to_string(),
            timezone: "UTC".to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn source(org_id: Uuid, kind: &str) -> source_account::Model {
        let now = chrono::Utc::now().naive_utc();
        source_account::Model {
            id: Uuid::new_v4(),
            organization_id: org_id,
            kind: kind.to_string(),
            subtype: "vectronic".to_string(),
            label: "Herd 12".to_string(),
            output_agol: false,
            output_kml: false,
            output_database: false,
            active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn mapping_acct(org_id: Uuid) -> mapping_account::Model {
        let now = chrono::Utc::now().naive_utc();
        mapping_account::Model {
            id: Uuid::new_v4(),
            organization_id: org_id,
            username: "acme_gis".to_string(),
            access_token: "tok".to_string(),
            refresh_token: "refresh".to_string(),
            feature_service_url: Some(
                "https://maps.test/rest/services/svc/FeatureServer".to_string(),
            ),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    struct Harness {
        log: Arc<CallLog>,
        store: Arc<RecordingStore>,
        reconciler: OutputReconciler,
    }

    fn harness() -> Harness {
        harness_with(|log| MockScheduler::new(log))
    }

    fn harness_with(make_scheduler: impl FnOnce(Arc<CallLog>) -> MockScheduler) -> Harness {
        let log = Arc::new(CallLog::default());
        let store = Arc::new(RecordingStore {
            log: log.clone(),
            inner: InMemoryConnectionStore::default(),
        });
        let reconciler = OutputReconciler::new(
            Arc::new(make_scheduler(log.clone())),
            Arc::new(MockMapping::new(log.clone())),
            store.clone(),
            settings(),
        );
        Harness {
            log,
            store,
            reconciler,
        }
    }

    fn agol_on() -> DesiredOutputs {
        DesiredOutputs {
            agol: true,
            ..Default::default()
        }
    }

    fn kml_on() -> DesiredOutputs {
        DesiredOutputs {
            kml: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn enable_is_idempotent() {
        let h = harness();
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        h.reconciler
            .schedule_outputs(agol_on(), &org, &source, Some(&account), "tester")
            .await
            .unwrap();
        h.reconciler
            .schedule_outputs(agol_on(), &org, &source, Some(&account), "tester")
            .await
            .unwrap();

        assert_eq!(h.log.count_prefixed("schedule:"), 1);
        assert_eq!(h.log.count_prefixed("create_layer:"), 1);
        assert!(h
            .store
            .get(source.id, DestinationKind::Agol)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn disable_of_an_off_output_is_a_noop() {
        let h = harness();
        let org = org();
        let source = source(org.id, "radio");

        h.reconciler
            .update_outputs(DesiredOutputs::default(), &org, &source, None, "tester")
            .await
            .unwrap();

        assert!(h.log.all().is_empty());
    }

    #[tokio::test]
    async fn flags_round_trip_to_connection_rows() {
        let h = harness();
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        h.reconciler
            .schedule_outputs(agol_on(), &org, &source, Some(&account), "tester")
            .await
            .unwrap();

        let agol = h.store.get(source.id, DestinationKind::Agol).await.unwrap();
        let kml = h.store.get(source.id, DestinationKind::Kml).await.unwrap();
        assert!(agol.is_some());
        assert!(kml.is_none());
        let agol = agol.unwrap();
        assert_eq!(agol.mapping_account_id, Some(account.id));
        assert!(agol.layer_ids.is_some());
        assert!(agol.rule_names.as_deref().unwrap().contains("agol-update"));
    }

    #[tokio::test]
    async fn agol_without_mapping_account_is_a_precondition_failure() {
        let h = harness();
        let org = org();
        let source = source(org.id, "collar");

        let err = h
            .reconciler
            .schedule_outputs(agol_on(), &org, &source, None, "tester")
            .await
            .unwrap_err();

        assert!(matches!(err, OutputError::PreconditionFailed(_)));
        assert!(h.log.all().is_empty(), "no external call may be made");
        assert!(h
            .store
            .get(source.id, DestinationKind::Agol)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn disable_runs_remote_teardown_before_row_deletion_in_order() {
        let h = harness();
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        h.reconciler
            .schedule_outputs(agol_on(), &org, &source, Some(&account), "tester")
            .await
            .unwrap();
        h.reconciler
            .update_outputs(DesiredOutputs::default(), &org, &source, Some(&account), "tester")
            .await
            .unwrap();

        let rename = h.log.index_of("rename_layers:").expect("rename happened");
        let delete = h.log.index_of("delete_layers:").expect("delete happened");
        let unschedule = h.log.index_of("unschedule:").expect("unschedule happened");
        let row_delete = h.log.index_of("store_delete").expect("row deleted");
        assert!(rename < delete, "rename must precede layer deletion");
        assert!(delete < unschedule, "layer deletion must precede unschedule");
        assert!(unschedule < row_delete, "unschedule must precede row deletion");
        assert!(h
            .store
            .get(source.id, DestinationKind::Agol)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn kml_toggle_on_off_on_reuses_deterministic_names() {
        let h = harness();
        let org = org();
        let source = source(org.id, "drive");

        h.reconciler
            .schedule_outputs(kml_on(), &org, &source, None, "tester")
            .await
            .unwrap();
        let first = h
            .store
            .get(source.id, DestinationKind::Kml)
            .await
            .unwrap()
            .unwrap();
        let first_rules = split_list(first.rule_names.as_deref());
        assert_eq!(first_rules.len(), 4);
        for (rule, period) in first_rules.iter().zip([24u32, 72, 168, 720]) {
            let expected = generate_rule_name(
                &org.short_name,
                "test",
                "drive",
                &source.subtype,
                &source.id.to_string(),
                Destination::KmlUpdate { period_hours: period },
            )
            .unwrap();
            assert_eq!(rule, &expected);
        }

        h.reconciler
            .update_outputs(DesiredOutputs::default(), &org, &source, None, "tester")
            .await
            .unwrap();
        assert!(h
            .store
            .get(source.id, DestinationKind::Kml)
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.log.count_prefixed("unschedule:"), 4);

        h.reconciler
            .update_outputs(kml_on(), &org, &source, None, "tester")
            .await
            .unwrap();
        let second = h
            .store
            .get(source.id, DestinationKind::Kml)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(split_list(second.rule_names.as_deref()), first_rules);
    }

    #[tokio::test]
    async fn kml_partial_failure_persists_nothing_and_unwinds() {
        // Second of four period schedules fails.
        let h = harness_with(|log| MockScheduler::failing_on(log, 2));
        let org = org();
        let source = source(org.id, "collar");

        let err = h
            .reconciler
            .schedule_outputs(kml_on(), &org, &source, None, "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, OutputError::ProviderUnavailable { .. }));

        // No row, and the one successfully scheduled job was unwound.
        assert!(h
            .store
            .get(source.id, DestinationKind::Kml)
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.log.count_prefixed("schedule:"), 1);
        assert_eq!(h.log.count_prefixed("unschedule:"), 1);
    }

    #[tokio::test]
    async fn agol_enable_failure_rolls_back_created_layers() {
        let h = harness_with(|log| MockScheduler::failing_on(log, 1));
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        let err = h
            .reconciler
            .schedule_outputs(agol_on(), &org, &source, Some(&account), "tester")
            .await
            .unwrap_err();
        match err {
            OutputError::ProviderUnavailable { completed_steps, .. } => {
                assert!(completed_steps.iter().any(|s| s.starts_with("layer created")));
            }
            other => panic!("expected ProviderUnavailable, got {other:?}"),
        }

        assert!(h.log.index_of("delete_layers:").is_some(), "rollback deleted layers");
        assert!(h
            .store
            .get(source.id, DestinationKind::Agol)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn network_sources_create_auxiliary_tables() {
        let h = harness();
        let org = org();
        let source = source(org.id, "network");
        let account = mapping_acct(org.id);

        h.reconciler
            .schedule_outputs(agol_on(), &org, &source, Some(&account), "tester")
            .await
            .unwrap();

        assert_eq!(h.log.count_prefixed("create_layer:"), 1);
        assert_eq!(h.log.count_prefixed("create_table:"), 3);
        let conn = h
            .store
            .get(source.id, DestinationKind::Agol)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(split_list(conn.layer_ids.as_deref()).len(), 4);
    }

    #[tokio::test]
    async fn delete_outputs_tears_down_every_active_kind() {
        let h = harness();
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        h.reconciler
            .schedule_outputs(
                DesiredOutputs { agol: true, kml: true, database: true },
                &org,
                &source,
                Some(&account),
                "tester",
            )
            .await
            .unwrap();
        assert_eq!(h.store.list_for_source(source.id).await.unwrap().len(), 2);

        h.reconciler
            .delete_outputs(&source, Some(&account))
            .await
            .unwrap();
        assert!(h.store.list_for_source(source.id).await.unwrap().is_empty());
        // 1 agol rule + 4 kml rules unscheduled.
        assert_eq!(h.log.count_prefixed("unschedule:"), 5);
    }

    #[tokio::test]
    async fn failing_second_kind_leaves_first_kinds_row_for_later_teardown() {
        // AGOL's single schedule succeeds (call 1); KML's first period fails
        // (call 2). The already-enabled AGOL kind must keep its row so its
        // remote layer and job stay reachable.
        let h = harness_with(|log| MockScheduler::failing_on(log, 2));
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        let err = h
            .reconciler
            .schedule_outputs(
                DesiredOutputs { agol: true, kml: true, database: false },
                &org,
                &source,
                Some(&account),
                "tester",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OutputError::ProviderUnavailable { .. }));

        assert!(h
            .store
            .get(source.id, DestinationKind::Agol)
            .await
            .unwrap()
            .is_some());
        assert_eq!(h.log.count_prefixed("unschedule:"), 0);
        assert_eq!(h.log.count_prefixed("create_layer:"), 1);

        // Teardown reaches the surviving kind through its row and cleans it
        // up completely.
        h.reconciler
            .delete_outputs(&source, Some(&account))
            .await
            .unwrap();
        assert!(h.store.list_for_source(source.id).await.unwrap().is_empty());
        assert_eq!(h.log.count_prefixed("unschedule:"), 1);
        assert!(h.log.index_of("delete_layers:").is_some());
    }

    #[tokio::test]
    async fn label_change_patches_remote_features_on_the_main_layer() {
        let h = harness();
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        h.reconciler
            .schedule_outputs(agol_on(), &org, &source, Some(&account), "tester")
            .await
            .unwrap();
        h.reconciler
            .propagate_label_change(&source, "Herd 12 north", Some(&account))
            .await
            .unwrap();

        assert_eq!(h.log.count_prefixed("get_features:"), 1);
        assert_eq!(h.log.count_prefixed("update_features:"), 1);
    }

    #[tokio::test]
    async fn label_change_without_an_agol_connection_is_a_noop() {
        let h = harness();
        let org = org();
        let source = source(org.id, "collar");
        let account = mapping_acct(org.id);

        h.reconciler
            .propagate_label_change(&source, "renamed", Some(&account))
            .await
            .unwrap();
        assert!(h.log.all().is_empty());
    }

    #[tokio::test]
    async fn unknown_source_kind_is_rejected() {
        let h = harness();
        let org = org();
        let source = source(org.id, "satellite");

        let err = h
            .reconciler
            .schedule_outputs(kml_on(), &org, &source, None, "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, OutputError::UnknownSourceKind(_)));
    }
}
