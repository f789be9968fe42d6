use std::env;

/// Settings consumed by the output reconciler, collected once at startup
/// instead of read from ambient globals at call sites.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Deployment stage embedded in generated rule names (e.g. "prod").
    pub stage: String,
    /// Cadence of the recurring AGOL feature-layer update job.
    pub agol_update_cadence_minutes: u32,
    /// Look-back windows for KML snapshot exports; one scheduled job each.
    pub kml_periods_hours: Vec<u32>,
    /// A KML job for an N-hour window runs every N*60/divisor minutes.
    pub kml_cadence_divisor: f64,
    /// Well-known name of the hosted feature service per mapping account.
    pub feature_service_name: String,
    /// Deployed function names at the scheduling provider.
    pub agol_update_function: String,
    pub kml_export_function: String,
}

impl OutputSettings {
    pub fn from_env() -> Self {
        let kml_periods_hours = env::var("KML_PERIODS_HOURS")
            .unwrap_or_else(|_| "24,72,168,720".to_string())
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect();

        Self {
            stage: env::var("STAGE").unwrap_or_else(|_| "dev".to_string()),
            agol_update_cadence_minutes: env::var("AGOL_UPDATE_CADENCE_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            kml_periods_hours,
            kml_cadence_divisor: env::var("KML_CADENCE_DIVISOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24.0),
            feature_service_name: env::var("FEATURE_SERVICE_NAME")
                .unwrap_or_else(|_| "wildtrace_tracking".to_string()),
            agol_update_function: env::var("AGOL_UPDATE_FUNCTION")
                .unwrap_or_else(|_| "update-agol-layers".to_string()),
            kml_export_function: env::var("KML_EXPORT_FUNCTION")
                .unwrap_or_else(|_| "export-kml-snapshot".to_string()),
        }
    }

    /// Minutes between runs of the KML export job for one look-back window.
    pub fn kml_cadence_minutes(&self, period_hours: u32) -> u32 {
        let minutes = (f64::from(period_hours) * 60.0 / self.kml_cadence_divisor).round();
        (minutes as u32).max(1)
    }
}
