use serde_json::{json, Value};
use uuid::Uuid;

use crate::entities::source_account;
use crate::ports::{FieldKind, LayerField};

/// Source-account kinds the reconciler knows how to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Collar,
    Radio,
    Drive,
    CustomSource,
    Network,
}

impl SourceKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "collar" => Some(SourceKind::Collar),
            "radio" => Some(SourceKind::Radio),
            "drive" => Some(SourceKind::Drive),
            "custom_source" => Some(SourceKind::CustomSource),
            "network" => Some(SourceKind::Network),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Collar => "collar",
            SourceKind::Radio => "radio",
            SourceKind::Drive => "drive",
            SourceKind::CustomSource => "custom_source",
            SourceKind::Network => "network",
        }
    }
}

/// Schema for one remote layer or table created per connection.
pub struct LayerSchema {
    pub title_suffix: &'static str,
    pub fields: Vec<LayerField>,
}

/// The per-kind capability set the generic reconciler is parameterized by.
/// One state machine, five small adapters, instead of five near-identical
/// enable/disable paths.
pub trait SourceKindAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Point layers created when the AGOL output is enabled.
    fn layer_schemas(&self) -> Vec<LayerSchema>;

    /// Auxiliary attribute tables; only richer sources have any.
    fn table_schemas(&self) -> Vec<LayerSchema> {
        Vec::new()
    }

    /// Input payload of the recurring AGOL update job: the minimal reference
    /// the downstream job needs to find its connection.
    fn agol_job_input(&self, connection_id: Uuid) -> Value {
        json!({ "connection_id": connection_id })
    }

    /// Input payload of one KML export job: source uid plus look-back window.
    fn kml_job_input(&self, source: &source_account::Model, period_hours: u32) -> Value {
        json!({
            "source_account_id": source.id,
            "source_kind": self.kind().as_str(),
            "period_hours": period_hours,
        })
    }

    /// Components fed to the naming authority: (kind, subtype, uid).
    fn naming_components(&self, source: &source_account::Model) -> (String, String, String) {
        (
            self.kind().as_str().to_string(),
            source.subtype.clone(),
            source.id.to_string(),
        )
    }
}

fn position_fields() -> Vec<LayerField> {
    vec![
        LayerField { name: "device_id", kind: FieldKind::Text },
        LayerField { name: "label", kind: FieldKind::Text },
        LayerField { name: "recorded_at", kind: FieldKind::Date },
        LayerField { name: "latitude", kind: FieldKind::Double },
        LayerField { name: "longitude", kind: FieldKind::Double },
    ]
}

struct CollarAdapter;

impl SourceKindAdapter for CollarAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Collar
    }

    fn layer_schemas(&self) -> Vec<LayerSchema> {
        let mut fields = position_fields();
        fields.push(LayerField { name: "temperature", kind: FieldKind::Double });
        fields.push(LayerField { name: "activity", kind: FieldKind::Integer });
        fields.push(LayerField { name: "battery", kind: FieldKind::Double });
        vec![LayerSchema { title_suffix: "positions", fields }]
    }
}

struct RadioAdapter;

impl SourceKindAdapter for RadioAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Radio
    }

    fn layer_schemas(&self) -> Vec<LayerSchema> {
        let mut fields = position_fields();
        fields.push(LayerField { name: "signal_strength", kind: FieldKind::Double });
        fields.push(LayerField { name: "channel", kind: FieldKind::Integer });
        vec![LayerSchema { title_suffix: "positions", fields }]
    }
}

struct DriveAdapter;

impl SourceKindAdapter for DriveAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Drive
    }

    fn layer_schemas(&self) -> Vec<LayerSchema> {
        vec![LayerSchema { title_suffix: "waypoints", fields: position_fields() }]
    }
}

struct CustomSourceAdapter;

impl SourceKindAdapter for CustomSourceAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::CustomSource
    }

    fn layer_schemas(&self) -> Vec<LayerSchema> {
        let mut fields = position_fields();
        fields.push(LayerField { name: "payload", kind: FieldKind::Text });
        vec![LayerSchema { title_suffix: "positions", fields }]
    }
}

/// Phone networks ship a position layer plus call/contact/message tables.
struct NetworkAdapter;

impl SourceKindAdapter for NetworkAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
    }

    fn layer_schemas(&self) -> Vec<LayerSchema> {
        vec![LayerSchema { title_suffix: "positions", fields: position_fields() }]
    }

    fn table_schemas(&self) -> Vec<LayerSchema> {
        vec![
            LayerSchema {
                title_suffix: "calls",
                fields: vec![
                    LayerField { name: "device_id", kind: FieldKind::Text },
                    LayerField { name: "called_at", kind: FieldKind::Date },
                    LayerField { name: "number", kind: FieldKind::Text },
                    LayerField { name: "duration_seconds", kind: FieldKind::Integer },
                ],
            },
            LayerSchema {
                title_suffix: "contacts",
                fields: vec![
                    LayerField { name: "device_id", kind: FieldKind::Text },
                    LayerField { name: "name", kind: FieldKind::Text },
                    LayerField { name: "number", kind: FieldKind::Text },
                ],
            },
            LayerSchema {
                title_suffix: "messages",
                fields: vec![
                    LayerField { name: "device_id", kind: FieldKind::Text },
                    LayerField { name: "sent_at", kind: FieldKind::Date },
                    LayerField { name: "number", kind: FieldKind::Text },
                    LayerField { name: "body", kind: FieldKind::Text },
                ],
            },
        ]
    }
}

pub fn adapter_for(kind: SourceKind) -> &'static dyn SourceKindAdapter {
    match kind {
        SourceKind::Collar => &CollarAdapter,
        SourceKind::Radio => &RadioAdapter,
        SourceKind::Drive => &DriveAdapter,
        SourceKind::CustomSource => &CustomSourceAdapter,
        SourceKind::Network => &NetworkAdapter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_resolves_an_adapter_with_a_layer() {
        for kind in [
            SourceKind::Collar,
            SourceKind::Radio,
            SourceKind::Drive,
            SourceKind::CustomSource,
            SourceKind::Network,
        ] {
            let adapter = adapter_for(kind);
            assert_eq!(adapter.kind(), kind);
            assert!(!adapter.layer_schemas().is_empty());
        }
    }

    #[test]
    fn only_networks_declare_auxiliary_tables() {
        assert_eq!(adapter_for(SourceKind::Network).table_schemas().len(), 3);
        assert!(adapter_for(SourceKind::Collar).table_schemas().is_empty());
        assert!(adapter_for(SourceKind::Drive).table_schemas().is_empty());
    }

    #[test]
    fn unknown_kind_does_not_parse() {
        assert_eq!(SourceKind::parse("collar"), Some(SourceKind::Collar));
        assert_eq!(SourceKind::parse("satellite"), None);
    }
}
