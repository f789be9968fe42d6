use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::PortError;
use crate::entities::mapping_account;

/// A hosted feature service owned by a mapping account.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub url: String,
    pub admin_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Date,
    Text,
    Double,
    Integer,
}

impl FieldKind {
    fn provider_type(self) -> &'static str {
        match self {
            FieldKind::Date => "esriFieldTypeDate",
            FieldKind::Text => "esriFieldTypeString",
            FieldKind::Double => "esriFieldTypeDouble",
            FieldKind::Integer => "esriFieldTypeInteger",
        }
    }
}

/// One typed column of a feature layer or table schema.
#[derive(Debug, Clone)]
pub struct LayerField {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// A remote feature with its object id and display attributes.
#[derive(Debug, Clone)]
pub struct Feature {
    pub object_id: i64,
    pub attributes: Value,
}

#[async_trait]
pub trait MappingPort: Send + Sync {
    /// Looks up the account's feature service by its well-known name,
    /// creating it on first use. Idempotent.
    async fn get_or_create_feature_service(
        &self,
        account: &mapping_account::Model,
        service_name: &str,
    ) -> Result<ServiceHandle, PortError>;

    /// Creates a point feature layer with the given schema; returns its id.
    async fn create_feature_layer(
        &self,
        title: &str,
        fields: &[LayerField],
        service: &ServiceHandle,
        account: &mapping_account::Model,
    ) -> Result<String, PortError>;

    /// Creates an auxiliary attribute table (calls, contacts, ...); returns
    /// its id.
    async fn create_table(
        &self,
        title: &str,
        fields: &[LayerField],
        service: &ServiceHandle,
        account: &mapping_account::Model,
    ) -> Result<String, PortError>;

    /// Cosmetic marker applied before teardown so stale layers are
    /// recognizable at the provider. Best-effort.
    async fn rename_layers(
        &self,
        layer_ids: &[String],
        title_suffix: &str,
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<(), PortError>;

    /// Bulk delete. The id list may contain previously-deleted or
    /// never-created ids; those must not fail the batch.
    async fn delete_layers(
        &self,
        layer_ids: &[String],
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<(), PortError>;

    /// Enumerates features matching a device id. The provider has no
    /// delete-or-update-by-filter primitive, so attribute patches enumerate
    /// first and edit by object id.
    async fn get_features(
        &self,
        device_id: &str,
        layer_id: &str,
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<Vec<Feature>, PortError>;

    async fn update_features(
        &self,
        updates: Vec<Feature>,
        layer_id: &str,
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<(), PortError>;

    /// Liveness check via a refresh attempt. May rotate the short-lived
    /// access token at the provider as a side effect.
    async fn verify_token_valid(&self, account: &mapping_account::Model)
        -> Result<bool, PortError>;
}

/// REST client for an ArcGIS-Online-style mapping provider.
pub struct ArcgisClient {
    client: Client,
    portal_url: String,
}

impl ArcgisClient {
    pub fn new() -> Self {
        let portal_url = env::var("MAPPING_PORTAL_URL").expect("MAPPING_PORTAL_URL must be set");
        let timeout_secs = env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .expect("failed to build mapping http client"),
            portal_url: portal_url.trim_end_matches('/').to_string(),
        }
    }

    /// The provider answers HTTP 200 with an `error` object on failure, so
    /// every response body goes through this check.
    fn check_body(body: Value) -> Result<Value, PortError> {
        if let Some(err) = body.get("error") {
            let status = err["code"].as_u64().unwrap_or(400) as u16;
            let message = err["message"].as_str().unwrap_or("unknown error").to_string();
            return Err(PortError::Rejected { status, message });
        }
        Ok(body)
    }

    async fn post_form(&self, url: &str, params: &[(&str, String)]) -> Result<Value, PortError> {
        let res = self
            .client
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(PortError::from_reqwest)?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let message = res.text().await.unwrap_or_default();
            return Err(PortError::Rejected { status, message });
        }
        let body: Value = res.json().await.map_err(PortError::from_reqwest)?;
        Self::check_body(body)
    }

    fn field_definitions(fields: &[LayerField]) -> Vec<Value> {
        fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "type": f.kind.provider_type(),
                    "alias": f.name,
                })
            })
            .collect()
    }

    fn admin_url(service_url: &str) -> String {
        // .../rest/services/X/FeatureServer -> .../rest/admin/services/X/FeatureServer
        service_url.replacen("/rest/services/", "/rest/admin/services/", 1)
    }

    async fn add_to_definition(
        &self,
        definition: Value,
        service: &ServiceHandle,
        account: &mapping_account::Model,
    ) -> Result<String, PortError> {
        let url = format!("{}/addToDefinition", service.admin_url);
        let body = self
            .post_form(
                &url,
                &[
                    ("f", "json".to_string()),
                    ("token", account.access_token.clone()),
                    ("addToDefinition", definition.to_string()),
                ],
            )
            .await?;

        let id = body["layers"][0]["id"]
            .as_i64()
            .or_else(|| body["tables"][0]["id"].as_i64())
            .ok_or_else(|| PortError::Rejected {
                status: 200,
                message: "addToDefinition response missing layer id".to_string(),
            })?;
        Ok(id.to_string())
    }
}

#[async_trait]
impl MappingPort for ArcgisClient {
    async fn get_or_create_feature_service(
        &self,
        account: &mapping_account::Model,
        service_name: &str,
    ) -> Result<ServiceHandle, PortError> {
        // Look for an existing service under the well-known name first.
        let search_url = format!("{}/sharing/rest/search", self.portal_url);
        let res = self
            .client
            .get(&search_url)
            .query(&[
                ("f", "json"),
                ("token", account.access_token.as_str()),
                (
                    "q",
                    &format!(
                        "title:\"{}\" AND owner:\"{}\" AND type:\"Feature Service\"",
                        service_name, account.username
                    ),
                ),
            ])
            .send()
            .await
            .map_err(PortError::from_reqwest)?;
        let body: Value = res.json().await.map_err(PortError::from_reqwest)?;
        let body = Self::check_body(body)?;

        if let Some(url) = body["results"][0]["url"].as_str() {
            let url = url.to_string();
            return Ok(ServiceHandle {
                admin_url: Self::admin_url(&url),
                url,
            });
        }

        let create_url = format!(
            "{}/sharing/rest/content/users/{}/createService",
            self.portal_url, account.username
        );
        let params = json!({
            "name": service_name,
            "serviceDescription": "",
            "hasStaticData": false,
            "capabilities": "Create,Delete,Query,Update,Editing",
        });
        let body = self
            .post_form(
                &create_url,
                &[
                    ("f", "json".to_string()),
                    ("token", account.access_token.clone()),
                    ("outputType", "featureService".to_string()),
                    ("createParameters", params.to_string()),
                ],
            )
            .await?;

        let url = body["serviceurl"]
            .as_str()
            .ok_or_else(|| PortError::Rejected {
                status: 200,
                message: "createService response missing serviceurl".to_string(),
            })?
            .to_string();
        info!(service_name, "created hosted feature service");
        Ok(ServiceHandle {
            admin_url: Self::admin_url(&url),
            url,
        })
    }

    async fn create_feature_layer(
        &self,
        title: &str,
        fields: &[LayerField],
        service: &ServiceHandle,
        account: &mapping_account::Model,
    ) -> Result<String, PortError> {
        let definition = json!({
            "layers": [{
                "name": title,
                "type": "Feature Layer",
                "geometryType": "esriGeometryPoint",
                "fields": Self::field_definitions(fields),
            }]
        });
        let id = self.add_to_definition(definition, service, account).await?;
        info!(title, layer_id = %id, "created feature layer");
        Ok(id)
    }

    async fn create_table(
        &self,
        title: &str,
        fields: &[LayerField],
        service: &ServiceHandle,
        account: &mapping_account::Model,
    ) -> Result<String, PortError> {
        let definition = json!({
            "tables": [{
                "name": title,
                "type": "Table",
                "fields": Self::field_definitions(fields),
            }]
        });
        let id = self.add_to_definition(definition, service, account).await?;
        info!(title, table_id = %id, "created attribute table");
        Ok(id)
    }

    async fn rename_layers(
        &self,
        layer_ids: &[String],
        title_suffix: &str,
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<(), PortError> {
        let admin_url = Self::admin_url(service_url);
        for layer_id in layer_ids.iter().filter(|id| !id.is_empty()) {
            let url = format!("{}/{}/updateDefinition", admin_url, layer_id);
            let result = self
                .post_form(
                    &url,
                    &[
                        ("f", "json".to_string()),
                        ("token", account.access_token.clone()),
                        (
                            "updateDefinition",
                            json!({ "name": title_suffix }).to_string(),
                        ),
                    ],
                )
                .await;
            if let Err(e) = result {
                warn!(layer_id = %layer_id, error = %e, "failed to rename layer, continuing");
            }
        }
        Ok(())
    }

    async fn delete_layers(
        &self,
        layer_ids: &[String],
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<(), PortError> {
        let ids: Vec<&String> = layer_ids.iter().filter(|id| !id.is_empty()).collect();
        if ids.is_empty() {
            return Ok(());
        }

        let admin_url = Self::admin_url(service_url);
        let url = format!("{}/deleteFromDefinition", admin_url);
        // One call per id so a stale or never-created id cannot fail the
        // rest of the batch.
        for layer_id in ids {
            let definition = json!({ "layers": [{ "id": layer_id }] });
            let result = self
                .post_form(
                    &url,
                    &[
                        ("f", "json".to_string()),
                        ("token", account.access_token.clone()),
                        ("deleteFromDefinition", definition.to_string()),
                    ],
                )
                .await;
            match result {
                Ok(_) => info!(layer_id = %layer_id, "deleted remote layer"),
                Err(e) => warn!(layer_id = %layer_id, error = %e, "failed to delete layer, continuing"),
            }
        }
        Ok(())
    }

    async fn get_features(
        &self,
        device_id: &str,
        layer_id: &str,
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<Vec<Feature>, PortError> {
        let url = format!("{}/{}/query", service_url, layer_id);
        let body = self
            .post_form(
                &url,
                &[
                    ("f", "json".to_string()),
                    ("token", account.access_token.clone()),
                    ("where", format!("device_id = '{}'", device_id)),
                    ("outFields", "*".to_string()),
                ],
            )
            .await?;

        let features = body["features"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|f| {
                        let object_id = f["attributes"]["OBJECTID"].as_i64()?;
                        Some(Feature {
                            object_id,
                            attributes: f["attributes"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(features)
    }

    async fn update_features(
        &self,
        updates: Vec<Feature>,
        layer_id: &str,
        service_url: &str,
        account: &mapping_account::Model,
    ) -> Result<(), PortError> {
        if updates.is_empty() {
            return Ok(());
        }
        let url = format!("{}/{}/applyEdits", service_url, layer_id);
        let edits: Vec<Value> = updates
            .into_iter()
            .map(|f| {
                let mut attributes = f.attributes;
                attributes["OBJECTID"] = json!(f.object_id);
                json!({ "attributes": attributes })
            })
            .collect();
        self.post_form(
            &url,
            &[
                ("f", "json".to_string()),
                ("token", account.access_token.clone()),
                ("updates", Value::Array(edits).to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn verify_token_valid(
        &self,
        account: &mapping_account::Model,
    ) -> Result<bool, PortError> {
        let url = format!("{}/sharing/rest/oauth2/token", self.portal_url);
        let result = self
            .post_form(
                &url,
                &[
                    ("f", "json".to_string()),
                    ("grant_type", "refresh_token".to_string()),
                    ("refresh_token", account.refresh_token.clone()),
                ],
            )
            .await;
        match result {
            Ok(body) => Ok(body["access_token"].is_string()),
            Err(PortError::Rejected { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
