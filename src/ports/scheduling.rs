use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::PortError;

/// A deployed function at the scheduling provider, resolvable by name.
#[derive(Debug, Clone)]
pub struct FunctionHandle {
    pub arn: String,
    pub name: String,
}

#[async_trait]
pub trait SchedulingPort: Send + Sync {
    /// Resolves a deployed function by name. `FunctionNotFound` means the
    /// deployment is misconfigured and the caller must not continue.
    async fn get_function(&self, name: &str) -> Result<FunctionHandle, PortError>;

    /// Create-or-update a recurring trigger binding `input` to the function
    /// under `rule_name`. Re-scheduling an existing rule is a no-op update.
    async fn schedule(
        &self,
        function: &FunctionHandle,
        input: Value,
        rule_name: &str,
        cadence_minutes: u32,
    ) -> Result<(), PortError>;

    /// Removes the trigger mapping and the rule. A no-op when `rule_name` is
    /// empty or the rule is already gone; call sites pass through possibly
    /// unset fields.
    async fn unschedule(&self, rule_name: &str) -> Result<(), PortError>;
}

/// REST client for the scheduling provider.
pub struct HttpScheduler {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpScheduler {
    pub fn new() -> Self {
        let base_url = env::var("SCHEDULER_BASE_URL").expect("SCHEDULER_BASE_URL must be set");
        let api_token = env::var("SCHEDULER_API_TOKEN").unwrap_or_default();
        let timeout_secs = env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .expect("failed to build scheduler http client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl SchedulingPort for HttpScheduler {
    async fn get_function(&self, name: &str) -> Result<FunctionHandle, PortError> {
        let url = format!("{}/functions/{}", self.base_url, name);
        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(PortError::from_reqwest)?;

        if res.status() == StatusCode::NOT_FOUND {
            return Err(PortError::FunctionNotFound(name.to_string()));
        }
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let message = res.text().await.unwrap_or_default();
            return Err(PortError::Rejected { status, message });
        }

        let body: Value = res.json().await.map_err(PortError::from_reqwest)?;
        let arn = body["arn"]
            .as_str()
            .ok_or_else(|| PortError::Rejected {
                status: 200,
                message: "function response missing arn".to_string(),
            })?
            .to_string();
        Ok(FunctionHandle {
            arn,
            name: name.to_string(),
        })
    }

    async fn schedule(
        &self,
        function: &FunctionHandle,
        input: Value,
        rule_name: &str,
        cadence_minutes: u32,
    ) -> Result<(), PortError> {
        // The invoke grant and the trigger mapping are separate remote calls;
        // a retry may find the grant already in place. 409 is a no-op here.
        let grant_url = format!("{}/functions/{}/permissions", self.base_url, function.name);
        let res = self
            .client
            .post(&grant_url)
            .bearer_auth(&self.api_token)
            .json(&json!({ "rule_name": rule_name }))
            .send()
            .await
            .map_err(PortError::from_reqwest)?;
        if !res.status().is_success() && res.status() != StatusCode::CONFLICT {
            let status = res.status().as_u16();
            let message = res.text().await.unwrap_or_default();
            return Err(PortError::Rejected { status, message });
        }
        if res.status() == StatusCode::CONFLICT {
            debug!(rule_name, "invoke permission already granted");
        }

        let rule_url = format!("{}/rules/{}", self.base_url, rule_name);
        let res = self
            .client
            .put(&rule_url)
            .bearer_auth(&self.api_token)
            .json(&json!({
                "function_arn": function.arn,
                "input": input,
                "cadence_minutes": cadence_minutes,
            }))
            .send()
            .await
            .map_err(PortError::from_reqwest)?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let message = res.text().await.unwrap_or_default();
            return Err(PortError::Rejected { status, message });
        }

        info!(rule_name, cadence_minutes, "scheduled recurring job");
        Ok(())
    }

    async fn unschedule(&self, rule_name: &str) -> Result<(), PortError> {
        if rule_name.is_empty() {
            return Ok(());
        }

        // Targets first, then the rule itself. 404 on either means someone
        // already cleaned up; that is the expected disable/no-op path.
        for url in [
            format!("{}/rules/{}/targets", self.base_url, rule_name),
            format!("{}/rules/{}", self.base_url, rule_name),
        ] {
            let res = self
                .client
                .delete(&url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(PortError::from_reqwest)?;
            if !res.status().is_success() && res.status() != StatusCode::NOT_FOUND {
                let status = res.status().as_u16();
                let message = res.text().await.unwrap_or_default();
                return Err(PortError::Rejected { status, message });
            }
        }

        info!(rule_name, "unscheduled recurring job");
        Ok(())
    }
}
