//! Device side of the cloud channel

use async_trait::async_trait;
use openapi_client::models::{
    BundleDefinition, BundleRef, CurrentStateReport, DesiredStateResponse,
    ReconciliationOutcomeReport, ReportAck,
};

use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::storage::device::Device;

impl HttpClient {
    /// Fetch the desired state, conditional on the generation the device holds
    pub async fn get_desired_state(
        &self,
        device_id: &str,
        token: &str,
        known_generation: Option<u64>,
    ) -> Result<DesiredStateResponse, AgentError> {
        let path = format!("/agent/devices/{}/desired-state", device_id);
        let etag = known_generation.map(|g| g.to_string());
        let (document, _etag) = self
            .get_if_none_match::<DesiredStateResponse>(&path, token, etag.as_deref())
            .await?;
        Ok(document)
    }

    pub async fn get_bundle_definition(
        &self,
        bundle: &BundleRef,
        token: &str,
    ) -> Result<BundleDefinition, AgentError> {
        let path = format!(
            "/agent/tenants/{}/bundles/{}/versions/{}",
            bundle.tenant_id, bundle.bundle_id, bundle.version
        );
        self.get(&path, token).await
    }

    pub async fn post_current_state(
        &self,
        device_id: &str,
        token: &str,
        report: &CurrentStateReport,
    ) -> Result<ReportAck, AgentError> {
        let path = format!("/agent/devices/{}/current-state", device_id);
        self.post(&path, token, report).await
    }

    pub async fn post_reconciliation_outcome(
        &self,
        device_id: &str,
        token: &str,
        report: &ReconciliationOutcomeReport,
    ) -> Result<ReportAck, AgentError> {
        let path = format!("/agent/devices/{}/reconciliation-outcome", device_id);
        self.post(&path, token, report).await
    }
}

/// What the reconciliation loop needs from the cloud
#[async_trait]
pub trait CloudChannel: Send + Sync {
    /// `AgentError::NotModified` when `known_generation` is still current
    async fn fetch_desired_state(
        &self,
        known_generation: Option<u64>,
    ) -> Result<DesiredStateResponse, AgentError>;

    async fn fetch_bundle_definition(&self, bundle: &BundleRef)
        -> Result<BundleDefinition, AgentError>;

    async fn report_current_state(&self, report: &CurrentStateReport)
        -> Result<ReportAck, AgentError>;

    async fn report_outcome(
        &self,
        report: &ReconciliationOutcomeReport,
    ) -> Result<ReportAck, AgentError>;
}

/// Channel bound to this device's identity
pub struct HttpChannel {
    client: HttpClient,
    device: Device,
}

impl HttpChannel {
    pub fn new(client: HttpClient, device: Device) -> Self {
        Self { client, device }
    }
}

#[async_trait]
impl CloudChannel for HttpChannel {
    async fn fetch_desired_state(
        &self,
        known_generation: Option<u64>,
    ) -> Result<DesiredStateResponse, AgentError> {
        self.client
            .get_desired_state(&self.device.id, &self.device.token, known_generation)
            .await
    }

    async fn fetch_bundle_definition(
        &self,
        bundle: &BundleRef,
    ) -> Result<BundleDefinition, AgentError> {
        self.client
            .get_bundle_definition(bundle, &self.device.token)
            .await
    }

    async fn report_current_state(
        &self,
        report: &CurrentStateReport,
    ) -> Result<ReportAck, AgentError> {
        self.client
            .post_current_state(&self.device.id, &self.device.token, report)
            .await
    }

    async fn report_outcome(
        &self,
        report: &ReconciliationOutcomeReport,
    ) -> Result<ReportAck, AgentError> {
        self.client
            .post_reconciliation_outcome(&self.device.id, &self.device.token, report)
            .await
    }
}
