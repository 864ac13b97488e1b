use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::Command;
use crate::errors::ServiceError;
use crate::services::maintenance_notifications::GenerationReport;
use crate::services::AppServices;

pub const GENERATE_MAINTENANCE_NOTIFICATIONS: &str = "generate.maintenance.notifications";

/// Evaluates the maintenance plan at `now`, or at the current time when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateMaintenanceNotificationsCommand {
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[async_trait]
impl Command for GenerateMaintenanceNotificationsCommand {
    type Result = GenerationReport;

    #[instrument(skip(services))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services
            .maintenance
            .generate(self.now.unwrap_or_else(Utc::now))
            .await
    }
}
