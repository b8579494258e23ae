use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use super::workflow_step::{validate_steps, WorkflowStep};
use crate::common::WorkflowId;
use crate::domains::workflow::error::WorkflowError;

/// Workflow definition - a named, ordered chain of approval steps.
///
/// Definitions are authored elsewhere; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    pub async fn find_by_id(
        id: WorkflowId,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>, WorkflowError> {
        let workflow = sqlx::query_as::<_, WorkflowDefinition>(
            "SELECT * FROM workflow_definitions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(workflow)
    }

    /// Insert the definition and all of its steps in one transaction.
    pub async fn create_with_steps(
        &self,
        steps: Vec<WorkflowStep>,
        pool: &PgPool,
    ) -> Result<Vec<WorkflowStep>, WorkflowError> {
        let steps = validate_steps(self.id, steps)?;

        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_definitions (id, name, created_at) VALUES ($1, $2, $3)",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(self.created_at)
        .execute(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(steps.len());
        for step in &steps {
            created.push(step.insert(&mut *tx).await?);
        }

        tx.commit().await?;

        Ok(created)
    }
}
