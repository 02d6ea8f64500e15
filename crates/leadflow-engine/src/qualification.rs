use crate::{EngineConfig, LifecycleError};
use leadflow_core::qualification::{completion_score, field_label, missing_fields};
use leadflow_core::{Lead, Stage};
use leadflow_storage::LeadStore;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualificationReport {
    pub is_qualified: bool,
    pub score: u8,
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub missing_fields: Vec<String>,
}

impl MoveCheck {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            missing_fields: Vec::new(),
        }
    }
}

/// Read-only check of a lead's qualification blob against the required fields.
#[derive(Debug, Clone)]
pub struct QualificationGate {
    required_fields: Vec<String>,
    gated_stages: Vec<Stage>,
}

impl QualificationGate {
    pub fn new(required_fields: Vec<String>, gated_stages: Vec<Stage>) -> Self {
        Self {
            required_fields,
            gated_stages,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.required_fields.clone(), config.gated_stages.clone())
    }

    pub fn requires_qualification(&self, stage: Stage) -> bool {
        self.gated_stages.contains(&stage)
    }

    pub fn evaluate(&self, lead: &Lead) -> QualificationReport {
        let missing = missing_fields(&lead.qualification, &self.required_fields);
        QualificationReport {
            is_qualified: missing.is_empty(),
            score: completion_score(self.required_fields.len(), missing.len()),
            missing_fields: missing,
        }
    }

    pub fn check_qualification(
        &self,
        store: &LeadStore,
        lead_id: &str,
    ) -> Result<QualificationReport, LifecycleError> {
        let lead = store
            .lead(lead_id)?
            .ok_or_else(|| LifecycleError::lead_not_found(lead_id))?;
        Ok(self.evaluate(&lead))
    }

    pub fn can_move_to_stage(
        &self,
        store: &LeadStore,
        lead_id: &str,
        target: Stage,
    ) -> Result<MoveCheck, LifecycleError> {
        if !self.requires_qualification(target) {
            return Ok(MoveCheck::allow());
        }

        let report = self.check_qualification(store, lead_id)?;
        if report.is_qualified {
            return Ok(MoveCheck::allow());
        }

        let labels = report
            .missing_fields
            .iter()
            .map(|field| field_label(field))
            .collect::<Vec<_>>();
        Ok(MoveCheck {
            allowed: false,
            reason: Some(format!(
                "{} requires qualification; missing: {}",
                target.label(),
                labels.join(", ")
            )),
            missing_fields: report.missing_fields,
        })
    }
}
