//! Key-mediated reads over the central repository.
//!
//! Every entry point takes an already validated [`Principal`] and checks the capability
//! for each section it returns. Institution keys only ever see their own institution.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, ApplicationStatusView, Document, Institution, InstitutionId, InstitutionStatus,
    ParameterInstance, ParameterTemplate,
};
use super::evaluation::{rules, ComplianceReport};
use super::lifecycle::ApplicationStatus;
use super::service::AccreditationError;
use super::store::ComplianceStore;
use crate::workflows::access::{Capability, Principal};

const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 200;
const MAX_BULK_INSTITUTIONS: usize = 100;
const BULK_APPLICATION_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstitutionFilter {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<InstitutionStatus>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

/// Institution detail with optional sections; a section is omitted when the caller's
/// key does not carry the matching read capability.
#[derive(Debug, Clone, Serialize)]
pub struct InstitutionDetail {
    pub institution: Institution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterInstance>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applications: Option<Vec<ApplicationStatusView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<ComplianceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Document>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterCriterion {
    /// Template name (case-insensitive) or template id.
    pub parameter: String,
    #[serde(default = "default_operator")]
    pub operator: CriterionOperator,
    pub value: String,
}

fn default_operator() -> CriterionOperator {
    CriterionOperator::Equals
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLogic {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterQuery {
    pub criteria: Vec<ParameterCriterion>,
    #[serde(default)]
    pub logic: MatchLogic,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterMatch {
    pub institution: Institution,
    /// Declared values of the parameters named in the criteria.
    pub matched: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstitutionCounts {
    pub total: usize,
    pub active: usize,
    pub archived: usize,
    pub by_kind: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreSummary {
    pub analysed: usize,
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStatistics {
    pub institutions: InstitutionCounts,
    pub applications: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkField {
    Parameters,
    Applications,
    AiAnalysis,
}

impl BulkField {
    pub const fn capability(self) -> Capability {
        match self {
            BulkField::Parameters => Capability::ReadParameters,
            BulkField::Applications => Capability::ReadApplications,
            BulkField::AiAnalysis => Capability::ReadAiAnalysis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub institution_ids: Vec<InstitutionId>,
    #[serde(default)]
    pub fields: Vec<BulkField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkEntry {
    pub institution: Institution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterInstance>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applications: Option<Vec<ApplicationStatusView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<ComplianceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub entries: Vec<BulkEntry>,
    pub missing: Vec<InstitutionId>,
}

/// Read-only view of the repository for API-key holders.
pub struct RepositoryCatalog<S> {
    store: Arc<S>,
}

impl<S> RepositoryCatalog<S>
where
    S: ComplianceStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn list_institutions(
        &self,
        principal: &Principal,
        filter: &InstitutionFilter,
    ) -> Result<Page<Institution>, AccreditationError> {
        principal.require(Capability::ReadInstitutions)?;

        let search = filter
            .search
            .as_deref()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty());
        let kind = filter
            .kind
            .as_deref()
            .map(str::trim)
            .filter(|kind| !kind.is_empty());

        let mut matches: Vec<Institution> = self
            .store
            .list_institutions()?
            .into_iter()
            .filter(|institution| principal.can_access(&institution.id))
            .filter(|institution| {
                kind.map(|kind| institution.kind.eq_ignore_ascii_case(kind))
                    .unwrap_or(true)
            })
            .filter(|institution| {
                filter
                    .status
                    .map(|status| institution.status == status)
                    .unwrap_or(true)
            })
            .filter(|institution| match &search {
                Some(term) => {
                    institution.name.to_lowercase().contains(term)
                        || institution.location.to_lowercase().contains(term)
                }
                None => true,
            })
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let page = filter.page.unwrap_or(1).max(1);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(Page {
            items,
            total,
            page,
            limit,
            pages: total.div_ceil(limit),
        })
    }

    pub fn institution_detail(
        &self,
        principal: &Principal,
        institution_id: &InstitutionId,
    ) -> Result<InstitutionDetail, AccreditationError> {
        principal.require_for(Capability::ReadInstitutionDetail, institution_id)?;
        let institution = self.institution(institution_id)?;

        let parameters = if principal.can(Capability::ReadParameters) {
            Some(self.store.parameters(institution_id)?)
        } else {
            None
        };
        let records = self.store.applications_for(institution_id)?;
        let ai_analysis = if principal.can(Capability::ReadAiAnalysis) {
            latest_analysis(&records)
        } else {
            None
        };
        let applications = if principal.can(Capability::ReadApplications) {
            Some(records.iter().map(|record| record.status_view()).collect())
        } else {
            None
        };
        let documents = if principal.can(Capability::ReadDocuments) {
            Some(self.store.documents(institution_id)?)
        } else {
            None
        };

        Ok(InstitutionDetail {
            institution,
            parameters,
            applications,
            ai_analysis,
            documents,
        })
    }

    /// Institutions whose declared values satisfy all (or any) of the criteria.
    pub fn query_by_parameter(
        &self,
        principal: &Principal,
        query: &ParameterQuery,
    ) -> Result<Vec<ParameterMatch>, AccreditationError> {
        principal.require(Capability::QueryByParameters)?;
        if query.criteria.is_empty() {
            return Err(AccreditationError::Validation {
                field: "criteria",
                message: "at least one criterion is required".to_string(),
            });
        }

        let templates = self.store.templates()?;
        let mut resolved = Vec::with_capacity(query.criteria.len());
        for criterion in &query.criteria {
            let wanted = criterion.parameter.trim();
            let template = templates
                .iter()
                .find(|template| {
                    template.id.as_str() == wanted || template.name.eq_ignore_ascii_case(wanted)
                })
                .ok_or_else(|| AccreditationError::NotFound(format!("parameter '{wanted}'")))?;
            resolved.push((template, criterion));
        }

        let mut matches = Vec::new();
        for institution in self.store.list_institutions()? {
            if !principal.can_access(&institution.id) {
                continue;
            }
            let instances = self.store.parameters(&institution.id)?;
            let mut matched = BTreeMap::new();
            let mut outcomes = Vec::with_capacity(resolved.len());
            for (template, criterion) in &resolved {
                let declared = instances
                    .iter()
                    .find(|instance| instance.template_id == template.id)
                    .and_then(ParameterInstance::declared_value);
                let hit = declared
                    .map(|value| criterion_matches(criterion, value))
                    .unwrap_or(false);
                if let (true, Some(value)) = (hit, declared) {
                    matched.insert(template.name.clone(), value.to_string());
                }
                outcomes.push(hit);
            }

            let selected = match query.logic {
                MatchLogic::All => outcomes.iter().all(|hit| *hit),
                MatchLogic::Any => outcomes.iter().any(|hit| *hit),
            };
            if selected {
                matches.push(ParameterMatch {
                    institution,
                    matched,
                });
            }
        }
        Ok(matches)
    }

    pub fn statistics(&self, principal: &Principal) -> Result<RepositoryStatistics, AccreditationError> {
        principal.require(Capability::ReadStatistics)?;

        let institutions: Vec<Institution> = self
            .store
            .list_institutions()?
            .into_iter()
            .filter(|institution| principal.can_access(&institution.id))
            .collect();
        let mut by_kind = BTreeMap::new();
        for institution in &institutions {
            *by_kind.entry(institution.kind.clone()).or_insert(0) += 1;
        }
        let active = institutions
            .iter()
            .filter(|institution| institution.is_active())
            .count();

        let applications: Vec<_> = self
            .store
            .applications()?
            .into_iter()
            .filter(|record| principal.can_access(&record.institution_id))
            .collect();
        let mut by_status: BTreeMap<&'static str, usize> = ApplicationStatus::ALL
            .into_iter()
            .map(|status| (status.label(), 0))
            .collect();
        for record in &applications {
            *by_status.entry(record.status.label()).or_insert(0) += 1;
        }

        // Aggregate scores are analysis output and follow the analysis capability.
        let scores: Vec<f64> = if principal.can(Capability::ReadAiAnalysis) {
            applications
                .iter()
                .filter_map(|record| record.analysis.as_ref())
                .map(|report| report.aggregate_score)
                .collect()
        } else {
            Vec::new()
        };
        let scores = if scores.is_empty() {
            None
        } else {
            let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let average = scores.iter().sum::<f64>() / scores.len() as f64;
            Some(ScoreSummary {
                analysed: scores.len(),
                min,
                max,
                average: (average * 10.0).round() / 10.0,
            })
        };

        Ok(RepositoryStatistics {
            institutions: InstitutionCounts {
                total: institutions.len(),
                active,
                archived: institutions.len() - active,
                by_kind,
            },
            applications: applications.len(),
            by_status,
            scores,
        })
    }

    /// Per-institution extracts. Every requested field needs its own read capability,
    /// so a key without AI access cannot pull analysis data in bulk either.
    pub fn bulk_query(
        &self,
        principal: &Principal,
        request: &BulkRequest,
    ) -> Result<BulkResult, AccreditationError> {
        principal.require(Capability::BulkQuery)?;
        for field in &request.fields {
            principal.require(field.capability())?;
        }
        if request.institution_ids.is_empty() {
            return Err(AccreditationError::Validation {
                field: "institution_ids",
                message: "at least one institution id is required".to_string(),
            });
        }
        if request.institution_ids.len() > MAX_BULK_INSTITUTIONS {
            return Err(AccreditationError::Validation {
                field: "institution_ids",
                message: format!("at most {MAX_BULK_INSTITUTIONS} institutions per request"),
            });
        }

        let wants = |field: BulkField| request.fields.contains(&field);
        let mut entries = Vec::new();
        let mut missing = Vec::new();
        for institution_id in &request.institution_ids {
            let institution = match self.store.fetch_institution(institution_id)? {
                Some(institution) if principal.can_access(&institution.id) => institution,
                _ => {
                    missing.push(institution_id.clone());
                    continue;
                }
            };

            let records = self.store.applications_for(institution_id)?;
            entries.push(BulkEntry {
                parameters: if wants(BulkField::Parameters) {
                    Some(self.store.parameters(institution_id)?)
                } else {
                    None
                },
                applications: if wants(BulkField::Applications) {
                    Some(
                        records
                            .iter()
                            .rev()
                            .take(BULK_APPLICATION_LIMIT)
                            .map(|record| record.status_view())
                            .collect(),
                    )
                } else {
                    None
                },
                ai_analysis: if wants(BulkField::AiAnalysis) {
                    latest_analysis(&records)
                } else {
                    None
                },
                institution,
            });
        }

        Ok(BulkResult { entries, missing })
    }

    pub fn parameter_templates(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ParameterTemplate>, AccreditationError> {
        principal.require(Capability::ReadParameters)?;
        let mut templates: Vec<ParameterTemplate> = self
            .store
            .templates()?
            .into_iter()
            .filter(|template| template.active)
            .collect();
        templates.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.name.cmp(&b.name)));
        Ok(templates)
    }

    pub fn application_status(
        &self,
        principal: &Principal,
        application_id: &ApplicationId,
    ) -> Result<ApplicationStatusView, AccreditationError> {
        principal.require(Capability::ReadApplications)?;
        let record = self
            .store
            .fetch_application(application_id)?
            .ok_or_else(|| AccreditationError::NotFound(format!("application {application_id}")))?;
        principal.require_for(Capability::ReadApplications, &record.institution_id)?;
        Ok(record.status_view())
    }

    fn institution(&self, institution_id: &InstitutionId) -> Result<Institution, AccreditationError> {
        self.store
            .fetch_institution(institution_id)?
            .ok_or_else(|| AccreditationError::NotFound(format!("institution {institution_id}")))
    }
}

fn latest_analysis(records: &[super::domain::ApplicationRecord]) -> Option<ComplianceReport> {
    records
        .iter()
        .rev()
        .find_map(|record| record.analysis.clone())
}

fn criterion_matches(criterion: &ParameterCriterion, declared: &str) -> bool {
    let expected = criterion.value.trim();
    match criterion.operator {
        CriterionOperator::Equals => {
            match (rules::parse_quantity(declared), rules::parse_quantity(expected)) {
                (Some(left), Some(right)) => (left - right).abs() < 1e-9,
                _ => rules::normalize_text(declared) == rules::normalize_text(expected),
            }
        }
        CriterionOperator::Contains => declared
            .to_lowercase()
            .contains(&expected.to_lowercase()),
        CriterionOperator::GreaterThan => {
            match (rules::parse_quantity(declared), rules::parse_quantity(expected)) {
                (Some(left), Some(right)) => left > right,
                _ => false,
            }
        }
        CriterionOperator::LessThan => {
            match (rules::parse_quantity(declared), rules::parse_quantity(expected)) {
                (Some(left), Some(right)) => left < right,
                _ => false,
            }
        }
    }
}
