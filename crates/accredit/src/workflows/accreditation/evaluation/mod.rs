mod config;
mod mismatch;
pub(crate) mod rules;

pub use config::EvaluationConfig;
pub use mismatch::Mismatch;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::domain::{
    ComplianceFlag, Criticality, Document, InstitutionId, NormComparison, ParameterInstance,
    ParameterTemplate, TemplateId,
};

/// Everything the evaluator reads, captured at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceSnapshot {
    pub institution_id: InstitutionId,
    /// Parameter revision of the institution when the snapshot was taken.
    pub revision: u64,
    pub templates: Vec<ParameterTemplate>,
    pub instances: Vec<ParameterInstance>,
    pub documents: Vec<Document>,
}

/// Stateless evaluator that scores declared parameters against template norms.
#[derive(Debug, Clone, Default)]
pub struct ComplianceEvaluator {
    config: EvaluationConfig,
}

impl ComplianceEvaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Produce the full report. Output depends only on the snapshot contents, so
    /// re-running on unchanged data yields an identical report.
    pub fn evaluate(&self, snapshot: &ComplianceSnapshot) -> ComplianceReport {
        let mut templates: Vec<&ParameterTemplate> =
            snapshot.templates.iter().filter(|t| t.active).collect();
        templates.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });

        let instances: HashMap<&TemplateId, &ParameterInstance> = snapshot
            .instances
            .iter()
            .filter(|instance| instance.institution_id == snapshot.institution_id)
            .map(|instance| (&instance.template_id, instance))
            .collect();

        let mut documents: Vec<Document> = snapshot
            .documents
            .iter()
            .filter(|document| document.institution_id == snapshot.institution_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        let mut per_parameter = Vec::with_capacity(templates.len());
        let mut tallies: BTreeMap<String, CategoryTally> = BTreeMap::new();
        let mut mismatches = Vec::new();
        let mut issues = Vec::new();

        for template in &templates {
            let tally = tallies.entry(template.category.clone()).or_default();
            tally.total += 1;

            let instance = instances.get(&template.id).copied();
            let declared = instance.and_then(ParameterInstance::declared_value);

            let compliance = match (instance, declared) {
                (Some(instance), Some(value)) => {
                    tally.declared += 1;
                    let outcome = rules::check_declared(template, value);
                    if let Some(detail) = outcome.data_issue {
                        issues.push(EvaluationIssue {
                            template_id: template.id.clone(),
                            parameter: template.name.clone(),
                            kind: IssueKind::EvaluationDataIncomplete,
                            detail,
                        });
                    }
                    if outcome.flag == ComplianceFlag::Compliant {
                        tally.compliant += 1;
                    }
                    if let Some(found) =
                        mismatch::detect(template, instance, value, &documents, &self.config)
                    {
                        mismatches.push(found);
                    }
                    outcome.flag
                }
                _ => ComplianceFlag::Unknown,
            };

            per_parameter.push(ParameterVerdict {
                template_id: template.id.clone(),
                name: template.name.clone(),
                category: template.category.clone(),
                norm_value: template.norm_value.clone(),
                comparison: template.comparison,
                criticality: template.criticality,
                declared: declared.map(str::to_string),
                compliance,
            });
        }

        mismatch::rank(&mut mismatches);

        let per_category: Vec<CategoryScore> = tallies
            .into_iter()
            .map(|(category, tally)| CategoryScore {
                score: tally.score().map(round_one_decimal),
                category,
                declared: tally.declared,
                compliant: tally.compliant,
                total: tally.total,
            })
            .collect();

        let scored: Vec<f64> = per_category
            .iter()
            .filter(|category| category.declared > 0)
            .map(|category| category.compliant as f64 / category.declared as f64 * 100.0)
            .collect();
        let aggregate_score = if scored.is_empty() {
            0.0
        } else {
            round_one_decimal(scored.iter().sum::<f64>() / scored.len() as f64)
        };

        let declared_total = per_parameter
            .iter()
            .filter(|verdict| verdict.declared.is_some())
            .count();
        let completeness = Completeness::new(declared_total, templates.len());

        let mut warnings = Vec::new();
        if declared_total == 0 {
            warnings.push(ReportWarning::NoDeclaredParameters);
        }
        let orphaned = snapshot
            .instances
            .iter()
            .filter(|instance| instance.declared_value().is_some())
            .filter(|instance| !templates.iter().any(|t| t.id == instance.template_id))
            .count();
        if orphaned > 0 {
            warnings.push(ReportWarning::InactiveTemplateValues { count: orphaned });
        }

        ComplianceReport {
            institution_id: snapshot.institution_id.clone(),
            per_parameter,
            per_category,
            aggregate_score,
            band: ScoreBand::from_score(aggregate_score),
            completeness,
            mismatches,
            issues,
            warnings,
        }
    }
}

#[derive(Default)]
struct CategoryTally {
    total: usize,
    declared: usize,
    compliant: usize,
}

impl CategoryTally {
    fn score(&self) -> Option<f64> {
        if self.declared == 0 {
            None
        } else {
            Some(self.compliant as f64 / self.declared as f64 * 100.0)
        }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Evaluator output for one institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub institution_id: InstitutionId,
    pub per_parameter: Vec<ParameterVerdict>,
    pub per_category: Vec<CategoryScore>,
    /// Unweighted mean of the scored categories, one decimal. Shown to reviewers as the AI score.
    pub aggregate_score: f64,
    pub band: ScoreBand,
    pub completeness: Completeness,
    pub mismatches: Vec<Mismatch>,
    pub issues: Vec<EvaluationIssue>,
    pub warnings: Vec<ReportWarning>,
}

impl ComplianceReport {
    pub fn compliance_flags(&self) -> Vec<(TemplateId, ComplianceFlag)> {
        self.per_parameter
            .iter()
            .map(|verdict| (verdict.template_id.clone(), verdict.compliance))
            .collect()
    }

    pub fn verdict(&self, template_id: &TemplateId) -> Option<&ParameterVerdict> {
        self.per_parameter
            .iter()
            .find(|verdict| &verdict.template_id == template_id)
    }

    pub fn category(&self, name: &str) -> Option<&CategoryScore> {
        self.per_category
            .iter()
            .find(|category| category.category == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterVerdict {
    pub template_id: TemplateId,
    pub name: String,
    pub category: String,
    pub norm_value: String,
    pub comparison: NormComparison,
    pub criticality: Criticality,
    pub declared: Option<String>,
    pub compliance: ComplianceFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub declared: usize,
    pub compliant: usize,
    pub total: usize,
    /// `None` when nothing in the category was declared; such categories are
    /// left out of the aggregate instead of counting as 0%.
    pub score: Option<f64>,
}

/// How much was filled in, independent of correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completeness {
    pub declared: usize,
    /// Always the number of active templates.
    pub total_templates: usize,
    pub percentage: f64,
}

impl Completeness {
    pub fn new(declared: usize, total_templates: usize) -> Self {
        let percentage = if total_templates == 0 {
            0.0
        } else {
            round_one_decimal(declared as f64 / total_templates as f64 * 100.0)
        };
        Self {
            declared,
            total_templates,
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.declared == self.total_templates
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationIssue {
    pub template_id: TemplateId,
    pub parameter: String,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EvaluationDataIncomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ReportWarning {
    NoDeclaredParameters,
    InactiveTemplateValues { count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Pass,
    Good,
    Fair,
    Fail,
}

impl ScoreBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 100.0 {
            ScoreBand::Pass
        } else if score >= 75.0 {
            ScoreBand::Good
        } else if score >= 50.0 {
            ScoreBand::Fair
        } else {
            ScoreBand::Fail
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ScoreBand::Pass => "pass",
            ScoreBand::Good => "good",
            ScoreBand::Fair => "fair",
            ScoreBand::Fail => "fail",
        }
    }
}
