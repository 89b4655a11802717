use super::common::*;
use std::collections::BTreeMap;

use chrono::Utc;

use crate::workflows::accreditation::domain::{
    ComplianceFlag, Document, DocumentCategory, DocumentId, DocumentRevision, DocumentStatus,
    InstitutionId, TemplateId,
};
use crate::workflows::accreditation::evaluation::{
    ComplianceEvaluator, EvaluationConfig, IssueKind, ReportWarning, ScoreBand,
};

fn evaluator() -> ComplianceEvaluator {
    ComplianceEvaluator::new(EvaluationConfig::default())
}

fn document(id: &str, institution: &str, category: DocumentCategory, values: &[(&str, &str)]) -> Document {
    Document {
        id: DocumentId::from(id),
        institution_id: InstitutionId::from(institution),
        application_id: None,
        title: "Building Plan".to_string(),
        category,
        status: DocumentStatus::Pending,
        history: vec![DocumentRevision {
            storage_key: format!("uploads/{id}.pdf"),
            uploaded_by: "college-portal".to_string(),
            uploaded_at: Utc::now(),
            declared_values: values
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }],
    }
}

#[test]
fn aggregate_averages_scored_categories_only() {
    let snapshot = snapshot(
        "inst-eval",
        vec![
            instance("inst-eval", LAND_AREA, "3 Acres"),
            instance("inst-eval", CLASSROOMS, "70 sq.m"),
            instance("inst-eval", DRAWING_HALL, "90 sq.m"),
        ],
        Vec::new(),
    );

    let report = evaluator().evaluate(&snapshot);

    assert_eq!(report.aggregate_score, 75.0);
    assert_eq!(report.band, ScoreBand::Good);
    assert_eq!(
        report.category("Instructional Area").and_then(|c| c.score),
        Some(50.0)
    );
    let amenities = report.category("Amenities Area").expect("category listed");
    assert_eq!(amenities.score, None);
    assert_eq!(amenities.total, 1);
}

#[test]
fn completeness_counts_every_active_template() {
    let mut snapshot = snapshot(
        "inst-eval",
        vec![
            instance("inst-eval", LAND_AREA, "3 Acres"),
            instance("inst-eval", FIRE_NOC, "NOC-1"),
        ],
        Vec::new(),
    );
    snapshot.templates[1].active = false;

    let report = evaluator().evaluate(&snapshot);

    assert_eq!(report.completeness.total_templates, 3);
    assert_eq!(report.completeness.declared, 2);
    assert_eq!(report.completeness.percentage, 66.7);
    assert!(report.verdict(&TemplateId::from(CLASSROOMS)).is_none());
}

#[test]
fn undeclared_parameters_stay_unknown() {
    let snapshot = snapshot(
        "inst-eval",
        vec![instance("inst-eval", LAND_AREA, "   ")],
        Vec::new(),
    );

    let report = evaluator().evaluate(&snapshot);

    assert!(report
        .per_parameter
        .iter()
        .all(|verdict| verdict.compliance == ComplianceFlag::Unknown));
    assert_eq!(report.aggregate_score, 0.0);
    assert_eq!(report.band, ScoreBand::Fail);
    assert!(report.warnings.contains(&ReportWarning::NoDeclaredParameters));
}

#[test]
fn unparseable_numeric_value_is_flagged_as_incomplete_data() {
    let snapshot = snapshot(
        "inst-eval",
        vec![instance("inst-eval", LAND_AREA, "large plot")],
        Vec::new(),
    );

    let report = evaluator().evaluate(&snapshot);

    let verdict = report
        .verdict(&TemplateId::from(LAND_AREA))
        .expect("verdict present");
    assert_eq!(verdict.compliance, ComplianceFlag::NonCompliant);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].kind, IssueKind::EvaluationDataIncomplete);
}

#[test]
fn mismatch_is_reported_without_changing_the_flag() {
    let snapshot = snapshot(
        "inst-eval",
        vec![instance("inst-eval", DRAWING_HALL, "140 sq.m")],
        vec![document(
            "doc-plan",
            "inst-eval",
            DocumentCategory::Infra,
            &[("Drawing Hall", "100 sq.m")],
        )],
    );

    let report = evaluator().evaluate(&snapshot);

    assert_eq!(
        report
            .verdict(&TemplateId::from(DRAWING_HALL))
            .map(|verdict| verdict.compliance),
        Some(ComplianceFlag::Compliant)
    );
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = &report.mismatches[0];
    assert_eq!(mismatch.documented, "100 sq.m");
    assert!(mismatch.deviation > 0.28 && mismatch.deviation < 0.29);
}

#[test]
fn values_within_tolerance_are_not_mismatches() {
    let snapshot = snapshot(
        "inst-eval",
        vec![instance("inst-eval", DRAWING_HALL, "140 sq.m")],
        vec![document(
            "doc-plan",
            "inst-eval",
            DocumentCategory::Infra,
            &[("Drawing Hall Area", "137 sq.m")],
        )],
    );

    let report = evaluator().evaluate(&snapshot);

    assert!(report.mismatches.is_empty());
}

#[test]
fn values_for_retired_templates_raise_a_warning() {
    let mut snapshot = snapshot(
        "inst-eval",
        vec![instance("inst-eval", FIRE_NOC, "NOC-1")],
        Vec::new(),
    );
    snapshot.templates.retain(|template| template.id.as_str() != FIRE_NOC);

    let report = evaluator().evaluate(&snapshot);

    assert!(report
        .warnings
        .contains(&ReportWarning::InactiveTemplateValues { count: 1 }));
}

#[test]
fn evaluation_is_deterministic() {
    let snapshot = snapshot(
        "inst-eval",
        vec![
            instance("inst-eval", CLASSROOMS, "70 sq.m"),
            instance("inst-eval", DRAWING_HALL, "140 sq.m"),
        ],
        vec![document(
            "doc-plan",
            "inst-eval",
            DocumentCategory::Infra,
            &[("Classrooms", "40 sq.m"), ("Drawing Hall", "100 sq.m")],
        )],
    );
    let evaluator = evaluator();

    let first = evaluator.evaluate(&snapshot);
    let second = evaluator.evaluate(&snapshot);

    assert_eq!(first, second);
    assert_eq!(first.mismatches.len(), 2);
    assert_eq!(first.mismatches[0].template_id, TemplateId::from(CLASSROOMS));
}
