use crate::infra::{build_platform, load_templates};
use accredit::error::AppError;
use accredit::workflows::access::Role;
use accredit::workflows::accreditation::domain::{
    Actor, Criticality, Decision, DocumentCategory, DocumentUpload, InstitutionRegistration,
    ParameterDeclaration, ParameterTemplate, QueryAudience, TemplateId,
};
use accredit::workflows::accreditation::evaluation::ComplianceReport;
use accredit::workflows::accreditation::{AccreditationError, TemplateCatalog, WorkflowConfig};
use clap::{Args, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum DemoDecision {
    Approve,
    Reject,
}

impl From<DemoDecision> for Decision {
    fn from(value: DemoDecision) -> Self {
        match value {
            DemoDecision::Approve => Decision::Approve,
            DemoDecision::Reject => Decision::Reject,
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Name of the demo institution
    #[arg(long, default_value = "Demo Institute of Technology")]
    pub(crate) institution: String,
    /// Template CSV to evaluate against (defaults to the built-in AICTE norms)
    #[arg(long)]
    pub(crate) templates_csv: Option<PathBuf>,
    /// Template id declared as zero so the report shows a non-compliant parameter
    #[arg(long)]
    pub(crate) understate: Option<String>,
    /// Force the reviewer's decision instead of deriving it from the score band
    #[arg(long, value_enum)]
    pub(crate) decision: Option<DemoDecision>,
}

#[derive(Args, Debug)]
pub(crate) struct TemplateCheckArgs {
    /// Template catalog CSV to validate
    pub(crate) csv: PathBuf,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CatalogSummary {
    pub(crate) total: usize,
    pub(crate) active: usize,
    pub(crate) by_category: BTreeMap<String, usize>,
    pub(crate) high_criticality: usize,
}

pub(crate) fn summarise_catalog(templates: &[ParameterTemplate]) -> CatalogSummary {
    let mut summary = CatalogSummary {
        total: templates.len(),
        ..CatalogSummary::default()
    };
    for template in templates.iter().filter(|template| template.active) {
        summary.active += 1;
        *summary
            .by_category
            .entry(template.category.clone())
            .or_insert(0) += 1;
        if template.criticality == Criticality::High {
            summary.high_criticality += 1;
        }
    }
    summary
}

pub(crate) fn check_templates(args: TemplateCheckArgs) -> Result<(), AppError> {
    let templates = TemplateCatalog::from_path(&args.csv)?;
    let summary = summarise_catalog(&templates);

    println!("Template catalog {}", args.csv.display());
    println!(
        "  {} templates ({} active, {} high criticality)",
        summary.total, summary.active, summary.high_criticality
    );
    for (category, count) in &summary.by_category {
        println!("  - {category}: {count}");
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        institution,
        templates_csv,
        understate,
        decision,
    } = args;

    let templates = load_templates(templates_csv.as_deref())?;
    let api = build_platform(WorkflowConfig::default(), "demo-pepper", templates)?;
    let service = &api.service;
    let college = Actor::new("demo-college", Role::Institution);
    let reviewer = Actor::new("demo-aicte-desk", Role::AicteAdmin);

    println!("Accreditation workflow demo");
    let institution = service.register_institution(InstitutionRegistration {
        name: institution,
        kind: "Engineering".to_string(),
        location: "Pune".to_string(),
        contact_email: "principal@demo.example.edu".to_string(),
    })?;
    let application = service.open_application(&institution.id, &college)?;
    println!(
        "Registered {} ({}) and opened application {}",
        institution.name, institution.id, application.id
    );

    let understated = understate.map(TemplateId);
    let active: Vec<ParameterTemplate> = service
        .templates()?
        .into_iter()
        .filter(|template| template.active)
        .collect();
    for template in &active {
        let value = if understated.as_ref() == Some(&template.id) {
            "0".to_string()
        } else {
            template.norm_value.clone()
        };
        service.declare_parameter(
            &institution.id,
            ParameterDeclaration {
                template_id: template.id.clone(),
                value: Some(value),
                evidence: None,
            },
            &college,
        )?;
    }

    // The approval letter restates one numeric parameter with a different figure.
    let mut declared_values = BTreeMap::new();
    if let Some(template) = active
        .iter()
        .find(|template| template.comparison.is_numeric())
    {
        declared_values.insert(template.name.clone(), "1".to_string());
    }
    service.upload_document(
        &institution.id,
        DocumentUpload {
            document_id: None,
            title: "AICTE Approval Letter".to_string(),
            category: DocumentCategory::Mandatory,
            storage_key: "demo/approval-letter.pdf".to_string(),
            uploaded_by: String::new(),
            declared_values,
        },
        &college,
    )?;

    let draft = service.recompute_compliance(&institution.id)?;
    println!(
        "Declared {}/{} parameters ({:.1}% complete)",
        draft.completeness.declared, draft.completeness.total_templates, draft.completeness.percentage
    );

    match service.submit_application(&application.id, &college) {
        Ok(record) => println!("Application {} is now {}", record.id, record.status),
        Err(AccreditationError::StateGuard(violation)) => {
            println!("Submission blocked:");
            for condition in &violation.unmet {
                println!("  - {condition}");
            }
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    service.begin_review(&application.id, &reviewer)?;
    let query = service.raise_query(
        &application.id,
        QueryAudience::Institution,
        "Please confirm the figures in the approval letter",
        &reviewer,
    )?;
    service.reply(&query.id, "Figures re-verified against the site survey", &college)?;
    let resolved = service.resolve(&query.id, &reviewer)?;
    println!(
        "Query {} answered and resolved; application is {}",
        query.id, resolved.status
    );

    let analysed = service.run_analysis(&application.id, &reviewer)?;
    let band_decision = match &analysed.analysis {
        Some(report) => {
            render_report(report);
            if report.aggregate_score >= 75.0 {
                Decision::Approve
            } else {
                Decision::Reject
            }
        }
        None => Decision::Reject,
    };

    let decision = decision.map(Decision::from).unwrap_or(band_decision);
    let decided = service.decide(
        &application.id,
        decision,
        "Decided from the demo compliance report",
        &reviewer,
    )?;
    println!("\nFinal status: {}", decided.status);
    println!("History:");
    for stamp in &decided.history {
        println!(
            "  {} -> {} by {} at {}",
            stamp.from, stamp.to, stamp.actor, stamp.at
        );
    }

    Ok(())
}

fn render_report(report: &ComplianceReport) {
    println!(
        "\nCompliance score {:.1} ({})",
        report.aggregate_score,
        report.band.label()
    );
    for category in &report.per_category {
        match category.score {
            Some(score) => println!(
                "  {}: {:.1} ({}/{} compliant)",
                category.category, score, category.compliant, category.total
            ),
            None => println!("  {}: no numeric norms", category.category),
        }
    }
    if !report.mismatches.is_empty() {
        println!("Document mismatches:");
        for mismatch in &report.mismatches {
            println!(
                "  - {}: declared {} but {} states {} (deviation {:.2})",
                mismatch.parameter,
                mismatch.declared,
                mismatch.document_title,
                mismatch.documented,
                mismatch.deviation
            );
        }
    }
    for issue in &report.issues {
        println!("  ! {}: {}", issue.parameter, issue.detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_summary_counts_active_templates_per_category() {
        let mut templates = TemplateCatalog::standard();
        templates[0].active = false;

        let summary = summarise_catalog(&templates);

        assert_eq!(summary.total, templates.len());
        assert_eq!(summary.active, templates.len() - 1);
        assert_eq!(summary.by_category.values().sum::<usize>(), summary.active);
        assert!(summary.by_category.contains_key("Amenities Area"));
    }
}
