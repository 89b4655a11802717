use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::super::domain::{
    Criticality, Document, DocumentCategory, DocumentId, ParameterInstance, ParameterTemplate,
    TemplateId,
};
use super::config::EvaluationConfig;
use super::rules::{normalize_text, parse_quantity};

const MIN_PARTIAL_MATCH_LEN: usize = 4;

/// Disagreement between a declared parameter and the evidence on file.
///
/// Mismatches are risk signals for the deciding reviewer. They never change a
/// parameter's compliance flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub template_id: TemplateId,
    pub parameter: String,
    pub category: String,
    pub criticality: Criticality,
    pub declared: String,
    pub documented: String,
    pub document_id: DocumentId,
    pub document_title: String,
    /// Relative deviation for numeric values, 1.0 for textual disagreement.
    pub deviation: f64,
}

pub(crate) fn detect(
    template: &ParameterTemplate,
    instance: &ParameterInstance,
    declared: &str,
    documents: &[Document],
    config: &EvaluationConfig,
) -> Option<Mismatch> {
    let wanted = normalize_text(&template.name);
    if wanted.is_empty() {
        return None;
    }

    let scoped_category = DocumentCategory::for_parameter_category(&template.category);
    let candidates = documents.iter().filter(|document| match &instance.evidence {
        Some(evidence) => &document.id == evidence,
        None => Some(document.category) == scoped_category,
    });

    let mut worst: Option<Mismatch> = None;
    for document in candidates {
        let Some(revision) = document.latest() else {
            continue;
        };

        for (name, documented) in &revision.declared_values {
            if !names_match(&wanted, &normalize_text(name)) {
                continue;
            }

            let deviation = deviation(declared, documented);
            if deviation <= config.mismatch_tolerance {
                continue;
            }

            let replace = worst
                .as_ref()
                .map(|current| deviation > current.deviation)
                .unwrap_or(true);
            if replace {
                worst = Some(Mismatch {
                    template_id: template.id.clone(),
                    parameter: template.name.clone(),
                    category: template.category.clone(),
                    criticality: template.criticality,
                    declared: declared.to_string(),
                    documented: documented.trim().to_string(),
                    document_id: document.id.clone(),
                    document_title: document.title.clone(),
                    deviation,
                });
            }
        }
    }

    worst
}

/// Most critical first, then the largest deviation, then by name for a stable order.
pub(crate) fn rank(mismatches: &mut [Mismatch]) {
    mismatches.sort_by(|a, b| {
        b.criticality
            .cmp(&a.criticality)
            .then_with(|| {
                b.deviation
                    .partial_cmp(&a.deviation)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.parameter.cmp(&b.parameter))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
}

fn names_match(wanted: &str, candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    if wanted == candidate {
        return true;
    }
    let (shorter, longer) = if wanted.len() <= candidate.len() {
        (wanted, candidate)
    } else {
        (candidate, wanted)
    };
    shorter.len() >= MIN_PARTIAL_MATCH_LEN && longer.contains(shorter)
}

fn deviation(declared: &str, documented: &str) -> f64 {
    match (parse_quantity(declared), parse_quantity(documented)) {
        (Some(a), Some(b)) => {
            let scale = a.abs().max(b.abs());
            if scale == 0.0 {
                0.0
            } else {
                (a - b).abs() / scale
            }
        }
        _ => {
            if normalize_text(declared) == normalize_text(documented) {
                0.0
            } else {
                1.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_names_need_a_meaningful_overlap() {
        assert!(names_match("lab area", "lab area sq m"));
        assert!(names_match("total lab area", "lab area"));
        assert!(!names_match("lab area", "lab"));
        assert!(!names_match("drawing hall", "seminar hall"));
    }

    #[test]
    fn numeric_deviation_is_relative() {
        assert!((deviation("1000", "800") - 0.2).abs() < 1e-9);
        assert_eq!(deviation("0", "0"), 0.0);
        assert_eq!(deviation("Registered Sale Deed", "registered sale deed"), 0.0);
        assert_eq!(deviation("Registered", "Leased"), 1.0);
    }
}
