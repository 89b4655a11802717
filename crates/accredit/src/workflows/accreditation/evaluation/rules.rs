use super::super::domain::{ComplianceFlag, NormComparison, ParameterTemplate};

const NUMERIC_EPSILON: f64 = 1e-9;

pub(crate) struct RuleOutcome {
    pub flag: ComplianceFlag,
    /// Populated when the comparison could not be carried out on the data given.
    pub data_issue: Option<String>,
}

impl RuleOutcome {
    fn passed(passed: bool) -> Self {
        Self {
            flag: if passed {
                ComplianceFlag::Compliant
            } else {
                ComplianceFlag::NonCompliant
            },
            data_issue: None,
        }
    }

    fn incomplete(detail: String) -> Self {
        Self {
            flag: ComplianceFlag::NonCompliant,
            data_issue: Some(detail),
        }
    }
}

/// Apply the template's comparison to a declared (non-blank) value.
pub(crate) fn check_declared(template: &ParameterTemplate, declared: &str) -> RuleOutcome {
    match template.comparison {
        NormComparison::Present => RuleOutcome::passed(!declared.trim().is_empty()),
        NormComparison::Equals => {
            match (parse_quantity(declared), parse_quantity(&template.norm_value)) {
                (Some(value), Some(norm)) => RuleOutcome::passed((value - norm).abs() <= NUMERIC_EPSILON),
                _ => RuleOutcome::passed(normalize_text(declared) == normalize_text(&template.norm_value)),
            }
        }
        NormComparison::GreaterThan => compare_numeric(template, declared, |value, norm| value > norm),
        NormComparison::AtLeast => {
            compare_numeric(template, declared, |value, norm| value >= norm - NUMERIC_EPSILON)
        }
        NormComparison::LessThan => compare_numeric(template, declared, |value, norm| value < norm),
        NormComparison::AtMost => {
            compare_numeric(template, declared, |value, norm| value <= norm + NUMERIC_EPSILON)
        }
    }
}

fn compare_numeric(
    template: &ParameterTemplate,
    declared: &str,
    passes: impl Fn(f64, f64) -> bool,
) -> RuleOutcome {
    let Some(value) = parse_quantity(declared) else {
        return RuleOutcome::incomplete(format!(
            "declared value '{}' is not numeric",
            declared.trim()
        ));
    };
    let Some(norm) = parse_quantity(&template.norm_value) else {
        return RuleOutcome::incomplete(format!(
            "norm value '{}' is not numeric",
            template.norm_value.trim()
        ));
    };
    RuleOutcome::passed(passes(value, norm))
}

/// Extract the leading quantity from free text: `"200 sq.m"` is 200, `"1,200"` is 1200,
/// and a ratio such as `"1:15"` yields 15.
pub(crate) fn parse_quantity(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if let Some((left, right)) = trimmed.split_once(':') {
        if let (Some(base), Some(per)) = (leading_number(left), leading_number(right)) {
            if base.abs() > NUMERIC_EPSILON {
                return Some(per / base);
            }
        }
    }
    leading_number(trimmed)
}

fn leading_number(raw: &str) -> Option<f64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    // A minus is a sign only when it opens a word; "Tier-1" is a label, not -1.
    let negative = raw[..start]
        .strip_suffix('-')
        .is_some_and(|before| before.is_empty() || before.ends_with(char::is_whitespace));

    let mut digits = String::new();
    let mut seen_dot = false;
    for c in raw[start..].chars() {
        match c {
            '0'..='9' => digits.push(c),
            ',' => continue,
            '.' if !seen_dot => {
                seen_dot = true;
                digits.push(c);
            }
            _ => break,
        }
    }
    if digits.ends_with('.') {
        digits.pop();
    }

    let value: f64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Lowercase alphanumeric tokens joined by single spaces.
pub(crate) fn normalize_text(raw: &str) -> String {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::accreditation::domain::Criticality;

    #[test]
    fn parses_units_separators_and_ratios() {
        assert_eq!(parse_quantity("200 sq.m"), Some(200.0));
        assert_eq!(parse_quantity("7.5 Acres"), Some(7.5));
        assert_eq!(parse_quantity("1,200"), Some(1200.0));
        assert_eq!(parse_quantity("Min 5 Labs per Course"), Some(5.0));
        assert_eq!(parse_quantity("1:15"), Some(15.0));
        assert_eq!(parse_quantity("-3"), Some(-3.0));
        assert_eq!(parse_quantity("Deficit -2.5 Acres"), Some(-2.5));
        assert_eq!(parse_quantity("Tier-1"), Some(1.0));
        assert_eq!(parse_quantity("Form-16 filed"), Some(16.0));
        assert_eq!(parse_quantity("Contiguous plot"), None);
        assert_eq!(parse_quantity(""), None);
    }

    fn norm(comparison: NormComparison, norm_value: &str) -> ParameterTemplate {
        ParameterTemplate {
            id: "tpl-rule".into(),
            name: "Rule".to_string(),
            category: "Land Requirement".to_string(),
            norm_value: norm_value.to_string(),
            comparison,
            authority: "AICTE".to_string(),
            criticality: Criticality::Medium,
            description: None,
            version: 1,
            active: true,
        }
    }

    #[test]
    fn numeric_comparisons_respect_boundaries() {
        let flag = |comparison: NormComparison, declared: &str| {
            check_declared(&norm(comparison, "10 Acres"), declared).flag
        };

        assert_eq!(flag(NormComparison::AtLeast, "10"), ComplianceFlag::Compliant);
        assert_eq!(flag(NormComparison::GreaterThan, "10"), ComplianceFlag::NonCompliant);
        assert_eq!(flag(NormComparison::AtMost, "10"), ComplianceFlag::Compliant);
        assert_eq!(flag(NormComparison::LessThan, "10"), ComplianceFlag::NonCompliant);
        assert_eq!(flag(NormComparison::LessThan, "9.5 Acres"), ComplianceFlag::Compliant);
        assert_eq!(flag(NormComparison::AtLeast, "Tier-12"), ComplianceFlag::Compliant);

        let outcome = check_declared(&norm(NormComparison::AtLeast, "10 Acres"), "ample");
        assert_eq!(outcome.flag, ComplianceFlag::NonCompliant);
        assert!(outcome.data_issue.is_some());
        let outcome = check_declared(&norm(NormComparison::AtMost, "as prescribed"), "4");
        assert_eq!(
            outcome.data_issue.as_deref(),
            Some("norm value 'as prescribed' is not numeric")
        );
    }

    #[test]
    fn normalizes_free_text() {
        assert_eq!(normalize_text("  Lab Area (sq.m) "), "lab area sq m");
        assert_eq!(normalize_text("LAB-AREA"), "lab area");
    }
}
