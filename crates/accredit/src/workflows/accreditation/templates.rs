//! Parameter template catalogs: the built-in AICTE norms and CSV imports.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::domain::{Criticality, NormComparison, ParameterTemplate, TemplateId};
use super::evaluation::rules::parse_quantity;

/// (category, name, norm, criticality)
const STANDARD_NORMS: &[(&str, &str, &str, &str)] = &[
    ("Land Requirement", "Total Land Area (Rural)", "7.5 Acres", "Mandatory"),
    ("Land Requirement", "Total Land Area (Urban/Mega City)", "2.5 Acres", "Mandatory"),
    ("Land Requirement", "Land Continuity", "Contiguous (Single Plot preferred)", "Critical"),
    ("Land Requirement", "Land Ownership", "Registered Sale Deed / Gift Deed", "Mandatory"),
    ("Land Requirement", "Land Use Certificate (LUC)", "Issued by Competent Authority", "Mandatory"),
    ("Instructional Area", "Classrooms (UG)", "1 per Division (66 sq.m each)", "Mandatory"),
    ("Instructional Area", "Tutorial Rooms (UG)", "1 per 4 Divisions (33 sq.m each)", "Mandatory"),
    ("Instructional Area", "Laboratories (UG)", "Min 5 Labs per Course (66 sq.m each)", "Critical"),
    ("Instructional Area", "Workshop/Manufacturing Lab", "200 sq.m", "Mandatory"),
    ("Instructional Area", "Drawing Hall", "132 sq.m", "Mandatory"),
    ("Instructional Area", "Seminar Hall", "132 sq.m (Min 1)", "Desired"),
    ("Admin Area", "Principal/Director Office", "30 sq.m", "Mandatory"),
    ("Admin Area", "Board Room", "20 sq.m", "Mandatory"),
    ("Admin Area", "Faculty Cabin", "5 sq.m per faculty", "Mandatory"),
    ("Admin Area", "Central Store", "30 sq.m", "Mandatory"),
    ("Admin Area", "Exam Control Office", "30 sq.m", "Mandatory"),
    ("Admin Area", "Placement Office", "30 sq.m", "Mandatory"),
    ("Amenities Area", "Toilets (Gents/Ladies)", "350 sq.m total (Separate required)", "Mandatory"),
    ("Amenities Area", "Boys Common Room", "75 sq.m", "Mandatory"),
    ("Amenities Area", "Girls Common Room", "75 sq.m", "Mandatory"),
    ("Amenities Area", "Cafeteria", "150 sq.m", "Mandatory"),
    ("Amenities Area", "First Aid / Sick Room", "10 sq.m", "Mandatory"),
];

const STANDARD_AUTHORITY: &str = "AICTE";

#[derive(Debug)]
pub enum TemplateImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { line: u64, message: String },
}

impl std::fmt::Display for TemplateImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateImportError::Io(err) => write!(f, "failed to read template catalog: {}", err),
            TemplateImportError::Csv(err) => write!(f, "invalid template CSV data: {}", err),
            TemplateImportError::InvalidRow { line, message } => {
                write!(f, "template catalog line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for TemplateImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateImportError::Io(err) => Some(err),
            TemplateImportError::Csv(err) => Some(err),
            TemplateImportError::InvalidRow { .. } => None,
        }
    }
}

impl From<std::io::Error> for TemplateImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for TemplateImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

pub struct TemplateCatalog;

impl TemplateCatalog {
    /// AICTE infrastructure norms for a technical institution.
    pub fn standard() -> Vec<ParameterTemplate> {
        STANDARD_NORMS
            .iter()
            .map(|(category, name, norm, criticality)| ParameterTemplate {
                id: template_id(name),
                name: (*name).to_string(),
                category: (*category).to_string(),
                norm_value: (*norm).to_string(),
                comparison: default_comparison(norm),
                authority: STANDARD_AUTHORITY.to_string(),
                criticality: Criticality::parse(criticality).unwrap_or(Criticality::Medium),
                description: None,
                version: 1,
                active: true,
            })
            .collect()
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<ParameterTemplate>, TemplateImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Parse a catalog with the header
    /// `Category,Name,Norm,Comparison,Authority,Criticality,Description`.
    /// `Id`, `Version` and `Active` columns are optional.
    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<ParameterTemplate>, TemplateImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut templates = Vec::new();
        let mut seen = HashSet::new();

        for (index, record) in csv_reader.deserialize::<TemplateRow>().enumerate() {
            let row = record?;
            // header is line 1
            let line = index as u64 + 2;
            let template = row.into_template(line)?;
            if !seen.insert(template.id.clone()) {
                return Err(TemplateImportError::InvalidRow {
                    line,
                    message: format!("duplicate template id '{}'", template.id),
                });
            }
            templates.push(template);
        }

        Ok(templates)
    }
}

#[derive(Debug, Deserialize)]
struct TemplateRow {
    #[serde(rename = "Id", default, deserialize_with = "empty_string_as_none")]
    id: Option<String>,
    #[serde(rename = "Category")]
    category: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Norm", default)]
    norm: String,
    #[serde(rename = "Comparison", default, deserialize_with = "empty_string_as_none")]
    comparison: Option<String>,
    #[serde(rename = "Authority", default, deserialize_with = "empty_string_as_none")]
    authority: Option<String>,
    #[serde(rename = "Criticality", default)]
    criticality: String,
    #[serde(rename = "Description", default, deserialize_with = "empty_string_as_none")]
    description: Option<String>,
    #[serde(rename = "Version", default, deserialize_with = "empty_string_as_none")]
    version: Option<String>,
    #[serde(rename = "Active", default, deserialize_with = "empty_string_as_none")]
    active: Option<String>,
}

impl TemplateRow {
    fn into_template(self, line: u64) -> Result<ParameterTemplate, TemplateImportError> {
        let invalid = |message: String| TemplateImportError::InvalidRow { line, message };

        if self.name.is_empty() {
            return Err(invalid("Name must not be blank".to_string()));
        }
        if self.category.is_empty() {
            return Err(invalid(format!("'{}' has no Category", self.name)));
        }

        let comparison = match self.comparison.as_deref() {
            Some(raw) => NormComparison::parse(raw)
                .ok_or_else(|| invalid(format!("unknown comparison '{raw}'")))?,
            None => default_comparison(&self.norm),
        };
        if comparison.is_numeric() && parse_quantity(&self.norm).is_none() {
            return Err(invalid(format!(
                "'{}' uses {} but norm '{}' is not numeric",
                self.name,
                comparison.label(),
                self.norm
            )));
        }

        let criticality = Criticality::parse(&self.criticality)
            .ok_or_else(|| invalid(format!("unknown criticality '{}'", self.criticality)))?;
        let version = match self.version.as_deref() {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| invalid(format!("Version '{raw}' is not a positive integer")))?,
            None => 1,
        };
        let active = match self.active.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("true") | Some("yes") | Some("1") => true,
            Some("false") | Some("no") | Some("0") => false,
            Some(other) => return Err(invalid(format!("Active '{other}' is not a boolean"))),
        };

        Ok(ParameterTemplate {
            id: self
                .id
                .map(TemplateId)
                .unwrap_or_else(|| template_id(&self.name)),
            name: self.name,
            category: self.category,
            norm_value: self.norm,
            comparison,
            authority: self
                .authority
                .unwrap_or_else(|| STANDARD_AUTHORITY.to_string()),
            criticality,
            description: self.description,
            version,
            active,
        })
    }
}

/// Numeric norms are minimums; anything else only needs a declared value.
fn default_comparison(norm: &str) -> NormComparison {
    if parse_quantity(norm).is_some() {
        NormComparison::AtLeast
    } else {
        NormComparison::Present
    }
}

fn template_id(name: &str) -> TemplateId {
    let slug: Vec<String> = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    TemplateId(format!("tpl-{}", slug.join("-")))
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn standard_catalog_covers_four_categories() {
        let templates = TemplateCatalog::standard();
        assert_eq!(templates.len(), 22);

        let categories: HashSet<&str> = templates.iter().map(|t| t.category.as_str()).collect();
        assert_eq!(categories.len(), 4);

        let drawing_hall = templates
            .iter()
            .find(|t| t.id == TemplateId::from("tpl-drawing-hall"))
            .expect("drawing hall present");
        assert_eq!(drawing_hall.comparison, NormComparison::AtLeast);
        assert_eq!(drawing_hall.criticality, Criticality::High);

        let ownership = templates
            .iter()
            .find(|t| t.name == "Land Ownership")
            .expect("ownership present");
        assert_eq!(ownership.comparison, NormComparison::Present);

        let seminar = templates
            .iter()
            .find(|t| t.name == "Seminar Hall")
            .expect("seminar hall present");
        assert_eq!(seminar.criticality, Criticality::Low);
    }

    #[test]
    fn imports_rows_with_defaults() {
        let csv = "Category,Name,Norm,Comparison,Authority,Criticality,Description\n\
                   Faculty,Student Faculty Ratio,1:20,at_most,AICTE,High,Max students per teacher\n\
                   Land Requirement,Fire NOC,Valid certificate,,UGC,,\n";
        let templates = TemplateCatalog::from_reader(Cursor::new(csv)).expect("catalog parses");

        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].id, TemplateId::from("tpl-student-faculty-ratio"));
        assert_eq!(templates[0].comparison, NormComparison::AtMost);
        assert_eq!(templates[0].description.as_deref(), Some("Max students per teacher"));
        assert_eq!(templates[1].comparison, NormComparison::Present);
        assert_eq!(templates[1].criticality, Criticality::Medium);
        assert_eq!(templates[1].authority, "UGC");
        assert!(templates[1].active);
    }

    #[test]
    fn rejects_numeric_comparison_on_text_norm() {
        let csv = "Category,Name,Norm,Comparison,Authority,Criticality,Description\n\
                   Land Requirement,Land Continuity,Contiguous,at_least,AICTE,High,\n";
        match TemplateCatalog::from_reader(Cursor::new(csv)) {
            Err(TemplateImportError::InvalidRow { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.contains("not numeric"));
            }
            other => panic!("expected invalid row, got {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let csv = "Category,Name,Norm,Comparison,Authority,Criticality,Description\n\
                   Admin Area,Board Room,20 sq.m,,AICTE,High,\n\
                   Admin Area,Board Room,25 sq.m,,AICTE,High,\n";
        match TemplateCatalog::from_reader(Cursor::new(csv)) {
            Err(TemplateImportError::InvalidRow { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn from_path_propagates_io_errors() {
        match TemplateCatalog::from_path("/nonexistent/accredit/templates.csv") {
            Err(TemplateImportError::Io(_)) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
