use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluation::ComplianceReport;
use super::lifecycle::ApplicationStatus;
use crate::workflows::access::Role;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for registered institutions.
    InstitutionId
);
string_id!(
    /// Identifier wrapper for global parameter templates.
    TemplateId
);
string_id!(
    /// Identifier wrapper for accreditation applications.
    ApplicationId
);
string_id!(QueryId);
string_id!(DocumentId);

/// Whoever performs a command, as recorded on stamps, replies, and decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Registered institution profile. Institutions are archived, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: InstitutionId,
    pub name: String,
    pub kind: String,
    pub location: String,
    pub contact_email: String,
    pub status: InstitutionStatus,
    pub registered_at: DateTime<Utc>,
}

impl Institution {
    pub fn is_active(&self) -> bool {
        self.status == InstitutionStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionStatus {
    Active,
    Archived,
}

impl InstitutionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            InstitutionStatus::Active => "active",
            InstitutionStatus::Archived => "archived",
        }
    }
}

/// Inbound registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionRegistration {
    pub name: String,
    pub kind: String,
    pub location: String,
    pub contact_email: String,
}

/// Regulator-defined compliance rule with a norm value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterTemplate {
    pub id: TemplateId,
    pub name: String,
    pub category: String,
    pub norm_value: String,
    pub comparison: NormComparison,
    pub authority: String,
    pub criticality: Criticality,
    #[serde(default)]
    pub description: Option<String>,
    pub version: u32,
    pub active: bool,
}

/// How a declared value is checked against a template norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormComparison {
    Equals,
    GreaterThan,
    AtLeast,
    LessThan,
    AtMost,
    Present,
}

impl NormComparison {
    pub const fn label(self) -> &'static str {
        match self {
            NormComparison::Equals => "equals",
            NormComparison::GreaterThan => "greater_than",
            NormComparison::AtLeast => "at_least",
            NormComparison::LessThan => "less_than",
            NormComparison::AtMost => "at_most",
            NormComparison::Present => "present",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "equals" | "eq" => Some(Self::Equals),
            "greaterthan" | "gt" => Some(Self::GreaterThan),
            "atleast" | "gte" | "min" => Some(Self::AtLeast),
            "lessthan" | "lt" => Some(Self::LessThan),
            "atmost" | "lte" | "max" => Some(Self::AtMost),
            "present" | "presence" | "exists" => Some(Self::Present),
            _ => None,
        }
    }

    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            NormComparison::GreaterThan
                | NormComparison::AtLeast
                | NormComparison::LessThan
                | NormComparison::AtMost
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    Medium,
    High,
}

impl Criticality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "desired" => Some(Self::Low),
            "medium" | "" => Some(Self::Medium),
            "high" | "critical" | "mandatory" => Some(Self::High),
            _ => None,
        }
    }
}

/// Derived compliance flag; written exclusively by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceFlag {
    Compliant,
    NonCompliant,
    Unknown,
}

/// One institution's declared value for one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInstance {
    pub institution_id: InstitutionId,
    pub template_id: TemplateId,
    pub value: Option<String>,
    pub compliance: ComplianceFlag,
    pub evidence: Option<DocumentId>,
    pub updated_at: DateTime<Utc>,
}

impl ParameterInstance {
    pub fn declared_value(&self) -> Option<&str> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Institution-side declaration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub template_id: TemplateId,
    pub value: Option<String>,
    #[serde(default)]
    pub evidence: Option<DocumentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Mandatory,
    Academic,
    Admin,
    Infra,
    Finance,
    Faculty,
}

impl DocumentCategory {
    pub const ALL: [DocumentCategory; 6] = [
        DocumentCategory::Mandatory,
        DocumentCategory::Academic,
        DocumentCategory::Admin,
        DocumentCategory::Infra,
        DocumentCategory::Finance,
        DocumentCategory::Faculty,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            DocumentCategory::Mandatory => "mandatory",
            DocumentCategory::Academic => "academic",
            DocumentCategory::Admin => "admin",
            DocumentCategory::Infra => "infra",
            DocumentCategory::Finance => "finance",
            DocumentCategory::Faculty => "faculty",
        }
    }

    /// Maps a free-text parameter category onto the document category that
    /// usually carries its evidence.
    pub fn for_parameter_category(category: &str) -> Option<Self> {
        let lowered = category.to_ascii_lowercase();
        if lowered.contains("faculty") || lowered.contains("staff") {
            Some(Self::Faculty)
        } else if lowered.contains("admin") {
            Some(Self::Admin)
        } else if lowered.contains("financ") || lowered.contains("fund") {
            Some(Self::Finance)
        } else if lowered.contains("land")
            || lowered.contains("instructional")
            || lowered.contains("infra")
            || lowered.contains("amenit")
            || lowered.contains("area")
        {
            Some(Self::Infra)
        } else if lowered.contains("academic") || lowered.contains("curricul") {
            Some(Self::Academic)
        } else {
            None
        }
    }
}

/// Reviewer-set verification state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Verified,
    ReuploadRequested,
}

impl DocumentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Verified => "verified",
            DocumentStatus::ReuploadRequested => "reupload_requested",
        }
    }
}

/// Uploaded evidence with append-only revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub institution_id: InstitutionId,
    pub application_id: Option<ApplicationId>,
    pub title: String,
    pub category: DocumentCategory,
    pub status: DocumentStatus,
    pub history: Vec<DocumentRevision>,
}

impl Document {
    pub fn latest(&self) -> Option<&DocumentRevision> {
        self.history.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevision {
    pub storage_key: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    /// Quantities the document states, keyed by free-text name ("Lab Area").
    #[serde(default)]
    pub declared_values: BTreeMap<String, String>,
}

/// Upload payload. Supplying `document_id` appends a revision to an existing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpload {
    #[serde(default)]
    pub document_id: Option<DocumentId>,
    pub title: String,
    pub category: DocumentCategory,
    pub storage_key: String,
    pub uploaded_by: String,
    #[serde(default)]
    pub declared_values: BTreeMap<String, String>,
}

/// Final reviewer decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub remarks: String,
    pub decided_by: String,
    pub role: Role,
    pub decided_at: DateTime<Utc>,
}

/// Who a query is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryAudience {
    Institution,
    Ugc,
    Aicte,
    SuperAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReply {
    pub text: String,
    pub replied_by: String,
    pub replied_at: DateTime<Utc>,
}

/// Reviewer question against an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub raised_by: String,
    pub to_role: QueryAudience,
    pub message: String,
    pub reply: Option<QueryReply>,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub raised_at: DateTime<Utc>,
}

/// Timestamped record of one committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStamp {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// The unit of regulatory review, including its embedded query list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub institution_id: InstitutionId,
    pub status: ApplicationStatus,
    /// Monotonic counter used for compare-and-swap commits.
    pub version: u64,
    pub queries: Vec<Query>,
    pub analysis: Option<ComplianceReport>,
    pub decision: Option<DecisionRecord>,
    pub history: Vec<TransitionStamp>,
    pub created_at: DateTime<Utc>,
}

impl ApplicationRecord {
    pub fn open_queries(&self) -> usize {
        self.queries.iter().filter(|query| !query.is_resolved).count()
    }

    pub fn query(&self, id: &QueryId) -> Option<&Query> {
        self.queries.iter().find(|query| &query.id == id)
    }

    pub fn stamp_of(&self, status: ApplicationStatus) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .rev()
            .find(|stamp| stamp.to == status)
            .map(|stamp| stamp.at)
    }

    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            application_id: self.id.clone(),
            institution_id: self.institution_id.clone(),
            status: self.status.label(),
            open_queries: self.open_queries(),
            total_queries: self.queries.len(),
            ai_score: self.analysis.as_ref().map(|report| report.aggregate_score),
            decision: self.decision.as_ref().map(|decision| decision.decision),
            submitted_at: self.stamp_of(ApplicationStatus::Submitted),
            updated_at: self
                .history
                .last()
                .map(|stamp| stamp.at)
                .unwrap_or(self.created_at),
        }
    }
}

/// Sanitized representation of an application's exposed status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub institution_id: InstitutionId,
    pub status: &'static str,
    pub open_queries: usize,
    pub total_queries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
