use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, ApplicationRecord, ComplianceFlag, Document, DocumentId, Institution,
    InstitutionId, InstitutionStatus, ParameterInstance, ParameterTemplate, QueryId, TemplateId,
};
use super::evaluation::ComplianceSnapshot;

/// Narrow storage interface for institutions, templates, parameters, documents and
/// applications. Implementations must make each method atomic.
pub trait ComplianceStore: Send + Sync {
    fn insert_institution(&self, institution: Institution) -> Result<Institution, StoreError>;
    fn fetch_institution(&self, id: &InstitutionId) -> Result<Option<Institution>, StoreError>;
    fn list_institutions(&self) -> Result<Vec<Institution>, StoreError>;
    fn set_institution_status(
        &self,
        id: &InstitutionId,
        status: InstitutionStatus,
    ) -> Result<Institution, StoreError>;

    fn upsert_template(&self, template: ParameterTemplate) -> Result<(), StoreError>;
    fn templates(&self) -> Result<Vec<ParameterTemplate>, StoreError>;

    fn parameters(&self, institution: &InstitutionId) -> Result<Vec<ParameterInstance>, StoreError>;
    /// Write evaluator flags back, but only if no declaration happened since `revision`.
    /// Returns `false` when the write was skipped because the data moved on.
    fn apply_compliance(
        &self,
        institution: &InstitutionId,
        revision: u64,
        flags: &[(TemplateId, ComplianceFlag)],
    ) -> Result<bool, StoreError>;

    fn fetch_document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError>;
    fn documents(&self, institution: &InstitutionId) -> Result<Vec<Document>, StoreError>;

    /// Templates, parameters and documents of one institution read under a single lock.
    fn snapshot(&self, institution: &InstitutionId) -> Result<ComplianceSnapshot, StoreError>;

    /// Insert a new application. Fails with `Conflict` when the institution already
    /// has an actionable application; the check and the insert are one atomic step.
    fn insert_application(&self, record: ApplicationRecord) -> Result<ApplicationRecord, StoreError>;
    fn fetch_application(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError>;
    /// Compare-and-swap on `record.version`: succeeds only if the stored version equals
    /// `expected_version`, and stores the record with its version incremented.
    fn update_application(
        &self,
        record: ApplicationRecord,
        expected_version: u64,
    ) -> Result<ApplicationRecord, StoreError>;
    /// Apply `edit` and store `record` as one step, under the same compare-and-swap as
    /// [`ComplianceStore::update_application`]. Nothing is written when the version check
    /// or the edit's own precondition fails.
    fn commit_edit(
        &self,
        record: ApplicationRecord,
        expected_version: u64,
        edit: RecordEdit,
    ) -> Result<ApplicationRecord, StoreError>;
    fn applications(&self) -> Result<Vec<ApplicationRecord>, StoreError>;
    fn applications_for(
        &self,
        institution: &InstitutionId,
    ) -> Result<Vec<ApplicationRecord>, StoreError>;
    fn application_for_query(&self, query: &QueryId) -> Result<Option<ApplicationId>, StoreError>;
}

/// Institution data written together with an application version bump.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEdit {
    /// Upsert a declaration and bump the institution's parameter revision.
    Parameter(ParameterInstance),
    /// Insert a document; `Conflict` if the id is taken.
    NewDocument(Document),
    /// Replace a stored document; `NotFound` if it is missing.
    Document(Document),
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently (expected version {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hook (e-mail, dashboards) for lifecycle milestones.
pub trait NoticePublisher: Send + Sync {
    fn publish(&self, notice: LifecycleNotice) -> Result<(), NoticeError>;
}

/// Notification payload describing a committed milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleNotice {
    pub template: String,
    pub application_id: ApplicationId,
    pub institution_id: InstitutionId,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NoticeError {
    #[error("notice transport unavailable: {0}")]
    Transport(String),
}
