use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::{
    Actor, ApplicationId, ApplicationRecord, ComplianceFlag, Decision, DecisionRecord, Document,
    DocumentCategory, DocumentId, DocumentRevision, DocumentStatus, DocumentUpload, Institution,
    InstitutionId, InstitutionRegistration, InstitutionStatus, ParameterDeclaration,
    ParameterInstance, ParameterTemplate, Query, QueryAudience, QueryId,
};
use super::evaluation::{ComplianceEvaluator, ComplianceReport, EvaluationConfig};
use super::lifecycle::{self, ApplicationStatus, GuardViolation, LifecycleEvent, UnmetCondition};
use super::queries::{self, Resolution};
use super::store::{ComplianceStore, LifecycleNotice, NoticePublisher, RecordEdit, StoreError};
use crate::telemetry::AUDIT_TARGET;
use crate::workflows::access::{AccessError, Capability};

const DEFAULT_TRANSITION_RETRIES: u8 = 3;

/// Workflow tuning loaded from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// How often an edit is retried after losing a version race before the caller gets
    /// a concurrent-transition conflict.
    pub transition_retries: u8,
    pub evaluation: EvaluationConfig,
    /// Titles of documents required before submission. When empty, at least one
    /// document in the mandatory category is required instead.
    pub mandatory_documents: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            transition_retries: DEFAULT_TRANSITION_RETRIES,
            evaluation: EvaluationConfig::default(),
            mandatory_documents: Vec::new(),
        }
    }
}

static INSTITUTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static DOCUMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static QUERY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_institution_id() -> InstitutionId {
    let id = INSTITUTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    InstitutionId(format!("inst-{id:06}"))
}

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("app-{id:06}"))
}

fn next_document_id() -> DocumentId {
    let id = DOCUMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    DocumentId(format!("doc-{id:06}"))
}

fn next_query_id() -> QueryId {
    let id = QUERY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    QueryId(format!("qry-{id:06}"))
}

/// Service composing the store, evaluator, state machine, and query exchange.
pub struct AccreditationService<S, N> {
    store: Arc<S>,
    notices: Arc<N>,
    evaluator: Arc<ComplianceEvaluator>,
    config: WorkflowConfig,
}

impl<S, N> AccreditationService<S, N>
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
{
    pub fn new(store: Arc<S>, notices: Arc<N>, config: WorkflowConfig) -> Self {
        let evaluator = Arc::new(ComplianceEvaluator::new(config.evaluation.clone()));
        Self {
            store,
            notices,
            evaluator,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn register_institution(
        &self,
        registration: InstitutionRegistration,
    ) -> Result<Institution, AccreditationError> {
        let name = required("name", &registration.name)?;
        let kind = required("kind", &registration.kind)?;
        let contact_email = required("contact_email", &registration.contact_email)?;
        if !contact_email.contains('@') {
            return Err(AccreditationError::Validation {
                field: "contact_email",
                message: "must be an e-mail address".to_string(),
            });
        }

        let institution = Institution {
            id: next_institution_id(),
            name,
            kind,
            location: registration.location.trim().to_string(),
            contact_email,
            status: InstitutionStatus::Active,
            registered_at: Utc::now(),
        };
        let stored = self.store.insert_institution(institution)?;
        info!(institution_id = %stored.id, name = %stored.name, "institution registered");
        Ok(stored)
    }

    /// Soft-delete. The open application stays readable but is frozen: neither the
    /// institution nor a reviewer can move it or change its documents.
    pub fn archive_institution(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<Institution, AccreditationError> {
        let archived = self
            .store
            .set_institution_status(institution_id, InstitutionStatus::Archived)
            .map_err(|error| not_found_as(error, "institution", institution_id.as_str()))?;
        info!(institution_id = %archived.id, "institution archived");
        Ok(archived)
    }

    pub fn install_templates(
        &self,
        templates: Vec<ParameterTemplate>,
    ) -> Result<usize, AccreditationError> {
        for template in &templates {
            if template.id.as_str().trim().is_empty() {
                return Err(AccreditationError::Validation {
                    field: "template.id",
                    message: "template id must not be blank".to_string(),
                });
            }
            required("template.name", &template.name)?;
            required("template.category", &template.category)?;
            if template.comparison.is_numeric() && template.norm_value.trim().is_empty() {
                return Err(AccreditationError::Validation {
                    field: "template.norm_value",
                    message: format!("'{}' needs a norm value", template.name),
                });
            }
        }

        let installed = templates.len();
        for template in templates {
            self.store.upsert_template(template)?;
        }
        info!(installed, "parameter templates installed");
        Ok(installed)
    }

    pub fn templates(&self) -> Result<Vec<ParameterTemplate>, AccreditationError> {
        Ok(self.store.templates()?)
    }

    pub fn open_application(
        &self,
        institution_id: &InstitutionId,
        actor: &Actor,
    ) -> Result<ApplicationRecord, AccreditationError> {
        ensure_capability(actor, Capability::ManageSubmission)?;
        self.active_institution(institution_id)?;

        if let Some(existing) = self.actionable_application(institution_id)? {
            return Err(GuardViolation::single(UnmetCondition::ActiveApplicationExists {
                status: existing.status,
            })
            .into());
        }

        let record = ApplicationRecord {
            id: next_application_id(),
            institution_id: institution_id.clone(),
            status: ApplicationStatus::Draft,
            version: 0,
            queries: Vec::new(),
            analysis: None,
            decision: None,
            history: Vec::new(),
            created_at: Utc::now(),
        };

        match self.store.insert_application(record) {
            Ok(stored) => {
                info!(
                    application_id = %stored.id,
                    institution_id = %stored.institution_id,
                    "application opened"
                );
                Ok(stored)
            }
            Err(StoreError::Conflict) => {
                let status = self
                    .actionable_application(institution_id)?
                    .map(|existing| existing.status)
                    .unwrap_or(ApplicationStatus::Draft);
                let violation =
                    GuardViolation::single(UnmetCondition::ActiveApplicationExists { status });
                Err(violation.into())
            }
            Err(other) => Err(other.into()),
        }
    }

    pub fn declare_parameter(
        &self,
        institution_id: &InstitutionId,
        declaration: ParameterDeclaration,
        actor: &Actor,
    ) -> Result<ParameterInstance, AccreditationError> {
        ensure_capability(actor, Capability::ManageSubmission)?;
        self.active_institution(institution_id)?;

        let template = self
            .store
            .templates()?
            .into_iter()
            .find(|template| template.id == declaration.template_id)
            .ok_or_else(|| {
                AccreditationError::NotFound(format!("template {}", declaration.template_id))
            })?;
        if !template.active {
            return Err(AccreditationError::Validation {
                field: "template_id",
                message: format!("template '{}' is retired", template.name),
            });
        }
        if let Some(evidence) = &declaration.evidence {
            self.owned_document(institution_id, evidence)?;
        }

        let application = self.open_for_institution(institution_id)?;
        let instance = ParameterInstance {
            institution_id: institution_id.clone(),
            template_id: template.id.clone(),
            value: declaration
                .value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            compliance: ComplianceFlag::Unknown,
            evidence: declaration.evidence,
            updated_at: Utc::now(),
        };
        let stored = self.commit_institution_edit(
            application,
            LifecycleEvent::DeclareParameter,
            actor,
            |_| Ok(RecordEdit::Parameter(instance.clone())),
        )?;
        debug!(
            institution_id = %institution_id,
            template_id = %instance.template_id,
            application_id = %stored.id,
            status = stored.status.label(),
            "parameter declared"
        );
        Ok(instance)
    }

    /// Store a new document, or append a revision when `document_id` names an existing one.
    pub fn upload_document(
        &self,
        institution_id: &InstitutionId,
        upload: DocumentUpload,
        actor: &Actor,
    ) -> Result<Document, AccreditationError> {
        ensure_capability(actor, Capability::ManageSubmission)?;
        self.active_institution(institution_id)?;
        let storage_key = required("storage_key", &upload.storage_key)?;
        let uploaded_by = if upload.uploaded_by.trim().is_empty() {
            actor.name.clone()
        } else {
            upload.uploaded_by.trim().to_string()
        };

        let application = self.open_for_institution(institution_id)?;
        let replaces = match &upload.document_id {
            Some(document_id) => {
                let document = self.owned_document(institution_id, document_id)?;
                self.ensure_document_editable(&document)?;
                true
            }
            None => false,
        };
        let title = upload.title.trim().to_string();
        if !replaces {
            required("title", &title)?;
        }
        let document_id = upload.document_id.clone().unwrap_or_else(next_document_id);
        let category = upload.category;
        let revision = DocumentRevision {
            storage_key,
            uploaded_by,
            uploaded_at: Utc::now(),
            declared_values: upload.declared_values,
        };

        let mut uploaded = None;
        self.commit_institution_edit(application, LifecycleEvent::UploadDocument, actor, |record| {
            let document = if replaces {
                let mut document = self.owned_document(institution_id, &document_id)?;
                if !title.is_empty() {
                    document.title = title.clone();
                }
                document.category = category;
                document.status = DocumentStatus::Pending;
                document.application_id = Some(record.id.clone());
                document.history.push(revision.clone());
                document
            } else {
                Document {
                    id: document_id.clone(),
                    institution_id: institution_id.clone(),
                    application_id: Some(record.id.clone()),
                    title: title.clone(),
                    category,
                    status: DocumentStatus::Pending,
                    history: vec![revision.clone()],
                }
            };
            uploaded = Some(document.clone());
            Ok(if replaces {
                RecordEdit::Document(document)
            } else {
                RecordEdit::NewDocument(document)
            })
        })?;
        let document =
            uploaded.ok_or_else(|| AccreditationError::NotFound(format!("document {document_id}")))?;

        info!(
            document_id = %document.id,
            institution_id = %institution_id,
            revision = document.history.len(),
            category = document.category.label(),
            "document uploaded"
        );
        Ok(document)
    }

    pub fn set_document_status(
        &self,
        document_id: &DocumentId,
        status: DocumentStatus,
        actor: &Actor,
    ) -> Result<Document, AccreditationError> {
        ensure_capability(actor, Capability::ReviewApplications)?;
        let application_id = self
            .document(document_id)?
            .application_id
            .ok_or_else(|| {
                AccreditationError::NotFound(format!("application for document {document_id}"))
            })?;

        let mut reviewed = None;
        self.commit_on_latest(&application_id, |record| {
            self.ensure_open_record(record)?;
            let mut document = self.document(document_id)?;
            document.status = status;
            reviewed = Some(document.clone());
            Ok(RecordEdit::Document(document))
        })?;
        let document =
            reviewed.ok_or_else(|| AccreditationError::NotFound(format!("document {document_id}")))?;
        info!(
            document_id = %document.id,
            status = status.label(),
            reviewer = %actor.name,
            "document status updated"
        );
        Ok(document)
    }

    pub fn submit_application(
        &self,
        application_id: &ApplicationId,
        actor: &Actor,
    ) -> Result<ApplicationRecord, AccreditationError> {
        ensure_capability(actor, Capability::ManageSubmission)?;
        let current = self.load_application(application_id)?;

        let stored = self.commit_transition(current, LifecycleEvent::Submit, actor, |record| {
            let mut unmet = self.missing_parameters(&record.institution_id)?;
            unmet.extend(self.missing_documents(&record.institution_id)?);
            GuardViolation::check(unmet)?;
            Ok(())
        })?;

        self.notify("application_submitted", &stored, BTreeMap::new());
        Ok(stored)
    }

    pub fn application_status(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ApplicationRecord, AccreditationError> {
        self.load_application(application_id)
    }

    /// Most recent application of an institution, actionable or not.
    pub fn latest_application(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<Option<ApplicationRecord>, AccreditationError> {
        Ok(self.store.applications_for(institution_id)?.pop())
    }

    pub fn application_for_query(
        &self,
        query_id: &QueryId,
    ) -> Result<ApplicationRecord, AccreditationError> {
        let application_id = self
            .store
            .application_for_query(query_id)?
            .ok_or_else(|| AccreditationError::NotFound(format!("query {query_id}")))?;
        self.load_application(&application_id)
    }

    pub fn begin_review(
        &self,
        application_id: &ApplicationId,
        actor: &Actor,
    ) -> Result<ApplicationRecord, AccreditationError> {
        ensure_capability(actor, Capability::ReviewApplications)?;
        let current = self.load_application(application_id)?;
        self.commit_transition(current, LifecycleEvent::BeginReview, actor, |_| Ok(()))
    }

    pub fn raise_query(
        &self,
        application_id: &ApplicationId,
        to_role: QueryAudience,
        message: &str,
        actor: &Actor,
    ) -> Result<Query, AccreditationError> {
        ensure_capability(actor, Capability::ReviewApplications)?;
        required("message", message)?;

        let query_id = next_query_id();
        let (stored, query) = self.commit_with_retry(application_id, |record| {
            let query = queries::raise(
                record,
                query_id.clone(),
                actor,
                to_role,
                message,
                Utc::now(),
            )?;
            Ok(Some(query))
        })?;
        let query = query.ok_or_else(|| AccreditationError::NotFound(format!("query {query_id}")))?;

        info!(
            application_id = %stored.id,
            query_id = %query.id,
            open_queries = stored.open_queries(),
            status = stored.status.label(),
            "query raised"
        );
        let mut details = BTreeMap::new();
        details.insert("query_id".to_string(), query.id.to_string());
        details.insert("message".to_string(), query.message.clone());
        self.notify("query_raised", &stored, details);
        Ok(query)
    }

    pub fn reply(
        &self,
        query_id: &QueryId,
        text: &str,
        actor: &Actor,
    ) -> Result<Query, AccreditationError> {
        if !actor.role.allows(Capability::ReviewApplications) {
            ensure_capability(actor, Capability::ManageSubmission)?;
        }
        required("text", text)?;

        let application = self.application_for_query(query_id)?;
        let (stored, query) = self.commit_with_retry(&application.id, |record| {
            Ok(queries::reply(record, query_id, actor, text, Utc::now())?)
        })?;
        let query = query.ok_or_else(|| AccreditationError::NotFound(format!("query {query_id}")))?;

        info!(application_id = %stored.id, query_id = %query.id, "query replied");
        Ok(query)
    }

    /// Reviewer-confirmed resolution. The last open query returns the application to review.
    pub fn resolve(
        &self,
        query_id: &QueryId,
        actor: &Actor,
    ) -> Result<ApplicationRecord, AccreditationError> {
        ensure_capability(actor, Capability::ReviewApplications)?;
        let application = self.application_for_query(query_id)?;

        let mut outcome = Resolution::Missing;
        let (stored, _) = self.commit_with_retry(&application.id, |record| {
            outcome = queries::resolve(record, query_id, actor, Utc::now())?;
            Ok(match outcome {
                Resolution::Resolved { .. } => Some(()),
                Resolution::Unchanged | Resolution::Missing => None,
            })
        })?;

        match outcome {
            Resolution::Missing => Err(AccreditationError::NotFound(format!("query {query_id}"))),
            Resolution::Unchanged => {
                debug!(query_id = %query_id, "query already resolved");
                Ok(stored)
            }
            Resolution::Resolved { reopened_review } => {
                info!(
                    application_id = %stored.id,
                    query_id = %query_id,
                    open_queries = stored.open_queries(),
                    reopened_review,
                    "query resolved"
                );
                Ok(stored)
            }
        }
    }

    /// Evaluate the institution's current data and write compliance flags back when no
    /// declaration raced the evaluation.
    pub fn recompute_compliance(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<ComplianceReport, AccreditationError> {
        self.institution(institution_id)?;
        let snapshot = self.store.snapshot(institution_id)?;
        let report = self.evaluator.evaluate(&snapshot);

        let applied =
            self.store
                .apply_compliance(institution_id, snapshot.revision, &report.compliance_flags())?;
        if applied {
            debug!(
                institution_id = %institution_id,
                revision = snapshot.revision,
                score = report.aggregate_score,
                "compliance flags written"
            );
        } else {
            warn!(
                institution_id = %institution_id,
                revision = snapshot.revision,
                "parameters changed during evaluation; compliance write-back skipped"
            );
        }
        Ok(report)
    }

    pub fn run_analysis(
        &self,
        application_id: &ApplicationId,
        actor: &Actor,
    ) -> Result<ApplicationRecord, AccreditationError> {
        ensure_capability(actor, Capability::ReviewApplications)?;
        let current = self.load_application(application_id)?;
        let open = current.open_queries();
        if open > 0 && !current.status.is_terminal() {
            return Err(GuardViolation::single(UnmetCondition::OpenQueries { count: open }).into());
        }
        let report = self.recompute_compliance(&current.institution_id)?;
        let score = report.aggregate_score;

        let stored = self.commit_transition(current, LifecycleEvent::RunAnalysis, actor, |record| {
            let open = record.open_queries();
            if open > 0 {
                let violation = GuardViolation::single(UnmetCondition::OpenQueries { count: open });
                return Err(violation.into());
            }
            record.analysis = Some(report);
            Ok(())
        })?;

        let mut details = BTreeMap::new();
        details.insert("ai_score".to_string(), format!("{score:.1}"));
        self.notify("analysis_ready", &stored, details);
        Ok(stored)
    }

    pub fn decide(
        &self,
        application_id: &ApplicationId,
        decision: Decision,
        remarks: &str,
        actor: &Actor,
    ) -> Result<ApplicationRecord, AccreditationError> {
        ensure_capability(actor, Capability::DecideApplications)?;
        let remarks = required("remarks", remarks)?;
        let current = self.load_application(application_id)?;

        let stored = self.commit_transition(
            current,
            LifecycleEvent::Decide(decision),
            actor,
            |record| {
                record.decision = Some(DecisionRecord {
                    decision,
                    remarks: remarks.clone(),
                    decided_by: actor.name.clone(),
                    role: actor.role,
                    decided_at: Utc::now(),
                });
                Ok(())
            },
        )?;

        let mut details = BTreeMap::new();
        details.insert(
            "decision".to_string(),
            stored.status.label().to_string(),
        );
        details.insert("remarks".to_string(), remarks);
        self.notify("application_decided", &stored, details);
        Ok(stored)
    }

    fn institution(&self, institution_id: &InstitutionId) -> Result<Institution, AccreditationError> {
        self.store
            .fetch_institution(institution_id)?
            .ok_or_else(|| AccreditationError::NotFound(format!("institution {institution_id}")))
    }

    fn active_institution(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<Institution, AccreditationError> {
        let institution = self.institution(institution_id)?;
        if !institution.is_active() {
            return Err(GuardViolation::single(UnmetCondition::InstitutionArchived).into());
        }
        Ok(institution)
    }

    fn load_application(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ApplicationRecord, AccreditationError> {
        self.store
            .fetch_application(application_id)?
            .ok_or_else(|| AccreditationError::NotFound(format!("application {application_id}")))
    }

    fn actionable_application(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<Option<ApplicationRecord>, AccreditationError> {
        Ok(self
            .store
            .applications_for(institution_id)?
            .into_iter()
            .find(|record| record.status.is_actionable()))
    }

    /// The actionable application an institution edit applies to. Reports the terminal
    /// status of the latest application when nothing is open.
    fn open_for_institution(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<ApplicationRecord, AccreditationError> {
        if let Some(open) = self.actionable_application(institution_id)? {
            return Ok(open);
        }
        let condition = match self.latest_application(institution_id)? {
            Some(latest) => UnmetCondition::TerminalApplication {
                status: latest.status,
            },
            None => UnmetCondition::NoOpenApplication,
        };
        Err(GuardViolation::single(condition).into())
    }

    fn document(&self, document_id: &DocumentId) -> Result<Document, AccreditationError> {
        self.store
            .fetch_document(document_id)?
            .ok_or_else(|| AccreditationError::NotFound(format!("document {document_id}")))
    }

    fn owned_document(
        &self,
        institution_id: &InstitutionId,
        document_id: &DocumentId,
    ) -> Result<Document, AccreditationError> {
        self.store
            .fetch_document(document_id)?
            .filter(|document| &document.institution_id == institution_id)
            .ok_or_else(|| AccreditationError::NotFound(format!("document {document_id}")))
    }

    /// Reject changes to an application that is decided or whose institution is archived.
    fn ensure_open_record(&self, record: &ApplicationRecord) -> Result<(), AccreditationError> {
        if record.status.is_terminal() {
            return Err(GuardViolation::single(UnmetCondition::TerminalApplication {
                status: record.status,
            })
            .into());
        }
        self.active_institution(&record.institution_id)?;
        Ok(())
    }

    /// A document belongs to the application it was last uploaded for and is frozen with it.
    fn ensure_document_editable(&self, document: &Document) -> Result<(), AccreditationError> {
        match &document.application_id {
            Some(application_id) => {
                let application = self.load_application(application_id)?;
                self.ensure_open_record(&application)
            }
            None => Ok(()),
        }
    }

    /// Commit an institution edit together with its status effect. `edit` is rebuilt from
    /// fresh data after every lost race. Edits that keep the status still bump the
    /// version, so a concurrent submit cannot interleave unnoticed.
    fn commit_institution_edit<F>(
        &self,
        application: ApplicationRecord,
        event: LifecycleEvent,
        actor: &Actor,
        mut edit: F,
    ) -> Result<ApplicationRecord, AccreditationError>
    where
        F: FnMut(&ApplicationRecord) -> Result<RecordEdit, AccreditationError>,
    {
        let mut current = application;
        for _ in 0..=self.config.transition_retries {
            let next = lifecycle::transition(current.status, event)?;
            let change = edit(&current)?;
            let mut updated = current.clone();
            if next != current.status {
                queries::stamp(&mut updated, next, actor, Utc::now());
            }
            match self.store.commit_edit(updated, current.version, change) {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict { .. }) => {
                    current = self.load_application(&current.id)?;
                    self.ensure_open_record(&current)?;
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(AccreditationError::ConcurrentTransitionConflict {
            application_id: current.id,
        })
    }

    /// Commit the change `edit` builds against the latest application version, re-running
    /// it after every lost race.
    fn commit_on_latest<F>(
        &self,
        application_id: &ApplicationId,
        mut edit: F,
    ) -> Result<ApplicationRecord, AccreditationError>
    where
        F: FnMut(&ApplicationRecord) -> Result<RecordEdit, AccreditationError>,
    {
        for _ in 0..=self.config.transition_retries {
            let current = self.load_application(application_id)?;
            let change = edit(&current)?;
            match self.store.commit_edit(current.clone(), current.version, change) {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(application_id = %application_id, "retrying after version conflict");
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(AccreditationError::ConcurrentTransitionConflict {
            application_id: application_id.clone(),
        })
    }

    /// Apply one table transition with guards evaluated on the same record version that
    /// is committed. A caller that loses the version race gets an idempotent success when
    /// the record already sits at the target status, and a conflict otherwise.
    fn commit_transition<F>(
        &self,
        current: ApplicationRecord,
        event: LifecycleEvent,
        actor: &Actor,
        guards: F,
    ) -> Result<ApplicationRecord, AccreditationError>
    where
        F: FnOnce(&mut ApplicationRecord) -> Result<(), AccreditationError>,
    {
        self.ensure_open_record(&current)?;
        let target = lifecycle::transition(current.status, event)?;

        let mut next = current.clone();
        guards(&mut next)?;
        queries::stamp(&mut next, target, actor, Utc::now());

        match self.store.update_application(next, current.version) {
            Ok(stored) => {
                info!(
                    application_id = %stored.id,
                    from = current.status.label(),
                    to = stored.status.label(),
                    event = event.label(),
                    actor = %actor.name,
                    "application transitioned"
                );
                Ok(stored)
            }
            Err(StoreError::VersionConflict { expected, found }) => {
                let latest = self.load_application(&current.id)?;
                if latest.status == target {
                    debug!(
                        application_id = %latest.id,
                        status = target.label(),
                        "transition already applied by a concurrent caller"
                    );
                    Ok(latest)
                } else {
                    warn!(
                        application_id = %current.id,
                        expected,
                        found,
                        event = event.label(),
                        "concurrent transition conflict"
                    );
                    Err(AccreditationError::ConcurrentTransitionConflict {
                        application_id: current.id,
                    })
                }
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Re-run `edit` on a fresh read until the compare-and-swap succeeds. `edit` returning
    /// `None` means there is nothing to commit.
    fn commit_with_retry<T, F>(
        &self,
        application_id: &ApplicationId,
        mut edit: F,
    ) -> Result<(ApplicationRecord, Option<T>), AccreditationError>
    where
        F: FnMut(&mut ApplicationRecord) -> Result<Option<T>, AccreditationError>,
    {
        let attempts = usize::from(self.config.transition_retries) + 1;
        for attempt in 1..=attempts {
            let current = self.load_application(application_id)?;
            self.active_institution(&current.institution_id)?;
            let mut next = current.clone();
            let Some(value) = edit(&mut next)? else {
                return Ok((current, None));
            };
            match self.store.update_application(next, current.version) {
                Ok(stored) => return Ok((stored, Some(value))),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(
                        application_id = %application_id,
                        attempt,
                        "retrying after version conflict"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }
        warn!(
            application_id = %application_id,
            attempts,
            "giving up after repeated version conflicts"
        );
        Err(AccreditationError::ConcurrentTransitionConflict {
            application_id: application_id.clone(),
        })
    }

    fn missing_parameters(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<Vec<UnmetCondition>, AccreditationError> {
        let declared: Vec<ParameterInstance> = self.store.parameters(institution_id)?;
        let mut templates: Vec<ParameterTemplate> = self
            .store
            .templates()?
            .into_iter()
            .filter(|template| template.active)
            .collect();
        templates.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.name.cmp(&b.name)));

        Ok(templates
            .into_iter()
            .filter(|template| {
                !declared.iter().any(|instance| {
                    instance.template_id == template.id && instance.declared_value().is_some()
                })
            })
            .map(|template| UnmetCondition::MissingParameter {
                template_id: template.id,
                name: template.name,
            })
            .collect())
    }

    fn missing_documents(
        &self,
        institution_id: &InstitutionId,
    ) -> Result<Vec<UnmetCondition>, AccreditationError> {
        let usable: Vec<Document> = self
            .store
            .documents(institution_id)?
            .into_iter()
            .filter(|document| document.status != DocumentStatus::ReuploadRequested)
            .collect();

        if self.config.mandatory_documents.is_empty() {
            let has_mandatory = usable
                .iter()
                .any(|document| document.category == DocumentCategory::Mandatory);
            return Ok(if has_mandatory {
                Vec::new()
            } else {
                vec![UnmetCondition::MissingMandatoryDocument {
                    category: DocumentCategory::Mandatory,
                    title: None,
                }]
            });
        }

        Ok(self
            .config
            .mandatory_documents
            .iter()
            .filter(|title| {
                !usable
                    .iter()
                    .any(|document| document.title.trim().eq_ignore_ascii_case(title.trim()))
            })
            .map(|title| UnmetCondition::MissingMandatoryDocument {
                category: DocumentCategory::Mandatory,
                title: Some(title.clone()),
            })
            .collect())
    }

    /// Best effort: a failed notice never rolls back a committed transition.
    fn notify(&self, template: &str, record: &ApplicationRecord, details: BTreeMap<String, String>) {
        let notice = LifecycleNotice {
            template: template.to_string(),
            application_id: record.id.clone(),
            institution_id: record.institution_id.clone(),
            details,
        };
        if let Err(error) = self.notices.publish(notice) {
            warn!(application_id = %record.id, template, %error, "lifecycle notice not delivered");
        }
    }
}

fn required(field: &'static str, value: &str) -> Result<String, AccreditationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AccreditationError::Validation {
            field,
            message: "must not be blank".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn ensure_capability(actor: &Actor, capability: Capability) -> Result<(), AccreditationError> {
    if actor.role.allows(capability) {
        return Ok(());
    }
    warn!(
        target: AUDIT_TARGET,
        actor = %actor.name,
        role = actor.role.label(),
        capability = capability.label(),
        "authorization denied"
    );
    Err(AccessError::AuthorizationFailure { capability }.into())
}

fn not_found_as(error: StoreError, kind: &str, id: &str) -> AccreditationError {
    match error {
        StoreError::NotFound => AccreditationError::NotFound(format!("{kind} {id}")),
        other => other.into(),
    }
}

/// Error raised by the accreditation service and the key-mediated catalog.
#[derive(Debug, thiserror::Error)]
pub enum AccreditationError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error(transparent)]
    StateGuard(#[from] GuardViolation),
    #[error("application {application_id} was changed concurrently; reload and retry")]
    ConcurrentTransitionConflict { application_id: ApplicationId },
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Access(#[from] AccessError),
}
