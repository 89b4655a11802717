use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::workflows::access::{
    AccessAuthority, InMemoryKeyStore, IssuedKey, KeyHasher, KeyRequest, Role,
};
use crate::workflows::accreditation::domain::{
    Actor, ApplicationId, ApplicationRecord, ComplianceFlag, Criticality, Document,
    DocumentCategory, DocumentId, DocumentUpload, Institution, InstitutionId,
    InstitutionRegistration, InstitutionStatus, NormComparison, ParameterDeclaration,
    ParameterInstance, ParameterTemplate, QueryId, TemplateId,
};
use crate::workflows::accreditation::evaluation::ComplianceSnapshot;
use crate::workflows::accreditation::store::{
    ComplianceStore, LifecycleNotice, NoticeError, NoticePublisher, RecordEdit, StoreError,
};
use crate::workflows::accreditation::{
    AccreditationApi, AccreditationService, InMemoryComplianceStore, InMemoryNoticePublisher,
    RepositoryCatalog, WorkflowConfig, API_KEY_HEADER,
};

pub(super) type MemoryService = AccreditationService<InMemoryComplianceStore, InMemoryNoticePublisher>;
pub(super) type MemoryApi =
    AccreditationApi<InMemoryComplianceStore, InMemoryNoticePublisher, InMemoryKeyStore>;

pub(super) const LAND_AREA: &str = "tpl-land-area";
pub(super) const CLASSROOMS: &str = "tpl-classrooms";
pub(super) const DRAWING_HALL: &str = "tpl-drawing-hall";
pub(super) const FIRE_NOC: &str = "tpl-fire-noc";

pub(super) fn template(
    id: &str,
    name: &str,
    category: &str,
    norm_value: &str,
    comparison: NormComparison,
    criticality: Criticality,
) -> ParameterTemplate {
    ParameterTemplate {
        id: TemplateId::from(id),
        name: name.to_string(),
        category: category.to_string(),
        norm_value: norm_value.to_string(),
        comparison,
        authority: "AICTE".to_string(),
        criticality,
        description: None,
        version: 1,
        active: true,
    }
}

pub(super) fn templates() -> Vec<ParameterTemplate> {
    vec![
        template(
            LAND_AREA,
            "Land Area",
            "Land Requirement",
            "2.5 Acres",
            NormComparison::AtLeast,
            Criticality::High,
        ),
        template(
            CLASSROOMS,
            "Classrooms",
            "Instructional Area",
            "66 sq.m",
            NormComparison::AtLeast,
            Criticality::High,
        ),
        template(
            DRAWING_HALL,
            "Drawing Hall",
            "Instructional Area",
            "132 sq.m",
            NormComparison::AtLeast,
            Criticality::Medium,
        ),
        template(
            FIRE_NOC,
            "Fire NOC",
            "Amenities Area",
            "Valid certificate",
            NormComparison::Present,
            Criticality::Low,
        ),
    ]
}

/// Values that satisfy every template returned by [`templates`].
pub(super) fn compliant_values() -> Vec<(&'static str, &'static str)> {
    vec![
        (LAND_AREA, "3 Acres"),
        (CLASSROOMS, "70 sq.m"),
        (DRAWING_HALL, "140 sq.m"),
        (FIRE_NOC, "NOC-2024-118"),
    ]
}

pub(super) fn instance(institution: &str, template_id: &str, value: &str) -> ParameterInstance {
    ParameterInstance {
        institution_id: InstitutionId::from(institution),
        template_id: TemplateId::from(template_id),
        value: Some(value.to_string()),
        compliance: ComplianceFlag::Unknown,
        evidence: None,
        updated_at: Utc::now(),
    }
}

pub(super) fn snapshot(
    institution: &str,
    instances: Vec<ParameterInstance>,
    documents: Vec<Document>,
) -> ComplianceSnapshot {
    ComplianceSnapshot {
        institution_id: InstitutionId::from(institution),
        revision: 1,
        templates: templates(),
        instances,
        documents,
    }
}

pub(super) fn college() -> Actor {
    Actor::new("college-portal", Role::Institution)
}

pub(super) fn reviewer() -> Actor {
    Actor::new("aicte-desk", Role::AicteAdmin)
}

pub(super) fn registration(name: &str) -> InstitutionRegistration {
    InstitutionRegistration {
        name: name.to_string(),
        kind: "Engineering".to_string(),
        location: "Pune".to_string(),
        contact_email: "registrar@example.edu".to_string(),
    }
}

pub(super) fn declaration(template_id: &str, value: &str) -> ParameterDeclaration {
    ParameterDeclaration {
        template_id: TemplateId::from(template_id),
        value: Some(value.to_string()),
        evidence: None,
    }
}

pub(super) fn upload(title: &str, category: DocumentCategory) -> DocumentUpload {
    DocumentUpload {
        document_id: None,
        title: title.to_string(),
        category,
        storage_key: format!("uploads/{}.pdf", title.to_lowercase().replace(' ', "-")),
        uploaded_by: String::new(),
        declared_values: BTreeMap::new(),
    }
}

pub(super) fn build_service() -> (
    MemoryService,
    Arc<InMemoryComplianceStore>,
    Arc<InMemoryNoticePublisher>,
) {
    build_service_with(WorkflowConfig::default())
}

pub(super) fn build_service_with(
    config: WorkflowConfig,
) -> (
    MemoryService,
    Arc<InMemoryComplianceStore>,
    Arc<InMemoryNoticePublisher>,
) {
    let store = Arc::new(InMemoryComplianceStore::default());
    let notices = Arc::new(InMemoryNoticePublisher::default());
    let service = AccreditationService::new(store.clone(), notices.clone(), config);
    service
        .install_templates(templates())
        .expect("templates install");
    (service, store, notices)
}

/// Register an institution and open its first application.
pub(super) fn open_institution<S, N>(
    service: &AccreditationService<S, N>,
    name: &str,
) -> (Institution, ApplicationRecord)
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
{
    let institution = service
        .register_institution(registration(name))
        .expect("registration succeeds");
    let application = service
        .open_application(&institution.id, &college())
        .expect("application opens");
    (institution, application)
}

/// An institution whose open application passes every submission guard.
pub(super) fn ready_institution<S, N>(
    service: &AccreditationService<S, N>,
    name: &str,
) -> (Institution, ApplicationRecord)
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
{
    let (institution, _) = open_institution(service, name);
    for (template_id, value) in compliant_values() {
        service
            .declare_parameter(&institution.id, declaration(template_id, value), &college())
            .expect("declaration succeeds");
    }
    service
        .upload_document(
            &institution.id,
            upload("Approval Letter", DocumentCategory::Mandatory),
            &college(),
        )
        .expect("upload succeeds");
    let application = service
        .latest_application(&institution.id)
        .expect("store reachable")
        .expect("application present");
    (institution, application)
}

/// A submitted application that a reviewer has taken into review.
pub(super) fn reviewing_application(service: &MemoryService, name: &str) -> ApplicationRecord {
    let (_, application) = ready_institution(service, name);
    service
        .submit_application(&application.id, &college())
        .expect("submission succeeds");
    service
        .begin_review(&application.id, &reviewer())
        .expect("review starts")
}

pub(super) fn build_api() -> Arc<MemoryApi> {
    let (service, store, _) = build_service();
    let catalog = RepositoryCatalog::new(store);
    let authority = AccessAuthority::new(
        Arc::new(InMemoryKeyStore::default()),
        KeyHasher::new("test-pepper"),
    );
    Arc::new(AccreditationApi::new(service, catalog, authority))
}

pub(super) fn issue(api: &MemoryApi, role: Role) -> IssuedKey {
    api.authority
        .generate(KeyRequest::new(format!("{}-client", role.tag()), role))
        .expect("key issued")
}

pub(super) fn issue_for(api: &MemoryApi, institution: &InstitutionId) -> IssuedKey {
    api.authority
        .generate(
            KeyRequest::new("college-portal", Role::Institution).scoped_to(institution.clone()),
        )
        .expect("key issued")
}

pub(super) fn key_headers(key: &IssuedKey) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        API_KEY_HEADER,
        HeaderValue::from_str(&key.key).expect("key is a valid header value"),
    );
    headers
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 256 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

#[derive(Default, Clone)]
pub(super) struct FailingNotices;

impl NoticePublisher for FailingNotices {
    fn publish(&self, _notice: LifecycleNotice) -> Result<(), NoticeError> {
        Err(NoticeError::Transport("smtp relay offline".to_string()))
    }
}

enum Competitor {
    Record(Box<dyn FnOnce(&mut ApplicationRecord) + Send>),
    Edit(RecordEdit),
}

/// Store that lets a competing writer commit just before the next application update,
/// reproducing a lost compare-and-swap deterministically.
#[derive(Default)]
pub(super) struct RacingStore {
    pub(super) inner: InMemoryComplianceStore,
    competitor: Mutex<Option<Competitor>>,
}

impl RacingStore {
    pub(super) fn race_next_update(&self, competitor: impl FnOnce(&mut ApplicationRecord) + Send + 'static) {
        *self.competitor.lock().expect("competitor mutex poisoned") =
            Some(Competitor::Record(Box::new(competitor)));
    }

    /// Commit `edit` against the application just before the next application write.
    pub(super) fn race_next_edit(&self, edit: RecordEdit) {
        *self.competitor.lock().expect("competitor mutex poisoned") = Some(Competitor::Edit(edit));
    }
}

impl RacingStore {
    fn run_competitor(&self, application_id: &ApplicationId) -> Result<(), StoreError> {
        let competitor = self
            .competitor
            .lock()
            .expect("competitor mutex poisoned")
            .take();
        let Some(competitor) = competitor else {
            return Ok(());
        };
        let mut current = self
            .inner
            .fetch_application(application_id)?
            .expect("raced application exists");
        let version = current.version;
        match competitor {
            Competitor::Record(mutate) => {
                mutate(&mut current);
                self.inner.update_application(current, version)?;
            }
            Competitor::Edit(edit) => {
                self.inner.commit_edit(current, version, edit)?;
            }
        }
        Ok(())
    }
}

impl ComplianceStore for RacingStore {
    fn insert_institution(&self, institution: Institution) -> Result<Institution, StoreError> {
        self.inner.insert_institution(institution)
    }

    fn fetch_institution(&self, id: &InstitutionId) -> Result<Option<Institution>, StoreError> {
        self.inner.fetch_institution(id)
    }

    fn list_institutions(&self) -> Result<Vec<Institution>, StoreError> {
        self.inner.list_institutions()
    }

    fn set_institution_status(
        &self,
        id: &InstitutionId,
        status: InstitutionStatus,
    ) -> Result<Institution, StoreError> {
        self.inner.set_institution_status(id, status)
    }

    fn upsert_template(&self, template: ParameterTemplate) -> Result<(), StoreError> {
        self.inner.upsert_template(template)
    }

    fn templates(&self) -> Result<Vec<ParameterTemplate>, StoreError> {
        self.inner.templates()
    }

    fn parameters(&self, institution: &InstitutionId) -> Result<Vec<ParameterInstance>, StoreError> {
        self.inner.parameters(institution)
    }

    fn apply_compliance(
        &self,
        institution: &InstitutionId,
        revision: u64,
        flags: &[(TemplateId, ComplianceFlag)],
    ) -> Result<bool, StoreError> {
        self.inner.apply_compliance(institution, revision, flags)
    }

    fn fetch_document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        self.inner.fetch_document(id)
    }

    fn documents(&self, institution: &InstitutionId) -> Result<Vec<Document>, StoreError> {
        self.inner.documents(institution)
    }

    fn snapshot(&self, institution: &InstitutionId) -> Result<ComplianceSnapshot, StoreError> {
        self.inner.snapshot(institution)
    }

    fn insert_application(&self, record: ApplicationRecord) -> Result<ApplicationRecord, StoreError> {
        self.inner.insert_application(record)
    }

    fn fetch_application(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        self.inner.fetch_application(id)
    }

    fn update_application(
        &self,
        record: ApplicationRecord,
        expected_version: u64,
    ) -> Result<ApplicationRecord, StoreError> {
        self.run_competitor(&record.id)?;
        self.inner.update_application(record, expected_version)
    }

    fn commit_edit(
        &self,
        record: ApplicationRecord,
        expected_version: u64,
        edit: RecordEdit,
    ) -> Result<ApplicationRecord, StoreError> {
        self.run_competitor(&record.id)?;
        self.inner.commit_edit(record, expected_version, edit)
    }

    fn applications(&self) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.inner.applications()
    }

    fn applications_for(
        &self,
        institution: &InstitutionId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.inner.applications_for(institution)
    }

    fn application_for_query(&self, query: &QueryId) -> Result<Option<ApplicationId>, StoreError> {
        self.inner.application_for_query(query)
    }
}

pub(super) fn build_racing_service() -> (
    AccreditationService<RacingStore, InMemoryNoticePublisher>,
    Arc<RacingStore>,
) {
    let store = Arc::new(RacingStore::default());
    let service = AccreditationService::new(
        store.clone(),
        Arc::new(InMemoryNoticePublisher::default()),
        WorkflowConfig::default(),
    );
    service
        .install_templates(templates())
        .expect("templates install");
    (service, store)
}
