use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::domain::{
    ApplicationId, ApplicationRecord, ComplianceFlag, Document, DocumentId, Institution,
    InstitutionId, InstitutionStatus, ParameterInstance, ParameterTemplate, QueryId, TemplateId,
};
use super::evaluation::ComplianceSnapshot;
use super::store::{
    ComplianceStore, LifecycleNotice, NoticeError, NoticePublisher, RecordEdit, StoreError,
};

#[derive(Default)]
struct StoreState {
    institutions: BTreeMap<InstitutionId, Institution>,
    templates: BTreeMap<TemplateId, ParameterTemplate>,
    parameters: HashMap<InstitutionId, BTreeMap<TemplateId, ParameterInstance>>,
    revisions: HashMap<InstitutionId, u64>,
    documents: BTreeMap<DocumentId, Document>,
    applications: BTreeMap<ApplicationId, ApplicationRecord>,
}

/// Process-local store backing the service binary, demos, and tests.
#[derive(Default, Clone)]
pub struct InMemoryComplianceStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryComplianceStore {
    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

impl ComplianceStore for InMemoryComplianceStore {
    fn insert_institution(&self, institution: Institution) -> Result<Institution, StoreError> {
        let mut guard = self.write()?;
        if guard.institutions.contains_key(&institution.id) {
            return Err(StoreError::Conflict);
        }
        guard
            .institutions
            .insert(institution.id.clone(), institution.clone());
        Ok(institution)
    }

    fn fetch_institution(&self, id: &InstitutionId) -> Result<Option<Institution>, StoreError> {
        Ok(self.read()?.institutions.get(id).cloned())
    }

    fn list_institutions(&self) -> Result<Vec<Institution>, StoreError> {
        Ok(self.read()?.institutions.values().cloned().collect())
    }

    fn set_institution_status(
        &self,
        id: &InstitutionId,
        status: InstitutionStatus,
    ) -> Result<Institution, StoreError> {
        let mut guard = self.write()?;
        let institution = guard.institutions.get_mut(id).ok_or(StoreError::NotFound)?;
        institution.status = status;
        Ok(institution.clone())
    }

    fn upsert_template(&self, template: ParameterTemplate) -> Result<(), StoreError> {
        self.write()?.templates.insert(template.id.clone(), template);
        Ok(())
    }

    fn templates(&self) -> Result<Vec<ParameterTemplate>, StoreError> {
        Ok(self.read()?.templates.values().cloned().collect())
    }

    fn parameters(&self, institution: &InstitutionId) -> Result<Vec<ParameterInstance>, StoreError> {
        Ok(self
            .read()?
            .parameters
            .get(institution)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default())
    }

    fn apply_compliance(
        &self,
        institution: &InstitutionId,
        revision: u64,
        flags: &[(TemplateId, ComplianceFlag)],
    ) -> Result<bool, StoreError> {
        let mut guard = self.write()?;
        let current = guard.revisions.get(institution).copied().unwrap_or(0);
        if current != revision {
            return Ok(false);
        }
        if let Some(instances) = guard.parameters.get_mut(institution) {
            for (template_id, flag) in flags {
                if let Some(instance) = instances.get_mut(template_id) {
                    instance.compliance = *flag;
                }
            }
        }
        Ok(true)
    }

    fn fetch_document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    fn documents(&self, institution: &InstitutionId) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .read()?
            .documents
            .values()
            .filter(|document| &document.institution_id == institution)
            .cloned()
            .collect())
    }

    fn snapshot(&self, institution: &InstitutionId) -> Result<ComplianceSnapshot, StoreError> {
        let guard = self.read()?;
        Ok(ComplianceSnapshot {
            institution_id: institution.clone(),
            revision: guard.revisions.get(institution).copied().unwrap_or(0),
            templates: guard.templates.values().cloned().collect(),
            instances: guard
                .parameters
                .get(institution)
                .map(|instances| instances.values().cloned().collect())
                .unwrap_or_default(),
            documents: guard
                .documents
                .values()
                .filter(|document| &document.institution_id == institution)
                .cloned()
                .collect(),
        })
    }

    fn insert_application(&self, record: ApplicationRecord) -> Result<ApplicationRecord, StoreError> {
        let mut guard = self.write()?;
        if guard.applications.contains_key(&record.id) {
            return Err(StoreError::Conflict);
        }
        let actionable_exists = guard.applications.values().any(|existing| {
            existing.institution_id == record.institution_id && existing.status.is_actionable()
        });
        if actionable_exists {
            return Err(StoreError::Conflict);
        }
        guard.applications.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch_application(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.read()?.applications.get(id).cloned())
    }

    fn update_application(
        &self,
        mut record: ApplicationRecord,
        expected_version: u64,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut guard = self.write()?;
        let stored = guard
            .applications
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: stored.version,
            });
        }
        record.version = expected_version + 1;
        *stored = record.clone();
        Ok(record)
    }

    fn commit_edit(
        &self,
        mut record: ApplicationRecord,
        expected_version: u64,
        edit: RecordEdit,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let stored = state
            .applications
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: stored.version,
            });
        }
        match &edit {
            RecordEdit::NewDocument(document) if state.documents.contains_key(&document.id) => {
                return Err(StoreError::Conflict);
            }
            RecordEdit::Document(document) if !state.documents.contains_key(&document.id) => {
                return Err(StoreError::NotFound);
            }
            _ => {}
        }

        match edit {
            RecordEdit::Parameter(instance) => {
                let institution = instance.institution_id.clone();
                state
                    .parameters
                    .entry(institution.clone())
                    .or_default()
                    .insert(instance.template_id.clone(), instance);
                *state.revisions.entry(institution).or_insert(0) += 1;
            }
            RecordEdit::NewDocument(document) | RecordEdit::Document(document) => {
                state.documents.insert(document.id.clone(), document);
            }
        }
        record.version = expected_version + 1;
        *stored = record.clone();
        Ok(record)
    }

    fn applications(&self) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self.read()?.applications.values().cloned().collect())
    }

    fn applications_for(
        &self,
        institution: &InstitutionId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        let mut records: Vec<ApplicationRecord> = self
            .read()?
            .applications
            .values()
            .filter(|record| &record.institution_id == institution)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    fn application_for_query(&self, query: &QueryId) -> Result<Option<ApplicationId>, StoreError> {
        Ok(self
            .read()?
            .applications
            .values()
            .find(|record| record.queries.iter().any(|q| &q.id == query))
            .map(|record| record.id.clone()))
    }
}

/// Notice sink that keeps everything in memory for inspection.
#[derive(Default, Clone)]
pub struct InMemoryNoticePublisher {
    events: Arc<Mutex<Vec<LifecycleNotice>>>,
}

impl InMemoryNoticePublisher {
    pub fn events(&self) -> Vec<LifecycleNotice> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl NoticePublisher for InMemoryNoticePublisher {
    fn publish(&self, notice: LifecycleNotice) -> Result<(), NoticeError> {
        self.events
            .lock()
            .map_err(|_| NoticeError::Transport("notice mutex poisoned".to_string()))?
            .push(notice);
        Ok(())
    }
}
