//! Accreditation workflow: parameter templates, compliance evaluation, the application
//! lifecycle, reviewer queries, and the key-mediated repository reads.

pub mod catalog;
pub mod domain;
pub mod evaluation;
pub mod lifecycle;
pub mod memory;
pub(crate) mod queries;
pub mod router;
pub mod service;
pub mod store;
pub mod templates;

#[cfg(test)]
mod tests;

pub use catalog::RepositoryCatalog;
pub use domain::{
    Actor, ApplicationId, ApplicationRecord, DocumentId, Institution, InstitutionId, QueryId,
    TemplateId,
};
pub use memory::{InMemoryComplianceStore, InMemoryNoticePublisher};
pub use router::{accreditation_router, AccreditationApi, API_KEY_HEADER};
pub use service::{AccreditationError, AccreditationService, WorkflowConfig};
pub use templates::{TemplateCatalog, TemplateImportError};
