use accredit::config::AppConfig;
use accredit::error::AppError;
use accredit::workflows::access::{
    AccessAuthority, InMemoryKeyStore, IssuedKey, KeyHasher, KeyRequest, Role,
};
use accredit::workflows::accreditation::domain::ParameterTemplate;
use accredit::workflows::accreditation::{
    AccreditationApi, AccreditationService, InMemoryComplianceStore, InMemoryNoticePublisher,
    RepositoryCatalog, TemplateCatalog, WorkflowConfig,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type PlatformApi =
    AccreditationApi<InMemoryComplianceStore, InMemoryNoticePublisher, InMemoryKeyStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Wire the in-memory stores behind the service, catalog, and key authority.
pub(crate) fn build_platform(
    workflow: WorkflowConfig,
    key_pepper: &str,
    templates: Vec<ParameterTemplate>,
) -> Result<Arc<PlatformApi>, AppError> {
    let store = Arc::new(InMemoryComplianceStore::default());
    let notices = Arc::new(InMemoryNoticePublisher::default());
    let service = AccreditationService::new(store.clone(), notices, workflow);
    service.install_templates(templates)?;

    let authority = AccessAuthority::new(
        Arc::new(InMemoryKeyStore::default()),
        KeyHasher::new(key_pepper),
    );
    Ok(Arc::new(AccreditationApi::new(
        service,
        RepositoryCatalog::new(store),
        authority,
    )))
}

pub(crate) fn platform_from_config(config: &AppConfig) -> Result<Arc<PlatformApi>, AppError> {
    let templates = load_templates(config.templates_csv.as_deref())?;
    build_platform(
        config.workflow.clone(),
        &config.access.key_pepper,
        templates,
    )
}

pub(crate) fn load_templates(path: Option<&Path>) -> Result<Vec<ParameterTemplate>, AppError> {
    match path {
        Some(path) => {
            let templates = TemplateCatalog::from_path(path)?;
            info!(path = %path.display(), count = templates.len(), "loaded template catalog");
            Ok(templates)
        }
        None => Ok(TemplateCatalog::standard()),
    }
}

/// Issue the super-admin key operators use to mint every other key.
pub(crate) fn issue_bootstrap_key(api: &PlatformApi, service: &str) -> Result<IssuedKey, AppError> {
    let issued = api
        .authority
        .generate(KeyRequest::new(service, Role::SuperAdmin))?;
    Ok(issued)
}
