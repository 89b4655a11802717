use super::common::*;

use chrono::Utc;

use crate::workflows::accreditation::domain::{QueryAudience, QueryId, TemplateId};
use crate::workflows::accreditation::lifecycle::{ApplicationStatus, UnmetCondition};
use crate::workflows::accreditation::queries;
use crate::workflows::accreditation::store::{ComplianceStore, RecordEdit, StoreError};
use crate::workflows::accreditation::AccreditationError;

#[test]
fn losing_an_identical_transition_is_idempotent() {
    let (service, store) = build_racing_service();
    let (_, application) = ready_institution(&service, "Race College");
    store.race_next_update(|record| {
        queries::stamp(record, ApplicationStatus::Submitted, &college(), Utc::now());
    });

    let submitted = service
        .submit_application(&application.id, &college())
        .expect("lost race resolves to the applied transition");

    assert_eq!(submitted.status, ApplicationStatus::Submitted);
    let submissions = submitted
        .history
        .iter()
        .filter(|stamp| stamp.to == ApplicationStatus::Submitted)
        .count();
    assert_eq!(submissions, 1);
}

#[test]
fn losing_to_a_different_transition_conflicts() {
    let (service, store) = build_racing_service();
    let (_, application) = ready_institution(&service, "Conflict College");
    service
        .submit_application(&application.id, &college())
        .expect("submission succeeds");
    service
        .begin_review(&application.id, &reviewer())
        .expect("review starts");
    store.race_next_update(|record| {
        queries::raise(
            record,
            QueryId::from("qry-race"),
            &reviewer(),
            QueryAudience::Institution,
            "Explain the faculty ratio",
            Utc::now(),
        )
        .expect("competitor raises query");
    });

    match service.run_analysis(&application.id, &reviewer()) {
        Err(AccreditationError::ConcurrentTransitionConflict { application_id }) => {
            assert_eq!(application_id, application.id)
        }
        other => panic!("expected concurrent transition conflict, got {other:?}"),
    }

    let stored = service
        .application_status(&application.id)
        .expect("application present");
    assert_eq!(stored.status, ApplicationStatus::QueriesPending);
    assert!(stored.analysis.is_none());
}

#[test]
fn concurrent_queries_are_both_kept() {
    let (service, store) = build_racing_service();
    let (_, application) = ready_institution(&service, "Busy College");
    service
        .submit_application(&application.id, &college())
        .expect("submission succeeds");
    store.race_next_update(|record| {
        queries::raise(
            record,
            QueryId::from("qry-race"),
            &reviewer(),
            QueryAudience::Institution,
            "Upload the library register",
            Utc::now(),
        )
        .expect("competitor raises query");
    });

    let query = service
        .raise_query(
            &application.id,
            QueryAudience::Institution,
            "Upload the hostel plan",
            &reviewer(),
        )
        .expect("query raised after retry");

    let stored = service
        .application_status(&application.id)
        .expect("application present");
    assert_eq!(stored.status, ApplicationStatus::QueriesPending);
    assert_eq!(stored.open_queries(), 2);
    assert!(stored.query(&query.id).is_some());
    assert!(stored.query(&QueryId::from("qry-race")).is_some());
}

#[test]
fn edits_racing_a_submission_are_rejected() {
    let (service, store) = build_racing_service();
    let (institution, application) = ready_institution(&service, "Late Edit College");
    store.race_next_update(|record| {
        queries::stamp(record, ApplicationStatus::Submitted, &college(), Utc::now());
    });

    let result = service.declare_parameter(
        &institution.id,
        declaration(LAND_AREA, "1 Acre"),
        &college(),
    );

    match result {
        Err(AccreditationError::StateGuard(violation)) => assert!(matches!(
            violation.unmet.as_slice(),
            [UnmetCondition::IllegalTransition {
                from: ApplicationStatus::Submitted,
                ..
            }]
        )),
        other => panic!("expected guard violation, got {other:?}"),
    }
    let land = store
        .parameters(&institution.id)
        .expect("parameters readable")
        .into_iter()
        .find(|instance| instance.template_id == TemplateId::from(LAND_AREA))
        .and_then(|instance| instance.value);
    assert_eq!(land.as_deref(), Some("3 Acres"));
    assert_eq!(
        service
            .application_status(&application.id)
            .expect("application present")
            .status,
        ApplicationStatus::Submitted
    );
}

#[test]
fn clearing_a_declaration_after_submission_is_rejected() {
    let (service, store) = build_racing_service();
    let (institution, application) = ready_institution(&service, "Blank Field College");
    store.race_next_update(|record| {
        queries::stamp(record, ApplicationStatus::Submitted, &college(), Utc::now());
    });

    let mut cleared = declaration(LAND_AREA, "");
    cleared.value = None;
    assert!(service
        .declare_parameter(&institution.id, cleared, &college())
        .is_err());

    let stored = service
        .application_status(&application.id)
        .expect("application present");
    assert_eq!(stored.status, ApplicationStatus::Submitted);
    let land = store
        .parameters(&institution.id)
        .expect("parameters readable")
        .into_iter()
        .find(|instance| instance.template_id == TemplateId::from(LAND_AREA))
        .and_then(|instance| instance.value);
    assert_eq!(land.as_deref(), Some("3 Acres"));
}

#[test]
fn submission_racing_a_cleared_declaration_conflicts() {
    let (service, store) = build_racing_service();
    let (institution, application) = ready_institution(&service, "Withdrawn Value College");
    let mut cleared = instance(institution.id.as_str(), LAND_AREA, "");
    cleared.value = None;
    store.race_next_edit(RecordEdit::Parameter(cleared));

    match service.submit_application(&application.id, &college()) {
        Err(AccreditationError::ConcurrentTransitionConflict { application_id }) => {
            assert_eq!(application_id, application.id)
        }
        other => panic!("expected concurrent transition conflict, got {other:?}"),
    }
    let stored = service
        .application_status(&application.id)
        .expect("application present");
    assert_eq!(stored.status, ApplicationStatus::DocumentsInProgress);

    match service.submit_application(&application.id, &college()) {
        Err(AccreditationError::StateGuard(violation)) => assert_eq!(
            violation.unmet,
            vec![UnmetCondition::MissingParameter {
                template_id: TemplateId::from(LAND_AREA),
                name: "Land Area".to_string(),
            }]
        ),
        other => panic!("expected missing parameter, got {other:?}"),
    }
}

#[test]
fn stale_edits_write_nothing() {
    let (service, store, _) = build_service();
    let (institution, application) = open_institution(&service, "Stale Write College");
    service
        .declare_parameter(&institution.id, declaration(LAND_AREA, "3 Acres"), &college())
        .expect("declaration succeeds");
    let before = store.snapshot(&institution.id).expect("snapshot readable");

    let result = store.commit_edit(
        application.clone(),
        application.version,
        RecordEdit::Parameter(instance(institution.id.as_str(), LAND_AREA, "1 Acre")),
    );

    assert_eq!(
        result,
        Err(StoreError::VersionConflict {
            expected: application.version,
            found: application.version + 1,
        })
    );
    let after = store.snapshot(&institution.id).expect("snapshot readable");
    assert_eq!(after.revision, before.revision);
    assert_eq!(after.instances, before.instances);
}
