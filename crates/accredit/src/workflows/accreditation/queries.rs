//! Reviewer query/reply exchange.
//!
//! Queries live inside the application record, so each function here edits one record
//! in memory. The service commits the result with a compare-and-swap on the record
//! version, which keeps the "are all queries resolved" check and the resulting status
//! change on the same version.

use chrono::{DateTime, Utc};

use super::domain::{
    Actor, ApplicationRecord, Query, QueryAudience, QueryId, QueryReply, TransitionStamp,
};
use super::lifecycle::{self, ApplicationStatus, GuardViolation, LifecycleEvent, UnmetCondition};

/// Append a new unresolved query. A submitted application enters review in the same step.
pub(crate) fn raise(
    record: &mut ApplicationRecord,
    id: QueryId,
    actor: &Actor,
    to_role: QueryAudience,
    message: &str,
    at: DateTime<Utc>,
) -> Result<Query, GuardViolation> {
    ensure_open(record)?;
    if record.status == ApplicationStatus::Submitted {
        let reviewing = lifecycle::transition(record.status, LifecycleEvent::BeginReview)?;
        stamp(record, reviewing, actor, at);
    }
    let next = lifecycle::transition(record.status, LifecycleEvent::RaiseQuery)?;

    let query = Query {
        id,
        raised_by: actor.name.clone(),
        to_role,
        message: message.trim().to_string(),
        reply: None,
        is_resolved: false,
        resolved_by: None,
        resolved_at: None,
        raised_at: at,
    };
    record.queries.push(query.clone());
    if next != record.status {
        stamp(record, next, actor, at);
    }
    Ok(query)
}

/// Attach the single permitted reply. Replying does not resolve the query.
pub(crate) fn reply(
    record: &mut ApplicationRecord,
    query_id: &QueryId,
    actor: &Actor,
    text: &str,
    at: DateTime<Utc>,
) -> Result<Option<Query>, GuardViolation> {
    ensure_open(record)?;
    let Some(query) = record.queries.iter_mut().find(|query| &query.id == query_id) else {
        return Ok(None);
    };
    if query.reply.is_some() {
        return Err(GuardViolation::single(UnmetCondition::QueryAlreadyReplied));
    }
    query.reply = Some(QueryReply {
        text: text.trim().to_string(),
        replied_by: actor.name.clone(),
        replied_at: at,
    });
    Ok(Some(query.clone()))
}

/// Outcome of a resolve attempt on an in-memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The query was already resolved; nothing to commit.
    Unchanged,
    /// The query was marked resolved; `reopened_review` is set when it was the last open one.
    Resolved { reopened_review: bool },
    Missing,
}

pub(crate) fn resolve(
    record: &mut ApplicationRecord,
    query_id: &QueryId,
    actor: &Actor,
    at: DateTime<Utc>,
) -> Result<Resolution, GuardViolation> {
    let Some(index) = record.queries.iter().position(|query| &query.id == query_id) else {
        return Ok(Resolution::Missing);
    };
    if record.queries[index].is_resolved {
        return Ok(Resolution::Unchanged);
    }
    ensure_open(record)?;

    let query = &mut record.queries[index];
    query.is_resolved = true;
    query.resolved_by = Some(actor.name.clone());
    query.resolved_at = Some(at);

    let reopened_review =
        record.open_queries() == 0 && record.status == ApplicationStatus::QueriesPending;
    if reopened_review {
        let next = lifecycle::transition(record.status, LifecycleEvent::QueriesResolved)?;
        stamp(record, next, actor, at);
    }
    Ok(Resolution::Resolved { reopened_review })
}

pub(crate) fn stamp(
    record: &mut ApplicationRecord,
    to: ApplicationStatus,
    actor: &Actor,
    at: DateTime<Utc>,
) {
    record.history.push(TransitionStamp {
        from: record.status,
        to,
        actor: actor.name.clone(),
        at,
    });
    record.status = to;
}

fn ensure_open(record: &ApplicationRecord) -> Result<(), GuardViolation> {
    if record.status.is_terminal() {
        return Err(GuardViolation::single(UnmetCondition::TerminalApplication {
            status: record.status,
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::access::Role;
    use crate::workflows::accreditation::domain::{ApplicationId, InstitutionId};

    fn record(status: ApplicationStatus) -> ApplicationRecord {
        ApplicationRecord {
            id: ApplicationId::from("app-q"),
            institution_id: InstitutionId::from("inst-q"),
            status,
            version: 0,
            queries: Vec::new(),
            analysis: None,
            decision: None,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn reviewer() -> Actor {
        Actor::new("aicte-desk", Role::AicteAdmin)
    }

    #[test]
    fn raising_on_submitted_starts_review_then_pends() {
        let mut record = record(ApplicationStatus::Submitted);
        raise(
            &mut record,
            QueryId::from("q-1"),
            &reviewer(),
            QueryAudience::Institution,
            "Upload the fire NOC",
            Utc::now(),
        )
        .expect("query raised");

        assert_eq!(record.status, ApplicationStatus::QueriesPending);
        let path: Vec<ApplicationStatus> = record.history.iter().map(|stamp| stamp.to).collect();
        assert_eq!(
            path,
            vec![ApplicationStatus::UnderReview, ApplicationStatus::QueriesPending]
        );
    }

    #[test]
    fn second_query_keeps_single_stamp() {
        let mut record = record(ApplicationStatus::UnderReview);
        for id in ["q-1", "q-2"] {
            raise(
                &mut record,
                QueryId::from(id),
                &reviewer(),
                QueryAudience::Institution,
                "Clarify",
                Utc::now(),
            )
            .expect("query raised");
        }
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.open_queries(), 2);
    }

    #[test]
    fn raising_is_illegal_before_submission() {
        let mut record = record(ApplicationStatus::Draft);
        let result = raise(
            &mut record,
            QueryId::from("q-1"),
            &reviewer(),
            QueryAudience::Institution,
            "Too early",
            Utc::now(),
        );
        assert!(result.is_err());
        assert!(record.queries.is_empty());
    }

    #[test]
    fn only_the_last_resolution_returns_to_review() {
        let mut record = record(ApplicationStatus::UnderReview);
        for id in ["q-1", "q-2"] {
            raise(
                &mut record,
                QueryId::from(id),
                &reviewer(),
                QueryAudience::Institution,
                "Clarify",
                Utc::now(),
            )
            .expect("query raised");
        }

        let first = resolve(&mut record, &QueryId::from("q-1"), &reviewer(), Utc::now())
            .expect("resolved");
        assert_eq!(first, Resolution::Resolved { reopened_review: false });
        assert_eq!(record.status, ApplicationStatus::QueriesPending);

        let again = resolve(&mut record, &QueryId::from("q-1"), &reviewer(), Utc::now())
            .expect("no-op");
        assert_eq!(again, Resolution::Unchanged);

        let last = resolve(&mut record, &QueryId::from("q-2"), &reviewer(), Utc::now())
            .expect("resolved");
        assert_eq!(last, Resolution::Resolved { reopened_review: true });
        assert_eq!(record.status, ApplicationStatus::UnderReview);
    }

    #[test]
    fn a_replied_query_cannot_be_replied_again() {
        let mut record = record(ApplicationStatus::UnderReview);
        raise(
            &mut record,
            QueryId::from("q-1"),
            &reviewer(),
            QueryAudience::Institution,
            "Clarify",
            Utc::now(),
        )
        .expect("query raised");
        let institution = Actor::new("college", Role::Institution);

        let replied = reply(&mut record, &QueryId::from("q-1"), &institution, "Done", Utc::now())
            .expect("reply accepted")
            .expect("query present");
        assert!(!replied.is_resolved);

        match reply(&mut record, &QueryId::from("q-1"), &institution, "Again", Utc::now()) {
            Err(violation) => assert_eq!(violation.unmet, vec![UnmetCondition::QueryAlreadyReplied]),
            other => panic!("expected guard violation, got {other:?}"),
        }
    }
}
