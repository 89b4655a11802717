//! Application lifecycle: states, the transition table, and guard failures.
//!
//! The table in [`next_status`] is the only place that knows which status follows which
//! event. Callers compute the candidate status, evaluate guards, and commit both together;
//! a `None` from the table is reported as a guard violation rather than silently ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::domain::{Decision, DocumentCategory, TemplateId};

/// Regulatory status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    ParametersInProgress,
    DocumentsInProgress,
    Submitted,
    UnderReview,
    QueriesPending,
    DecisionPending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 9] = [
        ApplicationStatus::Draft,
        ApplicationStatus::ParametersInProgress,
        ApplicationStatus::DocumentsInProgress,
        ApplicationStatus::Submitted,
        ApplicationStatus::UnderReview,
        ApplicationStatus::QueriesPending,
        ApplicationStatus::DecisionPending,
        ApplicationStatus::Approved,
        ApplicationStatus::Rejected,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::ParametersInProgress => "parameters_in_progress",
            ApplicationStatus::DocumentsInProgress => "documents_in_progress",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::QueriesPending => "queries_pending",
            ApplicationStatus::DecisionPending => "decision_pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ApplicationStatus::Approved | ApplicationStatus::Rejected)
    }

    /// Non-terminal applications block a second application for the same institution.
    pub const fn is_actionable(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses in which the institution may still change declared parameters.
    pub const fn accepts_parameter_edits(self) -> bool {
        next_status(self, LifecycleEvent::DeclareParameter).is_some()
    }

    pub const fn accepts_documents(self) -> bool {
        next_status(self, LifecycleEvent::UploadDocument).is_some()
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Commands that may move an application between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    DeclareParameter,
    UploadDocument,
    Submit,
    BeginReview,
    RaiseQuery,
    QueriesResolved,
    RunAnalysis,
    Decide(Decision),
}

impl LifecycleEvent {
    pub const fn label(self) -> &'static str {
        match self {
            LifecycleEvent::DeclareParameter => "declare_parameter",
            LifecycleEvent::UploadDocument => "upload_document",
            LifecycleEvent::Submit => "submit",
            LifecycleEvent::BeginReview => "begin_review",
            LifecycleEvent::RaiseQuery => "raise_query",
            LifecycleEvent::QueriesResolved => "queries_resolved",
            LifecycleEvent::RunAnalysis => "run_analysis",
            LifecycleEvent::Decide(Decision::Approve) => "approve",
            LifecycleEvent::Decide(Decision::Reject) => "reject",
        }
    }
}

/// Transition table. `None` means the event is illegal from `from`.
pub const fn next_status(from: ApplicationStatus, event: LifecycleEvent) -> Option<ApplicationStatus> {
    use ApplicationStatus as S;
    use LifecycleEvent as E;

    match (from, event) {
        (S::Draft | S::ParametersInProgress, E::DeclareParameter) => Some(S::ParametersInProgress),
        (S::DocumentsInProgress, E::DeclareParameter) => Some(S::DocumentsInProgress),
        (S::QueriesPending, E::DeclareParameter) => Some(S::QueriesPending),

        (S::Draft | S::ParametersInProgress, E::UploadDocument) => Some(S::DocumentsInProgress),
        (S::DocumentsInProgress, E::UploadDocument) => Some(S::DocumentsInProgress),
        (S::UnderReview, E::UploadDocument) => Some(S::UnderReview),
        (S::QueriesPending, E::UploadDocument) => Some(S::QueriesPending),

        (S::Draft | S::ParametersInProgress | S::DocumentsInProgress, E::Submit) => {
            Some(S::Submitted)
        }
        (S::Submitted, E::BeginReview) => Some(S::UnderReview),
        (S::UnderReview | S::QueriesPending, E::RaiseQuery) => Some(S::QueriesPending),
        (S::QueriesPending, E::QueriesResolved) => Some(S::UnderReview),
        (S::UnderReview, E::RunAnalysis) => Some(S::DecisionPending),
        (S::DecisionPending, E::Decide(Decision::Approve)) => Some(S::Approved),
        (S::DecisionPending, E::Decide(Decision::Reject)) => Some(S::Rejected),
        _ => None,
    }
}

/// Resolve the event against the table, mapping illegal moves onto a guard violation.
pub fn transition(
    from: ApplicationStatus,
    event: LifecycleEvent,
) -> Result<ApplicationStatus, GuardViolation> {
    next_status(from, event).ok_or_else(|| {
        GuardViolation::single(UnmetCondition::IllegalTransition {
            from,
            event: event.label(),
        })
    })
}

/// A single precondition that blocked a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum UnmetCondition {
    IllegalTransition {
        from: ApplicationStatus,
        event: &'static str,
    },
    MissingParameter {
        template_id: TemplateId,
        name: String,
    },
    MissingMandatoryDocument {
        category: DocumentCategory,
        title: Option<String>,
    },
    OpenQueries {
        count: usize,
    },
    TerminalApplication {
        status: ApplicationStatus,
    },
    NoOpenApplication,
    ActiveApplicationExists {
        status: ApplicationStatus,
    },
    InstitutionArchived,
    QueryAlreadyReplied,
}

impl fmt::Display for UnmetCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmetCondition::IllegalTransition { from, event } => {
                write!(f, "cannot {event} while application is {from}")
            }
            UnmetCondition::MissingParameter { name, .. } => {
                write!(f, "parameter '{name}' has no declared value")
            }
            UnmetCondition::MissingMandatoryDocument { title: Some(title), .. } => {
                write!(f, "mandatory document '{title}' not uploaded")
            }
            UnmetCondition::MissingMandatoryDocument { category, title: None } => {
                write!(f, "no {} document uploaded", category.label())
            }
            UnmetCondition::OpenQueries { count } => write!(f, "{count} query(ies) still open"),
            UnmetCondition::TerminalApplication { status } => {
                write!(f, "application is {status} and can no longer change")
            }
            UnmetCondition::NoOpenApplication => write!(f, "institution has no open application"),
            UnmetCondition::ActiveApplicationExists { status } => {
                write!(f, "institution already has an application in {status}")
            }
            UnmetCondition::InstitutionArchived => write!(f, "institution is archived"),
            UnmetCondition::QueryAlreadyReplied => {
                write!(f, "query already has a reply; raise a new query for follow-up")
            }
        }
    }
}

/// Transition rejected because one or more preconditions are unmet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardViolation {
    pub unmet: Vec<UnmetCondition>,
}

impl GuardViolation {
    pub fn single(condition: UnmetCondition) -> Self {
        Self {
            unmet: vec![condition],
        }
    }

    /// `Ok(())` when nothing is unmet, otherwise the collected violation.
    pub fn check(unmet: Vec<UnmetCondition>) -> Result<(), Self> {
        if unmet.is_empty() {
            Ok(())
        } else {
            Err(Self { unmet })
        }
    }
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details: Vec<String> = self.unmet.iter().map(ToString::to_string).collect();
        write!(f, "state guard violation: {}", details.join("; "))
    }
}

impl std::error::Error for GuardViolation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_no_events() {
        let events = [
            LifecycleEvent::DeclareParameter,
            LifecycleEvent::UploadDocument,
            LifecycleEvent::Submit,
            LifecycleEvent::BeginReview,
            LifecycleEvent::RaiseQuery,
            LifecycleEvent::QueriesResolved,
            LifecycleEvent::RunAnalysis,
            LifecycleEvent::Decide(Decision::Approve),
            LifecycleEvent::Decide(Decision::Reject),
        ];
        for status in [ApplicationStatus::Approved, ApplicationStatus::Rejected] {
            for event in events {
                assert_eq!(next_status(status, event), None, "{status} + {event:?}");
            }
        }
    }

    #[test]
    fn happy_path_follows_regulatory_order() {
        let mut status = ApplicationStatus::Draft;
        for event in [
            LifecycleEvent::DeclareParameter,
            LifecycleEvent::UploadDocument,
            LifecycleEvent::Submit,
            LifecycleEvent::BeginReview,
            LifecycleEvent::RaiseQuery,
            LifecycleEvent::QueriesResolved,
            LifecycleEvent::RunAnalysis,
            LifecycleEvent::Decide(Decision::Approve),
        ] {
            status = transition(status, event).expect("legal transition");
        }
        assert_eq!(status, ApplicationStatus::Approved);
    }

    #[test]
    fn analysis_cannot_skip_review() {
        match transition(ApplicationStatus::Submitted, LifecycleEvent::RunAnalysis) {
            Err(violation) => assert_eq!(
                violation.unmet,
                vec![UnmetCondition::IllegalTransition {
                    from: ApplicationStatus::Submitted,
                    event: "run_analysis",
                }]
            ),
            other => panic!("expected guard violation, got {other:?}"),
        }
    }

    #[test]
    fn decision_pending_blocks_institution_edits() {
        assert!(!ApplicationStatus::DecisionPending.accepts_parameter_edits());
        assert!(!ApplicationStatus::DecisionPending.accepts_documents());
        assert!(ApplicationStatus::QueriesPending.accepts_parameter_edits());
        assert!(!ApplicationStatus::UnderReview.accepts_parameter_edits());
        assert!(ApplicationStatus::UnderReview.accepts_documents());
    }

    #[test]
    fn violation_message_lists_every_condition() {
        let violation = GuardViolation {
            unmet: vec![
                UnmetCondition::MissingParameter {
                    template_id: TemplateId("tpl-1".to_string()),
                    name: "Drawing Hall".to_string(),
                },
                UnmetCondition::OpenQueries { count: 2 },
            ],
        };
        let message = violation.to_string();
        assert!(message.contains("Drawing Hall"));
        assert!(message.contains("2 query"));
    }
}
