use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of caller roles an API key can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    AicteAdmin,
    UgcAdmin,
    Institution,
    ExternalService,
    Public,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::SuperAdmin,
        Role::AicteAdmin,
        Role::UgcAdmin,
        Role::Institution,
        Role::ExternalService,
        Role::Public,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::AicteAdmin => "aicte_admin",
            Role::UgcAdmin => "ugc_admin",
            Role::Institution => "institution",
            Role::ExternalService => "external_service",
            Role::Public => "public",
        }
    }

    /// Short tag embedded in raw keys so operators can tell roles apart at a glance.
    pub const fn tag(self) -> &'static str {
        match self {
            Role::SuperAdmin => "sa",
            Role::AicteAdmin => "aicte",
            Role::UgcAdmin => "ugc",
            Role::Institution => "inst",
            Role::ExternalService => "ext",
            Role::Public => "pub",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.tag() == tag)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|role| role.label() == normalized)
    }

    /// Regulator-side roles allowed to review, query, and decide.
    pub const fn is_reviewer(self) -> bool {
        matches!(self, Role::SuperAdmin | Role::AicteAdmin | Role::UgcAdmin)
    }

    /// Keys of this role only ever see the institution they were issued for.
    pub const fn own_data_only(self) -> bool {
        matches!(self, Role::Institution)
    }

    pub const fn capabilities(self) -> &'static [Capability] {
        use Capability as C;
        match self {
            Role::SuperAdmin => &Capability::ALL,
            Role::AicteAdmin | Role::UgcAdmin => &[
                C::ReadInstitutions,
                C::ReadInstitutionDetail,
                C::ReadParameters,
                C::ReadApplications,
                C::ReadAiAnalysis,
                C::ReadDocuments,
                C::QueryByParameters,
                C::BulkQuery,
                C::ReadStatistics,
                C::ReviewApplications,
                C::DecideApplications,
            ],
            Role::Institution => &[
                C::ReadInstitutionDetail,
                C::ReadParameters,
                C::ReadApplications,
                C::ReadAiAnalysis,
                C::ReadDocuments,
                C::ManageSubmission,
            ],
            Role::ExternalService => &[
                C::ReadInstitutions,
                C::ReadInstitutionDetail,
                C::ReadParameters,
                C::ReadApplications,
                C::QueryByParameters,
                C::BulkQuery,
                C::ReadStatistics,
            ],
            Role::Public => &[
                C::ReadInstitutions,
                C::ReadInstitutionDetail,
                C::ReadStatistics,
            ],
        }
    }

    pub fn allows(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn permissions(self) -> Permissions {
        Permissions {
            capabilities: self.capabilities().to_vec(),
            own_data_only: self.own_data_only(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Individual operation a key may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadInstitutions,
    ReadInstitutionDetail,
    ReadParameters,
    ReadApplications,
    ReadAiAnalysis,
    ReadDocuments,
    QueryByParameters,
    BulkQuery,
    ReadStatistics,
    ManageSubmission,
    ReviewApplications,
    DecideApplications,
    ManageInstitutions,
    ManageKeys,
}

impl Capability {
    pub const ALL: [Capability; 14] = [
        Capability::ReadInstitutions,
        Capability::ReadInstitutionDetail,
        Capability::ReadParameters,
        Capability::ReadApplications,
        Capability::ReadAiAnalysis,
        Capability::ReadDocuments,
        Capability::QueryByParameters,
        Capability::BulkQuery,
        Capability::ReadStatistics,
        Capability::ManageSubmission,
        Capability::ReviewApplications,
        Capability::DecideApplications,
        Capability::ManageInstitutions,
        Capability::ManageKeys,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Capability::ReadInstitutions => "read_institutions",
            Capability::ReadInstitutionDetail => "read_institution_detail",
            Capability::ReadParameters => "read_parameters",
            Capability::ReadApplications => "read_applications",
            Capability::ReadAiAnalysis => "read_ai_analysis",
            Capability::ReadDocuments => "read_documents",
            Capability::QueryByParameters => "query_by_parameters",
            Capability::BulkQuery => "bulk_query",
            Capability::ReadStatistics => "read_statistics",
            Capability::ManageSubmission => "manage_submission",
            Capability::ReviewApplications => "review_applications",
            Capability::DecideApplications => "decide_applications",
            Capability::ManageInstitutions => "manage_institutions",
            Capability::ManageKeys => "manage_keys",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Serializable permission summary returned alongside issued and validated keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub capabilities: Vec<Capability>,
    pub own_data_only: bool,
}

impl Permissions {
    pub fn contains(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_admin_holds_every_capability() {
        for capability in Capability::ALL {
            assert!(Role::SuperAdmin.allows(capability), "{capability}");
        }
    }

    #[test]
    fn public_is_limited_to_directory_reads() {
        let allowed: Vec<Capability> = Capability::ALL
            .into_iter()
            .filter(|capability| Role::Public.allows(*capability))
            .collect();
        assert_eq!(
            allowed,
            vec![
                Capability::ReadInstitutions,
                Capability::ReadInstitutionDetail,
                Capability::ReadStatistics,
            ]
        );
    }

    #[test]
    fn external_services_never_see_ai_analysis_or_documents() {
        assert!(!Role::ExternalService.allows(Capability::ReadAiAnalysis));
        assert!(!Role::ExternalService.allows(Capability::ReadDocuments));
        assert!(Role::ExternalService.allows(Capability::BulkQuery));
    }

    #[test]
    fn only_regulators_decide() {
        let deciders: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|role| role.allows(Capability::DecideApplications))
            .collect();
        assert_eq!(
            deciders,
            vec![Role::SuperAdmin, Role::AicteAdmin, Role::UgcAdmin]
        );
        assert!(deciders.iter().all(|role| role.is_reviewer()));
    }

    #[test]
    fn tags_and_labels_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::from_tag(role.tag()), Some(role));
            assert_eq!(Role::parse(role.label()), Some(role));
        }
        assert_eq!(Role::parse("UGC-Admin"), Some(Role::UgcAdmin));
        assert_eq!(Role::parse("root"), None);
    }
}
