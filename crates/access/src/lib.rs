use marlo_contracts::Role;

/// Which observation groups a role may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupScope {
    All,
    Group(&'static str),
}

impl GroupScope {
    pub fn allows(&self, group: &str) -> bool {
        match self {
            GroupScope::All => true,
            GroupScope::Group(name) => *name == group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    UnrecognizedRole,
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessError::UnrecognizedRole => write!(f, "role is not recognized"),
        }
    }
}

impl std::error::Error for AccessError {}

/// Closed role-to-scope table. Adding a role is a new row here, nothing else.
const ROLE_SCOPES: [(Role, GroupScope); 3] = [
    (Role::Admin, GroupScope::All),
    (Role::Bulk, GroupScope::Group("bulk")),
    (Role::Tanker, GroupScope::Group("tanker")),
];

/// Maps a role to its visible group scope; roles without a table entry are
/// rejected.
pub fn visible_groups(role: Role) -> Result<GroupScope, AccessError> {
    ROLE_SCOPES
        .iter()
        .find(|(candidate, _)| *candidate == role)
        .map(|(_, scope)| *scope)
        .ok_or(AccessError::UnrecognizedRole)
}
