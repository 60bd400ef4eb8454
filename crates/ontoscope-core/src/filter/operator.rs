use strum::{AsRefStr, Display, EnumString};

/// Property filter operators understood by where-clauses.
///
/// Only a subset can be decided locally; the rest depend on server-side
/// search or geo indexes and are reported as "unknown" to the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
pub enum FilterOperator {
    #[strum(serialize = "$eq")]
    Eq,
    #[strum(serialize = "$ne")]
    Ne,
    #[strum(serialize = "$gt")]
    Gt,
    #[strum(serialize = "$gte")]
    Gte,
    #[strum(serialize = "$lt")]
    Lt,
    #[strum(serialize = "$lte")]
    Lte,
    #[strum(serialize = "$in")]
    In,
    #[strum(serialize = "$isNull")]
    IsNull,
    #[strum(serialize = "$startsWith")]
    StartsWith,
    #[strum(serialize = "$contains")]
    Contains,
    #[strum(serialize = "$containsAnyTerm")]
    ContainsAnyTerm,
    #[strum(serialize = "$containsAllTerms")]
    ContainsAllTerms,
    #[strum(serialize = "$containsAllTermsInOrder")]
    ContainsAllTermsInOrder,
    #[strum(serialize = "$intersects")]
    Intersects,
    #[strum(serialize = "$within")]
    Within,
}

impl FilterOperator {
    /// Whether the operator can be decided from cached property values.
    pub fn is_local(self) -> bool {
        match self {
            Self::Eq
            | Self::Ne
            | Self::Gt
            | Self::Gte
            | Self::Lt
            | Self::Lte
            | Self::In
            | Self::IsNull
            | Self::StartsWith => true,
            Self::Contains
            | Self::ContainsAnyTerm
            | Self::ContainsAllTerms
            | Self::ContainsAllTermsInOrder
            | Self::Intersects
            | Self::Within => false,
        }
    }
}
