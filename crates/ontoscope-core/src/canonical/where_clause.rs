use super::{CanonicalCache, Canonicalizer};
use crate::model::WhereClause;

/// Canonicalizes where-clauses.
///
/// Normal form: shorthand equality is already explicit after parsing,
/// nested `$and`/`$or` groups are flattened, single-child groups are
/// unwrapped, empty groups become `{}`, double negation is removed, and
/// group children are sorted by fingerprint and deduplicated.
#[derive(Default)]
pub struct WhereClauseCanonicalizer {
    cache: CanonicalCache<WhereClause, WhereClause>,
}

impl WhereClauseCanonicalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Canonicalizer for WhereClauseCanonicalizer {
    type Input = WhereClause;
    type Output = WhereClause;

    fn cache(&self) -> &CanonicalCache<WhereClause, WhereClause> {
        &self.cache
    }

    fn normalize(&self, input: &WhereClause) -> WhereClause {
        normalize(input)
    }

    fn fingerprint(&self, normalized: &WhereClause) -> String {
        fingerprint(normalized)
    }
}

/// serde_json maps are key-sorted, so the rendered JSON is already a
/// deterministic fingerprint.
pub(crate) fn fingerprint(clause: &WhereClause) -> String {
    clause.to_json().to_string()
}

fn normalize(clause: &WhereClause) -> WhereClause {
    match clause {
        WhereClause::Filter(_) => clause.clone(),
        WhereClause::Not(inner) => match normalize(inner) {
            WhereClause::Not(double) => *double,
            other => WhereClause::not(other),
        },
        WhereClause::And(children) => normalize_group(children, true),
        WhereClause::Or(children) => normalize_group(children, false),
    }
}

fn normalize_group(children: &[WhereClause], is_and: bool) -> WhereClause {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match normalize(child) {
            WhereClause::And(grand) if is_and => flat.extend(grand),
            WhereClause::Or(grand) if !is_and => flat.extend(grand),
            other => flat.push(other),
        }
    }

    let mut keyed: Vec<(String, WhereClause)> =
        flat.into_iter().map(|c| (fingerprint(&c), c)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);

    let mut flat: Vec<WhereClause> = keyed.into_iter().map(|(_, c)| c).collect();
    match flat.len() {
        0 => WhereClause::all(),
        1 => flat.remove(0),
        _ if is_and => WhereClause::And(flat),
        _ => WhereClause::Or(flat),
    }
}
