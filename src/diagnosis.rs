use crate::catalog::{DiseaseCatalog, SignatureTable};

/// One signature found inside a patient's sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub disease_id: String,
    pub pattern: String,
}

/// Returns every signature contained in `cleaned`, most severe disease first.
///
/// The sort is stable, so matches with equal severity keep the signature
/// table's load order. Several matches for the same disease are all kept.
pub fn detect(
    cleaned: &str,
    signatures: &SignatureTable,
    diseases: &DiseaseCatalog,
) -> Vec<Detection> {
    if cleaned.is_empty() || signatures.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<Detection> = signatures
        .iter()
        .filter(|sig| cleaned.contains(sig.pattern.as_str()))
        .map(|sig| Detection {
            disease_id: sig.disease_id.clone(),
            pattern: sig.pattern.clone(),
        })
        .collect();

    hits.sort_by_key(|hit| std::cmp::Reverse(diseases.severity_of(&hit.disease_id)));

    hits
}

/// Keeps only the first (highest ranked) match per disease.
pub fn dedupe_by_disease(hits: Vec<Detection>) -> Vec<Detection> {
    let mut seen = std::collections::HashSet::new();

    hits.into_iter()
        .filter(|hit| seen.insert(hit.disease_id.clone()))
        .collect()
}
