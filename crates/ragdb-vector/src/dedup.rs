use std::collections::HashMap;

use ragdb_core::types::SearchHit;

/// Keeps at most `keep_per_document` best hits per `document_id`.
///
/// Groups appear in order of first occurrence; within a group hits are sorted
/// by similarity descending with ties kept in input order. Callers usually
/// re-sort and truncate the flattened result.
pub fn dedupe_by_document(hits: Vec<SearchHit>, keep_per_document: usize) -> Vec<SearchHit> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<SearchHit>> = HashMap::new();
    for hit in hits {
        let key = hit.document_id.clone();
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(hit);
    }

    let mut out = Vec::new();
    for key in order {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        group.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        group.truncate(keep_per_document);
        out.extend(group);
    }
    out
}
