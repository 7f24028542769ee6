use srrm_core::TimeKeyed;
use std::collections::BTreeMap;

/// Picks one current record per entity: order by entity ascending then
/// timestamp descending (stable), keep the first per entity. Records sharing
/// the maximum timestamp resolve to whichever came first in the input.
pub fn resolve_latest<T>(records: &[T]) -> BTreeMap<String, T>
where
    T: TimeKeyed + Clone,
{
    let mut ordered = records.iter().collect::<Vec<&T>>();
    ordered.sort_by(|a, b| {
        a.entity_id()
            .cmp(b.entity_id())
            .then_with(|| b.observed_at().cmp(&a.observed_at()))
    });

    let mut latest = BTreeMap::new();
    for record in ordered {
        if !latest.contains_key(record.entity_id()) {
            latest.insert(record.entity_id().to_string(), record.clone());
        }
    }
    latest
}
