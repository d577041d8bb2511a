use tracing::debug;

use crate::model::{DiffResult, ItemRecord, KnownIds};

/// Classify `incoming` against the site's known set.
///
/// An item is new when its id was not known at the start of the call. The
/// returned set is `known ∪ ids(incoming)`, so re-running with it reports
/// nothing twice.
pub fn diff<I>(site_id: &str, incoming: I, known: &KnownIds) -> (DiffResult, KnownIds)
where
    I: IntoIterator<Item = ItemRecord>,
{
    let mut updated = known.clone();
    let mut result = DiffResult::default();

    for item in incoming {
        // insert() is false for ids already known or seen earlier in this batch
        if updated.insert(item.id.clone()) {
            result.new_items.push(item);
        } else {
            result.unchanged_count += 1;
        }
    }

    debug!(
        site = site_id,
        new = result.new_items.len(),
        unchanged = result.unchanged_count,
        known_before = known.len(),
        known_after = updated.len(),
        "diff complete"
    );
    (result, updated)
}
