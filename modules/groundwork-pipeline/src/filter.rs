use groundwork_store::{AssessedResource, SelectionDecision};

/// Percentile selection over one channel's assessed resources.
///
/// Orders by composite desc, tie-breaking by relevance desc, then earliest
/// discovery, then resource id. Keeps `ceil(percent/100 × total)` resources,
/// at least one when the channel is non-empty and no floor is set. A
/// `min_composite` floor excludes resources below it regardless of the keep
/// count. Returns one decision per candidate.
pub fn select_top_percentile(
    candidates: &[AssessedResource],
    percent: f64,
    min_composite: Option<f64>,
) -> Vec<SelectionDecision> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut ordered: Vec<&AssessedResource> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        b.composite
            .total_cmp(&a.composite)
            .then(b.relevance.total_cmp(&a.relevance))
            .then(a.discovered_at.cmp(&b.discovered_at))
            .then(a.resource_id.cmp(&b.resource_id))
    });

    let total = ordered.len();
    let mut keep = ((percent / 100.0) * total as f64).ceil() as usize;
    keep = keep.min(total);
    // Only a floor may empty a non-empty channel.
    if keep == 0 && min_composite.is_none() {
        keep = 1;
    }

    ordered
        .into_iter()
        .enumerate()
        .map(|(position, candidate)| {
            let passes_floor = min_composite.map_or(true, |floor| candidate.composite >= floor);
            let selected = position < keep && passes_floor;
            SelectionDecision {
                resource_id: candidate.resource_id,
                selected,
                rank: selected.then_some(position as u32 + 1),
            }
        })
        .collect()
}
