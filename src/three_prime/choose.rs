use crate::regions::{EndCandidate, Region, ThreePrimeEnd};
use crate::util::Strand;

/// Distance from a candidate to the nearest region bound; candidates on
/// another reference sort last.
fn bound_distance(region: &Region, candidate: &EndCandidate) -> u64 {
    if candidate.ref_name != region.ref_name {
        return u64::MAX;
    }
    let to_start = region.start.abs_diff(candidate.pos);
    let to_end = region.end.abs_diff(candidate.pos);
    std::cmp::min(to_start, to_end)
}

/// Pick the winning 3' end for a region: read count descending, then
/// proximity to the nearest region bound, then the smaller position.
/// The winning position pulls the strand-appropriate region bound to
/// itself (the end for forward regions, the start for reverse ones)
/// unless that would cross the opposite bound. With no surviving
/// candidate the chosen end is absent and keeps the region strand.
pub fn choose_region_end(region: &mut Region) {
    let best = region
        .candidates
        .iter()
        .min_by(|a, b| {
            b.read_count
                .cmp(&a.read_count)
                .then_with(|| {
                    bound_distance(region, a).cmp(&bound_distance(region, b))
                })
                .then_with(|| a.pos.cmp(&b.pos))
        })
        .cloned();

    match best {
        None => {
            region.chosen =
                Some(ThreePrimeEnd::Absent { strand: region.strand });
        }
        Some(candidate) => {
            if candidate.ref_name == region.ref_name {
                match region.strand {
                    Strand::Positive if candidate.pos > region.start => {
                        region.end = candidate.pos;
                    }
                    Strand::Negative if candidate.pos < region.end => {
                        region.start = candidate.pos;
                    }
                    _ => {}
                }
            }
            region.chosen = Some(ThreePrimeEnd::Present {
                ref_name: candidate.ref_name,
                pos: candidate.pos,
                strand: candidate.strand,
                read_count: candidate.read_count,
            });
        }
    }
}
