use crate::types::FaceRegion;

/// Pick the dominant face: the largest `width * height`, first-seen on ties.
pub fn select_dominant(regions: &[FaceRegion]) -> Option<FaceRegion> {
    let mut best: Option<&FaceRegion> = None;
    for region in regions {
        // Strictly greater keeps the earliest region among equal areas.
        if best.map_or(true, |b| region.area() > b.area()) {
            best = Some(region);
        }
    }
    best.copied()
}
