/// Fixed mapping from a vendor parameter key to the internal metric id every
/// downstream consumer keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricMapping {
    pub id: &'static str,
    pub vendor_key: &'static str,
    pub label: &'static str,
}

const fn mapping(id: &'static str, vendor_key: &'static str, label: &'static str) -> MetricMapping {
    MetricMapping {
        id,
        vendor_key,
        label,
    }
}

pub const METRIC_ALLOW_LIST: &[MetricMapping] = &[
    mapping("lines", "lines", "Lines"),
    mapping("pores", "pores", "Pores"),
    mapping("redness", "redness", "Redness"),
    mapping("pigmentation", "pigmentation", "Pigmentation"),
    mapping("acne", "breakouts", "Acne"),
    mapping("sagging", "sagging", "Sagging"),
    mapping("dark_circles", "dark_circles", "Dark Circles"),
    mapping("skin_type", "skin_type", "Skin Type"),
    mapping("skin_tone", "skintone", "Skin Tone"),
    mapping("age", "age", "Perceived Age"),
    mapping("eyes_age", "eyes_age", "Eyes Age"),
    mapping("sun_spots", "sun_spots", "Sun Spots"),
];

/// Value fields tried in order; the first numeric one wins.
pub(crate) const VALUE_FIELDS: &[&str] = &["score", "age", "eyes_age", "amount", "density"];

pub(crate) const MASK_FIELDS: &[&str] = &["mask_url", "area_mask_url", "polygon_mask_url"];
