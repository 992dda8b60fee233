//! COCO class subset reported by the detection service.

const CLASSES: &[(u32, &str)] = &[
    (1, "person"),
    (17, "cat"),
    (18, "dog"),
    (19, "horse"),
    (20, "sheep"),
    (21, "cow"),
    (22, "elephant"),
    (23, "bear"),
    (24, "zebra"),
    (25, "giraffe"),
    (62, "chair"),
    (63, "couch"),
    (64, "potted plant"),
];

pub fn class_name(id: u32) -> Option<&'static str> {
    CLASSES
        .iter()
        .find(|(class_id, _)| *class_id == id)
        .map(|(_, name)| *name)
}

pub fn class_id(name: &str) -> Option<u32> {
    CLASSES
        .iter()
        .find(|(_, class_name)| class_name.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
}

/// Strip the `": 0.87"` score suffix the service appends to labels.
pub fn normalize_label(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.rsplit_once(':') {
        Some((name, score)) if score.trim().parse::<f32>().is_ok() => name.trim_end(),
        _ => trimmed,
    }
}
