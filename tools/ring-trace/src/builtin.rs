//! Scenarios bundled with the tool
//!
//! All of them assume the default 2048 byte ring.

/// `(name, script)` pairs
pub const SCENARIOS: &[(&str, &str)] = &[
    ("in-order", include_str!("../scenarios/in_order.trace")),
    ("out-of-order", include_str!("../scenarios/out_of_order.trace")),
    ("newest-first", include_str!("../scenarios/newest_first.trace")),
    ("exact-end", include_str!("../scenarios/exact_end.trace")),
    ("wrap", include_str!("../scenarios/wrap.trace")),
    ("fill", include_str!("../scenarios/fill.trace")),
];

pub fn find(name: &str) -> Option<&'static str> {
    SCENARIOS
        .iter()
        .find(|(scenario, _)| *scenario == name)
        .map(|(_, script)| *script)
}
