const KIB: f64 = 1024.0;
const KB: f64 = 1000.0;

/// Unit suffixes, longest first so `MIB` is tried before `B`.
const UNITS: [(&str, f64); 9] = [
    ("TIB", KIB * KIB * KIB * KIB),
    ("GIB", KIB * KIB * KIB),
    ("MIB", KIB * KIB),
    ("KIB", KIB),
    ("TB", KB * KB * KB * KB),
    ("GB", KB * KB * KB),
    ("MB", KB * KB),
    ("KB", KB),
    ("B", 1.0),
];

/// Parse a human readable size such as `48.88MiB` or `1.2GB` into bytes.
///
/// Anything that does not parse yields `0`, which callers treat as
/// "size still unknown".
pub fn parse_size(token: &str) -> u64 {
    let upper = token.trim().to_ascii_uppercase();

    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|number| (number, *multiplier))
        })
        .unwrap_or((upper.as_str(), 1.0));

    match number.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => (value * multiplier) as u64,
        _ => 0,
    }
}
