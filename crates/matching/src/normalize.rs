/// Case-fold, replace punctuation with spaces and collapse runs of
/// whitespace, so "Smith,  John" and "smith john" compare equal.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;

    for c in lowered.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }

    out
}

/// Whitespace-delimited token set of a normalized name.
pub fn token_set(normalized: &str) -> std::collections::BTreeSet<&str> {
    normalized.split_whitespace().collect()
}

/// Jaccard similarity over two token sets; 0.0 when either is empty.
pub fn jaccard(a: &std::collections::BTreeSet<&str>, b: &std::collections::BTreeSet<&str>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}
