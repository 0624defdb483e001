use std::cmp::Ordering;

/// Compare two version strings segment by segment.
///
/// Splits on `.`, `-` and `_`, compares segments numerically when possible
/// and lexicographically otherwise ("1p1", "rc2"). Trailing zero segments do
/// not affect ordering, so "1.2" == "1.2.0".
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let seg_a = split_version(a);
    let seg_b = split_version(b);

    for (sa, sb) in seg_a.iter().zip(seg_b.iter()) {
        let ord = compare_segments(sa, sb);
        if ord != Ordering::Equal {
            return ord;
        }
    }

    let (remaining, longer_is_a) = if seg_a.len() > seg_b.len() {
        (&seg_a[seg_b.len()..], true)
    } else {
        (&seg_b[seg_a.len()..], false)
    };
    for seg in remaining {
        let ord = compare_segments(seg, "0");
        if ord != Ordering::Equal {
            return if longer_is_a { ord } else { ord.reverse() };
        }
    }

    Ordering::Equal
}

fn split_version(v: &str) -> Vec<&str> {
    v.split(['.', '-', '_']).filter(|s| !s.is_empty()).collect()
}

/// Numeric segments compare as numbers. A segment with a numeric prefix
/// ("1p1") compares by that prefix first so "6.6.1p1" sorts after "6.6.1".
fn compare_segments(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(na), Ok(nb)) => na.cmp(&nb),
        _ => match (numeric_prefix(a), numeric_prefix(b)) {
            (Some(na), Some(nb)) if na != nb => na.cmp(&nb),
            _ => a.cmp(b),
        },
    }
}

fn numeric_prefix(seg: &str) -> Option<u64> {
    let end = seg
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(seg.len());
    seg[..end].parse().ok()
}

/// Pull the version token that follows `product` in free-form version text.
///
/// `extract_version("OpenSSH 6.6.1p1 Ubuntu 2ubuntu2", "openssh")` yields
/// `6.6.1p1`; words between the product and the version ("httpd") are
/// skipped. Matching on the product name is case-insensitive.
pub fn extract_version(text: &str, product: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find(&product.to_ascii_lowercase())? + product.len();
    text[start..]
        .split(|c: char| c.is_whitespace() || c == '/')
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .map(|token| {
            token
                .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_string()
        })
}
