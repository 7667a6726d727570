use std::cmp::Ordering;

/// Compare two dotted version strings component by component.
///
/// Missing components count as `0`, so `"1.2"` equals `"1.2.0"`. A component
/// that is not a number also counts as `0`.
pub fn compare_version(a: &str, b: &str) -> Ordering {
    let left: Vec<u64> = parse_components(a);
    let right: Vec<u64> = parse_components(b);
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

fn parse_components(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}
