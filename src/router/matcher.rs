//! Pure path matching: pattern vs. concrete path, no routing state.

use std::collections::HashMap;

fn segments(value: &str) -> Vec<&str> {
    value.split('/').filter(|s| !s.is_empty()).collect()
}

/// Matches `path` against `pattern`, returning the extracted parameters.
///
/// The pattern `*` matches every path with no captures. Otherwise both sides
/// are split on `/` (empty segments dropped, so trailing slashes are
/// insignificant), the segment counts must agree, and each pattern segment
/// either captures (`:name`, URL-decoded) or must equal the path segment
/// exactly. Duplicate capture names overwrite, last one wins.
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    if pattern == "*" {
        return Some(HashMap::new());
    }

    let pattern_parts = segments(pattern);
    let path_parts = segments(path);

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();

    for (pattern_part, path_part) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(name) = pattern_part.strip_prefix(':') {
            let value = urlencoding::decode(path_part)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| (*path_part).to_string());
            params.insert(name.to_string(), value);
        } else if pattern_part != path_part {
            return None;
        }
    }

    Some(params)
}
