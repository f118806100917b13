use std::collections::BTreeMap;

/// Label under which the monitoring backend records a link to its problem.
pub const PROBLEM_URL_LABEL: &str = "Problem URL";

/// Extract a problem ID from a "Problem URL" label, matched case-insensitively.
/// A label of exactly "Problem URL" takes precedence over other spellings.
///
/// The label holds a URL such as `https://tenant/#problems/problemdetails;pid=-123_456V2`,
/// and the ID is the `pid` parameter of its fragment. When the fragment holds several
/// `pid` parameters the last one wins, as successive problems of a remediation are
/// appended to the same label. Returns None for anything that doesn't parse.
pub fn extract_problem_id(labels: &BTreeMap<String, String>) -> Option<String> {
    if let Some(pid) = labels.get(PROBLEM_URL_LABEL).and_then(|value| pid_of(value)) {
        return Some(pid);
    }
    labels
        .iter()
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case(PROBLEM_URL_LABEL))
        .find_map(|(_, value)| pid_of(value))
}

fn pid_of(value: &str) -> Option<String> {
    let parsed = url::Url::parse(value.trim()).ok()?;
    let fragment = parsed.fragment()?;

    fragment
        .split(|c| c == ';' || c == '&' || c == '?')
        .filter_map(|param| param.strip_prefix("pid="))
        .filter(|pid| !pid.is_empty())
        .last()
        .map(str::to_string)
}
