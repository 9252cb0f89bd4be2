//! Point name normalization.
//!
//! Raw BMS tags arrive in every vendor convention (`AHU-1_SaTemp`,
//! `AV:12 ZnTemp.Present_Value`, `chwrt`). Everything here is a pure function:
//! - [`clean_point_name`]: canonical upper-case, `_`-separated point name
//! - [`clean_device_id`]: canonical device id (hyphens kept)
//! - [`common_prefix`]: longest common token-aligned prefix of a name set
//! - [`normalize_points`]: resolve device id, device type and point name for a batch

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::RawPoint;

/// Characters treated as token separators in raw names.
const SEPARATORS: [char; 7] = [' ', '-', '.', '/', '\\', ':', '_'];

/// BACnet object-type prefixes some exports glue in front of the tag.
const OBJECT_TYPE_PREFIXES: [&str; 7] = ["AI", "AO", "AV", "BI", "BO", "BV", "MSV"];

fn is_separator(c: char) -> bool {
    SEPARATORS.contains(&c)
}

/// Split a name into tokens with their byte spans.
fn token_spans(raw: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in raw.char_indices() {
        if is_separator(ch) {
            if let Some(s) = start.take() {
                spans.push((s, idx));
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        spans.push((s, raw.len()));
    }
    spans
}

/// Canonical form of a point name.
///
/// Trims, upper-cases, collapses every separator run to `_` and drops vendor
/// noise (`Present_Value` / `PV` suffixes, BACnet object-type prefixes).
/// Returns an empty string for empty or all-noise input.
pub fn clean_point_name(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let mut tokens: Vec<&str> = token_spans(&upper)
        .into_iter()
        .map(|(s, e)| &upper[s..e])
        .collect();

    // AV_12_ZnTemp -> ZnTemp
    if tokens.len() > 2
        && OBJECT_TYPE_PREFIXES.contains(&tokens[0])
        && tokens[1].chars().all(|c| c.is_ascii_digit())
    {
        tokens.drain(..2);
    }

    let len = tokens.len();
    if len > 2 && tokens[len - 2] == "PRESENT" && tokens[len - 1] == "VALUE" {
        tokens.truncate(len - 2);
    } else if len > 1 && matches!(tokens[len - 1], "PRESENTVALUE" | "PV") {
        tokens.truncate(len - 1);
    }

    tokens.join("_")
}

/// Canonical form of a device id: trimmed, upper-cased, inner whitespace
/// replaced by `-`. Other separators are kept (`AHU-1`, `VAV_2_01`).
pub fn clean_device_id(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_uppercase()
}

/// Device type implied by a device id: the id with its trailing instance
/// number stripped (`CHPL-1` -> `CHPL`, `AHU01` -> `AHU`).
///
/// Returns the id unchanged when stripping would leave nothing.
pub fn derive_device_type(device_id: &str) -> String {
    let cleaned = clean_device_id(device_id);
    let stripped = cleaned.trim_end_matches(|c: char| c.is_ascii_digit() || is_separator(c));
    if stripped.is_empty() {
        cleaned
    } else {
        stripped.to_string()
    }
}

/// Leading tokens of a single name that identify its device instance.
///
/// Takes tokens up to and including the first one carrying a digit, plus any
/// purely numeric tokens that follow, as long as at least one point token
/// remains. `AHU-1_SaTemp` -> `AHU-1`, `VAV_2_01_ZnTemp` -> `VAV_2_01`.
pub fn instance_prefix(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let spans = token_spans(raw);
    let first_digit = spans
        .iter()
        .position(|&(s, e)| raw[s..e].chars().any(|c| c.is_ascii_digit()))?;

    let mut last = first_digit;
    while last + 2 < spans.len() {
        let (s, e) = spans[last + 1];
        if raw[s..e].chars().all(|c| c.is_ascii_digit()) {
            last += 1;
        } else {
            break;
        }
    }

    if last + 1 >= spans.len() {
        return None;
    }
    Some(&raw[..spans[last].1])
}

/// Number of leading tokens (compared case-insensitively) every name shares.
///
/// Capped so that every name keeps at least one token. Zero when fewer than
/// two names are given.
fn shared_token_count(names: &[&str]) -> usize {
    if names.len() < 2 {
        return 0;
    }
    let tokens: Vec<Vec<String>> = names
        .iter()
        .map(|n| {
            let n = n.trim();
            token_spans(n)
                .into_iter()
                .map(|(s, e)| n[s..e].to_uppercase())
                .collect()
        })
        .collect();

    // Leave one token in the shortest name
    let max_len = tokens.iter().map(Vec::len).min().unwrap_or(0);
    if max_len < 2 {
        return 0;
    }

    let mut shared = 0;
    while shared < max_len - 1 && tokens[1..].iter().all(|t| t[shared] == tokens[0][shared]) {
        shared += 1;
    }
    shared
}

/// Byte offset where the first `count` tokens of `name` end.
fn token_prefix_end(name: &str, count: usize) -> Option<usize> {
    let spans = token_spans(name);
    if count == 0 || spans.len() <= count {
        return None;
    }
    Some(spans[count - 1].1)
}

/// Longest common token-aligned prefix of a set of names.
///
/// The prefix never swallows a whole name: every member keeps at least one
/// token after it. Returns an empty string when there is no such prefix,
/// when fewer than two names are given, or for degenerate input. The text
/// returned is taken from the first name.
pub fn common_prefix(names: &[&str]) -> String {
    let shared = shared_token_count(names);
    match names.first() {
        Some(first) if shared > 0 => {
            let first = first.trim();
            token_prefix_end(first, shared)
                .map(|end| first[..end].to_string())
                .unwrap_or_default()
        }
        _ => String::new(),
    }
}

/// Device derived from a set of untagged names sharing leading tokens.
#[derive(Debug, Clone)]
struct SharedPrefix {
    device_id: String,
    tokens: usize,
}

/// A raw point with its device resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPoint {
    pub device_id: String,
    pub device_type: String,
    /// Cleaned point name, relative to the device
    pub point: String,
    /// Original tag as submitted
    pub raw: String,
}

/// A raw point that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedPoint {
    pub raw: String,
    pub reason: String,
}

/// Strip a leading device id from a cleaned point name.
fn strip_device(point: &str, device_id: &str) -> String {
    let device = clean_point_name(device_id);
    if device.is_empty() {
        return point.to_string();
    }
    match point.strip_prefix(device.as_str()) {
        Some(rest) if rest.starts_with('_') && rest.len() > 1 => rest[1..].to_string(),
        _ => point.to_string(),
    }
}

/// Resolve device id, device type and cleaned point name for each raw point.
///
/// Device ids come from the explicit tag when present, else from the
/// instance prefix of the name, else from the common prefix of untagged
/// names sharing a leading token. Output order follows input order.
pub fn normalize_points(points: &[RawPoint]) -> Vec<Result<NormalizedPoint, RejectedPoint>> {
    // Untagged names without an instance number, grouped by leading token
    let mut by_leading: HashMap<String, Vec<&str>> = HashMap::new();
    for point in points {
        let has_device = point
            .device_id
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
        if has_device || instance_prefix(&point.name).is_some() {
            continue;
        }
        let name = point.name.trim();
        if let Some(&(s, e)) = token_spans(name).first() {
            by_leading
                .entry(name[s..e].to_uppercase())
                .or_default()
                .push(name);
        }
    }
    let shared_prefixes: HashMap<String, SharedPrefix> = by_leading
        .into_iter()
        .filter_map(|(leading, names)| {
            let tokens = shared_token_count(&names);
            let prefix = common_prefix(&names);
            (tokens > 0 && !prefix.is_empty()).then(|| {
                let shared = SharedPrefix {
                    device_id: clean_device_id(&prefix),
                    tokens,
                };
                (leading, shared)
            })
        })
        .collect();

    points
        .iter()
        .map(|point| normalize_one(point, &shared_prefixes))
        .collect()
}

fn normalize_one(
    point: &RawPoint,
    shared_prefixes: &HashMap<String, SharedPrefix>,
) -> Result<NormalizedPoint, RejectedPoint> {
    let raw = point.name.trim();
    let reject = |reason: &str| RejectedPoint {
        raw: point.name.clone(),
        reason: reason.to_string(),
    };

    if raw.is_empty() {
        return Err(reject("empty point name"));
    }

    let explicit = point
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let (device_id, name) = if let Some(device) = explicit {
        let device_id = clean_device_id(device);
        let name = strip_device(&clean_point_name(raw), &device_id);
        (device_id, name)
    } else if let Some(prefix) = instance_prefix(raw) {
        (clean_device_id(prefix), clean_point_name(&raw[prefix.len()..]))
    } else {
        let leading = token_spans(raw)
            .first()
            .map(|&(s, e)| raw[s..e].to_uppercase())
            .unwrap_or_default();
        // Each name is cut at the end of its own shared tokens: names that
        // match case-insensitively may differ in byte length.
        let cut = shared_prefixes
            .get(&leading)
            .and_then(|shared| Some((shared, token_prefix_end(raw, shared.tokens)?)));
        match cut {
            Some((shared, end)) => (shared.device_id.clone(), clean_point_name(&raw[end..])),
            None => return Err(reject("no device id given or derivable")),
        }
    };

    if name.is_empty() {
        return Err(reject("point name is empty after cleaning"));
    }

    let device_type = point
        .device_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.to_uppercase())
        .unwrap_or_else(|| derive_device_type(&device_id));

    Ok(NormalizedPoint {
        device_id,
        device_type,
        point: name,
        raw: point.name.clone(),
    })
}
