//! Query-string and endpoint helpers.
//!
//! Parameters are `serde_json::Value`s. Nested arrays and objects flatten to
//! bracketed keys (`tags[0]=a`, `place[city]=Hanoi`), booleans become `1`/`0`
//! and nulls are dropped, which is the form the API expects.

use std::collections::BTreeMap;

use serde_json::Value;
use url::form_urlencoded;

/// Flatten parameters into ordered key/value string pairs.
pub fn flatten_params(params: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        flatten_value(key.clone(), value, &mut pairs);
    }
    pairs
}

fn flatten_value(key: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((key, if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => out.push((key, n.to_string())),
        Value::String(s) => out.push((key, s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(format!("{key}[{i}]"), item, out);
            }
        }
        Value::Object(map) => {
            for (k, item) in map {
                flatten_value(format!("{key}[{k}]"), item, out);
            }
        }
    }
}

/// Encode parameters as `application/x-www-form-urlencoded`.
pub fn build_query(params: &BTreeMap<String, Value>) -> String {
    encode_pairs(flatten_params(params))
}

fn encode_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Parse the query string of `url` into a sorted mapping.
pub fn params_from_url(url: &str) -> BTreeMap<String, String> {
    let Some((_, rest)) = url.split_once('?') else {
        return BTreeMap::new();
    };
    let query = rest.split('#').next().unwrap_or_default();
    form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

/// Remove the named query parameters from `url`, keeping everything else.
pub fn remove_params_from_url(url: &str, names: &[&str]) -> String {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };

    let mut rebuilt = path.to_string();
    if let Some(query) = query {
        let kept: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .filter(|(key, _)| !names.contains(&key.as_str()))
            .collect();
        if !kept.is_empty() {
            rebuilt.push('?');
            rebuilt.push_str(&encode_pairs(kept));
        }
    }
    if let Some(fragment) = fragment {
        rebuilt.push('#');
        rebuilt.push_str(fragment);
    }
    rebuilt
}

/// Append `params` to `url`.
///
/// Parameters already present in the URL win over new ones; when both exist
/// the merged query is sorted by key.
pub fn append_params_to_url(url: &str, params: &BTreeMap<String, Value>) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let Some((path, query)) = url.split_once('?') else {
        return format!("{url}?{}", build_query(params));
    };

    let mut merged = params.clone();
    for (key, value) in form_urlencoded::parse(query.as_bytes()).into_owned() {
        merged.insert(key, Value::String(value));
    }
    format!("{path}?{}", build_query(&merged))
}

/// Copy the query parameters of `source` onto `target`.
pub fn merge_url_params(source: &str, target: &str) -> String {
    let stolen = params_from_url(source);
    if stolen.is_empty() {
        return target.to_string();
    }
    let params = stolen
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    append_params_to_url(target, &params)
}

/// Prefix `endpoint` with `/` unless it already starts with one. Empty stays empty.
pub fn force_slash_prefix(endpoint: &str) -> String {
    if endpoint.is_empty() || endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    }
}

/// Reduce a full `https://*.hodela.com[/vX.Y]/path` URL to its endpoint.
pub fn base_api_url_endpoint(url: &str) -> String {
    let Some(rest) = url.strip_prefix("https://") else {
        return format!("/{url}");
    };
    let Some((host, path)) = rest.split_once('/') else {
        return format!("/{url}");
    };
    if !host.ends_with(".hodela.com") {
        return format!("/{url}");
    }
    let path = match path.split_once('/') {
        Some((segment, endpoint)) if is_version_segment(segment) => endpoint,
        _ => path,
    };
    format!("/{path}")
}

fn is_version_segment(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit() || c == '.'))
}
