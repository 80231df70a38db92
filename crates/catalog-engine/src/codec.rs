//! Query-string codec for filter state.
//!
//! # Design
//! - Fields are written in schema order; a field holding its default is omitted.
//! - List items are percent-encoded individually and joined with the raw
//!   schema delimiter, so items containing the delimiter still round-trip.
//! - Decoding never fails: unknown names are ignored and malformed or
//!   out-of-schema values fall back to the field default.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::filter::{FieldKind, FieldSpec, FieldValue, FilterSchema, FilterState};

/// Encode `state` as a minimal query string (no leading `?`).
#[must_use]
pub fn encode(schema: &FilterSchema, state: &FilterState) -> String {
    render(schema, state, false)
}

/// Encode `state` for a list request.
///
/// Identical to [`encode`] except that the page and page size fields are
/// always present, since the data service needs explicit paging.
#[must_use]
pub fn encode_request(schema: &FilterSchema, state: &FilterState) -> String {
    render(schema, state, true)
}

/// Decode a query string (with or without a leading `?`) into a full state.
#[must_use]
pub fn decode(schema: &FilterSchema, query: &str) -> FilterState {
    let raw = parse_pairs(query);
    let mut state = schema.defaults();
    for spec in schema.fields() {
        if let Some(value) = raw
            .get(spec.name())
            .and_then(|value| decode_value(schema, spec, value))
        {
            state.insert(spec.name(), value);
        }
    }
    state
}

fn render(schema: &FilterSchema, state: &FilterState, explicit_paging: bool) -> String {
    let mut pairs = Vec::new();
    for spec in schema.fields() {
        let value = state.get(spec.name()).unwrap_or_else(|| spec.default_value());
        let paging = explicit_paging
            && (schema.page_field() == Some(spec.name())
                || schema.page_size_field() == Some(spec.name()));
        if value == spec.default_value() && !paging {
            continue;
        }
        pairs.push(format!(
            "{}={}",
            urlencoding::encode(spec.name()),
            encode_value(schema, value)
        ));
    }
    pairs.join("&")
}

fn encode_value(schema: &FilterSchema, value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => urlencoding::encode(text).into_owned(),
        FieldValue::Integer(number) => number.to_string(),
        FieldValue::Boolean(flag) => flag.to_string(),
        FieldValue::List(items) => items
            .iter()
            .map(|item| urlencoding::encode(item))
            .collect::<Vec<_>>()
            .join(schema.delimiter()),
    }
}

/// Split a query into raw (still encoded) values keyed by decoded name.
/// Later duplicates win.
fn parse_pairs(query: &str) -> HashMap<String, &str> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            percent_decode(name).map(|name| (name.into_owned(), value))
        })
        .collect()
}

fn percent_decode(raw: &str) -> Option<Cow<'_, str>> {
    if raw.contains('+') {
        urlencoding::decode(&raw.replace('+', " "))
            .ok()
            .map(|decoded| Cow::Owned(decoded.into_owned()))
    } else {
        urlencoding::decode(raw).ok()
    }
}

fn decode_value(schema: &FilterSchema, spec: &FieldSpec, raw: &str) -> Option<FieldValue> {
    let value = match spec.kind() {
        // Empty items, as in `a,,b`, are dropped rather than failing the field.
        FieldKind::List => FieldValue::List(
            raw.split(schema.delimiter())
                .filter(|item| !item.is_empty())
                .map(|item| percent_decode(item).map(Cow::into_owned))
                .collect::<Option<Vec<_>>>()?,
        ),
        FieldKind::Text | FieldKind::Enum(_) => FieldValue::Text(percent_decode(raw)?.into_owned()),
        FieldKind::Integer { .. } => FieldValue::Integer(percent_decode(raw)?.trim().parse().ok()?),
        FieldKind::Boolean => match percent_decode(raw)?.as_ref() {
            "true" | "1" => FieldValue::Boolean(true),
            "false" | "0" => FieldValue::Boolean(false),
            _ => return None,
        },
    };
    spec.check(&value).ok().map(|()| value)
}
