//! Change fingerprints.
//!
//! Two digests decide whether an existing replacement is still current: one
//! over the parent's pod template (after the same image substitution the
//! replacement received) and one over the replacement configuration. Both
//! are SHA-256 over a canonical JSON encoding with recursively sorted keys.

use super::transform::{hex_digest, substitute_image};
use crate::error::Result;
use crate::image::ImageResolver;
use crate::spec::ReplacementSpec;
use crate::workload::Workload;
use serde_json::Value;
use std::fmt::Write;

/// Serialize `value` with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    let _ = write!(out, "{}", Value::from(s));
}

/// SHA-256 hex digest of the canonical encoding of `value`
pub fn hash_value(value: &Value) -> String {
    hex_digest(canonical_json(value).as_bytes())
}

/// Fingerprint of the workload's pod template with the replacement image applied
pub fn fingerprint_workload(
    workload: &Workload,
    spec: &ReplacementSpec,
    images: &dyn ImageResolver,
) -> Result<String> {
    let mut template = workload.template().cloned().unwrap_or_default();
    if spec.replace_image().is_some() {
        substitute_image(
            template.spec.get_or_insert_with(Default::default),
            spec,
            images,
        )?;
    }

    Ok(hash_value(&serde_json::to_value(&template)?))
}

/// Fingerprint of the replacement configuration
pub fn fingerprint_spec(spec: &ReplacementSpec) -> Result<String> {
    Ok(hash_value(&serde_json::to_value(spec)?))
}
