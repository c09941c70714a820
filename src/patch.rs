//! # Patches
//!
//! Generic patch application for replacement pods, and JSON merge patch
//! computation for workload updates.

use crate::error::{Error, Result};
use crate::spec::{PatchConfig, PatchOp};
use serde_json::{Map, Value};

/// Applies user supplied patches to a serialized object
pub trait PatchApplier: Send + Sync {
    fn apply_patches(&self, object: Value, patches: &[PatchConfig]) -> Result<Value>;
}

/// RFC 6902 JSON patch applier
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPatchApplier;

impl PatchApplier for JsonPatchApplier {
    fn apply_patches(&self, mut object: Value, patches: &[PatchConfig]) -> Result<Value> {
        let operations = patches
            .iter()
            .map(|p| {
                let mut op = Map::new();
                let name = match p.op {
                    PatchOp::Add => "add",
                    PatchOp::Replace => "replace",
                    PatchOp::Remove => "remove",
                };
                op.insert("op".to_string(), Value::from(name));
                op.insert("path".to_string(), Value::from(p.path.as_str()));
                if p.op != PatchOp::Remove {
                    op.insert(
                        "value".to_string(),
                        p.value.clone().unwrap_or(Value::Null),
                    );
                }
                Value::Object(op)
            })
            .collect::<Vec<_>>();

        let patch: json_patch::Patch = serde_json::from_value(Value::Array(operations))
            .map_err(|e| Error::Patch(format!("invalid patch list: {e}")))?;
        json_patch::patch(&mut object, &patch).map_err(|e| Error::Patch(e.to_string()))?;
        Ok(object)
    }
}

/// Compute an RFC 7386 merge patch turning `original` into `modified`
///
/// Only changed fields appear in the result; removed object keys are set to
/// `null`. Arrays are replaced wholesale, as merge patch semantics require.
pub fn merge_diff(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, orig_value) in orig {
                match modi.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(mod_value) if mod_value != orig_value => {
                        let nested = if orig_value.is_object() && mod_value.is_object() {
                            merge_diff(orig_value, mod_value)
                        } else {
                            mod_value.clone()
                        };
                        patch.insert(key.clone(), nested);
                    }
                    Some(_) => {}
                }
            }
            for (key, mod_value) in modi {
                if !orig.contains_key(key) {
                    patch.insert(key.clone(), mod_value.clone());
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Whether a merge patch changes nothing
pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}
