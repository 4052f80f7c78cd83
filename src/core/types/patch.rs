//! JSON-Pointer patch codec.
//!
//! Record mutations travel as a mapping of RFC 6901 JSON Pointers to
//! replacement values, derived by diffing a committed snapshot against the
//! current record. A `null` replacement deletes the key. Paths address
//! through objects component by component; arrays are never sub-patched
//! (an array that changed in any way is replaced wholesale).
//!
//! Pointer components escape `~` to `~0` and then `/` to `~1`; decoding
//! applies the substitutions in the reverse order. Getting that order wrong
//! corrupts keys that contain `~1` literally, so both directions are pinned
//! by tests.

use serde_json::{Map, Value};

/// A patch: JSON Pointer path → replacement value (`Null` deletes).
pub type PatchMap = Map<String, Value>;

/// Escape a key for use as a pointer component (`~` → `~0`, then `/` → `~1`).
#[must_use]
pub fn encode_pointer_component(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Reverse of [`encode_pointer_component`] (`~1` → `/`, then `~0` → `~`).
#[must_use]
pub fn decode_pointer_component(component: &str) -> String {
    component.replace("~1", "/").replace("~0", "~")
}

/// Diff `original` against `current`, recording pointer patches under
/// `base_path`. Returns whether anything was recorded.
///
/// Two plain objects recurse over the union of their keys; a key missing in
/// `current` records a deletion. Anything else (primitives, arrays, or a
/// type change) records a wholesale replacement when the two values are not
/// structurally equal.
///
/// # Examples
///
/// ```
/// use jmap_engine::core::types::{make_patches, PatchMap};
/// use serde_json::json;
///
/// let mut patches = PatchMap::new();
/// let did = make_patches(
///     "keywords",
///     &mut patches,
///     Some(&json!({"$seen": true})),
///     Some(&json!({})),
/// );
/// assert!(did);
/// assert_eq!(patches.get("keywords/$seen"), Some(&json!(null)));
/// ```
pub fn make_patches(
    base_path: &str,
    patches: &mut PatchMap,
    original: Option<&Value>,
    current: Option<&Value>,
) -> bool {
    match (original, current) {
        (Some(Value::Object(original)), Some(Value::Object(current))) => {
            let mut did_patch = false;
            for key in original.keys().chain(current.keys().filter(|k| !original.contains_key(*k)))
            {
                let child_path = format!("{}/{}", base_path, encode_pointer_component(key));
                did_patch |=
                    make_patches(&child_path, patches, original.get(key), current.get(key));
            }
            did_patch
        }
        _ => {
            let original = original.unwrap_or(&Value::Null);
            let current = current.unwrap_or(&Value::Null);
            if original != current {
                patches.insert(base_path.to_owned(), current.clone());
                true
            } else {
                false
            }
        }
    }
}

/// Apply a single pointer patch to `object`.
///
/// Walks `path` component by component; on the terminal component assigns
/// `patch`, or deletes the key when `patch` is `Null`. A patch whose
/// intermediate components do not resolve to objects is silently dropped.
pub fn apply_patch(object: &mut Value, path: &str, patch: Value) {
    let components: Vec<String> = path.split('/').map(decode_pointer_component).collect();
    let (last, intermediates) = match components.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut cursor = object;
    for component in intermediates {
        cursor = match cursor.get_mut(component.as_str()) {
            Some(child) if child.is_object() => child,
            _ => return,
        };
    }
    if let Value::Object(map) = cursor {
        if patch.is_null() {
            map.remove(last);
        } else {
            map.insert(last.clone(), patch);
        }
    }
}

/// Whether `path` resolves within `object` far enough to be applied.
///
/// Returns `false` if any intermediate component is missing or not an
/// object; `true` once the final component is reached. The final key itself
/// is not required to exist.
#[must_use]
pub fn is_valid_patch(object: &Value, path: &str) -> bool {
    let components: Vec<String> = path.split('/').map(decode_pointer_component).collect();
    let (_, intermediates) = match components.split_last() {
        Some(split) => split,
        None => return false,
    };

    let mut cursor = object;
    for component in intermediates {
        cursor = match cursor.get(component.as_str()) {
            Some(child) if child.is_object() => child,
            _ => return false,
        };
    }
    true
}
