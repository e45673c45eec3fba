//! Expansion of bracket-notation field names (`a[0][b]`, `tags[]`) into nested values.

use serde_json::{Map, Value};

/// Indices above this are kept as object keys so a single field can't allocate a huge array.
const MAX_ARRAY_INDEX: usize = 1024;

#[derive(Debug, PartialEq)]
enum Key {
    Name(String),
    Index(usize),
}

impl Key {
    fn is_index(&self) -> bool {
        matches!(self, Key::Index(_))
    }

    fn as_name(&self) -> String {
        match self {
            Key::Name(name) => name.clone(),
            Key::Index(index) => index.to_string(),
        }
    }
}

#[derive(Debug, PartialEq)]
struct Step {
    key: Key,
    append: bool,
}

/// Split a field name into path steps. Names that don't follow the bracket
/// grammar are used verbatim as a single key.
fn parse_path(name: &str) -> Vec<Step> {
    let flat = || {
        vec![Step {
            key: Key::Name(name.to_owned()),
            append: false,
        }]
    };

    let first_len = name.find('[').unwrap_or(name.len());
    if first_len == 0 {
        return flat();
    }

    let mut steps = vec![Step {
        key: Key::Name(name[..first_len].to_owned()),
        append: false,
    }];
    let mut rest = &name[first_len..];

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("[]") {
            if !after.is_empty() {
                return flat();
            }
            if let Some(tail) = steps.last_mut() {
                tail.append = true;
            }
            rest = after;
            continue;
        }

        let inner = match rest
            .strip_prefix('[')
            .and_then(|r| r.find(']').map(|end| &r[..end]))
        {
            Some(inner) if !inner.is_empty() => inner,
            _ => return flat(),
        };
        rest = &rest[inner.len() + 2..];

        let key = match inner.parse::<usize>() {
            Ok(index) if index <= MAX_ARRAY_INDEX && inner.bytes().all(|b| b.is_ascii_digit()) => {
                Key::Index(index)
            }
            _ => Key::Name(inner.to_owned()),
        };
        steps.push(Step { key, append: false });
    }

    steps
}

/// Turn any value into an object: array items keep their index as key
/// (holes are skipped) and a scalar moves under the empty key.
fn to_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter(|(_, item)| !item.is_null())
            .map(|(i, item)| (i.to_string(), item))
            .collect(),
        scalar => {
            let mut map = Map::new();
            map.insert(String::new(), scalar);
            map
        }
    }
}

fn slot<'a>(context: &'a mut Value, key: &Key) -> &'a mut Value {
    match key {
        Key::Index(index) if context.is_array() => {
            if let Value::Array(items) = context {
                if items.len() <= *index {
                    items.resize(index + 1, Value::Null);
                }
            }
            &mut context[*index]
        }
        _ => {
            if !context.is_object() {
                let old = context.take();
                *context = Value::Object(to_object(old));
            }
            &mut context[key.as_name().as_str()]
        }
    }
}

/// Prepare an intermediate value to receive the next step.
fn descend(current: &mut Value, next_is_index: bool) {
    match current {
        Value::Null => {
            *current = if next_is_index {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            };
        }
        Value::Object(_) => {}
        Value::Array(_) if next_is_index => {}
        _ => {
            let old = current.take();
            *current = Value::Object(to_object(old));
        }
    }
}

fn set_last(current: &mut Value, append: bool, value: String) {
    match current {
        Value::Null if append => *current = Value::Array(vec![Value::String(value)]),
        Value::Null => *current = Value::String(value),
        Value::Array(items) => items.push(Value::String(value)),
        Value::Object(_) => set_last(slot(current, &Key::Name(String::new())), false, value),
        _ => {
            let old = current.take();
            *current = Value::Array(vec![old, Value::String(value)]);
        }
    }
}

/// Merge one form field into `store`, expanding bracket notation.
///
/// Repeated names collect into arrays instead of overwriting each other.
///
/// ```
/// use actix_multipart_upload::append_field;
/// use serde_json::{json, Map};
///
/// let mut store = Map::new();
/// append_field(&mut store, "a[0][x]", "1".to_owned());
/// append_field(&mut store, "a[1][x]", "2".to_owned());
/// assert_eq!(serde_json::Value::Object(store), json!({"a": [{"x": "1"}, {"x": "2"}]}));
/// ```
pub fn append_field(store: &mut Map<String, Value>, name: &str, value: String) {
    let steps = parse_path(name);
    let (last, path) = match steps.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut root = Value::Object(std::mem::take(store));
    let mut context = &mut root;
    for (i, step) in path.iter().enumerate() {
        let next_is_index = steps[i + 1].key.is_index();
        let current = slot(context, &step.key);
        descend(current, next_is_index);
        context = current;
    }
    set_last(slot(context, &last.key), last.append, value);

    *store = to_object(root);
}
