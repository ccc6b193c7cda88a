use serde_json::Value;

/// Keys tried in order; the first non-null one is printed alone.
const PRIORITY_KEYS: [&str; 4] = [
    "sharpe_ratio",
    "direct_sharpe_ratio",
    "objective",
    "total_value",
];

/// Print just the headline number of a run.
pub fn print_minimal(value: &Value) {
    let result = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let Value::Object(map) = result else {
        println!("{}", scalar(result));
        return;
    };

    let headline = PRIORITY_KEYS
        .iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null());
    match headline {
        Some(v) => println!("{}", scalar(v)),
        None => {
            if let Some((key, val)) = map.iter().next() {
                println!("{}: {}", key, scalar(val));
            }
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
