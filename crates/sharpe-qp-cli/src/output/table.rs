use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

/// Render a run as tables: headline figures, then one row per asset, then
/// solver diagnostics and warnings.
pub fn print_table(value: &Value) {
    let Value::Object(envelope) = value else {
        println!("{}", value);
        return;
    };
    let Some(Value::Object(result)) = envelope.get("result") else {
        print_fields(envelope);
        return;
    };

    let scalars: Map<String, Value> = result
        .iter()
        .filter(|(_, v)| !v.is_array() && !v.is_object())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    print_fields(&scalars);

    if let Some(Value::Array(rows)) = result.get("allocations") {
        println!("\nAllocations:");
        print_rows(rows);
    }

    if let Some(Value::Object(solve)) = result.get("solve") {
        println!(
            "\nSolve: {} after {} attempt(s)",
            solve.get("status").map(cell).unwrap_or_default(),
            solve.get("attempts").map(cell).unwrap_or_default()
        );
        print_list("Constraint groups", solve.get("constraint_groups"));
        print_list("Diagnostics", solve.get("diagnostics"));
    }

    print_list("Warnings", envelope.get("warnings"));

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_fields(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.as_str(), cell(val).as_str()]);
    }
    println!("{}", Table::from(builder));
}

fn print_rows(rows: &[Value]) {
    let Some(Value::Object(first)) = rows.first() else {
        println!("(empty)");
        return;
    };
    let headers: Vec<String> = first.keys().cloned().collect();
    let mut builder = Builder::default();
    builder.push_record(headers.clone());
    for row in rows {
        if let Value::Object(map) = row {
            let record: Vec<String> = headers
                .iter()
                .map(|h| map.get(h.as_str()).map(cell).unwrap_or_default())
                .collect();
            builder.push_record(record);
        }
    }
    println!("{}", Table::from(builder));
}

fn print_list(title: &str, value: Option<&Value>) {
    if let Some(Value::Array(items)) = value {
        if !items.is_empty() {
            println!("\n{}:", title);
            for item in items {
                println!("  - {}", cell(item));
            }
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => arr.iter().map(cell).collect::<Vec<_>>().join(", "),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
