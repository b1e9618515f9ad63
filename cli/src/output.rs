//! Flattening of yielded blocks into the records printed per output mode.

use serde_json::{json, Map, Value};

use steemwatch_stream::BlockEntry;

/// The signed block inside a `get_blocks_with_info` entry (or the entry
/// itself when it is a bare block).
pub fn block_body(entry: &BlockEntry) -> &Value {
    match entry.block.get("block") {
        Some(block) if block.is_object() => block,
        _ => &entry.block,
    }
}

fn transactions(entry: &BlockEntry) -> &[Value] {
    block_body(entry)
        .get("transactions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// The block without its `transactions`.
pub fn header_record(entry: &BlockEntry) -> Value {
    let mut header = block_body(entry).as_object().cloned().unwrap_or_default();
    header.remove("transactions");
    Value::Object(header)
}

/// Each transaction, tagged with `block_num` and `tx_num`.
pub fn tx_records(entry: &BlockEntry) -> Vec<Value> {
    transactions(entry)
        .iter()
        .enumerate()
        .map(|(tx_num, tx)| {
            let mut tx = tx.as_object().cloned().unwrap_or_else(Map::new);
            tx.insert("block_num".into(), entry.num.into());
            tx.insert("tx_num".into(), tx_num.into());
            Value::Object(tx)
        })
        .collect()
}

/// Each operation as `{op, block_num, tx_num, op_num}`.
pub fn op_records(entry: &BlockEntry) -> Vec<Value> {
    let mut records = Vec::new();
    for (tx_num, tx) in transactions(entry).iter().enumerate() {
        let ops = tx.get("operations").and_then(Value::as_array);
        for (op_num, op) in ops.into_iter().flatten().enumerate() {
            records.push(json!({
                "op": op,
                "block_num": entry.num,
                "tx_num": tx_num,
                "op_num": op_num,
            }));
        }
    }
    records
}
