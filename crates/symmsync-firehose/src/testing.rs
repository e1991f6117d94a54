//! Synthetic wire fixtures: CAR bundles and stream frames built in memory.
//! Used by this crate's codec tests and by consumer tests downstream; nothing
//! here touches the network.

use ciborium::value::Value;

use crate::car::{write_varint, Cid};

/// Deterministic CIDv1 (dag-cbor codec, identity multihash over `seed`).
pub fn fake_cid(seed: &[u8]) -> Cid {
    let mut bytes = vec![0x01, 0x71, 0x00];
    write_varint(seed.len() as u64, &mut bytes);
    bytes.extend_from_slice(seed);
    Cid::from_bytes(bytes)
}

fn tagged_cid(cid: &Cid) -> Value {
    let mut bytes = vec![0x00];
    bytes.extend_from_slice(cid.as_bytes());
    Value::Tag(42, Box::new(Value::Bytes(bytes)))
}

fn to_cbor(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).expect("in-memory CBOR write");
    out
}

/// Assemble a CARv1 byte string from roots and `(cid, block)` pairs.
pub fn build_car(roots: Vec<Cid>, blocks: Vec<(Cid, Vec<u8>)>) -> Vec<u8> {
    let header = Value::Map(vec![
        (Value::Text("version".into()), Value::Integer(1.into())),
        (
            Value::Text("roots".into()),
            Value::Array(roots.iter().map(tagged_cid).collect()),
        ),
    ]);
    let header_bytes = to_cbor(&header);

    let mut out = Vec::new();
    write_varint(header_bytes.len() as u64, &mut out);
    out.extend_from_slice(&header_bytes);
    for (cid, data) in blocks {
        let mut section = cid.as_bytes().to_vec();
        section.extend_from_slice(&data);
        write_varint(section.len() as u64, &mut out);
        out.extend_from_slice(&section);
    }
    out
}

/// DAG-CBOR block record `{$type, subject, createdAt}` as stored in a bundle.
pub fn block_record_bytes(subject: &str) -> Vec<u8> {
    let record = Value::Map(vec![
        (Value::Text("$type".into()), Value::Text("app.bsky.graph.block".into())),
        (Value::Text("subject".into()), Value::Text(subject.into())),
        (Value::Text("createdAt".into()), Value::Text("2025-06-01T12:00:00.000Z".into())),
    ]);
    to_cbor(&record)
}

fn frame(header: Value, body: Value) -> Vec<u8> {
    let mut out = to_cbor(&header);
    out.extend_from_slice(&to_cbor(&body));
    out
}

fn labeled_header(kind: &str) -> Value {
    Value::Map(vec![
        (Value::Text("op".into()), Value::Integer(1.into())),
        (Value::Text("t".into()), Value::Text(kind.into())),
    ])
}

/// A `#commit` frame with the given operations and CAR payload.
pub fn commit_frame(
    seq: i64,
    repo: &str,
    ops: &[(&str, &str, Option<&Cid>)],
    car: &[u8],
) -> Vec<u8> {
    let ops_value = Value::Array(
        ops.iter()
            .map(|(action, path, cid)| {
                Value::Map(vec![
                    (Value::Text("action".into()), Value::Text((*action).into())),
                    (Value::Text("path".into()), Value::Text((*path).into())),
                    (
                        Value::Text("cid".into()),
                        cid.map(tagged_cid).unwrap_or(Value::Null),
                    ),
                ])
            })
            .collect(),
    );
    let body = Value::Map(vec![
        (Value::Text("seq".into()), Value::Integer(seq.into())),
        (Value::Text("repo".into()), Value::Text(repo.into())),
        (Value::Text("blocks".into()), Value::Bytes(car.to_vec())),
        (Value::Text("ops".into()), ops_value),
        (Value::Text("rev".into()), Value::Text("3kabc".into())),
        (Value::Text("tooBig".into()), Value::Bool(false)),
    ]);
    frame(labeled_header("#commit"), body)
}

/// A labeled non-commit frame (`#identity`, `#account`, ...), optionally
/// carrying a sequence number.
pub fn labeled_frame(kind: &str, seq: Option<i64>) -> Vec<u8> {
    let mut entries = Vec::new();
    if let Some(seq) = seq {
        entries.push((Value::Text("seq".into()), Value::Integer(seq.into())));
    }
    frame(labeled_header(kind), Value::Map(entries))
}

/// An `#info` frame.
pub fn info_frame(name: &str) -> Vec<u8> {
    let body = Value::Map(vec![(Value::Text("name".into()), Value::Text(name.into()))]);
    frame(labeled_header("#info"), body)
}

/// An error frame (`op = -1`).
pub fn error_frame(name: &str) -> Vec<u8> {
    let header = Value::Map(vec![(Value::Text("op".into()), Value::Integer((-1).into()))]);
    let body = Value::Map(vec![(Value::Text("error".into()), Value::Text(name.into()))]);
    frame(header, body)
}
