use super::{
    HOST_NAME_ATTR, MACHINE_ID_ATTR, PAYLOAD_ATTR, RELIABLE_WRITE_ID_ATTR, STEP_TYPE, TYPE_ATTR,
    VERSION_ATTR, WriteStep,
};
use crate::core::{Attributes, DbError, Result};
use crate::store::StoreRequest;
use crate::version::{format_timestamp, parse_timestamp};
use serde::{Deserialize, Serialize};

/// Bumped whenever the payload envelope or request layout changes shape.
pub const PAYLOAD_FORMAT_VERSION: u16 = 1;

const MAX_PAYLOAD_CHUNKS: usize = 256;

#[derive(Serialize)]
struct PayloadEnvelopeRef<'a> {
    format_version: u16,
    request: &'a StoreRequest,
}

#[derive(Deserialize)]
struct PayloadEnvelope {
    format_version: u16,
    request: serde_json::Value,
}

pub fn encode_payload(request: &StoreRequest) -> Result<String> {
    let envelope = PayloadEnvelopeRef {
        format_version: PAYLOAD_FORMAT_VERSION,
        request,
    };
    serde_json::to_string(&envelope).map_err(|err| {
        DbError::CodecError(format!("serialize {} payload: {}", request.kind_name(), err))
    })
}

/// Decodes a payload, dispatching on the `kind` tag inside the envelope.
pub fn decode_payload(raw: &str) -> Result<StoreRequest> {
    let envelope = serde_json::from_str::<PayloadEnvelope>(raw)
        .map_err(|err| DbError::CodecError(format!("parse payload envelope: {}", err)))?;

    if envelope.format_version != PAYLOAD_FORMAT_VERSION {
        return Err(DbError::CodecError(format!(
            "unsupported payload format version {} (expected {})",
            envelope.format_version, PAYLOAD_FORMAT_VERSION
        )));
    }

    serde_json::from_value::<StoreRequest>(envelope.request)
        .map_err(|err| DbError::CodecError(format!("parse payload request: {}", err)))
}

fn chunk_attr_name(index: usize) -> String {
    if index == 0 {
        PAYLOAD_ATTR.to_string()
    } else {
        format!("{}.{}", PAYLOAD_ATTR, index)
    }
}

/// Splits on char boundaries into pieces of at most `max_len` bytes.
fn split_chunks(raw: &str, max_len: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (offset, ch) in raw.char_indices() {
        let next = offset + ch.len_utf8();
        if next - start > max_len && end > start {
            chunks.push(&raw[start..end]);
            start = end;
        }
        end = next;
    }
    if start < raw.len() || chunks.is_empty() {
        chunks.push(&raw[start..]);
    }
    chunks
}

/// Renders a step as a log row.
pub fn encode_step(step: &WriteStep, max_attribute_len: usize) -> Result<Attributes> {
    let payload = encode_payload(&step.request)?;
    let chunks = split_chunks(&payload, max_attribute_len.max(1));
    if chunks.len() > MAX_PAYLOAD_CHUNKS {
        return Err(DbError::InvalidArgument(format!(
            "step payload of {} bytes needs {} chunks, at most {} allowed",
            payload.len(),
            chunks.len(),
            MAX_PAYLOAD_CHUNKS
        )));
    }

    let mut attributes = Attributes::new();
    attributes.insert(TYPE_ATTR.to_string(), STEP_TYPE.to_string());
    attributes.insert(
        RELIABLE_WRITE_ID_ATTR.to_string(),
        step.reliable_write_id.clone(),
    );
    attributes.insert(MACHINE_ID_ATTR.to_string(), step.machine_id.clone());
    attributes.insert(HOST_NAME_ATTR.to_string(), step.host_name.clone());
    attributes.insert(VERSION_ATTR.to_string(), format_timestamp(&step.version));
    for (index, chunk) in chunks.into_iter().enumerate() {
        attributes.insert(chunk_attr_name(index), chunk.to_string());
    }
    Ok(attributes)
}

fn required<'a>(attributes: &'a Attributes, name: &str, item_name: &str) -> Result<&'a String> {
    attributes.get(name).ok_or_else(|| {
        DbError::CodecError(format!("log row '{}' is missing '{}'", item_name, name))
    })
}

/// Rebuilds a step from a log row.
pub fn decode_step(item_name: &str, attributes: &Attributes) -> Result<WriteStep> {
    let row_type = required(attributes, TYPE_ATTR, item_name)?;
    if row_type != STEP_TYPE {
        return Err(DbError::CodecError(format!(
            "log row '{}' has type '{}', expected '{}'",
            item_name, row_type, STEP_TYPE
        )));
    }

    let mut payload = String::new();
    for index in 0..MAX_PAYLOAD_CHUNKS {
        match attributes.get(&chunk_attr_name(index)) {
            Some(chunk) => payload.push_str(chunk),
            None if index == 0 => {
                return Err(DbError::CodecError(format!(
                    "log row '{}' is missing '{}'",
                    item_name, PAYLOAD_ATTR
                )));
            }
            None => break,
        }
    }

    Ok(WriteStep {
        id: item_name.to_string(),
        reliable_write_id: required(attributes, RELIABLE_WRITE_ID_ATTR, item_name)?.clone(),
        request: decode_payload(&payload)?,
        machine_id: required(attributes, MACHINE_ID_ATTR, item_name)?.clone(),
        host_name: required(attributes, HOST_NAME_ATTR, item_name)?.clone(),
        version: parse_timestamp(required(attributes, VERSION_ATTR, item_name)?)?,
    })
}
