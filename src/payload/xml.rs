//! XML body decoding.
//!
//! Elements become mappings, attributes appear as keys prefixed with `-`,
//! and text content lands under `#text`. An element with only text
//! collapses to a plain string, and repeated children of the same name
//! form a sequence indexable by integer path segments.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::hook::HookError;

/// Decode an XML body into the payload tree. The root element appears as a
/// key in the returned mapping.
pub fn parse_xml(body: &[u8]) -> Result<Value, HookError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut root = Map::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = decode_name(start.name().as_ref())?;
                let element = parse_element(&mut reader, &start)?;
                insert_child(&mut root, name, element);
            }
            Ok(Event::Empty(start)) => {
                let name = decode_name(start.name().as_ref())?;
                let element = empty_element(&start)?;
                insert_child(&mut root, name, element);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(HookError::Parse(format!("XML parse error: {}", e))),
        }
    }

    Ok(Value::Object(root))
}

/// Parse the contents of an element whose start tag was just read.
fn parse_element(
    reader: &mut Reader<&[u8]>,
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<Value, HookError> {
    let mut map = attributes_to_map(start)?;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(child)) => {
                let name = decode_name(child.name().as_ref())?;
                let element = parse_element(reader, &child)?;
                insert_child(&mut map, name, element);
            }
            Ok(Event::Empty(child)) => {
                let name = decode_name(child.name().as_ref())?;
                let element = empty_element(&child)?;
                insert_child(&mut map, name, element);
            }
            Ok(Event::Text(t)) => {
                let decoded = t
                    .unescape()
                    .map_err(|e| HookError::Parse(format!("XML unescape error: {}", e)))?;
                text.push_str(&decoded);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c));
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => {
                return Err(HookError::Parse("unexpected end of XML input".to_string()))
            }
            Ok(_) => {}
            Err(e) => return Err(HookError::Parse(format!("XML parse error: {}", e))),
        }
    }

    Ok(finalize_element(map, text))
}

fn empty_element(start: &quick_xml::events::BytesStart<'_>) -> Result<Value, HookError> {
    Ok(finalize_element(attributes_to_map(start)?, String::new()))
}

/// Collapse an element to a string when it carries nothing but text.
fn finalize_element(mut map: Map<String, Value>, text: String) -> Value {
    if map.is_empty() {
        return Value::String(text);
    }
    if !text.is_empty() {
        map.insert("#text".to_string(), Value::String(text));
    }
    Value::Object(map)
}

fn attributes_to_map(
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<Map<String, Value>, HookError> {
    let mut map = Map::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| HookError::Parse(format!("XML attribute error: {}", e)))?;
        let name = decode_name(attr.key.as_ref())?;
        let value = attr
            .unescape_value()
            .map_err(|e| HookError::Parse(format!("XML unescape error: {}", e)))?;
        map.insert(format!("-{}", name), Value::String(value.into_owned()));
    }
    Ok(map)
}

/// Insert a child, turning repeated names into sequences.
fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(seq)) => seq.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

fn decode_name(raw: &[u8]) -> Result<String, HookError> {
    std::str::from_utf8(raw)
        .map(|s| s.to_string())
        .map_err(|e| HookError::Parse(format!("XML name is not valid UTF-8: {}", e)))
}
