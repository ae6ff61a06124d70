//! XML bodies
//!
//! Parsing drops the root element and folds everything below it into an
//! object tree: attributes and child elements become keys, text-only
//! elements become strings and repeated elements become arrays. Namespace
//! declarations are ignored.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use super::{camel_case, CodecError};
use crate::resource::registry::CIMI_NAMESPACE;
use crate::resource::{AttrValue, RenderedResource};

/// Element being assembled
struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(element: &BytesStart<'_>) -> Result<Self, CodecError> {
        let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
        let mut fields = Map::new();

        for attr in element.attributes() {
            let attr = attr.map_err(|e| CodecError::Xml(e.to_string()))?;
            let key = attr.key.as_ref();
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| CodecError::Xml(e.to_string()))?
                .into_owned();
            fields.insert(key, Value::String(value));
        }

        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn finish(self) -> (String, Value) {
        let text = self.text.trim().to_string();
        let value = if self.fields.is_empty() {
            if text.is_empty() {
                Value::Object(Map::new())
            } else {
                Value::String(text)
            }
        } else {
            let mut fields = self.fields;
            if !text.is_empty() {
                fields.insert("content".to_string(), Value::String(text));
            }
            Value::Object(fields)
        };
        (self.name, value)
    }
}

fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        },
        None => {
            fields.insert(name, value);
        },
    }
}

fn close(frame: Frame, stack: &mut [Frame], root: &mut Option<Value>) -> Result<(), CodecError> {
    let (name, value) = frame.finish();
    match stack.last_mut() {
        Some(parent) => insert_child(&mut parent.fields, name, value),
        None if root.is_some() => return Err(CodecError::Xml("multiple root elements".to_string())),
        None => *root = Some(value),
    }
    Ok(())
}

pub(super) fn parse(body: &str) -> Result<Value, CodecError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => stack.push(Frame::open(&element)?),
            Ok(Event::Empty(element)) => {
                let frame = Frame::open(&element)?;
                close(frame, &mut stack, &mut root)?;
            },
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| CodecError::Xml(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            },
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            },
            Ok(Event::End(_)) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| CodecError::Xml("unbalanced end tag".to_string()))?;
                close(frame, &mut stack, &mut root)?;
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => {
                return Err(CodecError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            },
        }
    }

    if !stack.is_empty() {
        return Err(CodecError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| CodecError::Xml("document has no root element".to_string()))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), CodecError> {
    writer
        .write_event(event)
        .map_err(|e| CodecError::Xml(e.to_string()))
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), CodecError> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Element name of one entry of a list attribute (`operations` -> `operation`)
fn singular(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = name.strip_suffix('s') {
        stem.to_string()
    } else {
        name.to_string()
    }
}

pub(super) fn render(resource: &RenderedResource) -> Result<String, CodecError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let root = resource.resource_type.as_str();

    let mut start = BytesStart::new(root);
    start.push_attribute(("xmlns", CIMI_NAMESPACE));
    emit(&mut writer, Event::Start(start))?;

    for (name, value) in &resource.attributes {
        let element = camel_case(name);
        match value {
            AttrValue::Text(text) => text_element(&mut writer, &element, text)?,
            AttrValue::Link(link) => {
                let mut start = BytesStart::new(element.as_str());
                start.push_attribute(("href", link.href.as_str()));
                if let Some(rel) = &link.rel {
                    start.push_attribute(("rel", rel.as_str()));
                }
                emit(&mut writer, Event::Empty(start))?;
            },
            AttrValue::Records(records) => {
                let entry = singular(&element);
                for record in records {
                    let mut start = BytesStart::new(entry.as_str());
                    for (key, value) in record {
                        let key = camel_case(key);
                        start.push_attribute((key.as_str(), value.as_str()));
                    }
                    emit(&mut writer, Event::Empty(start))?;
                }
            },
            AttrValue::Map(map) => {
                for (key, value) in map {
                    let mut start = BytesStart::new(element.as_str());
                    start.push_attribute(("key", key.as_str()));
                    emit(&mut writer, Event::Start(start))?;
                    emit(&mut writer, Event::Text(BytesText::new(value)))?;
                    emit(&mut writer, Event::End(BytesEnd::new(element.as_str())))?;
                }
            },
        }
    }

    emit(&mut writer, Event::End(BytesEnd::new(root)))?;
    String::from_utf8(writer.into_inner()).map_err(|e| CodecError::Xml(e.to_string()))
}
