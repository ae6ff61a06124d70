use serde_json::{Map, Value};

use super::{camel_case, CodecError};
use crate::resource::registry::CIMI_NAMESPACE;
use crate::resource::{AttrValue, RenderedResource};

pub(super) fn parse(body: &str) -> Result<Value, CodecError> {
    Ok(serde_json::from_str(body)?)
}

pub(super) fn render(resource: &RenderedResource) -> Result<String, CodecError> {
    let mut object = Map::new();
    object.insert(
        "resourceURI".to_string(),
        Value::String(format!("{}/{}", CIMI_NAMESPACE, resource.resource_type)),
    );
    for (name, value) in &resource.attributes {
        object.insert(camel_case(name), to_json(value));
    }

    Ok(serde_json::to_string_pretty(&Value::Object(object))?)
}

fn to_json(value: &AttrValue) -> Value {
    match value {
        AttrValue::Text(text) => Value::String(text.clone()),
        AttrValue::Link(link) => {
            let mut object = Map::new();
            object.insert("href".to_string(), Value::String(link.href.clone()));
            if let Some(rel) = &link.rel {
                object.insert("rel".to_string(), Value::String(rel.clone()));
            }
            Value::Object(object)
        },
        AttrValue::Records(records) => Value::Array(
            records
                .iter()
                .map(|record| {
                    Value::Object(
                        record
                            .iter()
                            .map(|(k, v)| (camel_case(k), Value::String(v.clone())))
                            .collect(),
                    )
                })
                .collect(),
        ),
        AttrValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    }
}
