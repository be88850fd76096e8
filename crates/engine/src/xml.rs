//! XML to nested-mapping conversion for `get_xml`.
//!
//! The shape follows the xmltodict conventions template authors expect:
//! attributes become `@name` keys, text content becomes `#text` (or the
//! node's whole value when it has no attributes or children), and
//! repeated sibling elements collapse into arrays.

use crate::Result;
use quick_xml::events::Event;
use serde_json::{Map, Value};

struct Node {
    name: String,
    map: Map<String, Value>,
    text: String,
}

/// Parses an XML document into a nested mapping.
pub(crate) fn xml_to_value(xml: &str, attr_prefix: &str, text_key: &str) -> Result<Value> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut root = Map::new();
    let mut stack: Vec<Node> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let mut map = Map::new();
                for attribute in start.attributes().flatten() {
                    let key = format!(
                        "{attr_prefix}{}",
                        String::from_utf8_lossy(attribute.key.as_ref())
                    );
                    let value = attribute
                        .decode_and_unescape_value(reader.decoder())
                        .unwrap_or_default()
                        .into_owned();
                    let _ = map.insert(key, Value::String(value));
                }
                stack.push(Node {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    map,
                    text: String::new(),
                });
            }
            Event::Empty(empty) => {
                let mut map = Map::new();
                for attribute in empty.attributes().flatten() {
                    let key = format!(
                        "{attr_prefix}{}",
                        String::from_utf8_lossy(attribute.key.as_ref())
                    );
                    let value = attribute
                        .decode_and_unescape_value(reader.decoder())
                        .unwrap_or_default()
                        .into_owned();
                    let _ = map.insert(key, Value::String(value));
                }
                let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                let value = if map.is_empty() {
                    Value::Null
                } else {
                    Value::Object(map)
                };
                insert_child(parent_map(&mut stack, &mut root), name, value);
            }
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(node) = stack.last_mut() {
                    node.text
                        .push_str(&String::from_utf8_lossy(data.as_ref()));
                }
            }
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    let value = finalize(node.map, node.text, text_key);
                    insert_child(parent_map(&mut stack, &mut root), node.name, value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(Value::Object(root))
}

fn parent_map<'a>(stack: &'a mut [Node], root: &'a mut Map<String, Value>) -> &'a mut Map<String, Value> {
    match stack.last_mut() {
        Some(parent) => &mut parent.map,
        None => root,
    }
}

fn finalize(map: Map<String, Value>, text: String, text_key: &str) -> Value {
    let text = text.trim().to_string();
    if map.is_empty() {
        if text.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        }
    } else {
        let mut map = map;
        if !text.is_empty() {
            let _ = map.insert(text_key.to_string(), Value::String(text));
        }
        Value::Object(map)
    }
}

/// Inserts a child value, collapsing repeated names into an array.
fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(existing)) => existing.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            let _ = map.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::xml_to_value;
    use serde_json::json;

    #[test]
    fn simple_document() {
        let value = xml_to_value("<scene><id>S2A</id><cloud>12</cloud></scene>", "@", "#text")
            .unwrap();
        assert_eq!(value, json!({"scene": {"id": "S2A", "cloud": "12"}}));
    }

    #[test]
    fn attributes_and_text() {
        let value = xml_to_value(
            r#"<band index="1" unit="m">elevation</band>"#,
            "@",
            "#text",
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"band": {"@index": "1", "@unit": "m", "#text": "elevation"}})
        );
    }

    #[test]
    fn repeated_elements_become_arrays() {
        let value = xml_to_value("<r><b>1</b><b>2</b><b>3</b></r>", "@", "#text").unwrap();
        assert_eq!(value, json!({"r": {"b": ["1", "2", "3"]}}));
    }

    #[test]
    fn empty_elements_are_null() {
        let value = xml_to_value("<r><empty/></r>", "@", "#text").unwrap();
        assert_eq!(value, json!({"r": {"empty": null}}));
    }

    #[test]
    fn nested_structures() {
        let value = xml_to_value(
            "<product><bands><band>B02</band><band>B03</band></bands></product>",
            "@",
            "#text",
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"product": {"bands": {"band": ["B02", "B03"]}}})
        );
    }
}
