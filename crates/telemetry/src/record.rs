use crate::MAX_MESSAGE_LENGTH;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A table entity, ready to ship: PascalCase keys, partition and row keys
/// included.
pub type Entity = Map<String, Value>;

/// One captured log record.
#[derive(Clone, Debug)]
pub struct Record {
    /// When the record was emitted.
    pub time: DateTime<Utc>,

    /// The record's level name (`INFO`, `WARN`, …).
    pub level: String,

    /// The rendered message.
    pub message: String,

    /// The module path the record came from.
    pub module: String,

    /// The function or target the record came from.
    pub function: String,

    /// Context fields, in their original snake_case form. Fields whose
    /// name ends with `_override` replace the base attribute of the same
    /// name.
    pub fields: Map<String, Value>,
}

impl Record {
    /// The partition key for this record: the orchestration id, if one is
    /// in context.
    pub fn partition_key(&self) -> String {
        self.fields
            .get("orchestration_id")
            .and_then(|value| value.as_str())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Converts the record into a shippable [Entity].
    ///
    /// The message is truncated to [MAX_MESSAGE_LENGTH] characters, field
    /// names are rewritten to PascalCase, `_override` fields replace their
    /// base attribute, and the row key is the md5 of the canonical base
    /// entity so that replays of the same record land on the same row.
    pub fn into_entity(self) -> Entity {
        let partition_key = self.partition_key();
        let mut overrides = Map::new();
        let mut fields = Map::new();
        for (key, value) in self.fields {
            if key == "orchestration_id" {
                continue;
            }
            if let Some(base) = key.strip_suffix("_override") {
                let _ = overrides.insert(pascalize(base), value);
            } else {
                let _ = fields.insert(pascalize(&key), value);
            }
        }

        let mut entity = Entity::new();
        let _ = entity.insert("PartitionKey".to_string(), partition_key.into());
        let _ = entity.insert(
            "Time".to_string(),
            format!("{}Z", self.time.format("%Y-%m-%dT%H:%M:%S%.6f")).into(),
        );
        let _ = entity.insert("Level".to_string(), self.level.into());
        let _ = entity.insert("Message".to_string(), truncate(&self.message).into());
        let _ = entity.insert("Module".to_string(), self.module.into());
        let _ = entity.insert("Function".to_string(), self.function.into());
        for (key, value) in overrides {
            let _ = entity.insert(key, value);
        }

        let _ = entity.insert("RowKey".to_string(), row_key(&entity).into());
        for (key, value) in fields {
            let _ = entity.entry(key).or_insert(value);
        }
        entity
    }
}

fn row_key(entity: &Entity) -> String {
    // Sorted keys, so the hash is stable regardless of insertion order.
    let sorted: BTreeMap<&String, &Value> = entity.iter().collect();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    format!("{:x}", md5::compute(canonical))
}

fn truncate(message: &str) -> String {
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        let truncated: String = message.chars().take(MAX_MESSAGE_LENGTH - 3).collect();
        format!("{truncated}...")
    } else {
        message.to_string()
    }
}

/// Rewrites a snake_case name to PascalCase.
pub(crate) fn pascalize(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Record, pascalize, truncate};
    use crate::MAX_MESSAGE_LENGTH;
    use chrono::Utc;
    use serde_json::Map;

    fn record(message: &str) -> Record {
        Record {
            time: Utc::now(),
            level: "INFO".to_string(),
            message: message.to_string(),
            module: "stacforge::activity".to_string(),
            function: "transform_scene".to_string(),
            fields: Map::new(),
        }
    }

    #[test]
    fn pascalize_names() {
        assert_eq!(pascalize("orchestration_id"), "OrchestrationId");
        assert_eq!(pascalize("scene"), "Scene");
        assert_eq!(pascalize("activity_name"), "ActivityName");
    }

    #[test]
    fn truncates_long_messages() {
        let long = "x".repeat(5000);
        let stored = truncate(&long);
        assert_eq!(stored.chars().count(), MAX_MESSAGE_LENGTH);
        assert!(stored.ends_with("..."));
        assert_eq!(&stored[..MAX_MESSAGE_LENGTH - 3], &long[..MAX_MESSAGE_LENGTH - 3]);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn entity_shape() {
        let mut record = record("hello");
        let _ = record
            .fields
            .insert("orchestration_id".to_string(), "instance-1".into());
        let _ = record
            .fields
            .insert("activity_name".to_string(), "file_crawl".into());
        let entity = record.into_entity();
        assert_eq!(entity["PartitionKey"], "instance-1");
        assert_eq!(entity["ActivityName"], "file_crawl");
        assert_eq!(entity["Message"], "hello");
        assert!(entity.contains_key("RowKey"));
        assert!(!entity.contains_key("OrchestrationId"));
    }

    #[test]
    fn override_fields_replace_attributes() {
        let mut record = record("called");
        let _ = record
            .fields
            .insert("function_override".to_string(), "get_text".into());
        let entity = record.into_entity();
        assert_eq!(entity["Function"], "get_text");
        assert!(!entity.contains_key("FunctionOverride"));
    }

    #[test]
    fn identical_records_share_a_row_key() {
        let time = Utc::now();
        let mut one = record("same");
        one.time = time;
        let mut two = record("same");
        two.time = time;
        assert_eq!(one.into_entity()["RowKey"], two.into_entity()["RowKey"]);
    }
}
