//! Array and hash attributes flattened into link-table rows and reassembled from them.

use crate::class::{Class, LinkSlot, ELEMENT_VALUE, PARENT_ID};
use crate::entity::Entity;
use crate::error::AppError;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

fn slot_of(link: &Class) -> Result<LinkSlot, AppError> {
    link.link_slot()
        .ok_or_else(|| AppError::InvalidArgument(format!("`{}` is not a link class", link.name())))
}

/// (slot, element) pairs of a collection value; null counts as empty.
pub fn decompose(link: &Class, value: &Value) -> Result<Vec<(Value, Value)>, AppError> {
    match (slot_of(link)?, value) {
        (_, Value::Null) => Ok(Vec::new()),
        (LinkSlot::Index, Value::Array(items)) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| (Value::Int(i as i64), item.clone()))
            .collect()),
        (LinkSlot::Key, Value::Hash(map)) => Ok(map.iter().map(|(k, v)| (Value::Str(k.clone()), v.clone())).collect()),
        (_, other) => Err(AppError::InvalidArgument(format!(
            "`{}` cannot store a {} value",
            link.name(),
            other.type_name()
        ))),
    }
}

/// Unsaved element row owned by `parent_id`.
pub fn element_row(link: &Arc<Class>, parent_id: &Value, slot: Value, element: Value) -> Result<Entity, AppError> {
    let slot_column = slot_of(link)?.column();
    let mut values = BTreeMap::new();
    values.insert(PARENT_ID.to_string(), parent_id.clone());
    values.insert(slot_column.to_string(), slot);
    values.insert(ELEMENT_VALUE.to_string(), element);
    Ok(Entity::restore(link, values))
}

/// Rebuilds the collection from element rows, already ordered by slot.
pub fn assemble(link: &Class, rows: Vec<BTreeMap<String, Value>>) -> Result<Value, AppError> {
    let slot = slot_of(link)?;
    match slot {
        LinkSlot::Index => Ok(Value::Array(
            rows.into_iter().map(|mut row| row.remove(ELEMENT_VALUE).unwrap_or_default()).collect(),
        )),
        LinkSlot::Key => {
            let mut map = BTreeMap::new();
            for mut row in rows {
                let key = match row.remove(slot.column()) {
                    Some(Value::Str(key)) => key,
                    other => {
                        return Err(AppError::Serialization(format!(
                            "{} row has key {}",
                            link.name(),
                            other.unwrap_or_default()
                        )))
                    }
                };
                map.insert(key, row.remove(ELEMENT_VALUE).unwrap_or_default());
            }
            Ok(Value::Hash(map))
        }
    }
}
