use crate::class::{Class, Validatable};
use crate::error::AppError;
use crate::value::Value;
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// A validated attribute map owned by one [`Class`].
#[derive(Clone, Debug)]
pub struct Entity {
    class: Arc<Class>,
    values: BTreeMap<String, Value>,
}

impl Entity {
    /// Supplied values are coerced and tested, every other attribute falls back to its default.
    pub fn construct<K: Into<String>>(
        class: &Arc<Class>,
        values: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Entity, AppError> {
        let mut supplied: BTreeMap<String, Value> = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if class.is_open() {
            return Ok(Entity { class: Arc::clone(class), values: supplied });
        }
        if let Some(extra) = supplied.keys().find(|k| !class.declares(k)) {
            return Err(AppError::InvalidArgument(format!("`{extra}` is not an attribute of {}", class.name())));
        }

        let mut out = BTreeMap::new();
        for (attr, assertion) in class.asserts() {
            let value = match supplied.remove(attr) {
                Some(v) => assertion.coerce(v),
                None => assertion.default_value().cloned().unwrap_or_default(),
            };
            assertion.test(attr, &value)?;
            out.insert(attr.clone(), value);
        }
        Ok(Entity { class: Arc::clone(class), values: out })
    }

    pub fn new(class: &Arc<Class>) -> Result<Entity, AppError> {
        Entity::construct(class, Vec::<(String, Value)>::new())
    }

    /// Placeholder holding defaults only; failing defaults are kept with a warning.
    pub fn proto(class: &Arc<Class>) -> Entity {
        let mut values = BTreeMap::new();
        for (attr, assertion) in class.asserts() {
            let Some(default) = assertion.default_value() else {
                continue;
            };
            if let Err(e) = assertion.test(attr, default) {
                warn!("{}: keeping default that does not validate: {e}", class.name());
            }
            values.insert(attr.clone(), default.clone());
        }
        Entity { class: Arc::clone(class), values }
    }

    /// Rebuilds an entity from stored values, coercing without re-running the assertions.
    pub(crate) fn restore(class: &Arc<Class>, stored: BTreeMap<String, Value>) -> Entity {
        if class.is_open() {
            return Entity { class: Arc::clone(class), values: stored };
        }
        let mut stored = stored;
        let values = class
            .asserts()
            .iter()
            .map(|(attr, assertion)| {
                let value = stored.remove(attr).map(|v| assertion.coerce(v)).unwrap_or_default();
                (attr.clone(), value)
            })
            .collect();
        Entity { class: Arc::clone(class), values }
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Result<&Value, AppError> {
        if !self.class.declares(key) {
            return Err(AppError::RuntimeError(format!("{} has no attribute `{key}`", self.class.name())));
        }
        Ok(self.values.get(key).unwrap_or(&NULL))
    }

    /// Stores `value` only when it passes the attribute's assertion.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), AppError> {
        let value = value.into();
        if self.class.is_open() {
            self.values.insert(key.to_string(), value);
            return Ok(());
        }
        let assertion = self
            .class
            .assertion(key)
            .ok_or_else(|| AppError::RuntimeError(format!("{} has no attribute `{key}`", self.class.name())))?;
        let value = assertion.coerce(value);
        assertion.test(key, &value)?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Clears an attribute; collections become empty, scalars null (optional ones only).
    pub fn delete(&mut self, key: &str) -> Result<(), AppError> {
        let cleared = match self.class.assertion(key) {
            Some(assertion) if assertion.is_link() => assertion.default_value().cloned().unwrap_or_default(),
            _ => Value::Null,
        };
        if self.class.is_open() {
            self.values.remove(key);
            return Ok(());
        }
        self.set(key, cleared)
    }

    pub(crate) fn put(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub(crate) fn replace_values(&mut self, values: BTreeMap<String, Value>) {
        self.values = values;
    }

    pub fn id(&self) -> &Value {
        self.values.get(self.class.primary_key()).unwrap_or(&NULL)
    }

    pub fn name(&self) -> Option<&str> {
        self.values.get("name").and_then(|v| v.as_str())
    }

    /// Same class and same non-null primary key.
    pub fn same_record(&self, other: &Entity) -> bool {
        self.class.name() == other.class.name() && !self.id().is_null() && self.id() == other.id()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.class, self.id())
    }

    pub fn to_yaml(&self) -> Result<String, AppError> {
        Value::Hash(self.values.clone()).to_yaml_string()
    }

    pub fn from_yaml(class: &Arc<Class>, text: &str) -> Result<Entity, AppError> {
        match Value::from_yaml_str(text)? {
            Value::Hash(map) => Entity::construct(class, map),
            other => Err(AppError::Serialization(format!(
                "{} snapshot must be a mapping, found {}",
                class.name(),
                other.type_name()
            ))),
        }
    }
}

pub fn cache_key(class: &Class, id: &Value) -> String {
    format!("{}:{}", class.name(), id)
}

impl Validatable for Entity {
    fn validate(&self) -> Result<(), AppError> {
        if self.class.is_open() {
            return Ok(());
        }
        for (attr, assertion) in self.class.asserts() {
            assertion.test(attr, self.values.get(attr).unwrap_or(&NULL))?;
        }
        Ok(())
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        // an absent attribute reads as null
        self.class.name() == other.class.name()
            && self
                .values
                .keys()
                .chain(other.values.keys())
                .all(|k| self.values.get(k).unwrap_or(&NULL) == other.values.get(k).unwrap_or(&NULL))
    }
}
