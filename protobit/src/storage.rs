pub mod flatfile;
pub mod history;
pub mod link;
pub mod row;
pub mod session;

use crate::assertion::{Assertion, Kind};
use crate::cache::{self, CacheService, CachedEntity, MemoryCache};
use crate::class::{registered_classes, Class, Introspectable, RowPolicy, Validatable, PARENT_ID};
use crate::config::Config;
use crate::entity::{cache_key, Entity};
use crate::error::{AppError, ErrorKind};
use crate::round_robin;
use crate::schema::{reconcile_sqlite, Dialect, Drift, ReconcileMode};
use crate::value::Value;
use chrono::Utc;
use flatfile::FlatFileStore;
use history::{FileHistory, RcsCommand, RevisionControl};
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use session::{Connector, Session, SqliteConnector};
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_COMMENT: &str = "saved";

/// Persistence engine: relational rows and link tables, the entity cache, and YAML flat files.
///
/// A `Store` owns its connections and is meant to be used from one worker thread; run one store
/// per worker for parallelism.
pub struct Store {
    config: Config,
    session: Session,
    cache: Box<dyn CacheService>,
    flat: FlatFileStore,
    history: Box<dyn RevisionControl>,
}

fn columns_of(class: &Class) -> Vec<(String, Assertion)> {
    class.inline_attributes().map(|(attr, a)| (attr.clone(), a.clone())).collect()
}

fn key_assertion(class: &Class) -> Result<&Assertion, AppError> {
    class
        .assertion(class.primary_key())
        .ok_or_else(|| AppError::InvalidArgument(format!("{} has no primary key attribute", class.name())))
}

fn not_found(class: &Class, id: &Value) -> AppError {
    AppError::ObjectNotFound(format!("{} with id {id}", class.name()))
}

impl Store {
    pub fn open(config: Config) -> Result<Store, AppError> {
        config.validate()?;
        if config.engine != Dialect::Sqlite {
            return Err(AppError::InvalidArgument(format!("no driver for the {:?} engine", config.engine)));
        }
        let connector = SqliteConnector::new(config.sqlite_dir.clone());
        Store::with_connector(config, Box::new(connector))
    }

    pub fn with_connector(config: Config, connector: Box<dyn Connector>) -> Result<Store, AppError> {
        config.validate()?;
        if !config.cache_servers.is_empty() {
            info!("cache servers {:?} configured, using the in-process cache", config.cache_servers);
        }
        let session = Session::new(connector, config.reconnect_attempts, config.reconnect_delay());
        let flat = FlatFileStore::new(
            config.yaml_root.clone(),
            config.scratch_root.clone(),
            config.lock_timeout(),
            config.lock_poll(),
        );
        let history: Box<dyn RevisionControl> = match &config.rcs_bin {
            Some(bin) => Box::new(RcsCommand::new(Some(bin.clone()))),
            None => Box::new(FileHistory),
        };
        Ok(Store {
            cache: Box::new(MemoryCache::new(config.cache_capacity)),
            config,
            session,
            flat,
            history,
        })
    }

    pub fn with_cache(mut self, cache: impl CacheService + 'static) -> Self {
        self.cache = Box::new(cache);
        self
    }

    pub fn with_history(mut self, history: impl RevisionControl + 'static) -> Self {
        self.history = Box::new(history);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn flat_files(&self) -> &FlatFileStore {
        &self.flat
    }

    pub fn history(&self) -> &dyn RevisionControl {
        self.history.as_ref()
    }

    fn database<'a>(&'a self, class: &'a Class) -> &'a str {
        class.database().unwrap_or(&self.config.database)
    }

    fn quote(&self, ident: &str) -> String {
        self.session.dialect().quote_ident(ident)
    }

    /// Creates the class table and its link tables, then checks them with the configured reconcile mode.
    pub fn create_table(&self, class: &Class) -> Result<Vec<Drift>, AppError> {
        class.ensure_concrete()?;
        if !class.features().relational {
            debug!("{} has no relational store, nothing to create", class.name());
            return Ok(Vec::new());
        }
        let database = self.database(class);
        for statement in class.create_statements(self.session.dialect())? {
            self.session.execute_batch(database, &statement)?;
        }
        self.check_schema(class, self.config.reconcile)
    }

    /// Creates tables for every class declared through `#[prototype]`.
    pub fn create_registered_tables(&self) -> Result<Vec<Arc<Class>>, AppError> {
        let mut created = Vec::new();
        for class in registered_classes()? {
            if class.is_abstract() || !class.features().relational {
                continue;
            }
            self.create_table(&class)?;
            created.push(class);
        }
        Ok(created)
    }

    /// Drift of the class table and its link tables, repaired when `mode` allows it.
    pub fn check_schema(&self, class: &Class, mode: ReconcileMode) -> Result<Vec<Drift>, AppError> {
        let mut drift = self
            .session
            .with_conn(self.database(class), |conn| reconcile_sqlite(conn, class, mode))?;
        for link in class.links().values() {
            drift.extend(self.check_schema(link, mode)?);
        }
        Ok(drift)
    }

    pub fn save(&self, entity: &mut Entity) -> Result<(), AppError> {
        self.save_with_comment(entity, None)
    }

    /// Writes `entity` to every backing store of its class. On failure the entity gets back its
    /// pre-save id and timestamps.
    pub fn save_with_comment(&self, entity: &mut Entity, comment: Option<&str>) -> Result<(), AppError> {
        let class = Arc::clone(entity.class());
        class.ensure_concrete()?;
        let features = class.features();
        if !features.relational && !features.flat_file {
            return Err(AppError::InvalidArgument(format!("{} has no backing store", class.name())));
        }
        entity.validate()?;

        let snapshot = entity.values().clone();
        let result = self.write(&class, entity, comment.unwrap_or(DEFAULT_COMMENT));
        if result.is_err() {
            entity.replace_values(snapshot);
        }
        result
    }

    fn write(&self, class: &Arc<Class>, entity: &mut Entity, comment: &str) -> Result<(), AppError> {
        let now = Value::DateTime(Utc::now());
        if class.declares("mtime") {
            entity.put("mtime", now.clone());
        }
        if class.declares("ctime") && entity.get("ctime")?.is_null() {
            entity.put("ctime", now);
        }
        let features = class.features();
        let mut _serial_lock = None;
        if entity.id().is_null() {
            match class.key_kind() {
                Kind::Id => entity.put(class.primary_key(), Value::Str(uuid::Uuid::new_v4().to_string())),
                Kind::Str | Kind::Text if !features.relational => {
                    entity.put(class.primary_key(), Value::Str(uuid::Uuid::new_v4().to_string()))
                }
                Kind::Int if !features.relational => {
                    let (next, lock) = self.flat.allocate_serial(class)?;
                    entity.put(class.primary_key(), next);
                    _serial_lock = Some(lock);
                }
                _ => {}
            }
        }
        if !entity.id().is_null() {
            self.cache.delete(&entity.cache_key());
        }

        if !features.relational {
            return self.write_file(entity, comment);
        }
        let database = self.database(class);
        self.session.transaction(database, || {
            match class.policy() {
                RowPolicy::Standard => self.write_row(database, entity)?,
                RowPolicy::RoundRobin { .. } => {
                    if let Some(evicted) = round_robin::evicted(&self.session, database, class)? {
                        for link_class in class.links().values() {
                            self.delete_links(database, link_class, &evicted)?;
                        }
                    }
                    round_robin::write(&self.session, database, entity)?;
                    self.write_links(database, entity)?;
                }
            }
            if features.flat_file {
                self.write_file(entity, comment)?;
            }
            Ok(())
        })
    }

    fn write_file(&self, entity: &Entity, comment: &str) -> Result<(), AppError> {
        let history = entity.class().features().history.then_some((self.history.as_ref(), comment));
        self.flat.write(entity, history).map(|_| ())
    }

    /// UPDATE by primary key, INSERT when nothing matched, then rewrite every link table.
    fn write_row(&self, database: &str, entity: &mut Entity) -> Result<(), AppError> {
        let class = Arc::clone(entity.class());
        let pk = class.primary_key();
        let pk_assertion = key_assertion(&class)?;
        let table = self.quote(class.table());
        let columns = columns_of(&class);

        let mut updated = false;
        if !entity.id().is_null() {
            let mut sets = Vec::new();
            let mut params = Vec::new();
            for (attr, assertion) in columns.iter().filter(|(attr, _)| attr != pk) {
                match assertion.sql_update() {
                    Some(expr) => sets.push(format!("{} = {expr}", self.quote(attr))),
                    None => {
                        sets.push(format!("{} = ?", self.quote(attr)));
                        params.push(row::to_sql(assertion, entity.get(attr)?)?);
                    }
                }
            }
            updated = if sets.is_empty() {
                self.row_exists(database, &class, entity.id())?
            } else {
                params.push(row::to_sql(pk_assertion, entity.id())?);
                let sql = format!("UPDATE {table} SET {} WHERE {} = ?", sets.join(", "), self.quote(pk));
                self.session.execute(database, &sql, &params)? > 0
            };
        }

        if !updated {
            let mut names = Vec::new();
            let mut values = Vec::new();
            let mut params = Vec::new();
            for (attr, assertion) in &columns {
                let value = entity.get(attr)?;
                if let Some(expr) = assertion.sql_insert() {
                    names.push(self.quote(attr));
                    values.push(expr.to_string());
                } else if !(assertion.is_serial() && value.is_null()) {
                    names.push(self.quote(attr));
                    values.push("?".to_string());
                    params.push(row::to_sql(assertion, value)?);
                }
            }
            let sql = format!("INSERT INTO {table} ({}) VALUES ({})", names.join(", "), values.join(", "));
            let rowid = self.session.insert(database, &sql, &params)?;
            if entity.id().is_null() && pk_assertion.is_serial() {
                entity.put(pk, Value::Int(rowid));
            }
        }

        let computed: Vec<(String, Assertion)> = columns
            .iter()
            .filter(|(_, a)| a.sql_insert().is_some() || a.sql_update().is_some())
            .cloned()
            .collect();
        if !computed.is_empty() {
            let fresh = self
                .select_row(database, &class, &computed, entity.id())?
                .ok_or_else(|| not_found(&class, entity.id()))?;
            for (attr, value) in fresh {
                entity.put(&attr, value);
            }
        }

        self.write_links(database, entity)
    }

    /// Replaces the link rows of every collection attribute with the entity's current elements.
    fn write_links(&self, database: &str, entity: &Entity) -> Result<(), AppError> {
        for (attr, link_class) in entity.class().links() {
            let collection = entity.get(attr)?;
            self.delete_links(database, link_class, entity.id())?;
            for (slot, element) in link::decompose(link_class, collection)? {
                let mut element_row = link::element_row(link_class, entity.id(), slot, element)?;
                self.write_row(database, &mut element_row)?;
            }
        }
        Ok(())
    }

    /// Deletes the rows of `link_class` owned by `parent_id`, grandchildren first.
    fn delete_links(&self, database: &str, link_class: &Class, parent_id: &Value) -> Result<(), AppError> {
        let parent = link_class
            .assertion(PARENT_ID)
            .ok_or_else(|| AppError::InvalidArgument(format!("`{}` is not a link class", link_class.name())))?;
        let param = row::to_sql(parent, parent_id)?;
        if !link_class.links().is_empty() {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} = ?",
                self.quote(link_class.primary_key()),
                self.quote(link_class.table()),
                self.quote(PARENT_ID)
            );
            for child in self.single_column(database, &sql, &[param.clone()], key_assertion(link_class)?)? {
                for grandchild in link_class.links().values() {
                    self.delete_links(database, grandchild, &child)?;
                }
            }
        }
        let sql = format!("DELETE FROM {} WHERE {} = ?", self.quote(link_class.table()), self.quote(PARENT_ID));
        self.session.execute(database, &sql, &[param])?;
        Ok(())
    }

    fn select_row(
        &self,
        database: &str,
        class: &Class,
        columns: &[(String, Assertion)],
        id: &Value,
    ) -> Result<Option<BTreeMap<String, Value>>, AppError> {
        let names: Vec<String> = columns.iter().map(|(attr, _)| self.quote(attr)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            names.join(", "),
            self.quote(class.table()),
            self.quote(class.primary_key())
        );
        let params = [row::to_sql(key_assertion(class)?, id)?];
        Ok(self.session.query(database, &sql, &params, |r| row::read_columns(r, columns))?.pop())
    }

    /// Row of `class` with its collections reassembled from the link tables.
    fn marshal(&self, database: &str, class: &Class, id: &Value) -> Result<Option<BTreeMap<String, Value>>, AppError> {
        let Some(mut values) = self.select_row(database, class, &columns_of(class), id)? else {
            return Ok(None);
        };
        for (attr, link_class) in class.links() {
            values.insert(attr.clone(), self.marshal_links(database, link_class, id)?);
        }
        Ok(Some(values))
    }

    fn marshal_links(&self, database: &str, link_class: &Class, parent_id: &Value) -> Result<Value, AppError> {
        let slot = link_class
            .link_slot()
            .ok_or_else(|| AppError::InvalidArgument(format!("`{}` is not a link class", link_class.name())))?;
        let parent = link_class
            .assertion(PARENT_ID)
            .ok_or_else(|| AppError::InvalidArgument(format!("`{}` has no {PARENT_ID}", link_class.name())))?;
        let columns = columns_of(link_class);
        let names: Vec<String> = columns.iter().map(|(attr, _)| self.quote(attr)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY {}",
            names.join(", "),
            self.quote(link_class.table()),
            self.quote(PARENT_ID),
            self.quote(slot.column())
        );
        let mut rows =
            self.session
                .query(database, &sql, &[row::to_sql(parent, parent_id)?], |r| row::read_columns(r, &columns))?;
        if !link_class.links().is_empty() {
            for element in rows.iter_mut() {
                let element_id = element.get(link_class.primary_key()).cloned().unwrap_or_default();
                for (attr, grandchild) in link_class.links() {
                    element.insert(attr.clone(), self.marshal_links(database, grandchild, &element_id)?);
                }
            }
        }
        link::assemble(link_class, rows)
    }

    fn single_column(
        &self,
        database: &str,
        sql: &str,
        params: &[SqlValue],
        assertion: &Assertion,
    ) -> Result<Vec<Value>, AppError> {
        self.session.query(database, sql, params, |r| {
            let raw = r
                .get_ref(0)
                .map_err(|source| AppError::DbQueryFailed { statement: sql.to_string(), source })?;
            row::from_sql(assertion, raw)
        })
    }

    fn row_exists(&self, database: &str, class: &Class, id: &Value) -> Result<bool, AppError> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ? LIMIT 1",
            self.quote(class.table()),
            self.quote(class.primary_key())
        );
        let params = [row::to_sql(key_assertion(class)?, id)?];
        Ok(!self.session.query(database, &sql, &params, |_| Ok(()))?.is_empty())
    }

    fn normalize_id(class: &Class, id: &Value) -> Result<Value, AppError> {
        let id = match class.assertion(class.primary_key()) {
            Some(assertion) => assertion.coerce(id.clone()),
            None => id.clone(),
        };
        if id.is_null() {
            return Err(AppError::InvalidArgument(format!("{} cannot be looked up by a null id", class.name())));
        }
        Ok(id)
    }

    /// Fresh cache entry if the class caches, else the relational row, else the flat file.
    pub fn load(&self, class: &Arc<Class>, id: &Value) -> Result<Entity, AppError> {
        let id = Store::normalize_id(class, id)?;
        let key = cache_key(class, &id);
        let ttl = class.features().cache_ttl;
        if ttl.is_some() {
            if let Some(values) = cache::lookup(self.cache.as_ref(), &key, class.name()) {
                return Ok(Entity::restore(class, values));
            }
        }

        let entity = if class.features().relational {
            let values = self
                .marshal(self.database(class), class, &id)?
                .ok_or_else(|| not_found(class, &id))?;
            Entity::restore(class, values)
        } else if class.features().flat_file {
            self.flat.read(class, &id)?
        } else {
            return Err(AppError::InvalidArgument(format!("{} has no backing store", class.name())));
        };

        if ttl.is_some() {
            match CachedEntity::of(&entity).encode() {
                Ok(bytes) => self.cache.set(&key, bytes, ttl),
                Err(e) => warn!("not caching {key}: {e}"),
            }
        }
        Ok(entity)
    }

    pub fn load_by_name(&self, class: &Arc<Class>, name: &str) -> Result<Entity, AppError> {
        let name_assertion = class
            .assertion("name")
            .ok_or_else(|| AppError::InvalidArgument(format!("{} has no name attribute", class.name())))?;
        if class.features().relational {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} = ? LIMIT 1",
                self.quote(class.primary_key()),
                self.quote(class.table()),
                self.quote("name")
            );
            let params = [row::to_sql(name_assertion, &Value::from(name))?];
            let id = self
                .single_column(self.database(class), &sql, &params, key_assertion(class)?)?
                .pop()
                .ok_or_else(|| AppError::ObjectNotFound(format!("{} named `{name}`", class.name())))?;
            self.load(class, &id)
        } else {
            self.flat
                .find_by_name(class, name)?
                .ok_or_else(|| AppError::ObjectNotFound(format!("{} named `{name}`", class.name())))
        }
    }

    /// The stored entity named `name`, or an unsaved default-populated one carrying that name.
    pub fn spawn(&self, class: &Arc<Class>, name: &str) -> Result<Entity, AppError> {
        class.ensure_concrete()?;
        match self.load_by_name(class, name) {
            Err(e) if e.kind() == ErrorKind::ObjectNotFound => {
                debug!("spawning new {} named `{name}`", class.name());
                let mut entity = Entity::proto(class);
                entity.set("name", name)?;
                Ok(entity)
            }
            other => other,
        }
    }

    /// Deletes the entity from every backing store and clears it. Revision files are kept.
    pub fn remove(&self, entity: &mut Entity) -> Result<(), AppError> {
        let class = Arc::clone(entity.class());
        let id = entity.id().clone();
        if id.is_null() || !self.id_exists(&class, &id)? {
            return Err(not_found(&class, &id));
        }
        self.cache.delete(&cache_key(&class, &id));

        if class.features().relational {
            let database = self.database(&class);
            self.session.transaction(database, || {
                for link_class in class.links().values() {
                    self.delete_links(database, link_class, &id)?;
                }
                let sql = format!("DELETE FROM {} WHERE {} = ?", self.quote(class.table()), self.quote(class.primary_key()));
                self.session.execute(database, &sql, &[row::to_sql(key_assertion(&class)?, &id)?])?;
                if class.features().flat_file {
                    match self.flat.remove(&class, &id) {
                        Err(e) if e.kind() == ErrorKind::ObjectNotFound => warn!("{} {id} had no flat file", class.name()),
                        other => other?,
                    }
                }
                Ok(())
            })?;
        } else {
            self.flat.remove(&class, &id)?;
        }
        entity.clear();
        Ok(())
    }

    /// Every stored primary key, in key order.
    pub fn ids(&self, class: &Arc<Class>) -> Result<Vec<Value>, AppError> {
        if !class.features().relational {
            return self.flat.ids(class);
        }
        let pk = self.quote(class.primary_key());
        let sql = format!("SELECT {pk} FROM {} ORDER BY {pk}", self.quote(class.table()));
        self.single_column(self.database(class), &sql, &[], key_assertion(class)?)
    }

    /// Every stored name, sorted.
    pub fn names(&self, class: &Arc<Class>) -> Result<Vec<String>, AppError> {
        if !class.declares("name") {
            return Err(AppError::InvalidArgument(format!("{} has no name attribute", class.name())));
        }
        let values = if class.features().relational {
            let name = self.quote("name");
            let sql = format!("SELECT {name} FROM {} ORDER BY {name}", self.quote(class.table()));
            self.single_column(self.database(class), &sql, &[], &Assertion::str().optional().build()?)?
        } else {
            let mut names = Vec::new();
            for id in self.flat.ids(class)? {
                names.push(self.flat.read(class, &id)?.get("name")?.clone());
            }
            names
        };
        let mut names: Vec<String> = values.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        names.sort();
        Ok(names)
    }

    pub fn count(&self, class: &Arc<Class>) -> Result<usize, AppError> {
        if !class.features().relational {
            return Ok(self.flat.ids(class)?.len());
        }
        let sql = format!("SELECT COUNT(*) FROM {}", self.quote(class.table()));
        let counts = self.single_column(self.database(class), &sql, &[], &Assertion::int().build()?)?;
        Ok(counts.first().and_then(|v| v.as_i64()).unwrap_or(0) as usize)
    }

    pub fn id_exists(&self, class: &Arc<Class>, id: &Value) -> Result<bool, AppError> {
        let id = Store::normalize_id(class, id)?;
        if class.features().relational {
            self.row_exists(self.database(class), class, &id)
        } else {
            self.flat.exists(class, &id)
        }
    }

    pub fn name_exists(&self, class: &Arc<Class>, name: &str) -> Result<bool, AppError> {
        match self.load_by_name(class, name) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::ObjectNotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    fn widget() -> Arc<Class> {
        Class::builder("Widget")
            .attribute("count", Assertion::int().min(0.0).max(100.0).default(0))
            .attribute("tags", Assertion::array(Assertion::str()))
            .attribute("labels", Assertion::hash(Assertion::int()))
            .build()
            .unwrap()
    }

    fn store() -> Store {
        Store::open(Config::default()).unwrap()
    }

    #[test]
    fn insert_then_update_in_place() {
        let store = store();
        let class = widget();
        store.create_table(&class).unwrap();

        let mut w = Entity::construct(&class, [("name", Value::from("a")), ("count", Value::Int(3))]).unwrap();
        store.save(&mut w).unwrap();
        assert!(!w.id().is_null());
        assert!(!w.get("ctime").unwrap().is_null());
        let ctime = w.get("ctime").unwrap().clone();

        w.set("count", 4).unwrap();
        store.save(&mut w).unwrap();
        assert_eq!(store.count(&class).unwrap(), 1);
        assert_eq!(w.get("ctime").unwrap(), &ctime);
        assert_eq!(store.load(&class, w.id()).unwrap().get("count").unwrap(), &Value::Int(4));
    }

    #[test]
    fn collections_come_back_in_order() {
        let store = store();
        let class = widget();
        store.create_table(&class).unwrap();

        let tags = Value::from(vec!["z", "a", "m"]);
        let mut labels = BTreeMap::new();
        labels.insert("x".to_string(), Value::Int(1));
        labels.insert("y".to_string(), Value::Int(2));
        let mut w = Entity::construct(
            &class,
            [("name", Value::from("c")), ("tags", tags.clone()), ("labels", Value::Hash(labels.clone()))],
        )
        .unwrap();
        store.save(&mut w).unwrap();
        let loaded = store.load(&class, w.id()).unwrap();
        assert_eq!(loaded.get("tags").unwrap(), &tags);
        assert_eq!(loaded.get("labels").unwrap(), &Value::Hash(labels));
        assert_eq!(loaded, w);

        w.set("tags", Value::from(vec!["only"])).unwrap();
        store.save(&mut w).unwrap();
        assert_eq!(store.load(&class, w.id()).unwrap().get("tags").unwrap(), &Value::from(vec!["only"]));
    }

    #[test]
    fn missing_rows_and_names() {
        let store = store();
        let class = widget();
        store.create_table(&class).unwrap();
        let err = store.load(&class, &Value::from(uuid::Uuid::new_v4().to_string())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
        assert_eq!(store.load_by_name(&class, "nobody").unwrap_err().kind(), ErrorKind::ObjectNotFound);

        let spawned = store.spawn(&class, "nobody").unwrap();
        assert!(spawned.id().is_null());
        assert_eq!(spawned.name(), Some("nobody"));
        assert_eq!(store.count(&class).unwrap(), 0);
        assert!(!store.name_exists(&class, "nobody").unwrap());
    }

    #[test]
    fn remove_clears_rows_links_and_entity() {
        let store = store();
        let class = widget();
        store.create_table(&class).unwrap();
        let mut w = Entity::construct(&class, [("name", Value::from("r")), ("tags", Value::from(vec!["t"]))]).unwrap();
        store.save(&mut w).unwrap();
        let id = w.id().clone();

        store.remove(&mut w).unwrap();
        assert!(w.values().is_empty());
        assert!(!store.id_exists(&class, &id).unwrap());
        let links = store
            .session()
            .query("protobit", "SELECT COUNT(*) FROM widget_tags", &[], |r| Ok(r.get::<_, i64>(0).unwrap()))
            .unwrap();
        assert_eq!(links, vec![0]);

        let mut again = Entity::construct(&class, [("name", Value::from("r"))]).unwrap();
        assert_eq!(store.remove(&mut again).unwrap_err().kind(), ErrorKind::ObjectNotFound);
    }

    #[test]
    fn failed_save_restores_identity() {
        let store = store();
        let class = widget();
        store.create_table(&class).unwrap();
        let mut first = Entity::construct(&class, [("name", Value::from("dup"))]).unwrap();
        store.save(&mut first).unwrap();

        let mut second = Entity::construct(&class, [("name", Value::from("dup"))]).unwrap();
        let err = store.save(&mut second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert!(second.id().is_null());
        assert!(second.get("mtime").unwrap().is_null());
    }

    #[test]
    fn cached_classes_read_through_the_cache() {
        let store = store();
        let class = Class::builder("Cached")
            .attribute("count", Assertion::int().default(0))
            .cache_ttl(Duration::from_secs(60))
            .build()
            .unwrap();
        store.create_table(&class).unwrap();
        let mut c = Entity::construct(&class, [("name", Value::from("k"))]).unwrap();
        store.save(&mut c).unwrap();
        store.load(&class, c.id()).unwrap();

        store
            .session()
            .execute("protobit", "UPDATE cached SET count = 9", &[])
            .unwrap();
        assert_eq!(store.load(&class, c.id()).unwrap().get("count").unwrap(), &Value::Int(0));

        c.set("count", 5).unwrap();
        store.save(&mut c).unwrap();
        assert_eq!(store.load(&class, c.id()).unwrap().get("count").unwrap(), &Value::Int(5));

        let uncached = Store::open(Config::default()).unwrap().with_cache(NoCache);
        uncached.create_table(&class).unwrap();
        assert!(uncached.ids(&class).unwrap().is_empty());
    }

    #[test]
    fn abstract_and_storeless_classes_are_refused() {
        let store = store();
        let base = Class::builder("Base").abstract_class().build().unwrap();
        let mut e = Entity::proto(&base);
        assert_eq!(store.save(&mut e).unwrap_err().kind(), ErrorKind::ClassIsAbstract);

        let open = Class::open("Bag");
        let mut bag = Entity::construct(&open, [("anything", Value::Int(1))]).unwrap();
        assert_eq!(store.save(&mut bag).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    struct Dropping {
        dir: std::path::PathBuf,
        failures: Rc<Cell<usize>>,
    }

    impl Connector for Dropping {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn connect(&self, database: &str) -> Result<rusqlite::Connection, AppError> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                let source = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN), None);
                return Err(AppError::DbConnectFailed { database: database.to_string(), source });
            }
            SqliteConnector::new(Some(self.dir.clone())).connect(database)
        }
    }

    #[test]
    fn saves_and_loads_survive_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let failures = Rc::new(Cell::new(0));
        let connector = Dropping { dir: dir.path().to_path_buf(), failures: Rc::clone(&failures) };
        let config = Config { reconnect_delay_millis: 0, ..Config::default() };
        let store = Store::with_connector(config, Box::new(connector)).unwrap();
        let class = widget();
        store.create_table(&class).unwrap();
        let mut w = Entity::construct(&class, [("name", Value::from("a")), ("tags", Value::from(vec!["x"]))]).unwrap();
        store.save(&mut w).unwrap();

        store.session().disconnect("protobit");
        failures.set(2);
        assert_eq!(store.load(&class, w.id()).unwrap(), w);
        assert_eq!(failures.get(), 0);

        let before = w.clone();
        store.session().disconnect("protobit");
        failures.set(3);
        w.set("count", 9).unwrap();
        let err = store.save(&mut w).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DbConnectFailed);
        assert_eq!(w.get("mtime").unwrap(), before.get("mtime").unwrap());
        assert_eq!(store.session().depth(), 0);
        assert_eq!(failures.get(), 0);
        assert_eq!(store.load(&class, w.id()).unwrap(), before);
    }
}
