use crate::assertion::{Assertion, AssertionBuilder, Kind, Unique};
use crate::entity::Entity;
use crate::error::AppError;
use crate::schema::Dialect;
use crate::storage::Store;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PRIMARY_KEY: &str = "id";
pub const DEFAULT_ROUND_ROBIN_CAPACITY: usize = 10;

pub const PARENT_ID: &str = "parent_id";
pub const ELEMENT_INDEX: &str = "element_index";
pub const ELEMENT_KEY: &str = "element_key";
pub const ELEMENT_VALUE: &str = "element_value";

/// Backing stores a class persists to.
#[derive(Clone, Debug)]
pub struct Features {
    pub relational: bool,
    pub flat_file: bool,
    pub history: bool,
    pub cache_ttl: Option<Duration>,
    pub engine: Dialect,
}

impl Default for Features {
    fn default() -> Self {
        Features { relational: true, flat_file: false, history: false, cache_ttl: None, engine: Dialect::Sqlite }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowPolicy {
    Standard,
    /// Fixed-capacity circular table, see [`crate::round_robin`].
    RoundRobin { capacity: usize },
}

/// Which column orders the elements of a link table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkSlot {
    Index,
    Key,
}

impl LinkSlot {
    pub fn column(&self) -> &'static str {
        match self {
            LinkSlot::Index => ELEMENT_INDEX,
            LinkSlot::Key => ELEMENT_KEY,
        }
    }
}

#[derive(Debug)]
pub struct Class {
    name: String,
    table: String,
    database: Option<String>,
    asserts: BTreeMap<String, Assertion>,
    primary_key: String,
    features: Features,
    is_abstract: bool,
    policy: RowPolicy,
    links: BTreeMap<String, Arc<Class>>,
    link_slot: Option<LinkSlot>,
    open: bool,
}

impl Class {
    pub fn builder(name: &str) -> ClassBuilder {
        ClassBuilder::new(name)
    }

    /// Schema-less container class: any key is accepted and nothing is validated.
    pub fn open(name: &str) -> Arc<Class> {
        Arc::new(Class {
            name: name.to_string(),
            table: snake_case(name),
            database: None,
            asserts: BTreeMap::new(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            features: Features { relational: false, ..Features::default() },
            is_abstract: false,
            policy: RowPolicy::Standard,
            links: BTreeMap::new(),
            link_slot: None,
            open: true,
        })
    }

    /// Element class of an array or hash attribute, keyed by the owning row's primary key.
    pub fn link(parent: &Class, attr: &str, element: &Assertion, slot: LinkSlot) -> Result<Arc<Class>, AppError> {
        let table = format!("{}_{}", parent.table, attr);
        let parent_ref = Assertion::reference_to(&parent.table, &parent.primary_key, parent.key_kind())
            .on_delete("CASCADE")
            .build()?;
        let slot_assertion = match slot {
            LinkSlot::Index => Assertion::int().min(0.0),
            LinkSlot::Key => Assertion::str(),
        }
        .unique_with(&[PARENT_ID])
        .build()?;

        let mut asserts = BTreeMap::new();
        asserts.insert(DEFAULT_PRIMARY_KEY.to_string(), Assertion::int().serial().optional().build()?);
        asserts.insert(PARENT_ID.to_string(), parent_ref);
        asserts.insert(slot.column().to_string(), slot_assertion);
        asserts.insert(ELEMENT_VALUE.to_string(), element.clone());

        let mut class = Class {
            name: table.clone(),
            table,
            database: parent.database.clone(),
            asserts,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            features: Features { engine: parent.features.engine, ..Features::default() },
            is_abstract: false,
            policy: RowPolicy::Standard,
            links: BTreeMap::new(),
            link_slot: Some(slot),
            open: false,
        };
        class.links = class.build_links()?;
        Ok(Arc::new(class))
    }

    fn build_links(&self) -> Result<BTreeMap<String, Arc<Class>>, AppError> {
        let mut links = BTreeMap::new();
        for (attr, assertion) in &self.asserts {
            let slot = match assertion.kind() {
                Kind::Array(_) => LinkSlot::Index,
                Kind::Hash(_) => LinkSlot::Key,
                _ => continue,
            };
            if let Some(element) = assertion.element() {
                links.insert(attr.clone(), Class::link(self, attr, element, slot)?);
            }
        }
        Ok(links)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn asserts(&self) -> &BTreeMap<String, Assertion> {
        &self.asserts
    }

    pub fn assertion(&self, attr: &str) -> Option<&Assertion> {
        self.asserts.get(attr)
    }

    pub fn has_asserts(&self) -> bool {
        !self.open
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn declares(&self, attr: &str) -> bool {
        self.open || self.asserts.contains_key(attr)
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Value kind of the primary key, used by references pointing at this class.
    pub fn key_kind(&self) -> Kind {
        match self.asserts.get(&self.primary_key).map(|a| a.kind()) {
            Some(Kind::Reference(reference)) => (*reference.key).clone(),
            Some(kind) => kind.clone(),
            None => Kind::Id,
        }
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn policy(&self) -> RowPolicy {
        self.policy
    }

    pub fn links(&self) -> &BTreeMap<String, Arc<Class>> {
        &self.links
    }

    pub fn link_class(&self, attr: &str) -> Option<&Arc<Class>> {
        self.links.get(attr)
    }

    pub fn link_slot(&self) -> Option<LinkSlot> {
        self.link_slot
    }

    /// Attributes stored as columns of this class's own table, in lexicographic order.
    pub fn inline_attributes(&self) -> impl Iterator<Item = (&String, &Assertion)> {
        self.asserts.iter().filter(|(_, a)| !a.is_link())
    }

    pub fn ensure_concrete(&self) -> Result<(), AppError> {
        if self.is_abstract {
            Err(AppError::ClassIsAbstract(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

pub struct ClassBuilder {
    name: String,
    table: Option<String>,
    database: Option<String>,
    attributes: Vec<(String, AssertionBuilder)>,
    primary_key: String,
    features: Features,
    is_abstract: bool,
    policy: RowPolicy,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            table: None,
            database: None,
            attributes: Vec::new(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            features: Features::default(),
            is_abstract: false,
            policy: RowPolicy::Standard,
        }
    }

    pub fn attribute(mut self, name: &str, assertion: AssertionBuilder) -> Self {
        self.attributes.push((name.to_string(), assertion));
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn primary_key(mut self, attr: &str) -> Self {
        self.primary_key = attr.to_string();
        self
    }

    pub fn relational(mut self, on: bool) -> Self {
        self.features.relational = on;
        self
    }

    pub fn flat_file(mut self, on: bool) -> Self {
        self.features.flat_file = on;
        self
    }

    pub fn history(mut self, on: bool) -> Self {
        self.features.history = on;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.features.cache_ttl = Some(ttl);
        self
    }

    pub fn engine(mut self, dialect: Dialect) -> Self {
        self.features.engine = dialect;
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn round_robin(mut self, capacity: usize) -> Self {
        self.policy = RowPolicy::RoundRobin { capacity };
        self
    }

    fn base_attributes(&self) -> Vec<(&'static str, AssertionBuilder)> {
        let mut base = vec![
            ("ctime", Assertion::datetime().optional()),
            ("mtime", Assertion::datetime().optional()),
        ];
        match self.policy {
            RowPolicy::Standard => {
                base.push(("id", Assertion::id().optional()));
                base.push(("name", Assertion::str().unique()));
            }
            RowPolicy::RoundRobin { .. } => {
                base.push(("id", Assertion::int().optional()));
                base.push(("modulo", Assertion::int().optional().unique()));
                base.push(("name", Assertion::str().optional()));
                base.push(("value", Assertion::float().optional()));
                base.push(("message", Assertion::text().optional()));
                base.push(("state", Assertion::str().optional()));
            }
        }
        base
    }

    pub fn build(self) -> Result<Arc<Class>, AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidArgument("class name must not be empty".into()));
        }
        if let RowPolicy::RoundRobin { capacity } = self.policy {
            if capacity == 0 {
                return Err(AppError::InvalidArgument(format!("round-robin class `{}` needs a capacity of at least 1", self.name)));
            }
            if self.features.flat_file {
                return Err(AppError::InvalidArgument(format!("round-robin class `{}` cannot use the flat-file store", self.name)));
            }
        }

        let mut asserts = BTreeMap::new();
        for (attr, builder) in self.base_attributes() {
            asserts.insert(attr.to_string(), builder.build()?);
        }
        for (attr, builder) in self.attributes {
            let assertion = builder
                .build()
                .map_err(|e| AppError::InvalidArgument(format!("{}.{attr}: {e}", self.name)))?;
            asserts.insert(attr, assertion);
        }

        match asserts.get(&self.primary_key) {
            None => {
                return Err(AppError::InvalidArgument(format!(
                    "primary key `{}` is not an attribute of `{}`",
                    self.primary_key, self.name
                )))
            }
            Some(pk) if pk.is_link() => {
                return Err(AppError::InvalidArgument(format!("primary key `{}` cannot be a collection", self.primary_key)))
            }
            Some(_) => {}
        }
        for (attr, assertion) in &asserts {
            if let Unique::With(peers) = assertion.unique() {
                if let Some(missing) = peers.iter().find(|p| !asserts.contains_key(p.as_str())) {
                    return Err(AppError::InvalidArgument(format!("`{attr}` is unique with unknown attribute `{missing}`")));
                }
            }
        }

        let mut class = Class {
            table: self.table.unwrap_or_else(|| snake_case(&self.name)),
            name: self.name,
            database: self.database,
            asserts,
            primary_key: self.primary_key,
            features: self.features,
            is_abstract: self.is_abstract,
            policy: self.policy,
            links: BTreeMap::new(),
            link_slot: None,
            open: false,
        };
        class.links = class.build_links()?;
        Ok(Arc::new(class))
    }
}

/// `WidgetPart` -> `widget_part`, `HTTPServer` -> `http_server`, `a::B` -> `a_b`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Registration emitted by `#[prototype]` for every declared class.
pub struct ClassInfo {
    pub name: &'static str,
    pub declare: fn() -> Result<Arc<Class>, AppError>,
}

inventory::collect!(ClassInfo);

/// Declares every class registered through `#[prototype]`, sorted by name.
pub fn registered_classes() -> Result<Vec<Arc<Class>>, AppError> {
    let mut infos: Vec<&ClassInfo> = inventory::iter::<ClassInfo>.into_iter().collect();
    infos.sort_by_key(|info| info.name);
    infos.into_iter().map(|info| (info.declare)()).collect()
}

pub trait Validatable {
    fn validate(&self) -> Result<(), AppError>;
}

/// Schema derivation for a declared class.
pub trait Introspectable {
    fn create_table_sql(&self, dialect: Dialect) -> Result<String, AppError>;
    fn create_statements(&self, dialect: Dialect) -> Result<Vec<String>, AppError>;
}

/// Typed entity wrappers generated by `#[prototype]`.
pub trait Persistable: Sized {
    fn class() -> Result<Arc<Class>, AppError>;
    fn from_entity(entity: Entity) -> Result<Self, AppError>;
    fn entity(&self) -> &Entity;
    fn entity_mut(&mut self) -> &mut Entity;

    fn into_entity(self) -> Entity;

    fn save(&mut self, store: &Store) -> Result<(), AppError> {
        store.save(self.entity_mut())
    }

    fn save_with_comment(&mut self, store: &Store, comment: &str) -> Result<(), AppError> {
        store.save_with_comment(self.entity_mut(), Some(comment))
    }

    fn load(store: &Store, id: impl Into<Value>) -> Result<Self, AppError> {
        Self::from_entity(store.load(&Self::class()?, &id.into())?)
    }

    fn load_by_name(store: &Store, name: &str) -> Result<Self, AppError> {
        Self::from_entity(store.load_by_name(&Self::class()?, name)?)
    }

    fn spawn(store: &Store, name: &str) -> Result<Self, AppError> {
        Self::from_entity(store.spawn(&Self::class()?, name)?)
    }

    fn remove(&mut self, store: &Store) -> Result<(), AppError> {
        store.remove(self.entity_mut())
    }

    fn ids(store: &Store) -> Result<Vec<Value>, AppError> {
        store.ids(&Self::class()?)
    }
}
