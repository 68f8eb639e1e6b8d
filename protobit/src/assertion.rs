//! Declarative attribute contracts.
//!
//! An [`Assertion`] pairs a value [`Kind`] with a set of [`Rule`]s. Every attribute write is run
//! through [`Assertion::test`], and the same metadata drives column types, unique keys and
//! foreign keys in the schema synthesizer.

use crate::class::Class;
use crate::error::AppError;
use crate::value::{parse_datetime, Value};
use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const MAX_VARCHAR: usize = 1024;

pub type AllowedFn = Arc<dyn Fn() -> Vec<Value> + Send + Sync>;

#[derive(Clone, Debug)]
pub enum Kind {
    Str,
    Text,
    Int,
    Float,
    Bool,
    DateTime,
    /// GUID string identifier.
    Id,
    /// Free-form value, stored as YAML text.
    Any,
    Array(Box<Assertion>),
    Hash(Box<Assertion>),
    Reference(Reference),
}

impl Kind {
    /// Array and hash attributes live in link tables instead of inline columns.
    pub fn is_link(&self) -> bool {
        matches!(self, Kind::Array(_) | Kind::Hash(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kind::Str => "string",
            Kind::Text => "text",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Bool => "bool",
            Kind::DateTime => "datetime",
            Kind::Id => "id",
            Kind::Any => "any",
            Kind::Array(_) => "array",
            Kind::Hash(_) => "hash",
            Kind::Reference(_) => "reference",
        }
    }

    fn default_column_type(&self, max_size: Option<usize>) -> String {
        match self {
            Kind::Str => format!("VARCHAR({})", max_size.filter(|n| *n > 0 && *n < MAX_VARCHAR).unwrap_or(MAX_VARCHAR)),
            Kind::Text | Kind::Any => "TEXT".to_string(),
            Kind::Int => "INT(11)".to_string(),
            Kind::Float => "DOUBLE".to_string(),
            Kind::Bool => "TINYINT(1)".to_string(),
            Kind::DateTime => "DATETIME".to_string(),
            Kind::Id => "CHAR(36)".to_string(),
            Kind::Reference(reference) => reference.key.default_column_type(None),
            Kind::Array(_) | Kind::Hash(_) => String::new(),
        }
    }

    fn structure_ok(&self, value: &Value) -> bool {
        match (self, value) {
            (Kind::Any, _) => true,
            (Kind::Str | Kind::Text, Value::Str(_)) => true,
            (Kind::Int, Value::Int(_)) => true,
            (Kind::Float, Value::Int(_) | Value::Float(_)) => true,
            (Kind::Bool, Value::Bool(_)) => true,
            (Kind::DateTime, Value::DateTime(_)) => true,
            (Kind::Id, Value::Str(s)) => uuid::Uuid::parse_str(s).is_ok(),
            (Kind::Array(_), Value::Array(_)) => true,
            (Kind::Hash(_), Value::Hash(_)) => true,
            (Kind::Reference(reference), v) => reference.key.structure_ok(v),
            _ => false,
        }
    }

    fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (Kind::Float, Value::Int(i)) => Value::Float(i as f64),
            (Kind::Float, Value::Str(s)) => match s.trim().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => Value::Str(s),
            },
            (Kind::Int, Value::Str(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Str(s),
            },
            (Kind::Bool, Value::Int(i)) if i == 0 || i == 1 => Value::Bool(i == 1),
            (Kind::Bool, Value::Str(s)) => match s.as_str() {
                "1" | "true" => Value::Bool(true),
                "0" | "false" => Value::Bool(false),
                _ => Value::Str(s),
            },
            (Kind::Str | Kind::Text, Value::Int(i)) => Value::Str(i.to_string()),
            (Kind::Str | Kind::Text, Value::Float(f)) => Value::Str(f.to_string()),
            (Kind::DateTime, Value::Str(s)) => match parse_datetime(&s) {
                Some(dt) => Value::DateTime(dt),
                None => Value::Str(s),
            },
            (Kind::DateTime, Value::Int(secs)) => match Utc.timestamp_opt(secs, 0).single() {
                Some(dt) => Value::DateTime(dt),
                None => Value::Int(secs),
            },
            (Kind::DateTime, Value::Float(secs)) => match epoch_float(secs) {
                Some(dt) => Value::DateTime(dt),
                None => Value::Float(secs),
            },
            (Kind::Array(elem), Value::Array(items)) => {
                Value::Array(items.into_iter().map(|v| elem.coerce(v)).collect())
            }
            (Kind::Hash(elem), Value::Hash(map)) => {
                Value::Hash(map.into_iter().map(|(k, v)| (k, elem.coerce(v))).collect())
            }
            (Kind::Reference(reference), v) => reference.key.coerce(v),
            (_, v) => v,
        }
    }
}

fn epoch_float(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

/// ON DELETE / ON UPDATE behaviour of a foreign reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefOption {
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
    NoAction,
}

impl RefOption {
    pub fn as_sql(&self) -> &'static str {
        match self {
            RefOption::Cascade => "CASCADE",
            RefOption::Restrict => "RESTRICT",
            RefOption::SetNull => "SET NULL",
            RefOption::SetDefault => "SET DEFAULT",
            RefOption::NoAction => "NO ACTION",
        }
    }
}

impl FromStr for RefOption {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        match normalized.as_str() {
            "CASCADE" => Ok(RefOption::Cascade),
            "RESTRICT" => Ok(RefOption::Restrict),
            "SET NULL" => Ok(RefOption::SetNull),
            "SET DEFAULT" => Ok(RefOption::SetDefault),
            "NO ACTION" => Ok(RefOption::NoAction),
            _ => Err(AppError::InvalidArgument(format!(
                "`{s}` is not a reference option; expected one of CASCADE, RESTRICT, SET NULL, SET DEFAULT, NO ACTION"
            ))),
        }
    }
}

/// Target of a foreign-reference attribute.
#[derive(Clone, Debug)]
pub struct Reference {
    pub table: String,
    pub column: String,
    pub key: Box<Kind>,
    pub on_delete: RefOption,
    pub on_update: RefOption,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unique {
    No,
    Alone,
    /// Unique jointly with the named peer attributes.
    With(Vec<String>),
}

#[derive(Clone)]
pub enum Allowed {
    Static(Vec<Value>),
    Dynamic(AllowedFn),
}

impl Allowed {
    pub fn values(&self) -> Vec<Value> {
        match self {
            Allowed::Static(values) => values.clone(),
            Allowed::Dynamic(f) => f(),
        }
    }
}

impl fmt::Debug for Allowed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allowed::Static(values) => f.debug_tuple("Static").field(values).finish(),
            Allowed::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// One rule invocation. Bare literals become [`Rule::Allowed`].
#[derive(Clone)]
pub enum Rule {
    Optional,
    Default(Value),
    Allowed(Value),
    AllowedFn(AllowedFn),
    Min(f64),
    Max(f64),
    Size(i64),
    MinSize(i64),
    MaxSize(i64),
    Regex(String),
    Unique,
    UniqueWith(Vec<String>),
    Serial,
    ColumnType(String),
    SqlValue(String),
    SqlInsert(String),
    SqlUpdate(String),
    OnDelete(String),
    OnUpdate(String),
    Description(String),
}

impl From<Value> for Rule {
    fn from(v: Value) -> Self {
        Rule::Allowed(v)
    }
}

#[derive(Clone, Debug)]
pub struct Assertion {
    kind: Kind,
    optional: bool,
    default: Option<Value>,
    allowed: Option<Allowed>,
    size: Option<usize>,
    min_size: Option<usize>,
    max_size: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    regex: Option<Regex>,
    unique: Unique,
    serial: bool,
    column_type: Option<String>,
    sql_insert: Option<String>,
    sql_update: Option<String>,
    description: Option<String>,
}

fn size_rule(name: &str, n: i64) -> Result<usize, AppError> {
    usize::try_from(n).map_err(|_| AppError::InvalidArgument(format!("{name}({n}) must not be negative")))
}

impl Assertion {
    fn bare(kind: Kind) -> Self {
        Assertion {
            kind,
            optional: false,
            default: None,
            allowed: None,
            size: None,
            min_size: None,
            max_size: None,
            min: None,
            max: None,
            regex: None,
            unique: Unique::No,
            serial: false,
            column_type: None,
            sql_insert: None,
            sql_update: None,
            description: None,
        }
    }

    /// Builds an assertion from an unordered rule set.
    pub fn define(kind: Kind, rules: impl IntoIterator<Item = Rule>) -> Result<Assertion, AppError> {
        let mut a = Assertion::bare(kind);
        let mut statics: Vec<Value> = Vec::new();
        let mut dynamic: Option<AllowedFn> = None;
        let mut on_delete = None;
        let mut on_update = None;

        for rule in rules {
            match rule {
                Rule::Optional => a.optional = true,
                Rule::Default(v) => a.default = Some(v),
                Rule::Allowed(v) => statics.push(a.kind.coerce(v)),
                Rule::AllowedFn(f) => dynamic = Some(f),
                Rule::Min(n) => a.min = Some(n),
                Rule::Max(n) => a.max = Some(n),
                Rule::Size(n) => a.size = Some(size_rule("size", n)?),
                Rule::MinSize(n) => a.min_size = Some(size_rule("min_size", n)?),
                Rule::MaxSize(n) => a.max_size = Some(size_rule("max_size", n)?),
                Rule::Regex(pattern) => {
                    let re = Regex::new(&pattern)
                        .map_err(|e| AppError::InvalidArgument(format!("bad regex `{pattern}`: {e}")))?;
                    a.regex = Some(re);
                }
                Rule::Unique => a.unique = Unique::Alone,
                Rule::UniqueWith(peers) => {
                    if peers.is_empty() {
                        return Err(AppError::InvalidArgument("unique_with needs at least one peer attribute".into()));
                    }
                    a.unique = Unique::With(peers);
                }
                Rule::Serial => a.serial = true,
                Rule::ColumnType(t) => a.column_type = Some(t),
                Rule::SqlValue(expr) => {
                    a.sql_insert = Some(expr.clone());
                    a.sql_update = Some(expr);
                }
                Rule::SqlInsert(expr) => a.sql_insert = Some(expr),
                Rule::SqlUpdate(expr) => a.sql_update = Some(expr),
                Rule::OnDelete(option) => on_delete = Some(option.parse::<RefOption>()?),
                Rule::OnUpdate(option) => on_update = Some(option.parse::<RefOption>()?),
                Rule::Description(text) => a.description = Some(text),
            }
        }

        match (&mut a.kind, on_delete, on_update) {
            (_, None, None) => {}
            (Kind::Reference(reference), d, u) => {
                if let Some(d) = d {
                    reference.on_delete = d;
                }
                if let Some(u) = u {
                    reference.on_update = u;
                }
            }
            (kind, _, _) => {
                return Err(AppError::InvalidArgument(format!(
                    "on_delete/on_update only apply to references, not {}",
                    kind.name()
                )))
            }
        }

        a.allowed = match (statics.is_empty(), dynamic) {
            (true, None) => None,
            (false, None) => Some(Allowed::Static(statics)),
            (true, Some(f)) => Some(Allowed::Dynamic(f)),
            (false, Some(_)) => {
                return Err(AppError::InvalidArgument("allowed values must be either literals or a callback, not both".into()))
            }
        };

        if let (Some(min), Some(max)) = (a.min, a.max) {
            if min > max {
                return Err(AppError::InvalidArgument(format!("min({min}) is greater than max({max})")));
            }
        }
        if let (Some(min), Some(max)) = (a.min_size, a.max_size) {
            if min > max {
                return Err(AppError::InvalidArgument(format!("min_size({min}) is greater than max_size({max})")));
            }
        }
        if a.serial && !matches!(a.kind, Kind::Int) {
            return Err(AppError::InvalidArgument(format!("serial requires an int, not {}", a.kind.name())));
        }

        if a.default.is_none() {
            a.default = match &a.kind {
                Kind::Array(_) => Some(Value::Array(Vec::new())),
                Kind::Hash(_) => Some(Value::Hash(BTreeMap::new())),
                _ => None,
            };
        }

        if let Some(default) = a.default.take() {
            let default = a.coerce(default);
            a.check("default", &default, false)
                .map_err(|e| AppError::InvalidArgument(format!("invalid default: {e}")))?;
            if let Some(Allowed::Static(values)) = &a.allowed {
                if !values.contains(&default) {
                    debug!("default `{default}` lies outside the allowed set; callers must supply a value");
                }
            }
            a.default = Some(default);
        }

        Ok(a)
    }

    pub fn str() -> AssertionBuilder {
        AssertionBuilder::new(Kind::Str)
    }

    pub fn text() -> AssertionBuilder {
        AssertionBuilder::new(Kind::Text)
    }

    pub fn int() -> AssertionBuilder {
        AssertionBuilder::new(Kind::Int)
    }

    pub fn float() -> AssertionBuilder {
        AssertionBuilder::new(Kind::Float)
    }

    pub fn boolean() -> AssertionBuilder {
        AssertionBuilder::new(Kind::Bool)
    }

    pub fn datetime() -> AssertionBuilder {
        AssertionBuilder::new(Kind::DateTime)
    }

    pub fn id() -> AssertionBuilder {
        AssertionBuilder::new(Kind::Id)
    }

    pub fn any() -> AssertionBuilder {
        AssertionBuilder::new(Kind::Any)
    }

    pub fn array(element: AssertionBuilder) -> AssertionBuilder {
        AssertionBuilder { shape: Shape::Array(Box::new(element)), rules: Vec::new() }
    }

    pub fn hash(element: AssertionBuilder) -> AssertionBuilder {
        AssertionBuilder { shape: Shape::Hash(Box::new(element)), rules: Vec::new() }
    }

    /// Foreign reference to the primary key of `target` (ON DELETE RESTRICT, ON UPDATE CASCADE).
    pub fn reference(target: &Class) -> AssertionBuilder {
        Assertion::reference_to(target.table(), target.primary_key(), target.key_kind())
    }

    pub fn reference_to(table: &str, column: &str, key: Kind) -> AssertionBuilder {
        AssertionBuilder::new(Kind::Reference(Reference {
            table: table.to_string(),
            column: column.to_string(),
            key: Box::new(key),
            on_delete: RefOption::Restrict,
            on_update: RefOption::Cascade,
        }))
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn allowed(&self) -> Option<&Allowed> {
        self.allowed.as_ref()
    }

    pub fn unique(&self) -> &Unique {
        &self.unique
    }

    pub fn is_serial(&self) -> bool {
        self.serial
    }

    pub fn is_link(&self) -> bool {
        self.kind.is_link()
    }

    pub fn sql_insert(&self) -> Option<&str> {
        self.sql_insert.as_deref()
    }

    pub fn sql_update(&self) -> Option<&str> {
        self.sql_update.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Element contract of an array or hash attribute.
    pub fn element(&self) -> Option<&Assertion> {
        match &self.kind {
            Kind::Array(elem) | Kind::Hash(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn reference_target(&self) -> Option<&Reference> {
        match &self.kind {
            Kind::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Column type for inline attributes; `None` for link-table attributes.
    pub fn column_type(&self) -> Option<String> {
        if self.kind.is_link() {
            return None;
        }
        Some(match &self.column_type {
            Some(t) => t.clone(),
            None => self.kind.default_column_type(self.max_size),
        })
    }

    /// Literal default usable in a DDL DEFAULT clause.
    pub fn literal_default(&self) -> Option<&Value> {
        match &self.default {
            Some(v) if !v.is_null() && !v.is_composite() => Some(v),
            _ => None,
        }
    }

    pub fn coerce(&self, value: Value) -> Value {
        self.kind.coerce(value)
    }

    /// Validates `value` for attribute `attr`, stopping at the first violated rule.
    pub fn test(&self, attr: &str, value: &Value) -> Result<(), AppError> {
        self.check(attr, value, true)
    }

    fn check(&self, attr: &str, value: &Value, with_allowed: bool) -> Result<(), AppError> {
        let fail = |rule: String| AppError::assert_failed(attr, format!("value `{value}` {rule}"));

        if value.is_null() {
            return if self.optional { Ok(()) } else { Err(fail("is missing but the attribute is not optional".into())) };
        }

        if with_allowed {
            if let Some(allowed) = &self.allowed {
                let values: Vec<Value> = allowed.values().into_iter().map(|v| self.coerce(v)).collect();
                if !values.contains(value) {
                    let listed = values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                    return Err(fail(format!("is not one of the allowed values [{listed}]")));
                }
            }
        }

        let size = value.size();
        if let Some(n) = self.size {
            if size != n {
                return Err(fail(format!("has size {size}, required size is {n}")));
            }
        }
        if let Some(n) = self.min_size {
            if size < n {
                return Err(fail(format!("has size {size}, below min_size {n}")));
            }
        }
        if let Some(n) = self.max_size {
            if size > n {
                return Err(fail(format!("has size {size}, above max_size {n}")));
            }
        }

        if let Some(x) = value.as_f64() {
            if let Some(min) = self.min {
                if x < min {
                    return Err(fail(format!("is below min({min})")));
                }
            }
            if let Some(max) = self.max {
                if x > max {
                    return Err(fail(format!("is above max({max})")));
                }
            }
        }

        if let Some(re) = &self.regex {
            if !value.is_composite() && !re.is_match(&value.to_string()) {
                return Err(fail(format!("does not match /{}/", re.as_str())));
            }
        }

        if !self.kind.structure_ok(value) {
            return Err(fail(format!("({}) is not a valid {}", value.type_name(), self.kind.name())));
        }

        match (&self.kind, value) {
            (Kind::Array(elem), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    elem.check(&format!("{attr}[{i}]"), item, with_allowed)?;
                }
            }
            (Kind::Hash(elem), Value::Hash(map)) => {
                for (k, v) in map {
                    elem.check(&format!("{attr}{{{k}}}"), v, with_allowed)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Clone)]
enum Shape {
    Scalar(Kind),
    Array(Box<AssertionBuilder>),
    Hash(Box<AssertionBuilder>),
}

/// Fluent front end to [`Assertion::define`].
#[derive(Clone)]
pub struct AssertionBuilder {
    shape: Shape,
    rules: Vec<Rule>,
}

impl AssertionBuilder {
    pub fn new(kind: Kind) -> Self {
        AssertionBuilder { shape: Shape::Scalar(kind), rules: Vec::new() }
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replaces the value kind, keeping the collected rules.
    pub fn kind(mut self, kind: Kind) -> Self {
        self.shape = Shape::Scalar(kind);
        self
    }

    pub fn optional(self) -> Self {
        self.rule(Rule::Optional)
    }

    pub fn default(self, value: impl Into<Value>) -> Self {
        self.rule(Rule::Default(value.into()))
    }

    pub fn allowed<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.rules.extend(values.into_iter().map(|v| Rule::Allowed(v.into())));
        self
    }

    pub fn allowed_fn(self, f: impl Fn() -> Vec<Value> + Send + Sync + 'static) -> Self {
        self.rule(Rule::AllowedFn(Arc::new(f)))
    }

    pub fn min(self, n: f64) -> Self {
        self.rule(Rule::Min(n))
    }

    pub fn max(self, n: f64) -> Self {
        self.rule(Rule::Max(n))
    }

    pub fn size(self, n: i64) -> Self {
        self.rule(Rule::Size(n))
    }

    pub fn min_size(self, n: i64) -> Self {
        self.rule(Rule::MinSize(n))
    }

    pub fn max_size(self, n: i64) -> Self {
        self.rule(Rule::MaxSize(n))
    }

    pub fn regex(self, pattern: &str) -> Self {
        self.rule(Rule::Regex(pattern.to_string()))
    }

    pub fn unique(self) -> Self {
        self.rule(Rule::Unique)
    }

    pub fn unique_with(self, peers: &[&str]) -> Self {
        self.rule(Rule::UniqueWith(peers.iter().map(|p| p.to_string()).collect()))
    }

    pub fn serial(self) -> Self {
        self.rule(Rule::Serial)
    }

    pub fn column_type(self, column_type: &str) -> Self {
        self.rule(Rule::ColumnType(column_type.to_string()))
    }

    pub fn sql_value(self, expr: &str) -> Self {
        self.rule(Rule::SqlValue(expr.to_string()))
    }

    pub fn sql_insert(self, expr: &str) -> Self {
        self.rule(Rule::SqlInsert(expr.to_string()))
    }

    pub fn sql_update(self, expr: &str) -> Self {
        self.rule(Rule::SqlUpdate(expr.to_string()))
    }

    pub fn on_delete(self, option: &str) -> Self {
        self.rule(Rule::OnDelete(option.to_string()))
    }

    pub fn on_update(self, option: &str) -> Self {
        self.rule(Rule::OnUpdate(option.to_string()))
    }

    pub fn description(self, text: &str) -> Self {
        self.rule(Rule::Description(text.to_string()))
    }

    pub fn build(self) -> Result<Assertion, AppError> {
        let kind = match self.shape {
            Shape::Scalar(kind) => kind,
            Shape::Array(elem) => Kind::Array(Box::new(elem.build()?)),
            Shape::Hash(elem) => Kind::Hash(Box::new(elem.build()?)),
        };
        Assertion::define(kind, self.rules)
    }
}

/// Maps a Rust field type onto its default assertion; used by `#[prototype]`.
pub trait Asserted {
    fn assertion() -> AssertionBuilder;
}

macro_rules! impl_asserted {
    ($ctor:ident: $($t:ty),*) => {
        $(
            impl Asserted for $t {
                fn assertion() -> AssertionBuilder {
                    Assertion::$ctor()
                }
            }
        )*
    };
}

impl_asserted!(int: i8, i16, i32, i64, u8, u16, u32, isize);
impl_asserted!(float: f32, f64);
impl_asserted!(boolean: bool);
impl_asserted!(str: String);
impl_asserted!(any: Value);

impl Asserted for DateTime<Utc> {
    fn assertion() -> AssertionBuilder {
        Assertion::datetime()
    }
}

impl<T: Asserted> Asserted for Option<T> {
    fn assertion() -> AssertionBuilder {
        T::assertion().optional()
    }
}

impl<T: Asserted> Asserted for Vec<T> {
    fn assertion() -> AssertionBuilder {
        Assertion::array(T::assertion())
    }
}

impl<T: Asserted> Asserted for BTreeMap<String, T> {
    fn assertion() -> AssertionBuilder {
        Assertion::hash(T::assertion())
    }
}

impl<T: Asserted> Asserted for HashMap<String, T> {
    fn assertion() -> AssertionBuilder {
        Assertion::hash(T::assertion())
    }
}
