//! DDL synthesis from class assertions, live schema introspection and drift reconciliation.

use crate::assertion::{Assertion, Unique};
use crate::class::{Class, Introspectable};
use crate::error::AppError;
use crate::value::{format_datetime, Value};
use log::info;
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Mysql,
}

impl Dialect {
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// SQL literal for DDL defaults; DML binds parameters instead.
    pub fn quote_literal(&self, value: &Value) -> Result<String, AppError> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{f:.1}"),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => self.quote_str(s),
            Value::DateTime(dt) => self.quote_str(&format_datetime(dt)),
            composite => self.quote_str(&composite.to_yaml_string()?),
        })
    }

    fn quote_str(&self, s: &str) -> String {
        match self {
            Dialect::Sqlite => format!("'{}'", s.replace('\'', "''")),
            Dialect::Mysql => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
        }
    }

    pub fn table_suffix(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "",
            Dialect::Mysql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        }
    }

    fn unique_clause(&self, name: &str, columns: &[String]) -> String {
        let cols = self.ident_list(columns);
        match self {
            Dialect::Sqlite => format!("CONSTRAINT {} UNIQUE ({cols})", self.quote_ident(name)),
            Dialect::Mysql => format!("UNIQUE KEY {} ({cols})", self.quote_ident(name)),
        }
    }

    fn ident_list(&self, columns: &[String]) -> String {
        columns.iter().map(|c| self.quote_ident(c)).collect::<Vec<_>>().join(", ")
    }

    /// Circular insert: the next id is one past the current maximum, its slot is `id % capacity`.
    /// `payload` pairs each column with its value expression, `?` for bound values.
    pub fn round_robin_insert(&self, table: &str, capacity: usize, payload: &[(String, String)]) -> String {
        let t = self.quote_ident(table);
        let id = self.quote_ident("id");
        let modulo = self.quote_ident("modulo");
        let next = format!("COALESCE(MAX({id}), -1) + 1");
        let mut columns = vec![id.clone(), modulo.clone()];
        columns.extend(payload.iter().map(|(c, _)| self.quote_ident(c)));
        let mut select = vec![next.clone(), format!("({next}) % {capacity}")];
        select.extend(payload.iter().map(|(_, expr)| expr.clone()));
        let mut updated = vec![id];
        updated.extend(payload.iter().map(|(c, _)| self.quote_ident(c)));
        match self {
            Dialect::Sqlite => format!(
                "INSERT INTO {t} ({}) SELECT {} FROM {t} WHERE true ON CONFLICT({modulo}) DO UPDATE SET {}",
                columns.join(", "),
                select.join(", "),
                updated.iter().map(|c| format!("{c} = excluded.{c}")).collect::<Vec<_>>().join(", ")
            ),
            Dialect::Mysql => format!(
                "INSERT INTO {t} ({}) SELECT {} FROM {t} AS prev ON DUPLICATE KEY UPDATE {}",
                columns.join(", "),
                select.join(", "),
                updated.iter().map(|c| format!("{c} = VALUES({c})")).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

fn is_large_text(column_type: &str) -> bool {
    let upper = column_type.to_uppercase();
    upper.contains("TEXT") || upper.contains("BLOB")
}

fn serial_key(class: &Class, attr: &str, assertion: &Assertion) -> bool {
    assertion.is_serial() && attr == class.primary_key()
}

fn column_type(class: &Class, attr: &str, assertion: &Assertion, dialect: Dialect) -> Result<String, AppError> {
    let declared = assertion
        .column_type()
        .ok_or_else(|| AppError::InvalidArgument(format!("`{attr}` is stored in a link table, not a column")))?;
    if dialect == Dialect::Sqlite && serial_key(class, attr, assertion) {
        return Ok("INTEGER".to_string());
    }
    Ok(declared)
}

fn expected_default(assertion: &Assertion, column_type: &str, dialect: Dialect) -> Result<Option<String>, AppError> {
    match assertion.literal_default() {
        Some(v) if !is_large_text(column_type) => dialect.quote_literal(v).map(Some),
        _ => Ok(None),
    }
}

fn column_clause(class: &Class, attr: &str, assertion: &Assertion, dialect: Dialect) -> Result<String, AppError> {
    let name = dialect.quote_ident(attr);
    if assertion.is_serial() && dialect == Dialect::Sqlite {
        if !serial_key(class, attr, assertion) {
            return Err(AppError::InvalidArgument(format!(
                "{}.{attr}: SQLite only supports serial columns as the primary key",
                class.name()
            )));
        }
        return Ok(format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT"));
    }
    let ty = column_type(class, attr, assertion, dialect)?;
    let mut clause = format!("{name} {ty}");
    if !assertion.is_optional() || attr == class.primary_key() {
        clause.push_str(" NOT NULL");
    }
    if let Some(default) = expected_default(assertion, &ty, dialect)? {
        clause.push_str(&format!(" DEFAULT {default}"));
    }
    if assertion.is_serial() {
        clause.push_str(" AUTO_INCREMENT");
    }
    Ok(clause)
}

/// Column lists of the unique keys a class declares, each sorted.
pub fn expected_uniques(class: &Class) -> Result<Vec<Vec<String>>, AppError> {
    let mut keys = Vec::new();
    for (attr, assertion) in class.inline_attributes() {
        let columns = match assertion.unique() {
            Unique::No => continue,
            Unique::Alone => vec![attr.clone()],
            Unique::With(peers) => {
                let mut columns = vec![attr.clone()];
                for peer in peers {
                    match class.assertion(peer) {
                        Some(p) if p.is_link() => {
                            return Err(AppError::InvalidArgument(format!("`{attr}` cannot be unique with collection `{peer}`")))
                        }
                        Some(p) if p.is_optional() => {
                            return Err(AppError::assert_failed(
                                attr,
                                format!("composite unique key with optional attribute `{peer}` is unreliable for nullable columns"),
                            ))
                        }
                        Some(_) => columns.push(peer.clone()),
                        None => return Err(AppError::InvalidArgument(format!("`{attr}` is unique with unknown `{peer}`"))),
                    }
                }
                columns
            }
        };
        if columns.len() == 1 && columns[0] == class.primary_key() {
            continue;
        }
        keys.push(columns);
    }
    Ok(keys)
}

fn unique_name(table: &str, columns: &[String]) -> String {
    format!("{table}_{}_key", columns.join("_"))
}

pub fn build_create_table(class: &Class, dialect: Dialect) -> Result<String, AppError> {
    if class.is_open() {
        return Err(AppError::InvalidArgument(format!("schema-less class `{}` has no table", class.name())));
    }
    let mut clauses = Vec::new();
    for (attr, assertion) in class.inline_attributes() {
        clauses.push(column_clause(class, attr, assertion, dialect)?);
    }

    let pk = class.primary_key();
    let sqlite_serial = dialect == Dialect::Sqlite
        && class.assertion(pk).is_some_and(|a| a.is_serial());
    if !sqlite_serial {
        clauses.push(format!("PRIMARY KEY ({})", dialect.quote_ident(pk)));
    }

    for columns in expected_uniques(class)? {
        clauses.push(dialect.unique_clause(&unique_name(class.table(), &columns), &columns));
    }

    for (attr, assertion) in class.inline_attributes() {
        if let Some(reference) = assertion.reference_target() {
            clauses.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
                dialect.quote_ident(attr),
                dialect.quote_ident(&reference.table),
                dialect.quote_ident(&reference.column),
                reference.on_delete.as_sql(),
                reference.on_update.as_sql()
            ));
        }
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n){}",
        dialect.quote_ident(class.table()),
        clauses.join(",\n  "),
        dialect.table_suffix()
    ))
}

/// The class table followed by every link table, parents before children.
pub fn create_statements(class: &Class, dialect: Dialect) -> Result<Vec<String>, AppError> {
    let mut statements = vec![build_create_table(class, dialect)?];
    for link in class.links().values() {
        statements.extend(create_statements(link, dialect)?);
    }
    Ok(statements)
}

impl Introspectable for Class {
    fn create_table_sql(&self, dialect: Dialect) -> Result<String, AppError> {
        build_create_table(self, dialect)
    }

    fn create_statements(&self, dialect: Dialect) -> Result<Vec<String>, AppError> {
        create_statements(self, dialect)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub column_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveForeignKey {
    pub column: String,
    pub table: String,
    pub target: String,
    pub on_delete: String,
    pub on_update: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
    /// (index name, columns) of every unique index other than the primary key.
    pub uniques: Vec<(String, Vec<String>)>,
    pub foreign_keys: Vec<LiveForeignKey>,
}

pub fn expected_columns(class: &Class, dialect: Dialect) -> Result<Vec<LiveColumn>, AppError> {
    class
        .inline_attributes()
        .map(|(attr, assertion)| {
            let ty = column_type(class, attr, assertion, dialect)?;
            let primary_key = attr == class.primary_key();
            Ok(LiveColumn {
                name: attr.clone(),
                default: expected_default(assertion, &ty, dialect)?,
                column_type: ty,
                not_null: primary_key || !assertion.is_optional(),
                primary_key,
            })
        })
        .collect()
}

fn query_failed(statement: &str) -> impl FnOnce(rusqlite::Error) -> AppError + '_ {
    move |source| AppError::DbQueryFailed { statement: statement.to_string(), source }
}

/// Reads column, unique index and foreign key metadata of `table`; `None` if it does not exist.
pub fn introspect_sqlite(conn: &Connection, table: &str) -> Result<Option<LiveTable>, AppError> {
    let sql = format!("PRAGMA table_info({})", Dialect::Sqlite.quote_ident(table));
    let mut stmt = conn.prepare(&sql).map_err(query_failed(&sql))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(LiveColumn {
                name: row.get(1)?,
                column_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default: row.get(4)?,
                primary_key: row.get::<_, i64>(5)? > 0,
            })
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(&sql))?;
    if columns.is_empty() {
        return Ok(None);
    }

    let sql = format!("PRAGMA index_list({})", Dialect::Sqlite.quote_ident(table));
    let mut stmt = conn.prepare(&sql).map_err(query_failed(&sql))?;
    let indexes = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)?, row.get::<_, String>(3)?)))
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(&sql))?;
    let mut uniques = Vec::new();
    for (index, unique, origin) in indexes {
        if unique == 0 || origin == "pk" {
            continue;
        }
        let sql = format!("PRAGMA index_info({})", Dialect::Sqlite.quote_ident(&index));
        let mut stmt = conn.prepare(&sql).map_err(query_failed(&sql))?;
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(2))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(query_failed(&sql))?;
        uniques.push((index, cols));
    }

    let sql = format!("PRAGMA foreign_key_list({})", Dialect::Sqlite.quote_ident(table));
    let mut stmt = conn.prepare(&sql).map_err(query_failed(&sql))?;
    let foreign_keys = stmt
        .query_map([], |row| {
            Ok(LiveForeignKey {
                table: row.get(2)?,
                column: row.get(3)?,
                target: row.get(4)?,
                on_update: row.get(5)?,
                on_delete: row.get(6)?,
            })
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(&sql))?;

    Ok(Some(LiveTable { name: table.to_string(), columns, uniques, foreign_keys }))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Drift {
    MissingColumn { column: String },
    ExtraColumn { column: String },
    ColumnType { column: String, expected: String, found: String },
    Nullability { column: String, expected_not_null: bool },
    Default { column: String, expected: Option<String>, found: Option<String> },
    PrimaryKey { expected: Vec<String>, found: Vec<String> },
    MissingUnique { columns: Vec<String> },
    ExtraUnique { index: String, columns: Vec<String> },
    ForeignKey { column: String, detail: String },
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::MissingColumn { column } => write!(f, "column `{column}` is declared but missing"),
            Drift::ExtraColumn { column } => write!(f, "column `{column}` exists but is not declared"),
            Drift::ColumnType { column, expected, found } => {
                write!(f, "column `{column}` has type {found}, expected {expected}")
            }
            Drift::Nullability { column, expected_not_null } => {
                let want = if *expected_not_null { "NOT NULL" } else { "nullable" };
                write!(f, "column `{column}` should be {want}")
            }
            Drift::Default { column, expected, found } => write!(
                f,
                "column `{column}` has default {}, expected {}",
                found.as_deref().unwrap_or("none"),
                expected.as_deref().unwrap_or("none")
            ),
            Drift::PrimaryKey { expected, found } => {
                write!(f, "primary key is ({}), expected ({})", found.join(", "), expected.join(", "))
            }
            Drift::MissingUnique { columns } => write!(f, "unique key ({}) is missing", columns.join(", ")),
            Drift::ExtraUnique { index, columns } => {
                write!(f, "unique index `{index}` ({}) is not declared", columns.join(", "))
            }
            Drift::ForeignKey { column, detail } => write!(f, "foreign key on `{column}`: {detail}"),
        }
    }
}

fn normalize_type(t: &str) -> String {
    t.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_uppercase()
}

fn sorted(columns: &[String]) -> Vec<String> {
    let mut columns = columns.to_vec();
    columns.sort();
    columns
}

/// Every discrepancy between the declared class and its live table.
pub fn detect_drift(class: &Class, dialect: Dialect, live: &LiveTable) -> Result<Vec<Drift>, AppError> {
    let expected = expected_columns(class, dialect)?;
    let mut drift = Vec::new();

    for column in &expected {
        let Some(found) = live.columns.iter().find(|c| c.name == column.name) else {
            drift.push(Drift::MissingColumn { column: column.name.clone() });
            continue;
        };
        if normalize_type(&found.column_type) != normalize_type(&column.column_type) {
            drift.push(Drift::ColumnType {
                column: column.name.clone(),
                expected: column.column_type.clone(),
                found: found.column_type.clone(),
            });
        }
        if !column.primary_key && found.not_null != column.not_null {
            drift.push(Drift::Nullability { column: column.name.clone(), expected_not_null: column.not_null });
        }
        if found.default != column.default {
            drift.push(Drift::Default {
                column: column.name.clone(),
                expected: column.default.clone(),
                found: found.default.clone(),
            });
        }
    }
    for found in &live.columns {
        if !expected.iter().any(|c| c.name == found.name) {
            drift.push(Drift::ExtraColumn { column: found.name.clone() });
        }
    }

    let expected_pk: Vec<String> = expected.iter().filter(|c| c.primary_key).map(|c| c.name.clone()).collect();
    let found_pk: Vec<String> = live.columns.iter().filter(|c| c.primary_key).map(|c| c.name.clone()).collect();
    if sorted(&expected_pk) != sorted(&found_pk) {
        drift.push(Drift::PrimaryKey { expected: expected_pk, found: found_pk });
    }

    let declared: BTreeSet<Vec<String>> = expected_uniques(class)?.iter().map(|u| sorted(u)).collect();
    let present: BTreeSet<Vec<String>> = live.uniques.iter().map(|(_, cols)| sorted(cols)).collect();
    for columns in &declared {
        if !present.contains(columns) {
            drift.push(Drift::MissingUnique { columns: columns.clone() });
        }
    }
    for (index, columns) in &live.uniques {
        if !declared.contains(&sorted(columns)) {
            drift.push(Drift::ExtraUnique { index: index.clone(), columns: columns.clone() });
        }
    }

    for (attr, assertion) in class.inline_attributes() {
        let Some(reference) = assertion.reference_target() else { continue };
        match live.foreign_keys.iter().find(|fk| &fk.column == attr) {
            None => drift.push(Drift::ForeignKey { column: attr.clone(), detail: "missing".into() }),
            Some(fk) => {
                if fk.table != reference.table
                    || fk.target != reference.column
                    || !fk.on_delete.eq_ignore_ascii_case(reference.on_delete.as_sql())
                    || !fk.on_update.eq_ignore_ascii_case(reference.on_update.as_sql())
                {
                    drift.push(Drift::ForeignKey {
                        column: attr.clone(),
                        detail: format!(
                            "references {}({}) ON DELETE {} ON UPDATE {}",
                            fk.table, fk.target, fk.on_delete, fk.on_update
                        ),
                    });
                }
            }
        }
    }
    for fk in &live.foreign_keys {
        if class.assertion(&fk.column).and_then(|a| a.reference_target()).is_none() {
            drift.push(Drift::ForeignKey { column: fk.column.clone(), detail: "not declared".into() });
        }
    }

    Ok(drift)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Any drift is a `SchemaMismatch`.
    #[default]
    Strict,
    /// Repairable drift is altered in place and logged.
    AutoReconcile,
}

/// ALTER statements repairing `drift`; fails with `SchemaMismatch` if any item needs manual work.
pub fn reconcile_statements(class: &Class, dialect: Dialect, drift: &[Drift]) -> Result<Vec<String>, AppError> {
    let table = dialect.quote_ident(class.table());
    let mut statements = Vec::new();
    let mut manual = Vec::new();

    for item in drift {
        match (item, dialect) {
            (Drift::MissingColumn { column }, _) => {
                let Some(assertion) = class.assertion(column) else {
                    manual.push(item.to_string());
                    continue;
                };
                let clause = column_clause(class, column, assertion, dialect)?;
                let needs_default = dialect == Dialect::Sqlite && clause.contains("NOT NULL") && !clause.contains("DEFAULT");
                if needs_default || serial_key(class, column, assertion) {
                    manual.push(format!("{item} (cannot add a NOT NULL column without a default)"));
                } else {
                    statements.push(format!("ALTER TABLE {table} ADD COLUMN {clause}"));
                }
            }
            (Drift::ExtraColumn { column }, _) => {
                statements.push(format!("ALTER TABLE {table} DROP COLUMN {}", dialect.quote_ident(column)));
            }
            (Drift::MissingUnique { columns }, Dialect::Sqlite) => statements.push(format!(
                "CREATE UNIQUE INDEX {} ON {table} ({})",
                dialect.quote_ident(&unique_name(class.table(), columns)),
                dialect.ident_list(columns)
            )),
            (Drift::MissingUnique { columns }, Dialect::Mysql) => statements.push(format!(
                "ALTER TABLE {table} ADD UNIQUE KEY {} ({})",
                dialect.quote_ident(&unique_name(class.table(), columns)),
                dialect.ident_list(columns)
            )),
            (Drift::ExtraUnique { index, .. }, Dialect::Sqlite) => {
                if index.starts_with("sqlite_autoindex") {
                    manual.push(format!("{item} (implicit index of a table constraint)"));
                } else {
                    statements.push(format!("DROP INDEX {}", dialect.quote_ident(index)));
                }
            }
            (Drift::ExtraUnique { index, .. }, Dialect::Mysql) => {
                statements.push(format!("ALTER TABLE {table} DROP INDEX {}", dialect.quote_ident(index)));
            }
            (Drift::ColumnType { column, .. } | Drift::Nullability { column, .. } | Drift::Default { column, .. }, Dialect::Mysql) => {
                match class.assertion(column) {
                    Some(assertion) => statements.push(format!(
                        "ALTER TABLE {table} MODIFY COLUMN {}",
                        column_clause(class, column, assertion, dialect)?
                    )),
                    None => manual.push(item.to_string()),
                }
            }
            (Drift::PrimaryKey { expected, .. }, Dialect::Mysql) => statements.push(format!(
                "ALTER TABLE {table} DROP PRIMARY KEY, ADD PRIMARY KEY ({})",
                dialect.ident_list(expected)
            )),
            (Drift::ForeignKey { .. }, _) => manual.push(format!("{item} (foreign keys are never altered automatically)")),
            (other, Dialect::Sqlite) => manual.push(format!("{other} (SQLite cannot alter this in place)")),
        }
    }

    if manual.is_empty() {
        Ok(statements)
    } else {
        Err(AppError::SchemaMismatch { table: class.table().to_string(), drift: manual })
    }
}

/// Applies `mode` to the drift between `class` and the live SQLite table.
pub fn reconcile_sqlite(conn: &Connection, class: &Class, mode: ReconcileMode) -> Result<Vec<Drift>, AppError> {
    let Some(live) = introspect_sqlite(conn, class.table())? else {
        return Err(AppError::SchemaMismatch {
            table: class.table().to_string(),
            drift: vec!["table does not exist".to_string()],
        });
    };
    let drift = detect_drift(class, Dialect::Sqlite, &live)?;
    if drift.is_empty() {
        return Ok(drift);
    }
    match mode {
        ReconcileMode::Strict => Err(AppError::SchemaMismatch {
            table: class.table().to_string(),
            drift: drift.iter().map(|d| d.to_string()).collect(),
        }),
        ReconcileMode::AutoReconcile => {
            for statement in reconcile_statements(class, Dialect::Sqlite, &drift)? {
                info!("reconciling {}: {statement}", class.table());
                conn.execute_batch(&statement)
                    .map_err(|source| AppError::DbQueryFailed { statement: statement.clone(), source })?;
            }
            Ok(drift)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::Assertion;
    use crate::error::ErrorKind;

    fn widget() -> std::sync::Arc<Class> {
        Class::builder("Widget")
            .attribute("id", Assertion::int().serial().optional())
            .attribute("tags", Assertion::array(Assertion::str()))
            .attribute("count", Assertion::int().min(0.0).default(0))
            .attribute("notes", Assertion::text().optional().default("none"))
            .build()
            .unwrap()
    }

    #[test]
    fn sqlite_ddl_has_serial_key_and_no_link_columns() {
        let ddl = build_create_table(&widget(), Dialect::Sqlite).unwrap();
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"widget\""));
        assert!(ddl.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(ddl.contains("\"count\" INT(11) NOT NULL DEFAULT 0"));
        assert!(ddl.contains("\"notes\" TEXT,") || ddl.contains("\"notes\" TEXT\n"));
        assert!(ddl.contains("CONSTRAINT \"widget_name_key\" UNIQUE (\"name\")"));
        assert!(!ddl.contains("\"tags\""));
        assert!(!ddl.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn mysql_ddl_uses_auto_increment_and_unique_keys() {
        let ddl = build_create_table(&widget(), Dialect::Mysql).unwrap();
        assert!(ddl.contains("`id` INT(11) NOT NULL AUTO_INCREMENT"));
        assert!(ddl.contains("PRIMARY KEY (`id`)"));
        assert!(ddl.contains("UNIQUE KEY `widget_name_key` (`name`)"));
        assert!(ddl.ends_with("ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"));
    }

    #[test]
    fn link_tables_reference_their_parent() {
        let statements = create_statements(&widget(), Dialect::Sqlite).unwrap();
        assert_eq!(statements.len(), 2);
        let link = &statements[1];
        assert!(link.contains("\"widget_tags\""));
        assert!(link.contains("UNIQUE (\"element_index\", \"parent_id\")"));
        assert!(link.contains(
            "FOREIGN KEY (\"parent_id\") REFERENCES \"widget\" (\"id\") ON DELETE CASCADE ON UPDATE CASCADE"
        ));
    }

    #[test]
    fn composite_unique_with_optional_peer_fails() {
        let class = Class::builder("Slot")
            .attribute("day", Assertion::int().optional())
            .attribute("room", Assertion::str().unique_with(&["day"]))
            .build()
            .unwrap();
        let err = build_create_table(&class, Dialect::Sqlite).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertFailed);
    }

    #[test]
    fn reference_defaults_to_restrict_cascade() {
        let owner = Class::builder("Owner").build().unwrap();
        let pet = Class::builder("Pet").attribute("owner", Assertion::reference(&owner)).build().unwrap();
        let ddl = build_create_table(&pet, Dialect::Sqlite).unwrap();
        assert!(ddl.contains("\"owner\" CHAR(36) NOT NULL"));
        assert!(ddl.contains("REFERENCES \"owner\" (\"id\") ON DELETE RESTRICT ON UPDATE CASCADE"));
    }

    #[test]
    fn created_table_has_no_drift() {
        let conn = Connection::open_in_memory().unwrap();
        let class = widget();
        for statement in create_statements(&class, Dialect::Sqlite).unwrap() {
            conn.execute_batch(&statement).unwrap();
        }
        let live = introspect_sqlite(&conn, "widget").unwrap().unwrap();
        assert_eq!(detect_drift(&class, Dialect::Sqlite, &live).unwrap(), vec![]);
        let link = class.link_class("tags").unwrap();
        let live = introspect_sqlite(&conn, "widget_tags").unwrap().unwrap();
        assert_eq!(detect_drift(link, Dialect::Sqlite, &live).unwrap(), vec![]);
        assert!(introspect_sqlite(&conn, "nothing_here").unwrap().is_none());
    }

    #[test]
    fn strict_mode_reports_and_auto_mode_repairs() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE \"widget\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"name\" VARCHAR(1024) NOT NULL, \
             \"ctime\" DATETIME, \"mtime\" DATETIME, \"notes\" TEXT, \"legacy\" TEXT, \
             CONSTRAINT \"widget_name_key\" UNIQUE (\"name\"))",
        )
        .unwrap();
        let class = widget();
        let err = reconcile_sqlite(&conn, &class, ReconcileMode::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert!(err.to_string().contains("count"));

        let applied = reconcile_sqlite(&conn, &class, ReconcileMode::AutoReconcile).unwrap();
        assert!(applied.contains(&Drift::MissingColumn { column: "count".into() }));
        assert!(applied.contains(&Drift::ExtraColumn { column: "legacy".into() }));
        assert!(reconcile_sqlite(&conn, &class, ReconcileMode::Strict).unwrap().is_empty());
    }

    #[test]
    fn sqlite_type_changes_need_manual_review() {
        let class = widget();
        let drift = vec![Drift::ColumnType { column: "count".into(), expected: "INT(11)".into(), found: "TEXT".into() }];
        assert!(reconcile_statements(&class, Dialect::Sqlite, &drift).is_err());
        let sql = reconcile_statements(&class, Dialect::Mysql, &drift).unwrap();
        assert_eq!(sql, vec!["ALTER TABLE `widget` MODIFY COLUMN `count` INT(11) NOT NULL DEFAULT 0".to_string()]);
    }

    #[test]
    fn round_robin_insert_is_an_upsert_on_modulo() {
        let payload = [("value".to_string(), "?".to_string()), ("seen".to_string(), "CURRENT_TIMESTAMP".to_string())];
        let sql = Dialect::Sqlite.round_robin_insert("samples", 3, &payload);
        assert!(sql.contains("(COALESCE(MAX(\"id\"), -1) + 1) % 3, ?, CURRENT_TIMESTAMP FROM"));
        assert!(sql.contains("ON CONFLICT(\"modulo\") DO UPDATE SET \"id\" = excluded.\"id\""));
        let sql = Dialect::Mysql.round_robin_insert("samples", 3, &payload);
        assert!(sql.contains("ON DUPLICATE KEY UPDATE `id` = VALUES(`id`)"));
    }
}
