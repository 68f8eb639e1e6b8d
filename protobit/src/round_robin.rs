//! Fixed-capacity circular tables.
//!
//! A round-robin class never updates by primary key. Every save appends a row whose id is one past
//! the current maximum and whose `modulo` slot is `id % capacity`. Once the table is full the
//! unique slot collides and the upsert overwrites the oldest row instead, so the table holds at
//! most `capacity` rows: the most recent ones.

use crate::assertion::Assertion;
use crate::class::{Class, RowPolicy, DEFAULT_PRIMARY_KEY};
use crate::entity::Entity;
use crate::error::AppError;
use crate::storage::row::{read_columns, to_sql};
use crate::storage::session::Session;
use crate::value::Value;
use log::debug;
use std::sync::Arc;

pub const MODULO: &str = "modulo";

/// Appends `entity` to its circular table and stores the engine-assigned id, slot and computed
/// columns back on it. Collections are left to the caller, keyed by the new id.
pub fn write(session: &Session, database: &str, entity: &mut Entity) -> Result<(), AppError> {
    let class = Arc::clone(entity.class());
    let capacity = capacity_of(&class)?;
    let dialect = session.dialect();

    let mut payload = Vec::new();
    let mut params = Vec::new();
    let mut read_back = slot_columns(&class)?;
    for (attr, assertion) in class.inline_attributes() {
        if attr == DEFAULT_PRIMARY_KEY || attr == MODULO {
            continue;
        }
        match assertion.sql_insert() {
            Some(expr) => {
                payload.push((attr.clone(), expr.to_string()));
                read_back.push((attr.clone(), assertion.clone()));
            }
            None => {
                payload.push((attr.clone(), "?".to_string()));
                params.push(to_sql(assertion, entity.get(attr)?)?);
            }
        }
    }
    session.execute(database, &dialect.round_robin_insert(class.table(), capacity, &payload), &params)?;

    let names: Vec<String> = read_back.iter().map(|(attr, _)| dialect.quote_ident(attr)).collect();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {} DESC LIMIT 1",
        names.join(", "),
        dialect.quote_ident(class.table()),
        dialect.quote_ident(DEFAULT_PRIMARY_KEY)
    );
    let latest = session
        .query(database, &sql, &[], |row| read_columns(row, &read_back))?
        .pop()
        .ok_or_else(|| AppError::RuntimeError(format!("{} is empty right after an insert", class.table())))?;
    for (attr, value) in latest {
        entity.put(&attr, value);
    }
    debug!("{} appended as id {} (slot {})", class.name(), entity.id(), entity.get(MODULO)?);
    Ok(())
}

/// Id of the row the next append overwrites, `None` while the table still has free slots.
pub fn evicted(session: &Session, database: &str, class: &Class) -> Result<Option<Value>, AppError> {
    let capacity = capacity_of(class)?;
    let dialect = session.dialect();
    let table = dialect.quote_ident(class.table());
    let id = dialect.quote_ident(DEFAULT_PRIMARY_KEY);
    let sql = format!(
        "SELECT {id} FROM {table} WHERE {} = (SELECT (COALESCE(MAX({id}), -1) + 1) % {capacity} FROM {table})",
        dialect.quote_ident(MODULO)
    );
    let key = slot_columns(class)?.into_iter().take(1).collect::<Vec<_>>();
    let mut rows = session.query(database, &sql, &[], |row| read_columns(row, &key))?;
    Ok(rows.pop().and_then(|mut row| row.remove(DEFAULT_PRIMARY_KEY)))
}

fn capacity_of(class: &Class) -> Result<usize, AppError> {
    match class.policy() {
        RowPolicy::RoundRobin { capacity } => Ok(capacity),
        RowPolicy::Standard => Err(AppError::InvalidArgument(format!("{} is not a round-robin class", class.name()))),
    }
}

fn slot_columns(class: &Class) -> Result<Vec<(String, Assertion)>, AppError> {
    [DEFAULT_PRIMARY_KEY, MODULO]
        .into_iter()
        .map(|attr| {
            class
                .assertion(attr)
                .map(|a| (attr.to_string(), a.clone()))
                .ok_or_else(|| AppError::InvalidArgument(format!("{} has no `{attr}` attribute", class.name())))
        })
        .collect()
}
