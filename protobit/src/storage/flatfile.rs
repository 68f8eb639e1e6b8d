use crate::class::Class;
use crate::entity::Entity;
use crate::error::AppError;
use crate::storage::history::RevisionControl;
use crate::value::Value;
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exclusive advisory lock held until dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Polls for the lock every `poll` until `timeout` has passed.
    pub fn acquire(path: &Path, timeout: Duration, poll: Duration) -> Result<FileLock, AppError> {
        let failure = |source| AppError::LockFailure { path: path.to_path_buf(), source };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(failure)?;
        }
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path).map_err(failure)?;
        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(FileLock { file, path: path.to_path_buf() }),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(AppError::LockTimeoutExceeded { path: path.to_path_buf(), waited });
                    }
                    std::thread::sleep(poll.min(timeout - waited));
                }
                Err(e) => return Err(failure(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// One YAML snapshot per entity at `<root>/<class>/<id>`.
#[derive(Clone, Debug)]
pub struct FlatFileStore {
    root: PathBuf,
    scratch: PathBuf,
    lock_timeout: Duration,
    poll: Duration,
}

fn file_name(id: &Value) -> Result<String, AppError> {
    if id.is_null() || id.is_composite() {
        return Err(AppError::InvalidArgument(format!("`{id}` cannot name a flat file")));
    }
    let name: String = id
        .to_string()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect();
    if name.is_empty() || name.starts_with('.') {
        return Err(AppError::InvalidArgument(format!("`{id}` cannot name a flat file")));
    }
    Ok(name)
}

impl FlatFileStore {
    pub fn new(root: PathBuf, scratch: PathBuf, lock_timeout: Duration, poll: Duration) -> Self {
        FlatFileStore { root, scratch, lock_timeout, poll }
    }

    pub fn class_dir(&self, class: &Class) -> PathBuf {
        self.root.join(class.name())
    }

    pub fn path(&self, class: &Class, id: &Value) -> Result<PathBuf, AppError> {
        Ok(self.class_dir(class).join(file_name(id)?))
    }

    /// Lock keyed on (class, id).
    pub fn lock(&self, class: &Class, id: &Value) -> Result<FileLock, AppError> {
        let path = self.scratch.join("locks").join(class.name()).join(format!("{}.lock", file_name(id)?));
        FileLock::acquire(&path, self.lock_timeout, self.poll)
    }

    /// Next integer id of a class, one past the largest stored one. The returned lock keeps other
    /// writers from taking the same id until the snapshot is written.
    pub fn allocate_serial(&self, class: &Class) -> Result<(Value, FileLock), AppError> {
        let path = self.scratch.join("locks").join(class.name()).join(".serial.lock");
        let lock = FileLock::acquire(&path, self.lock_timeout, self.poll)?;
        let last = self.ids(class)?.iter().filter_map(Value::as_i64).max().unwrap_or(0);
        Ok((Value::Int(last + 1), lock))
    }

    /// Writes the snapshot through a temp file, inside a check-out/check-in cycle when `history` is given.
    pub fn write(&self, entity: &Entity, history: Option<(&dyn RevisionControl, &str)>) -> Result<PathBuf, AppError> {
        let class = entity.class();
        let path = self.path(class, entity.id())?;
        let _lock = self.lock(class, entity.id())?;
        let dir = self.class_dir(class);
        std::fs::create_dir_all(&dir).map_err(|e| AppError::file_access(&dir, e))?;

        if let Some((rc, _)) = history {
            rc.check_out(&path)?;
        }
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| AppError::file_access(&dir, e))?;
        tmp.write_all(entity.to_yaml()?.as_bytes())
            .map_err(|e| AppError::file_access(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| AppError::file_access(&path, e.error))?;
        if let Some((rc, comment)) = history {
            rc.check_in(&path, comment)?;
        }
        debug!("wrote {path:?}");
        Ok(path)
    }

    pub fn read(&self, class: &Arc<Class>, id: &Value) -> Result<Entity, AppError> {
        let path = self.path(class, id)?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::ObjectNotFound(format!("{} with id {id}", class.name())))
            }
            Err(e) => return Err(AppError::file_access(&path, e)),
        };
        Entity::from_yaml(class, &text)
    }

    /// Unlinks the snapshot; revision files stay.
    pub fn remove(&self, class: &Class, id: &Value) -> Result<(), AppError> {
        let path = self.path(class, id)?;
        let _lock = self.lock(class, id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::ObjectNotFound(format!("{} with id {id}", class.name())))
            }
            Err(e) => Err(AppError::file_access(&path, e)),
        }
    }

    pub fn exists(&self, class: &Class, id: &Value) -> Result<bool, AppError> {
        Ok(self.path(class, id)?.is_file())
    }

    /// Ids of every stored snapshot, sorted by file name.
    pub fn ids(&self, class: &Class) -> Result<Vec<Value>, AppError> {
        let dir = self.class_dir(class);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::file_access(&dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AppError::file_access(&dir, e))?;
            let is_file = entry.file_type().map_err(|e| AppError::file_access(entry.path(), e))?.is_file();
            let name = entry.file_name().to_string_lossy().to_string();
            if is_file && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        let key = class.assertion(class.primary_key());
        Ok(names
            .into_iter()
            .map(|name| match key {
                Some(assertion) => assertion.coerce(Value::Str(name)),
                None => Value::Str(name),
            })
            .collect())
    }

    pub fn find_by_name(&self, class: &Arc<Class>, name: &str) -> Result<Option<Entity>, AppError> {
        for id in self.ids(class)? {
            let entity = self.read(class, &id)?;
            if entity.name() == Some(name) {
                return Ok(Some(entity));
            }
        }
        Ok(None)
    }
}
