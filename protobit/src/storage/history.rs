use crate::error::AppError;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Check-out / check-in cycle wrapped around every flat-file write of a class with history.
pub trait RevisionControl {
    fn check_out(&self, path: &Path) -> Result<(), AppError>;
    fn check_in(&self, path: &Path, comment: &str) -> Result<(), AppError>;

    fn revisions(&self, _path: &Path) -> Result<Vec<Revision>, AppError> {
        Err(AppError::MethodIsAbstract("RevisionControl::revisions".into()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub number: u32,
    pub timestamp: DateTime<Utc>,
    pub comment: String,
    pub content: String,
}

/// `<dir>/RCS/<file>,v` next to the tracked file.
pub fn rcs_path(path: &Path) -> Result<PathBuf, AppError> {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(AppError::InvalidArgument(format!("{path:?} has no parent directory")));
    };
    Ok(dir.join("RCS").join(format!("{},v", name.to_string_lossy())))
}

/// Revision lists kept as YAML documents in the RCS directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileHistory;

impl FileHistory {
    fn load(archive: &Path) -> Result<Vec<Revision>, AppError> {
        match std::fs::read_to_string(archive) {
            Ok(text) => Ok(serde_yaml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AppError::file_access(archive, e)),
        }
    }
}

impl RevisionControl for FileHistory {
    fn check_out(&self, path: &Path) -> Result<(), AppError> {
        let archive = rcs_path(path)?;
        if let Some(dir) = archive.parent() {
            std::fs::create_dir_all(dir).map_err(|e| AppError::file_access(dir, e))?;
        }
        Ok(())
    }

    fn check_in(&self, path: &Path, comment: &str) -> Result<(), AppError> {
        let archive = rcs_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| AppError::file_access(path, e))?;
        let mut revisions = FileHistory::load(&archive)?;
        let number = revisions.last().map(|r| r.number + 1).unwrap_or(1);
        revisions.push(Revision { number, timestamp: Utc::now(), comment: comment.to_string(), content });

        let dir = archive
            .parent()
            .ok_or_else(|| AppError::InvalidArgument(format!("{archive:?} has no parent directory")))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".rev")
            .tempfile_in(dir)
            .map_err(|e| AppError::file_access(dir, e))?;
        tmp.write_all(serde_yaml::to_string(&revisions)?.as_bytes())
            .map_err(|e| AppError::file_access(tmp.path(), e))?;
        tmp.persist(&archive).map_err(|e| AppError::file_access(&archive, e.error))?;
        debug!("checked in {path:?} as revision {number}");
        Ok(())
    }

    fn revisions(&self, path: &Path) -> Result<Vec<Revision>, AppError> {
        FileHistory::load(&rcs_path(path)?)
    }
}

/// Shells out to the RCS `co` / `ci` binaries.
#[derive(Clone, Debug, Default)]
pub struct RcsCommand {
    bin_dir: Option<PathBuf>,
}

impl RcsCommand {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        RcsCommand { bin_dir }
    }

    fn binary(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn run(&self, name: &str, args: &[String], path: &Path) -> Result<(), AppError> {
        let binary = self.binary(name);
        let mut command = Command::new(&binary);
        command.args(args).arg(path);
        if let Some(dir) = path.parent() {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|e| AppError::file_access(&binary, e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AppError::RuntimeError(format!(
                "{} {:?} failed: {}",
                binary.display(),
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl RevisionControl for RcsCommand {
    fn check_out(&self, path: &Path) -> Result<(), AppError> {
        let archive = rcs_path(path)?;
        if let Some(dir) = archive.parent() {
            std::fs::create_dir_all(dir).map_err(|e| AppError::file_access(dir, e))?;
        }
        if archive.exists() {
            self.run("co", &["-l".to_string(), "-f".to_string(), "-q".to_string()], path)
        } else {
            Ok(())
        }
    }

    fn check_in(&self, path: &Path, comment: &str) -> Result<(), AppError> {
        let args = vec!["-u".to_string(), "-q".to_string(), format!("-m{comment}"), format!("-t-{comment}")];
        self.run("ci", &args, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn file_history_numbers_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Widget").join("42");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let history = FileHistory;
        for (i, body) in ["a: 1\n", "a: 2\n"].iter().enumerate() {
            history.check_out(&path).unwrap();
            std::fs::write(&path, body).unwrap();
            history.check_in(&path, &format!("save {i}")).unwrap();
        }
        let revisions = history.revisions(&path).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[1].number, 2);
        assert_eq!(revisions[1].content, "a: 2\n");
        assert_eq!(revisions[0].comment, "save 0");
        assert!(dir.path().join("Widget/RCS/42,v").exists());
    }

    #[test]
    fn revisions_default_to_abstract() {
        let rcs = RcsCommand::new(None);
        let err = rcs.revisions(Path::new("/tmp/x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodIsAbstract);
    }

    #[test]
    fn missing_rcs_binary_is_a_file_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1");
        std::fs::write(&path, "x").unwrap();
        let rcs = RcsCommand::new(Some(dir.path().join("no-such-bin")));
        let err = rcs.check_in(&path, "first").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileAccessError);
    }
}
