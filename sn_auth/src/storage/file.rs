//! A durable key-value storage kept in a local file

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::Mutex,
};

use super::{KeyValueStorage, StorageError};

/// A key-value storage persisted as a JSON object in a local file
///
/// The file is rewritten on every change and created with owner-only
/// permissions on Unix. A missing file reads as an empty table.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Constructs a new file storage
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_table(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read(&self.path) {
            Ok(data) if data.is_empty() => Ok(BTreeMap::new()),
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(error) => Err(error.into()),
        }
    }

    fn write_table(&self, table: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            file_opts.mode(0o600);
        }

        let mut file = file_opts.open(&self.path)?;
        let data = serde_json::to_vec_pretty(table)?;
        file.write_all(&data)?;
        Ok(())
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("file storage lock poisoned".to_owned()))?;

        let mut table = self.read_table()?;
        f(&mut table);
        self.write_table(&table)
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_table()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|table| {
            table.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.update(|table| {
            table.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn missing_file_reads_as_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path().join("tokens.json"));

        assert_eq!(storage.get_item("anything")?, None);
        Ok(())
    }

    #[test]
    fn values_survive_a_new_instance() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.json");

        FileStorage::new(&path).set_item("sn-site-access", "a.b")?;
        FileStorage::new(&path).set_item("sn-site-refresh", "c.d")?;

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get_item("sn-site-access")?.as_deref(), Some("a.b"));
        assert_eq!(reopened.get_item("sn-site-refresh")?.as_deref(), Some("c.d"));
        Ok(())
    }

    #[test]
    fn removing_an_item_keeps_the_others() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path().join("tokens.json"));

        storage.set_item("a", "1")?;
        storage.set_item("b", "2")?;
        storage.remove_item("a")?;

        assert_eq!(storage.get_item("a")?, None);
        assert_eq!(storage.get_item("b")?.as_deref(), Some("2"));
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.json");
        fs::write(&path, "{ not json")?;

        let storage = FileStorage::new(path);
        assert!(matches!(storage.get_item("a"), Err(StorageError::Json(_))));
        Ok(())
    }

    #[test]
    fn probe_fails_when_directory_is_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path().join("missing").join("tokens.json"));

        assert!(!storage.probe());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn file_is_only_readable_by_owner() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.json");
        FileStorage::new(&path).set_item("k", "v")?;

        let mode = fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }
}
