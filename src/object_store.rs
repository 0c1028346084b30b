use std::{
    fs,
    io::Read,
    path::PathBuf,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ObjectStoreError;

/// Durable staging area for CSV exports and model artifacts.  Keys are
/// `/`-separated paths relative to the root directory, e.g.
/// `weather_backfill/Zurich.csv.gz`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    pub root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> ObjectStore {
        ObjectStore { root: root.into() }
    }

    /// Return the filesystem path of a key.  Does not check if it exists.
    pub fn local_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.local_path(key).is_file()
    }

    /// Write the object.  The bytes land in a temporary file first so a
    /// reader never sees a partial object.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        let path = self.local_path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ObjectStoreError::Io(dir.to_path_buf(), e))?;
        }
        let tmp = path.with_extension("partial");
        fs::write(&tmp, bytes).map_err(|e| ObjectStoreError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &path).map_err(|e| ObjectStoreError::Io(path, e))
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.local_path(key);
        if !path.is_file() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        fs::read(&path).map_err(|e| ObjectStoreError::Io(path, e))
    }

    /// All keys starting with `prefix`, sorted.  Only looks into the
    /// directory the prefix points to, not below.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let (dir_key, name_prefix) = match prefix.rfind('/') {
            Some(i) => (&prefix[..i], &prefix[i + 1..]),
            None => ("", prefix),
        };
        let dir = self.local_path(dir_key);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| ObjectStoreError::Io(dir.clone(), e))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ObjectStoreError::Io(dir.clone(), e))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(name_prefix) && !name.ends_with(".partial") {
                keys.push(match dir_key {
                    "" => name,
                    _ => format!("{}/{}", dir_key, name),
                });
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// The lexicographically largest key with this prefix and suffix.  Keys
    /// carry a fixed-width UTC timestamp so this is also the most recent one.
    pub fn latest(&self, prefix: &str, suffix: &str) -> Result<Option<String>, ObjectStoreError> {
        Ok(self
            .list(prefix)?
            .into_iter()
            .filter(|key| key.ends_with(suffix))
            .max())
    }

    /// Serialize rows as a gzipped CSV file with a header.
    pub fn put_csv_gz<T: Serialize>(&self, key: &str, rows: &[T]) -> Result<(), ObjectStoreError> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut wtr = csv::Writer::from_writer(encoder);
        for row in rows {
            wtr.serialize(row)
                .map_err(|e| ObjectStoreError::Csv(key.to_string(), e))?;
        }
        let encoder = wtr
            .into_inner()
            .map_err(|e| ObjectStoreError::Io(self.local_path(key), e.into_error()))?;
        let bytes = encoder
            .finish()
            .map_err(|e| ObjectStoreError::Io(self.local_path(key), e))?;
        self.put(key, &bytes)
    }

    /// Serialize rows as a plain CSV file with a header.
    pub fn put_csv<T: Serialize>(&self, key: &str, rows: &[T]) -> Result<(), ObjectStoreError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        for row in rows {
            wtr.serialize(row)
                .map_err(|e| ObjectStoreError::Csv(key.to_string(), e))?;
        }
        wtr.flush()
            .map_err(|e| ObjectStoreError::Io(self.local_path(key), e))?;
        let bytes = wtr
            .into_inner()
            .map_err(|e| ObjectStoreError::Io(self.local_path(key), e.into_error()))?;
        self.put(key, &bytes)
    }

    /// Read a CSV object, gzipped if the key ends with `.gz`.
    pub fn get_csv<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, ObjectStoreError> {
        let bytes = self.get(key)?;
        let text = if key.ends_with(".gz") {
            let mut buffer = String::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_string(&mut buffer)
                .map_err(|e| ObjectStoreError::Io(self.local_path(key), e))?;
            buffer
        } else {
            String::from_utf8_lossy(&bytes).to_string()
        };
        let mut rdr = csv::Reader::from_reader(text.as_bytes());
        rdr.deserialize()
            .map(|row| row.map_err(|e| ObjectStoreError::Csv(key.to_string(), e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        timestamp: String,
        predicted_load_mw: f64,
    }

    #[test]
    fn put_get_and_latest() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::new(dir.path());
        store.put("modelling/ols_model_20250101_000000.json", b"{}")?;
        store.put("modelling/ols_model_20250301_120000.json", b"{}")?;
        store.put("modelling/ols_model_20250201_000000.json", b"{}")?;
        store.put("modelling/predictions_20250401_000000.csv", b"")?;

        assert_eq!(store.get("modelling/ols_model_20250101_000000.json")?, b"{}");
        assert!(matches!(
            store.get("modelling/missing.json"),
            Err(ObjectStoreError::NotFound(_))
        ));
        assert_eq!(store.list("modelling/ols_model_")?.len(), 3);
        assert_eq!(
            store.latest("modelling/ols_model_", ".json")?,
            Some("modelling/ols_model_20250301_120000.json".to_string())
        );
        assert_eq!(store.latest("nothing/here_", ".json")?, None);
        Ok(())
    }

    #[test]
    fn csv_objects() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::new(dir.path());
        let rows = vec![
            Row {
                timestamp: "2025-01-01T00:00:00Z".into(),
                predicted_load_mw: 7012.5,
            },
            Row {
                timestamp: "2025-01-01T01:00:00Z".into(),
                predicted_load_mw: 6840.0,
            },
        ];
        store.put_csv_gz("exports/rows.csv.gz", &rows)?;
        store.put_csv("exports/rows.csv", &rows)?;
        assert_eq!(store.get_csv::<Row>("exports/rows.csv.gz")?, rows);
        assert_eq!(store.get_csv::<Row>("exports/rows.csv")?, rows);
        assert!(store.exists("exports/rows.csv"));
        Ok(())
    }
}
