use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use super::{decode_locus, DurableStore, StoreError};
use crate::genomics::Locus;

/// Durable store backed by a single SQLite table.
///
/// In multi-threaded applications, each thread should open its own store.
#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    const CREATE_TABLE: &'static str = "CREATE TABLE IF NOT EXISTS Loci (
            key INTEGER PRIMARY KEY,
            value BLOB NOT NULL
        ) STRICT";

    const UPSERT: &'static str = "INSERT INTO Loci(key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value";

    const SELECT: &'static str = "SELECT value FROM Loci WHERE key = ?1";

    /// Opens (or creates) the database in the given file.
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self, StoreError> {
        Self::initialize(Connection::open(filename)?)
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(connection: Connection) -> Result<Self, StoreError> {
        connection.execute(Self::CREATE_TABLE, ())?;
        Ok(Self { connection })
    }

    /// Returns the filename of the database, if it has one.
    pub fn filename(&self) -> Option<&str> {
        self.connection.path()
    }

    /// Number of stored loci.
    pub fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM Loci", (), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Stored keys in ascending order.
    pub fn keys(&self) -> Result<Vec<u64>, StoreError> {
        let mut statement = self.connection.prepare("SELECT key FROM Loci ORDER BY key")?;
        let keys = statement
            .query_map((), |row| row.get::<_, i64>(0))?
            .map(|key| key.map(|k| k as u64))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Decode every stored locus in position order.
    pub fn load_all(&self) -> Result<Vec<Locus>, StoreError> {
        let mut statement = self.connection.prepare("SELECT value FROM Loci ORDER BY key")?;
        let blobs = statement
            .query_map((), |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        blobs.iter().map(|bytes| decode_locus(bytes)).collect()
    }
}

impl DurableStore for SqliteStore {
    fn get(&self, key: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let mut select = self.connection.prepare_cached(Self::SELECT)?;
        let value = select
            .query_row((key as i64,), |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: u64, value: &[u8]) -> Result<(), StoreError> {
        let mut upsert = self.connection.prepare_cached(Self::UPSERT)?;
        upsert.execute((key as i64, value))?;
        Ok(())
    }

    fn set_many(&mut self, entries: &[(u64, Vec<u8>)]) -> Result<(), StoreError> {
        let transaction = self.connection.transaction()?;
        {
            let mut upsert = transaction.prepare_cached(Self::UPSERT)?;
            for (key, value) in entries {
                upsert.execute((*key as i64, value.as_slice()))?;
            }
        }
        transaction.commit()?;
        Ok(())
    }
}
