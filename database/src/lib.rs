use core::ops::{Bound, RangeFrom};
use std::{
    borrow::Cow,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use bytesize::ByteSize;
use im::OrdMap;
use itertools::Either;
use libmdbx::{DatabaseFlags, Environment, Geometry, WriteFlags};
use log::info;
use snap::raw::{Decoder, Encoder};
use tap::Pipe as _;
use thiserror::Error;

const GROWTH_STEP: ByteSize = ByteSize::mib(64);
const MAX_NAMED_DATABASES: usize = 4;

/// Keys of a single kind share a textual prefix so that they can be scanned in order.
pub trait PrefixableKey {
    const PREFIX: &'static str;

    #[must_use]
    fn has_prefix(bytes: &[u8]) -> bool {
        bytes.starts_with(Self::PREFIX.as_bytes())
    }
}

/// Puts and deletes applied by [`Database::write`] in a single transaction.
///
/// Operations are applied in insertion order, so a later put of the same key wins.
#[derive(Default)]
pub struct Batch {
    operations: Vec<Operation>,
}

impl Batch {
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.operations.push(Operation::Put {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        });
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.operations.push(Operation::Delete {
            key: key.as_ref().to_vec(),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

enum Operation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

pub struct Database(DatabaseKind);

impl Database {
    pub fn persistent(name: &str, directory: impl AsRef<Path>, max_size: ByteSize) -> Result<Self> {
        let directory = directory.as_ref();

        fs_err::create_dir_all(directory)?;

        let environment = Environment::builder()
            .set_max_dbs(MAX_NAMED_DATABASES)
            .set_geometry(Geometry {
                size: Some(..usize::try_from(max_size.as_u64())?),
                growth_step: Some(isize::try_from(GROWTH_STEP.as_u64())?),
                shrink_threshold: None,
                page_size: None,
            })
            .open(directory)?;

        let transaction = environment.begin_rw_txn()?;
        transaction.create_db(Some(name), DatabaseFlags::default())?;
        transaction.commit()?;

        info!(
            "opened database {name} in {} (maximum size: {max_size})",
            directory.display(),
        );

        Ok(Self(DatabaseKind::Persistent {
            database_name: name.to_owned(),
            environment,
        }))
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self(DatabaseKind::InMemory {
            map: Mutex::default(),
        })
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let contains_key = match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;
                transaction
                    .get::<()>(database.dbi(), key.as_ref())?
                    .is_some()
            }
            DatabaseKind::InMemory { map } => map
                .lock()
                .expect("in-memory database mutex is poisoned")
                .contains_key(key.as_ref()),
        };

        Ok(contains_key)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                transaction
                    .get::<Cow<_>>(database.dbi(), key.as_ref())?
                    .map(|compressed| decompress(&compressed))
            }
            DatabaseKind::InMemory { map } => map
                .lock()
                .expect("in-memory database mutex is poisoned")
                .get(key.as_ref())
                .map(|compressed| decompress(compressed)),
        }
        .transpose()
    }

    /// Iterates over pairs with keys greater than or equal to the start of `range`.
    ///
    /// The iterator reads from a snapshot taken when this method is called.
    /// Writes made afterwards are not visible through it.
    #[expect(clippy::type_complexity)]
    pub fn iterator_ascending(
        &self,
        range: RangeFrom<impl AsRef<[u8]>>,
    ) -> Result<impl Iterator<Item = Result<(Cow<[u8]>, Vec<u8>)>>> {
        let start = range.start.as_ref();

        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                let mut cursor = transaction.cursor(&database)?;

                cursor
                    .set_range(start)
                    .transpose()
                    .into_iter()
                    .chain(core::iter::from_fn(move || cursor.next().transpose()))
                    .map(|result| decompress_pair(result?))
                    .pipe(Either::Left)
            }
            DatabaseKind::InMemory { map } => {
                let snapshot = map
                    .lock()
                    .expect("in-memory database mutex is poisoned")
                    .clone();

                let pairs = snapshot
                    .range::<_, [u8]>((Bound::Included(start), Bound::Unbounded))
                    .map(|(key, value)| Ok((Cow::Owned(key.to_vec()), decompress(value)?)))
                    .collect::<Vec<_>>();

                pairs.into_iter().pipe(Either::Right)
            }
        }
        .pipe(Ok)
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let mut batch = Batch::default();
        batch.put(key, value);
        self.write(batch)
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let mut batch = Batch::default();
        batch.delete(key);
        self.write(batch)
    }

    /// Applies every operation in `batch` or none of them.
    pub fn write(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_rw_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                for operation in batch.operations {
                    match operation {
                        Operation::Put { key, value } => {
                            let compressed = compress(&value)?;
                            let flags = WriteFlags::default();
                            transaction.put(database.dbi(), key, compressed, flags)?;
                        }
                        Operation::Delete { key } => {
                            transaction.del(database.dbi(), key, None)?;
                        }
                    }
                }

                transaction.commit()?;
            }
            DatabaseKind::InMemory { map } => {
                // Mutate a copy and swap it in at the end so that a failed compression
                // leaves the map untouched.
                let mut map = map.lock().expect("in-memory database mutex is poisoned");
                let mut new_map = map.clone();

                for operation in batch.operations {
                    match operation {
                        Operation::Put { key, value } => {
                            let compressed = compress(&value)?.into();
                            new_map.insert(key.into(), compressed);
                        }
                        Operation::Delete { key } => {
                            new_map.remove(key.as_slice());
                        }
                    }
                }

                *map = new_map;
            }
        }

        Ok(())
    }

    const fn kind(&self) -> &DatabaseKind {
        &self.0
    }
}

enum DatabaseKind {
    Persistent {
        database_name: String,
        environment: Environment,
    },
    InMemory {
        // `Arc<[u8]>` keeps clones of the map cheap.
        // Both `write` and `iterator_ascending` clone it.
        map: Mutex<InMemoryMap>,
    },
}

#[derive(Debug, Error)]
#[error("database value could not be decompressed")]
struct CorruptValue;

type InMemoryMap = OrdMap<Arc<[u8]>, Arc<[u8]>>;

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    Encoder::new().compress_vec(data).map_err(Into::into)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    Decoder::new()
        .decompress_vec(data)
        .map_err(|error| anyhow::Error::new(error).context(CorruptValue))
}

fn decompress_pair<K>((key, compressed_value): (K, Cow<[u8]>)) -> Result<(K, Vec<u8>)> {
    let value = decompress(&compressed_value)?;
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;

    type Constructor = fn() -> Result<(Database, Option<TempDir>)>;

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn test_delete(constructor: Constructor) -> Result<()> {
        let (database, _directory) = constructor()?;

        database.delete("C")?;
        database.delete("D")?;

        assert_pairs_eq(
            database.iterator_ascending("A"..)?,
            [("A", "1"), ("B", "2"), ("E", "5")],
        )?;

        Ok(())
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn test_contains_key(constructor: Constructor) -> Result<()> {
        let (database, _directory) = constructor()?;

        assert!(database.contains_key("A")?);
        assert!(database.contains_key("C")?);
        assert!(!database.contains_key("D")?);
        assert!(database.contains_key("E")?);

        Ok(())
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn test_iterator_ascending(constructor: Constructor) -> Result<()> {
        let (database, _directory) = constructor()?;

        assert_pairs_eq(
            database.iterator_ascending("0"..)?,
            [("A", "1"), ("B", "2"), ("C", "3"), ("E", "5")],
        )?;

        assert_pairs_eq(
            database.iterator_ascending("C"..)?,
            [("C", "3"), ("E", "5")],
        )?;

        assert_pairs_eq(database.iterator_ascending("D"..)?, [("E", "5")])?;
        assert_pairs_eq(database.iterator_ascending("F"..)?, [])?;

        Ok(())
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn test_batch_applies_operations_in_order(constructor: Constructor) -> Result<()> {
        let (database, _directory) = constructor()?;

        let mut batch = Batch::default();
        batch.put("A", "10");
        batch.delete("B");
        batch.put("D", "4");
        batch.delete("D");
        batch.put("F", "6");
        batch.put("F", "7");

        assert_eq!(batch.len(), 6);

        database.write(batch)?;

        assert_pairs_eq(
            database.iterator_ascending("A"..)?,
            [("A", "10"), ("C", "3"), ("E", "5"), ("F", "7")],
        )?;

        Ok(())
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn test_iterator_does_not_see_later_writes(constructor: Constructor) -> Result<()> {
        let (database, _directory) = constructor()?;
        let iterator = database.iterator_ascending("A"..)?;

        let mut batch = Batch::default();
        batch.delete("A");
        batch.delete("B");
        batch.put("Z", "26");
        database.write(batch)?;

        assert_pairs_eq(iterator, [("A", "1"), ("B", "2"), ("C", "3"), ("E", "5")])?;

        Ok(())
    }

    #[test]
    fn test_persistent_database_survives_reopening() -> Result<()> {
        let directory = TempDir::new()?;

        Database::persistent("test_db", directory.path(), ByteSize::mib(1))?.put("K", "V")?;

        let reopened = Database::persistent("test_db", directory.path(), ByteSize::mib(1))?;

        assert_eq!(reopened.get("K")?, Some(b"V".to_vec()));

        Ok(())
    }

    #[test]
    fn test_prefixable_key() {
        struct CanonicalKey;

        impl PrefixableKey for CanonicalKey {
            const PREFIX: &'static str = "c";
        }

        assert!(CanonicalKey::has_prefix(b"c00000000000000000001"));
        assert!(!CanonicalKey::has_prefix(b"h00000000000000000001"));
    }

    fn build_persistent_database() -> Result<(Database, Option<TempDir>)> {
        let directory = TempDir::new()?;
        let database = Database::persistent("test_db", directory.path(), ByteSize::mib(1))?;
        populate_database(&database)?;
        Ok((database, Some(directory)))
    }

    fn build_in_memory_database() -> Result<(Database, Option<TempDir>)> {
        let database = Database::in_memory();
        populate_database(&database)?;
        Ok((database, None))
    }

    fn populate_database(database: &Database) -> Result<()> {
        let mut batch = Batch::default();
        batch.put("A", "1");
        batch.put("B", "2");
        batch.put("C", "3");
        database.write(batch)?;
        database.put("E", "5")
    }

    fn assert_pairs_eq<'strings>(
        actual_pairs: impl IntoIterator<Item = Result<(impl AsRef<[u8]>, impl AsRef<[u8]>)>>,
        expected_pairs: impl IntoIterator<Item = (&'strings str, &'strings str)>,
    ) -> Result<()> {
        let actual_pairs = to_string_pairs(actual_pairs)?;
        let expected_pairs = to_string_pairs(expected_pairs.into_iter().map(Ok))?;

        assert_eq!(actual_pairs, expected_pairs);

        Ok(())
    }

    fn to_string_pairs(
        pairs: impl IntoIterator<Item = Result<(impl AsRef<[u8]>, impl AsRef<[u8]>)>>,
    ) -> Result<Vec<(String, String)>> {
        pairs
            .into_iter()
            .map(|result| {
                let (key, value) = result?;
                let key_string = core::str::from_utf8(key.as_ref())?;
                let value_string = core::str::from_utf8(value.as_ref())?;
                Ok((key_string.to_owned(), value_string.to_owned()))
            })
            .collect()
    }
}
