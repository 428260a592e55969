//! Persistent flat-L2 vector index with a parallel metadata list.
//!
//! The store owns two structures that must never drift apart: a row-major
//! matrix of embedding vectors and an ordered list of [`ChunkMetadata`],
//! where row *i* of the matrix belongs to entry *i* of the list. Callers only
//! see [`load`](VectorIndexStore::load), [`append`](VectorIndexStore::append),
//! [`search`](VectorIndexStore::search) and a few read-only summaries.
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/
//! ├── CURRENT                  "gen-00000000000000000007"
//! ├── gen-00000000000000000007/
//! │   ├── vectors.bin          KRAGVEC1 | dims: u32 | rows: u64 | f32 LE rows
//! │   └── metadata.json        [ChunkMetadata, ...]
//! ```
//!
//! Every mutation writes a complete new generation directory, fsyncs both
//! files, and only then replaces `CURRENT` by atomic rename. A crash before
//! the rename leaves the previous pair live; a crash after it leaves the new
//! pair live. Superseded generations are pruned best-effort.
//!
//! # Concurrency
//!
//! Appends are serialized by a writer mutex and, across processes, by an
//! exclusive lock on `<dir>/LOCK`, both held across load-modify-persist.
//! Under the lock a writer re-reads `CURRENT` and rebases on any generation
//! another handle swapped in, so concurrent writers never overwrite each
//! other. Searches clone an `Arc` of the current snapshot and scan it without
//! holding any lock, so they observe either the whole pre-append or the whole
//! post-append state. A handle only sees other handles' writes once it
//! writes itself or is reloaded.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::embedding::{blob_to_vec, l2_distance_squared, vec_to_blob};
use crate::error::IndexError;
use crate::models::{ChunkMetadata, RetrievedChunk};

const CURRENT_FILE: &str = "CURRENT";
const LOCK_FILE: &str = "LOCK";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";
const MAGIC: &[u8; 8] = b"KRAGVEC1";
const HEADER_LEN: usize = 8 + 4 + 8;

/// Immutable view of the index at one generation.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    generation: u64,
    dims: Option<usize>,
    /// Row-major, `metadata.len() * dims` values.
    vectors: Vec<f32>,
    metadata: Vec<ChunkMetadata>,
}

impl Snapshot {
    fn rows(&self) -> usize {
        self.metadata.len()
    }

    fn row(&self, i: usize) -> &[f32] {
        let d = self.dims.unwrap_or(0);
        &self.vectors[i * d..(i + 1) * d]
    }
}

/// Summary of the live index, for `krag stats` and health output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub generation: u64,
    pub rows: usize,
    pub dims: Option<usize>,
    pub documents: usize,
}

/// The vector index store. Share it behind an `Arc`.
pub struct VectorIndexStore {
    dir: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl VectorIndexStore {
    /// Load the live generation from `dir`.
    ///
    /// A directory without a `CURRENT` file (or a missing directory) yields
    /// an empty store whose dimension is not yet determined.
    ///
    /// # Errors
    ///
    /// [`IndexError::Corrupt`] when the referenced pair is missing, unreadable,
    /// or the vector row count differs from the metadata length.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dir = dir.into();
        let snapshot = read_current(&dir)?;
        debug!(
            dir = %dir.display(),
            generation = snapshot.generation,
            rows = snapshot.rows(),
            "loaded vector index"
        );
        Ok(Self {
            dir,
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// An empty store over `dir` that ignores whatever is persisted there.
    ///
    /// Used to recover from a corrupt index: the next write starts a
    /// generation newer than any directory already present.
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let newest = fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| parse_generation_name(&e.file_name().to_string_lossy()))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        Self {
            dir,
            snapshot: RwLock::new(Arc::new(Snapshot {
                generation: newest,
                ..Snapshot::default()
            })),
            writer: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn publish(&self, next: Snapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(next);
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.current().rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension fixed by the first vector ever added, if any.
    pub fn dims(&self) -> Option<usize> {
        self.current().dims
    }

    pub fn stats(&self) -> IndexStats {
        let snap = self.current();
        let documents = snap
            .metadata
            .iter()
            .map(|m| m.document_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        IndexStats {
            generation: snap.generation,
            rows: snap.rows(),
            dims: snap.dims,
            documents,
        }
    }

    /// Whether any row belongs to `document_id` with the given content hash.
    pub fn contains_document(&self, document_id: &str, content_hash: &str) -> bool {
        self.current()
            .metadata
            .iter()
            .any(|m| m.document_id == document_id && m.content_hash == content_hash)
    }

    /// Append `vectors` and their `metadata` in lock-step and persist the pair.
    ///
    /// Returns the row count after the append. On any error the in-memory
    /// store and the on-disk pair are both left at the previous generation.
    pub fn append(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
    ) -> Result<usize, IndexError> {
        self.append_inner(vectors, metadata, None)
            .map(|rows| rows.unwrap_or_else(|| self.len()))
    }

    /// Like [`append`](Self::append), unless rows for `document_id` with
    /// `content_hash` are already present when the writer lock is taken.
    ///
    /// Returns `None` when the batch was dropped as a duplicate.
    pub fn append_if_absent(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        document_id: &str,
        content_hash: &str,
    ) -> Result<Option<usize>, IndexError> {
        self.append_inner(vectors, metadata, Some((document_id, content_hash)))
    }

    fn append_inner(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        unless_present: Option<(&str, &str)>,
    ) -> Result<Option<usize>, IndexError> {
        if vectors.len() != metadata.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        if vectors.is_empty() {
            return Err(IndexError::EmptyBatch);
        }

        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _dir_lock = lock_dir(&self.dir)?;
        let base = self.rebase()?;

        if let Some((document_id, content_hash)) = unless_present {
            let present = base
                .metadata
                .iter()
                .any(|m| m.document_id == document_id && m.content_hash == content_hash);
            if present {
                return Ok(None);
            }
        }

        let dims = base.dims.unwrap_or(vectors[0].len());
        if dims == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }

        let mut next = Snapshot {
            generation: base.generation + 1,
            dims: Some(dims),
            vectors: Vec::with_capacity(base.vectors.len() + vectors.len() * dims),
            metadata: Vec::with_capacity(base.rows() + metadata.len()),
        };
        next.vectors.extend_from_slice(&base.vectors);
        next.metadata.extend_from_slice(&base.metadata);
        for v in &vectors {
            next.vectors.extend_from_slice(v);
        }
        next.metadata.extend(metadata);

        write_generation(&self.dir, &next)?;
        let rows = next.rows();
        self.publish(next);
        prune_generations(&self.dir, generation_name(base.generation + 1));
        Ok(Some(rows))
    }

    /// The live snapshot, reloaded first if another handle swapped `CURRENT`.
    ///
    /// Must be called with the directory lock held.
    fn rebase(&self) -> Result<Arc<Snapshot>, IndexError> {
        let base = self.current();
        let on_disk = read_current_name(&self.dir)?.map_or(0, |(generation, _)| generation);
        if on_disk == base.generation {
            return Ok(base);
        }
        let fresh = Arc::new(read_current(&self.dir)?);
        debug!(
            dir = %self.dir.display(),
            from = base.generation,
            to = fresh.generation,
            "index advanced by another writer, rebasing"
        );
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::clone(&fresh);
        Ok(fresh)
    }

    /// Discard every row, persisting an empty generation.
    ///
    /// The dimension becomes undetermined again, so a rebuild may switch
    /// embedding models.
    pub fn reset(&self) -> Result<(), IndexError> {
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _dir_lock = lock_dir(&self.dir)?;
        // Only the generation number is needed; the pair it names may be corrupt.
        let on_disk = read_current_name(&self.dir)
            .ok()
            .flatten()
            .map_or(0, |(generation, _)| generation);
        let next = Snapshot {
            generation: on_disk.max(self.current().generation) + 1,
            ..Snapshot::default()
        };
        write_generation(&self.dir, &next)?;
        let name = generation_name(next.generation);
        self.publish(next);
        prune_generations(&self.dir, name);
        Ok(())
    }

    /// The `k` rows nearest to `query` by L2 distance, closest first.
    ///
    /// Ties keep insertion order. An empty store returns an empty result.
    ///
    /// # Errors
    ///
    /// [`IndexError::DimensionMismatch`] when the store is non-empty and the
    /// query has a different dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        let snap = self.current();
        let dims = match snap.dims {
            Some(d) if snap.rows() > 0 => d,
            _ => return Ok(Vec::new()),
        };
        if query.len() != dims {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = (0..snap.rows())
            .map(|i| (l2_distance_squared(query, snap.row(i)), i))
            .collect();

        let by_distance =
            |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_by(by_distance);

        Ok(scored
            .into_iter()
            .map(|(d2, i)| RetrievedChunk {
                metadata: snap.metadata[i].clone(),
                distance: d2.sqrt(),
            })
            .collect())
    }
}

fn generation_name(generation: u64) -> String {
    format!("gen-{:020}", generation)
}

fn parse_generation_name(name: &str) -> Option<u64> {
    name.strip_prefix("gen-")?.parse().ok()
}

/// Take the cross-process writer lock on `dir`, creating the directory.
///
/// The lock is released when the returned file is dropped.
fn lock_dir(dir: &Path) -> Result<File, IndexError> {
    fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| IndexError::io(&path, e))?;
    FileExt::lock_exclusive(&file).map_err(|e| IndexError::io(&path, e))?;
    Ok(file)
}

/// The generation named by `CURRENT`, or `None` when there is none yet.
fn read_current_name(dir: &Path) -> Result<Option<(u64, String)>, IndexError> {
    let current_path = dir.join(CURRENT_FILE);
    let name = match fs::read_to_string(&current_path) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IndexError::io(&current_path, e)),
    };
    let generation = parse_generation_name(&name).ok_or_else(|| {
        IndexError::corrupt(&current_path, format!("invalid generation name '{}'", name))
    })?;
    Ok(Some((generation, name)))
}

fn read_current(dir: &Path) -> Result<Snapshot, IndexError> {
    let (generation, name) = match read_current_name(dir)? {
        Some(current) => current,
        None => return Ok(Snapshot::default()),
    };

    let gen_dir = dir.join(&name);
    let (dims, rows, vectors) = read_vectors(&gen_dir.join(VECTORS_FILE))?;
    let metadata = read_metadata(&gen_dir.join(METADATA_FILE))?;

    if rows != metadata.len() {
        return Err(IndexError::corrupt(
            &gen_dir,
            format!(
                "index holds {} rows but metadata lists {} entries",
                rows,
                metadata.len()
            ),
        ));
    }

    Ok(Snapshot {
        generation,
        dims: if dims == 0 { None } else { Some(dims) },
        vectors,
        metadata,
    })
}

fn read_vectors(path: &Path) -> Result<(usize, usize, Vec<f32>), IndexError> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IndexError::corrupt(path, "vector file missing")
        } else {
            IndexError::io(path, e)
        }
    })?;

    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err(IndexError::corrupt(path, "bad vector file header"));
    }
    let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut rows_le = [0u8; 8];
    rows_le.copy_from_slice(&bytes[12..20]);
    let rows = u64::from_le_bytes(rows_le) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| IndexError::corrupt(path, "vector file header overflows"))?;
    if body.len() != expected || (rows > 0 && dims == 0) {
        return Err(IndexError::corrupt(
            path,
            format!(
                "expected {} bytes for {} rows of {} dims, found {}",
                expected,
                rows,
                dims,
                body.len()
            ),
        ));
    }

    Ok((dims, rows, blob_to_vec(body)))
}

fn read_metadata(path: &Path) -> Result<Vec<ChunkMetadata>, IndexError> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IndexError::corrupt(path, "metadata file missing")
        } else {
            IndexError::io(path, e)
        }
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| IndexError::corrupt(path, format!("unreadable metadata: {}", e)))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut file = File::create(path).map_err(|e| IndexError::io(path, e))?;
    file.write_all(bytes).map_err(|e| IndexError::io(path, e))?;
    file.sync_all().map_err(|e| IndexError::io(path, e))
}

/// Write both halves of `snap` into a fresh generation, then swap `CURRENT`.
fn write_generation(dir: &Path, snap: &Snapshot) -> Result<(), IndexError> {
    let name = generation_name(snap.generation);
    let gen_dir = dir.join(&name);
    fs::create_dir_all(&gen_dir).map_err(|e| IndexError::io(&gen_dir, e))?;

    let dims = snap.dims.unwrap_or(0);
    let mut vectors = Vec::with_capacity(HEADER_LEN + snap.vectors.len() * 4);
    vectors.extend_from_slice(MAGIC);
    vectors.extend_from_slice(&(dims as u32).to_le_bytes());
    vectors.extend_from_slice(&(snap.rows() as u64).to_le_bytes());
    vectors.extend_from_slice(&vec_to_blob(&snap.vectors));
    write_synced(&gen_dir.join(VECTORS_FILE), &vectors)?;

    let metadata = serde_json::to_vec(&snap.metadata)?;
    write_synced(&gen_dir.join(METADATA_FILE), &metadata)?;

    let tmp = dir.join(format!("{}.tmp", CURRENT_FILE));
    write_synced(&tmp, format!("{}\n", name).as_bytes())?;
    let current = dir.join(CURRENT_FILE);
    fs::rename(&tmp, &current).map_err(|e| IndexError::io(&current, e))?;

    // Persist the rename itself; not supported on every platform.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }

    debug!(
        dir = %dir.display(),
        generation = snap.generation,
        rows = snap.rows(),
        "swapped index generation"
    );
    Ok(())
}

/// Remove every generation directory except `keep`.
fn prune_generations(dir: &Path, keep: String) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not list index generations");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == keep || parse_generation_name(&name).is_none() {
            continue;
        }
        if let Err(e) = fs::remove_dir_all(entry.path()) {
            warn!(
                path = %entry.path().display(),
                error = %e,
                "could not prune old index generation"
            );
        }
    }
}
