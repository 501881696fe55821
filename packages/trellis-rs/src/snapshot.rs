//! Lazily-encoded state snapshots.
//!
//! A [`Snapshot`] captures *what* to serialize eagerly and encodes bytes only
//! when [`Snapshot::bytes`] is first called; the result is memoised so every
//! later read returns the same bytes.
//!
//! # Tree Format
//!
//! The runtime nests each node's own snapshot together with its children's.
//! All integers are unsigned 32-bit big-endian:
//!
//! ```text
//! tree  := u32 own_len, own[own_len], u32 child_count, child*
//! child := u32 type_len, type_utf8, u32 name_len, name_utf8, u32 tree_len, tree[tree_len]
//! ```
//!
//! `type_utf8` is the child workflow's Rust type name and `name_utf8` its key
//! string. `own_len == 0` means the node captured nothing and will be
//! restored from its props alone.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::warn;

use crate::error::WorkflowError;
use crate::key::Key;

type EncodeFn = Box<dyn Fn() -> Vec<u8> + Send + Sync>;

/// Serialized state of one workflow, or of a whole tree.
///
/// Cheap to clone; clones share the memoised bytes.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<Inner>,
}

struct Inner {
    bytes: OnceLock<Vec<u8>>,
    encode: Option<EncodeFn>,
}

impl Snapshot {
    /// A snapshot with no bytes. Restoring from it falls back to props.
    pub fn empty() -> Self {
        Self::of_bytes(Vec::new())
    }

    /// A snapshot of already-encoded bytes.
    pub fn of_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(bytes.into());
        Self {
            inner: Arc::new(Inner {
                bytes: cell,
                encode: None,
            }),
        }
    }

    /// A snapshot of a UTF-8 string.
    pub fn of_str(value: impl AsRef<str>) -> Self {
        Self::of_bytes(value.as_ref().as_bytes().to_vec())
    }

    /// A snapshot of a single big-endian `u32`.
    pub fn of_u32(value: u32) -> Self {
        Self::of_bytes(value.to_be_bytes().to_vec())
    }

    /// A snapshot whose bytes are produced by `encode` on first read.
    pub fn lazy<F>(encode: F) -> Self
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                bytes: OnceLock::new(),
                encode: Some(Box::new(encode)),
            }),
        }
    }

    /// A snapshot that encodes `value` as JSON on first read.
    ///
    /// If serialization fails the failure is logged and the snapshot is empty,
    /// so the workflow restores from props.
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::lazy(move || match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    value_type = std::any::type_name::<T>(),
                    error = %e,
                    "snapshot serialization failed, capturing nothing"
                );
                Vec::new()
            }
        })
    }

    /// A snapshot built with a [`SnapshotWriter`] on first read.
    ///
    /// ```ignore
    /// Snapshot::write(move |w| {
    ///     w.write_u32(count).write_str_with_length(&label);
    /// })
    /// ```
    pub fn write<F>(write: F) -> Self
    where
        F: Fn(&mut SnapshotWriter) + Send + Sync + 'static,
    {
        Self::lazy(move || {
            let mut writer = SnapshotWriter::new();
            write(&mut writer);
            writer.into_bytes()
        })
    }

    /// The encoded bytes, computing them on first call.
    pub fn bytes(&self) -> &[u8] {
        self.inner.bytes.get_or_init(|| match &self.inner.encode {
            Some(encode) => encode(),
            None => Vec::new(),
        })
    }

    /// Returns true once the bytes have been computed.
    pub fn is_encoded(&self) -> bool {
        self.inner.bytes.get().is_some()
    }

    /// Decode the bytes as JSON.
    pub fn to_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, WorkflowError> {
        serde_json::from_slice(self.bytes()).map_err(|e| WorkflowError::snapshot(e.to_string()))
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.bytes.get() {
            Some(bytes) => write!(f, "Snapshot({} bytes)", bytes.len()),
            None => write!(f, "Snapshot(<lazy>)"),
        }
    }
}

// =============================================================================
// Writer / Reader
// =============================================================================

/// Appends length-prefixed big-endian fields to a byte buffer.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Written as a `u32` of 0 or 1.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u32(u32::from(value))
    }

    pub fn write_bytes_with_length(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_u32(len_u32(bytes.len()));
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_str_with_length(&mut self, value: &str) -> &mut Self {
        self.write_bytes_with_length(value.as_bytes())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields written by a [`SnapshotWriter`].
///
/// Every read fails with `WorkflowError::SnapshotCorrupt` instead of panicking
/// when the buffer is too short.
#[derive(Debug, Clone)]
pub struct SnapshotReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WorkflowError> {
        if self.remaining() < n {
            return Err(WorkflowError::snapshot(format!(
                "needed {n} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WorkflowError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, WorkflowError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, WorkflowError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, WorkflowError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, WorkflowError> {
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WorkflowError::snapshot(format!("invalid bool {other}"))),
        }
    }

    pub fn read_bytes_with_length(&mut self) -> Result<&'a [u8], WorkflowError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_str_with_length(&mut self) -> Result<&'a str, WorkflowError> {
        let bytes = self.read_bytes_with_length()?;
        std::str::from_utf8(bytes).map_err(|e| WorkflowError::snapshot(e.to_string()))
    }
}

fn len_u32(len: usize) -> u32 {
    // Snapshots over 4 GiB are not representable in the format.
    u32::try_from(len).unwrap_or(u32::MAX)
}

// =============================================================================
// Tree encoding
// =============================================================================

/// Persistent identity of a child inside a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SnapshotKey {
    pub type_name: String,
    pub name: String,
}

impl From<&Key> for SnapshotKey {
    fn from(key: &Key) -> Self {
        Self {
            type_name: key.type_name().to_string(),
            name: key.name().to_string(),
        }
    }
}

/// A decoded tree snapshot: this node's own bytes plus each child's subtree.
#[derive(Debug, Default)]
pub(crate) struct ParsedTree {
    pub own: Option<Vec<u8>>,
    pub children: Vec<(SnapshotKey, Vec<u8>)>,
}

/// Nest a node's own snapshot with its children's. Nothing is encoded until
/// the returned snapshot's bytes are read.
pub(crate) fn tree(own: Snapshot, children: Vec<(Key, Snapshot)>) -> Snapshot {
    Snapshot::lazy(move || {
        let mut w = SnapshotWriter::new();
        w.write_bytes_with_length(own.bytes());
        w.write_u32(len_u32(children.len()));
        for (key, child) in &children {
            w.write_str_with_length(key.type_name())
                .write_str_with_length(key.name())
                .write_bytes_with_length(child.bytes());
        }
        w.into_bytes()
    })
}

pub(crate) fn parse_tree(bytes: &[u8]) -> Result<ParsedTree, WorkflowError> {
    if bytes.is_empty() {
        return Ok(ParsedTree::default());
    }
    let mut r = SnapshotReader::new(bytes);
    let own = r.read_bytes_with_length()?;
    let count = r.read_u32()?;
    let mut children = Vec::new();
    for _ in 0..count {
        let type_name = r.read_str_with_length()?.to_string();
        let name = r.read_str_with_length()?.to_string();
        let subtree = r.read_bytes_with_length()?.to_vec();
        children.push((SnapshotKey { type_name, name }, subtree));
    }
    if !r.is_exhausted() {
        return Err(WorkflowError::snapshot(format!(
            "{} trailing bytes after tree",
            r.remaining()
        )));
    }
    Ok(ParsedTree {
        own: (!own.is_empty()).then(|| own.to_vec()),
        children,
    })
}
