use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Result, StreamError};

const ESCAPED_SEPARATOR: &str = "\\\\";
const SEPARATOR: &str = "\\";

/// Identifier of the record owning a streamed object.
///
/// Maps to the unique row identifier column the database associates with the
/// streaming-enabled blob column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Access level requested from the native streaming open primitive.
///
/// The discriminants are the values the native call expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DesiredAccess {
    Read = 0,
    Write = 1,
    ReadWrite = 2,
}

impl DesiredAccess {
    pub fn as_native(self) -> u32 {
        self as u32
    }
}

/// Open flags applied when adapting a native handle into a byte stream.
///
/// Flags accumulate independently of the [`DesiredAccess`] mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0x0001);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(0x0002);
    pub const READ_WRITE: OpenFlags = OpenFlags(0x0004);
    pub const APPEND: OpenFlags = OpenFlags(0x0008);
    pub const BINARY: OpenFlags = OpenFlags(0x0010);
    pub const TEXT: OpenFlags = OpenFlags(0x0020);

    pub const fn empty() -> Self {
        OpenFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: OpenFlags) {
        self.0 |= rhs.0;
    }
}

/// Validated open mode for a streamed object.
///
/// Replaces free-form mode strings with a configuration that is checked at
/// construction, so an unsupported mode can never reach the native layer.
/// Construct with the builders or parse a classic mode string:
///
/// ```
/// use filestream::{DesiredAccess, OpenMode};
///
/// let mode = OpenMode::parse("r+b").unwrap();
/// assert_eq!(mode, OpenMode::read().update().binary());
/// assert_eq!(mode.desired_access(), DesiredAccess::ReadWrite);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    read: bool,
    write: bool,
    append: bool,
    update: bool,
    binary: bool,
}

impl OpenMode {
    /// Read an existing object (`"r"`).
    pub fn read() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            update: false,
            binary: false,
        }
    }

    /// Write an object from the start (`"w"`).
    pub fn write() -> Self {
        Self {
            read: false,
            write: true,
            append: false,
            update: false,
            binary: false,
        }
    }

    /// Write at the end of an existing object (`"a"`).
    pub fn append() -> Self {
        Self {
            read: false,
            write: false,
            append: true,
            update: false,
            binary: false,
        }
    }

    /// Request read-write access on top of the base mode (`"+"`).
    pub fn update(mut self) -> Self {
        self.update = true;
        self
    }

    /// No newline translation (`"b"`).
    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// Platform end-of-line translation (the default).
    pub fn text(mut self) -> Self {
        self.binary = false;
        self
    }

    /// Parse a classic mode string such as `"rb"`, `"wb"`, `"r+b"` or `"ab"`.
    ///
    /// Exactly one of `r`/`w`/`a` is required; `+`, and one of `b`/`t`, may
    /// follow in any order. Anything else is rejected.
    pub fn parse(mode: &str) -> Result<Self> {
        let mut read = false;
        let mut write = false;
        let mut append = false;
        let mut update = false;
        let mut binary = false;
        let mut text = false;

        for ch in mode.chars() {
            let slot = match ch {
                'r' => &mut read,
                'w' => &mut write,
                'a' => &mut append,
                '+' => &mut update,
                'b' => &mut binary,
                't' => &mut text,
                other => {
                    return Err(StreamError::InvalidMode(format!(
                        "Unsupported character '{}' in '{}'",
                        other, mode
                    )));
                }
            };
            if *slot {
                return Err(StreamError::InvalidMode(format!(
                    "Repeated character '{}' in '{}'",
                    ch, mode
                )));
            }
            *slot = true;
        }

        if [read, write, append].iter().filter(|set| **set).count() != 1 {
            return Err(StreamError::InvalidMode(format!(
                "Exactly one of 'r', 'w', 'a' is required in '{}'",
                mode
            )));
        }
        if binary && text {
            return Err(StreamError::InvalidMode(format!(
                "'b' and 't' conflict in '{}'",
                mode
            )));
        }

        Ok(Self {
            read,
            write,
            append,
            update,
            binary,
        })
    }

    /// Access level passed to the native open call. First match wins:
    /// update requests read-write, a read base reads, anything else writes.
    pub fn desired_access(&self) -> DesiredAccess {
        if self.update {
            DesiredAccess::ReadWrite
        } else if self.read {
            DesiredAccess::Read
        } else {
            DesiredAccess::Write
        }
    }

    /// Cumulative flags applied when the handle is adapted into a stream.
    pub fn flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::empty();
        if self.update {
            flags |= OpenFlags::READ_WRITE;
        } else if self.read && !self.write && !self.append {
            flags |= OpenFlags::READ_ONLY;
        }
        if self.binary {
            flags |= OpenFlags::BINARY;
        } else {
            flags |= OpenFlags::TEXT;
        }
        if self.write {
            flags |= OpenFlags::WRITE_ONLY;
        }
        if self.append {
            flags |= OpenFlags::APPEND;
        }
        flags
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = if self.read {
            "r"
        } else if self.write {
            "w"
        } else {
            "a"
        };
        write!(
            f,
            "{}{}{}",
            base,
            if self.update { "+" } else { "" },
            if self.binary { "b" } else { "" }
        )
    }
}

/// One open request: which record, and how its stream should behave.
///
/// Built per open call and never mutated afterwards.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest {
    pub id: RecordId,
    pub mode: OpenMode,
}

impl StreamRequest {
    pub fn new(id: RecordId, mode: OpenMode) -> Self {
        Self { id, mode }
    }
}

/// Opaque transaction token issued by the database.
///
/// Valid only for the lifetime of the transaction that issued it; fetched
/// fresh on every open and never cached. The token bytes are deliberately
/// kept out of `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct TransactionContext(Vec<u8>);

impl TransactionContext {
    pub fn new(token: Vec<u8>) -> Self {
        Self(token)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionContext({} bytes)", self.0.len())
    }
}

/// Native path of the database's backing file, normalized for the open call.
///
/// Ephemeral: meaningful only inside the transaction that resolved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath(String);

impl FilePath {
    /// Normalize a path as returned by the database: the vendor escaping
    /// doubles every separator, so collapse pairs and prefix the leading
    /// separator the native call expects.
    pub fn from_vendor(raw: &str) -> Self {
        let collapsed = raw.replace(ESCAPED_SEPARATOR, SEPARATOR);
        Self(format!("{}{}", SEPARATOR, collapsed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw handle returned by the native streaming open primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(isize);

impl RawHandle {
    /// The platform's invalid-handle sentinel.
    pub const INVALID: RawHandle = RawHandle(-1);

    pub const fn new(value: isize) -> Self {
        Self(value)
    }

    pub const fn value(self) -> isize {
        self.0
    }

    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }
}
