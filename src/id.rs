use crate::error::Error;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// Node id: 2 bytes | Index: 6 bytes
/// Width of the node tag.
pub const NODE_ID_BITS: u32 = 16;
/// Width of the index.
pub const INDEX_BITS: u32 = 48;
/// Largest node tag.
pub const MAX_NODE_ID: u16 = u16::max_value();
/// Largest index, also the widest allocator mask.
pub const MAX_INDEX: u64 = (1 << INDEX_BITS) - 1;

/// Identifier of a [`Vipo`](struct.Vipo.html).
///
/// The numeric part packs a node (namespace) tag and an index. The optional
/// label only exists for diagnostics: equality, ordering and hashing look at
/// the numeric part alone.
#[derive(Clone)]
pub struct Vid {
    data: u64,
    label: Option<Arc<str>>,
}

impl Vid {
    /// The reserved "no actor" identifier.
    pub const EMPTY: Vid = Vid {
        data: 0,
        label: None,
    };

    /// Compose an identifier from its parts. Both parts must be non-zero
    /// and the index must fit in `INDEX_BITS`.
    pub fn new(node_id: u16, index: u64) -> Result<Vid, Error> {
        if node_id == 0 {
            return Err(Error::InvalidVid {
                reason: "node id must be non-zero".to_owned(),
            });
        }
        if index == 0 || index > MAX_INDEX {
            return Err(Error::InvalidVid {
                reason: format!("index {:X} outside 1..={:X}", index, MAX_INDEX),
            });
        }
        Ok(Vid {
            data: (u64::from(node_id) << INDEX_BITS) | index,
            label: None,
        })
    }

    /// Reinterpret a raw value produced by [`raw`](#method.raw).
    pub fn from_raw(data: u64) -> Vid {
        Vid { data, label: None }
    }

    /// Attach a debug label. Does not change identity.
    pub fn labeled(self, label: &str) -> Vid {
        Vid {
            label: if label.is_empty() {
                None
            } else {
                Some(Arc::from(label))
            },
            ..self
        }
    }

    /// The packed numeric value.
    pub fn raw(&self) -> u64 {
        self.data
    }

    /// The node tag.
    pub fn node_id(&self) -> u16 {
        (self.data >> INDEX_BITS) as u16
    }

    /// The index within the node.
    pub fn index(&self) -> u64 {
        self.data & MAX_INDEX
    }

    /// Whether this is `Vid::EMPTY`.
    pub fn is_empty(&self) -> bool {
        self.data == 0
    }

    /// The debug label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().map(|label| &**label)
    }
}

impl Default for Vid {
    fn default() -> Self {
        Vid::EMPTY
    }
}

impl PartialEq for Vid {
    fn eq(&self, other: &Vid) -> bool {
        self.data == other.data
    }
}

impl Eq for Vid {}

impl PartialOrd for Vid {
    fn partial_cmp(&self, other: &Vid) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Vid {
    fn cmp(&self, other: &Vid) -> Ordering {
        self.data.cmp(&other.data)
    }
}

impl Hash for Vid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.hash(state)
    }
}

impl ::std::fmt::Debug for Vid {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        if self.is_empty() {
            return f.write_str("Empty");
        }
        write!(f, "{:X}.{:X}", self.node_id(), self.index())?;
        if let Some(label) = self.label() {
            write!(f, "^{}", label)?;
        }
        Ok(())
    }
}

/// `{}` prints the raw value, `{:#}` the `node.index` form.
impl ::std::fmt::Display for Vid {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        if f.alternate() {
            return ::std::fmt::Debug::fmt(self, f);
        }
        if self.is_empty() {
            return f.write_str("Empty");
        }
        write!(f, "{:X}", self.data)?;
        if let Some(label) = self.label() {
            write!(f, "^{}", label)?;
        }
        Ok(())
    }
}

/// Why a string is not a `Vid`.
#[derive(Debug, thiserror::Error)]
pub enum ParseVidError {
    /// Not of the `node.index[^label]` shape.
    #[error("expected <node>.<index>[^label]")]
    Format,
    /// A part is not a hex number.
    #[error("invalid number: {0}")]
    ParseIntError(#[from] ::std::num::ParseIntError),
    /// The parts are out of range.
    #[error("{0}")]
    Invalid(String),
}

impl ::std::str::FromStr for Vid {
    type Err = ParseVidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "Empty" {
            return Ok(Vid::EMPTY);
        }

        let mut label_split = s.splitn(2, '^');
        let numeric = label_split.next().unwrap_or("");
        let label = label_split.next();

        let mut parts = numeric.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(node_part), Some(index_part), None) => {
                let node_id = u16::from_str_radix(node_part, 16)?;
                let index = u64::from_str_radix(index_part, 16)?;
                let vid = Vid::new(node_id, index)
                    .map_err(|err| ParseVidError::Invalid(err.to_string()))?;
                Ok(match label {
                    Some(label) => vid.labeled(label),
                    None => vid,
                })
            }
            _ => Err(ParseVidError::Format),
        }
    }
}

#[cfg(feature = "serde-serialization")]
use std::marker::PhantomData;

#[cfg(feature = "serde-serialization")]
impl ::serde::ser::Serialize for Vid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ::serde::ser::Serializer,
    {
        serializer.serialize_str(&format!("{:#}", self))
    }
}

#[cfg(feature = "serde-serialization")]
struct VidVisitor {
    marker: PhantomData<fn() -> Vid>,
}

#[cfg(feature = "serde-serialization")]
impl<'de> ::serde::de::Visitor<'de> for VidVisitor {
    type Value = Vid;

    fn expecting(&self, formatter: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        formatter.write_str("a virtual process id")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: ::serde::de::Error,
    {
        s.parse().map_err(::serde::de::Error::custom)
    }
}

#[cfg(feature = "serde-serialization")]
impl<'de> ::serde::de::Deserialize<'de> for Vid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: ::serde::de::Deserializer<'de>,
    {
        deserializer.deserialize_str(VidVisitor {
            marker: PhantomData,
        })
    }
}
