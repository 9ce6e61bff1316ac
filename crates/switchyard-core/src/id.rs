//! Strongly-typed identifiers: correlation [`Tag`]s, service and method names.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Correlation ID binding a completion-queue event to one in-flight call.
///
/// Tags are unique among the live request managers of a dispatcher. They
/// are never explicitly reissued; a tag disappears when its manager is
/// retired from the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u64);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Tag {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Issues monotonically increasing [`Tag`]s.
///
/// A single counter, owned by the dispatcher for its whole lifetime.
/// Wraps at `u64::MAX`; at one tag per accepted call that is not
/// reachable by any realistic process, so wrap-around is a documented
/// limitation rather than a checked fault.
#[derive(Debug, Default)]
pub struct TagAllocator {
    next: u64,
}

impl TagAllocator {
    /// Create an allocator whose first tag is `Tag(0)`.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Create an allocator that starts at an arbitrary value.
    ///
    /// Only useful for exercising wrap-around.
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Hand out the next tag.
    pub fn next(&mut self) -> Tag {
        let tag = Tag(self.next);
        self.next = self.next.wrapping_add(1);
        tag
    }

    /// The tag the next call to [`next()`](TagAllocator::next) will return.
    pub fn peek(&self) -> Tag {
        Tag(self.next)
    }
}

/// Fully-qualified name of an RPC service, e.g. `"tempo.Time"`.
///
/// Backed by `Arc<str>` so clones into every request manager are cheap.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Arc<str>);

impl ServiceId {
    /// Create a service identifier.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The service name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for ServiceId {
    fn from(v: String) -> Self {
        Self(Arc::from(v))
    }
}

impl Borrow<str> for ServiceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name of one RPC method within a service, e.g. `"SetTimeMode"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(Arc<str>);

impl MethodId {
    /// Create a method identifier.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The method name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MethodId {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for MethodId {
    fn from(v: String) -> Self {
        Self(Arc::from(v))
    }
}

impl Borrow<str> for MethodId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Response shape of an RPC method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Exactly one response (or one error status) per request.
    Unary,
    /// Zero or more responses followed by one terminal status.
    Streaming,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary => write!(f, "unary"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_starts_at_zero_and_increments() {
        let mut tags = TagAllocator::new();
        assert_eq!(tags.next(), Tag(0));
        assert_eq!(tags.next(), Tag(1));
        assert_eq!(tags.peek(), Tag(2));
        assert_eq!(tags.next(), Tag(2));
    }

    #[test]
    fn allocator_wraps_at_width() {
        let mut tags = TagAllocator::starting_at(u64::MAX);
        assert_eq!(tags.next(), Tag(u64::MAX));
        assert_eq!(tags.next(), Tag(0));
    }

    #[test]
    fn service_id_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(ServiceId::new("tempo.Time"), 1);
        assert_eq!(map.get("tempo.Time"), Some(&1));
    }

    #[test]
    fn ids_display_their_names() {
        assert_eq!(ServiceId::from("a.B").to_string(), "a.B");
        assert_eq!(MethodId::from("Play").to_string(), "Play");
        assert_eq!(Tag(7).to_string(), "7");
        assert_eq!(CallKind::Streaming.to_string(), "streaming");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn tags_are_strictly_increasing(start in 0u64..u64::MAX - 1024, n in 1usize..512) {
                let mut tags = TagAllocator::starting_at(start);
                let mut prev = tags.next();
                for _ in 0..n {
                    let t = tags.next();
                    prop_assert!(t > prev);
                    prev = t;
                }
            }
        }
    }
}
