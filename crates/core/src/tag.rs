//! Checkpoint tags: totally ordered position markers.
//!
//! A tag identifies "how far" a projection has progressed. It comes in two
//! positional forms:
//!
//! - **Position**: `(commit, prepare)` in the global transaction log, used by
//!   projections that read the whole log.
//! - **Stream**: `(stream, sequence)` plus the prepare position of the record,
//!   used by projections scoped to a single stream.
//!
//! Tags are plain values: equality is structural and ordering is a pure
//! lexicographic comparison (form first, then fields in declaration order), so
//! `a == b` exactly when `a.cmp(&b) == Ordering::Equal`. Deciding whether two
//! tags *belong to the same session* is a separate question answered by
//! [`CheckpointTag::is_comparable_with`].

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Position of a record in the global transaction log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub commit: i64,
    pub prepare: i64,
}

impl LogPosition {
    pub const fn new(commit: i64, prepare: i64) -> Self {
        Self { commit, prepare }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C:{}/P:{}", self.commit, self.prepare)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum TagKind {
    Position {
        commit: i64,
        prepare: i64,
    },
    Stream {
        stream: String,
        sequence: i64,
        prepare: i64,
    },
}

/// Immutable, totally ordered projection position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointTag(TagKind);

impl CheckpointTag {
    /// Tag for a position in the global log.
    pub const fn from_position(commit: i64, prepare: i64) -> Self {
        Self(TagKind::Position { commit, prepare })
    }

    /// Tag for an event number within one stream.
    ///
    /// `prepare` is the log position of the record carrying that event.
    pub fn from_stream_position(
        stream: impl Into<String>,
        sequence: i64,
        prepare: i64,
    ) -> CoreResult<Self> {
        let stream = stream.into();
        if stream.is_empty() {
            return Err(CoreError::EmptyStreamName);
        }
        Ok(Self(TagKind::Stream {
            stream,
            sequence,
            prepare,
        }))
    }

    /// The tag preceding every event of the global log.
    pub const fn zero_position() -> Self {
        Self::from_position(0, -1)
    }

    /// The tag preceding every event of `stream`.
    pub fn zero_for_stream(stream: impl Into<String>) -> CoreResult<Self> {
        Self::from_stream_position(stream, -1, -1)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.0, TagKind::Stream { .. })
    }

    pub fn stream(&self) -> Option<&str> {
        match &self.0 {
            TagKind::Stream { stream, .. } => Some(stream),
            TagKind::Position { .. } => None,
        }
    }

    pub fn sequence(&self) -> Option<i64> {
        match &self.0 {
            TagKind::Stream { sequence, .. } => Some(*sequence),
            TagKind::Position { .. } => None,
        }
    }

    pub fn commit_position(&self) -> Option<i64> {
        match &self.0 {
            TagKind::Position { commit, .. } => Some(*commit),
            TagKind::Stream { .. } => None,
        }
    }

    pub fn prepare_position(&self) -> i64 {
        match &self.0 {
            TagKind::Position { prepare, .. } | TagKind::Stream { prepare, .. } => *prepare,
        }
    }

    /// Whether both tags use the same positional form (and, for stream tags,
    /// the same stream). Only comparable tags may follow one another within a
    /// projection session.
    pub fn is_comparable_with(&self, other: &CheckpointTag) -> bool {
        match (&self.0, &other.0) {
            (TagKind::Position { .. }, TagKind::Position { .. }) => true,
            (TagKind::Stream { stream: a, .. }, TagKind::Stream { stream: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            TagKind::Position { commit, prepare } => write!(f, "C:{commit}/P:{prepare}"),
            TagKind::Stream {
                stream,
                sequence,
                prepare,
            } => write!(f, "{stream}@{sequence}/P:{prepare}"),
        }
    }
}

fn parse_i64(input: &str, field: &str, raw: &str) -> CoreResult<i64> {
    raw.parse::<i64>()
        .map_err(|e| CoreError::malformed_tag(input, format!("{field}: {e}")))
}

impl FromStr for CheckpointTag {
    type Err = CoreError;

    /// Parses the `Display` form: `C:<commit>/P:<prepare>` or
    /// `<stream>@<sequence>/P:<prepare>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, prepare) = s
            .rsplit_once("/P:")
            .ok_or_else(|| CoreError::malformed_tag(s, "missing '/P:' prepare position"))?;
        let prepare = parse_i64(s, "prepare", prepare)?;

        // A stream may itself be named "C:..."; only a bare number is a commit.
        if let Some(commit) = head.strip_prefix("C:").filter(|rest| !rest.contains('@')) {
            return Ok(Self::from_position(parse_i64(s, "commit", commit)?, prepare));
        }

        let (stream, sequence) = head
            .rsplit_once('@')
            .ok_or_else(|| CoreError::malformed_tag(s, "expected 'C:' or '<stream>@<sequence>'"))?;
        Self::from_stream_position(stream, parse_i64(s, "sequence", sequence)?, prepare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cmp::Ordering;
    use proptest::prelude::*;

    fn stream_tag(sequence: i64, prepare: i64) -> CheckpointTag {
        CheckpointTag::from_stream_position("stream", sequence, prepare).unwrap()
    }

    #[test]
    fn stream_tags_order_by_sequence() {
        assert!(stream_tag(10, 1000) < stream_tag(11, 1100));
        assert!(stream_tag(12, 1200) > stream_tag(11, 1100));
        assert_eq!(stream_tag(10, 1000), stream_tag(10, 1000));
    }

    #[test]
    fn position_tags_order_by_commit_then_prepare() {
        let a = CheckpointTag::from_position(100, 50);
        let b = CheckpointTag::from_position(100, 60);
        let c = CheckpointTag::from_position(120, 110);

        assert!(a < b);
        assert!(b < c);
        assert!(CheckpointTag::zero_position() < a);
    }

    #[test]
    fn zero_stream_tag_precedes_first_event() {
        let zero = CheckpointTag::zero_for_stream("stream").unwrap();
        assert!(zero < stream_tag(0, 0));
    }

    #[test]
    fn empty_stream_name_is_rejected() {
        assert_eq!(
            CheckpointTag::from_stream_position("", 1, 1),
            Err(CoreError::EmptyStreamName)
        );
    }

    #[test]
    fn comparability_requires_same_form_and_stream() {
        let other_stream = CheckpointTag::from_stream_position("other", 1, 1).unwrap();

        assert!(stream_tag(1, 1).is_comparable_with(&stream_tag(5, 9)));
        assert!(!stream_tag(1, 1).is_comparable_with(&other_stream));
        assert!(!stream_tag(1, 1).is_comparable_with(&CheckpointTag::from_position(1, 1)));
        assert!(CheckpointTag::from_position(1, 1).is_comparable_with(&CheckpointTag::zero_position()));
    }

    #[test]
    fn display_and_parse_agree() {
        let tags = [
            CheckpointTag::from_position(100, 50),
            CheckpointTag::zero_position(),
            stream_tag(11, 1100),
            CheckpointTag::from_stream_position("$ce-account@eu", 3, 70).unwrap(),
            CheckpointTag::from_stream_position("C:x", 1, 5).unwrap(),
            CheckpointTag::from_stream_position("C:12", 4, 9).unwrap(),
        ];
        for tag in tags {
            let parsed: CheckpointTag = tag.to_string().parse().unwrap();
            assert_eq!(parsed, tag);
        }
        assert_eq!(stream_tag(11, 1100).to_string(), "stream@11/P:1100");
    }

    #[test]
    fn stream_names_starting_with_commit_prefix_parse_as_streams() {
        let parsed: CheckpointTag = "C:x@1/P:5".parse().unwrap();
        assert_eq!(parsed.stream(), Some("C:x"));
        assert_eq!(parsed.sequence(), Some(1));
        assert_eq!(parsed.prepare_position(), 5);
    }

    #[test]
    fn malformed_text_is_rejected() {
        for input in ["", "C:1", "C:x/P:1", "stream/P:1", "@1/P:1"] {
            assert!(input.parse::<CheckpointTag>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn serde_keeps_positional_form() {
        let json = serde_json::to_value(stream_tag(12, 1200)).unwrap();
        assert_eq!(json["mode"], "stream");
        assert_eq!(json["sequence"], 12);

        let back: CheckpointTag = serde_json::from_value(json).unwrap();
        assert_eq!(back, stream_tag(12, 1200));
    }

    fn any_tag() -> impl Strategy<Value = CheckpointTag> {
        prop_oneof![
            (-1i64..1_000, -1i64..1_000).prop_map(|(c, p)| CheckpointTag::from_position(c, p)),
            (prop::sample::select(vec!["a", "b"]), -1i64..1_000, -1i64..1_000)
                .prop_map(|(s, n, p)| CheckpointTag::from_stream_position(s, n, p).unwrap()),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: equality coincides with `Ordering::Equal` and ordering is antisymmetric.
        #[test]
        fn ordering_is_consistent_with_equality(a in any_tag(), b in any_tag()) {
            prop_assert_eq!(a == b, a.cmp(&b) == Ordering::Equal);
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        /// Property: ordering is transitive.
        #[test]
        fn ordering_is_transitive(a in any_tag(), b in any_tag(), c in any_tag()) {
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }

        /// Property: within one stream, tag order follows event numbers.
        #[test]
        fn stream_order_follows_sequence(x in 0i64..10_000, y in 0i64..10_000) {
            let a = CheckpointTag::from_stream_position("s", x, x * 10).unwrap();
            let b = CheckpointTag::from_stream_position("s", y, y * 10).unwrap();
            prop_assert_eq!(a.cmp(&b), x.cmp(&y));
        }
    }
}
