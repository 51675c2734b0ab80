//! Multi-format decoder for TripModifications feeds.
//!
//! Producers disagree on whether they emit a full `FeedMessage` envelope or a
//! bare `TripModifications` payload, and whether they serialize binary or
//! text format, optionally gzipped. The decoder tries each shape in a fixed
//! priority order; every attempt is a structural parse that can fail, so
//! garbage input is rejected after the last attempt.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;

use flate2::read::GzDecoder;
use protobuf::{Message, MessageDyn, MessageField, MessageFull};
use thiserror::Error;
use tracing::debug;

use crate::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage, Shape, TripModifications};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Entity id given to a bare `TripModifications` payload wrapped into a
/// synthesized single-entity feed.
pub const WRAPPED_ENTITY_ID: &str = "tm-1";

/// Which of the four parse attempts produced the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    BinaryFeedMessage,
    TextFeedMessage,
    BinaryTripModificationsWrapped,
    TextTripModificationsWrapped,
}

impl DecodeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeMode::BinaryFeedMessage => "binary:FeedMessage",
            DecodeMode::TextFeedMessage => "textproto:FeedMessage",
            DecodeMode::BinaryTripModificationsWrapped => "binary:TripModifications_wrapped",
            DecodeMode::TextTripModificationsWrapped => "textproto:TripModifications_wrapped",
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic record of how the feed bytes were decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeMeta {
    pub mode: DecodeMode,
    pub was_compressed: bool,
}

type ParseFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("gzip decompression failed")]
    Gzip(#[source] std::io::Error),
    /// All four parse attempts failed; carries the last underlying error.
    #[error("input is neither a FeedMessage nor a bare TripModifications in any supported encoding")]
    Exhausted(#[source] ParseFailure),
}

/// Decodes raw feed bytes into a normalized [`FeedMessage`].
///
/// Attempts, in order: binary `FeedMessage`, text-format `FeedMessage`,
/// binary bare `TripModifications` (wrapped into a single-entity feed under
/// [`WRAPPED_ENTITY_ID`]), text-format bare `TripModifications` (wrapped).
/// A gzip-compressed input (magic bytes 0x1F 0x8B) is transparently
/// decompressed first and recorded in [`DecodeMeta::was_compressed`].
///
/// # Errors
///
/// [`DecodeError::Gzip`] if decompression fails, [`DecodeError::Exhausted`]
/// if no attempt produces a structurally valid message.
pub fn decode(raw: &[u8]) -> Result<(FeedMessage, DecodeMeta), DecodeError> {
    let (bytes, was_compressed) = decompress_if_gzip(raw)?;
    let meta = |mode| DecodeMeta {
        mode,
        was_compressed,
    };

    let last: ParseFailure = match FeedMessage::parse_from_bytes(&bytes) {
        Ok(feed) => return Ok((feed, meta(DecodeMode::BinaryFeedMessage))),
        Err(e) => e.into(),
    };
    debug!(error = %last, "binary FeedMessage parse failed");

    let last = match parse_text::<FeedMessage>(&bytes) {
        Ok(feed) => return Ok((feed, meta(DecodeMode::TextFeedMessage))),
        Err(e) => e,
    };
    debug!(error = %last, "text FeedMessage parse failed");

    let last: ParseFailure = match TripModifications::parse_from_bytes(&bytes) {
        Ok(tm) => {
            return Ok((
                wrap_trip_modifications(tm),
                meta(DecodeMode::BinaryTripModificationsWrapped),
            ));
        }
        Err(e) => e.into(),
    };
    debug!(error = %last, "binary TripModifications parse failed");

    let last = match parse_text::<TripModifications>(&bytes) {
        Ok(tm) => {
            return Ok((
                wrap_trip_modifications(tm),
                meta(DecodeMode::TextTripModificationsWrapped),
            ));
        }
        Err(e) => e,
    };
    debug!(error = %last, "text TripModifications parse failed");

    Err(DecodeError::Exhausted(last))
}

fn decompress_if_gzip(raw: &[u8]) -> Result<(Cow<'_, [u8]>, bool), DecodeError> {
    if raw.starts_with(&GZIP_MAGIC) {
        let mut buf = Vec::new();
        GzDecoder::new(raw)
            .read_to_end(&mut buf)
            .map_err(DecodeError::Gzip)?;
        Ok((Cow::Owned(buf), true))
    } else {
        Ok((Cow::Borrowed(raw), false))
    }
}

fn parse_text<M: MessageFull>(bytes: &[u8]) -> Result<M, ParseFailure> {
    let text = std::str::from_utf8(bytes)?;
    Ok(protobuf::text_format::parse_from_str::<M>(text)?)
}

fn wrap_trip_modifications(tm: TripModifications) -> FeedMessage {
    let mut header = FeedHeader::new();
    header.set_gtfs_realtime_version("2.0".to_string());

    let mut entity = FeedEntity::new();
    entity.set_id(WRAPPED_ENTITY_ID.to_string());
    entity.trip_modifications = MessageField::some(tm);

    let mut feed = FeedMessage::new();
    feed.header = MessageField::some(header);
    feed.entity.push(entity);
    feed
}

/// Reports whether `field_name` is declared in the message's schema build
/// *and* populated in this message. Unknown names answer `false` rather than
/// raising, so experimental fields absent from an older schema build behave
/// exactly like unpopulated ones.
pub fn field_present(message: &dyn MessageDyn, field_name: &str) -> bool {
    message
        .descriptor_dyn()
        .field_by_name(field_name)
        .is_some_and(|field| field.has_field(message))
}

/// Optional `FeedEntity` sub-messages this tool knows how to summarize.
pub const OPTIONAL_ENTITY_FIELDS: [&str; 6] = [
    "trip_update",
    "vehicle",
    "alert",
    "shape",
    "stop",
    "trip_modifications",
];

/// Names of the optional sub-messages populated on this entity.
pub fn present_fields(entity: &FeedEntity) -> Vec<&'static str> {
    OPTIONAL_ENTITY_FIELDS
        .iter()
        .copied()
        .filter(|name| field_present(entity, name))
        .collect()
}

/// Extracts `(entity_id, TripModifications)` pairs in entity order.
pub fn trip_modification_entities(feed: &FeedMessage) -> Vec<(&str, &TripModifications)> {
    feed.entity
        .iter()
        .filter(|e| field_present(*e, "trip_modifications"))
        .filter_map(|e| e.trip_modifications.as_ref().map(|tm| (e.id(), tm)))
        .collect()
}

/// Extracts real-time shapes carrying a non-empty encoded polyline, in
/// entity order.
pub fn rt_shapes(feed: &FeedMessage) -> Vec<&Shape> {
    feed.entity
        .iter()
        .filter(|e| field_present(*e, "shape"))
        .filter_map(|e| e.shape.as_ref())
        .filter(|s| !s.encoded_polyline().is_empty())
        .collect()
}
