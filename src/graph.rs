//! Typed views over the tagged structures Bolt uses for graph entities and
//! temporal values.
//!
//! The Packstream codec carries these opaquely; this module interprets the
//! known signatures. Node and relationship layouts cover both the 4.x
//! (integer id) and 5.x (element id) shapes.

use crate::packstream::{Structure, Value, ValueMap};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use thiserror::Error;

// Structure signatures fixed by the protocol.
pub const SIG_NODE: u8 = 0x4E; // 'N'
pub const SIG_RELATIONSHIP: u8 = 0x52; // 'R'
pub const SIG_UNBOUND_RELATIONSHIP: u8 = 0x72; // 'r'
pub const SIG_PATH: u8 = 0x50; // 'P'
pub const SIG_DATE: u8 = 0x44; // 'D'
pub const SIG_TIME: u8 = 0x54; // 'T'
pub const SIG_LOCAL_TIME: u8 = 0x74; // 't'
pub const SIG_DATE_TIME: u8 = 0x49; // 'I'
pub const SIG_DATE_TIME_ZONE_ID: u8 = 0x69; // 'i'
pub const SIG_LEGACY_DATE_TIME: u8 = 0x46; // 'F'
pub const SIG_LEGACY_DATE_TIME_ZONE_ID: u8 = 0x66; // 'f'
pub const SIG_LOCAL_DATE_TIME: u8 = 0x64; // 'd'
pub const SIG_DURATION: u8 = 0x45; // 'E'

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("expected structure signature 0x{expected:02X}, found 0x{actual:02X}")]
    UnexpectedSignature { expected: u8, actual: u8 },

    #[error("structure 0x{signature:02X} carries {actual} fields, expected {expected}")]
    FieldCount {
        signature: u8,
        expected: &'static str,
        actual: usize,
    },

    #[error("field `{0}` has an unexpected type")]
    FieldType(&'static str),

    #[error("temporal component out of range: {0}")]
    OutOfRange(&'static str),

    #[error("value is not a structure")]
    NotAStructure,
}

type GraphResult<T> = std::result::Result<T, GraphError>;

/// A node: `(id, labels, properties)` plus the 5.x element id when present.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub element_id: Option<String>,
    pub labels: Vec<String>,
    pub properties: ValueMap,
}

/// A relationship: `(id, type, properties, start_id, end_id)` plus 5.x
/// element ids when present.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub rel_type: String,
    pub properties: ValueMap,
    pub element_id: Option<String>,
    pub start_element_id: Option<String>,
    pub end_element_id: Option<String>,
}

/// Relationship as it appears inside a path, without endpoint ids.
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: ValueMap,
    pub element_id: Option<String>,
}

/// An alternating node/relationship walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<UnboundRelationship>,
    /// Signed relationship/node index sequence in server order.
    pub indices: Vec<i64>,
}

impl Path {
    pub fn start(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Number of relationships traversed.
    pub fn hop_count(&self) -> usize {
        self.indices.len() / 2
    }
}

/// Datetime pinned to a named time zone, as sent by 5.x servers: a true
/// UTC instant plus the zone id, carried verbatim. No tz-database lookup
/// happens client-side.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonedDateTime {
    pub datetime: DateTime<Utc>,
    pub zone_id: String,
}

/// Zone-named datetime in the legacy (pre-5.0) wire form: the seconds are
/// *local* to the zone, and without zone rules client-side no UTC instant
/// can be derived. The wall-clock reading and the zone id are kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonedLocalDateTime {
    pub datetime: NaiveDateTime,
    pub zone_id: String,
}

/// Cypher duration: months and days do not have a fixed length in seconds,
/// so the four components stay separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoltDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

/// Any temporal structure, dispatched by signature.
#[derive(Debug, Clone, PartialEq)]
pub enum TemporalValue {
    Date(NaiveDate),
    Time(NaiveTime, FixedOffset),
    LocalTime(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    DateTimeZoned(ZonedDateTime),
    /// Legacy zone-named form; a wall-clock time, not a UTC instant.
    DateTimeZonedLocal(ZonedLocalDateTime),
    LocalDateTime(NaiveDateTime),
    Duration(BoltDuration),
}

fn expect_structure(value: &Value) -> GraphResult<&Structure> {
    value.as_structure().ok_or(GraphError::NotAStructure)
}

fn expect_signature(s: &Structure, expected: u8) -> GraphResult<()> {
    if s.signature != expected {
        return Err(GraphError::UnexpectedSignature {
            expected,
            actual: s.signature,
        });
    }
    Ok(())
}

fn int_field(s: &Structure, idx: usize, name: &'static str) -> GraphResult<i64> {
    s.fields
        .get(idx)
        .and_then(Value::as_int)
        .ok_or(GraphError::FieldType(name))
}

fn string_field(s: &Structure, idx: usize, name: &'static str) -> GraphResult<String> {
    s.fields
        .get(idx)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(GraphError::FieldType(name))
}

fn opt_string_field(s: &Structure, idx: usize, name: &'static str) -> GraphResult<Option<String>> {
    match s.fields.get(idx) {
        None => Ok(None),
        Some(Value::Null) => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(GraphError::FieldType(name)),
    }
}

fn map_field(s: &Structure, idx: usize, name: &'static str) -> GraphResult<ValueMap> {
    s.fields
        .get(idx)
        .and_then(Value::as_map)
        .cloned()
        .ok_or(GraphError::FieldType(name))
}

impl TryFrom<&Value> for Node {
    type Error = GraphError;

    fn try_from(value: &Value) -> GraphResult<Self> {
        let s = expect_structure(value)?;
        expect_signature(s, SIG_NODE)?;
        if !matches!(s.fields.len(), 3 | 4) {
            return Err(GraphError::FieldCount {
                signature: SIG_NODE,
                expected: "3 or 4",
                actual: s.fields.len(),
            });
        }
        let labels = s
            .fields
            .get(1)
            .and_then(Value::as_list)
            .ok_or(GraphError::FieldType("labels"))?
            .iter()
            .map(|v| v.as_str().map(str::to_owned).ok_or(GraphError::FieldType("labels")))
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Node {
            id: int_field(s, 0, "id")?,
            labels,
            properties: map_field(s, 2, "properties")?,
            element_id: opt_string_field(s, 3, "element_id")?,
        })
    }
}

impl TryFrom<&Value> for Relationship {
    type Error = GraphError;

    fn try_from(value: &Value) -> GraphResult<Self> {
        let s = expect_structure(value)?;
        expect_signature(s, SIG_RELATIONSHIP)?;
        if !matches!(s.fields.len(), 5 | 8) {
            return Err(GraphError::FieldCount {
                signature: SIG_RELATIONSHIP,
                expected: "5 or 8",
                actual: s.fields.len(),
            });
        }
        Ok(Relationship {
            id: int_field(s, 0, "id")?,
            start_node_id: int_field(s, 1, "start_node_id")?,
            end_node_id: int_field(s, 2, "end_node_id")?,
            rel_type: string_field(s, 3, "type")?,
            properties: map_field(s, 4, "properties")?,
            element_id: opt_string_field(s, 5, "element_id")?,
            start_element_id: opt_string_field(s, 6, "start_element_id")?,
            end_element_id: opt_string_field(s, 7, "end_element_id")?,
        })
    }
}

impl TryFrom<&Value> for UnboundRelationship {
    type Error = GraphError;

    fn try_from(value: &Value) -> GraphResult<Self> {
        let s = expect_structure(value)?;
        expect_signature(s, SIG_UNBOUND_RELATIONSHIP)?;
        if !matches!(s.fields.len(), 3 | 4) {
            return Err(GraphError::FieldCount {
                signature: SIG_UNBOUND_RELATIONSHIP,
                expected: "3 or 4",
                actual: s.fields.len(),
            });
        }
        Ok(UnboundRelationship {
            id: int_field(s, 0, "id")?,
            rel_type: string_field(s, 1, "type")?,
            properties: map_field(s, 2, "properties")?,
            element_id: opt_string_field(s, 3, "element_id")?,
        })
    }
}

impl TryFrom<&Value> for Path {
    type Error = GraphError;

    fn try_from(value: &Value) -> GraphResult<Self> {
        let s = expect_structure(value)?;
        expect_signature(s, SIG_PATH)?;
        if s.fields.len() != 3 {
            return Err(GraphError::FieldCount {
                signature: SIG_PATH,
                expected: "3",
                actual: s.fields.len(),
            });
        }
        let nodes = s
            .fields
            .get(0)
            .and_then(Value::as_list)
            .ok_or(GraphError::FieldType("nodes"))?
            .iter()
            .map(Node::try_from)
            .collect::<GraphResult<Vec<_>>>()?;
        let relationships = s
            .fields
            .get(1)
            .and_then(Value::as_list)
            .ok_or(GraphError::FieldType("relationships"))?
            .iter()
            .map(UnboundRelationship::try_from)
            .collect::<GraphResult<Vec<_>>>()?;
        let indices = s
            .fields
            .get(2)
            .and_then(Value::as_list)
            .ok_or(GraphError::FieldType("indices"))?
            .iter()
            .map(|v| v.as_int().ok_or(GraphError::FieldType("indices")))
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Path {
            nodes,
            relationships,
            indices,
        })
    }
}

// ---------------------------------------------------------------------------
// Temporal conversions
// ---------------------------------------------------------------------------

fn epoch_date() -> NaiveDate {
    // 1970-01-01 is representable; chrono only fails far outside i32 years.
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

impl TryFrom<&Value> for TemporalValue {
    type Error = GraphError;

    fn try_from(value: &Value) -> GraphResult<Self> {
        let s = expect_structure(value)?;
        match s.signature {
            SIG_DATE => {
                let days = int_field(s, 0, "days")?;
                let span = Duration::try_days(days).ok_or(GraphError::OutOfRange("days"))?;
                let date = epoch_date()
                    .checked_add_signed(span)
                    .ok_or(GraphError::OutOfRange("days"))?;
                Ok(TemporalValue::Date(date))
            }
            SIG_TIME => {
                let nanos = int_field(s, 0, "nanoseconds")?;
                let offset = offset_from_seconds(int_field(s, 1, "tz_offset_seconds")?)?;
                Ok(TemporalValue::Time(time_from_nanos(nanos)?, offset))
            }
            SIG_LOCAL_TIME => {
                let nanos = int_field(s, 0, "nanoseconds")?;
                Ok(TemporalValue::LocalTime(time_from_nanos(nanos)?))
            }
            SIG_DATE_TIME => {
                let secs = int_field(s, 0, "seconds")?;
                let nanos = int_field(s, 1, "nanoseconds")?;
                let offset = offset_from_seconds(int_field(s, 2, "tz_offset_seconds")?)?;
                let utc = utc_from_parts(secs, nanos)?;
                Ok(TemporalValue::DateTime(utc.with_timezone(&offset)))
            }
            SIG_LEGACY_DATE_TIME => {
                // Legacy datetimes carry offset-adjusted local seconds.
                let local_secs = int_field(s, 0, "seconds")?;
                let nanos = int_field(s, 1, "nanoseconds")?;
                let offset_secs = int_field(s, 2, "tz_offset_seconds")?;
                let offset = offset_from_seconds(offset_secs)?;
                let utc = utc_from_parts(
                    local_secs
                        .checked_sub(offset_secs)
                        .ok_or(GraphError::OutOfRange("seconds"))?,
                    nanos,
                )?;
                Ok(TemporalValue::DateTime(utc.with_timezone(&offset)))
            }
            SIG_DATE_TIME_ZONE_ID => {
                let secs = int_field(s, 0, "seconds")?;
                let nanos = int_field(s, 1, "nanoseconds")?;
                let zone_id = string_field(s, 2, "tz_id")?;
                Ok(TemporalValue::DateTimeZoned(ZonedDateTime {
                    datetime: utc_from_parts(secs, nanos)?,
                    zone_id,
                }))
            }
            SIG_LEGACY_DATE_TIME_ZONE_ID => {
                // Legacy zoned datetimes carry zone-local seconds. Zone
                // rules are unknown client-side, so the value stays a
                // wall-clock reading rather than masquerading as UTC.
                let secs = int_field(s, 0, "seconds")?;
                let nanos = int_field(s, 1, "nanoseconds")?;
                let zone_id = string_field(s, 2, "tz_id")?;
                Ok(TemporalValue::DateTimeZonedLocal(ZonedLocalDateTime {
                    datetime: utc_from_parts(secs, nanos)?.naive_utc(),
                    zone_id,
                }))
            }
            SIG_LOCAL_DATE_TIME => {
                let secs = int_field(s, 0, "seconds")?;
                let nanos = int_field(s, 1, "nanoseconds")?;
                Ok(TemporalValue::LocalDateTime(
                    utc_from_parts(secs, nanos)?.naive_utc(),
                ))
            }
            SIG_DURATION => Ok(TemporalValue::Duration(BoltDuration {
                months: int_field(s, 0, "months")?,
                days: int_field(s, 1, "days")?,
                seconds: int_field(s, 2, "seconds")?,
                nanoseconds: int_field(s, 3, "nanoseconds")?,
            })),
            other => Err(GraphError::UnexpectedSignature {
                expected: SIG_DATE,
                actual: other,
            }),
        }
    }
}

fn time_from_nanos(nanos: i64) -> GraphResult<NaiveTime> {
    if nanos < 0 {
        return Err(GraphError::OutOfRange("nanoseconds"));
    }
    let secs = (nanos / 1_000_000_000) as u32;
    let frac = (nanos % 1_000_000_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
        .ok_or(GraphError::OutOfRange("nanoseconds"))
}

fn offset_from_seconds(secs: i64) -> GraphResult<FixedOffset> {
    let secs = i32::try_from(secs).map_err(|_| GraphError::OutOfRange("tz_offset_seconds"))?;
    FixedOffset::east_opt(secs).ok_or(GraphError::OutOfRange("tz_offset_seconds"))
}

fn utc_from_parts(secs: i64, nanos: i64) -> GraphResult<DateTime<Utc>> {
    let nanos = u32::try_from(nanos).map_err(|_| GraphError::OutOfRange("nanoseconds"))?;
    match Utc.timestamp_opt(secs, nanos) {
        chrono::LocalResult::Single(dt) => Ok(dt),
        _ => Err(GraphError::OutOfRange("seconds")),
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        let days = d.signed_duration_since(epoch_date()).num_days();
        Value::Structure(Structure::new(SIG_DATE, vec![Value::Int(days)]))
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Structure(Structure::new(
            SIG_LOCAL_TIME,
            vec![Value::Int(nanos_since_midnight(t))],
        ))
    }
}

impl From<(NaiveTime, FixedOffset)> for Value {
    fn from((t, offset): (NaiveTime, FixedOffset)) -> Self {
        Value::Structure(Structure::new(
            SIG_TIME,
            vec![
                Value::Int(nanos_since_midnight(t)),
                Value::Int(offset.local_minus_utc() as i64),
            ],
        ))
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::Structure(Structure::new(
            SIG_LOCAL_DATE_TIME,
            vec![
                Value::Int(dt.and_utc().timestamp()),
                Value::Int(dt.and_utc().timestamp_subsec_nanos() as i64),
            ],
        ))
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Value::Structure(Structure::new(
            SIG_DATE_TIME,
            vec![
                Value::Int(dt.timestamp()),
                Value::Int(dt.timestamp_subsec_nanos() as i64),
                Value::Int(dt.offset().local_minus_utc() as i64),
            ],
        ))
    }
}

impl From<ZonedDateTime> for Value {
    fn from(dt: ZonedDateTime) -> Self {
        Value::Structure(Structure::new(
            SIG_DATE_TIME_ZONE_ID,
            vec![
                Value::Int(dt.datetime.timestamp()),
                Value::Int(dt.datetime.timestamp_subsec_nanos() as i64),
                Value::String(dt.zone_id),
            ],
        ))
    }
}

impl From<ZonedLocalDateTime> for Value {
    fn from(dt: ZonedLocalDateTime) -> Self {
        // The naive timestamp IS the zone-local seconds of the legacy form.
        Value::Structure(Structure::new(
            SIG_LEGACY_DATE_TIME_ZONE_ID,
            vec![
                Value::Int(dt.datetime.and_utc().timestamp()),
                Value::Int(dt.datetime.and_utc().timestamp_subsec_nanos() as i64),
                Value::String(dt.zone_id),
            ],
        ))
    }
}

impl From<BoltDuration> for Value {
    fn from(d: BoltDuration) -> Self {
        Value::Structure(Structure::new(
            SIG_DURATION,
            vec![
                Value::Int(d.months),
                Value::Int(d.days),
                Value::Int(d.seconds),
                Value::Int(d.nanoseconds),
            ],
        ))
    }
}

fn nanos_since_midnight(t: NaiveTime) -> i64 {
    use chrono::Timelike;
    t.num_seconds_from_midnight() as i64 * 1_000_000_000 + t.nanosecond() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_value(fields: Vec<Value>) -> Value {
        Value::Structure(Structure::new(SIG_NODE, fields))
    }

    #[test]
    fn extracts_modern_node() {
        let value = node_value(vec![
            Value::Int(42),
            Value::List(vec![Value::String("Person".into())]),
            Value::map([("name", "Ada")]),
            Value::String("4:abc:42".into()),
        ]);
        let node = Node::try_from(&value).unwrap();
        assert_eq!(node.id, 42);
        assert_eq!(node.labels, vec!["Person"]);
        assert_eq!(node.element_id.as_deref(), Some("4:abc:42"));
        assert_eq!(node.properties.get("name"), Some(&Value::String("Ada".into())));
    }

    #[test]
    fn extracts_legacy_node_without_element_id() {
        let value = node_value(vec![
            Value::Int(1),
            Value::List(vec![]),
            Value::Map(ValueMap::new()),
        ]);
        let node = Node::try_from(&value).unwrap();
        assert_eq!(node.element_id, None);
    }

    #[test]
    fn rejects_wrong_signature_and_arity() {
        let wrong_sig = Value::Structure(Structure::new(0x00, vec![]));
        assert!(matches!(
            Node::try_from(&wrong_sig),
            Err(GraphError::UnexpectedSignature { .. })
        ));

        let wrong_arity = node_value(vec![Value::Int(1)]);
        assert!(matches!(
            Node::try_from(&wrong_arity),
            Err(GraphError::FieldCount { .. })
        ));
    }

    #[test]
    fn relationship_roundtrip_fields() {
        let value = Value::Structure(Structure::new(
            SIG_RELATIONSHIP,
            vec![
                Value::Int(7),
                Value::Int(1),
                Value::Int(2),
                Value::String("KNOWS".into()),
                Value::Map(ValueMap::new()),
            ],
        ));
        let rel = Relationship::try_from(&value).unwrap();
        assert_eq!(
            (rel.id, rel.start_node_id, rel.end_node_id, rel.rel_type.as_str()),
            (7, 1, 2, "KNOWS")
        );
    }

    #[test]
    fn date_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let value = Value::from(date);
        match TemporalValue::try_from(&value).unwrap() {
            TemporalValue::Date(d) => assert_eq!(d, date),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn datetime_with_offset_roundtrip() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let dt = offset.with_ymd_and_hms(2023, 6, 1, 12, 30, 45).unwrap();
        let value = Value::from(dt);
        match TemporalValue::try_from(&value).unwrap() {
            TemporalValue::DateTime(back) => {
                assert_eq!(back, dt);
                assert_eq!(back.offset().local_minus_utc(), 3600);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn legacy_datetime_adjusts_local_seconds() {
        // 1970-01-01T01:00:00+01:00 in legacy form: local seconds 3600,
        // offset 3600 → UTC epoch 0.
        let value = Value::Structure(Structure::new(
            SIG_LEGACY_DATE_TIME,
            vec![Value::Int(3600), Value::Int(0), Value::Int(3600)],
        ));
        match TemporalValue::try_from(&value).unwrap() {
            TemporalValue::DateTime(dt) => assert_eq!(dt.timestamp(), 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zoned_datetime_keeps_zone_id_verbatim() {
        let zoned = ZonedDateTime {
            datetime: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            zone_id: "Europe/Lisbon".into(),
        };
        let value = Value::from(zoned.clone());
        match TemporalValue::try_from(&value).unwrap() {
            TemporalValue::DateTimeZoned(back) => assert_eq!(back, zoned),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn legacy_zoned_datetime_stays_a_wall_clock_reading() {
        // 2022-01-01T12:00:00[Europe/Lisbon] in legacy form: zone-local
        // seconds, no offset on the wire. It must not come back typed as
        // a UTC instant.
        let local_secs = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        let value = Value::Structure(Structure::new(
            SIG_LEGACY_DATE_TIME_ZONE_ID,
            vec![
                Value::Int(local_secs),
                Value::Int(0),
                Value::String("Europe/Lisbon".into()),
            ],
        ));
        match TemporalValue::try_from(&value).unwrap() {
            TemporalValue::DateTimeZonedLocal(back) => {
                assert_eq!(back.zone_id, "Europe/Lisbon");
                assert_eq!(back.datetime.and_utc().timestamp(), local_secs);
                assert_eq!(Value::from(back), value);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duration_components_stay_separate() {
        let d = BoltDuration {
            months: 13,
            days: -2,
            seconds: 61,
            nanoseconds: 500,
        };
        match TemporalValue::try_from(&Value::from(d)).unwrap() {
            TemporalValue::Duration(back) => assert_eq!(back, d),
            other => panic!("unexpected {other:?}"),
        }
    }
}
