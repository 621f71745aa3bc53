//! Structured points and their line protocol form.

use std::{cmp, collections::BTreeMap, fmt, marker::PhantomData};

use crate::{Error, Precision, Result};

/// Incrementally constructs a [`Point`].
///
/// Create this via [`Point::builder`].
#[derive(Debug)]
pub struct PointBuilder {
    measurement: EscapedMeasurement,
    tags: BTreeMap<EscapedTagKey, EscapedTagValue>,
    fields: BTreeMap<EscapedFieldKey, FieldValue>,
    timestamp: Option<(i64, Precision)>,
}

impl PointBuilder {
    fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into().into(),
            tags: Default::default(),
            fields: Default::default(),
            timestamp: Default::default(),
        }
    }

    /// Sets a tag, replacing any existing tag of the same name. Tags with an empty key or value
    /// are ignored.
    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        if !name.is_empty() && !value.is_empty() {
            self.tags.insert(name.into(), value.into());
        }
        self
    }

    /// Sets a field, replacing any existing field of the same name.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into().into(), value.into());
        self
    }

    /// Sets the timestamp, replacing any existing timestamp.
    ///
    /// `value` is the time since the UNIX epoch expressed in `precision`.
    pub fn timestamp(mut self, value: i64, precision: Precision) -> Self {
        self.timestamp = Some((value, precision));
        self
    }

    /// Constructs the point
    pub fn build(self) -> Result<Point> {
        let Self {
            measurement,
            tags,
            fields,
            timestamp,
        } = self;

        if measurement.is_empty() {
            return Err(Error::InvalidPoint("measurement name is empty".into()));
        }
        if fields.is_empty() {
            return Err(Error::InvalidPoint(format!(
                "point '{measurement}' has no fields"
            )));
        }

        Ok(Point {
            measurement,
            tags,
            fields,
            timestamp,
        })
    }
}

/// A single point of information to write to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: EscapedMeasurement,
    // kept sorted so the server does not have to sort them
    tags: BTreeMap<EscapedTagKey, EscapedTagValue>,
    fields: BTreeMap<EscapedFieldKey, FieldValue>,
    timestamp: Option<(i64, Precision)>,
}

impl Point {
    /// Create a builder to incrementally construct a [`Point`].
    pub fn builder(measurement: impl Into<String>) -> PointBuilder {
        PointBuilder::new(measurement)
    }

    pub fn measurement(&self) -> &str {
        &self.measurement.0
    }

    /// Render the point as one line of line protocol, with its timestamp converted to
    /// `precision`
    pub fn line_protocol(&self, precision: Precision) -> Result<String> {
        if let Some((key, value)) = self
            .fields
            .iter()
            .find(|(_, v)| matches!(v, FieldValue::F64(f) if !f.is_finite()))
        {
            return Err(Error::InvalidPoint(format!(
                "field '{key}' of '{}' is not a finite number: {value}",
                self.measurement
            )));
        }

        Ok(LineProtocol {
            point: self,
            precision,
        }
        .to_string())
    }
}

struct LineProtocol<'a> {
    point: &'a Point,
    precision: Precision,
}

impl fmt::Display for LineProtocol<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let point = self.point;
        write!(f, "{}", point.measurement)?;

        for (k, v) in &point.tags {
            write!(f, ",{k}={v}")?;
        }

        for (i, (k, v)) in point.fields.iter().enumerate() {
            let d = if i == 0 { " " } else { "," };
            write!(f, "{d}{k}={v}")?;
        }

        if let Some((value, unit)) = point.timestamp {
            write!(f, " {}", self.precision.convert(value, unit))?;
        }

        Ok(())
    }
}

type EscapedMeasurement = Escaped<MeasurementName>;
type EscapedTagKey = Escaped<TagKey>;
type EscapedTagValue = Escaped<TagKey>;
type EscapedFieldKey = Escaped<TagKey>;
type EscapedFieldValueString = Escaped<FieldValueString>;

/// A string that is escaped according to the rules of `K` when it is rendered.
#[derive(Debug, Clone)]
pub struct Escaped<K>(String, PhantomData<K>);

impl<K> Escaped<K> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K> PartialEq for Escaped<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}

impl<K> Eq for Escaped<K> {}

impl<K> PartialOrd for Escaped<K> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Escaped<K> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<K> From<String> for Escaped<K>
where
    K: EscapingSpecification,
{
    fn from(other: String) -> Self {
        Self(other, PhantomData)
    }
}

impl<K> fmt::Display for Escaped<K>
where
    K: EscapingSpecification,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut last = 0;

        for (idx, delim) in self.0.match_indices(K::DELIMITERS) {
            write!(f, r"{}\{}", &self.0[last..idx], delim)?;
            last = idx + delim.len();
        }

        f.write_str(&self.0[last..])
    }
}

/// Specifies how to escape a particular piece of a line.
pub trait EscapingSpecification {
    /// The characters that are prefixed with a backslash
    const DELIMITERS: &'static [char];
}

/// Rules to escape a measurement name
#[derive(Debug, Copy, Clone)]
pub struct MeasurementName(());

/// Rules to escape a tag key, tag value or field key
#[derive(Debug, Copy, Clone)]
pub struct TagKey(());

/// Rules to escape the contents of a string field value
#[derive(Debug, Copy, Clone)]
pub struct FieldValueString(());

impl EscapingSpecification for MeasurementName {
    const DELIMITERS: &'static [char] = &[',', ' '];
}

impl EscapingSpecification for TagKey {
    const DELIMITERS: &'static [char] = &[',', '=', ' '];
}

impl EscapingSpecification for FieldValueString {
    const DELIMITERS: &'static [char] = &['"', '\\'];
}

/// Possible field value types
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    F64(f64),
    I64(i64),
    String(EscapedFieldValueString),
}

impl From<bool> for FieldValue {
    fn from(other: bool) -> Self {
        Self::Bool(other)
    }
}

impl From<f64> for FieldValue {
    fn from(other: f64) -> Self {
        Self::F64(other)
    }
}

impl From<f32> for FieldValue {
    fn from(other: f32) -> Self {
        Self::F64(other.into())
    }
}

impl From<i64> for FieldValue {
    fn from(other: i64) -> Self {
        Self::I64(other)
    }
}

impl From<i32> for FieldValue {
    fn from(other: i32) -> Self {
        Self::I64(other.into())
    }
}

impl From<&str> for FieldValue {
    fn from(other: &str) -> Self {
        Self::String(other.to_string().into())
    }
}

impl From<String> for FieldValue {
    fn from(other: String) -> Self {
        Self::String(other.into())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}i"),
            Self::String(v) => write!(f, r#""{v}""#),
        }
    }
}
