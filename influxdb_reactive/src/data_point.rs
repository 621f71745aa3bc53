use std::sync::Arc;

use crate::{Error, Measurement, Point, Result, WriteOptions};

/// The value carried by a [`DataPoint`]
#[derive(Debug, Clone)]
pub enum Payload {
    /// A domain value converted with [`Measurement::to_point`] at serialization time
    Measurement(Arc<dyn Measurement>),
    /// A structured point
    Point(Point),
    /// A line of line protocol, written verbatim
    Record(Arc<str>),
}

impl From<Point> for Payload {
    fn from(point: Point) -> Self {
        Self::Point(point)
    }
}

impl From<Arc<dyn Measurement>> for Payload {
    fn from(measurement: Arc<dyn Measurement>) -> Self {
        Self::Measurement(measurement)
    }
}

impl From<&str> for Payload {
    fn from(record: &str) -> Self {
        Self::Record(record.into())
    }
}

impl From<String> for Payload {
    fn from(record: String) -> Self {
        Self::Record(record.into())
    }
}

/// One unit of data travelling through the write pipeline, together with its destination
#[derive(Debug, Clone)]
pub struct DataPoint {
    payload: Payload,
    options: WriteOptions,
}

impl DataPoint {
    pub fn new(payload: impl Into<Payload>, options: WriteOptions) -> Self {
        Self {
            payload: payload.into(),
            options,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    /// The line protocol line of this point, in the precision of its [`WriteOptions`]
    pub fn line_protocol(&self) -> Result<String> {
        let precision = self.options.time_precision();
        match &self.payload {
            Payload::Record(record) => Ok(record.to_string()),
            Payload::Point(point) => point
                .line_protocol(precision)
                .map_err(|e| Error::serialization(point, e)),
            Payload::Measurement(measurement) => measurement
                .to_point(precision)
                .and_then(|point| point.line_protocol(precision).map_err(Into::into))
                .map_err(|e| Error::serialization(measurement, e)),
        }
    }
}
