use std::fmt::Debug;

use crate::{BoxError, Point, Precision};

/// A domain value that knows how to describe itself as a [`Point`]
///
/// The conversion runs on the write pipeline when the value is serialized, so a failure is
/// reported through an [`Event::Unhandled`](crate::Event::Unhandled) rather than to the caller.
///
/// ```
/// use influxdb_reactive::{BoxError, Measurement, Point, Precision};
///
/// #[derive(Debug)]
/// struct H2oFeet {
///     location: String,
///     water_level: f64,
///     time_ms: i64,
/// }
///
/// impl Measurement for H2oFeet {
///     fn to_point(&self, _precision: Precision) -> Result<Point, BoxError> {
///         Ok(Point::builder("h2o_feet")
///             .tag("location", &self.location)
///             .field("water_level", self.water_level)
///             .timestamp(self.time_ms, Precision::Millisecond)
///             .build()?)
///     }
/// }
/// ```
pub trait Measurement: Debug + Send + Sync + 'static {
    /// Build the point for this value; `precision` is the precision the point will be written
    /// with
    fn to_point(&self, precision: Precision) -> Result<Point, BoxError>;
}
