//! Protobuf messages of the Dataset API binary format.
//!
//! Field names and tags are fixed by the service; do not renumber.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DatasetApiProtobuf {
    #[prost(message, repeated, tag = "1")]
    pub geometries: Vec<GeometryProtobuf>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GeometryProtobuf {
    #[prost(string, tag = "1")]
    pub domain: String,
    #[prost(float, tag = "2")]
    pub lat: f32,
    #[prost(float, tag = "3")]
    pub lon: f32,
    #[prost(float, tag = "4")]
    pub asl: f32,
    #[prost(string, optional, tag = "5")]
    pub location_name: Option<String>,
    #[prost(int32, tag = "6")]
    pub nx: i32,
    #[prost(int32, tag = "7")]
    pub ny: i32,
    #[prost(string, tag = "8")]
    pub time_resolution: String,
    #[prost(message, repeated, tag = "9")]
    pub time_intervals: Vec<TimeIntervalProtobuf>,
    #[prost(message, repeated, tag = "10")]
    pub codes: Vec<CodeProtobuf>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeIntervalProtobuf {
    #[prost(int64, tag = "1")]
    pub start: i64,
    /// Exclusive.
    #[prost(int64, tag = "2")]
    pub end: i64,
    /// Seconds between samples.
    #[prost(int32, tag = "3")]
    pub stride: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CodeProtobuf {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub level: String,
    #[prost(string, tag = "3")]
    pub unit: String,
    #[prost(string, tag = "4")]
    pub aggregation: String,
    /// One entry per time interval of the enclosing geometry.
    #[prost(message, repeated, tag = "5")]
    pub timeintervals: Vec<TimeIntervalDataProtobuf>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeIntervalDataProtobuf {
    #[prost(float, repeated, tag = "1")]
    pub data: Vec<f32>,
}
