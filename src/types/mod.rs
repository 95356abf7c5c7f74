//!
//! Types exchanged with the remote endpoint and published to consumers.
//!
//! Wire types are deliberately tolerant: a field that is missing, `null`
//! or of an unexpected type is treated as absent instead of failing the
//! whole response.

mod lenient;
pub mod node;
pub mod records;
pub mod status;

pub use node::{Node, NodeInfo, Presence, Snapshot};
pub use records::{
    LoadRecord, PingRecord, PingTask, RecordKey, RecordsPage, SeriesKind, TimedRecord,
};
pub use status::{LatestStatus, RawStatus, SampleField, StatusRecord};
