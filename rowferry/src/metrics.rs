//! Metric names and registration for the pipeline.

use metrics::{describe_counter, describe_gauge};

/// Rows copied by the data iterator.
pub const ROWS_COPIED_TOTAL: &str = "rowferry_rows_copied_total";
/// Row events decoded and delivered by the binlog streamer, labelled by
/// [`EVENT_TYPE_LABEL`].
pub const EVENTS_STREAMED_TOTAL: &str = "rowferry_events_streamed_total";

/// Label carrying the row-event kind (insert, update, delete) on streamed
/// event counters.
pub const EVENT_TYPE_LABEL: &str = "event_type";
/// Batches committed to the target.
pub const BATCHES_WRITTEN_TOTAL: &str = "rowferry_batches_written_total";
/// Whole-batch write retries against the target.
pub const WRITE_RETRIES_TOTAL: &str = "rowferry_write_retries_total";
/// 1 while producers are throttled, 0 otherwise.
pub const THROTTLED: &str = "rowferry_throttled";

/// Registers metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(ROWS_COPIED_TOTAL, "Rows copied from the source by the data iterator");
    describe_counter!(
        EVENTS_STREAMED_TOTAL,
        "Row events decoded from the binlog and delivered to listeners"
    );
    describe_counter!(BATCHES_WRITTEN_TOTAL, "Batches committed to the target database");
    describe_counter!(
        WRITE_RETRIES_TOTAL,
        "Whole-batch retries caused by transient target write failures"
    );
    describe_gauge!(THROTTLED, "Whether producers are currently throttled");
}
