//! Quote log persistence: append-only CSV recording with UTC-midnight
//! rotation, optional gzip, delta mode, and deterministic replay.

pub mod recorder;
pub mod replayer;

pub use recorder::{
    log_file_path, record_stream, QuoteRecorder, RecordMode, RecorderConfig, RecorderStats,
    CSV_HEADER,
};
pub use replayer::{QuoteReplayer, TimeDriver};
