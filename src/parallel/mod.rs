//! Large file upload in parallel splits.
//!
//! The client cuts a file into numbered splits and uploads each over its own
//! connection inside a resource session; the receiving agent concatenates
//! them in suffix order on ACTION:/merge.

pub use merge::{merge_splits, order_splits, split_index};
pub use split::{
    split_name, worker_count, ParallelUploader, RemoteSplitSink, SplitRange, SplitReader,
    SplitSink, SplitUpload,
};

mod merge;
mod split;
