//! Import job processing: concurrency resolution, per-cycle dispatch, backoff,
//! and the poll loop that ties them together.

pub mod backoff;
pub mod dispatcher;
pub mod governor;
pub mod poll_loop;
