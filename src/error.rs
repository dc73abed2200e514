//! Typed errors for the ambient surface around the allocation engine.
//!
//! The five core entry points (`init`, `malloc`, `free`, `realloc`,
//! `validate`) still report through `Option`/`bool` as specified — that is
//! their actual contract, and turning a null return into an error type
//! would just be ceremony at the hottest path in the crate. `AllocError`
//! exists for the collaborators around that core: the segment provider,
//! and (in `demos/`) the trace-script reader.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
  #[error("segment provider refused to reserve {pages} page(s)")]
  SegmentExhausted { pages: usize },
}
