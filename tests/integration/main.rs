//! Integration tests for the futures-lead market maker

mod common;
mod test_lifecycle;
mod test_pipeline;
