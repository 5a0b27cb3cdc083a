//! Integration tests for bucketline.
//!
//! Every test drives `ObjectClient` through the real aws-sdk-s3 stack.
//! Requests end at an in-process executor (see `common`), so nothing
//! touches the network.

mod common;
mod config_test;
mod hedging_test;
