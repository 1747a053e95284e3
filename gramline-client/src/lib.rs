#![cfg_attr(not(test), forbid(unsafe_code))]

//! Gramline command-line dashboard client: conversation listing, history,
//! and an interactive chat loop built on the reconciliation engine.

pub mod api;
pub mod commands;
pub mod stream;
pub mod sync;
