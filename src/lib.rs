//! iotdatatunnel: MQTT ingestion gateway with JSON path filtering.
//!
//! A long-running daemon that subscribes to MQTT topics through
//! [`iotdatatunnel_mqtt`], buffers every message it receives, and drains the
//! buffer through configurable rules that select messages by JSON-path
//! predicates and extract typed values from them.
//!
//! ## Modules
//!
//! * `config`: TOML configuration with validation via the `validator` crate.
//!   Sections for logging, the subscriber, the buffer backend and the
//!   pipeline rules.
//!
//! * `json`: a small JSON parser producing a closed [`json::Value`] tree.
//!
//! * `path`: `$`, `.key` and `[n]` path expressions and the
//!   [`path::PathFilter`] that evaluates predicates and extractions against
//!   a message.
//!
//! * `core`: the pipeline that drains the buffer and applies rules.
//!
//! * `logger`: `tracing` initialization with console output in compact,
//!   pretty or JSON format and optional systemd journald integration.

pub mod config;
pub mod core;
pub mod json;
pub mod logger;
pub mod path;
