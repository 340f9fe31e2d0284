//! A passive capture pipeline for VoIP traffic.
//!
//! Frames come in off a [`capture::CaptureHandle`], get decoded by
//! [`decode`], reassembled by [`ipv4`] and [`tcp`], dispatched by
//! [`transport`], and handed to a [`parser::ParserComposite`] that emits
//! [`output::OutputPacket`]s onto a bounded channel. [`partition`] runs that
//! chain against one capture handle, and [`pipeline::Pipeline`] wires one or
//! more partitions into a unit a caller starts and stops together.

pub mod capture;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod ipv4;
pub mod message;
pub mod output;
pub mod parser;
pub mod partition;
pub mod pipeline;
pub mod tcp;
pub mod telemetry;
pub mod transport;
pub mod udp;

pub use message::Message;
pub use output::OutputPacket;
pub use pipeline::Pipeline;
