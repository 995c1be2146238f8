//! TLS intake server for patient records with genomic signature screening.
//!
//! Clients send `COMMAND|key=value|...` requests in length-prefixed frames
//! and get `STATUS;detail;payload` replies. Patients, detections and
//! sequences live in flat files below the data directory.

pub mod audit;
pub mod catalog;
pub mod client;
pub mod cmd;
pub mod config;
pub mod connection;
pub mod db;
pub mod diagnosis;
pub mod frame;
pub mod reply;
pub mod sequence;
pub mod server;
pub mod tls;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_PORT: u16 = 2020;
