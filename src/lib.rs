//! apt-s3 library: an APT transport method for Amazon S3.
//!
//! APT launches the method as a child process and talks to it over
//! stdin/stdout using the line-oriented method interface. This crate
//! provides the message model, the `s3://` location resolver, the
//! response builders and the protocol engine, plus storage backends
//! for AWS S3 and for in-memory use.

pub mod config;
pub mod engine;
pub mod errors;
pub mod location;
pub mod message;
pub mod response;
pub mod storage;

pub use engine::{EngineState, Method};
pub use errors::{FatalError, MethodError};
pub use message::{Field, Header, Message};
