//! # class-inspector
//!
//! Serves read-only introspection queries (classes, members, method source,
//! cross-references, resources) over a decompiled Java archive, as JSON over
//! a minimal HTTP endpoint.
//!
//! ## Architecture
//!
//! - **model**: The `Decompiler` collaborator trait and the values it returns
//! - **extract**: Method boundary extraction from decompiled class text
//! - **tools**: The operation table and its handlers
//! - **dispatch**: Routing, the error envelope and panic isolation
//! - **request**: HTTP request framing and response writing
//! - **server**: Accept loop and worker pool
//! - **workspace**: JAR-backed `Decompiler` built on CFR
//! - **archive**: JAR entry listing and reads
//! - **cfr**: CFR decompiler integration
//! - **parse**: Decompiled output splitting and hashing
//! - **structure**: Class outlines using tree-sitter AST parsing
//! - **cache**: Persistent LMDB storage for decompiled sources
//! - **telemetry**: tracing subscriber setup

pub mod archive;
pub mod cache;
pub mod cfr;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod model;
pub mod parse;
pub mod request;
pub mod server;
pub mod structure;
pub mod telemetry;
pub mod tools;
pub mod workspace;
