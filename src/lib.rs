//! # Knowledge RAG
//!
//! Retrieval-augmented answering over an uploads directory of documents.
//!
//! Documents are split into overlapping character windows, each window is
//! embedded by a hosted or local model, and the vectors are kept in a flat
//! L2 index persisted beside an ordered metadata list. Questions are
//! embedded the same way, matched against the index, and the closest chunks
//! are handed to a text generation model as grounding.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Uploads    │──▶│   Pipeline   │──▶│ Vector Index │
//! │ JSON+files  │   │ Chunk+Embed  │   │  L2 + meta   │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                             ▼
//!                   ┌──────────────┐   ┌──────────────┐
//!                   │   Answer     │◀──│  Retrieval   │
//!                   │  Composer    │   │   Service    │
//!                   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! krag init                                   # create index + uploads dirs
//! krag add notes/auth.md --title "Auth guide" # register and index a file
//! krag rebuild                                # re-index every upload
//! krag search "token rotation"
//! krag ask "How do I rotate the API token?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed failures per stage |
//! | [`chunk`] | Fixed-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Text generation provider abstraction |
//! | [`store`] | Persistent flat-L2 vector index |
//! | [`ingest`] | Per-document indexing and rebuilds |
//! | [`retrieval`] | Query embedding and nearest-chunk search |
//! | [`answer`] | Prompt building and answer composition |
//! | [`sources`] | Uploads directory |
//! | [`knowledge`] | Facade over the whole pipeline |
//! | [`search`] | `krag search` / `krag ask` output |
//! | [`stats`] | `krag stats` output |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod knowledge;
pub mod models;
pub mod retrieval;
pub mod search;
pub mod sources;
pub mod stats;
pub mod store;
