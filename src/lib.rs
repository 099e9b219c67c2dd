//! # notegen
//!
//! A document-to-study-notes pipeline service.
//!
//! Users upload documents (PDF, DOCX, TXT), the service extracts text,
//! chunks and embeds it, generates AI study notes, and answers questions
//! over the uploaded content via a streaming chat grounded in retrieved
//! chunks. Auth, blob storage, and row persistence live behind an
//! external Backend Service reached over REST.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────┐   ┌───────────┐
//! │  Upload  │──▶│ Extract │──▶│ Chunk │──▶│  Backend   │
//! │ (files)  │   │ PDF/DOCX│   │+Embed │   │  Service   │
//! └──────────┘   └────┬────┘   └───────┘   └─────┬─────┘
//!                     │                          │
//!                     ▼                          ▼
//!               ┌──────────┐             ┌─────────────┐
//!               │  Notes   │             │  Retrieval   │
//!               │ (1 call) │             │ + Chat (SSE) │
//!               └──────────┘             └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! notegen serve                           # start the HTTP server
//! notegen extract ./lecture.pdf           # debug text extraction
//! notegen ask "what is mitosis?"          # stream an answer to stdout
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction with per-format fallbacks |
//! | [`chunk`] | Fixed-window text chunking |
//! | [`embedding`] | Remote embeddings with synthetic fallback |
//! | [`backend`] | Backend Service boundary (REST + in-memory) |
//! | [`retrieval`] | Similarity RPC with manual cosine fallback |
//! | [`chat`] | Streaming chat completion relay |
//! | [`notes`] | Study-notes generation |
//! | [`pipeline`] | Upload orchestration |
//! | [`server`] | HTTP server |

pub mod backend;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod models;
pub mod notes;
pub mod pipeline;
pub mod retrieval;
pub mod server;
