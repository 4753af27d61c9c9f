//! ABR Session Server
//!
//! Authoritative registry and state machine for adaptive-bitrate stream
//! sessions. For each live stream it tracks a ladder of quality variants,
//! supervises one encoder process per enabled variant, folds delivery
//! telemetry into a throughput estimate, and serves standards-conformant
//! multivariant and media playlists that reflect the currently advertised
//! variant set.
//!
//! # Architecture
//!
//! ```text
//! Player <--HLS--> abr-server <--process--> ffmpeg (one per variant)
//!                      ^
//!                      | telemetry (segment delivery timing)
//! ```
//!
//! # Endpoints
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /api/streams/{id}/abr/session` | Session state |
//! | `GET /api/streams/{id}/abr/variants` | Stored variant ladder |
//! | `POST /api/streams/{id}/abr/start` | Start (idempotent) |
//! | `POST /api/streams/{id}/abr/stop` | Stop (idempotent) |
//! | `POST /api/streams/{id}/abr/telemetry` | Bandwidth sample ingest |
//! | `GET /api/abr/sessions` | Registry snapshot |
//! | `GET /api/streams/{id}/abr/playlist.m3u8` | Master playlist |
//! | `GET /api/streams/{id}/abr/variants/{variant}/playlist.m3u8` | Media playlist |

pub mod catalog;
pub mod error;
pub mod manager;
pub mod playlist;
pub mod routes;
mod session;

pub use catalog::{CatalogStore, MemoryCatalog};
pub use error::AbrError;
pub use manager::{ServerConfig, SessionManager};
pub use session::{AbrSession, SessionStatus, SessionSummary};
