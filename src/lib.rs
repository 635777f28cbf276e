//! Lazarus - real-time emergency triage relay
//!
//! Clients stream microphone audio and camera frames over a WebSocket. Each
//! connection gets its own Gemini Live conversation; every media item becomes
//! one turn, and the JSON assessments found in the model's reply are pushed
//! back to the client as they complete.

#![forbid(unsafe_code)]

/// Assessment values forwarded to clients
pub mod alert;
/// Environment configuration
pub mod config;
/// Gemini Live wire types
pub mod gemini;
/// Gemini Live WebSocket client
pub mod gemini_client;
/// Bounded queue between ingress and relay
pub mod ingress_queue;
/// Incremental JSON object extraction
pub mod json_stream;
/// Client media items and envelopes
pub mod media_event;
/// Queue-draining inference relay
pub mod relay;
/// WebSocket listener
pub mod server;
/// Per-connection orchestration
pub mod session;
/// Alert writer task
pub mod ws_writer;
