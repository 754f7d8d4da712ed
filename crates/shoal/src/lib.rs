//! Shoal - a multi-shard bot runtime with coordinated lifecycles and shared hot state.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod build_info;
pub mod cache;
pub mod clock;
pub mod config;

// ============================================================================
// Shard Lifecycle
// ============================================================================

pub mod coordinator;
pub mod runtime;
pub mod session;

// ============================================================================
// Event Processing
// ============================================================================

pub mod dispatch;
pub mod pipeline;

// ============================================================================
// Domain Services
// ============================================================================

pub mod economy;
