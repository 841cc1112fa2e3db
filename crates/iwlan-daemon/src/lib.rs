//! IWLAN Daemon Library
//!
//! Per-slot tunnel lifecycle on top of `iwlan-core`:
//! - Retry ledger tracking throttled APNs and their retry schedules
//! - Tunnel orchestrator answering data call requests
//! - Event dispatcher serializing every state change on one worker
//! - Slot registry and listener subscriptions

pub mod dispatch;
pub mod ledger;
pub mod listener;
pub mod registry;
pub mod tunnel;
