//! NavGuard Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" boundary that lets the NavGuard engine run
//! both on a real wearable (tokio, GPIO drivers, SMS gateway) and inside the
//! deterministic simulation harness.
//!
//! # Core Concept: The Reactor Pattern
//!
//! The decision core never touches the outside world directly. Everything that
//! would introduce non-determinism or blocking I/O is intercepted:
//! - Time (`now()`, `sleep()`)
//! - Background work (`spawn()`)
//! - Actuation (`ActuatorDriver::apply()`)
//! - Outbound notification (`NotificationGateway::send()`)
//!
//! # Example
//!
//! ```ignore
//! use navguard_env::{NavContext, NotificationGateway};
//!
//! async fn decision_loop<Ctx: NavContext>(ctx: &Ctx) {
//!     loop {
//!         tokio::select! {
//!             cancel = cancel_rx.recv() => handle_cancel(cancel),
//!             _ = ctx.sleep(Duration::from_millis(150)) => tick(),
//!         }
//!     }
//! }
//! ```

mod actuator;
mod context;
mod error;
mod gateway;
mod tokio_impl;
mod types;

pub use actuator::ActuatorDriver;
pub use context::NavContext;
pub use error::EnvError;
pub use gateway::NotificationGateway;
pub use tokio_impl::TokioContext;
pub use types::{ActuatorCommand, Delivery, Device, Pattern};
