//! PhonePilot: task execution and scheduling engine for phone automation.
//!
//! The engine drives an automation agent against a connected phone and keeps
//! the controlling surface responsive while it does so. It is presentation
//! agnostic: everything user-visible flows out as [`RuntimeEvent`]s over an
//! async channel, and user input flows back in through the run controller.
//!
//! # Architecture
//!
//! - **Run controller**: one task execution at a time, with device hooks,
//!   retries and cooperative cancellation ([`runner`])
//! - **Output aggregation**: coalesces raw output fragments into coherent
//!   log lines ([`output`])
//! - **Prompt bridge**: blocks task logic on mid-task questions until the
//!   user answers, a stop arrives, or a ceiling expires ([`prompt`])
//! - **Scheduler**: interval or daily fire times feeding the controller
//!   ([`scheduler`])
//! - **Device control**: best-effort wake/lock/kill-app over `adb`
//!   ([`device`])

pub mod config;
pub mod device;
pub mod error;
pub mod output;
pub mod prompt;
pub mod runner;
pub mod runtime;
pub mod scheduler;

pub use config::{AdvancedOptions, AppConfig, RunConfig, ScheduleMode, ScheduleSettings};
pub use device::{AdbDevice, DeviceControl};
pub use error::{AgentError, Result};
pub use runner::{RunController, RunIo, TaskLogic};
pub use runtime::{RunPhase, RuntimeEvent};
pub use scheduler::{ScheduleSpec, Scheduler};
