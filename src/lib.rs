// Crate root library declaration and module exports.

pub mod calendar;
pub mod cli;
pub mod command_error;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod display;
pub mod engine;
pub mod error;
pub mod model;
pub mod requests;
pub mod resource;
pub mod resources;
pub mod scheduler;
pub mod storage;

pub use calendar::{EventId, ResourcesCalendar};
pub use display::DisplayCalendar;
pub use engine::{Engine, EngineCommand};
pub use error::{AlarmError, AlarmResult};
pub use resource::{Resource, ResourceId, StorageKind, TypeMask};
pub use resources::Resources;
pub use scheduler::Scheduler;
