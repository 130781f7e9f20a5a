pub mod cache;
pub mod core;
pub mod gate;
pub mod intent;
pub mod lifecycle;
pub mod notices;
pub mod resolver;
pub mod sync_guard;
pub mod view;

pub use crate::core::{CoreBroadcast, CoreEvent, CoreSettings, OperatorAction, SessionCore};
pub use crate::view::{SessionView, ViewStore};
