pub mod session;
pub mod provider;
pub mod webhook;
pub mod ai;
pub mod event;

pub use session::*;
pub use provider::*;
pub use webhook::*;
pub use ai::*;
pub use event::*;
