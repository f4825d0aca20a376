pub mod base;
pub mod capture;
pub mod discord;
pub mod logging;

pub use base::*;
pub use capture::*;
pub use discord::*;
pub use logging::*;
