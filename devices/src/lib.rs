//! Abstract device capability layer for the observatory supervisor
//!
//! Each device the supervisor works with (roll-off roof "dome", telescope
//! mount, weather sensor suite, safety monitor, power relay bank) is exposed
//! as an async trait. The supervisor never talks to a wire protocol directly;
//! a driver backend implements these traits and the supervisor consumes them
//! through `Arc<dyn ...>` handles that may be attached or detached at any time.

mod error;
mod dome;
mod mount;
mod weather;
mod safety;
mod relay;
pub mod sim;

pub use error::*;
pub use dome::*;
pub use mount::*;
pub use weather::*;
pub use safety::*;
pub use relay::*;
