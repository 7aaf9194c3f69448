pub mod clean;
pub mod fetch;
pub mod log;
pub mod sites;
pub mod store;

pub use clean::*;
pub use fetch::*;
pub use log::*;
pub use sites::*;
pub use store::*;
