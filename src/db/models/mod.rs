//! Database models split into domain-specific modules.

pub mod airport;
pub mod common;
pub mod favorite;
pub mod metar;
pub mod user;

pub use airport::*;
pub use common::*;
pub use favorite::*;
pub use metar::*;
pub use user::*;
