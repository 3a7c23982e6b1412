mod maintenance;
mod metar_refresh;

pub use maintenance::*;
pub use metar_refresh::*;
