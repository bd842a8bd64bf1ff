pub mod load_shed;
pub mod timeout;

pub use load_shed::{LoadShedLayer, LoadShedService};
pub use timeout::{TimeoutLayer, TimeoutService};
