pub mod capture;
pub mod jewelry;
pub mod placement;
pub mod render_loop;
pub mod session;
mod surface;

pub use session::{SessionOptions, TryOnSession};
