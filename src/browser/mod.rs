pub mod connection;
pub mod status_listener;
pub mod surface_driver;

pub use connection::connect_to_browser_and_page;
pub use surface_driver::BrowserSurface;
