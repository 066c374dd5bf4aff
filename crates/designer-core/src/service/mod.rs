//! Service Layer
//!
//! - `LogStream`: consumes the log subject into the bounded buffer
//! - `DesignerService`: implements `DesignerApi`
//! - `DesignerSession`: owns the connection and wires the two together

pub mod designer;
pub mod log_stream;
pub mod session;

pub use designer::DesignerService;
pub use log_stream::LogStream;
pub use session::DesignerSession;
