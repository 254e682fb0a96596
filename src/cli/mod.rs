//! Terminal front end
//!
//! Colored rendering of selector views on stderr and decoding of
//! operator command lines.

pub mod display;
pub mod input;

pub use display::{format_view, render_result, render_view};
pub use input::parse_line;
