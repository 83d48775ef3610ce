pub mod location;
pub mod title;

pub use location::{parse_location, ParsedLocation};
pub use title::{parse_title, AbbrevMap, ParsedTitle};
