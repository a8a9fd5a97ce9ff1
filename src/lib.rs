pub mod color;
pub mod error_codes;
pub mod export;
pub mod gpu;
pub mod grid;
pub mod image_source;
pub mod overlay;
pub mod picker;
pub mod renderer;
pub mod schema;
pub mod script;
pub mod session;
pub mod shader;
pub mod software;
