pub mod params;
pub mod schema;

pub use params::{ParamDef, Params};
pub use schema::{AgentConfig, BrowserConfig, Config, LlmConfig, NotesConfig, Viewport};
