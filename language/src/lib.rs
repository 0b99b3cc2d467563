pub mod def;
pub mod registry;
pub mod template;

pub use def::{ExecStage, LanguageDef, LanguageError, LanguageSpec};
pub use registry::{LanguageRegistry, REGISTRY};
pub use template::{check_template, render_template, split_template, TemplateError};
