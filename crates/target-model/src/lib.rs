pub mod command;
pub mod install;
pub mod project;
pub mod source;
pub mod target;

pub mod prelude {
    pub use crate::command::CustomCommand;
    pub use crate::install::InstallRule;
    pub use crate::project::Project;
    pub use crate::source::{Language, SourceFile};
    pub use crate::target::{LinkItem, PchConfig, Target, TargetKind};
}
