//! CLI commands

mod completions;
mod devices;
mod distribute;
mod groups;
mod init;
mod status;
mod upload;

pub use completions::CompletionsCommand;
pub use devices::DevicesCommand;
pub use distribute::DistributeCommand;
pub use groups::GroupsCommand;
pub use init::InitCommand;
pub use status::StatusCommand;
pub use upload::UploadCommand;
