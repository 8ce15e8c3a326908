//! Entity wrappers over the remote representations.
//!
//! Each wrapper embeds an [`crate::marshal::EntityState`] and reads through
//! its static descriptor; the test run additionally merges the per-project
//! custom-field entries at construction. Wrappers are single-owner values —
//! clone one rather than sharing it across threads.

pub mod attachment;
pub mod document;
pub mod project;
pub mod step_result;
pub mod test_record;
pub mod test_run;
pub mod text;
pub mod user;
pub mod work_item;

pub use attachment::RunAttachment;
pub use document::Document;
pub use project::Project;
pub use step_result::TestStepResult;
pub use test_record::TestRecord;
pub use test_run::{
    RecordInput, RunStatus, SearchOptions, SelectionMode, TemplateOptions, TestRun,
};
pub use text::{Text, TextContent};
pub use user::User;
pub use work_item::WorkItem;
