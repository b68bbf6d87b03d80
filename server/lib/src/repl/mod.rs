pub mod cookie;
pub mod expand;
pub(crate) mod extract;
pub mod metadata;
pub mod populate;
pub mod update;
pub mod usn;
