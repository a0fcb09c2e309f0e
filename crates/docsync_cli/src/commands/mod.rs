pub(crate) mod meta;
pub(crate) mod once;
pub(crate) mod rebuild;
pub(crate) mod run;
pub(crate) mod shared;
