pub(crate) mod analytics;
pub(crate) mod attempts;
pub(crate) mod errors;
pub(crate) mod reporting;
pub(crate) mod scoring;
pub(crate) mod sessions;
pub(crate) mod submission;
