pub(crate) mod answers;
pub(crate) mod assessments;
pub(crate) mod questions;
pub(crate) mod students;
pub(crate) mod submissions;
