//! Log root scanner: segment naming, entry classification, victim selection, deletion.

pub mod classifier;
pub mod deletion;
pub mod naming;
pub mod selector;
