//! Link resolution and advisory topology checks.

mod links;
mod validate;

pub use links::{build_links, classify_link, link_kind, LinkKind};
pub use validate::{validate_clos, validate_non_clos};
