pub mod boundingbox;
pub mod cut;
pub(crate) mod nodestore;
pub mod nodeview;
#[allow(clippy::module_inception)]
pub mod tree;

pub use boundingbox::BoundingBox;
pub use cut::Cut;
pub use nodeview::NodeView;
pub use tree::RandomCutTree;
