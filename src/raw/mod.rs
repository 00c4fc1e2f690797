mod arena;
mod handle;
mod node;
mod raw_bptree;

pub(crate) use handle::Handle;
pub(crate) use node::Node;
pub(crate) use raw_bptree::RawBPTree;
